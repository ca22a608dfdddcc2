//! Command handlers

pub mod config;
pub mod hash;
pub mod run;
pub mod scan;
pub mod send;

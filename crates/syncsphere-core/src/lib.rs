//! SyncSphere Core Library
//!
//! This crate provides the core of SyncSphere, a client that keeps a local
//! folder in sync with a paired device over a persistent WebSocket.
//!
//! # Architecture
//!
//! - **Manifest**: full scan of the sync root, sent to the peer
//! - **Plan**: the peer's answer, listing uploads, downloads and conflicts
//! - **Session**: connection lifecycle and the sync protocol state machine
//!
//! # Quick Start
//!
//! ```text
//! let config = Config::load()?;
//! let engine = SyncEngine::new(config.engine_config());
//! let mut handle = spawn_session(config.session_config(), engine);
//!
//! while let Some(event) = handle.event_rx.as_mut().unwrap().recv().await {
//!     println!("{:?}", event);
//! }
//! ```
//!
//! # Modules
//!
//! - `manifest`: directory scanning
//! - `hash`: content digests
//! - `plan`: sync plans and a reference planner
//! - `sync`: wire protocol, transfer executor, engine and session
//! - `quick`: one-off file sends over HTTP
//! - `access`: folder access capability
//! - `config`: application configuration
//! - `error`: error types

pub mod access;
pub mod config;
pub mod error;
pub mod hash;
pub mod manifest;
pub mod plan;
pub mod quick;
pub mod sync;

pub use access::{AccessDecision, FolderAccess, FsFolderAccess};
pub use config::Config;
pub use error::{QuickTransferError, ScanError, SyncError, SyncResult};
pub use manifest::{Entry, Manifest};
pub use plan::{PlanItem, SyncPlan};
pub use quick::{QuickReceipt, QuickTransfer};
pub use sync::{spawn_session, EngineConfig, EngineState, SessionConfig, SyncEngine, SyncEvent};

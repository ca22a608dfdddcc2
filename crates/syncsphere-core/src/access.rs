//! Folder access capability
//!
//! Before a session touches the sync root it asks for access once. The
//! default implementation checks the filesystem; hosts with their own
//! permission model plug in another [`FolderAccess`].

use std::path::Path;

/// Outcome of an access request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Granted,
    Denied(String),
}

impl AccessDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, AccessDecision::Granted)
    }
}

/// Grants or denies read/write access to a sync root
pub trait FolderAccess: Send + Sync {
    fn request(&self, root: &Path) -> AccessDecision;
}

/// Grants access to existing, writable directories
#[derive(Debug, Clone, Copy, Default)]
pub struct FsFolderAccess;

impl FolderAccess for FsFolderAccess {
    fn request(&self, root: &Path) -> AccessDecision {
        match std::fs::metadata(root) {
            Ok(meta) if !meta.is_dir() => {
                AccessDecision::Denied(format!("{} is not a directory", root.display()))
            }
            Ok(meta) if meta.permissions().readonly() => {
                AccessDecision::Denied(format!("{} is read-only", root.display()))
            }
            Ok(_) => AccessDecision::Granted,
            Err(e) => AccessDecision::Denied(format!("{}: {}", root.display(), e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_existing_directory_is_granted() {
        let dir = TempDir::new().unwrap();
        assert!(FsFolderAccess.request(dir.path()).is_granted());
    }

    #[test]
    fn test_missing_directory_is_denied() {
        let decision = FsFolderAccess.request(Path::new("/nonexistent/sync/root"));
        assert!(matches!(decision, AccessDecision::Denied(_)));
    }

    #[test]
    fn test_file_is_denied() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("plain.txt");
        std::fs::write(&file, b"x").unwrap();

        let AccessDecision::Denied(reason) = FsFolderAccess.request(&file) else {
            panic!("Expected denial");
        };
        assert!(reason.contains("not a directory"));
    }
}

//! Per-session browser profile directories.
//!
//! Each session exclusively owns `{storage}/session/{session_id}/`. The
//! directory persists across process restarts and headless toggles so
//! cookies and logged-in state survive. Session ids are validated against
//! traversal, directories are created owner-only, and symlinked targets are
//! refused.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use invisibrow_types::InvisibrowError;

fn is_valid_session_id(session_id: &str) -> bool {
    !session_id.is_empty()
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(unix)]
fn set_owner_only_permissions(path: &Path) -> Result<(), InvisibrowError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o700)).map_err(|e| {
        InvisibrowError::Browser(format!(
            "failed to set permissions on {}: {e}",
            path.display()
        ))
    })
}

#[cfg(not(unix))]
fn set_owner_only_permissions(_path: &Path) -> Result<(), InvisibrowError> {
    Ok(())
}

/// Manages session profile directories under one root.
pub struct ProfileManager {
    root: PathBuf,
}

impl ProfileManager {
    /// `root` is the `session/` directory under the storage root.
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Ensure the profile directory for a session exists and return it.
    pub fn ensure_profile(&self, session_id: &str) -> Result<PathBuf, InvisibrowError> {
        if !is_valid_session_id(session_id) {
            return Err(InvisibrowError::Browser(format!(
                "invalid session id '{session_id}': only alphanumeric, dash, underscore allowed"
            )));
        }

        let dir = self.root.join(session_id);
        if let Ok(meta) = dir.symlink_metadata() {
            if meta.file_type().is_symlink() {
                return Err(InvisibrowError::Browser(format!(
                    "profile path is a symlink (refusing to follow): {}",
                    dir.display()
                )));
            }
            return Ok(dir);
        }

        fs::create_dir_all(&dir).map_err(|e| {
            InvisibrowError::Browser(format!("failed to create {}: {e}", dir.display()))
        })?;
        set_owner_only_permissions(&dir)?;
        info!(session_id = %session_id, dir = %dir.display(), "profile directory created");
        Ok(dir)
    }

    /// Remove a session's profile directory, if present.
    pub fn delete_profile(&self, session_id: &str) -> Result<(), InvisibrowError> {
        if !is_valid_session_id(session_id) {
            return Err(InvisibrowError::Browser(format!(
                "invalid session id '{session_id}'"
            )));
        }
        let dir = self.root.join(session_id);
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|e| {
                InvisibrowError::Browser(format!("failed to remove {}: {e}", dir.display()))
            })?;
            info!(session_id = %session_id, "profile directory removed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn creates_profile_directory_once() {
        let root = TempDir::new().unwrap();
        let manager = ProfileManager::new(root.path().to_path_buf());

        let dir = manager.ensure_profile("session-1").unwrap();
        assert!(dir.is_dir());
        // Idempotent.
        assert_eq!(manager.ensure_profile("session-1").unwrap(), dir);
    }

    #[test]
    fn rejects_traversal_ids() {
        let root = TempDir::new().unwrap();
        let manager = ProfileManager::new(root.path().to_path_buf());

        assert!(manager.ensure_profile("../etc").is_err());
        assert!(manager.ensure_profile("a/b").is_err());
        assert!(manager.ensure_profile("").is_err());
        assert!(manager.ensure_profile("has space").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn profile_directory_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let root = TempDir::new().unwrap();
        let manager = ProfileManager::new(root.path().to_path_buf());
        let dir = manager.ensure_profile("locked").unwrap();
        let mode = std::fs::metadata(&dir).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[cfg(unix)]
    #[test]
    fn refuses_symlinked_profile() {
        let root = TempDir::new().unwrap();
        let manager = ProfileManager::new(root.path().to_path_buf());
        let target = root.path().join("elsewhere");
        std::fs::create_dir(&target).unwrap();
        std::os::unix::fs::symlink(&target, root.path().join("linked")).unwrap();

        assert!(manager.ensure_profile("linked").is_err());
    }

    #[test]
    fn delete_removes_directory() {
        let root = TempDir::new().unwrap();
        let manager = ProfileManager::new(root.path().to_path_buf());
        let dir = manager.ensure_profile("gone").unwrap();
        assert!(dir.exists());
        manager.delete_profile("gone").unwrap();
        assert!(!dir.exists());
        // Deleting a missing profile is fine.
        manager.delete_profile("gone").unwrap();
    }
}

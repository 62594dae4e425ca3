//! Persisted session and task records.
//!
//! Both stores hold their full record set in memory behind a mutex and
//! rewrite their JSON file on every mutation, atomically (write a temp file,
//! then rename). Loading a task file after a crash rewrites any task that
//! was still pending or running to failed; this is the only non-idempotent
//! step of initialization.

mod sessions;
mod tasks;

pub use sessions::SessionStore;
pub use tasks::{TaskStore, RESTART_FAILURE_MESSAGE};

use std::path::Path;

use invisibrow_types::InvisibrowError;

/// Write `content` to `path` atomically (temp file + rename).
fn atomic_write(path: &Path, content: &str) -> Result<(), InvisibrowError> {
    let parent = path
        .parent()
        .ok_or_else(|| InvisibrowError::Store(format!("no parent dir for {}", path.display())))?;
    std::fs::create_dir_all(parent)
        .map_err(|e| InvisibrowError::Store(format!("failed to create {}: {e}", parent.display())))?;

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, content)
        .map_err(|e| InvisibrowError::Store(format!("failed to write {}: {e}", tmp.display())))?;
    std::fs::rename(&tmp, path).map_err(|e| {
        InvisibrowError::Store(format!("failed to move {} into place: {e}", tmp.display()))
    })
}

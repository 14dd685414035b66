//! Scoped write access to installed files.

use crate::error::{RelinkError, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

const OWNER_RW: u32 = 0o600;
const OWNER_W: u32 = 0o200;

/// Run `f` with `path` writable by the current user.
///
/// If the owner-write bit is missing, `u+rw` is added before `f` runs and the
/// original mode is put back afterwards, whether `f` succeeded or not. The
/// file is then opened for writing (without truncation) to confirm the
/// current user can actually modify it; a file owned by someone else with
/// mode `0644` fails here rather than inside the editing tool.
///
/// Failing to change the mode, open the file, or restore the mode is
/// `RelinkError::Unwritable`. When both `f` and the restore fail, `f`'s error
/// is returned and the restore failure is logged.
pub fn ensure_writable<T, F>(path: &Path, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    let unwritable = |source: std::io::Error| RelinkError::Unwritable {
        path: path.to_path_buf(),
        source,
    };

    let original = fs::metadata(path).map_err(unwritable)?.permissions();
    let mode = original.mode();

    if mode & OWNER_W != 0 {
        check_can_write(path).map_err(unwritable)?;
        return f();
    }

    tracing::debug!("Temporarily making {} writable", path.display());
    fs::set_permissions(path, fs::Permissions::from_mode(mode | OWNER_RW)).map_err(unwritable)?;

    let result = match check_can_write(path) {
        Ok(()) => f(),
        Err(e) => Err(unwritable(e)),
    };

    match fs::set_permissions(path, fs::Permissions::from_mode(mode)) {
        Ok(()) => result,
        Err(e) => match result {
            Ok(_) => Err(unwritable(e)),
            Err(inner) => {
                tracing::error!(
                    "Failed to restore permissions on {}: {}",
                    path.display(),
                    e
                );
                Err(inner)
            }
        },
    }
}

/// Open for writing without truncating, then close.
fn check_can_write(path: &Path) -> std::io::Result<()> {
    fs::OpenOptions::new().write(true).open(path).map(drop)
}

//! Environment-injecting launchers for installed executables.
//!
//! A launcher is a small `sh` script that exports a fixed set of variables and
//! `exec`s the real binary, so arguments, standard streams and the exit status
//! pass straight through while the real binary can live in a private
//! directory.

use crate::error::{RelinkError, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

/// Variable name to value, kept sorted so launchers are reproducible.
pub type EnvMap = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedExecutable {
    pub launcher: PathBuf,
    pub executable: PathBuf,
    pub env: EnvMap,
}

/// Write `destination_dir/<name of executable>` launching `executable` with `env`.
///
/// An existing entry at the launcher path is never overwritten.
pub fn wrap(executable: &Path, destination_dir: &Path, env: &EnvMap) -> Result<WrappedExecutable> {
    for name in env.keys() {
        validate_env_name(name)?;
    }

    let name = executable
        .file_name()
        .ok_or_else(|| RelinkError::io(executable, std::io::ErrorKind::InvalidInput.into()))?;
    let launcher = destination_dir.join(name);

    if launcher.symlink_metadata().is_ok() {
        return Err(RelinkError::WrapTargetExists(launcher));
    }

    fs::create_dir_all(destination_dir).map_err(|e| RelinkError::io(destination_dir, e))?;

    let script = render_launcher(executable, env);
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o755)
        .open(&launcher)
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                RelinkError::WrapTargetExists(launcher.clone())
            } else {
                RelinkError::io(&launcher, e)
            }
        })?;
    file.write_all(&script)
        .map_err(|e| RelinkError::io(&launcher, e))?;
    drop(file);

    // umask may have masked the creation mode
    fs::set_permissions(&launcher, fs::Permissions::from_mode(0o755))
        .map_err(|e| RelinkError::io(&launcher, e))?;

    tracing::debug!("Wrapped {} -> {}", launcher.display(), executable.display());

    Ok(WrappedExecutable {
        launcher,
        executable: executable.to_path_buf(),
        env: env.clone(),
    })
}

/// Move every file in `bin_dir` into `private_dir` and leave a launcher behind.
///
/// If a launcher cannot be written, the binary it was for is moved back so
/// `bin_dir` never loses a command.
pub fn wrap_all(bin_dir: &Path, private_dir: &Path, env: &EnvMap) -> Result<Vec<WrappedExecutable>> {
    for name in env.keys() {
        validate_env_name(name)?;
    }

    let mut entries: Vec<PathBuf> = fs::read_dir(bin_dir)
        .map_err(|e| RelinkError::io(bin_dir, e))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| !p.is_dir())
        .collect();
    entries.sort();

    fs::create_dir_all(private_dir).map_err(|e| RelinkError::io(private_dir, e))?;

    let mut wrapped = Vec::with_capacity(entries.len());
    for source in entries {
        let Some(name) = source.file_name() else {
            continue;
        };
        let moved = private_dir.join(name);
        if moved.symlink_metadata().is_ok() {
            return Err(RelinkError::WrapTargetExists(moved));
        }

        wrapped.push(move_and_wrap(&source, &moved, |exe| wrap(exe, bin_dir, env))?);
    }

    Ok(wrapped)
}

fn move_and_wrap<F>(source: &Path, moved: &Path, write_launcher: F) -> Result<WrappedExecutable>
where
    F: FnOnce(&Path) -> Result<WrappedExecutable>,
{
    fs::rename(source, moved).map_err(|e| RelinkError::io(source, e))?;

    match write_launcher(moved) {
        Ok(wrapped) => Ok(wrapped),
        Err(e) => {
            // Replaces any partially written launcher
            if let Err(undo) = fs::rename(moved, source) {
                tracing::error!(
                    "Failed to move {} back to {}: {}",
                    moved.display(),
                    source.display(),
                    undo
                );
            }
            Err(e)
        }
    }
}

fn validate_env_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {
            chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(RelinkError::InvalidEnvName(name.to_string()))
    }
}

/// Quote for POSIX sh: wrap in single quotes, splice embedded quotes as `'\''`.
///
/// Works on raw bytes, so paths that are not valid UTF-8 survive unchanged.
pub fn shell_quote(value: &[u8]) -> Vec<u8> {
    let mut quoted = Vec::with_capacity(value.len() + 2);
    quoted.push(b'\'');
    for &b in value {
        if b == b'\'' {
            quoted.extend_from_slice(br"'\''");
        } else {
            quoted.push(b);
        }
    }
    quoted.push(b'\'');
    quoted
}

pub fn render_launcher(executable: &Path, env: &EnvMap) -> Vec<u8> {
    let mut script = b"#!/bin/sh\n".to_vec();
    for (name, value) in env {
        script.extend_from_slice(name.as_bytes());
        script.push(b'=');
        script.extend_from_slice(&shell_quote(value.as_bytes()));
        script.extend_from_slice(format!("\nexport {}\n", name).as_bytes());
    }
    script.extend_from_slice(b"exec ");
    script.extend_from_slice(&shell_quote(executable.as_os_str().as_bytes()));
    script.extend_from_slice(b" \"$@\"\n");
    script
}

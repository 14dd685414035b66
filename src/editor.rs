//! Binary metadata editing backends.
//!
//! The relinker only needs two writes (add a runtime search path, set the
//! self-identifier) and two reads for idempotence checks. Backends shell out
//! to the platform tools:
//!
//! - **Mach-O**: `otool` / `install_name_tool`, with optional ad-hoc
//!   re-signing because editing load commands invalidates code signatures
//! - **ELF**: `patchelf`
//!
//! Tool warnings on stderr are not treated as failures. A non-zero exit whose
//! stderr reports `Permission denied` / `Operation not permitted` is
//! [`EditError::PermissionDenied`]; any other non-zero exit is
//! [`EditError::Malformed`]. Failing to spawn the tool at all is
//! [`EditError::Tool`].
//!
//! Search paths are returned as raw paths so entries that are not valid UTF-8
//! still compare byte for byte.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EditError {
    #[error("unsupported or malformed binary: {0}")]
    Malformed(String),

    #[error("search path already present: {0}")]
    AlreadyPresent(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("failed to run {tool}: {source}")]
    Tool {
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },
}

pub trait BinaryEditor: Send + Sync {
    /// Add `dir` to the runtime search paths of `file`.
    ///
    /// Non-strict: an already-present `dir` is a no-op. Strict: it is
    /// [`EditError::AlreadyPresent`].
    fn add_search_path(&self, file: &Path, dir: &Path, strict: bool) -> Result<(), EditError>;

    /// Rewrite the identifier a shared library records for itself.
    fn set_self_identifier(&self, file: &Path, identifier: &Path) -> Result<(), EditError>;

    fn search_paths(&self, file: &Path) -> Result<Vec<PathBuf>, EditError>;

    fn self_identifier(&self, file: &Path) -> Result<Option<String>, EditError>;
}

fn run(tool: &'static str, args: &[&OsStr]) -> Result<Output, EditError> {
    Command::new(tool)
        .args(args)
        .output()
        .map_err(|source| EditError::Tool { tool, source })
}

const DENIED_MARKERS: [&str; 2] = ["Permission denied", "Operation not permitted"];

/// Treat a failed run as malformed input unless stderr only carries warnings
/// or reports an access failure.
fn check(output: &Output) -> Result<(), EditError> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let errors: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.contains("warning:"))
        .collect();
    if errors.is_empty() && stderr.contains("warning:") {
        return Ok(());
    }
    if errors.is_empty() {
        return Err(EditError::Malformed(format!("exited with {}", output.status)));
    }
    let reason = errors.join("; ");
    if DENIED_MARKERS.iter().any(|m| reason.contains(m)) {
        return Err(EditError::PermissionDenied(reason));
    }
    Err(EditError::Malformed(reason))
}

fn dedupe_check(existing: &[PathBuf], dir: &Path, strict: bool) -> Result<bool, EditError> {
    if existing.iter().any(|p| p.as_os_str() == dir.as_os_str()) {
        if strict {
            return Err(EditError::AlreadyPresent(dir.display().to_string()));
        }
        return Ok(true);
    }
    Ok(false)
}

/// Mach-O backend using Apple's command line tools.
#[derive(Debug, Clone, Default)]
pub struct InstallNameTool {
    /// Re-sign ad hoc after each edit (required on Apple Silicon).
    pub resign: bool,
}

impl InstallNameTool {
    pub fn new() -> Self {
        Self {
            resign: cfg!(target_arch = "aarch64"),
        }
    }

    fn resign(&self, file: &Path) {
        if !self.resign {
            return;
        }
        let args = [
            OsStr::new("--force"),
            OsStr::new("--sign"),
            OsStr::new("-"),
            file.as_os_str(),
        ];
        match run("codesign", &args) {
            Ok(output) if !output.status.success() => {
                tracing::warn!(
                    "Failed to re-sign {}: {}",
                    file.display(),
                    String::from_utf8_lossy(&output.stderr).trim()
                );
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Failed to re-sign {}: {}", file.display(), e),
        }
    }
}

impl BinaryEditor for InstallNameTool {
    fn add_search_path(&self, file: &Path, dir: &Path, strict: bool) -> Result<(), EditError> {
        let existing = self.search_paths(file)?;
        if dedupe_check(&existing, dir, strict)? {
            return Ok(());
        }

        let output = run(
            "install_name_tool",
            &[OsStr::new("-add_rpath"), dir.as_os_str(), file.as_os_str()],
        )?;
        check(&output)?;
        self.resign(file);
        Ok(())
    }

    fn set_self_identifier(&self, file: &Path, identifier: &Path) -> Result<(), EditError> {
        let output = run(
            "install_name_tool",
            &[OsStr::new("-id"), identifier.as_os_str(), file.as_os_str()],
        )?;
        check(&output)?;
        self.resign(file);
        Ok(())
    }

    fn search_paths(&self, file: &Path) -> Result<Vec<PathBuf>, EditError> {
        let output = run("otool", &[OsStr::new("-l"), file.as_os_str()])?;
        check(&output)?;
        Ok(parse_otool_rpaths(&output.stdout))
    }

    fn self_identifier(&self, file: &Path) -> Result<Option<String>, EditError> {
        let output = run("otool", &[OsStr::new("-D"), file.as_os_str()])?;
        check(&output)?;
        Ok(parse_otool_id(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Extract LC_RPATH entries from `otool -l` output.
///
/// ```text
/// Load command 12
///           cmd LC_RPATH
///       cmdsize 32
///          path /opt/lib (offset 12)
/// ```
pub fn parse_otool_rpaths(output: &[u8]) -> Vec<PathBuf> {
    const OFFSET: &[u8] = b" (offset";
    let mut paths = Vec::new();
    let mut in_rpath = false;

    for line in output.split(|b| *b == b'\n') {
        let line = line.trim_ascii();
        if let Some(cmd) = line.strip_prefix(b"cmd ".as_slice()) {
            in_rpath = cmd.trim_ascii() == b"LC_RPATH".as_slice();
            continue;
        }
        if !in_rpath {
            continue;
        }
        if let Some(rest) = line.strip_prefix(b"path ".as_slice()) {
            let end = rest
                .windows(OFFSET.len())
                .rposition(|w| w == OFFSET)
                .unwrap_or(rest.len());
            paths.push(path_from_bytes(rest[..end].trim_ascii()));
            in_rpath = false;
        }
    }

    paths
}

fn path_from_bytes(bytes: &[u8]) -> PathBuf {
    PathBuf::from(OsStr::from_bytes(bytes))
}

/// `otool -D` prints the file name followed by the id, if any.
pub fn parse_otool_id(output: &str) -> Option<String> {
    output
        .lines()
        .nth(1)
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
}

/// ELF backend using `patchelf`.
#[derive(Debug, Clone, Default)]
pub struct PatchElf;

impl BinaryEditor for PatchElf {
    fn add_search_path(&self, file: &Path, dir: &Path, strict: bool) -> Result<(), EditError> {
        let existing = self.search_paths(file)?;
        if dedupe_check(&existing, dir, strict)? {
            return Ok(());
        }

        let output = run(
            "patchelf",
            &[OsStr::new("--add-rpath"), dir.as_os_str(), file.as_os_str()],
        )?;
        check(&output)
    }

    fn set_self_identifier(&self, file: &Path, identifier: &Path) -> Result<(), EditError> {
        let output = run(
            "patchelf",
            &[OsStr::new("--set-soname"), identifier.as_os_str(), file.as_os_str()],
        )?;
        check(&output)
    }

    fn search_paths(&self, file: &Path) -> Result<Vec<PathBuf>, EditError> {
        let output = run("patchelf", &[OsStr::new("--print-rpath"), file.as_os_str()])?;
        check(&output)?;
        Ok(split_rpath(&output.stdout))
    }

    fn self_identifier(&self, file: &Path) -> Result<Option<String>, EditError> {
        let output = run("patchelf", &[OsStr::new("--print-soname"), file.as_os_str()])?;
        if !output.status.success() {
            // Executables carry no DT_SONAME
            return Ok(None);
        }
        let soname = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(if soname.is_empty() { None } else { Some(soname) })
    }
}

/// Split a DT_RUNPATH/DT_RPATH value into its entries.
pub fn split_rpath(value: &[u8]) -> Vec<PathBuf> {
    value
        .trim_ascii()
        .split(|b| *b == b':')
        .filter(|s| !s.is_empty())
        .map(path_from_bytes)
        .collect()
}

/// Pick the backend for the host's native binary format.
pub fn platform_editor() -> Box<dyn BinaryEditor> {
    #[cfg(target_os = "macos")]
    {
        Box::new(InstallNameTool::new())
    }

    #[cfg(not(target_os = "macos"))]
    {
        Box::new(PatchElf)
    }
}

impl<E: BinaryEditor + ?Sized> BinaryEditor for &E {
    fn add_search_path(&self, file: &Path, dir: &Path, strict: bool) -> Result<(), EditError> {
        (**self).add_search_path(file, dir, strict)
    }

    fn set_self_identifier(&self, file: &Path, identifier: &Path) -> Result<(), EditError> {
        (**self).set_self_identifier(file, identifier)
    }

    fn search_paths(&self, file: &Path) -> Result<Vec<PathBuf>, EditError> {
        (**self).search_paths(file)
    }

    fn self_identifier(&self, file: &Path) -> Result<Option<String>, EditError> {
        (**self).self_identifier(file)
    }
}

impl<E: BinaryEditor + ?Sized> BinaryEditor for Box<E> {
    fn add_search_path(&self, file: &Path, dir: &Path, strict: bool) -> Result<(), EditError> {
        (**self).add_search_path(file, dir, strict)
    }

    fn set_self_identifier(&self, file: &Path, identifier: &Path) -> Result<(), EditError> {
        (**self).set_self_identifier(file, identifier)
    }

    fn search_paths(&self, file: &Path) -> Result<Vec<PathBuf>, EditError> {
        (**self).search_paths(file)
    }

    fn self_identifier(&self, file: &Path) -> Result<Option<String>, EditError> {
        (**self).self_identifier(file)
    }
}

// Test helpers for isolated testing
// Provides temporary keg layouts and an in-memory binary editor

#![allow(dead_code)]

use instarelink::artifact::detect_format;
use instarelink::{BinaryEditor, BinaryFormat, EditError};
use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

pub const MH_EXECUTE: u32 = 0x2;
pub const MH_DYLIB: u32 = 0x6;

/// Isolated keg layout using temporary directories
/// Automatically cleaned up when dropped (RAII pattern)
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub prefix: PathBuf,
    pub lib: PathBuf,
    pub bin: PathBuf,
    pub libexec_bin: PathBuf,
}

impl TestEnvironment {
    /// Create a new isolated keg
    ///
    /// - temp/
    ///   - lib/      (shared libraries)
    ///   - bin/      (executables)
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let prefix = temp_dir.path().to_path_buf();
        let lib = prefix.join("lib");
        let bin = prefix.join("bin");
        let libexec_bin = prefix.join("libexec").join("bin");

        fs::create_dir_all(&lib).unwrap();
        fs::create_dir_all(&bin).unwrap();

        Self {
            temp_dir,
            prefix,
            lib,
            bin,
            libexec_bin,
        }
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

/// Write a minimal 64-bit little-endian Mach-O header with the given filetype.
pub fn write_macho(path: &Path, filetype: u32) {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&0xfeedfacfu32.to_le_bytes());
    bytes.extend_from_slice(&0x0100000cu32.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes.extend_from_slice(&filetype.to_le_bytes());
    bytes.extend_from_slice(&[0u8; 48]);
    fs::write(path, bytes).unwrap();
}

/// A file cut off inside the magic number.
pub fn write_truncated(path: &Path) {
    fs::write(path, [0xcf, 0xfa]).unwrap();
}

pub fn mode_of(path: &Path) -> u32 {
    fs::metadata(path).unwrap().permissions().mode() & 0o777
}

pub fn set_mode(path: &Path, mode: u32) {
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).unwrap();
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub rpaths: Vec<String>,
    pub id: Option<String>,
}

/// Binary editor that keeps load-command state in memory.
///
/// Every write requires the owner-write bit to be set on the file and
/// rewrites its bytes in place, so permission handling and "never opened"
/// properties can be observed on disk.
#[derive(Default)]
pub struct FakeEditor {
    state: Mutex<HashMap<PathBuf, Metadata>>,
    writes: Mutex<Vec<PathBuf>>,
    /// File names that make the tool itself fail to run.
    broken_tool_for: Vec<String>,
    /// File names the tool reports "Permission denied" for.
    denied_for: Vec<String>,
    /// File names whose identifier cannot be rewritten.
    bad_identifier_for: Vec<String>,
}

impl FakeEditor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_broken_tool(name: &str) -> Self {
        Self {
            broken_tool_for: vec![name.to_string()],
            ..Self::default()
        }
    }

    pub fn with_denied(name: &str) -> Self {
        Self {
            denied_for: vec![name.to_string()],
            ..Self::default()
        }
    }

    pub fn with_bad_identifier(name: &str) -> Self {
        Self {
            bad_identifier_for: vec![name.to_string()],
            ..Self::default()
        }
    }

    pub fn metadata(&self, path: &Path) -> Metadata {
        self.state
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .unwrap_or_default()
    }

    pub fn seed(&self, path: &Path, metadata: Metadata) {
        self.state
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), metadata);
    }

    pub fn writes(&self) -> Vec<PathBuf> {
        self.writes.lock().unwrap().clone()
    }

    fn open_for_write(&self, file: &Path) -> Result<(), EditError> {
        let name = name_of(file);
        if self.denied_for.contains(&name) {
            return Err(EditError::PermissionDenied(format!(
                "{}: Permission denied",
                file.display()
            )));
        }
        if self.broken_tool_for.contains(&name) {
            return Err(EditError::Tool {
                tool: "fake_tool",
                source: std::io::Error::other("tool crashed"),
            });
        }
        if detect_format(file) == BinaryFormat::Unknown {
            return Err(EditError::Malformed(format!(
                "{} is not a Mach-O file",
                file.display()
            )));
        }
        if mode_of(file) & 0o200 == 0 {
            return Err(EditError::Tool {
                tool: "fake_tool",
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            });
        }

        let bytes = fs::read(file).unwrap();
        fs::write(file, bytes).unwrap();
        self.writes.lock().unwrap().push(file.to_path_buf());
        Ok(())
    }
}

impl BinaryEditor for FakeEditor {
    fn add_search_path(&self, file: &Path, dir: &Path, strict: bool) -> Result<(), EditError> {
        let dir = dir.to_string_lossy().into_owned();
        if self.metadata(file).rpaths.contains(&dir) {
            if strict {
                return Err(EditError::AlreadyPresent(dir));
            }
            return Ok(());
        }
        self.open_for_write(file)?;
        self.state
            .lock()
            .unwrap()
            .entry(file.to_path_buf())
            .or_default()
            .rpaths
            .push(dir);
        Ok(())
    }

    fn set_self_identifier(&self, file: &Path, identifier: &Path) -> Result<(), EditError> {
        if self.bad_identifier_for.contains(&name_of(file)) {
            return Err(EditError::Malformed(format!(
                "{} has no LC_ID_DYLIB",
                file.display()
            )));
        }
        self.open_for_write(file)?;
        self.state
            .lock()
            .unwrap()
            .entry(file.to_path_buf())
            .or_default()
            .id = Some(identifier.to_string_lossy().into_owned());
        Ok(())
    }

    fn search_paths(&self, file: &Path) -> Result<Vec<PathBuf>, EditError> {
        Ok(self.metadata(file).rpaths.into_iter().map(PathBuf::from).collect())
    }

    fn self_identifier(&self, file: &Path) -> Result<Option<String>, EditError> {
        Ok(self.metadata(file).id)
    }
}

fn name_of(file: &Path) -> String {
    file.file_name().unwrap().to_string_lossy().into_owned()
}

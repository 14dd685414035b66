//! Binary artifacts and content sniffing.
//!
//! An artifact is either tagged by the caller or classified by reading its
//! header: Mach-O `filetype`, ELF `e_type`, and a file-name fallback for
//! anything else. Symlinks are classified by name only and never opened.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

const MH_MAGIC: u32 = 0xfeedface;
const MH_MAGIC_64: u32 = 0xfeedfacf;
const MH_CIGAM: u32 = 0xcefaedfe;
const MH_CIGAM_64: u32 = 0xcffaedfe;
const FAT_MAGIC: u32 = 0xcafebabe;

const MH_DYLIB: u32 = 0x6;
const MH_DYLIB_STUB: u32 = 0x9;

const ET_EXEC: u16 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Executable,
    SharedLibrary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryFormat {
    MachO,
    MachOUniversal,
    Elf,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryArtifact {
    pub path: PathBuf,
    pub kind: ArtifactKind,
    pub format: BinaryFormat,
    pub is_symlink: bool,
}

impl BinaryArtifact {
    /// Tag a path with an explicit kind. The format is still sniffed.
    pub fn new(path: impl Into<PathBuf>, kind: ArtifactKind) -> Self {
        let path = path.into();
        let is_symlink = is_symlink(&path);
        let format = if is_symlink {
            BinaryFormat::Unknown
        } else {
            sniff(&path).map(|h| h.format).unwrap_or(BinaryFormat::Unknown)
        };
        Self {
            path,
            kind,
            format,
            is_symlink,
        }
    }

    /// Classify a path by content, falling back to its file name.
    pub fn inspect(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if is_symlink(&path) {
            return Self {
                kind: kind_from_name(&path),
                path,
                format: BinaryFormat::Unknown,
                is_symlink: true,
            };
        }

        let (format, kind) = match sniff(&path) {
            Some(header) => (header.format, header.kind.unwrap_or_else(|| kind_from_name(&path))),
            None => (BinaryFormat::Unknown, kind_from_name(&path)),
        };

        Self {
            path,
            kind,
            format,
            is_symlink: false,
        }
    }

    pub fn file_name(&self) -> Option<&std::ffi::OsStr> {
        self.path.file_name()
    }

    pub fn is_shared_library(&self) -> bool {
        self.kind == ArtifactKind::SharedLibrary
    }
}

fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

/// Shared-library naming: `libfoo.dylib`, `libfoo.dylib.12.1`, `libfoo.so`, `libfoo.so.6`.
pub fn kind_from_name(path: &Path) -> ArtifactKind {
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n,
        None => return ArtifactKind::Executable,
    };

    let is_lib = name.split('.').skip(1).any(|part| part == "dylib" || part == "so");
    if is_lib {
        ArtifactKind::SharedLibrary
    } else {
        ArtifactKind::Executable
    }
}

struct Header {
    format: BinaryFormat,
    kind: Option<ArtifactKind>,
}

/// Read only the first bytes of the file; anything unreadable or short is `None`.
fn sniff(path: &Path) -> Option<Header> {
    let mut file = fs::File::open(path).ok()?;
    let mut bytes = [0u8; 18];
    let mut read = 0;
    while read < bytes.len() {
        match file.read(&mut bytes[read..]) {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(_) => return None,
        }
    }
    drop(file);
    classify_header(&bytes[..read])
}

fn classify_header(bytes: &[u8]) -> Option<Header> {
    if bytes.len() < 4 {
        return None;
    }

    if bytes.starts_with(b"\x7fELF") {
        return Some(Header {
            format: BinaryFormat::Elf,
            kind: elf_kind(bytes),
        });
    }

    let le = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let be = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);

    if be == FAT_MAGIC {
        return Some(Header {
            format: BinaryFormat::MachOUniversal,
            kind: None,
        });
    }

    let filetype = |bytes: &[u8], little: bool| -> Option<u32> {
        let raw: [u8; 4] = bytes.get(12..16)?.try_into().ok()?;
        Some(if little {
            u32::from_le_bytes(raw)
        } else {
            u32::from_be_bytes(raw)
        })
    };

    let little = match le {
        MH_MAGIC | MH_MAGIC_64 => true,
        MH_CIGAM | MH_CIGAM_64 => false,
        _ => return None,
    };

    let kind = filetype(bytes, little).map(|ft| match ft {
        MH_DYLIB | MH_DYLIB_STUB => ArtifactKind::SharedLibrary,
        _ => ArtifactKind::Executable,
    });

    Some(Header {
        format: BinaryFormat::MachO,
        kind,
    })
}

/// ET_DYN covers both shared objects and PIE executables, so it stays
/// undecided and the file name breaks the tie.
fn elf_kind(bytes: &[u8]) -> Option<ArtifactKind> {
    let data = *bytes.get(5)?;
    let raw: [u8; 2] = bytes.get(16..18)?.try_into().ok()?;
    let e_type = match data {
        1 => u16::from_le_bytes(raw),
        2 => u16::from_be_bytes(raw),
        _ => return None,
    };
    match e_type {
        ET_EXEC => Some(ArtifactKind::Executable),
        _ => None,
    }
}

/// Sniff only the container format of a file.
pub fn detect_format(path: &Path) -> BinaryFormat {
    sniff(path).map(|h| h.format).unwrap_or(BinaryFormat::Unknown)
}

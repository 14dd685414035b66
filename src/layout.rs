//! Keg layout fixups applied around relinking.

use crate::artifact::BinaryArtifact;
use crate::error::{RelinkError, Result};
use std::fs;
use std::os::unix::fs as unix_fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Major and minor components of a vendor version like `12.1.0.2.0-2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
}

impl Version {
    pub fn parse(version: &str) -> Option<Self> {
        let mut parts = version.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts
            .next()?
            .split(|c: char| !c.is_ascii_digit())
            .next()?
            .parse()
            .ok()?;
        Some(Self { major, minor })
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Extension shared libraries carry on the host platform.
pub fn shared_lib_ext() -> &'static str {
    if cfg!(target_os = "macos") {
        "dylib"
    } else {
        "so"
    }
}

/// `0644` for every regular file in `dir`, `0755` for the named executables.
///
/// Vendor archives ship with inconsistent modes; this only looks at the top
/// level of `dir` and never follows symlinks.
pub fn normalize_permissions(dir: &Path, executables: &[String]) -> Result<()> {
    for entry in fs::read_dir(dir).map_err(|e| RelinkError::io(dir, e))? {
        let entry = entry.map_err(|e| RelinkError::io(dir, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| RelinkError::io(&path, e))?;
        if !file_type.is_file() {
            continue;
        }

        let is_exe = entry
            .file_name()
            .to_str()
            .map(|name| executables.iter().any(|e| e == name))
            .unwrap_or(false);
        let mode = if is_exe { 0o755 } else { 0o644 };
        fs::set_permissions(&path, fs::Permissions::from_mode(mode))
            .map_err(|e| RelinkError::io(&path, e))?;
    }
    Ok(())
}

/// Force-create `stem.ext -> stem.ext.MAJOR.MINOR` for each stem whose
/// versioned file exists. Returns the links created.
pub fn link_unversioned(
    dir: &Path,
    stems: &[String],
    version: Version,
    ext: &str,
) -> Result<Vec<PathBuf>> {
    let mut links = Vec::new();

    for stem in stems {
        let versioned = format!("{}.{}.{}", stem, ext, version);
        if !dir.join(&versioned).exists() {
            tracing::debug!("No {} in {}, not linking", versioned, dir.display());
            continue;
        }

        let link = dir.join(format!("{}.{}", stem, ext));
        if link.symlink_metadata().is_ok() {
            fs::remove_file(&link).map_err(|e| RelinkError::io(&link, e))?;
        }
        unix_fs::symlink(&versioned, &link).map_err(|e| RelinkError::io(&link, e))?;
        links.push(link);
    }

    Ok(links)
}

pub fn ensure_network_admin(prefix: &Path) -> Result<PathBuf> {
    let dir = prefix.join("network").join("admin");
    fs::create_dir_all(&dir).map_err(|e| RelinkError::io(&dir, e))?;
    Ok(dir)
}

/// Lay out the staged SDK: headers go to `include/oci`, and `sdk/include`
/// becomes a link to `../include` so the vendor's demo makefiles still find
/// them.
///
/// Everything under `sdk/` is first normalized to `0755` for directories and
/// `0644` for files. Returns `None` when no `sdk/` directory was staged. A
/// second run finds `sdk/include` already linked and only re-applies modes.
pub fn install_sdk_headers(prefix: &Path) -> Result<Option<PathBuf>> {
    let sdk = prefix.join("sdk");
    if !sdk.is_dir() {
        return Ok(None);
    }

    for entry in WalkDir::new(&sdk).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(&sdk).to_path_buf();
            RelinkError::io(path, e.into())
        })?;
        let file_type = entry.file_type();
        let mode = if file_type.is_dir() {
            0o755
        } else if file_type.is_file() {
            0o644
        } else {
            continue;
        };
        fs::set_permissions(entry.path(), fs::Permissions::from_mode(mode))
            .map_err(|e| RelinkError::io(entry.path(), e))?;
    }

    let headers = prefix.join("include").join("oci");
    fs::create_dir_all(&headers).map_err(|e| RelinkError::io(&headers, e))?;
    fs::set_permissions(&headers, fs::Permissions::from_mode(0o755))
        .map_err(|e| RelinkError::io(&headers, e))?;

    let staged = sdk.join("include");
    let is_real_dir = staged
        .symlink_metadata()
        .map(|m| m.file_type().is_dir())
        .unwrap_or(false);
    if is_real_dir {
        let mut moved = 0;
        for entry in fs::read_dir(&staged).map_err(|e| RelinkError::io(&staged, e))? {
            let entry = entry.map_err(|e| RelinkError::io(&staged, e))?;
            let dest = headers.join(entry.file_name());
            if dest.symlink_metadata().is_ok() {
                return Err(RelinkError::io(
                    dest,
                    std::io::ErrorKind::AlreadyExists.into(),
                ));
            }
            fs::rename(entry.path(), &dest).map_err(|e| RelinkError::io(entry.path(), e))?;
            moved += 1;
        }
        fs::remove_dir(&staged).map_err(|e| RelinkError::io(&staged, e))?;
        tracing::debug!("Moved {} headers into {}", moved, headers.display());
    }

    if staged.symlink_metadata().is_err() {
        unix_fs::symlink("../include", &staged).map_err(|e| RelinkError::io(&staged, e))?;
    }

    Ok(Some(headers))
}

/// Create `sqlplus/admin` and move a staged `glogin.sql` site profile into it.
///
/// The profile is looked for at the keg root and in `bin/`, since vendor
/// archives are flat.
pub fn ensure_sqlplus_admin(prefix: &Path) -> Result<PathBuf> {
    let dir = prefix.join("sqlplus").join("admin");
    fs::create_dir_all(&dir).map_err(|e| RelinkError::io(&dir, e))?;

    let dest = dir.join("glogin.sql");
    for candidate in [prefix.join("glogin.sql"), prefix.join("bin").join("glogin.sql")] {
        if !candidate.is_file() || dest.exists() {
            continue;
        }
        fs::rename(&candidate, &dest).map_err(|e| RelinkError::io(&candidate, e))?;
        fs::set_permissions(&dest, fs::Permissions::from_mode(0o644))
            .map_err(|e| RelinkError::io(&dest, e))?;
    }

    Ok(dir)
}

/// Artifacts to relink: `lib/lib*` and `bin/*`, each sorted by name.
pub fn collect_artifacts(lib_dir: &Path, bin_dir: &Path) -> Result<Vec<BinaryArtifact>> {
    let mut artifacts = list_entries(lib_dir, Some("lib"))?;
    artifacts.extend(list_entries(bin_dir, None)?);
    Ok(artifacts.into_iter().map(BinaryArtifact::inspect).collect())
}

fn list_entries(dir: &Path, prefix: Option<&str>) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut paths = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            RelinkError::io(path, e.into())
        })?;
        if entry.file_type().is_dir() {
            continue;
        }

        let matches = match prefix {
            Some(p) => entry
                .file_name()
                .to_str()
                .map(|n| n.starts_with(p))
                .unwrap_or(false),
            None => true,
        };
        if matches {
            paths.push(entry.into_path());
        }
    }
    Ok(paths)
}

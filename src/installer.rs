//! Post-install sequence for a staged Instant Client keg.
//!
//! Runs after the package manager has copied the vendor files into `prefix`:
//!
//! 1. Normalize modes in `lib/` and `bin/`
//! 2. Move SDK headers into `include/oci` and link `sdk/include`
//! 3. Create `sqlplus/admin` and install the site profile
//! 4. Link `libfoo.ext -> libfoo.ext.MAJOR.MINOR`
//! 5. Relink `lib/lib*` and `bin/*` against `opt_prefix/lib`
//! 6. Create `network/admin`
//! 7. Move `bin/*` into `libexec/bin` and leave environment launchers behind

use crate::config::ClientConfig;
use crate::editor::BinaryEditor;
use crate::error::Result;
use crate::layout::{self, Version};
use crate::relink::{RelinkPolicy, RelinkReport, RelinkTarget, Relinker};
use crate::wrap::{self, WrappedExecutable};
use std::path::PathBuf;

#[derive(Debug)]
pub struct InstallSummary {
    /// `include/oci`, when an SDK was staged.
    pub sdk_headers: Option<PathBuf>,
    pub sqlplus_admin: PathBuf,
    pub links: Vec<PathBuf>,
    pub relink: RelinkReport,
    pub network_admin: PathBuf,
    pub wrapped: Vec<WrappedExecutable>,
}

pub fn post_install<E: BinaryEditor>(
    config: &ClientConfig,
    editor: E,
    policy: RelinkPolicy,
) -> Result<InstallSummary> {
    // A relative target fails before anything is touched
    let target = RelinkTarget::new(config.opt_lib())?;
    let lib_dir = config.lib_dir();
    let bin_dir = config.bin_dir();

    if lib_dir.is_dir() {
        layout::normalize_permissions(&lib_dir, &[])?;
    }
    if bin_dir.is_dir() {
        layout::normalize_permissions(&bin_dir, &config.executables)?;
    }

    let sdk_headers = layout::install_sdk_headers(&config.prefix)?;
    // Before wrapping, so a staged glogin.sql never gets a launcher
    let sqlplus_admin = layout::ensure_sqlplus_admin(&config.prefix)?;

    let links = match Version::parse(&config.version) {
        Some(version) if lib_dir.is_dir() => layout::link_unversioned(
            &lib_dir,
            &config.unversioned_libs,
            version,
            layout::shared_lib_ext(),
        )?,
        Some(_) => Vec::new(),
        None => {
            tracing::warn!(
                "Cannot parse version {:?}, skipping unversioned library links",
                config.version
            );
            Vec::new()
        }
    };

    let artifacts = layout::collect_artifacts(&lib_dir, &bin_dir)?;
    tracing::debug!("Relinking {} artifacts", artifacts.len());
    let relink = Relinker::with_policy(editor, policy).relink(&artifacts, &target)?;

    let network_admin = layout::ensure_network_admin(&config.prefix)?;

    let wrapped = if bin_dir.is_dir() {
        wrap::wrap_all(&bin_dir, &config.libexec_bin_dir(), &config.env_vars())?
    } else {
        Vec::new()
    };

    Ok(InstallSummary {
        sdk_headers,
        sqlplus_admin,
        links,
        relink,
        network_admin,
        wrapped,
    })
}

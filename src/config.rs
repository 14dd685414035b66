//! Install configuration for an Instant Client keg.
//!
//! Loaded from a JSON file, or built from defaults. The keg prefix can be
//! overridden through `INSTARELINK_PREFIX` / `INSTARELINK_OPT_PREFIX`, the
//! same way the package manager resolves its own prefix from the environment.

use crate::error::{RelinkError, Result};
use crate::wrap::EnvMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const PREFIX_ENV: &str = "INSTARELINK_PREFIX";
pub const OPT_PREFIX_ENV: &str = "INSTARELINK_OPT_PREFIX";

const DEFAULT_NLS_LANG: &str = "AMERICAN_AMERICA.UTF8";

/// Which runtime package was staged into the keg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Variant {
    /// Full client with all language resources
    Basic,
    /// English-only client; needs `NLS_LANG` pinned to UTF-8
    #[default]
    BasicLite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Directory the files were installed into.
    pub prefix: PathBuf,
    /// Stable path recorded in install names and the environment.
    #[serde(default)]
    pub opt_prefix: Option<PathBuf>,
    pub version: String,
    #[serde(default)]
    pub variant: Variant,
    #[serde(default = "default_executables")]
    pub executables: Vec<String>,
    #[serde(default = "default_unversioned_libs")]
    pub unversioned_libs: Vec<String>,
    /// Merged over the standard variables.
    #[serde(default)]
    pub extra_env: EnvMap,
}

fn default_executables() -> Vec<String> {
    ["adrci", "genezi", "uidrvci", "sqlplus"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_unversioned_libs() -> Vec<String> {
    ["libclntsh", "libclntshcore", "libocci"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl ClientConfig {
    pub fn new(prefix: impl Into<PathBuf>, version: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            opt_prefix: None,
            version: version.into(),
            variant: Variant::default(),
            executables: default_executables(),
            unversioned_libs: default_unversioned_libs(),
            extra_env: EnvMap::new(),
        }
    }

    /// Read a JSON config, then apply environment overrides.
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| RelinkError::io(path, e))?;
        let mut config: ClientConfig = serde_json::from_str(&content)?;
        config.apply_env();
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        if let Ok(prefix) = std::env::var(PREFIX_ENV) {
            self.prefix = PathBuf::from(prefix);
        }
        if let Ok(opt) = std::env::var(OPT_PREFIX_ENV) {
            self.opt_prefix = Some(PathBuf::from(opt));
        }
    }

    pub fn opt_prefix(&self) -> &Path {
        self.opt_prefix.as_deref().unwrap_or(self.prefix.as_path())
    }

    pub fn lib_dir(&self) -> PathBuf {
        self.prefix.join("lib")
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.prefix.join("bin")
    }

    pub fn libexec_bin_dir(&self) -> PathBuf {
        self.prefix.join("libexec").join("bin")
    }

    pub fn opt_lib(&self) -> PathBuf {
        self.opt_prefix().join("lib")
    }

    pub fn opt_include(&self) -> PathBuf {
        self.opt_prefix().join("include")
    }

    pub fn network_admin(&self) -> PathBuf {
        self.opt_prefix().join("network").join("admin")
    }

    /// Environment every wrapped executable runs with.
    pub fn env_vars(&self) -> EnvMap {
        let mut env = EnvMap::new();
        env.insert(
            "ORACLE_HOME".to_string(),
            self.opt_prefix().display().to_string(),
        );
        env.insert("OCI_LIB".to_string(), self.opt_lib().display().to_string());
        env.insert(
            "TNS_ADMIN".to_string(),
            self.network_admin().display().to_string(),
        );
        if self.variant == Variant::BasicLite {
            env.insert("NLS_LANG".to_string(), DEFAULT_NLS_LANG.to_string());
        }
        env.extend(self.extra_env.clone());
        env
    }

    pub fn caveats(&self) -> String {
        let mut s = String::new();
        s.push_str("To build software with the Instant Client SDK, add to the following\n");
        s.push_str("environment variable to find headers:\n\n");
        s.push_str(&format!(
            "  [CFLAGS|CPPFLAGS]: -I{}\n\n",
            self.opt_include().join("oci").display()
        ));
        s.push_str("Executables are wrapped with environ:\n");
        for (name, value) in self.env_vars() {
            s.push_str(&format!("  {}={}\n", name, value));
        }
        s.push('\n');
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_vars_basic_lite_pins_nls_lang() {
        let config = ClientConfig::new("/opt/oci", "12.1.0.2.0-2");
        let env = config.env_vars();

        assert_eq!(env.get("ORACLE_HOME").unwrap(), "/opt/oci");
        assert_eq!(env.get("OCI_LIB").unwrap(), "/opt/oci/lib");
        assert_eq!(env.get("TNS_ADMIN").unwrap(), "/opt/oci/network/admin");
        assert_eq!(env.get("NLS_LANG").unwrap(), "AMERICAN_AMERICA.UTF8");
    }

    #[test]
    fn test_env_vars_basic_has_no_nls_lang() {
        let mut config = ClientConfig::new("/Cellar/oci/12.1", "12.1.0.2.0-2");
        config.variant = Variant::Basic;
        config.opt_prefix = Some(PathBuf::from("/opt/oci"));

        let env = config.env_vars();
        assert_eq!(env.len(), 3);
        assert!(!env.contains_key("NLS_LANG"));
        assert_eq!(env.get("ORACLE_HOME").unwrap(), "/opt/oci");
    }

    #[test]
    fn test_extra_env_overrides() {
        let mut config = ClientConfig::new("/opt/oci", "12.1.0.2.0-2");
        config
            .extra_env
            .insert("NLS_LANG".into(), "GERMAN_GERMANY.UTF8".into());
        assert_eq!(
            config.env_vars().get("NLS_LANG").unwrap(),
            "GERMAN_GERMANY.UTF8"
        );
    }

    #[test]
    fn test_parse_json_with_defaults() {
        let json = r#"{ "prefix": "/opt/oci", "version": "12.1.0.2.0-2", "variant": "basic" }"#;
        let config: ClientConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.variant, Variant::Basic);
        assert_eq!(config.executables, default_executables());
        assert_eq!(config.unversioned_libs.len(), 3);
        assert_eq!(config.opt_prefix(), Path::new("/opt/oci"));
    }

    #[test]
    fn test_caveats_lists_environment() {
        let config = ClientConfig::new("/opt/oci", "12.1.0.2.0-2");
        let caveats = config.caveats();

        assert!(caveats.contains("-I/opt/oci/include/oci"));
        assert!(caveats.contains("  ORACLE_HOME=/opt/oci\n"));
        assert!(caveats.contains("  NLS_LANG=AMERICAN_AMERICA.UTF8\n"));
    }
}

//! Configuration management for the platform plugins.
//!
//! Everything that names a host resource (sysfs trees, device nodes, the ONIE
//! machine file, BMC endpoints) lives here so that it can be relocated. The
//! `root` prefix lets the whole plugin set run against a copy of `/sys` and
//! `/dev`, which is how the tests exercise it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::tracing::prelude::*;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/sonic/platform-plugins.json";

/// Platform plugin configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Prefix applied to every absolute host path
    pub root: PathBuf,

    /// ONIE machine description
    pub machine_conf: PathBuf,

    /// Platform name, overriding the one found in `machine_conf`
    pub platform: Option<String>,

    /// BMC REST base URL used for version and FRU queries
    pub bmc_url: String,

    /// BMC REST base URL used for fan FRU and sensor queries
    pub fan_bmc_url: String,

    /// Timeout applied to every BMC request
    pub http_timeout_secs: u64,

    /// Watchdog character device
    pub watchdog_device: PathBuf,

    /// Watchdog class directory holding `state`, `timeleft`, ...
    pub watchdog_sysfs: PathBuf,

    /// CPLD register access attribute
    pub getreg_path: PathBuf,

    /// Command line printing the BIOS version
    pub bios_version_command: Vec<String>,

    /// CPLD register holding the CPLD version, e.g. "0xA100"
    pub cpld_version_register: Option<String>,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/"),
            machine_conf: PathBuf::from("/host/machine.conf"),
            platform: None,
            bmc_url: "http://240.1.1.1:8080".to_string(),
            fan_bmc_url: "http://[fe80::1:1%eth0.4088]:8080".to_string(),
            http_timeout_secs: 5,
            watchdog_device: PathBuf::from("/dev/watchdog1"),
            watchdog_sysfs: PathBuf::from("/sys/class/watchdog/watchdog1"),
            getreg_path: PathBuf::from("/sys/devices/platform/baseboard/getreg"),
            bios_version_command: vec![
                "dmidecode".to_string(),
                "-s".to_string(),
                "bios-version".to_string(),
            ],
            cpld_version_register: None,
        }
    }
}

impl PlatformConfig {
    /// Configuration rooted somewhere other than `/`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Load configuration from the default location, then apply
    /// environment overrides.
    ///
    /// A missing file is not an error; the defaults describe a stock
    /// SONiC image.
    pub fn load() -> Result<Self> {
        let path = Path::new(DEFAULT_CONFIG_PATH);
        let mut config = if path.exists() {
            Self::load_from(path)?
        } else {
            debug!(path = %path.display(), "No config file, using defaults");
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    /// Load configuration from a specific JSON file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SONIC_PLATFORM_*` environment overrides on top of whatever
    /// was loaded.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(root) = lookup("SONIC_PLATFORM_ROOT") {
            self.root = PathBuf::from(root);
        }
        if let Some(name) = lookup("SONIC_PLATFORM_NAME") {
            self.platform = Some(name);
        }
        if let Some(url) = lookup("SONIC_PLATFORM_BMC_URL") {
            self.bmc_url = url;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.bios_version_command.is_empty() {
            return Err(Error::Config("bios_version_command is empty".into()));
        }
        if self.http_timeout_secs == 0 {
            return Err(Error::Config("http_timeout_secs must be positive".into()));
        }
        Ok(())
    }

    /// Map an absolute host path under `root`.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        let relative = path.strip_prefix("/").unwrap_or(path);
        self.root.join(relative)
    }

    pub fn http_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.http_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_under_default_root() {
        let config = PlatformConfig::default();
        assert_eq!(
            config.resolve("/sys/class/gpio"),
            PathBuf::from("/sys/class/gpio")
        );
    }

    #[test]
    fn test_resolve_under_custom_root() {
        let config = PlatformConfig::with_root("/tmp/fake");
        assert_eq!(
            config.resolve("/dev/watchdog1"),
            PathBuf::from("/tmp/fake/dev/watchdog1")
        );
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: PlatformConfig =
            serde_json::from_str(r#"{"platform": "x86_64-cel_e1031-r0"}"#).unwrap();
        assert_eq!(config.platform.as_deref(), Some("x86_64-cel_e1031-r0"));
        assert_eq!(config.bmc_url, "http://240.1.1.1:8080");
        assert_eq!(config.watchdog_device, PathBuf::from("/dev/watchdog1"));
    }

    #[test]
    fn test_overrides_replace_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("platform.json");
        std::fs::write(
            &path,
            r#"{"platform": "x86_64-cel_e1031-r0", "bmc_url": "http://10.0.0.1"}"#,
        )
        .unwrap();

        let mut config = PlatformConfig::load_from(&path).unwrap();
        config.apply_overrides(|key| match key {
            "SONIC_PLATFORM_ROOT" => Some("/tmp/fake".to_string()),
            "SONIC_PLATFORM_NAME" => Some("x86_64-cel_seastone-r0".to_string()),
            _ => None,
        });
        assert_eq!(config.root, PathBuf::from("/tmp/fake"));
        assert_eq!(config.platform.as_deref(), Some("x86_64-cel_seastone-r0"));
        // Unset variables leave the file's value alone.
        assert_eq!(config.bmc_url, "http://10.0.0.1");
    }

    #[test]
    fn test_load_from_rejects_empty_bios_command() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("platform.json");
        std::fs::write(&path, r#"{"bios_version_command": []}"#).unwrap();

        let err = PlatformConfig::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("bios_version_command"));
    }
}

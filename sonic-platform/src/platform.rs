//! Platform identification.
//!
//! ONIE leaves a `machine.conf` behind on every SONiC install. Its
//! `onie_platform` key names the hardware the plugins branch on.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::config::PlatformConfig;
use crate::error::{Error, Result};
use crate::tracing::prelude::*;

/// Parsed `machine.conf`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MachineInfo {
    entries: HashMap<String, String>,
}

impl MachineInfo {
    /// Parse `key=value` lines. Blank lines and `#` comments are skipped and
    /// surrounding quotes are removed from values.
    pub fn parse(text: &str) -> Self {
        let entries = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once('='))
            .map(|(key, value)| {
                let value = value.trim().trim_matches('"').trim_matches('\'');
                (key.trim().to_string(), value.to_string())
            })
            .collect();
        Self { entries }
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        Ok(Self::parse(&text))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Platform string, from `onie_platform` or, on Arista, `aboot_platform`.
    pub fn platform_name(&self) -> Option<&str> {
        self.get("onie_platform").or_else(|| self.get("aboot_platform"))
    }
}

/// Switch platforms handled by this crate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Platform {
    /// Celestica DX010
    Seastone,
    /// Celestica Haliburton
    E1031,
    Questone2bd,
    As1332h,
    As23128h,
    Unknown(String),
}

impl Platform {
    const SEASTONE: &'static str = "x86_64-cel_seastone-r0";
    const HALIBURTON: &'static str = "x86_64-cel_e1031-r0";
    const QUESTONE2BD: &'static str = "x86_64-cel_questone2bd-r0";
    const AS13_32H: &'static str = "x86_64-alibaba_as13-32h-cl-r0";
    const AS23_128H: &'static str = "x86_64-alibaba_as23-128h-cl-r0";

    pub fn as_str(&self) -> &str {
        match self {
            Platform::Seastone => Self::SEASTONE,
            Platform::E1031 => Self::HALIBURTON,
            Platform::Questone2bd => Self::QUESTONE2BD,
            Platform::As1332h => Self::AS13_32H,
            Platform::As23128h => Self::AS23_128H,
            Platform::Unknown(name) => name,
        }
    }

    /// Work out which platform we are running on.
    ///
    /// An explicit name in the configuration wins over `machine.conf`.
    pub async fn detect(config: &PlatformConfig) -> Result<Self> {
        if let Some(name) = &config.platform {
            return Ok(name.parse()?);
        }

        let path = config.resolve(&config.machine_conf);
        let info = MachineInfo::load(&path).await.map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let name = info.platform_name().ok_or_else(|| {
            Error::Config(format!("no platform key in {}", path.display()))
        })?;

        let platform: Platform = name.parse()?;
        if let Platform::Unknown(name) = &platform {
            warn!(platform = %name, "Unrecognised platform");
        }
        Ok(platform)
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::Parse("empty platform name".into()));
        }
        Ok(match s {
            Self::SEASTONE => Platform::Seastone,
            Self::HALIBURTON => Platform::E1031,
            Self::QUESTONE2BD => Platform::Questone2bd,
            Self::AS13_32H => Platform::As1332h,
            Self::AS23_128H => Platform::As23128h,
            other => Platform::Unknown(other.to_string()),
        })
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

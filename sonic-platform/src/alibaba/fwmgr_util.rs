//! Firmware version reporting.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;

use crate::api::FwMgrUtil;
use crate::bmc::BmcClient;
use crate::config::PlatformConfig;
use crate::error::{Error, Result};
use crate::hw_trait::sysfs;
use crate::platform::MachineInfo;
use crate::tracing::prelude::*;

/// Reported when a version string cannot be read
pub const UNKNOWN_VERSION: &str = "None";
/// Reported for components with no readable version
pub const ZERO_VERSION: &str = "0.0.0";

const BMC_VERSION_KEY: &str = "OpenBMC Version";

pub struct AlibabaFwMgrUtil {
    bmc: BmcClient,
    machine_conf: PathBuf,
    getreg: PathBuf,
    bios_command: Vec<String>,
    cpld_register: Option<String>,
}

impl AlibabaFwMgrUtil {
    pub fn new(config: &PlatformConfig) -> Result<Self> {
        Ok(Self {
            bmc: BmcClient::new(config.bmc_url.clone(), config.http_timeout())?,
            machine_conf: config.resolve(&config.machine_conf),
            getreg: config.resolve(&config.getreg_path),
            bios_command: config.bios_version_command.clone(),
            cpld_register: config.cpld_version_register.clone(),
        })
    }

    pub async fn read_bmc_version(&self) -> Result<String> {
        let info = self.bmc.bmc_info().await?;
        info.get(BMC_VERSION_KEY)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::Parse(format!("BMC info has no {:?}", BMC_VERSION_KEY)))
    }

    /// Last non-empty line printed by the BIOS version command.
    pub async fn read_bios_version(&self) -> Result<String> {
        let (program, args) = self
            .bios_command
            .split_first()
            .ok_or_else(|| Error::Config("bios_version_command is empty".into()))?;
        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| Error::Command(format!("{}: {}", program, e)))?;
        if !output.status.success() {
            return Err(Error::Command(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .map(str::to_string)
            .ok_or_else(|| Error::Parse(format!("{} printed nothing", program)))
    }

    pub async fn read_onie_version(&self) -> Result<String> {
        let info = MachineInfo::load(&self.machine_conf).await?;
        info.get("onie_version")
            .map(str::to_string)
            .ok_or_else(|| Error::Parse(format!("no onie_version in {}", self.machine_conf.display())))
    }

    /// CPLD version as `major.minor`, from the nibbles of the version
    /// register's low byte.
    pub async fn read_cpld_version(&self) -> Result<String> {
        let register = self
            .cpld_register
            .as_deref()
            .ok_or_else(|| Error::Unsupported("no CPLD version register configured".into()))?;
        let value = sysfs::read_register(&self.getreg, register).await?;
        Ok(format!("{}.{}", (value >> 4) & 0xF, value & 0xF))
    }
}

fn or_sentinel(what: &str, sentinel: &str, value: Result<String>) -> String {
    value.unwrap_or_else(|e| {
        warn!(error = %e, "Cannot read {} version", what);
        sentinel.to_string()
    })
}

#[async_trait]
impl FwMgrUtil for AlibabaFwMgrUtil {
    async fn get_bmc_version(&self) -> String {
        or_sentinel("BMC", UNKNOWN_VERSION, self.read_bmc_version().await)
    }

    async fn get_cpld_version(&self) -> String {
        or_sentinel("CPLD", ZERO_VERSION, self.read_cpld_version().await)
    }

    async fn get_bios_version(&self) -> String {
        or_sentinel("BIOS", UNKNOWN_VERSION, self.read_bios_version().await)
    }

    async fn get_onie_version(&self) -> String {
        or_sentinel("ONIE", UNKNOWN_VERSION, self.read_onie_version().await)
    }

    async fn get_pcie_version(&self) -> String {
        ZERO_VERSION.to_string()
    }

    async fn get_fpga_version(&self) -> String {
        ZERO_VERSION.to_string()
    }
}

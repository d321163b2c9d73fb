//! Power supplies on DX010 (Seastone) and E1031 (Haliburton).
//!
//! Both boards only report presence and power-ok for their PSUs. DX010
//! exposes them on GPIO; E1031 on SMC attributes named by slot side.

use async_trait::async_trait;
use std::path::PathBuf;

use super::fan::PsuFan;
use super::SMC_DIR;
use crate::api::{DeviceBase, FanBase, PsuBase};
use crate::config::PlatformConfig;
use crate::error::{Error, Result};
use crate::hw_trait::{sysfs, GpioBank};
use crate::platform::Platform;
use crate::tracing::prelude::*;

/// Number of PSU slots on every supported Celestica board.
pub const NUM_PSU: usize = 2;

#[derive(Debug, Clone, Copy)]
struct Dx010PsuPins {
    /// Low while a PSU is inserted
    abs: u32,
    /// High while output power is good
    power: u32,
}

const DX010_PSU_PINS: [Dx010PsuPins; NUM_PSU] = [
    Dx010PsuPins { abs: 27, power: 22 },
    Dx010PsuPins { abs: 28, power: 25 },
];

/// hwmon numbers of the DX010 PSU controllers start after the board's.
const DX010_PSU_HWMON_OFFSET: usize = 8;

/// E1031 SMC names the PSU slots by side: PSU1 right, PSU2 left.
const E1031_PSU_LOCATION: [char; NUM_PSU] = ['R', 'L'];

/// A PSU slot, numbered from 1.
pub struct Psu {
    index: usize,
    platform: Platform,
    gpio: GpioBank,
    smc_dir: PathBuf,
    fan: Option<PsuFan>,
}

impl Psu {
    pub fn new(config: &PlatformConfig, platform: Platform, gpio: GpioBank, index: usize) -> Result<Self> {
        if !(1..=NUM_PSU).contains(&index) {
            return Err(Error::InvalidParameter(format!(
                "PSU index {} out of range (1-{})",
                index, NUM_PSU
            )));
        }
        let fan = (platform == Platform::Seastone)
            .then(|| PsuFan::new(config, index, index + DX010_PSU_HWMON_OFFSET));
        Ok(Self {
            index,
            platform,
            gpio,
            smc_dir: config.resolve(SMC_DIR),
            fan,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    fn e1031_attr(&self, kind: &str) -> PathBuf {
        let location = E1031_PSU_LOCATION[self.index - 1];
        self.smc_dir.join(format!("psu{}_{}", location, kind))
    }

    pub async fn read_presence(&self) -> Result<bool> {
        let raw = match self.platform {
            Platform::Seastone => {
                let pin = DX010_PSU_PINS[self.index - 1].abs;
                self.gpio.read(pin).await? as i64
            }
            Platform::E1031 => sysfs::read_int(&self.e1031_attr("prs")).await?,
            _ => return Err(Error::Unsupported(format!("PSU presence on {}", self.platform))),
        };
        Ok(raw == 0)
    }

    pub async fn read_power_ok(&self) -> Result<bool> {
        let raw = match self.platform {
            Platform::Seastone => {
                let pin = DX010_PSU_PINS[self.index - 1].power;
                self.gpio.read(pin).await? as i64
            }
            Platform::E1031 => sysfs::read_int(&self.e1031_attr("status")).await?,
            _ => return Err(Error::Unsupported(format!("PSU status on {}", self.platform))),
        };
        Ok(raw == 1)
    }
}

#[async_trait]
impl DeviceBase for Psu {
    fn get_name(&self) -> String {
        format!("PSU-{}", self.index)
    }

    async fn get_presence(&self) -> bool {
        self.read_presence().await.unwrap_or_else(|e| {
            warn!(index = self.index, error = %e, "Cannot read PSU presence");
            false
        })
    }

    async fn get_status(&self) -> bool {
        self.read_power_ok().await.unwrap_or_else(|e| {
            warn!(index = self.index, error = %e, "Cannot read PSU status");
            false
        })
    }
}

#[async_trait]
impl PsuBase for Psu {
    fn get_num_fans(&self) -> usize {
        usize::from(self.fan.is_some())
    }

    fn get_fan(&self, index: usize) -> Option<&dyn FanBase> {
        match (index, &self.fan) {
            (0, Some(fan)) => Some(fan),
            _ => None,
        }
    }
}

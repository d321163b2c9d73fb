//! EMC2305 five-channel fan controller.
//!
//! The `emc2305` hwmon driver exposes each channel as `fan{N}_input`
//! (measured RPM), `fan{N}_target` (RPM target in closed-loop mode) and
//! `pwm{N}` (0-255 duty in direct mode). Fan modules are wired to channels
//! out of order, so each chip carries a map from the platform's fan index to
//! its channel number.
//!
//! Datasheet: <https://www.microchip.com/en-us/product/emc2305>

use std::path::PathBuf;

use crate::config::PlatformConfig;
use crate::error::{Error, Result};
use crate::hw_trait::sysfs;
use crate::tracing::prelude::*;

/// Driver directory holding one entry per bound chip (`<bus>-<addr>`).
pub const DRIVER_DIR: &str = "/sys/bus/i2c/drivers/emc2305";

/// Full-scale tachometer reading.
pub const MAX_RPM: u32 = 16000;

/// One EMC2305 instance and how fan indexes map onto its channels.
#[derive(Debug, Clone, Copy)]
pub struct Emc2305Chip {
    pub device: &'static str,
    pub index_map: &'static [u8],
}

/// DX010: two chips on i2c-13 drive the two rotors of each fan module.
pub const DX010_CHIPS: [Emc2305Chip; 2] = [
    Emc2305Chip {
        device: "13-002e",
        index_map: &[2, 1, 4, 5, 3],
    },
    Emc2305Chip {
        device: "13-004d",
        index_map: &[2, 4, 5, 3, 1],
    },
];

/// E1031: a single chip on i2c-23.
pub const E1031_CHIPS: [Emc2305Chip; 1] = [Emc2305Chip {
    device: "23-004d",
    index_map: &[1, 2, 4],
}];

/// Convert a tachometer reading to percent of full scale. Fans spinning
/// past full scale read above 100.
pub fn rpm_to_percent(rpm: u32) -> u32 {
    rpm.saturating_mul(100) / MAX_RPM
}

/// Convert a speed percentage to a PWM duty value, rounding to nearest.
pub fn percent_to_pwm(percent: u8) -> u8 {
    let percent = u32::from(percent.min(100));
    ((percent * 255 + 50) / 100) as u8
}

/// Sysfs view of one EMC2305 chip.
#[derive(Debug, Clone)]
pub struct Emc2305 {
    dir: PathBuf,
    chip: Emc2305Chip,
}

impl Emc2305 {
    pub fn new(config: &PlatformConfig, chip: Emc2305Chip) -> Self {
        Self {
            dir: config.resolve(DRIVER_DIR).join(chip.device),
            chip,
        }
    }

    pub fn device(&self) -> &'static str {
        self.chip.device
    }

    /// Channel number wired to fan `index` (0-based).
    pub fn channel(&self, index: usize) -> Result<u8> {
        self.chip.index_map.get(index).copied().ok_or_else(|| {
            Error::InvalidParameter(format!(
                "fan index {} not wired on EMC2305 {}",
                index, self.chip.device
            ))
        })
    }

    fn attr(&self, template: &str, index: usize) -> Result<PathBuf> {
        let channel = self.channel(index)?;
        Ok(self.dir.join(template.replace("{}", &channel.to_string())))
    }

    async fn read_u32(&self, template: &str, index: usize) -> Result<u32> {
        let path = self.attr(template, index)?;
        let value = sysfs::read_int(&path).await?;
        u32::try_from(value)
            .map_err(|_| Error::Parse(format!("{}: negative reading {}", path.display(), value)))
    }

    /// Measured speed of fan `index` in RPM.
    pub async fn rpm(&self, index: usize) -> Result<u32> {
        self.read_u32("fan{}_input", index).await
    }

    /// Target speed of fan `index` in RPM; 0 while the chip is in PWM mode.
    pub async fn target_rpm(&self, index: usize) -> Result<u32> {
        self.read_u32("fan{}_target", index).await
    }

    /// Current PWM duty of fan `index`.
    pub async fn pwm(&self, index: usize) -> Result<u8> {
        let value = self.read_u32("pwm{}", index).await?;
        u8::try_from(value).map_err(|_| Error::Parse(format!("pwm value {} out of range", value)))
    }

    /// Drive fan `index` with a PWM duty (0-255).
    pub async fn set_pwm(&self, index: usize, pwm: u8) -> Result<()> {
        let path = self.attr("pwm{}", index)?;
        debug!(device = self.chip.device, index, pwm, "Setting fan PWM");
        sysfs::write_value(&path, pwm).await
    }
}

//! Chassis fans on DX010 (Seastone) and E1031 (Haliburton).
//!
//! Tach and PWM live on EMC2305 controllers on both boards. Presence,
//! direction and the status LED are GPIO pins on DX010 and SMC attributes
//! on E1031.

use async_trait::async_trait;
use std::path::PathBuf;

use super::SMC_DIR;
use crate::api::{DeviceBase, FanBase, FanDirection, StatusLedColor};
use crate::config::PlatformConfig;
use crate::error::{Error, Result};
use crate::hw_trait::{sysfs, GpioBank};
use crate::peripheral::emc2305::{
    percent_to_pwm, rpm_to_percent, Emc2305, Emc2305Chip, DX010_CHIPS, E1031_CHIPS,
};
use crate::platform::Platform;
use crate::tracing::prelude::*;

/// GPIO lines of one DX010 fan module. LEDs are active low.
#[derive(Debug, Clone, Copy)]
struct Dx010FanPins {
    prs: u32,
    dir: u32,
    red: u32,
    green: u32,
}

const DX010_FAN_PINS: [Dx010FanPins; 5] = [
    Dx010FanPins { prs: 10, dir: 15, red: 31, green: 32 },
    Dx010FanPins { prs: 11, dir: 16, red: 29, green: 30 },
    Dx010FanPins { prs: 12, dir: 17, red: 35, green: 36 },
    Dx010FanPins { prs: 13, dir: 18, red: 37, green: 38 },
    Dx010FanPins { prs: 14, dir: 19, red: 33, green: 34 },
];

/// Number of fan modules on `platform`.
pub fn fan_count(platform: &Platform) -> usize {
    match platform {
        Platform::Seastone => DX010_FAN_PINS.len(),
        Platform::E1031 => E1031_CHIPS[0].index_map.len(),
        _ => 0,
    }
}

fn emc2305_chips(platform: &Platform) -> Result<&'static [Emc2305Chip]> {
    match platform {
        Platform::Seastone => Ok(&DX010_CHIPS),
        Platform::E1031 => Ok(&E1031_CHIPS),
        other => Err(Error::Unsupported(format!("no EMC2305 fans on {}", other))),
    }
}

/// A chassis fan module, indexed from 0.
pub struct Fan {
    index: usize,
    platform: Platform,
    gpio: GpioBank,
    chips: Vec<Emc2305>,
    smc_dir: PathBuf,
}

impl Fan {
    pub fn new(config: &PlatformConfig, platform: Platform, gpio: GpioBank, index: usize) -> Self {
        let chips = emc2305_chips(&platform)
            .map(|chips| chips.iter().map(|c| Emc2305::new(config, *c)).collect())
            .unwrap_or_default();
        Self {
            index,
            platform,
            gpio,
            chips,
            smc_dir: config.resolve(SMC_DIR),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    fn dx010_pins(&self) -> Result<Dx010FanPins> {
        DX010_FAN_PINS
            .get(self.index)
            .copied()
            .ok_or_else(|| Error::InvalidParameter(format!("DX010 has no fan {}", self.index)))
    }

    fn smc_attr(&self, kind: &str) -> PathBuf {
        self.smc_dir.join(format!("fan{}_{}", self.index + 1, kind))
    }

    fn check_chips(&self) -> Result<()> {
        if self.chips.is_empty() {
            return Err(Error::Unsupported(format!("no EMC2305 fans on {}", self.platform)));
        }
        Ok(())
    }

    /// Measured RPM. Every chip driving this module must answer; the first
    /// chip's reading is reported.
    pub async fn read_rpm(&self) -> Result<u32> {
        self.check_chips()?;
        let mut readings = Vec::with_capacity(self.chips.len());
        for chip in &self.chips {
            readings.push(chip.rpm(self.index).await?);
        }
        trace!(index = self.index, ?readings, "Fan tach");
        Ok(readings[0])
    }

    pub async fn read_target_rpm(&self) -> Result<u32> {
        self.check_chips()?;
        let mut readings = Vec::with_capacity(self.chips.len());
        for chip in &self.chips {
            readings.push(chip.target_rpm(self.index).await?);
        }
        Ok(readings[0])
    }

    pub async fn write_speed(&self, percent: u8) -> Result<()> {
        if percent > 100 {
            return Err(Error::InvalidParameter(format!("fan speed {}%", percent)));
        }
        self.check_chips()?;
        let pwm = percent_to_pwm(percent);
        for chip in &self.chips {
            chip.set_pwm(self.index, pwm).await?;
        }
        Ok(())
    }

    pub async fn read_direction(&self) -> Result<FanDirection> {
        let raw = match self.platform {
            Platform::Seastone => self.gpio.read(self.dx010_pins()?.dir).await? as i64,
            Platform::E1031 => sysfs::read_int(&self.smc_attr("dir")).await?,
            _ => return Err(Error::Unsupported(format!("fan direction on {}", self.platform))),
        };
        Ok(if raw == 0 { FanDirection::Intake } else { FanDirection::Exhaust })
    }

    pub async fn read_presence(&self) -> Result<bool> {
        let raw = match self.platform {
            Platform::Seastone => self.gpio.read(self.dx010_pins()?.prs).await? as i64,
            Platform::E1031 => sysfs::read_int(&self.smc_attr("prs")).await?,
            _ => return Err(Error::Unsupported(format!("fan presence on {}", self.platform))),
        };
        Ok(raw == 0)
    }

    pub async fn write_status_led(&self, color: StatusLedColor) -> Result<()> {
        match self.platform {
            Platform::Seastone => {
                let pins = self.dx010_pins()?;
                let (red, green) = match color {
                    StatusLedColor::Green => (1, 0),
                    StatusLedColor::Red => (0, 1),
                    StatusLedColor::Off => (1, 1),
                    StatusLedColor::Amber => {
                        return Err(Error::Unsupported("DX010 fan LED has no amber".into()))
                    }
                };
                self.gpio.write(pins.red, red).await?;
                self.gpio.write(pins.green, green).await
            }
            Platform::E1031 => {
                // The SMC LED is bi-colour green/amber.
                let value = match color {
                    StatusLedColor::Green => "green",
                    StatusLedColor::Red | StatusLedColor::Amber => "amber",
                    StatusLedColor::Off => "off",
                };
                sysfs::write_value(&self.smc_attr("led"), value).await
            }
            _ => Err(Error::Unsupported(format!("fan LED on {}", self.platform))),
        }
    }
}

#[async_trait]
impl DeviceBase for Fan {
    fn get_name(&self) -> String {
        format!("FAN-{}", self.index + 1)
    }

    async fn get_presence(&self) -> bool {
        self.read_presence().await.unwrap_or_else(|e| {
            warn!(index = self.index, error = %e, "Cannot read fan presence");
            false
        })
    }

    async fn get_status(&self) -> bool {
        self.get_presence().await && self.get_speed_rpm().await > 0
    }
}

#[async_trait]
impl FanBase for Fan {
    async fn get_direction(&self) -> FanDirection {
        self.read_direction().await.unwrap_or_else(|e| {
            warn!(index = self.index, error = %e, "Cannot read fan direction");
            FanDirection::NotApplicable
        })
    }

    async fn get_speed(&self) -> u32 {
        rpm_to_percent(self.get_speed_rpm().await)
    }

    async fn get_target_speed(&self) -> u32 {
        match self.read_target_rpm().await {
            Ok(rpm) => rpm_to_percent(rpm),
            Err(e) => {
                warn!(index = self.index, error = %e, "Cannot read fan target");
                0
            }
        }
    }

    async fn get_speed_rpm(&self) -> u32 {
        self.read_rpm().await.unwrap_or_else(|e| {
            warn!(index = self.index, error = %e, "Cannot read fan speed");
            0
        })
    }

    async fn set_speed(&self, percent: u8) -> bool {
        match self.write_speed(percent).await {
            Ok(()) => true,
            Err(e) => {
                warn!(index = self.index, percent, error = %e, "Cannot set fan speed");
                false
            }
        }
    }

    async fn set_status_led(&self, color: StatusLedColor) -> bool {
        match self.write_status_led(color).await {
            Ok(()) => true,
            Err(e) => {
                warn!(index = self.index, %color, error = %e, "Cannot set fan LED");
                false
            }
        }
    }
}

/// The fan built into a PSU, read through the PSU's hwmon device.
pub struct PsuFan {
    psu_index: usize,
    input: PathBuf,
}

impl PsuFan {
    /// `hwmon` is the number of the hwmon device the PSU registers.
    pub fn new(config: &PlatformConfig, psu_index: usize, hwmon: usize) -> Self {
        Self {
            psu_index,
            input: config.resolve(format!("/sys/class/hwmon/hwmon{}/fan1_input", hwmon)),
        }
    }

    pub async fn read_rpm(&self) -> Result<u32> {
        let rpm = sysfs::read_int(&self.input).await?;
        u32::try_from(rpm).map_err(|_| Error::Parse(format!("negative fan speed {}", rpm)))
    }
}

#[async_trait]
impl DeviceBase for PsuFan {
    fn get_name(&self) -> String {
        format!("PSU-{} FAN-1", self.psu_index)
    }

    async fn get_presence(&self) -> bool {
        self.read_rpm().await.is_ok()
    }

    async fn get_status(&self) -> bool {
        self.get_speed_rpm().await > 0
    }
}

#[async_trait]
impl FanBase for PsuFan {
    async fn get_direction(&self) -> FanDirection {
        FanDirection::NotApplicable
    }

    /// PSU fans report at most 100%.
    async fn get_speed(&self) -> u32 {
        rpm_to_percent(self.get_speed_rpm().await).min(100)
    }

    async fn get_target_speed(&self) -> u32 {
        0
    }

    async fn get_speed_rpm(&self) -> u32 {
        self.read_rpm().await.unwrap_or_else(|e| {
            warn!(psu = self.psu_index, error = %e, "Cannot read PSU fan speed");
            0
        })
    }

    /// PSU fans follow the PSU's own controller.
    async fn set_speed(&self, _percent: u8) -> bool {
        false
    }

    async fn set_status_led(&self, _color: StatusLedColor) -> bool {
        false
    }
}

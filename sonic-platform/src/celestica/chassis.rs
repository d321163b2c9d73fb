//! Chassis: the PSUs, fans and watchdog of one Celestica switch.

use super::fan::{fan_count, Fan};
use super::psu::{Psu, NUM_PSU};
use super::questone2bd::Questone2bdPsu;
use super::watchdog::Watchdog;
use crate::api::{ChassisBase, FanBase, PsuBase, WatchdogBase};
use crate::config::PlatformConfig;
use crate::error::{Error, Result};
use crate::hw_trait::GpioBank;
use crate::platform::Platform;
use crate::tracing::prelude::*;

pub struct Chassis {
    platform: Platform,
    psus: Vec<Box<dyn PsuBase>>,
    fans: Vec<Fan>,
    watchdog: Watchdog,
}

impl Chassis {
    pub async fn new(config: &PlatformConfig, platform: Platform) -> Result<Self> {
        let psus: Vec<Box<dyn PsuBase>> = match platform {
            Platform::Seastone | Platform::E1031 => {
                let gpio = GpioBank::discover(config).await;
                let mut psus: Vec<Box<dyn PsuBase>> = Vec::with_capacity(NUM_PSU);
                for index in 1..=NUM_PSU {
                    psus.push(Box::new(Psu::new(config, platform.clone(), gpio.clone(), index)?));
                }
                psus
            }
            Platform::Questone2bd => {
                let mut psus: Vec<Box<dyn PsuBase>> = Vec::with_capacity(NUM_PSU);
                for index in 0..NUM_PSU {
                    psus.push(Box::new(Questone2bdPsu::new(config, index)?));
                }
                psus
            }
            other => {
                return Err(Error::Unsupported(format!("no Celestica chassis for {}", other)));
            }
        };

        let fans = match fan_count(&platform) {
            0 => Vec::new(),
            count => {
                let gpio = GpioBank::discover(config).await;
                (0..count)
                    .map(|index| Fan::new(config, platform.clone(), gpio.clone(), index))
                    .collect()
            }
        };

        info!(
            platform = %platform,
            psus = psus.len(),
            fans = fans.len(),
            "Chassis initialised"
        );
        Ok(Self {
            watchdog: Watchdog::new(config, platform.clone()),
            platform,
            psus,
            fans,
        })
    }

    /// Build the chassis for whatever platform this host is.
    pub async fn detect(config: &PlatformConfig) -> Result<Self> {
        let platform = Platform::detect(config).await?;
        Self::new(config, platform).await
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }
}

impl ChassisBase for Chassis {
    fn get_num_psus(&self) -> usize {
        self.psus.len()
    }

    fn get_psu(&self, index: usize) -> Option<&dyn PsuBase> {
        let psu = self.psus.get(index).map(|p| p.as_ref());
        if psu.is_none() {
            warn!(index, "PSU index out of range (0-{})", self.psus.len().saturating_sub(1));
        }
        psu
    }

    fn get_num_fans(&self) -> usize {
        self.fans.len()
    }

    fn get_fan(&self, index: usize) -> Option<&dyn FanBase> {
        let fan = self.fans.get(index).map(|f| f as &dyn FanBase);
        if fan.is_none() {
            warn!(index, "Fan index out of range (0-{})", self.fans.len().saturating_sub(1));
        }
        fan
    }

    fn get_watchdog(&self) -> Option<&dyn WatchdogBase> {
        Some(&self.watchdog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dx010_inventory() {
        let dir = tempfile::tempdir().unwrap();
        let chassis = Chassis::new(&PlatformConfig::with_root(dir.path()), Platform::Seastone)
            .await
            .unwrap();

        assert_eq!(chassis.get_num_psus(), 2);
        assert_eq!(chassis.get_num_fans(), 5);
        assert_eq!(chassis.get_psu(0).unwrap().get_name(), "PSU-1");
        assert_eq!(chassis.get_psu(1).unwrap().get_name(), "PSU-2");
        assert!(chassis.get_psu(2).is_none());
        assert_eq!(chassis.get_fan(4).unwrap().get_name(), "FAN-5");
        assert!(chassis.get_fan(5).is_none());
        assert!(chassis.get_watchdog().is_some());
    }

    #[tokio::test]
    async fn test_e1031_has_three_fans() {
        let dir = tempfile::tempdir().unwrap();
        let chassis = Chassis::new(&PlatformConfig::with_root(dir.path()), Platform::E1031)
            .await
            .unwrap();
        assert_eq!(chassis.get_num_fans(), 3);
        assert_eq!(chassis.get_num_psus(), 2);
    }

    #[tokio::test]
    async fn test_questone2bd_psus() {
        let dir = tempfile::tempdir().unwrap();
        let chassis = Chassis::new(&PlatformConfig::with_root(dir.path()), Platform::Questone2bd)
            .await
            .unwrap();
        assert_eq!(chassis.get_num_fans(), 0);
        assert_eq!(chassis.get_psu(1).unwrap().get_name(), "PSU-2");
    }

    #[tokio::test]
    async fn test_non_celestica_platform() {
        let result = Chassis::new(&PlatformConfig::default(), Platform::As1332h).await;
        assert!(matches!(result, Err(Error::Unsupported(_))));
    }
}

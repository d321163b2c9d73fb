//! Questone2BD power supplies.
//!
//! Presence and power-ok come from a CPLD status register. Telemetry comes
//! from the PSU's PMBus hwmon device, with a direct PMBus read when the
//! kernel driver is not bound. Model and serial are in the PSU FRU EEPROM
//! behind the i2c-68 mux.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::api::{DeviceBase, FanBase, PsuBase, NOT_AVAILABLE};
use crate::config::PlatformConfig;
use crate::error::{Error, Result};
use crate::hw_trait::{sysfs, I2cDev};
use crate::peripheral::fru::ProductInfo;
use crate::peripheral::pmbus::PmbusPsu;
use crate::tracing::prelude::*;

/// CPLD register holding PSU status and presence bits
pub const PSU_STATUS_REGISTER: &str = "0xA160";

/// Wiring of one PSU slot.
#[derive(Debug, Clone, Copy)]
pub struct PsuInfo {
    pub name: &'static str,
    /// Status register bit set while power is good
    pub status_bit: u8,
    /// Status register bit cleared while a PSU is inserted
    pub present_bit: u8,
    /// I2C bus of the PSU's PMBus interface
    pub i2c_num: u32,
    pub pmbus_addr: u8,
    pub eeprom_addr: u8,
}

pub const PSU_INFO: [PsuInfo; 2] = [
    PsuInfo {
        name: "PSU-1",
        status_bit: 0,
        present_bit: 2,
        i2c_num: 75,
        pmbus_addr: 0x58,
        eeprom_addr: 0x50,
    },
    PsuInfo {
        name: "PSU-2",
        status_bit: 1,
        present_bit: 3,
        i2c_num: 76,
        pmbus_addr: 0x59,
        eeprom_addr: 0x51,
    },
];

impl PsuInfo {
    /// Decode this slot's presence from a status register value.
    pub fn is_present(&self, reg: u32) -> bool {
        reg & (1 << self.present_bit) == 0
    }

    /// Decode this slot's power good bit from a status register value.
    pub fn is_power_ok(&self, reg: u32) -> bool {
        reg & (1 << self.status_bit) != 0
    }
}

/// One hwmon reading: label file prefix, label text, value file prefix
/// and the divisor to SI units.
#[derive(Debug, Clone, Copy)]
struct HwmonSensor {
    label_prefix: &'static str,
    label: &'static str,
    value_prefix: &'static str,
    divisor: f64,
}

const VOUT: HwmonSensor = HwmonSensor {
    label_prefix: "in",
    label: "vout1",
    value_prefix: "in",
    divisor: 1000.0,
};

const IOUT: HwmonSensor = HwmonSensor {
    label_prefix: "cur",
    label: "iout1",
    value_prefix: "curr",
    divisor: 1000.0,
};

const POUT: HwmonSensor = HwmonSensor {
    label_prefix: "power",
    label: "pout1",
    value_prefix: "power",
    divisor: 1_000_000.0,
};

pub struct Questone2bdPsu {
    index: usize,
    info: PsuInfo,
    getreg: PathBuf,
    hwmon_dir: PathBuf,
    i2c_dev: PathBuf,
    eeprom: PathBuf,
}

impl Questone2bdPsu {
    /// PSU slot `index`, counted from 0.
    pub fn new(config: &PlatformConfig, index: usize) -> Result<Self> {
        let info = *PSU_INFO.get(index).ok_or_else(|| {
            Error::InvalidParameter(format!("PSU index {} out of range (0-{})", index, PSU_INFO.len() - 1))
        })?;
        let bus = info.i2c_num;
        Ok(Self {
            index,
            info,
            getreg: config.resolve(&config.getreg_path),
            hwmon_dir: config.resolve(format!(
                "/sys/bus/i2c/devices/i2c-{0}/{0}-00{1:02x}/hwmon",
                bus, info.pmbus_addr
            )),
            i2c_dev: config.resolve(format!("/dev/i2c-{}", bus)),
            eeprom: config.resolve(format!(
                "/sys/bus/i2c/devices/i2c-68/i2c-{0}/{0}-00{1:02x}/eeprom",
                bus, info.eeprom_addr
            )),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    async fn status_register(&self) -> Result<u32> {
        let value = sysfs::read_register(&self.getreg, PSU_STATUS_REGISTER).await?;
        trace!(register = PSU_STATUS_REGISTER, value, "PSU status register");
        Ok(value)
    }

    pub async fn read_presence(&self) -> Result<bool> {
        Ok(self.info.is_present(self.status_register().await?))
    }

    pub async fn read_power_ok(&self) -> Result<bool> {
        Ok(self.info.is_power_ok(self.status_register().await?))
    }

    /// Find the hwmon attribute labelled `sensor.label` and read its value.
    async fn read_hwmon(&self, sensor: HwmonSensor) -> Result<f64> {
        let value_path = find_labelled(&self.hwmon_dir, sensor).await?;
        let raw = sysfs::read_int(&value_path).await?;
        Ok(raw as f64 / sensor.divisor)
    }

    async fn read_pmbus<F, Fut>(&self, read: F) -> Result<f64>
    where
        F: FnOnce(PmbusPsu<I2cDev>) -> Fut,
        Fut: std::future::Future<Output = Result<f32>>,
    {
        let dev = I2cDev::open(&self.i2c_dev)?;
        let value = read(PmbusPsu::new(dev, self.info.pmbus_addr)).await?;
        Ok(value as f64)
    }

    pub async fn read_voltage(&self) -> Result<f64> {
        match self.read_hwmon(VOUT).await {
            Ok(v) => Ok(v),
            Err(e) => {
                debug!(psu = self.info.name, error = %e, "No hwmon vout, reading PMBus");
                self.read_pmbus(|mut psu| async move { psu.read_vout().await }).await
            }
        }
    }

    pub async fn read_current(&self) -> Result<f64> {
        match self.read_hwmon(IOUT).await {
            Ok(v) => Ok(v),
            Err(e) => {
                debug!(psu = self.info.name, error = %e, "No hwmon iout, reading PMBus");
                self.read_pmbus(|mut psu| async move { psu.read_iout().await }).await
            }
        }
    }

    pub async fn read_power(&self) -> Result<f64> {
        match self.read_hwmon(POUT).await {
            Ok(v) => Ok(v),
            Err(e) => {
                debug!(psu = self.info.name, error = %e, "No hwmon pout, reading PMBus");
                self.read_pmbus(|mut psu| async move { psu.read_pout().await }).await
            }
        }
    }

    pub async fn read_product_info(&self) -> Result<ProductInfo> {
        let data = sysfs::read_bytes(&self.eeprom).await?;
        ProductInfo::decode(&data)?
            .ok_or_else(|| Error::Parse(format!("{}: no product info area", self.eeprom.display())))
    }
}

/// Locate `<value_prefix><N>_input` next to the label file whose text
/// contains the sensor's label.
async fn find_labelled(hwmon_dir: &Path, sensor: HwmonSensor) -> Result<PathBuf> {
    for path in sysfs::find_files(hwmon_dir, sensor.label_prefix).await? {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        if !name.ends_with("_label") {
            continue;
        }
        if !sysfs::read_string(&path).await?.contains(sensor.label) {
            continue;
        }
        let number: String = name.chars().filter(char::is_ascii_digit).collect();
        let dir = path.parent().unwrap_or(hwmon_dir);
        return Ok(dir.join(format!("{}{}_input", sensor.value_prefix, number)));
    }
    Err(Error::Hardware(format!(
        "no {} label under {}",
        sensor.label,
        hwmon_dir.display()
    )))
}

fn or_zero(name: &str, what: &str, value: Result<f64>) -> f64 {
    value.unwrap_or_else(|e| {
        warn!(psu = name, error = %e, "Cannot read PSU {}", what);
        0.0
    })
}

#[async_trait]
impl DeviceBase for Questone2bdPsu {
    fn get_name(&self) -> String {
        self.info.name.to_string()
    }

    async fn get_presence(&self) -> bool {
        self.read_presence().await.unwrap_or_else(|e| {
            warn!(psu = self.info.name, error = %e, "Cannot read PSU presence");
            false
        })
    }

    async fn get_model(&self) -> String {
        match self.read_product_info().await {
            Ok(info) => info.part_number,
            Err(e) => {
                warn!(psu = self.info.name, error = %e, "Cannot read PSU FRU");
                NOT_AVAILABLE.to_string()
            }
        }
    }

    async fn get_serial(&self) -> String {
        match self.read_product_info().await {
            Ok(info) => info.serial_number,
            Err(e) => {
                warn!(psu = self.info.name, error = %e, "Cannot read PSU FRU");
                NOT_AVAILABLE.to_string()
            }
        }
    }

    async fn get_status(&self) -> bool {
        self.read_power_ok().await.unwrap_or_else(|e| {
            warn!(psu = self.info.name, error = %e, "Cannot read PSU status");
            false
        })
    }
}

#[async_trait]
impl PsuBase for Questone2bdPsu {
    async fn get_voltage(&self) -> f64 {
        or_zero(self.info.name, "voltage", self.read_voltage().await)
    }

    async fn get_current(&self) -> f64 {
        or_zero(self.info.name, "current", self.read_current().await)
    }

    async fn get_power(&self) -> f64 {
        or_zero(self.info.name, "power", self.read_power().await)
    }

    fn get_num_fans(&self) -> usize {
        0
    }

    fn get_fan(&self, _index: usize) -> Option<&dyn FanBase> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::StatusLedColor;
    use crate::peripheral::fru::tests::fru_image;
    use std::fs;
    use test_case::test_case;

    fn write(path: &Path, value: impl AsRef<[u8]>) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, value).unwrap();
    }

    #[test]
    fn test_paths() {
        let psu = Questone2bdPsu::new(&PlatformConfig::default(), 1).unwrap();
        assert_eq!(psu.hwmon_dir, PathBuf::from("/sys/bus/i2c/devices/i2c-76/76-0059/hwmon"));
        assert_eq!(psu.i2c_dev, PathBuf::from("/dev/i2c-76"));
        assert_eq!(
            psu.eeprom,
            PathBuf::from("/sys/bus/i2c/devices/i2c-68/i2c-76/76-0051/eeprom")
        );
        assert!(Questone2bdPsu::new(&PlatformConfig::default(), 2).is_err());
    }

    #[test_case(0, 0x0, true, false; "psu1 present unpowered")]
    #[test_case(0, 0x1, true, true; "psu1 powered")]
    #[test_case(0, 0x4, false, false; "psu1 absent")]
    #[test_case(0, 0xA, true, false; "psu1 ignores psu2 bits")]
    #[test_case(1, 0x0, true, false; "psu2 present unpowered")]
    #[test_case(1, 0x2, true, true; "psu2 powered")]
    #[test_case(1, 0x8, false, false; "psu2 absent")]
    #[test_case(1, 0x5, true, false; "psu2 ignores psu1 bits")]
    fn test_status_bit_decoding(slot: usize, reg: u32, present: bool, power_ok: bool) {
        let info = PSU_INFO[slot];
        assert_eq!(info.is_present(reg), present);
        assert_eq!(info.is_power_ok(reg), power_ok);
    }

    #[tokio::test]
    async fn test_status_register_bits() {
        let dir = tempfile::tempdir().unwrap();
        let config = PlatformConfig::with_root(dir.path());
        // A plain file reads back the register name, 0xA160, whose low
        // nibble is zero: both PSUs present, neither powered.
        write(&config.resolve(&config.getreg_path), "");

        let psu1 = Questone2bdPsu::new(&config, 0).unwrap();
        assert!(psu1.get_presence().await);
        assert!(!psu1.get_status().await);
        assert!(!psu1.get_powergood_status().await);
    }

    #[tokio::test]
    async fn test_hwmon_telemetry() {
        let dir = tempfile::tempdir().unwrap();
        let config = PlatformConfig::with_root(dir.path());
        let hwmon = config.resolve("/sys/bus/i2c/devices/i2c-75/75-0058/hwmon/hwmon4");
        write(&hwmon.join("in1_label"), "vin\n");
        write(&hwmon.join("in1_input"), "230000\n");
        write(&hwmon.join("in2_label"), "vout1\n");
        write(&hwmon.join("in2_input"), "12100\n");
        write(&hwmon.join("curr3_label"), "iout1\n");
        write(&hwmon.join("curr3_input"), "15400\n");
        write(&hwmon.join("power2_label"), "pout1\n");
        write(&hwmon.join("power2_input"), "302600000\n");

        let psu = Questone2bdPsu::new(&config, 0).unwrap();
        assert_eq!(psu.get_voltage().await, 12.1);
        assert_eq!(psu.get_current().await, 15.4);
        assert_eq!(psu.get_power().await, 302.6);
    }

    #[tokio::test]
    async fn test_missing_telemetry_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        let psu = Questone2bdPsu::new(&PlatformConfig::with_root(dir.path()), 1).unwrap();
        assert_eq!(psu.get_voltage().await, 0.0);
        assert_eq!(psu.get_power().await, 0.0);
    }

    #[tokio::test]
    async fn test_fru_model_and_serial() {
        let dir = tempfile::tempdir().unwrap();
        let config = PlatformConfig::with_root(dir.path());
        let psu = Questone2bdPsu::new(&config, 0).unwrap();
        write(
            &psu.eeprom,
            fru_image(&["DELTA", "DPS-1300AB", "TDPS1300AB6", "S0", "DSXK1934001234"]),
        );

        assert_eq!(psu.get_model().await, "TDPS1300AB6");
        assert_eq!(psu.get_serial().await, "DSXK1934001234");
        assert!(!psu.set_status_led(StatusLedColor::Green).await);
        assert_eq!(psu.get_status_led().await, StatusLedColor::Off);
    }

    #[tokio::test]
    async fn test_fru_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let psu = Questone2bdPsu::new(&PlatformConfig::with_root(dir.path()), 1).unwrap();
        assert_eq!(psu.get_model().await, "N/A");
        assert_eq!(psu.get_serial().await, "N/A");
    }
}

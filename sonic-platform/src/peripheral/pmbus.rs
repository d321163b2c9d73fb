//! PMBus power supply telemetry
//!
//! Generic PMBus definitions plus a driver for reading the standard
//! telemetry commands of a PSU directly over I2C. Platform code prefers the
//! kernel's hwmon attributes and falls back to this when hwmon is absent.
//!
//! Reference: PMBus Power System Management Protocol, Part II
//! <https://pmbus.org/specification-documents/>

use thiserror::Error;

use crate::error::{Error as PlatformError, Result};
use crate::hw_trait::I2c;
use crate::tracing::prelude::*;

/// PMBus standard command codes used with PSUs
pub mod commands {
    pub const CLEAR_FAULTS: u8 = 0x03;
    pub const VOUT_MODE: u8 = 0x20;
    pub const STATUS_WORD: u8 = 0x79;
    pub const STATUS_VOUT: u8 = 0x7A;
    pub const STATUS_IOUT: u8 = 0x7B;
    pub const STATUS_INPUT: u8 = 0x7C;
    pub const STATUS_TEMPERATURE: u8 = 0x7D;
    pub const STATUS_FANS_1_2: u8 = 0x81;
    pub const READ_VIN: u8 = 0x88;
    pub const READ_IIN: u8 = 0x89;
    pub const READ_VOUT: u8 = 0x8B;
    pub const READ_IOUT: u8 = 0x8C;
    pub const READ_TEMPERATURE_1: u8 = 0x8D;
    pub const READ_FAN_SPEED_1: u8 = 0x90;
    pub const READ_POUT: u8 = 0x96;
    pub const READ_PIN: u8 = 0x97;
    pub const MFR_ID: u8 = 0x99;
    pub const MFR_MODEL: u8 = 0x9A;
    pub const MFR_SERIAL: u8 = 0x9E;
}

/// STATUS_WORD bits (PMBus specification section 17.2)
pub mod status_word {
    pub const VOUT: u16 = 0x8000; // Bit 15: Output voltage fault/warning
    pub const IOUT: u16 = 0x4000; // Bit 14: Output current fault/warning
    pub const INPUT: u16 = 0x2000; // Bit 13: Input voltage fault/warning
    pub const MFR: u16 = 0x1000; // Bit 12: Manufacturer specific fault/warning
    pub const POWER_GOOD_N: u16 = 0x0800; // Bit 11: POWER_GOOD# (set = power not good)
    pub const FANS: u16 = 0x0400; // Bit 10: One or more fans fault/warning
    pub const OTHER: u16 = 0x0200; // Bit 9: Other fault/warning
    pub const UNKNOWN: u16 = 0x0100; // Bit 8: Unknown fault/warning
    pub const BUSY: u16 = 0x0080; // Bit 7: Busy - unable to respond
    pub const OFF: u16 = 0x0040; // Bit 6: Unit is off
    pub const VOUT_OV: u16 = 0x0020; // Bit 5: Output overvoltage fault
    pub const IOUT_OC: u16 = 0x0010; // Bit 4: Output overcurrent fault
    pub const VIN_UV: u16 = 0x0008; // Bit 3: Input undervoltage fault
    pub const TEMP: u16 = 0x0004; // Bit 2: Temperature fault/warning
    pub const CML: u16 = 0x0002; // Bit 1: Communication/Logic/Memory fault
    pub const NONE: u16 = 0x0001; // Bit 0: No faults (NONE_OF_THE_ABOVE)
}

/// PMBus data format errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PMBusError {
    #[error("Value out of range")]
    ValueOutOfRange,
    #[error("Invalid block length {0}")]
    InvalidBlockLength(usize),
}

impl From<PMBusError> for PlatformError {
    fn from(e: PMBusError) -> Self {
        PlatformError::Hardware(format!("PMBus: {}", e))
    }
}

// Sign-extend a 5-bit two's complement exponent.
fn exponent5(raw: u8) -> i32 {
    let raw = raw & 0x1F;
    if raw & 0x10 != 0 {
        (raw | 0xE0) as i8 as i32
    } else {
        raw as i32
    }
}

/// SLINEAR11: a 5-bit signed exponent over an 11-bit signed mantissa,
/// used by every READ_* command except READ_VOUT.
pub struct Linear11;

impl Linear11 {
    pub fn to_float(value: u16) -> f32 {
        let exponent = exponent5((value >> 11) as u8);
        // Move the mantissa's sign bit to bit 15 and shift back to extend it.
        let mantissa = (((value & 0x7FF) << 5) as i16 >> 5) as i32;
        mantissa as f32 * 2.0_f32.powi(exponent)
    }

    /// Encode with the smallest exponent whose mantissa still fits.
    pub fn from_float(value: f32) -> u16 {
        if value == 0.0 {
            return 0;
        }
        let exponent = (-16..=15)
            .find(|&exp| (value / 2.0_f32.powi(exp)).round().abs() <= 1023.0)
            .unwrap_or(15);
        let mantissa = (value / 2.0_f32.powi(exponent)).round() as i32;
        (((exponent as u16) & 0x1F) << 11) | ((mantissa as u16) & 0x7FF)
    }
}

/// ULINEAR16: an unsigned mantissa scaled by the exponent in VOUT_MODE.
pub struct Linear16;

impl Linear16 {
    pub fn to_float(value: u16, vout_mode: u8) -> f32 {
        value as f32 * 2.0_f32.powi(exponent5(vout_mode))
    }

    pub fn from_float(value: f32, vout_mode: u8) -> std::result::Result<u16, PMBusError> {
        let mantissa = (value / 2.0_f32.powi(exponent5(vout_mode))).round();
        if !(0.0..=65535.0).contains(&mantissa) {
            return Err(PMBusError::ValueOutOfRange);
        }
        Ok(mantissa as u16)
    }
}

const STATUS_WORD_NAMES: [(u16, &str); 15] = [
    (status_word::VOUT, "VOUT fault/warning"),
    (status_word::IOUT, "IOUT fault/warning"),
    (status_word::INPUT, "INPUT fault/warning"),
    (status_word::MFR, "MFR specific"),
    (status_word::POWER_GOOD_N, "POWER_GOOD negated"),
    (status_word::FANS, "FAN fault/warning"),
    (status_word::OTHER, "OTHER"),
    (status_word::UNKNOWN, "UNKNOWN"),
    (status_word::BUSY, "BUSY"),
    (status_word::OFF, "OFF"),
    (status_word::VOUT_OV, "VOUT_OV fault"),
    (status_word::IOUT_OC, "IOUT_OC fault"),
    (status_word::VIN_UV, "VIN_UV fault"),
    (status_word::TEMP, "TEMP fault/warning"),
    (status_word::CML, "CML fault"),
];

pub struct StatusDecoder;

impl StatusDecoder {
    /// Names of the STATUS_WORD bits that are set, most significant first.
    pub fn decode_status_word(status: u16) -> Vec<&'static str> {
        let names: Vec<&'static str> = STATUS_WORD_NAMES
            .iter()
            .filter(|(bit, _)| status & bit != 0)
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() && status & status_word::NONE != 0 {
            return vec!["NONE_OF_THE_ABOVE"];
        }
        names
    }

    /// Whether a STATUS_WORD says the output is up and good.
    pub fn power_good(status: u16) -> bool {
        status & (status_word::POWER_GOOD_N | status_word::OFF) == 0
    }
}

/// A PSU's PMBus interface.
pub struct PmbusPsu<I> {
    i2c: I,
    address: u8,
}

impl<I: I2c> PmbusPsu<I> {
    pub fn new(i2c: I, address: u8) -> Self {
        Self { i2c, address }
    }

    /// Input voltage in volts
    pub async fn read_vin(&mut self) -> Result<f32> {
        self.read_linear11(commands::READ_VIN).await
    }

    /// Input current in amps
    pub async fn read_iin(&mut self) -> Result<f32> {
        self.read_linear11(commands::READ_IIN).await
    }

    /// Output voltage in volts
    pub async fn read_vout(&mut self) -> Result<f32> {
        let vout_mode = self.read_byte(commands::VOUT_MODE).await?;
        let value = self.read_word(commands::READ_VOUT).await?;
        Ok(Linear16::to_float(value, vout_mode))
    }

    /// Output current in amps
    pub async fn read_iout(&mut self) -> Result<f32> {
        self.read_linear11(commands::READ_IOUT).await
    }

    /// Input power in watts
    pub async fn read_pin(&mut self) -> Result<f32> {
        self.read_linear11(commands::READ_PIN).await
    }

    /// Output power in watts
    pub async fn read_pout(&mut self) -> Result<f32> {
        self.read_linear11(commands::READ_POUT).await
    }

    /// Hot-spot temperature in °C
    pub async fn read_temperature(&mut self) -> Result<f32> {
        self.read_linear11(commands::READ_TEMPERATURE_1).await
    }

    /// Fan 1 speed in RPM
    pub async fn read_fan_speed(&mut self) -> Result<u32> {
        let rpm = self.read_linear11(commands::READ_FAN_SPEED_1).await?;
        Ok(rpm.max(0.0) as u32)
    }

    pub async fn status_word(&mut self) -> Result<u16> {
        let status = self.read_word(commands::STATUS_WORD).await?;
        let desc = StatusDecoder::decode_status_word(status);
        if !desc.is_empty() {
            debug!(address = self.address, "STATUS_WORD: 0x{:04X} ({})", status, desc.join(", "));
        }
        Ok(status)
    }

    /// Output enabled and POWER_GOOD asserted.
    pub async fn power_good(&mut self) -> Result<bool> {
        Ok(StatusDecoder::power_good(self.status_word().await?))
    }

    pub async fn clear_faults(&mut self) -> Result<()> {
        self.i2c.write(self.address, &[commands::CLEAR_FAULTS]).await
    }

    pub async fn mfr_model(&mut self) -> Result<String> {
        self.read_block_string(commands::MFR_MODEL).await
    }

    pub async fn mfr_serial(&mut self) -> Result<String> {
        self.read_block_string(commands::MFR_SERIAL).await
    }

    // Helper methods for I2C operations

    async fn read_linear11(&mut self, command: u8) -> Result<f32> {
        let value = self.read_word(command).await?;
        Ok(Linear11::to_float(value))
    }

    async fn read_byte(&mut self, command: u8) -> Result<u8> {
        let mut data = [0u8; 1];
        self.i2c.write_read(self.address, &[command], &mut data).await?;
        Ok(data[0])
    }

    async fn read_word(&mut self, command: u8) -> Result<u16> {
        let mut data = [0u8; 2];
        self.i2c.write_read(self.address, &[command], &mut data).await?;
        Ok(u16::from_le_bytes(data))
    }

    async fn read_block_string(&mut self, command: u8) -> Result<String> {
        // SMBus block read: length byte then up to 32 data bytes
        let mut buffer = [0u8; 33];
        self.i2c.write_read(self.address, &[command], &mut buffer).await?;
        let len = buffer[0] as usize;
        if len == 0 || len > 32 {
            return Err(PMBusError::InvalidBlockLength(len).into());
        }
        let text = String::from_utf8_lossy(&buffer[1..=len]);
        Ok(text.trim_matches(|c: char| c == '\0' || c.is_whitespace()).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw_trait::i2c::mock::MockI2c;
    use test_case::test_case;

    const PSU_ADDR: u8 = 0x58;

    #[test]
    fn test_linear11_zero() {
        assert_eq!(Linear11::from_float(0.0), 0);
        assert_eq!(Linear11::to_float(0), 0.0);
    }

    #[test_case(12.0; "output voltage")]
    #[test_case(41.5; "output current")]
    #[test_case(230.0; "input voltage")]
    #[test_case(550.0; "output power")]
    #[test_case(-10.5; "negative")]
    fn test_linear11_exact_values(value: f32) {
        assert_eq!(Linear11::to_float(Linear11::from_float(value)), value);
    }

    #[test]
    fn test_linear11_rounds_large_values() {
        let decoded = Linear11::to_float(Linear11::from_float(9000.0));
        assert!((decoded - 9000.0).abs() <= 8.0, "decoded = {}", decoded);
    }

    #[test]
    fn test_linear11_known_encoding() {
        // exponent -2, mantissa 48 -> 12.0
        assert_eq!(Linear11::to_float(0xF030), 12.0);
    }

    #[test]
    fn test_linear16_with_vout_mode() {
        // VOUT_MODE exponent -9
        let vout_mode = 0x17;
        assert_eq!(Linear16::to_float(6144, vout_mode), 12.0);
        assert_eq!(Linear16::from_float(12.0, vout_mode).unwrap(), 6144);
        assert_eq!(
            Linear16::from_float(1000.0, vout_mode),
            Err(PMBusError::ValueOutOfRange)
        );
    }

    #[test]
    fn test_power_good_bits() {
        assert!(StatusDecoder::power_good(0x0000));
        assert!(!StatusDecoder::power_good(status_word::POWER_GOOD_N));
        assert!(!StatusDecoder::power_good(status_word::OFF));
        assert!(StatusDecoder::power_good(status_word::FANS));
    }

    #[test]
    fn test_decode_status_word() {
        let desc = StatusDecoder::decode_status_word(status_word::TEMP | status_word::FANS);
        assert_eq!(desc, vec!["FAN fault/warning", "TEMP fault/warning"]);
        assert_eq!(
            StatusDecoder::decode_status_word(status_word::NONE),
            vec!["NONE_OF_THE_ABOVE"]
        );
    }

    #[tokio::test]
    async fn test_psu_telemetry() {
        let mut i2c = MockI2c::new();
        i2c.set_response(PSU_ADDR, commands::VOUT_MODE, &[0x17]);
        i2c.set_word(PSU_ADDR, commands::READ_VOUT, 6144);
        i2c.set_word(PSU_ADDR, commands::READ_IOUT, Linear11::from_float(20.5));
        i2c.set_word(PSU_ADDR, commands::READ_POUT, Linear11::from_float(246.0));
        i2c.set_word(PSU_ADDR, commands::READ_FAN_SPEED_1, Linear11::from_float(9000.0));
        i2c.set_word(PSU_ADDR, commands::STATUS_WORD, 0);

        let mut psu = PmbusPsu::new(i2c, PSU_ADDR);
        assert_eq!(psu.read_vout().await.unwrap(), 12.0);
        assert!((psu.read_iout().await.unwrap() - 20.5).abs() < 0.01);
        assert!((psu.read_pout().await.unwrap() - 246.0).abs() < 0.5);
        assert!(psu.read_fan_speed().await.unwrap().abs_diff(9000) < 16);
        assert!(psu.power_good().await.unwrap());
    }

    #[tokio::test]
    async fn test_block_read_model() {
        let mut i2c = MockI2c::new();
        let mut block = vec![0u8; 33];
        let model = b"DPS-550AB-39 ";
        block[0] = model.len() as u8;
        block[1..=model.len()].copy_from_slice(model);
        i2c.set_response(PSU_ADDR, commands::MFR_MODEL, &block);

        let mut psu = PmbusPsu::new(i2c, PSU_ADDR);
        assert_eq!(psu.mfr_model().await.unwrap(), "DPS-550AB-39");
    }

    #[tokio::test]
    async fn test_bad_block_length() {
        let mut i2c = MockI2c::new();
        i2c.set_response(PSU_ADDR, commands::MFR_SERIAL, &[0u8; 33]);

        let mut psu = PmbusPsu::new(i2c, PSU_ADDR);
        assert!(psu.mfr_serial().await.is_err());
    }

    #[tokio::test]
    async fn test_clear_faults_sends_command_byte() {
        let mut psu = PmbusPsu::new(MockI2c::new(), PSU_ADDR);
        psu.clear_faults().await.unwrap();
        assert_eq!(psu.i2c.writes, vec![(PSU_ADDR, vec![commands::CLEAR_FAULTS])]);
    }

    #[tokio::test]
    async fn test_bus_failure_propagates() {
        let mut i2c = MockI2c::new();
        i2c.fail = true;
        let mut psu = PmbusPsu::new(i2c, PSU_ADDR);
        assert!(psu.clear_faults().await.is_err());
        assert!(psu.read_vout().await.is_err());
    }
}

//! Optic module temperature from the SFF-8472 / SFF-8636 DOM pages.
//!
//! SFP modules expose diagnostics at a second address (A2h, 0x51 in 7-bit
//! form) and say in byte 92 of A0h whether the values are internally
//! calibrated or need the slope/offset constants applied. QSFP modules keep
//! an internally calibrated temperature in the lower page of 0x50.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::hw_trait::i2c::{read_bytes, I2c};
use crate::tracing::prelude::*;

/// Serial ID EEPROM (A0h)
pub const EEPROM_ADDR: u8 = 0x50;
/// Diagnostic monitoring page (A2h)
pub const DOM_ADDR: u8 = 0x51;

/// Diagnostic monitoring type, bits 4-6 hold the calibration mode
pub const SFP_DMT_OFFSET: u8 = 92;
/// External calibration: temperature slope, unsigned 8.8 fixed point
pub const SFP_TEMP_SLOPE_OFFSET: u8 = 84;
/// External calibration: temperature offset, signed 1/256 °C
pub const SFP_TEMP_OFFSET_OFFSET: u8 = 86;
pub const SFP_TEMP_OFFSET: u8 = 96;
pub const QSFP_TEMP_OFFSET: u8 = 22;

/// Form factor of the cage being read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum PortType {
    #[strum(to_string = "SFP")]
    Sfp,
    #[strum(to_string = "QSFP")]
    Qsfp,
}

impl FromStr for PortType {
    type Err = std::convert::Infallible;

    /// Only `QSFP` names a QSFP cage; every other name is read as SFP.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(if s == "QSFP" { PortType::Qsfp } else { PortType::Sfp })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationType {
    Internal,
    External,
}

impl CalibrationType {
    /// Decode the DMT byte. Only DDM-implemented modules with exactly one
    /// calibration bit set are understood.
    pub fn from_dmt(dmt: u8) -> Result<Self> {
        match (dmt >> 4) & 0x7 {
            6 => Ok(CalibrationType::Internal),
            5 => Ok(CalibrationType::External),
            other => Err(Error::Unsupported(format!(
                "diagnostic monitoring type {} (byte 0x{:02x})",
                other, dmt
            ))),
        }
    }
}

impl fmt::Display for CalibrationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationType::Internal => f.write_str("internal"),
            CalibrationType::External => f.write_str("external"),
        }
    }
}

/// Interpret the low `bits` bits of `num` as two's complement.
pub fn twos_comp(num: u32, bits: u32) -> i32 {
    let mask = if bits >= 32 { u32::MAX } else { (1 << bits) - 1 };
    let num = num & mask;
    if bits > 0 && bits < 32 && num & (1 << (bits - 1)) != 0 {
        (num as i64 - (1i64 << bits)) as i32
    } else {
        num as i32
    }
}

fn be16(bytes: &[u8]) -> Result<u32> {
    match bytes {
        [msb, lsb] => Ok(((*msb as u32) << 8) | *lsb as u32),
        _ => Err(Error::Parse(format!("expected 2 bytes, got {}", bytes.len()))),
    }
}

/// Temperature conversions on raw 16-bit DOM words.
pub struct Temperature;

impl Temperature {
    /// Internally calibrated reading, in °C
    pub fn internal(raw: u16) -> f64 {
        twos_comp(raw as u32, 16) as f64 / 256.0
    }

    /// Externally calibrated reading, in °C
    pub fn external(raw: u16, slope: u16, offset: u16) -> f64 {
        let slope = slope as f64 / 256.0;
        let value = slope * twos_comp(raw as u32, 16) as f64 + twos_comp(offset as u32, 16) as f64;
        value / 256.0
    }
}

async fn read_word<I: I2c + ?Sized>(i2c: &mut I, addr: u8, offset: u8) -> Result<u16> {
    let bytes = read_bytes(i2c, addr, offset, 2).await?;
    Ok(be16(&bytes)? as u16)
}

/// Read the module temperature in °C.
pub async fn read_temperature<I: I2c + ?Sized>(i2c: &mut I, port: PortType) -> Result<f64> {
    if port == PortType::Qsfp {
        let raw = read_word(i2c, EEPROM_ADDR, QSFP_TEMP_OFFSET).await?;
        return Ok(Temperature::internal(raw));
    }

    let dmt = read_bytes(i2c, EEPROM_ADDR, SFP_DMT_OFFSET, 1).await?;
    let calibration = CalibrationType::from_dmt(dmt[0])?;
    trace!(%calibration, "SFP diagnostic monitoring");

    let raw = read_word(i2c, DOM_ADDR, SFP_TEMP_OFFSET).await?;
    Ok(match calibration {
        CalibrationType::Internal => Temperature::internal(raw),
        CalibrationType::External => {
            let slope = read_word(i2c, DOM_ADDR, SFP_TEMP_SLOPE_OFFSET).await?;
            let offset = read_word(i2c, DOM_ADDR, SFP_TEMP_OFFSET_OFFSET).await?;
            Temperature::external(raw, slope, offset)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw_trait::i2c::mock::MockI2c;
    use test_case::test_case;

    #[test_case(0x7f, 8 => 127)]
    #[test_case(0x80, 8 => -128)]
    #[test_case(0xffff, 16 => -1)]
    #[test_case(0x1980, 16 => 6528)]
    fn test_twos_comp(num: u32, bits: u32) -> i32 {
        twos_comp(num, bits)
    }

    #[test]
    fn test_port_type_parsing() {
        assert_eq!("QSFP".parse::<PortType>().unwrap(), PortType::Qsfp);
        assert_eq!("SFP".parse::<PortType>().unwrap(), PortType::Sfp);
        assert_eq!("qsfp28".parse::<PortType>().unwrap(), PortType::Sfp);
        assert_eq!(PortType::Qsfp.to_string(), "QSFP");
    }

    #[test]
    fn test_calibration_from_dmt() {
        assert_eq!(CalibrationType::from_dmt(0x68).unwrap(), CalibrationType::Internal);
        assert_eq!(CalibrationType::from_dmt(0x58).unwrap(), CalibrationType::External);
        assert!(CalibrationType::from_dmt(0x00).is_err());
    }

    #[test]
    fn test_temperature_conversions() {
        assert_eq!(Temperature::internal(0x1980), 25.5);
        assert_eq!(Temperature::internal(0xff00), -1.0);
        // slope 1.0, offset +1 °C
        assert_eq!(Temperature::external(0x1980, 0x0100, 0x0100), 26.5);
        // slope 0.5, no offset
        assert_eq!(Temperature::external(0x1980, 0x0080, 0x0000), 12.75);
    }

    #[tokio::test]
    async fn test_qsfp_temperature() {
        let mut i2c = MockI2c::new();
        i2c.set(EEPROM_ADDR, QSFP_TEMP_OFFSET, &[0x1e, 0x40]);
        let temp = read_temperature(&mut i2c, PortType::Qsfp).await.unwrap();
        assert_eq!(temp, 30.25);
    }

    #[tokio::test]
    async fn test_sfp_internal_calibration() {
        let mut i2c = MockI2c::new();
        i2c.set(EEPROM_ADDR, SFP_DMT_OFFSET, &[0x68]);
        i2c.set(DOM_ADDR, SFP_TEMP_OFFSET, &[0x19, 0x80]);
        let temp = read_temperature(&mut i2c, PortType::Sfp).await.unwrap();
        assert_eq!(temp, 25.5);
    }

    #[tokio::test]
    async fn test_sfp_external_calibration() {
        let mut i2c = MockI2c::new();
        i2c.set(EEPROM_ADDR, SFP_DMT_OFFSET, &[0x58]);
        i2c.set(DOM_ADDR, SFP_TEMP_SLOPE_OFFSET, &[0x01, 0x00, 0x01, 0x00]);
        i2c.set(DOM_ADDR, SFP_TEMP_OFFSET, &[0x19, 0x80]);
        let temp = read_temperature(&mut i2c, PortType::Sfp).await.unwrap();
        assert_eq!(temp, 26.5);
    }

    #[tokio::test]
    async fn test_sfp_without_ddm() {
        let mut i2c = MockI2c::new();
        i2c.set(EEPROM_ADDR, SFP_DMT_OFFSET, &[0x00]);
        let err = read_temperature(&mut i2c, PortType::Sfp).await.unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }
}

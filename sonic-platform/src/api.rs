//! Platform API contracts.
//!
//! pmon daemons query devices through these traits. Implementations never
//! return errors: a failed hardware access is logged and reported as the
//! sentinel documented on each method, so one bad sensor cannot take down a
//! whole chassis poll.

use async_trait::async_trait;
use strum::{Display, EnumString};

use crate::peripheral::sff::PortType;

/// Name of an unknown string attribute.
pub const NOT_AVAILABLE: &str = "N/A";

/// Status LED colours understood by the framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum StatusLedColor {
    Green,
    Red,
    Amber,
    Off,
}

/// Airflow direction of a fan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum FanDirection {
    #[strum(serialize = "intake")]
    Intake,
    #[strum(serialize = "exhaust")]
    Exhaust,
    #[strum(serialize = "N/A")]
    NotApplicable,
}

/// Attributes shared by every field-replaceable device.
#[async_trait]
pub trait DeviceBase: Send + Sync {
    fn get_name(&self) -> String;

    /// `false` when presence cannot be read.
    async fn get_presence(&self) -> bool;

    /// Model or part number; "N/A" when unknown.
    async fn get_model(&self) -> String {
        NOT_AVAILABLE.to_string()
    }

    /// "N/A" when unknown.
    async fn get_serial(&self) -> String {
        NOT_AVAILABLE.to_string()
    }

    /// Whether the device is operating properly; `false` on error.
    async fn get_status(&self) -> bool;
}

#[async_trait]
pub trait FanBase: DeviceBase {
    async fn get_direction(&self) -> FanDirection;

    /// Speed as a percentage of full scale; 0 on error.
    async fn get_speed(&self) -> u32;

    /// Target speed percentage; 0 in PWM mode or on error.
    async fn get_target_speed(&self) -> u32;

    /// Raw tachometer reading; 0 on error.
    async fn get_speed_rpm(&self) -> u32;

    /// Set speed as a percentage. Returns whether it was applied.
    async fn set_speed(&self, percent: u8) -> bool;

    async fn set_status_led(&self, color: StatusLedColor) -> bool;
}

#[async_trait]
pub trait PsuBase: DeviceBase {
    /// Output voltage in volts; 0.0 on error.
    async fn get_voltage(&self) -> f64 {
        0.0
    }

    /// Output current in amps; 0.0 on error.
    async fn get_current(&self) -> f64 {
        0.0
    }

    /// Output power in watts; 0.0 on error.
    async fn get_power(&self) -> f64 {
        0.0
    }

    async fn get_powergood_status(&self) -> bool {
        self.get_status().await
    }

    async fn set_status_led(&self, _color: StatusLedColor) -> bool {
        false
    }

    async fn get_status_led(&self) -> StatusLedColor {
        StatusLedColor::Off
    }

    fn get_num_fans(&self) -> usize;

    fn get_fan(&self, index: usize) -> Option<&dyn FanBase>;
}

#[async_trait]
pub trait WatchdogBase: Send + Sync {
    /// Arm with a timeout, or kick an armed watchdog. Returns the timeout
    /// actually applied in seconds, or -1.
    async fn arm(&self, seconds: i32) -> i32;

    /// Stop the watchdog. Returns whether it is now disarmed.
    async fn disarm(&self) -> bool;

    async fn is_armed(&self) -> bool;

    /// Seconds until expiry, or -1 when disarmed or unknown.
    async fn get_remaining_time(&self) -> i32;
}

pub trait ChassisBase: Send + Sync {
    fn get_num_psus(&self) -> usize;

    /// PSU at a 0-based index; `None` when out of range.
    fn get_psu(&self, index: usize) -> Option<&dyn PsuBase>;

    fn get_num_fans(&self) -> usize;

    /// Fan at a 0-based index; `None` when out of range.
    fn get_fan(&self, index: usize) -> Option<&dyn FanBase>;

    fn get_watchdog(&self) -> Option<&dyn WatchdogBase>;
}

/// Fan tray information held by a BMC. Fan indexes are 1-based.
#[async_trait]
pub trait FanUtil: Send + Sync {
    fn get_num_fans(&self) -> usize;

    /// RPM; 0 on error.
    async fn get_fan_speed(&self, index: usize) -> u32;

    /// RPM below which the fan is failed; `None` (reported as "N/A") on
    /// error.
    async fn get_fan_low_threshold(&self, index: usize) -> Option<u32>;

    /// RPM above which the fan is failed; 0 on error.
    async fn get_fan_high_threshold(&self, index: usize) -> u32;

    /// Product part number; "N/A" on error.
    async fn get_fan_pn(&self, index: usize) -> String;

    /// "N/A" on error.
    async fn get_fan_sn(&self, index: usize) -> String;
}

/// Firmware versions. Every method returns "None" or "0.0.0" when the
/// version cannot be read.
#[async_trait]
pub trait FwMgrUtil: Send + Sync {
    async fn get_bmc_version(&self) -> String;
    async fn get_cpld_version(&self) -> String;
    async fn get_bios_version(&self) -> String;
    async fn get_onie_version(&self) -> String;
    async fn get_pcie_version(&self) -> String;
    async fn get_fpga_version(&self) -> String;
}

#[async_trait]
pub trait OpticTempUtil: Send + Sync {
    /// Module temperature in °C; 0.0 on error.
    async fn get_optic_temp(&self, bus: u32, port_type: PortType) -> f64;
}

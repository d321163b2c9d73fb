//! Hardware access layer.
//!
//! Drivers in `peripheral` and the platform classes never open files or run
//! tools themselves; they go through the helpers here. I2C is a trait so the
//! same driver works over `/dev/i2c-N`, over `i2cget`, or against a mock.

pub mod gpio;
pub mod i2c;
pub mod sysfs;

pub use gpio::GpioBank;
pub use i2c::{I2c, I2cDev, I2cTool};

//! Optic module temperature over `i2cget`.
//!
//! Each cage sits behind its own mux channel, so callers name the bus of
//! the module rather than a port number.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::api::OpticTempUtil;
use crate::error::Result;
use crate::hw_trait::I2cTool;
use crate::peripheral::sff::{self, PortType};
use crate::tracing::prelude::*;

#[derive(Debug, Clone, Default)]
pub struct I2cOpticTempUtil {
    /// Alternative `i2cget` binary; `PATH` lookup when unset
    i2cget: Option<PathBuf>,
}

impl I2cOpticTempUtil {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_i2cget(i2cget: impl Into<PathBuf>) -> Self {
        Self {
            i2cget: Some(i2cget.into()),
        }
    }

    fn tool(&self, bus: u32) -> I2cTool {
        match &self.i2cget {
            Some(i2cget) => I2cTool::with_programs(bus, i2cget, "i2cset"),
            None => I2cTool::new(bus),
        }
    }

    pub async fn read_temperature(&self, bus: u32, port_type: PortType) -> Result<f64> {
        let mut tool = self.tool(bus);
        let temp = sff::read_temperature(&mut tool, port_type).await?;
        debug!(bus, %port_type, temp, "Optic temperature");
        Ok(temp)
    }
}

#[async_trait]
impl OpticTempUtil for I2cOpticTempUtil {
    async fn get_optic_temp(&self, bus: u32, port_type: PortType) -> f64 {
        self.read_temperature(bus, port_type).await.unwrap_or_else(|e| {
            warn!(bus, %port_type, error = %e, "Cannot read optic temperature");
            0.0
        })
    }
}

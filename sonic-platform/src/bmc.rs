//! BMC REST client.
//!
//! The OpenBMC on Alibaba/Celestica switches answers plain JSON over HTTP.
//! Every endpoint wraps its payload as `{"Information": ...}`.

use reqwest::Client as HttpClient;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::tracing::prelude::*;

/// BMC identity and firmware versions
pub const BMC_INFO_PATH: &str = "/api/sys/bmc";
/// Fan module FRU dumps
pub const FAN_FRU_PATH: &str = "/api/sys/fruid/fan";
/// Sensor readings grouped by controller
pub const SENSORS_PATH: &str = "/api/sys/sensors";

#[derive(Deserialize)]
struct Envelope<T> {
    #[serde(rename = "Information")]
    information: Option<T>,
}

/// HTTP client for one BMC.
#[derive(Debug, Clone)]
pub struct BmcClient {
    http: HttpClient,
    base_url: String,
}

impl BmcClient {
    /// Create a client for `base_url` (no trailing slash) whose requests
    /// give up after `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = HttpClient::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `path` and return the value under `Information`.
    pub async fn get_information<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "BMC request");
        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Hardware(format!("BMC request {} failed: {}", url, status)));
        }
        let envelope: Envelope<T> = response.json().await?;
        envelope
            .information
            .ok_or_else(|| Error::Parse(format!("{}: response has no Information", url)))
    }

    /// Key/value description of the BMC itself.
    pub async fn bmc_info(&self) -> Result<Map<String, Value>> {
        self.get_information(BMC_INFO_PATH).await
    }

    /// One list of `"key: value"` lines per fan FRU.
    pub async fn fan_fru(&self) -> Result<Vec<Vec<String>>> {
        self.get_information(FAN_FRU_PATH).await
    }

    /// Sensor groups; each has a `name` plus one entry per sensor.
    pub async fn sensors(&self) -> Result<Vec<Map<String, Value>>> {
        self.get_information(SENSORS_PATH).await
    }
}

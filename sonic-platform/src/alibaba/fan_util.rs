//! Fan tray information from the AS13-32H/AS23-128H BMC.
//!
//! Each of the four fan trays holds a front and a rear rotor; the switch
//! sees them as fans 1..=8, odd numbers front. Speeds and thresholds come
//! from the BMC sensor dump, part and serial numbers from its fan FRU dump.

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::api::{FanUtil, NOT_AVAILABLE};
use crate::bmc::BmcClient;
use crate::config::PlatformConfig;
use crate::error::{Error, Result};
use crate::tracing::prelude::*;

pub const NUM_FANS: usize = 8;

/// Sensor entry name for 1-based fan `index`, e.g. `Fan 2 Front`.
pub fn sensor_key(index: usize) -> String {
    let position = if index % 2 != 0 { "Front" } else { "Rear" };
    format!("Fan {} {}", tray(index), position)
}

/// FRU dump marker for the tray holding 1-based fan `index`.
pub fn fru_key(index: usize) -> String {
    format!("FAN{} FRU", tray(index))
}

fn tray(index: usize) -> usize {
    index.div_ceil(2)
}

/// Speed and thresholds of one rotor, in RPM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanReading {
    pub speed: u32,
    pub low_threshold: u32,
    pub high_threshold: u32,
}

#[derive(Debug, Clone)]
struct BmcFanData {
    fru: Vec<Vec<String>>,
    sensors: Vec<Map<String, Value>>,
}

pub struct BmcFanUtil {
    client: BmcClient,
    numbers: Regex,
    cache: Mutex<Option<BmcFanData>>,
}

impl BmcFanUtil {
    pub fn new(config: &PlatformConfig) -> Result<Self> {
        let client = BmcClient::new(config.fan_bmc_url.clone(), config.http_timeout())?;
        Self::with_client(client)
    }

    pub fn with_client(client: BmcClient) -> Result<Self> {
        let numbers = Regex::new(r"\d+").map_err(|e| Error::Other(e.to_string()))?;
        Ok(Self {
            client,
            numbers,
            cache: Mutex::new(None),
        })
    }

    /// Drop cached BMC data so the next query fetches it again.
    pub async fn refresh(&self) {
        *self.cache.lock().await = None;
    }

    async fn data(&self) -> Result<BmcFanData> {
        let mut cache = self.cache.lock().await;
        if let Some(data) = cache.as_ref() {
            return Ok(data.clone());
        }
        let data = BmcFanData {
            fru: self.client.fan_fru().await?,
            sensors: self.client.sensors().await?,
        };
        debug!(fru = data.fru.len(), sensors = data.sensors.len(), "Fetched BMC fan data");
        *cache = Some(data.clone());
        Ok(data)
    }

    fn check_index(index: usize) -> Result<()> {
        if !(1..=NUM_FANS).contains(&index) {
            return Err(Error::InvalidParameter(format!(
                "fan index {} out of range (1-{})",
                index, NUM_FANS
            )));
        }
        Ok(())
    }

    /// Parse a sensor value such as `"7650 RPM (min: 1000, max: 20000)"`.
    fn parse_reading(&self, text: &str) -> Result<FanReading> {
        let values: Vec<u32> = self
            .numbers
            .find_iter(text)
            .map(|m| m.as_str().parse::<u32>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Parse(format!("{:?}: {}", text, e)))?;
        match values[..] {
            [speed, low_threshold, high_threshold, ..] => Ok(FanReading {
                speed,
                low_threshold,
                high_threshold,
            }),
            _ => Err(Error::Parse(format!("fan sensor value {:?}", text))),
        }
    }

    pub async fn read_fan(&self, index: usize) -> Result<FanReading> {
        Self::check_index(index)?;
        let key = sensor_key(index);
        let data = self.data().await?;
        let value = data
            .sensors
            .iter()
            .filter(|group| {
                group
                    .get("name")
                    .and_then(Value::as_str)
                    .is_some_and(|name| name.contains("fan"))
            })
            .find_map(|group| group.get(&key))
            .ok_or_else(|| Error::Hardware(format!("BMC has no sensor {:?}", key)))?;
        let text = value
            .as_str()
            .ok_or_else(|| Error::Parse(format!("sensor {:?} is not a string", key)))?;
        self.parse_reading(text)
    }

    /// Value of the first `field` line of the FRU group for fan `index`.
    pub async fn read_fru_field(&self, index: usize, field: &str) -> Result<String> {
        Self::check_index(index)?;
        let key = fru_key(index);
        let data = self.data().await?;
        let group = data
            .fru
            .iter()
            .find(|lines| lines.iter().any(|line| line.contains(&key)))
            .ok_or_else(|| Error::Hardware(format!("BMC has no {:?}", key)))?;
        let line = group
            .iter()
            .find(|line| line.contains(field))
            .ok_or_else(|| Error::Parse(format!("{:?} has no {} line", key, field)))?;
        line.split_once(':')
            .map(|(_, value)| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| Error::Parse(format!("malformed FRU line {:?}", line)))
    }
}

#[async_trait]
impl FanUtil for BmcFanUtil {
    fn get_num_fans(&self) -> usize {
        NUM_FANS
    }

    async fn get_fan_speed(&self, index: usize) -> u32 {
        match self.read_fan(index).await {
            Ok(reading) => reading.speed,
            Err(e) => {
                warn!(index, error = %e, "Cannot read fan speed");
                0
            }
        }
    }

    async fn get_fan_low_threshold(&self, index: usize) -> Option<u32> {
        match self.read_fan(index).await {
            Ok(reading) => Some(reading.low_threshold),
            Err(e) => {
                warn!(index, error = %e, "Cannot read fan low threshold");
                None
            }
        }
    }

    async fn get_fan_high_threshold(&self, index: usize) -> u32 {
        match self.read_fan(index).await {
            Ok(reading) => reading.high_threshold,
            Err(e) => {
                warn!(index, error = %e, "Cannot read fan high threshold");
                0
            }
        }
    }

    async fn get_fan_pn(&self, index: usize) -> String {
        self.read_fru_field(index, "Product").await.unwrap_or_else(|e| {
            warn!(index, error = %e, "Cannot read fan part number");
            NOT_AVAILABLE.to_string()
        })
    }

    async fn get_fan_sn(&self, index: usize) -> String {
        self.read_fru_field(index, "Serial").await.unwrap_or_else(|e| {
            warn!(index, error = %e, "Cannot read fan serial number");
            NOT_AVAILABLE.to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bmc::{FAN_FRU_PATH, SENSORS_PATH};
    use axum::{routing::get, Json, Router};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use test_case::test_case;

    #[test_case(1, "Fan 1 Front", "FAN1 FRU")]
    #[test_case(2, "Fan 1 Rear", "FAN1 FRU")]
    #[test_case(3, "Fan 2 Front", "FAN2 FRU")]
    #[test_case(8, "Fan 4 Rear", "FAN4 FRU")]
    fn test_keys(index: usize, sensor: &str, fru: &str) {
        assert_eq!(sensor_key(index), sensor);
        assert_eq!(fru_key(index), fru);
    }

    fn util() -> BmcFanUtil {
        let client = BmcClient::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap();
        BmcFanUtil::with_client(client).unwrap()
    }

    #[test]
    fn test_parse_reading() {
        let util = util();
        let reading = util.parse_reading("7650 RPM (1000, 20000)").unwrap();
        assert_eq!(
            reading,
            FanReading {
                speed: 7650,
                low_threshold: 1000,
                high_threshold: 20000
            }
        );
        assert!(util.parse_reading("N/A").is_err());
    }

    #[tokio::test]
    async fn test_index_out_of_range() {
        let util = util();
        assert!(matches!(util.read_fan(0).await, Err(Error::InvalidParameter(_))));
        assert!(matches!(util.read_fan(9).await, Err(Error::InvalidParameter(_))));
    }

    #[tokio::test]
    async fn test_unreachable_bmc_sentinels() {
        let util = util();
        assert_eq!(util.get_fan_speed(1).await, 0);
        assert_eq!(util.get_fan_low_threshold(1).await, None);
        assert_eq!(util.get_fan_high_threshold(1).await, 0);
        assert_eq!(util.get_fan_pn(1).await, "N/A");
        assert_eq!(util.get_fan_sn(1).await, "N/A");
    }

    /// Fake BMC counting how often the sensor dump is fetched.
    async fn fake_bmc(fetches: Arc<AtomicUsize>) -> BmcFanUtil {
        let app = Router::new()
            .route(
                SENSORS_PATH,
                get(move || {
                    let fetches = fetches.clone();
                    async move {
                        fetches.fetch_add(1, Ordering::SeqCst);
                        Json(json!({"Information": [
                            {"name": "syscpld-i2c-0-0d", "Fan 1 Front": "1 RPM (2, 3)"},
                            {
                                "name": "fancpld-i2c-8-0d",
                                "Fan 1 Front": "7650 RPM (1000, 20000)",
                                "Fan 1 Rear": "7200 RPM (1000, 20000)",
                                "Fan 4 Rear": "N/A"
                            }
                        ]}))
                    }
                }),
            )
            .route(
                FAN_FRU_PATH,
                get(|| async {
                    Json(json!({"Information": [
                        ["FAN1 FRU", "Product Name: FAN-40X", "Product Serial: S1A2", "Product Part Number: R1240"],
                        ["FAN2 FRU", "Product Name: FAN-40Y", "Product Serial:"]
                    ]}))
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        let client = BmcClient::new(format!("http://{}", addr), Duration::from_secs(2)).unwrap();
        BmcFanUtil::with_client(client).unwrap()
    }

    #[tokio::test]
    async fn test_sensor_readings() {
        let util = fake_bmc(Arc::new(AtomicUsize::new(0))).await;
        assert_eq!(util.get_fan_speed(1).await, 7650);
        assert_eq!(util.get_fan_speed(2).await, 7200);
        assert_eq!(util.get_fan_low_threshold(2).await, Some(1000));
        assert_eq!(util.get_fan_high_threshold(1).await, 20000);
        // Present in the dump but unreadable, and absent entirely
        assert_eq!(util.get_fan_speed(8).await, 0);
        assert_eq!(util.get_fan_low_threshold(3).await, None);
    }

    #[tokio::test]
    async fn test_fru_fields() {
        let util = fake_bmc(Arc::new(AtomicUsize::new(0))).await;
        assert_eq!(util.get_fan_pn(1).await, "FAN-40X");
        assert_eq!(util.get_fan_sn(2).await, "S1A2");
        // Tray 2 has an empty serial, tray 3 no FRU group at all
        assert_eq!(util.get_fan_sn(3).await, "N/A");
        assert_eq!(util.get_fan_pn(5).await, "N/A");
    }

    #[tokio::test]
    async fn test_cache_until_refresh() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let util = fake_bmc(fetches.clone()).await;

        util.get_fan_speed(1).await;
        util.get_fan_speed(2).await;
        util.get_fan_pn(1).await;
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        util.refresh().await;
        util.get_fan_speed(1).await;
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }
}

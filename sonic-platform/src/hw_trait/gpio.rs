//! Legacy sysfs GPIO access.
//!
//! Board pins are numbered relative to the base of the first GPIO chip, so
//! the bank discovers that base once and offsets every pin by it.

use std::path::PathBuf;

use crate::config::PlatformConfig;
use crate::error::{Error, Result};
use crate::hw_trait::sysfs;
use crate::tracing::prelude::*;

const GPIO_CLASS_DIR: &str = "/sys/class/gpio";

/// Base used when no `gpiochipN` entry can be found.
pub const DEFAULT_GPIO_BASE: u32 = 216;

/// GPIO pins of one controller.
#[derive(Debug, Clone)]
pub struct GpioBank {
    dir: PathBuf,
    base: u32,
}

impl GpioBank {
    pub fn new(dir: PathBuf, base: u32) -> Self {
        Self { dir, base }
    }

    /// Find the base of the lowest-numbered `gpiochip` under the configured
    /// root.
    pub async fn discover(config: &PlatformConfig) -> Self {
        let dir = config.resolve(GPIO_CLASS_DIR);
        let base = match Self::find_base(&dir).await {
            Ok(Some(base)) => base,
            Ok(None) => {
                debug!(dir = %dir.display(), "No gpiochip found, using default base");
                DEFAULT_GPIO_BASE
            }
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "Cannot list GPIO chips, using default base");
                DEFAULT_GPIO_BASE
            }
        };
        Self { dir, base }
    }

    async fn find_base(dir: &std::path::Path) -> Result<Option<u32>> {
        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut lowest: Option<u32> = None;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(base) = name
                .strip_prefix("gpiochip")
                .and_then(|n| n.parse::<u32>().ok())
            {
                lowest = Some(lowest.map_or(base, |l| l.min(base)));
            }
        }
        Ok(lowest)
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    fn value_path(&self, pin: u32) -> PathBuf {
        self.dir
            .join(format!("gpio{}", self.base + pin))
            .join("value")
    }

    /// Read a pin level (0 or 1).
    pub async fn read(&self, pin: u32) -> Result<u8> {
        let path = self.value_path(pin);
        match sysfs::read_int(&path).await? {
            0 => Ok(0),
            1 => Ok(1),
            other => Err(Error::Parse(format!(
                "{}: unexpected GPIO level {}",
                path.display(),
                other
            ))),
        }
    }

    /// Drive a pin level.
    pub async fn write(&self, pin: u32, value: u8) -> Result<()> {
        let path = self.value_path(pin);
        trace!(path = %path.display(), value, "GPIO write");
        sysfs::write_value(&path, value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_discover_lowest_chip() {
        let dir = tempfile::tempdir().unwrap();
        let gpio = dir.path().join("sys/class/gpio");
        std::fs::create_dir_all(gpio.join("gpiochip456")).unwrap();
        std::fs::create_dir_all(gpio.join("gpiochip200")).unwrap();
        std::fs::write(gpio.join("export"), "").unwrap();

        let bank = GpioBank::discover(&PlatformConfig::with_root(dir.path())).await;
        assert_eq!(bank.base(), 200);
    }

    #[tokio::test]
    async fn test_discover_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let bank = GpioBank::discover(&PlatformConfig::with_root(dir.path())).await;
        assert_eq!(bank.base(), DEFAULT_GPIO_BASE);
    }

    #[tokio::test]
    async fn test_read_write_offsets_by_base() {
        let dir = tempfile::tempdir().unwrap();
        let pin_dir = dir.path().join("gpio226");
        std::fs::create_dir_all(&pin_dir).unwrap();
        std::fs::write(pin_dir.join("value"), "1\n").unwrap();

        let bank = GpioBank::new(dir.path().to_path_buf(), 216);
        assert_eq!(bank.read(10).await.unwrap(), 1);

        bank.write(10, 0).await.unwrap();
        assert_eq!(std::fs::read_to_string(pin_dir.join("value")).unwrap(), "0");
    }

    #[tokio::test]
    async fn test_read_rejects_out_of_range_level() {
        let dir = tempfile::tempdir().unwrap();
        let pin_dir = dir.path().join("gpio216");
        std::fs::create_dir_all(&pin_dir).unwrap();
        std::fs::write(pin_dir.join("value"), "7\n").unwrap();

        let bank = GpioBank::new(dir.path().to_path_buf(), 216);
        assert!(bank.read(0).await.is_err());
    }
}

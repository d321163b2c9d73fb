//! Hardware watchdog through the Linux watchdog character device.
//!
//! Opening the device starts the timer and closing it without the magic
//! character leaves it running, so the file is held open for as long as the
//! watchdog is armed.

use async_trait::async_trait;
use bitflags::bitflags;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::api::WatchdogBase;
use crate::config::PlatformConfig;
use crate::error::{Error, Result};
use crate::hw_trait::sysfs;
use crate::platform::Platform;
use crate::tracing::prelude::*;

// <linux/watchdog.h>
mod ioctl {
    use std::os::raw::c_int;

    #[repr(C)]
    pub struct WatchdogInfo {
        pub options: u32,
        pub firmware_version: u32,
        pub identity: [u8; 32],
    }

    pub const WDIOS_DISABLECARD: c_int = 0x0001;
    pub const WDIOS_ENABLECARD: c_int = 0x0002;

    nix::ioctl_read!(getsupport, b'W', 0, WatchdogInfo);
    nix::ioctl_read!(setoptions, b'W', 4, c_int);
    nix::ioctl_read!(keepalive, b'W', 5, c_int);
    nix::ioctl_readwrite!(settimeout, b'W', 6, c_int);
    nix::ioctl_read!(gettimeout, b'W', 7, c_int);
    nix::ioctl_read!(gettimeleft, b'W', 10, c_int);
}

bitflags! {
    /// `WDIOF_*` capability bits reported by `WDIOC_GETSUPPORT`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WatchdogOptions: u32 {
        const OVERHEAT = 0x0001;
        const FANFAULT = 0x0002;
        const EXTERN1 = 0x0004;
        const EXTERN2 = 0x0008;
        const POWERUNDER = 0x0010;
        const CARDRESET = 0x0020;
        const POWEROVER = 0x0040;
        const SETTIMEOUT = 0x0080;
        const MAGICCLOSE = 0x0100;
        const PRETIMEOUT = 0x0200;
        const ALARMONLY = 0x0400;
        const KEEPALIVEPING = 0x8000;
    }
}

/// Identity and capabilities of a watchdog driver.
#[derive(Debug, Clone)]
pub struct WatchdogSupport {
    pub identity: String,
    pub firmware_version: u32,
    pub options: WatchdogOptions,
}

/// E1031 CPLD timeout codes and the period each selects.
const E1031_TIMEOUTS: [(i32, i32); 3] = [(1, 30), (2, 60), (3, 180)];

/// Value to pass to `WDIOC_SETTIMEOUT` for a requested period, and the
/// period that value gives.
fn timeout_setting(platform: &Platform, seconds: i32) -> Result<(i32, i32)> {
    if seconds <= 0 {
        return Err(Error::InvalidParameter(format!("watchdog timeout {}s", seconds)));
    }
    if *platform != Platform::E1031 {
        return Ok((seconds, seconds));
    }
    E1031_TIMEOUTS
        .iter()
        .copied()
        .find(|&(_, period)| period >= seconds)
        .ok_or_else(|| {
            Error::InvalidParameter(format!("E1031 watchdog cannot time out after {}s", seconds))
        })
}

/// Whole seconds left of `timeout` after `elapsed`.
fn seconds_left(timeout: i32, elapsed: Duration) -> i32 {
    let left = i64::from(timeout) - elapsed.as_secs() as i64;
    left.max(0) as i32
}

#[derive(Default)]
struct ArmState {
    file: Option<File>,
    armed_at: Option<Instant>,
    timeout: i32,
}

pub struct Watchdog {
    platform: Platform,
    device: PathBuf,
    sysfs_dir: PathBuf,
    state: Mutex<ArmState>,
}

impl Watchdog {
    pub fn new(config: &PlatformConfig, platform: Platform) -> Self {
        Self {
            platform,
            device: config.resolve(&config.watchdog_device),
            sysfs_dir: config.resolve(&config.watchdog_sysfs),
            state: Mutex::new(ArmState::default()),
        }
    }

    fn open(&self) -> Result<File> {
        OpenOptions::new()
            .write(true)
            .open(&self.device)
            .map_err(|e| Error::Hardware(format!("{}: {}", self.device.display(), e)))
    }

    /// Query the driver's identity and capabilities.
    ///
    /// Only available while armed, since opening the device starts it.
    pub fn support(&self) -> Result<WatchdogSupport> {
        let state = self.state.lock();
        let file = state
            .file
            .as_ref()
            .ok_or_else(|| Error::Unsupported("watchdog not armed".into()))?;
        let mut info = ioctl::WatchdogInfo {
            options: 0,
            firmware_version: 0,
            identity: [0; 32],
        };
        // SAFETY: `info` is a valid, writable watchdog_info.
        unsafe { ioctl::getsupport(file.as_raw_fd(), &mut info) }?;
        let end = info.identity.iter().position(|&b| b == 0).unwrap_or(info.identity.len());
        Ok(WatchdogSupport {
            identity: String::from_utf8_lossy(&info.identity[..end]).into_owned(),
            firmware_version: info.firmware_version,
            options: WatchdogOptions::from_bits_truncate(info.options),
        })
    }

    /// Arm, or re-arm with a new timeout. Returns the effective timeout.
    pub fn arm_timeout(&self, seconds: i32) -> Result<i32> {
        let (value, effective) = timeout_setting(&self.platform, seconds)?;
        let mut state = self.state.lock();
        let already_armed = state.file.is_some();
        let file = match state.file.take() {
            Some(file) => file,
            None => self.open()?,
        };

        match self.program(&file, value, effective, already_armed) {
            Ok(effective) => {
                state.file = Some(file);
                state.armed_at = Some(Instant::now());
                state.timeout = effective;
                info!(device = %self.device.display(), timeout = effective, "Watchdog armed");
                Ok(effective)
            }
            Err(e) => {
                // A running timer stays held; a fresh open is dropped.
                if already_armed {
                    state.file = Some(file);
                }
                Err(e)
            }
        }
    }

    fn program(&self, file: &File, mut value: i32, effective: i32, already_armed: bool) -> Result<i32> {
        let fd = file.as_raw_fd();
        // SAFETY: `fd` is open for the life of `file` and `value` is a live c_int.
        unsafe { ioctl::settimeout(fd, &mut value) }?;
        if already_armed {
            let mut dummy = 0;
            // SAFETY: `dummy` is a live c_int; the driver ignores its value.
            unsafe { ioctl::keepalive(fd, &mut dummy) }?;
        } else {
            let mut option = ioctl::WDIOS_ENABLECARD;
            // SAFETY: `option` is a live c_int holding a WDIOS_* flag.
            unsafe { ioctl::setoptions(fd, &mut option) }?;
        }
        // E1031 reports back its timeout code; everyone else rounds to
        // what the hardware can do and reports seconds.
        Ok(if self.platform == Platform::E1031 { effective } else { value })
    }

    /// Stop the timer and close the device with the magic character.
    pub fn disarm_timer(&self) -> Result<()> {
        let mut state = self.state.lock();
        let was_held = state.file.is_some();
        let mut file = match state.file.take() {
            Some(file) => file,
            None => self.open()?,
        };

        let mut option = ioctl::WDIOS_DISABLECARD;
        // SAFETY: `option` is a valid c_int.
        let stopped = unsafe { ioctl::setoptions(file.as_raw_fd(), &mut option) }
            .map_err(Error::from)
            .and_then(|_| file.write_all(b"V").map_err(Error::from));
        if let Err(e) = stopped {
            if was_held {
                state.file = Some(file);
            }
            return Err(e);
        }

        *state = ArmState::default();
        info!(device = %self.device.display(), "Watchdog disarmed");
        Ok(())
    }

    pub async fn read_armed(&self) -> Result<bool> {
        let state = sysfs::read_string(&self.sysfs_dir.join("state")).await?;
        Ok(state.trim() == "active")
    }

    /// Seconds to expiry: from the driver when the device is held, else from
    /// the `timeleft` attribute, else counted from when it was armed.
    pub async fn read_remaining(&self) -> Result<i32> {
        let (ioctl_left, armed) = {
            let state = self.state.lock();
            let ioctl_left = state.file.as_ref().map(|file| {
                let mut left = 0;
                // SAFETY: `left` is a valid c_int.
                unsafe { ioctl::gettimeleft(file.as_raw_fd(), &mut left) }.map(|_| left)
            });
            (ioctl_left, state.armed_at.map(|at| (at, state.timeout)))
        };

        match ioctl_left {
            Some(Ok(left)) => return Ok(left),
            Some(Err(errno)) => debug!(%errno, "WDIOC_GETTIMELEFT failed"),
            None => {}
        }
        match sysfs::read_int(&self.sysfs_dir.join("timeleft")).await {
            Ok(left) => return Ok(left as i32),
            Err(e) => debug!(error = %e, "No watchdog timeleft attribute"),
        }
        armed
            .map(|(at, timeout)| seconds_left(timeout, at.elapsed()))
            .ok_or_else(|| Error::Unsupported("remaining time unknown".into()))
    }

    /// Timeout currently programmed in the driver.
    pub fn read_timeout(&self) -> Result<i32> {
        let state = self.state.lock();
        let file = state
            .file
            .as_ref()
            .ok_or_else(|| Error::Unsupported("watchdog not armed".into()))?;
        let mut timeout = 0;
        // SAFETY: `timeout` is a valid c_int.
        unsafe { ioctl::gettimeout(file.as_raw_fd(), &mut timeout) }?;
        Ok(timeout)
    }
}

#[async_trait]
impl WatchdogBase for Watchdog {
    async fn arm(&self, seconds: i32) -> i32 {
        self.arm_timeout(seconds).unwrap_or_else(|e| {
            warn!(seconds, error = %e, "Cannot arm watchdog");
            -1
        })
    }

    async fn disarm(&self) -> bool {
        match self.disarm_timer() {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Cannot disarm watchdog");
                false
            }
        }
    }

    async fn is_armed(&self) -> bool {
        self.read_armed().await.unwrap_or_else(|e| {
            debug!(error = %e, "Cannot read watchdog state");
            false
        })
    }

    async fn get_remaining_time(&self) -> i32 {
        let held = self.state.lock().armed_at.is_some();
        if !held && !self.is_armed().await {
            return -1;
        }
        self.read_remaining().await.unwrap_or_else(|e| {
            debug!(error = %e, "Cannot read watchdog time left");
            -1
        })
    }
}

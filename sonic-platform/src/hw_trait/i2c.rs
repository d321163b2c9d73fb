//! I2C bus access.
//!
//! [`I2c`] is the interface drivers are written against. Two Linux
//! implementations exist: [`I2cDev`] talks to `/dev/i2c-N` directly, and
//! [`I2cTool`] shells out to i2c-tools, which is what works on boards where
//! a kernel driver already claims the address and the bus mux needs `-f`.

use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use crate::error::{Error, Result};
use crate::hw_trait::sysfs::parse_hex;
use crate::tracing::prelude::*;

/// Byte-oriented I2C master.
#[async_trait]
pub trait I2c: Send {
    /// Write `data` to the device at `addr`.
    async fn write(&mut self, addr: u8, data: &[u8]) -> Result<()>;

    /// Write `write` then read `read.len()` bytes back from `addr`.
    async fn write_read(&mut self, addr: u8, write: &[u8], read: &mut [u8]) -> Result<()>;
}

/// Read `len` bytes starting at register `offset`.
pub async fn read_bytes<I: I2c + ?Sized>(
    i2c: &mut I,
    addr: u8,
    offset: u8,
    len: usize,
) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    i2c.write_read(addr, &[offset], &mut buf).await?;
    Ok(buf)
}

/// I2C through the `i2cget`/`i2cset` command-line tools.
///
/// Every byte is a separate process, so this is only suitable for the
/// handful of bytes read by the optics and version helpers.
#[derive(Debug, Clone)]
pub struct I2cTool {
    bus: u32,
    i2cget: PathBuf,
    i2cset: PathBuf,
}

impl I2cTool {
    pub fn new(bus: u32) -> Self {
        Self::with_programs(bus, "i2cget", "i2cset")
    }

    /// Use specific tool binaries instead of looking them up in `PATH`.
    pub fn with_programs(bus: u32, i2cget: impl Into<PathBuf>, i2cset: impl Into<PathBuf>) -> Self {
        Self {
            bus,
            i2cget: i2cget.into(),
            i2cset: i2cset.into(),
        }
    }

    pub fn bus(&self) -> u32 {
        self.bus
    }

    async fn run(&self, program: &Path, args: &[String]) -> Result<String> {
        trace!(program = %program.display(), ?args, "Running i2c tool");
        let output = Command::new(program)
            .args(["-f", "-y"])
            .args(args)
            .output()
            .await
            .map_err(|e| Error::Command(format!("{}: {}", program.display(), e)))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() || !stderr.trim().is_empty() {
            return Err(Error::Command(format!(
                "{} {} failed ({}): {}",
                program.display(),
                args.join(" "),
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn get_byte(&self, addr: u8, offset: u8) -> Result<u8> {
        let args = [
            self.bus.to_string(),
            format!("0x{:02x}", addr),
            format!("0x{:02x}", offset),
        ];
        let raw = self.run(&self.i2cget, &args).await?;
        parse_hex(&raw)
            .and_then(|v| u8::try_from(v).ok())
            .ok_or_else(|| Error::Parse(format!("i2cget returned {:?}", raw)))
    }
}

#[async_trait]
impl I2c for I2cTool {
    async fn write(&mut self, addr: u8, data: &[u8]) -> Result<()> {
        let Some((&reg, values)) = data.split_first() else {
            return Err(Error::InvalidParameter("empty I2C write".into()));
        };
        if values.is_empty() {
            // SMBus send byte: the register byte is the whole message.
            let args = [
                self.bus.to_string(),
                format!("0x{:02x}", addr),
                format!("0x{:02x}", reg),
            ];
            self.run(&self.i2cset, &args).await?;
            return Ok(());
        }
        for (i, value) in values.iter().enumerate() {
            let args = [
                self.bus.to_string(),
                format!("0x{:02x}", addr),
                format!("0x{:02x}", reg.wrapping_add(i as u8)),
                format!("0x{:02x}", value),
            ];
            self.run(&self.i2cset, &args).await?;
        }
        Ok(())
    }

    async fn write_read(&mut self, addr: u8, write: &[u8], read: &mut [u8]) -> Result<()> {
        let &[offset] = write else {
            return Err(Error::InvalidParameter(format!(
                "i2cget needs a single register byte, got {} bytes",
                write.len()
            )));
        };
        for (i, byte) in read.iter_mut().enumerate() {
            *byte = self.get_byte(addr, offset.wrapping_add(i as u8)).await?;
        }
        Ok(())
    }
}

// Mirrors of <linux/i2c.h> and <linux/i2c-dev.h>.
mod ffi {
    pub const I2C_RDWR: u32 = 0x0707;
    pub const I2C_M_RD: u16 = 0x0001;

    #[repr(C)]
    pub struct I2cMsg {
        pub addr: u16,
        pub flags: u16,
        pub len: u16,
        pub buf: *mut u8,
    }

    #[repr(C)]
    pub struct I2cRdwrIoctlData {
        pub msgs: *mut I2cMsg,
        pub nmsgs: u32,
    }

    nix::ioctl_write_ptr_bad!(i2c_rdwr, I2C_RDWR, I2cRdwrIoctlData);
}

use ffi::{I2cMsg, I2cRdwrIoctlData, I2C_M_RD};

/// Direct access to an I2C adapter through `/dev/i2c-N`.
///
/// Transfers use `I2C_RDWR` so a register write and the following read go
/// out as one combined transaction with a repeated start, which PMBus
/// devices require.
pub struct I2cDev {
    file: File,
    path: PathBuf,
}

impl I2cDev {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| Error::Hardware(format!("{}: {}", path.display(), e)))?;
        debug!(path = %path.display(), "Opened I2C adapter");
        Ok(Self { file, path })
    }

    fn transfer(&self, msgs: &mut [I2cMsg]) -> Result<()> {
        let data = I2cRdwrIoctlData {
            msgs: msgs.as_mut_ptr(),
            nmsgs: msgs.len() as u32,
        };
        // SAFETY: every message buffer outlives the call and its length
        // matches the slice it was taken from.
        unsafe { ffi::i2c_rdwr(self.file.as_raw_fd(), &data) }.map_err(|errno| {
            Error::Hardware(format!("{}: I2C_RDWR failed: {}", self.path.display(), errno))
        })?;
        Ok(())
    }
}

fn msg_len(len: usize) -> Result<u16> {
    u16::try_from(len).map_err(|_| Error::InvalidParameter(format!("I2C message of {} bytes", len)))
}

#[async_trait]
impl I2c for I2cDev {
    async fn write(&mut self, addr: u8, data: &[u8]) -> Result<()> {
        let mut buf = data.to_vec();
        let mut msgs = [I2cMsg {
            addr: addr as u16,
            flags: 0,
            len: msg_len(buf.len())?,
            buf: buf.as_mut_ptr(),
        }];
        self.transfer(&mut msgs)
    }

    async fn write_read(&mut self, addr: u8, write: &[u8], read: &mut [u8]) -> Result<()> {
        let mut wbuf = write.to_vec();
        let mut msgs = [
            I2cMsg {
                addr: addr as u16,
                flags: 0,
                len: msg_len(wbuf.len())?,
                buf: wbuf.as_mut_ptr(),
            },
            I2cMsg {
                addr: addr as u16,
                flags: I2C_M_RD,
                len: msg_len(read.len())?,
                buf: read.as_mut_ptr(),
            },
        ];
        self.transfer(&mut msgs)
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Register-file I2C device for driver tests.

    use super::*;
    use std::collections::HashMap;

    /// Two kinds of device. EEPROM-like devices are a window of byte
    /// registers that reads walk through; command devices (PMBus) answer a
    /// fixed reply per command code. A command reply wins over the window.
    #[derive(Default)]
    pub(crate) struct MockI2c {
        pub registers: HashMap<(u8, u8), u8>,
        pub responses: HashMap<(u8, u8), Vec<u8>>,
        pub writes: Vec<(u8, Vec<u8>)>,
        pub fail: bool,
    }

    impl MockI2c {
        pub fn new() -> Self {
            Self::default()
        }

        /// Fill the register window of `addr` starting at `reg`.
        pub fn set(&mut self, addr: u8, reg: u8, bytes: &[u8]) {
            for (i, b) in bytes.iter().enumerate() {
                self.registers.insert((addr, reg.wrapping_add(i as u8)), *b);
            }
        }

        /// Reply with `bytes` whenever `command` is read from `addr`.
        pub fn set_response(&mut self, addr: u8, command: u8, bytes: &[u8]) {
            self.responses.insert((addr, command), bytes.to_vec());
        }

        /// Little-endian word reply, as SMBus read-word returns it.
        pub fn set_word(&mut self, addr: u8, command: u8, word: u16) {
            self.set_response(addr, command, &word.to_le_bytes());
        }
    }

    #[async_trait]
    impl I2c for MockI2c {
        async fn write(&mut self, addr: u8, data: &[u8]) -> Result<()> {
            if self.fail {
                return Err(Error::Hardware("mock bus failure".into()));
            }
            self.writes.push((addr, data.to_vec()));
            if let Some((&reg, values)) = data.split_first() {
                self.set(addr, reg, values);
            }
            Ok(())
        }

        async fn write_read(&mut self, addr: u8, write: &[u8], read: &mut [u8]) -> Result<()> {
            if self.fail {
                return Err(Error::Hardware("mock bus failure".into()));
            }
            let reg = write.first().copied().unwrap_or(0);
            if let Some(reply) = self.responses.get(&(addr, reg)) {
                if reply.len() < read.len() {
                    return Err(Error::Hardware(format!(
                        "command 0x{:02x} at 0x{:02x} replies {} bytes, {} wanted",
                        reg,
                        addr,
                        reply.len(),
                        read.len()
                    )));
                }
                read.copy_from_slice(&reply[..read.len()]);
                return Ok(());
            }
            for (i, byte) in read.iter_mut().enumerate() {
                *byte = *self
                    .registers
                    .get(&(addr, reg.wrapping_add(i as u8)))
                    .ok_or_else(|| Error::Hardware(format!("no device at 0x{:02x}", addr)))?;
            }
            Ok(())
        }
    }
}

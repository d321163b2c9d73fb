//! Small helpers for sysfs attributes.
//!
//! Attributes are single values terminated by a newline. Errors carry the
//! attribute path because a bare "No such file or directory" says nothing
//! about which of the dozens of attributes went missing.

use std::fmt::Display;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

fn with_path(path: &Path, e: io::Error) -> Error {
    Error::Io(io::Error::new(e.kind(), format!("{}: {}", path.display(), e)))
}

/// Read an attribute, trimming the trailing line terminator.
pub async fn read_string(path: &Path) -> Result<String> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| with_path(path, e))?;
    Ok(raw.trim_end_matches(['\r', '\n']).to_string())
}

/// Read a decimal integer attribute.
pub async fn read_int(path: &Path) -> Result<i64> {
    let raw = read_string(path).await?;
    raw.trim()
        .parse()
        .map_err(|_| Error::Parse(format!("{}: not an integer: {:?}", path.display(), raw)))
}

/// Read a hexadecimal attribute, with or without a `0x` prefix.
pub async fn read_hex(path: &Path) -> Result<u32> {
    let raw = read_string(path).await?;
    parse_hex(&raw)
        .ok_or_else(|| Error::Parse(format!("{}: not a hex value: {:?}", path.display(), raw)))
}

pub(crate) fn parse_hex(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw);
    u32::from_str_radix(digits, 16).ok()
}

/// Read a binary attribute such as an EEPROM image.
pub async fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| with_path(path, e))
}

/// Write a value to an attribute.
pub async fn write_value(path: &Path, value: impl Display) -> Result<()> {
    tokio::fs::write(path, value.to_string())
        .await
        .map_err(|e| with_path(path, e))
}

/// Read a CPLD register through a `getreg` attribute.
///
/// The baseboard driver latches the register named by the last write and
/// returns its value, in hex, on the next read.
pub async fn read_register(getreg: &Path, register: &str) -> Result<u32> {
    write_value(getreg, register).await?;
    read_hex(getreg).await
}

/// All files below `dir` whose name starts with `prefix`, sorted.
///
/// hwmon nests its attributes one directory down (`hwmon/hwmonN/...`) and
/// the `N` is assigned when the driver binds, so callers search instead of building
/// the path.
pub async fn find_files(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current)
            .await
            .map_err(|e| with_path(&current, e))?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let path = entry.path();
            if file_type.is_dir() {
                pending.push(path);
            } else if entry.file_name().to_string_lossy().starts_with(prefix) {
                found.push(path);
            }
        }
    }

    found.sort();
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_trims_line_endings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fan1_input");
        std::fs::write(&path, "8125\r\n").unwrap();

        assert_eq!(read_string(&path).await.unwrap(), "8125");
        assert_eq!(read_int(&path).await.unwrap(), 8125);
    }

    #[tokio::test]
    async fn test_read_int_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("value");
        std::fs::write(&path, "high\n").unwrap();

        let err = read_int(&path).await.unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[tokio::test]
    async fn test_missing_file_error_names_path() {
        let err = read_string(Path::new("/nonexistent/fan9_input"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/fan9_input"));
    }

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("0xfd"), Some(0xfd));
        assert_eq!(parse_hex("0X1F\n"), Some(0x1f));
        assert_eq!(parse_hex("a160"), Some(0xa160));
        assert_eq!(parse_hex("zz"), None);
    }

    #[tokio::test]
    async fn test_read_register_round_trip() {
        // A plain file echoes back what was written, like a driver that
        // returns the latched register's value.
        let dir = tempfile::tempdir().unwrap();
        let getreg = dir.path().join("getreg");

        assert_eq!(read_register(&getreg, "0xA160").await.unwrap(), 0xA160);
        assert_eq!(std::fs::read_to_string(&getreg).unwrap(), "0xA160");
    }

    #[tokio::test]
    async fn test_find_files_recurses() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("hwmon/hwmon3");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("in2_label"), "vout1\n").unwrap();
        std::fs::write(nested.join("in1_label"), "vin\n").unwrap();
        std::fs::write(nested.join("curr1_label"), "iout1\n").unwrap();

        let found = find_files(&dir.path().join("hwmon"), "in").await.unwrap();
        assert_eq!(found, vec![nested.join("in1_label"), nested.join("in2_label")]);
    }
}

//! IPMI FRU inventory decoding.
//!
//! PSU EEPROMs carry a Platform Management FRU image. Only the product info
//! area is of interest here: it holds the model (part number) and serial
//! number reported to SONiC.
//!
//! Reference: IPMI Platform Management FRU Information Storage Definition
//! v1.0, sections 8 (common header), 11 (product info area) and 13
//! (type/length byte).

use crate::error::{Error, Result};
use crate::tracing::prelude::*;

/// Common header byte giving the product info area offset in 8-byte units
const PRODUCT_AREA_OFFSET_BYTE: usize = 4;
/// Type/length byte marking the end of the field list
const END_OF_FIELDS: u8 = 0xC1;

/// Field encoding, bits 7:6 of the type/length byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldType {
    Binary,
    BcdPlus,
    SixBitAscii,
    Text,
}

impl FieldType {
    fn from_type_length(tl: u8) -> Self {
        match tl >> 6 {
            0b00 => FieldType::Binary,
            0b01 => FieldType::BcdPlus,
            0b10 => FieldType::SixBitAscii,
            _ => FieldType::Text,
        }
    }

    fn decode(self, bytes: &[u8]) -> String {
        match self {
            FieldType::Binary => hex::encode(bytes),
            FieldType::BcdPlus => bytes
                .iter()
                .flat_map(|b| [b >> 4, b & 0x0F])
                .map(|nibble| match nibble {
                    0..=9 => (b'0' + nibble) as char,
                    0xA => ' ',
                    0xB => '-',
                    0xC => '.',
                    _ => '?',
                })
                .collect::<String>()
                .trim()
                .to_string(),
            FieldType::SixBitAscii => {
                // Characters are packed LSB first, four to every three bytes.
                let mut out = String::new();
                let mut acc: u32 = 0;
                let mut nbits = 0;
                for &b in bytes {
                    acc |= (b as u32) << nbits;
                    nbits += 8;
                    while nbits >= 6 {
                        out.push((0x20 + (acc & 0x3F) as u8) as char);
                        acc >>= 6;
                        nbits -= 6;
                    }
                }
                out.trim_end().to_string()
            }
            FieldType::Text => String::from_utf8_lossy(bytes)
                .trim_matches(|c: char| c == '\0' || c.is_whitespace())
                .to_string(),
        }
    }
}

/// Decoded product info area.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductInfo {
    pub language: u8,
    pub manufacturer: String,
    pub product_name: String,
    /// Part/model number
    pub part_number: String,
    pub version: String,
    pub serial_number: String,
    pub asset_tag: String,
}

impl ProductInfo {
    /// Decode the product info area of a FRU image.
    ///
    /// Returns `Ok(None)` when the common header says there is no product
    /// area. Any field running past the end of `data` is an error.
    pub fn decode(data: &[u8]) -> Result<Option<Self>> {
        let offset = *data
            .get(PRODUCT_AREA_OFFSET_BYTE)
            .ok_or_else(|| Error::Parse(format!("FRU image too short ({} bytes)", data.len())))?;
        if offset == 0 {
            return Ok(None);
        }

        let start = offset as usize * 8;
        let header = data.get(start..start + 3).ok_or_else(|| {
            Error::Parse(format!("product area at {} beyond image of {} bytes", start, data.len()))
        })?;
        let (format, area_len, language) = (header[0], header[1] as usize * 8, header[2]);
        if format != 0x01 {
            debug!(format, "Unexpected FRU product area format version");
        }
        verify_checksum(data, start, area_len);

        let mut fields = Vec::with_capacity(6);
        let mut pos = start + 3;
        while fields.len() < 6 {
            let tl = *data
                .get(pos)
                .ok_or_else(|| Error::Parse(format!("FRU field at {} beyond image", pos)))?;
            if tl == END_OF_FIELDS {
                break;
            }
            let len = (tl & 0x3F) as usize;
            let bytes = data.get(pos + 1..pos + 1 + len).ok_or_else(|| {
                Error::Parse(format!("FRU field at {} of {} bytes overruns image", pos, len))
            })?;
            fields.push(FieldType::from_type_length(tl).decode(bytes));
            pos += 1 + len;
        }
        fields.resize(6, String::new());

        let mut fields = fields.into_iter();
        let mut next = || fields.next().unwrap_or_default();
        Ok(Some(ProductInfo {
            language,
            manufacturer: next(),
            product_name: next(),
            part_number: next(),
            version: next(),
            serial_number: next(),
            asset_tag: next(),
        }))
    }
}

// The area's bytes, checksum included, sum to zero.
fn verify_checksum(data: &[u8], start: usize, len: usize) {
    let Some(area) = data.get(start..start + len).filter(|a| !a.is_empty()) else {
        debug!(start, len, "FRU product area not fully present, checksum skipped");
        return;
    };
    let sum = area.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    if sum != 0 {
        warn!(start, len, sum, "FRU product area checksum mismatch");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn text(field: &str) -> Vec<u8> {
        let mut out = vec![0xC0 | field.len() as u8];
        out.extend_from_slice(field.as_bytes());
        out
    }

    /// A FRU image with a product area at offset 8 holding `fields`.
    pub(crate) fn fru_image(fields: &[&str]) -> Vec<u8> {
        let mut area = vec![0x01, 0x00, 0x19];
        for f in fields {
            area.extend(text(f));
        }
        area.push(END_OF_FIELDS);
        // Pad to a multiple of 8 including the checksum byte.
        while (area.len() + 1) % 8 != 0 {
            area.push(0);
        }
        area[1] = ((area.len() + 1) / 8) as u8;
        let sum = area.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        area.push(0u8.wrapping_sub(sum));

        let mut image = vec![0x01, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0xFE];
        image.extend(area);
        image
    }

    #[test]
    fn test_decode_psu_product_area() {
        let image = fru_image(&["DELTA", "DPS-550AB", "TDPS550AB39", "S1F", "DSTH1905002177", ""]);
        let info = ProductInfo::decode(&image).unwrap().unwrap();
        assert_eq!(info.manufacturer, "DELTA");
        assert_eq!(info.product_name, "DPS-550AB");
        assert_eq!(info.part_number, "TDPS550AB39");
        assert_eq!(info.serial_number, "DSTH1905002177");
        assert_eq!(info.asset_tag, "");
        assert_eq!(info.language, 0x19);
    }

    #[test]
    fn test_serial_longer_than_fifteen_bytes() {
        let serial = "GR8PW1911210009AB";
        let image = fru_image(&["ACME", "PSU", "PN-1", "A0", serial]);
        let info = ProductInfo::decode(&image).unwrap().unwrap();
        assert_eq!(info.serial_number, serial);
    }

    #[test]
    fn test_early_end_marker_leaves_fields_empty() {
        let image = fru_image(&["ACME", "PSU"]);
        let info = ProductInfo::decode(&image).unwrap().unwrap();
        assert_eq!(info.product_name, "PSU");
        assert_eq!(info.part_number, "");
        assert_eq!(info.serial_number, "");
    }

    #[test]
    fn test_no_product_area() {
        let image = [0x01, 0, 0, 0, 0, 0, 0, 0xFF];
        assert_eq!(ProductInfo::decode(&image).unwrap(), None);
    }

    #[test]
    fn test_truncated_image_is_error() {
        let mut image = fru_image(&["ACME", "PSU", "PN-1", "A0", "SN123"]);
        image.truncate(20);
        assert!(ProductInfo::decode(&image).is_err());
        assert!(ProductInfo::decode(&[0x01, 0x00]).is_err());
    }

    #[test]
    fn test_field_encodings() {
        assert_eq!(FieldType::Binary.decode(&[0xDE, 0xAD]), "dead");
        assert_eq!(FieldType::BcdPlus.decode(&[0x12, 0xB3]), "12-3");
        // "ABCD" in 6-bit ASCII
        assert_eq!(FieldType::SixBitAscii.decode(&[0xA1, 0x38, 0x92]), "ABCD");
        assert_eq!(FieldType::from_type_length(0xC5), FieldType::Text);
        assert_eq!(FieldType::from_type_length(0x83), FieldType::SixBitAscii);
    }
}

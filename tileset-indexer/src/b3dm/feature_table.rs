//! b3dm feature table.

use crate::error::{IndexerError, Result};
use crate::geodesy::Cartesian3;
use byteorder::{ByteOrder, LittleEndian as LE};
use serde::Deserialize;

/// A global feature-table value, stored inline or in the binary body.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GlobalValue<T> {
    Inline(T),
    Binary {
        #[serde(rename = "byteOffset")]
        byte_offset: usize,
    },
}

#[derive(Debug, Default, Deserialize)]
struct FeatureTableJson {
    #[serde(rename = "BATCH_LENGTH")]
    batch_length: Option<GlobalValue<usize>>,
    #[serde(rename = "RTC_CENTER")]
    rtc_center: Option<GlobalValue<[f64; 3]>>,
}

/// Globals of a batched model.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FeatureTable {
    /// Number of distinguishable features in the tile
    pub batch_length: usize,
    /// Center that vertex positions are relative to
    pub rtc_center: Option<Cartesian3>,
}

impl FeatureTable {
    pub fn parse(json: &[u8], binary: &[u8], context: &str) -> Result<Self> {
        if json.iter().all(|b| b.is_ascii_whitespace() || *b == 0) {
            return Ok(Self::default());
        }

        let raw: FeatureTableJson = serde_json::from_slice(trim_padding(json)).map_err(|e| {
            IndexerError::format(context, format!("invalid feature table JSON: {}", e))
        })?;

        let batch_length = match raw.batch_length {
            None => 0,
            Some(GlobalValue::Inline(n)) => n,
            Some(GlobalValue::Binary { byte_offset }) => {
                LE::read_u32(slice(binary, byte_offset, 4, "BATCH_LENGTH", context)?) as usize
            }
        };

        let rtc_center = match raw.rtc_center {
            None => None,
            Some(GlobalValue::Inline(c)) => Some(Cartesian3::from_array(c)),
            Some(GlobalValue::Binary { byte_offset }) => {
                let buf = slice(binary, byte_offset, 12, "RTC_CENTER", context)?;
                Some(Cartesian3::new(
                    LE::read_f32(&buf[0..4]) as f64,
                    LE::read_f32(&buf[4..8]) as f64,
                    LE::read_f32(&buf[8..12]) as f64,
                ))
            }
        };

        Ok(Self {
            batch_length,
            rtc_center,
        })
    }
}

/// Strips the trailing space/NUL padding tables are aligned with.
pub(crate) fn trim_padding(json: &[u8]) -> &[u8] {
    let end = json
        .iter()
        .rposition(|b| !b.is_ascii_whitespace() && *b != 0)
        .map_or(0, |i| i + 1);
    &json[..end]
}

fn slice<'a>(
    binary: &'a [u8],
    offset: usize,
    len: usize,
    name: &str,
    context: &str,
) -> Result<&'a [u8]> {
    offset
        .checked_add(len)
        .and_then(|end| binary.get(offset..end))
        .ok_or_else(|| {
            IndexerError::format(context, format!("{} lies outside the feature table body", name))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_values() {
        let json = br#"{"BATCH_LENGTH":12,"RTC_CENTER":[1.0,2.0,3.0]}  "#;
        let table = FeatureTable::parse(json, &[], "t.b3dm").unwrap();
        assert_eq!(table.batch_length, 12);
        assert_eq!(table.rtc_center, Some(Cartesian3::new(1.0, 2.0, 3.0)));
    }

    #[test]
    fn test_binary_values() {
        let mut binary = Vec::new();
        binary.extend_from_slice(&5u32.to_le_bytes());
        for v in [10.0f32, -20.0, 30.5] {
            binary.extend_from_slice(&v.to_le_bytes());
        }
        let json = br#"{"BATCH_LENGTH":{"byteOffset":0},"RTC_CENTER":{"byteOffset":4}}"#;

        let table = FeatureTable::parse(json, &binary, "t.b3dm").unwrap();
        assert_eq!(table.batch_length, 5);
        assert_eq!(table.rtc_center, Some(Cartesian3::new(10.0, -20.0, 30.5)));
    }

    #[test]
    fn test_binary_out_of_range() {
        let json = br#"{"BATCH_LENGTH":{"byteOffset":2}}"#;
        let err = FeatureTable::parse(json, &[0, 0, 0], "t.b3dm").unwrap_err();
        assert!(err.to_string().contains("BATCH_LENGTH"));
    }

    #[test]
    fn test_empty_table() {
        let table = FeatureTable::parse(b"    ", &[], "t.b3dm").unwrap();
        assert_eq!(table, FeatureTable::default());
    }
}

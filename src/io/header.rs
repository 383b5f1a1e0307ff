//! Flat `KEY = VALUE` sensor header parsing (Landsat MTL style)

use crate::types::{AtmoError, AtmoResult};
use chrono::{NaiveDate, NaiveTime};
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

/// Parsed header: every `KEY = VALUE` line outside the group markers
#[derive(Debug, Clone, Default)]
pub struct KeyValueHeader {
    values: HashMap<String, String>,
}

impl KeyValueHeader {
    pub fn from_file(path: &Path) -> AtmoResult<Self> {
        log::info!("Reading sensor header: {}", path.display());
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> AtmoResult<Self> {
        let line_re = Regex::new(r"^\s*([A-Za-z0-9_]+)\s*=\s*(.*?)\s*$")
            .map_err(|e| AtmoError::Processing(format!("Header pattern: {}", e)))?;

        let mut values = HashMap::new();
        for line in text.lines() {
            let Some(caps) = line_re.captures(line) else {
                continue;
            };
            let key = &caps[1];
            if key == "GROUP" || key == "END_GROUP" {
                continue;
            }
            let value = caps[2].trim_matches('"').trim().to_string();
            values.insert(key.to_string(), value);
        }

        log::debug!("Parsed {} header fields", values.len());
        Ok(Self { values })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get(&self, key: &str) -> AtmoResult<&str> {
        self.values
            .get(key)
            .map(|s| s.as_str())
            .ok_or_else(|| AtmoError::MissingHeaderField(key.to_string()))
    }

    /// Parse the value of `key` into any `FromStr` type
    pub fn parse_value<T: FromStr>(&self, key: &str) -> AtmoResult<T> {
        let raw = self.get(key)?;
        raw.parse::<T>().map_err(|_| {
            AtmoError::InvalidFormat(format!("Header field {} has unexpected value '{}'", key, raw))
        })
    }

    /// `YYYY-MM-DD` date value
    pub fn date(&self, key: &str) -> AtmoResult<NaiveDate> {
        let raw = self.get(key)?;
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map_err(|e| AtmoError::InvalidFormat(format!("Header field {} is not a date ({}): {}", key, raw, e)))
    }

    /// `HH:MM:SS[.fff][Z]` time value, fractional seconds dropped
    pub fn time(&self, key: &str) -> AtmoResult<NaiveTime> {
        let raw = self.get(key)?;
        let trimmed = raw.trim_end_matches('Z');
        let whole = trimmed.split('.').next().unwrap_or(trimmed);
        NaiveTime::parse_from_str(whole, "%H:%M:%S")
            .map_err(|e| AtmoError::InvalidFormat(format!("Header field {} is not a time ({}): {}", key, raw, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    const SAMPLE: &str = r#"GROUP = L1_METADATA_FILE
  GROUP = PRODUCT_METADATA
    SPACECRAFT_ID = "LANDSAT_1"
    SENSOR_ID = "MSS"
    DATE_ACQUIRED = 1972-08-15
    SCENE_CENTER_TIME = "15:12:34.1230000Z"
    CORNER_UL_LAT_PRODUCT = 42.51234
  END_GROUP = PRODUCT_METADATA
END_GROUP = L1_METADATA_FILE
END
"#;

    #[test]
    fn test_parse_strips_quotes_and_groups() {
        let header = KeyValueHeader::parse(SAMPLE).unwrap();
        assert_eq!(header.len(), 5);
        assert!(!header.contains("GROUP"));
        assert_eq!(header.get("SPACECRAFT_ID").unwrap(), "LANDSAT_1");
        assert_eq!(header.get("SENSOR_ID").unwrap(), "MSS");
        let lat: f64 = header.parse_value("CORNER_UL_LAT_PRODUCT").unwrap();
        assert_eq!(lat, 42.51234);
    }

    #[test]
    fn test_date_and_time() {
        let header = KeyValueHeader::parse(SAMPLE).unwrap();
        let date = header.date("DATE_ACQUIRED").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(1972, 8, 15).unwrap());
        let time = header.time("SCENE_CENTER_TIME").unwrap();
        assert_eq!((time.hour(), time.minute(), time.second()), (15, 12, 34));
    }

    #[test]
    fn test_missing_and_malformed_fields() {
        let header = KeyValueHeader::parse(SAMPLE).unwrap();
        assert!(matches!(
            header.get("WRS_ROW"),
            Err(AtmoError::MissingHeaderField(_))
        ));
        assert!(matches!(
            header.parse_value::<f64>("SENSOR_ID"),
            Err(AtmoError::InvalidFormat(_))
        ));
    }
}

//! Time-of-day energy budget forecast.
//!
//! Each device has two arrays of [`BUCKETS_PER_DAY`] values: the estimated consumption and the
//! flexibility headroom. The budget of a device in a bucket is the sum of both.

use std::{collections::HashMap, path::Path, time::Duration};

use log::warn;

use crate::error::Error;

/// Number of 15-minute buckets in a day.
pub const BUCKETS_PER_DAY: usize = 96;
/// Length of a bucket.
pub const BUCKET_LENGTH: Duration = Duration::from_secs(15 * 60);

/// Index of the 15-minute time-of-day bucket containing `now`. Time wraps around every 24 hours.
pub fn bucket_index(now: Duration) -> usize {
    let secs = now.as_secs();
    let hour = (secs / 3600) % 24;
    let minute = (secs / 60) % 60;
    (hour * 4 + minute / 15) as usize
}

/// Source of the per-device forecast. Devices are identified by the registered switch name.
pub trait ForecastSource: std::fmt::Debug {
    /// Estimated consumption of the device in the bucket.
    fn estimate(&self, device: &str, bucket: usize) -> Option<f64>;

    /// Flexibility headroom of the device in the bucket.
    fn flex_headroom(&self, device: &str, bucket: usize) -> Option<f64>;

    /// Energy budget of the device in the bucket: estimate plus headroom.
    fn budget(&self, device: &str, bucket: usize) -> Result<f64, Error> {
        match (
            self.estimate(device, bucket),
            self.flex_headroom(device, bucket),
        ) {
            (Some(e), Some(f)) => Ok(e + f),
            _ => Err(Error::MissingForecast {
                device: device.to_string(),
                bucket,
            }),
        }
    }
}

/// In-memory forecast table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForecastTable {
    estimate: HashMap<String, Vec<f64>>,
    flex: HashMap<String, Vec<f64>>,
}

impl ForecastTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from the estimate and headroom maps.
    pub fn from_maps(estimate: HashMap<String, Vec<f64>>, flex: HashMap<String, Vec<f64>>) -> Self {
        Self { estimate, flex }
    }

    /// Parse both arrays from JSON documents of the form `{ "<device>": [v0, v1, ...] }`.
    pub fn from_json_str(estimate: &str, flex: &str) -> Result<Self, Error> {
        Ok(Self::from_maps(
            serde_json::from_str(estimate)?,
            serde_json::from_str(flex)?,
        ))
    }

    /// Read both JSON documents from disk.
    pub fn load(estimate: impl AsRef<Path>, flex: impl AsRef<Path>) -> Result<Self, Error> {
        let table = Self::from_json_str(
            &std::fs::read_to_string(estimate)?,
            &std::fs::read_to_string(flex)?,
        )?;
        for (device, values) in table.estimate.iter().chain(table.flex.iter()) {
            if values.len() < BUCKETS_PER_DAY {
                warn!(
                    "Forecast for {device} only covers {} of {BUCKETS_PER_DAY} buckets",
                    values.len()
                );
            }
        }
        Ok(table)
    }

    /// Use the same estimate and headroom for every bucket of the device.
    pub fn insert_constant(&mut self, device: impl Into<String>, estimate: f64, flex: f64) {
        let device = device.into();
        self.estimate
            .insert(device.clone(), vec![estimate; BUCKETS_PER_DAY]);
        self.flex.insert(device, vec![flex; BUCKETS_PER_DAY]);
    }

    /// Set the arrays of a device, replacing any previous entry.
    pub fn insert(&mut self, device: impl Into<String>, estimate: Vec<f64>, flex: Vec<f64>) {
        let device = device.into();
        self.estimate.insert(device.clone(), estimate);
        self.flex.insert(device, flex);
    }

    /// Returns `true` if the table has both arrays for the device.
    pub fn contains(&self, device: &str) -> bool {
        self.estimate.contains_key(device) && self.flex.contains_key(device)
    }
}

impl ForecastSource for ForecastTable {
    fn estimate(&self, device: &str, bucket: usize) -> Option<f64> {
        self.estimate.get(device)?.get(bucket).copied()
    }

    fn flex_headroom(&self, device: &str, bucket: usize) -> Option<f64> {
        self.flex.get(device)?.get(bucket).copied()
    }
}

#[cfg(test)]
mod test {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn buckets() {
        assert_eq!(bucket_index(Duration::ZERO), 0);
        assert_eq!(bucket_index(Duration::from_secs(14 * 60 + 59)), 0);
        assert_eq!(bucket_index(Duration::from_secs(15 * 60)), 1);
        assert_eq!(bucket_index(Duration::from_secs(3600 + 50 * 60)), 7);
        assert_eq!(bucket_index(Duration::from_secs(23 * 3600 + 59 * 60)), 95);
        assert_eq!(bucket_index(Duration::from_secs(24 * 3600 + 15 * 60)), 1);
    }

    #[test]
    fn json_table() {
        let table = ForecastTable::from_json_str(
            r#"{ "s0": [10.0, 20.0], "s1": [1.0] }"#,
            r#"{ "s0": [1.5, 2.5] }"#,
        )
        .unwrap();
        assert!(table.contains("s0"));
        assert!(!table.contains("s1"));
        assert_relative_eq!(table.budget("s0", 1).unwrap(), 22.5);
        assert!(matches!(
            table.budget("s0", 2),
            Err(Error::MissingForecast { bucket: 2, .. })
        ));
        assert!(table.budget("s1", 0).is_err());
        assert!(ForecastTable::from_json_str("[1, 2]", "{}").is_err());
    }

    #[test]
    fn constant_table() {
        let mut table = ForecastTable::new();
        table.insert_constant("s0", 70.0, 30.0);
        assert_relative_eq!(table.budget("s0", 0).unwrap(), 100.0);
        assert_relative_eq!(table.budget("s0", BUCKETS_PER_DAY - 1).unwrap(), 100.0);
    }
}

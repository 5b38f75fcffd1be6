//! Persisted user settings and fetch statistics.
//!
//! Both are small JSON blobs in the key-value store. Reads never fail: a
//! missing or undecodable blob yields the default value and a log line.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use headwind_core::StorageError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::storage::{decode_json, encode_json, KeyValueStore, ValueWatch};
use crate::types::{GpsCoordinate, PrecipitationUnit, WindSpeedUnit};

pub const SETTINGS_KEY: &str = "settings";
pub const STATS_KEY: &str = "stats";

/// User preferences that parametrize weather requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadwindSettings {
    pub wind_unit: WindSpeedUnit,
    pub precipitation_unit: PrecipitationUnit,
    /// Follow the device position; when off, the configured fallback position is used
    pub use_gps: bool,
}

impl Default for HeadwindSettings {
    fn default() -> Self {
        Self {
            wind_unit: WindSpeedUnit::default(),
            precipitation_unit: PrecipitationUnit::default(),
            use_gps: true,
        }
    }
}

/// Bookkeeping about weather requests, shown on the settings screen
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchStats {
    /// Unix seconds
    pub last_successful_request: Option<i64>,
    pub last_successful_position: Option<GpsCoordinate>,
    /// Unix seconds
    pub last_failed_request: Option<i64>,
    pub failed_requests: u32,
}

impl FetchStats {
    pub fn record_success(&mut self, at: DateTime<Utc>, position: GpsCoordinate) {
        self.last_successful_request = Some(at.timestamp());
        self.last_successful_position = Some(position);
    }

    pub fn record_failure(&mut self, at: DateTime<Utc>) {
        self.last_failed_request = Some(at.timestamp());
        self.failed_requests = self.failed_requests.saturating_add(1);
    }
}

fn decode_or_default<T: DeserializeOwned + Default>(key: &str, bytes: Option<&[u8]>) -> T {
    match bytes {
        None => T::default(),
        Some(bytes) => decode_json(key, bytes).unwrap_or_else(|e| {
            tracing::error!("Failed to read {}: {}", key, e);
            T::default()
        }),
    }
}

/// Settings and statistics on top of a key-value store
#[derive(Clone)]
pub struct Preferences {
    store: Arc<dyn KeyValueStore>,
}

impl Preferences {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn load<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        match self.store.get(key) {
            Ok(bytes) => decode_or_default(key, bytes.as_deref()),
            Err(e) => {
                tracing::error!("Failed to load {}: {}", key, e);
                T::default()
            }
        }
    }

    pub fn settings(&self) -> HeadwindSettings {
        self.load(SETTINGS_KEY)
    }

    pub fn save_settings(&self, settings: &HeadwindSettings) -> Result<(), StorageError> {
        self.store
            .set(SETTINGS_KEY, encode_json(SETTINGS_KEY, settings)?)
    }

    pub fn stream_settings(&self) -> PreferenceStream<HeadwindSettings> {
        PreferenceStream::new(SETTINGS_KEY, self.store.watch(SETTINGS_KEY))
    }

    pub fn stats(&self) -> FetchStats {
        self.load(STATS_KEY)
    }

    pub fn save_stats(&self, stats: &FetchStats) -> Result<(), StorageError> {
        self.store.set(STATS_KEY, encode_json(STATS_KEY, stats)?)
    }

    pub fn stream_stats(&self) -> PreferenceStream<FetchStats> {
        PreferenceStream::new(STATS_KEY, self.store.watch(STATS_KEY))
    }
}

impl std::fmt::Debug for Preferences {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Preferences").finish_non_exhaustive()
    }
}

/// Live sequence of a decoded preference value.
///
/// Yields the current value first, then every distinct change.
#[derive(Debug)]
pub struct PreferenceStream<T> {
    key: &'static str,
    rx: ValueWatch,
    last: Option<T>,
}

impl<T> PreferenceStream<T>
where
    T: DeserializeOwned + Default + Clone + PartialEq,
{
    fn new(key: &'static str, mut rx: ValueWatch) -> Self {
        rx.mark_changed();
        Self {
            key,
            rx,
            last: None,
        }
    }

    /// Next distinct value, or `None` once the store is gone. Cancel safe.
    pub async fn next(&mut self) -> Option<T> {
        loop {
            self.rx.changed().await.ok()?;
            let value: T = decode_or_default(self.key, self.rx.borrow_and_update().as_deref());
            if self.last.as_ref() == Some(&value) {
                continue;
            }
            self.last = Some(value.clone());
            return Some(value);
        }
    }
}

use std::sync::Arc;

use headwind_core::StorageError;

use crate::storage::{decode_json, encode_json, KeyValueStore, ValueWatch};
use crate::types::WeatherSnapshot;

pub const CURRENT_WEATHER_KEY: &str = "current";

/// Latest successfully fetched weather, persisted in the key-value store.
///
/// Only [`WeatherCache::update`] writes the snapshot, and it always writes a
/// whole one. Failed fetches never reach the cache.
#[derive(Clone)]
pub struct WeatherCache {
    store: Arc<dyn KeyValueStore>,
}

impl WeatherCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Replace the stored snapshot.
    pub fn update(&self, snapshot: &WeatherSnapshot) -> Result<(), StorageError> {
        let bytes = encode_json(CURRENT_WEATHER_KEY, snapshot)?;
        self.store.set(CURRENT_WEATHER_KEY, bytes)?;
        tracing::info!(
            "Cached weather observed at {} (wind {}° at {})",
            snapshot.current.time,
            snapshot.current.wind_direction,
            snapshot.current.wind_speed
        );
        Ok(())
    }

    /// The stored snapshot regardless of age, if present and decodable.
    pub fn stored(&self) -> Option<WeatherSnapshot> {
        let bytes = match self.store.get(CURRENT_WEATHER_KEY) {
            Ok(bytes) => bytes?,
            Err(e) => {
                tracing::error!("Failed to read cached weather: {}", e);
                return None;
            }
        };

        match decode_json(CURRENT_WEATHER_KEY, &bytes) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::error!("Failed to decode cached weather: {}", e);
                None
            }
        }
    }

    /// The stored snapshot if it is inside the freshness window.
    pub fn current(&self) -> Option<WeatherSnapshot> {
        self.stored().filter(WeatherSnapshot::is_fresh)
    }

    /// Live sequence of fresh snapshots, starting with the stored one.
    pub fn stream_current(&self) -> WeatherStream {
        WeatherStream::new(self.store.watch(CURRENT_WEATHER_KEY))
    }
}

impl std::fmt::Debug for WeatherCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeatherCache").finish_non_exhaustive()
    }
}

/// Decoded, deduplicated, freshness-filtered view of the cached snapshot.
#[derive(Debug)]
pub struct WeatherStream {
    rx: ValueWatch,
    last: Option<WeatherSnapshot>,
}

impl WeatherStream {
    fn new(mut rx: ValueWatch) -> Self {
        rx.mark_changed();
        Self { rx, last: None }
    }

    /// Next fresh snapshot, or `None` once the store is gone.
    ///
    /// Corrupt blobs are logged and skipped; stale snapshots are skipped
    /// silently. Cancel safe.
    pub async fn next(&mut self) -> Option<WeatherSnapshot> {
        loop {
            self.rx.changed().await.ok()?;

            let decoded = match self.rx.borrow_and_update().as_deref() {
                None => continue,
                Some(bytes) => decode_json::<WeatherSnapshot>(CURRENT_WEATHER_KEY, bytes),
            };
            let snapshot = match decoded {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    tracing::error!("Failed to read cached weather: {}", e);
                    continue;
                }
            };

            if self.last.as_ref() == Some(&snapshot) {
                continue;
            }
            self.last = Some(snapshot.clone());

            if !snapshot.is_fresh() {
                tracing::debug!("Ignoring stale weather observed at {}", snapshot.current.time);
                continue;
            }

            return Some(snapshot);
        }
    }
}

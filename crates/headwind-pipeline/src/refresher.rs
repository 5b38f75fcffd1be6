use std::time::Duration;

use chrono::Utc;
use headwind_weather::{
    FetchStats, GpsCoordinate, Preferences, WeatherCache, WeatherError, WeatherProvider,
    WeatherSnapshot,
};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::location::LocationStream;

/// Keeps the weather cache current as the rider moves.
///
/// Every settled GPS position triggers one fetch. Successful responses replace
/// the cached snapshot; failures only touch the statistics. With GPS use turned
/// off in the settings and a fallback position configured, the fallback is
/// fetched instead and GPS positions are ignored. Changing the settings while
/// running refetches the current position with the new parameters.
#[derive(Debug, Clone)]
pub struct WeatherRefresher {
    provider: WeatherProvider,
    cache: WeatherCache,
    preferences: Preferences,
    fallback: Option<GpsCoordinate>,
    refresh_interval: Option<Duration>,
}

impl WeatherRefresher {
    pub fn new(provider: WeatherProvider, cache: WeatherCache, preferences: Preferences) -> Self {
        Self {
            provider,
            cache,
            preferences,
            fallback: None,
            refresh_interval: None,
        }
    }

    pub fn with_fallback(mut self, fallback: Option<GpsCoordinate>) -> Self {
        self.fallback = fallback;
        self
    }

    /// Refetch the last position periodically, in addition to on movement.
    pub fn with_refresh_interval(mut self, interval: Option<Duration>) -> Self {
        self.refresh_interval = interval.filter(|interval| !interval.is_zero());
        self
    }

    /// Fallback position when GPS use is turned off and one is configured.
    fn fixed_position(&self) -> Option<GpsCoordinate> {
        match self.fallback {
            Some(fallback) if !self.preferences.settings().use_gps => Some(fallback),
            _ => None,
        }
    }

    /// Fetch weather for `position` and record the outcome.
    pub async fn refresh(&self, position: GpsCoordinate) -> Result<WeatherSnapshot, WeatherError> {
        let settings = self.preferences.settings();
        let result = self.provider.fetch(position, &settings).await;

        let mut stats = self.preferences.stats();
        match result {
            Ok(snapshot) => {
                if let Err(e) = self.cache.update(&snapshot) {
                    stats.record_failure(Utc::now());
                    self.save_stats(&stats);
                    return Err(e.into());
                }
                stats.record_success(Utc::now(), position);
                self.save_stats(&stats);
                Ok(snapshot)
            }
            Err(e) => {
                stats.record_failure(Utc::now());
                self.save_stats(&stats);
                Err(e.into())
            }
        }
    }

    fn save_stats(&self, stats: &FetchStats) {
        if let Err(e) = self.preferences.save_stats(stats) {
            tracing::error!("Failed to save fetch stats: {}", e);
        }
    }

    async fn refresh_until_cancelled(&self, position: GpsCoordinate, cancel: &CancellationToken) {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("Dropping in-flight weather request");
            }
            result = self.refresh(position) => {
                if let Err(e) = result {
                    tracing::warn!("Weather refresh failed: {}", e);
                }
            }
        }
    }

    /// Drive refreshes until `cancel` fires.
    ///
    /// Owns `locations` so the host location listener goes away with the loop.
    pub async fn run(&self, mut locations: LocationStream, cancel: CancellationToken) {
        tracing::info!("Weather refresher started");

        let mut ticker = self.refresh_interval.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });
        let mut settings_stream = self.preferences.stream_settings();
        let mut settings = self.preferences.settings();
        let mut settings_done = false;
        let mut last_position: Option<GpsCoordinate> = None;
        let mut locations_done = false;

        if let Some(position) = self.fixed_position() {
            tracing::info!("Gps disabled, using fallback position {:?}", position);
            self.refresh_until_cancelled(position, &cancel).await;
        }

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                position = locations.next(), if !locations_done => match position {
                    Some(position) => {
                        last_position = Some(position);
                        if self.fixed_position().is_none() {
                            self.refresh_until_cancelled(position, &cancel).await;
                        }
                    }
                    None => {
                        tracing::debug!("Location stream ended");
                        locations_done = true;
                    }
                },
                changed = settings_stream.next(), if !settings_done => match changed {
                    Some(changed) if changed != settings => {
                        tracing::info!("Settings changed, refreshing weather");
                        settings = changed;
                        match self.fixed_position().or(last_position) {
                            Some(position) => self.refresh_until_cancelled(position, &cancel).await,
                            None => tracing::debug!("No position yet, skipping refresh"),
                        }
                    }
                    Some(_) => {}
                    None => {
                        tracing::debug!("Settings stream ended");
                        settings_done = true;
                    }
                },
                _ = tick(&mut ticker), if ticker.is_some() => {
                    match self.fixed_position().or(last_position) {
                        Some(position) => self.refresh_until_cancelled(position, &cancel).await,
                        None => tracing::debug!("No position yet, skipping periodic refresh"),
                    }
                }
            }
        }

        tracing::info!("Weather refresher stopped");
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use headwind_weather::{HeadwindSettings, MemoryStore};
    use std::sync::Arc;

    fn refresher() -> (Preferences, WeatherRefresher) {
        let store = Arc::new(MemoryStore::new());
        let preferences = Preferences::new(store.clone());
        let refresher = WeatherRefresher::new(
            WeatherProvider::new().unwrap(),
            WeatherCache::new(store),
            preferences.clone(),
        );
        (preferences, refresher)
    }

    #[test]
    fn test_fallback_only_applies_with_gps_disabled() {
        let fallback = GpsCoordinate::new(48.5, 9.25);
        let (preferences, refresher) = refresher();
        let refresher = refresher.with_fallback(Some(fallback));
        assert_eq!(refresher.fixed_position(), None);

        preferences
            .save_settings(&HeadwindSettings {
                use_gps: false,
                ..HeadwindSettings::default()
            })
            .unwrap();
        assert_eq!(refresher.fixed_position(), Some(fallback));
    }

    #[test]
    fn test_gps_disabled_without_fallback_keeps_following_gps() {
        let (preferences, refresher) = refresher();
        preferences
            .save_settings(&HeadwindSettings {
                use_gps: false,
                ..HeadwindSettings::default()
            })
            .unwrap();
        assert_eq!(refresher.fixed_position(), None);
    }

    #[test]
    fn test_zero_refresh_interval_disables_ticker() {
        let (_, refresher) = refresher();
        let refresher = refresher.with_refresh_interval(Some(Duration::ZERO));
        assert_eq!(refresher.refresh_interval, None);
    }
}

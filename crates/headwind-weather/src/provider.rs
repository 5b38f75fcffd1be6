//! Open-Meteo current-conditions client.

use std::sync::Arc;
use std::time::Duration;

use headwind_core::{NetworkError, ReqwestErrorExt};
use reqwest::Client;
use tracing::instrument;
use url::Url;

use crate::preferences::HeadwindSettings;
use crate::types::{GpsCoordinate, WeatherSnapshot};

pub const DEFAULT_API_URL: &str = headwind_core::config::DEFAULT_WEATHER_API_URL;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Fields requested in the `current` block.
pub const CURRENT_FIELDS: &str = "weather_code,temperature_2m,relative_humidity_2m,apparent_temperature,precipitation,cloud_cover,wind_speed_10m,wind_direction_10m,wind_gusts_10m,surface_pressure";

const USER_AGENT: &str = concat!("headwind/", env!("CARGO_PKG_VERSION"));

/// Issues exactly one request per [`WeatherProvider::fetch`]; retries are up to
/// whoever triggers the next fetch.
#[derive(Debug, Clone)]
pub struct WeatherProvider {
    client: Arc<Client>,
    base_url: Url,
    timeout: Duration,
}

impl WeatherProvider {
    pub fn new() -> Result<Self, NetworkError> {
        Self::with_endpoint(DEFAULT_API_URL, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_endpoint(base_url: &str, timeout: Duration) -> Result<Self, NetworkError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| NetworkError::ConnectionFailed(format!("invalid endpoint: {}", e)))?;

        let client = Client::builder()
            .connect_timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| e.into_network_error())?;

        Ok(Self {
            client: Arc::new(client),
            base_url,
            timeout,
        })
    }

    /// Request URL for `coordinates` in the units chosen in `settings`.
    pub fn request_url(&self, coordinates: GpsCoordinate, settings: &HeadwindSettings) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("latitude", &coordinates.latitude.to_string())
            .append_pair("longitude", &coordinates.longitude.to_string())
            .append_pair("current", CURRENT_FIELDS)
            .append_pair("timeformat", "unixtime")
            .append_pair("wind_speed_unit", settings.wind_unit.id())
            .append_pair("precipitation_unit", settings.precipitation_unit.id());
        url
    }

    /// Fetch current conditions.
    ///
    /// Resolves within the configured timeout. On timeout the in-flight request
    /// is dropped and [`NetworkError::Timeout`] is returned; a late response is
    /// never observed.
    #[instrument(skip(self, settings), level = "info")]
    pub async fn fetch(
        &self,
        coordinates: GpsCoordinate,
        settings: &HeadwindSettings,
    ) -> Result<WeatherSnapshot, NetworkError> {
        let url = self.request_url(coordinates, settings);
        tracing::debug!("Http request to {}", url);

        match tokio::time::timeout(self.timeout, self.request(url)).await {
            Ok(Ok(snapshot)) => {
                tracing::info!(
                    "Weather fetched: wind from {}° at {} {}",
                    snapshot.current.wind_direction,
                    snapshot.current.wind_speed,
                    settings.wind_unit.label()
                );
                Ok(snapshot)
            }
            Ok(Err(e)) => {
                tracing::warn!("Weather request failed ({}): {}", e.status_code(), e);
                Err(e)
            }
            Err(_) => {
                tracing::warn!("Weather request timed out after {:?}", self.timeout);
                Err(NetworkError::Timeout)
            }
        }
    }

    async fn request(&self, url: Url) -> Result<WeatherSnapshot, NetworkError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| e.into_network_error())?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(NetworkError::ServerError {
                status: status.as_u16(),
                message,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| e.into_network_error())?;

        serde_json::from_slice(&body)
            .map_err(|e| NetworkError::InvalidResponse(format!("JSON parse error: {}", e)))
    }
}

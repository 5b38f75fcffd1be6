use chrono::{DateTime, Utc};
use headwind_core::{NetworkError, StorageError};
use serde::{Deserialize, Serialize};

/// Snapshots older than this are treated as absent.
pub const FRESHNESS_WINDOW_SECS: i64 = 12 * 60 * 60;

/// Coordinates are snapped to a grid of 1/1024 degree before comparison.
pub const COORDINATE_GRID: f64 = 1024.0;

/// Two rounded positions closer than this (km) are the same position.
pub const SAME_POSITION_KM: f64 = 0.001;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Wind speed unit requested from the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum WindSpeedUnit {
    #[default]
    #[serde(rename = "kmh")]
    KilometersPerHour,
    #[serde(rename = "ms")]
    MetersPerSecond,
    #[serde(rename = "mph")]
    MilesPerHour,
    #[serde(rename = "kn")]
    Knots,
}

impl WindSpeedUnit {
    /// Identifier used in the `wind_speed_unit` query parameter
    pub fn id(&self) -> &'static str {
        match self {
            Self::KilometersPerHour => "kmh",
            Self::MetersPerSecond => "ms",
            Self::MilesPerHour => "mph",
            Self::Knots => "kn",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::KilometersPerHour => "km/h",
            Self::MetersPerSecond => "m/s",
            Self::MilesPerHour => "mph",
            Self::Knots => "kn",
        }
    }
}

/// Precipitation unit requested from the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PrecipitationUnit {
    #[default]
    #[serde(rename = "mm")]
    Millimeters,
    #[serde(rename = "inch")]
    Inches,
}

impl PrecipitationUnit {
    /// Identifier used in the `precipitation_unit` query parameter
    pub fn id(&self) -> &'static str {
        match self {
            Self::Millimeters => "mm",
            Self::Inches => "inch",
        }
    }
}

/// Weather condition categories mapped from WMO codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WeatherCondition {
    #[default]
    Clear,
    PartlyCloudy,
    Cloudy,
    Fog,
    Drizzle,
    Rain,
    HeavyRain,
    Snow,
    Sleet,
    Thunderstorm,
}

impl WeatherCondition {
    /// Convert WMO weather code to WeatherCondition
    /// See: https://open-meteo.com/en/docs#weathervariables
    pub fn from_wmo_code(code: i32) -> Self {
        match code {
            0 => Self::Clear,
            1..=2 => Self::PartlyCloudy,
            3 => Self::Cloudy,
            45 | 48 => Self::Fog,
            51 | 53 | 55 => Self::Drizzle,
            56 | 57 => Self::Sleet, // Freezing drizzle
            61 | 63 | 80 => Self::Rain,
            65 | 81 | 82 => Self::HeavyRain,
            66 | 67 => Self::Sleet, // Freezing rain
            71 | 73 | 75 | 77 | 85 | 86 => Self::Snow,
            95 | 96 | 99 => Self::Thunderstorm,
            _ => Self::Clear,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Clear => "Clear",
            Self::PartlyCloudy => "Partly Cloudy",
            Self::Cloudy => "Cloudy",
            Self::Fog => "Fog",
            Self::Drizzle => "Drizzle",
            Self::Rain => "Rain",
            Self::HeavyRain => "Heavy Rain",
            Self::Snow => "Snow",
            Self::Sleet => "Sleet",
            Self::Thunderstorm => "Thunderstorm",
        }
    }
}

/// A GPS position in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsCoordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsCoordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Snap both axes to the comparison grid.
    pub fn round(self) -> Self {
        let snap = |degrees: f64| (degrees * COORDINATE_GRID).round() / COORDINATE_GRID;
        Self::new(snap(self.latitude), snap(self.longitude))
    }

    /// Great-circle distance in kilometers (haversine).
    pub fn distance_km(&self, other: &GpsCoordinate) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let d_lat = (other.latitude - self.latitude).to_radians();
        let d_lon = (other.longitude - self.longitude).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        EARTH_RADIUS_KM * c
    }

    pub fn is_same_position(&self, other: &GpsCoordinate) -> bool {
        self.distance_km(other).abs() < SAME_POSITION_KM
    }
}

/// Current conditions block of an Open-Meteo response.
///
/// Field names follow the provider so that the persisted blob and the wire
/// format are the same document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentWeather {
    /// Observation time, unix seconds
    pub time: i64,
    #[serde(rename = "temperature_2m")]
    pub temperature: f64,
    #[serde(rename = "relative_humidity_2m")]
    pub relative_humidity: u8,
    pub apparent_temperature: f64,
    pub precipitation: f64,
    pub cloud_cover: u8,
    #[serde(rename = "wind_speed_10m")]
    pub wind_speed: f64,
    /// Direction the wind blows from, degrees
    #[serde(rename = "wind_direction_10m")]
    pub wind_direction: f64,
    #[serde(rename = "wind_gusts_10m")]
    pub wind_gusts: f64,
    pub surface_pressure: f64,
    pub weather_code: i32,
}

/// One complete provider response; replaced wholesale on every successful fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: Option<f64>,
    pub current: CurrentWeather,
}

impl WeatherSnapshot {
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        self.current.time >= now.timestamp() - FRESHNESS_WINDOW_SECS
    }

    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Utc::now())
    }

    pub fn condition(&self) -> WeatherCondition {
        WeatherCondition::from_wmo_code(self.current.weather_code)
    }
}

/// Weather errors
#[derive(Debug, thiserror::Error)]
pub enum WeatherError {
    #[error("Weather request failed: {0}")]
    Network(#[from] NetworkError),
    #[error("Weather cache error: {0}")]
    Storage(#[from] StorageError),
}

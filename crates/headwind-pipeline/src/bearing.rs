//! Wind direction relative to the rider.
//!
//! The weather provider reports where the wind blows *from*; the rider cares
//! where it blows *to*. The relative bearing is the device heading measured
//! from that direction, in [0, 360): 0 is a tailwind and 180 a headwind.

use headwind_weather::{WeatherSnapshot, WeatherStream};

use crate::angle::signed_angle_difference;
use crate::heading::{HeadingSector, HeadingStream};

pub fn relative_bearing(heading: HeadingSector, weather: &WeatherSnapshot) -> f64 {
    let device_bearing = heading.degrees();
    let wind_bearing = weather.current.wind_direction + 180.0;

    (signed_angle_difference(device_bearing, wind_bearing) + 360.0).rem_euclid(360.0)
}

/// Combine-latest of heading and fresh weather.
///
/// Emits once both inputs have produced a value, then on every change of
/// either. Ends when both inputs have ended. Dropping the stream drops both
/// inputs and with them the host heading listener.
#[derive(Debug)]
pub struct RelativeBearingStream {
    heading: HeadingStream,
    weather: WeatherStream,
    sector: Option<HeadingSector>,
    snapshot: Option<WeatherSnapshot>,
    heading_done: bool,
    weather_done: bool,
}

impl RelativeBearingStream {
    pub fn new(heading: HeadingStream, weather: WeatherStream) -> Self {
        Self {
            heading,
            weather,
            sector: None,
            snapshot: None,
            heading_done: false,
            weather_done: false,
        }
    }

    /// Last heading seen, if any.
    pub fn heading(&self) -> Option<HeadingSector> {
        self.sector
    }

    /// Last fresh snapshot seen, if any.
    pub fn weather(&self) -> Option<&WeatherSnapshot> {
        self.snapshot.as_ref()
    }

    /// Next relative bearing in degrees. Cancel safe.
    pub async fn next(&mut self) -> Option<f64> {
        loop {
            let changed = tokio::select! {
                sector = self.heading.next(), if !self.heading_done => match sector {
                    Some(sector) => {
                        self.sector = Some(sector);
                        true
                    }
                    None => {
                        tracing::debug!("Heading stream ended");
                        self.heading_done = true;
                        false
                    }
                },
                snapshot = self.weather.next(), if !self.weather_done => match snapshot {
                    Some(snapshot) => {
                        self.snapshot = Some(snapshot);
                        true
                    }
                    None => {
                        tracing::debug!("Weather stream ended");
                        self.weather_done = true;
                        false
                    }
                },
                else => return None,
            };

            if !changed {
                continue;
            }
            if let (Some(sector), Some(snapshot)) = (self.sector, &self.snapshot) {
                return Some(relative_bearing(sector, snapshot));
            }
        }
    }
}

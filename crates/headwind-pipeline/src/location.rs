use std::sync::Arc;
use std::time::Duration;

use headwind_weather::GpsCoordinate;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::sensor::{
    subscribe_channel, DeviceSample, SensorSource, StreamState, Subscription, FIELD_LATITUDE,
    FIELD_LONGITUDE,
};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(10);

/// Turns raw location samples into rounded fixes, dropping fixes that have
/// not moved from the last one passed.
#[derive(Debug, Default)]
pub struct LocationFilter {
    last: Option<GpsCoordinate>,
}

impl LocationFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: &DeviceSample) -> Option<GpsCoordinate> {
        let point = match sample {
            StreamState::Streaming(point) => point,
            _ => return None,
        };

        let (Some(latitude), Some(longitude)) =
            (point.get(FIELD_LATITUDE), point.get(FIELD_LONGITUDE))
        else {
            tracing::error!("Missing gps values: {:?}", point.values);
            return None;
        };

        let coordinate = GpsCoordinate::new(latitude, longitude);
        if !coordinate.is_valid() {
            tracing::warn!("Ignoring out of range gps fix {:?}", coordinate);
            return None;
        }
        let coordinate = coordinate.round();

        if let Some(last) = &self.last {
            if last.is_same_position(&coordinate) {
                return None;
            }
        }
        self.last = Some(coordinate);
        Some(coordinate)
    }
}

/// Debounced GPS positions from a host location source.
///
/// A position is emitted once no further moved fix has arrived for the
/// debounce period. When the source goes away, a pending position is emitted
/// before the stream ends.
#[derive(Debug)]
pub struct LocationStream {
    _subscription: Subscription<DeviceSample>,
    rx: mpsc::Receiver<DeviceSample>,
    filter: LocationFilter,
    debounce: Duration,
    pending: Option<(GpsCoordinate, Instant)>,
}

impl LocationStream {
    pub fn subscribe(source: Arc<dyn SensorSource<DeviceSample>>, debounce: Duration) -> Self {
        let (subscription, rx) = subscribe_channel(source, "location");
        Self {
            _subscription: subscription,
            rx,
            filter: LocationFilter::new(),
            debounce,
            pending: None,
        }
    }

    /// Next settled position. Cancel safe: a pending position and its deadline
    /// survive a dropped `next()` future.
    pub async fn next(&mut self) -> Option<GpsCoordinate> {
        loop {
            let deadline = self.pending.map(|(_, deadline)| deadline);

            tokio::select! {
                sample = self.rx.recv() => match sample {
                    Some(sample) => {
                        if let Some(coordinate) = self.filter.push(&sample) {
                            tracing::debug!("Gps fix {:?}, waiting {:?}", coordinate, self.debounce);
                            self.pending = Some((coordinate, Instant::now() + self.debounce));
                        }
                    }
                    None => return self.pending.take().map(|(coordinate, _)| coordinate),
                },
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Some((coordinate, _)) = self.pending.take() {
                        tracing::debug!("Gps position settled at {:?}", coordinate);
                        return Some(coordinate);
                    }
                }
            }
        }
    }
}

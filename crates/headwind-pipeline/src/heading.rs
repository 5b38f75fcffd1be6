use std::sync::Arc;

use tokio::sync::mpsc;

use crate::sensor::{subscribe_channel, DeviceSample, SensorSource, StreamState, Subscription};

/// Number of compass sectors the device reports.
pub const SECTOR_COUNT: u8 = 8;
pub const SECTOR_DEGREES: f64 = 360.0 / SECTOR_COUNT as f64;

/// Device heading as one of eight 45° sectors, 0 = north, clockwise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeadingSector(u8);

impl HeadingSector {
    /// Wraps out-of-range indices, so 8 is north again.
    pub fn new(index: u8) -> Self {
        Self(index % SECTOR_COUNT)
    }

    /// Sector for a raw heading sample; `None` for missing, negative or NaN values.
    pub fn from_sample(value: f64) -> Option<Self> {
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        let index = (value.round() as i64).rem_euclid(i64::from(SECTOR_COUNT));
        u8::try_from(index).ok().map(Self)
    }

    pub fn index(&self) -> u8 {
        self.0
    }

    pub fn degrees(&self) -> f64 {
        f64::from(self.0) * SECTOR_DEGREES
    }
}

/// Drops invalid samples and repeats of the last emitted sector.
#[derive(Debug, Default)]
pub struct HeadingFilter {
    last: Option<HeadingSector>,
}

impl HeadingFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: &DeviceSample) -> Option<HeadingSector> {
        let value = match sample {
            StreamState::Streaming(point) => point.single_value()?,
            _ => return None,
        };
        let sector = HeadingSector::from_sample(value)?;

        if self.last == Some(sector) {
            return None;
        }
        self.last = Some(sector);
        Some(sector)
    }
}

/// Live heading sectors from a host heading source.
///
/// Only samples arriving after [`HeadingStream::subscribe`] are observed.
#[derive(Debug)]
pub struct HeadingStream {
    _subscription: Subscription<DeviceSample>,
    rx: mpsc::Receiver<DeviceSample>,
    filter: HeadingFilter,
}

impl HeadingStream {
    pub fn subscribe(source: Arc<dyn SensorSource<DeviceSample>>) -> Self {
        let (subscription, rx) = subscribe_channel(source, "heading");
        Self {
            _subscription: subscription,
            rx,
            filter: HeadingFilter::new(),
        }
    }

    /// Next changed sector, or `None` when the host source is gone. Cancel safe.
    pub async fn next(&mut self) -> Option<HeadingSector> {
        loop {
            let sample = self.rx.recv().await?;
            if let Some(sector) = self.filter.push(&sample) {
                tracing::debug!("Heading sector {}", sector.index());
                return Some(sector);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::{DataPoint, ManualSource};

    fn heading(value: f64) -> DeviceSample {
        StreamState::Streaming(DataPoint::single(value))
    }

    #[test]
    fn test_from_sample() {
        assert_eq!(HeadingSector::from_sample(0.0), Some(HeadingSector::new(0)));
        assert_eq!(HeadingSector::from_sample(2.4), Some(HeadingSector::new(2)));
        assert_eq!(HeadingSector::from_sample(6.6), Some(HeadingSector::new(7)));
        assert_eq!(HeadingSector::from_sample(7.6), Some(HeadingSector::new(0)));
        assert_eq!(HeadingSector::from_sample(-1.0), None);
        assert_eq!(HeadingSector::from_sample(f64::NAN), None);
    }

    #[test]
    fn test_sector_degrees() {
        assert_eq!(HeadingSector::new(0).degrees(), 0.0);
        assert_eq!(HeadingSector::new(3).degrees(), 135.0);
        assert_eq!(HeadingSector::new(8), HeadingSector::new(0));
    }

    #[test]
    fn test_filter_drops_invalid_and_repeats() {
        let mut filter = HeadingFilter::new();
        let samples = [
            StreamState::Searching,
            heading(-1.0),
            StreamState::Streaming(DataPoint::default()),
            heading(2.0),
            heading(2.2),
            StreamState::Idle,
            heading(3.0),
            heading(8.0),
            StreamState::NotAvailable,
            heading(0.0),
        ];

        let emitted: Vec<u8> = samples
            .iter()
            .filter_map(|s| filter.push(s))
            .map(|s| s.index())
            .collect();
        assert_eq!(emitted, vec![2, 3, 0]);
    }

    #[tokio::test]
    async fn test_stream_only_sees_samples_after_subscribe() {
        let source = Arc::new(ManualSource::<DeviceSample>::new());
        source.emit(heading(1.0));

        let mut stream = HeadingStream::subscribe(source.clone());
        source.emit(heading(5.0));
        source.emit(heading(5.0));
        source.emit(heading(6.0));

        assert_eq!(stream.next().await, Some(HeadingSector::new(5)));
        assert_eq!(stream.next().await, Some(HeadingSector::new(6)));

        drop(stream);
        assert_eq!(source.subscriber_count(), 0);
    }
}

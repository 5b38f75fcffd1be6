//! Host sensor streams.
//!
//! The host device delivers samples through listener registration: a handler
//! is registered, called for every sample, and unregistered by id. The pipeline
//! always holds registrations through a [`Subscription`] guard, so dropping a
//! stage unregisters its listener on every path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

pub type SubscriptionId = u64;

pub type SensorHandler<T> = Box<dyn Fn(T) + Send + Sync>;

/// Samples buffered between a host callback and its consumer.
pub const SAMPLE_BUFFER: usize = 64;

pub const FIELD_SINGLE: &str = "single";
pub const FIELD_LATITUDE: &str = "latitude";
pub const FIELD_LONGITUDE: &str = "longitude";

/// Listener registration offered by the host.
pub trait SensorSource<T>: Send + Sync {
    fn subscribe(&self, handler: SensorHandler<T>) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId);
}

/// State of a host data stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamState<T> {
    Streaming(T),
    Searching,
    Idle,
    NotAvailable,
}

/// One reading in the host's field layout
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataPoint {
    pub values: HashMap<String, f64>,
}

impl DataPoint {
    /// A reading carrying a single scalar, as heading samples do.
    pub fn single(value: f64) -> Self {
        Self::default().with(FIELD_SINGLE, value)
    }

    pub fn location(latitude: f64, longitude: f64) -> Self {
        Self::default()
            .with(FIELD_LATITUDE, latitude)
            .with(FIELD_LONGITUDE, longitude)
    }

    pub fn with(mut self, field: &str, value: f64) -> Self {
        self.values.insert(field.to_string(), value);
        self
    }

    pub fn get(&self, field: &str) -> Option<f64> {
        self.values.get(field).copied()
    }

    pub fn single_value(&self) -> Option<f64> {
        self.get(FIELD_SINGLE)
    }
}

/// What heading and location sources deliver
pub type DeviceSample = StreamState<DataPoint>;

/// Registration guard; unsubscribes when dropped.
pub struct Subscription<T: 'static> {
    source: Arc<dyn SensorSource<T>>,
    id: SubscriptionId,
    name: &'static str,
}

impl<T: 'static> Subscription<T> {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl<T: 'static> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.source.unsubscribe(self.id);
        tracing::debug!("Unsubscribed from {} stream ({})", self.name, self.id);
    }
}

impl<T: 'static> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("name", &self.name)
            .field("id", &self.id)
            .finish()
    }
}

/// Register on `source` and forward samples into a bounded channel.
///
/// The host callback never blocks: when the consumer lags by more than
/// [`SAMPLE_BUFFER`] samples, new samples are dropped.
pub fn subscribe_channel<T: Send + 'static>(
    source: Arc<dyn SensorSource<T>>,
    name: &'static str,
) -> (Subscription<T>, mpsc::Receiver<T>) {
    let (tx, rx) = mpsc::channel(SAMPLE_BUFFER);
    let id = source.subscribe(Box::new(move |sample| match tx.try_send(sample) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            tracing::trace!("Dropping {} sample, consumer is behind", name);
        }
        Err(TrySendError::Closed(_)) => {}
    }));
    tracing::debug!("Subscribed to {} stream ({})", name, id);

    (Subscription { source, id, name }, rx)
}

/// A source driven by explicit [`ManualSource::emit`] calls.
///
/// Used by the command-line host, which reads samples from stdin, and by tests.
pub struct ManualSource<T> {
    handlers: Mutex<HashMap<SubscriptionId, SensorHandler<T>>>,
    next_id: AtomicU64,
}

impl<T: Clone> ManualSource<T> {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Deliver `sample` to every current subscriber.
    pub fn emit(&self, sample: T) {
        for handler in self.handlers.lock().values() {
            handler(sample.clone());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.lock().len()
    }
}

impl<T: Clone> Default for ManualSource<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for ManualSource<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualSource")
            .field("subscribers", &self.handlers.lock().len())
            .finish()
    }
}

impl<T: Send> SensorSource<T> for ManualSource<T> {
    fn subscribe(&self, handler: SensorHandler<T>) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.lock().insert(id, handler);
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.handlers.lock().remove(&id);
    }
}

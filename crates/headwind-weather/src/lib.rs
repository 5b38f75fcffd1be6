//! Weather side of headwind
//!
//! Fetches current conditions from Open-Meteo for a GPS position, persists the
//! latest snapshot through a pluggable key-value store and exposes it as a live,
//! freshness-filtered stream.

pub mod cache;
pub mod preferences;
pub mod provider;
pub mod storage;
pub mod types;

pub use cache::{WeatherCache, WeatherStream};
pub use preferences::{FetchStats, HeadwindSettings, PreferenceStream, Preferences};
pub use provider::WeatherProvider;
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use types::*;

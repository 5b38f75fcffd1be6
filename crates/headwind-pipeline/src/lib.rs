//! Relative wind bearing pipeline
//!
//! Turns raw device heading and GPS streams plus the cached weather snapshot
//! into a live relative wind bearing, and keeps the weather cache refreshed as
//! the rider moves.

pub mod angle;
pub mod bearing;
pub mod heading;
pub mod location;
pub mod refresher;
pub mod sensor;

pub use angle::signed_angle_difference;
pub use bearing::{relative_bearing, RelativeBearingStream};
pub use heading::{HeadingFilter, HeadingSector, HeadingStream};
pub use location::{LocationFilter, LocationStream};
pub use refresher::WeatherRefresher;
pub use sensor::{
    DataPoint, DeviceSample, ManualSource, SensorSource, StreamState, Subscription,
    SubscriptionId,
};

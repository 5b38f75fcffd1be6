//! Weather refresher against a mock provider.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use headwind_core::StorageError;
use headwind_pipeline::{
    DataPoint, DeviceSample, LocationStream, ManualSource, StreamState, WeatherRefresher,
};
use headwind_weather::cache::CURRENT_WEATHER_KEY;
use headwind_weather::storage::ValueWatch;
use headwind_weather::{
    FetchStats, GpsCoordinate, HeadwindSettings, KeyValueStore, MemoryStore, Preferences,
    WeatherCache, WeatherProvider, WindSpeedUnit,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const DEBOUNCE: Duration = Duration::from_millis(50);

fn body(wind_direction: f64) -> serde_json::Value {
    serde_json::json!({
        "latitude": 48.5,
        "longitude": 9.25,
        "elevation": 341.0,
        "current": {
            "time": Utc::now().timestamp(),
            "interval": 900,
            "temperature_2m": 9.8,
            "relative_humidity_2m": 77,
            "apparent_temperature": 7.2,
            "precipitation": 0.1,
            "cloud_cover": 100,
            "wind_speed_10m": 14.4,
            "wind_direction_10m": wind_direction,
            "wind_gusts_10m": 29.5,
            "surface_pressure": 968.3,
            "weather_code": 61
        }
    })
}

fn fix(latitude: f64, longitude: f64) -> DeviceSample {
    StreamState::Streaming(DataPoint::location(latitude, longitude))
}

fn query(request: &Request, name: &str) -> Option<String> {
    request
        .url
        .query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

async fn mount_ok(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body(180.0)))
        .mount(server)
        .await;
}

async fn wait_for_requests(server: &MockServer, count: usize) -> Vec<Request> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let requests = server.received_requests().await.unwrap_or_default();
            if requests.len() >= count {
                return requests;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap()
}

/// Memory store whose weather snapshot writes always fail
struct ReadOnlyCacheStore {
    inner: MemoryStore,
}

impl KeyValueStore for ReadOnlyCacheStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        if key == CURRENT_WEATHER_KEY {
            return Err(StorageError::Io {
                key: key.to_string(),
                message: "disk full".to_string(),
            });
        }
        self.inner.set(key, value)
    }

    fn watch(&self, key: &str) -> ValueWatch {
        self.inner.watch(key)
    }
}

struct Harness {
    source: Arc<ManualSource<DeviceSample>>,
    cache: WeatherCache,
    preferences: Preferences,
    cancel: CancellationToken,
}

impl Harness {
    fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()))
    }

    fn with_store(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            source: Arc::new(ManualSource::<DeviceSample>::new()),
            cache: WeatherCache::new(store.clone()),
            preferences: Preferences::new(store),
            cancel: CancellationToken::new(),
        }
    }

    fn spawn(
        &self,
        server: &MockServer,
        timeout: Duration,
        fallback: Option<GpsCoordinate>,
        refresh_interval: Option<Duration>,
    ) -> JoinHandle<()> {
        let provider =
            WeatherProvider::with_endpoint(&format!("{}/v1/forecast", server.uri()), timeout)
                .unwrap();
        let refresher =
            WeatherRefresher::new(provider, self.cache.clone(), self.preferences.clone())
                .with_fallback(fallback)
                .with_refresh_interval(refresh_interval);
        let locations = LocationStream::subscribe(self.source.clone(), DEBOUNCE);
        let cancel = self.cancel.clone();

        tokio::spawn(async move { refresher.run(locations, cancel).await })
    }

    async fn wait_for_stats(&self, done: impl Fn(&FetchStats) -> bool) -> FetchStats {
        let mut stream = self.preferences.stream_stats();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match stream.next().await {
                    Some(stats) if done(&stats) => return stats,
                    Some(_) => continue,
                    None => panic!("stats stream ended"),
                }
            }
        })
        .await
        .unwrap()
    }
}

#[tokio::test]
async fn test_settled_position_refreshes_cache_and_stats() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body(225.0)))
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::new();
    let handle = harness.spawn(&server, Duration::from_secs(20), None, None);
    harness.source.emit(fix(48.5, 9.25));

    let stats = harness
        .wait_for_stats(|s| s.last_successful_request.is_some())
        .await;
    assert_eq!(stats.failed_requests, 0);
    assert_eq!(
        stats.last_successful_position,
        Some(GpsCoordinate::new(48.5, 9.25))
    );

    let cached = harness.cache.current().unwrap();
    assert_eq!(cached.current.wind_direction, 225.0);
    assert_eq!(cached.current.weather_code, 61);

    harness.cancel.cancel();
    handle.await.unwrap();
    assert_eq!(harness.source.subscriber_count(), 0);
}

#[tokio::test]
async fn test_failed_request_keeps_cache_and_counts_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream error"))
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::new();
    let handle = harness.spawn(&server, Duration::from_secs(20), None, None);
    harness.source.emit(fix(48.5, 9.25));

    let stats = harness.wait_for_stats(|s| s.failed_requests == 1).await;
    assert!(stats.last_failed_request.is_some());
    assert!(stats.last_successful_request.is_none());
    assert!(harness.cache.stored().is_none());

    harness.cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_gps_disabled_fetches_fallback_position() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .and(query_param("latitude", "48.5"))
        .and(query_param("longitude", "9.25"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body(90.0)))
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::new();
    harness
        .preferences
        .save_settings(&HeadwindSettings {
            use_gps: false,
            ..HeadwindSettings::default()
        })
        .unwrap();

    let fallback = GpsCoordinate::new(48.5, 9.25);
    let handle = harness.spawn(&server, Duration::from_secs(20), Some(fallback), None);
    harness.source.emit(fix(52.52, 13.41));

    let stats = harness
        .wait_for_stats(|s| s.last_successful_request.is_some())
        .await;
    assert_eq!(stats.last_successful_position, Some(fallback));

    tokio::time::sleep(DEBOUNCE * 4).await;
    assert_eq!(server.received_requests().await.unwrap_or_default().len(), 1);

    harness.cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_cancel_drops_in_flight_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(body(0.0))
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let harness = Harness::new();
    let handle = harness.spawn(&server, Duration::from_secs(30), None, None);
    harness.source.emit(fix(48.5, 9.25));

    tokio::time::timeout(Duration::from_secs(5), async {
        while server.received_requests().await.unwrap_or_default().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    harness.cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(harness.source.subscriber_count(), 0);
    assert_eq!(harness.preferences.stats(), FetchStats::default());
    assert!(harness.cache.stored().is_none());
}

#[tokio::test]
async fn test_cache_write_failure_counts_as_failed_request() {
    let server = MockServer::start().await;
    mount_ok(&server).await;

    let harness = Harness::with_store(Arc::new(ReadOnlyCacheStore {
        inner: MemoryStore::new(),
    }));
    let handle = harness.spawn(&server, Duration::from_secs(20), None, None);
    harness.source.emit(fix(48.5, 9.25));

    let stats = harness.wait_for_stats(|s| s.failed_requests == 1).await;
    assert!(stats.last_failed_request.is_some());
    assert!(stats.last_successful_request.is_none());
    assert!(harness.cache.stored().is_none());

    harness.cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_settings_change_refetches_with_new_parameters() {
    let server = MockServer::start().await;
    mount_ok(&server).await;

    let harness = Harness::new();
    let fallback = GpsCoordinate::new(48.5, 9.25);
    let handle = harness.spawn(&server, Duration::from_secs(20), Some(fallback), None);

    harness.source.emit(fix(52.52, 13.41));
    let requests = wait_for_requests(&server, 1).await;
    let gps_latitude = query(&requests[0], "latitude");
    assert_eq!(query(&requests[0], "wind_speed_unit").as_deref(), Some("kmh"));

    // Unit change refetches the last GPS position
    harness
        .preferences
        .save_settings(&HeadwindSettings {
            wind_unit: WindSpeedUnit::Knots,
            ..HeadwindSettings::default()
        })
        .unwrap();
    let requests = wait_for_requests(&server, 2).await;
    assert_eq!(query(&requests[1], "wind_speed_unit").as_deref(), Some("kn"));
    assert_eq!(query(&requests[1], "latitude"), gps_latitude);

    // Turning GPS off switches to the fallback right away
    harness
        .preferences
        .save_settings(&HeadwindSettings {
            wind_unit: WindSpeedUnit::Knots,
            use_gps: false,
            ..HeadwindSettings::default()
        })
        .unwrap();
    let requests = wait_for_requests(&server, 3).await;
    assert_eq!(query(&requests[2], "latitude").as_deref(), Some("48.5"));
    assert_eq!(query(&requests[2], "longitude").as_deref(), Some("9.25"));
    assert_eq!(query(&requests[2], "wind_speed_unit").as_deref(), Some("kn"));

    // GPS fixes are ignored from now on
    harness.source.emit(fix(52.6, 13.5));
    tokio::time::sleep(DEBOUNCE * 4).await;
    assert_eq!(server.received_requests().await.unwrap_or_default().len(), 3);

    harness.cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_periodic_refresh_waits_for_first_position() {
    let server = MockServer::start().await;
    mount_ok(&server).await;

    let period = Duration::from_millis(150);
    let harness = Harness::new();
    let handle = harness.spawn(&server, Duration::from_secs(20), None, Some(period));

    tokio::time::sleep(period * 3).await;
    assert!(server.received_requests().await.unwrap_or_default().is_empty());

    harness.source.emit(fix(52.52, 13.41));
    let requests = wait_for_requests(&server, 3).await;
    let latitude = query(&requests[0], "latitude");
    assert!(latitude.is_some());
    assert!(requests
        .iter()
        .all(|request| query(request, "latitude") == latitude));

    harness.cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_periodic_refresh_uses_fallback_with_gps_disabled() {
    let server = MockServer::start().await;
    mount_ok(&server).await;

    let harness = Harness::new();
    harness
        .preferences
        .save_settings(&HeadwindSettings {
            use_gps: false,
            ..HeadwindSettings::default()
        })
        .unwrap();

    let fallback = GpsCoordinate::new(48.5, 9.25);
    let handle = harness.spawn(
        &server,
        Duration::from_secs(20),
        Some(fallback),
        Some(Duration::from_millis(150)),
    );
    harness.source.emit(fix(52.52, 13.41));

    let requests = wait_for_requests(&server, 3).await;
    assert!(requests.iter().all(|request| {
        query(request, "latitude").as_deref() == Some("48.5")
            && query(request, "longitude").as_deref() == Some("9.25")
    }));

    harness.cancel.cancel();
    handle.await.unwrap();
}

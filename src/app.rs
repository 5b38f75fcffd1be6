use std::sync::Arc;

use anyhow::{Context, Result};
use headwind_core::{AppError, Config};
use headwind_pipeline::{
    DataPoint, DeviceSample, HeadingStream, LocationStream, ManualSource, RelativeBearingStream,
    StreamState, WeatherRefresher,
};
use headwind_weather::{
    FileStore, GpsCoordinate, HeadwindSettings, KeyValueStore, Preferences, WeatherCache,
    WeatherProvider, WeatherSnapshot,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

/// One line of host input
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Raw heading sample, a sector index
    Heading(f64),
    Position { latitude: f64, longitude: f64 },
    /// GPS lost its fix
    Searching,
    UseGps(bool),
}

impl Command {
    pub fn parse(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let keyword = parts.next().context("Empty command")?;
        let args: Vec<&str> = parts.collect();

        let number = |s: &str| -> Result<f64> {
            s.parse::<f64>()
                .with_context(|| format!("Not a number: {}", s))
        };

        match (keyword, args.as_slice()) {
            ("heading", [value]) => Ok(Command::Heading(number(value)?)),
            ("gps", ["lost"]) => Ok(Command::Searching),
            ("gps", ["on"]) => Ok(Command::UseGps(true)),
            ("gps", ["off"]) => Ok(Command::UseGps(false)),
            ("gps", [latitude, longitude]) => Ok(Command::Position {
                latitude: number(latitude)?,
                longitude: number(longitude)?,
            }),
            _ => anyhow::bail!("Unknown command: {}", line.trim()),
        }
    }
}

/// Wires the weather and bearing pipelines to stdin-driven sensor sources.
pub struct App {
    config: Config,
    heading: Arc<ManualSource<DeviceSample>>,
    location: Arc<ManualSource<DeviceSample>>,
    cache: WeatherCache,
    preferences: Preferences,
    refresher: WeatherRefresher,
    cancel: CancellationToken,
}

impl App {
    pub fn new(config: Config) -> Result<Self, AppError> {
        let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(&config.data_dir)?);
        let cache = WeatherCache::new(store.clone());
        let preferences = Preferences::new(store);

        let provider = WeatherProvider::with_endpoint(
            &config.weather.api_url,
            config.weather.request_timeout(),
        )?;
        let fallback = config
            .location
            .fallback()
            .map(|(latitude, longitude)| GpsCoordinate::new(latitude, longitude));
        let refresher = WeatherRefresher::new(provider, cache.clone(), preferences.clone())
            .with_fallback(fallback)
            .with_refresh_interval(config.weather.refresh_interval());

        tracing::info!("Using data directory {}", config.data_dir.display());

        Ok(Self {
            config,
            heading: Arc::new(ManualSource::new()),
            location: Arc::new(ManualSource::new()),
            cache,
            preferences,
            refresher,
            cancel: CancellationToken::new(),
        })
    }

    pub fn handle(&self, command: Command) -> Result<()> {
        match command {
            Command::Heading(value) => {
                self.heading
                    .emit(StreamState::Streaming(DataPoint::single(value)));
            }
            Command::Position {
                latitude,
                longitude,
            } => {
                self.location
                    .emit(StreamState::Streaming(DataPoint::location(latitude, longitude)));
            }
            Command::Searching => self.location.emit(StreamState::Searching),
            Command::UseGps(use_gps) => {
                let settings = HeadwindSettings {
                    use_gps,
                    ..self.preferences.settings()
                };
                self.preferences
                    .save_settings(&settings)
                    .context("Failed to save settings")?;
                tracing::info!("Gps use {}", if use_gps { "enabled" } else { "disabled" });
            }
        }
        Ok(())
    }

    /// Run until end of input or Ctrl-C.
    pub async fn run(&self) -> Result<()> {
        let locations =
            LocationStream::subscribe(self.location.clone(), self.config.location.debounce());
        let refresher = self.refresher.clone();
        let cancel = self.cancel.clone();
        let refresher_task = tokio::spawn(async move { refresher.run(locations, cancel).await });

        if let Some(snapshot) = self.cache.current() {
            println!("{}", self.describe_weather(&snapshot));
        }

        let mut bearing = RelativeBearingStream::new(
            HeadingStream::subscribe(self.heading.clone()),
            self.cache.stream_current(),
        );
        let mut bearing_done = false;
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Interrupted");
                    break;
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => {
                        if let Err(e) = Command::parse(&line).and_then(|command| self.handle(command)) {
                            eprintln!("{:#}", e);
                        }
                    }
                    Ok(None) => {
                        tracing::info!("End of input");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("Failed to read input: {}", e);
                        break;
                    }
                },
                value = bearing.next(), if !bearing_done => match value {
                    Some(value) => {
                        let sector = bearing.heading().map(|s| s.index()).unwrap_or_default();
                        let weather = bearing
                            .weather()
                            .map(|snapshot| self.describe_weather(snapshot))
                            .unwrap_or_default();
                        println!("heading {}  bearing {:>5.1}°  {}", sector, value, weather);
                    }
                    None => bearing_done = true,
                },
            }
        }

        self.shutdown();
        refresher_task
            .await
            .context("Weather refresher task failed")?;
        Ok(())
    }

    pub fn shutdown(&self) {
        tracing::info!("Shutting down");
        self.cancel.cancel();
    }

    fn describe_weather(&self, snapshot: &WeatherSnapshot) -> String {
        let settings = self.preferences.settings();
        let current = &snapshot.current;
        format!(
            "{} {:.1}°C, wind {:.0}° {:.1} {} (gusts {:.1})",
            snapshot.condition().description(),
            current.temperature,
            current.wind_direction,
            current.wind_speed,
            settings.wind_unit.label(),
            current.wind_gusts
        )
    }
}

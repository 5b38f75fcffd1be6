mod app;

use anyhow::Result;
use headwind_core::Config;

use crate::app::App;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = Config::default_path()?;
    let (config, created) = Config::load_from(&config_path)?;

    // Initialize core
    headwind_core::init(&config.log_level)?;
    if created {
        tracing::info!("Wrote default configuration to {}", config_path.display());
    }
    config.ensure_valid()?;

    let app = match App::new(config) {
        Ok(app) => app,
        Err(e) => {
            tracing::error!("Failed to start: {}", e);
            eprintln!("{}", e.user_message());
            return Err(e.into());
        }
    };

    tracing::info!("Headwind started");
    println!("Headwind - relative wind bearing");
    println!("Commands: heading <sector>, gps <lat> <lon>, gps lost, gps on|off");

    app.run().await
}

//! Reyer RT main entry point.

use reyer_rt::{App, RuntimeConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> reyer_rt::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,reyer_rt=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting Reyer RT");

    let mut config = RuntimeConfig::default();
    if let Ok(paths) = std::env::var("REYER_PLUGIN_PATH") {
        config.plugin_paths = std::env::split_paths(&paths).collect();
    }

    App::new(config).launch()
}

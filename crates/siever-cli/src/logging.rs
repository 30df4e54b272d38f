//! `tracing_subscriber::fmt` initialization, matching the teacher's
//! `tracing_subscriber::fmt::init()` call in `node/bin/main.rs`, generalized
//! to honor the configured filter directive and optional JSON output.

use siever_config::LoggingConfig;
use tracing_subscriber::EnvFilter;

pub fn init(config: &LoggingConfig) {
    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    if config.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

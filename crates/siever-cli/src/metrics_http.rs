//! The `/metrics` HTTP exporter (spec.md §2 **[FULL]**): ambient sink for
//! [`siever_metrics::Metrics`], polling [`NodeService::channel_stats`] on an
//! interval rather than wiring a push on every block commit, matching the
//! teacher's periodic-scrape metrics model.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::get;
use axum::Router;
use prometheus_client::registry::Registry;
use siever_engine::NodeService;
use siever_network::RsTransport;
use siever_metrics::Metrics;
use tokio::sync::Mutex;
use tracing::{info, warn};

const POLL_INTERVAL: Duration = Duration::from_secs(5);

struct ExporterState {
    registry: Mutex<Registry>,
}

pub async fn serve<T: RsTransport + 'static>(node: Arc<NodeService<T>>, listen_addr: String) {
    let mut registry = Registry::default();
    let metrics = Metrics::register(&mut registry);
    let state = Arc::new(ExporterState { registry: Mutex::new(registry) });

    tokio::spawn(poll_stats(node, metrics));

    let app = Router::new().route("/metrics", get(export)).with_state(state);

    let listener = match tokio::net::TcpListener::bind(&listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            warn!(%listen_addr, error = %e, "failed to bind metrics listener, metrics exporter disabled");
            return;
        }
    };

    info!(%listen_addr, "metrics exporter listening");
    if let Err(e) = axum::serve(listener, app).await {
        warn!(error = %e, "metrics exporter stopped");
    }
}

async fn poll_stats<T: RsTransport + 'static>(node: Arc<NodeService<T>>, metrics: Metrics) {
    use std::collections::HashMap;

    let mut last_total_tx: HashMap<String, u64> = HashMap::new();

    loop {
        for (channel, height, total_tx) in node.channel_stats() {
            metrics.record_block_height(&channel, height);

            let prev = last_total_tx.insert(channel.clone(), total_tx).unwrap_or(0);
            if total_tx > prev {
                metrics.record_confirmed_txes(&channel, total_tx - prev);
            }
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

async fn export(State(state): State<Arc<ExporterState>>) -> String {
    siever_metrics::export(&state.registry.lock().await)
}

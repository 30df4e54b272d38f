//! Prometheus-style counters and gauges for one node (§2 **[FULL]**:
//! "Metrics"). The sink — an HTTP `/metrics` exporter — is ambient
//! infrastructure and lives in `siever-cli`; this crate only owns the
//! metric definitions and the registry they're attached to, grounded in
//! the teacher's `metrics` crate (`Metrics`/`Inner` wrapping a
//! `prometheus_client::registry::Registry`).

use std::fmt::Write;
use std::ops::Deref;
use std::sync::Arc;

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{linear_buckets, Histogram};
use prometheus_client::registry::Registry;

/// Label set distinguishing per-channel series, mirroring the teacher's
/// per-step label family (`TimePerStep`) but keyed on channel name instead.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ChannelLabel {
    pub channel: String,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum VoteOutcome {
    Yea,
    Nay,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct VoteLabel {
    pub channel: String,
    pub outcome: VoteOutcome,
}

#[derive(Clone, Debug)]
pub struct Metrics(Arc<Inner>);

impl Deref for Metrics {
    type Target = Inner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Clone, Debug)]
pub struct Inner {
    /// Current confirmed block height, per channel (§8 invariant 1 tracks
    /// this same quantity on the `BlockStore` side).
    pub block_height: Family<ChannelLabel, Gauge>,

    /// Confirmed transactions, per channel — the metrics counterpart of
    /// `BlockStore::total_tx` (§3).
    pub confirmed_txes: Family<ChannelLabel, Counter>,

    /// Time from block proposal to confirmation, per channel.
    pub time_to_confirm: Family<ChannelLabel, Histogram>,

    /// Votes tallied by outcome, per channel (§4.5 `CandidateBlocks::tally`).
    pub votes_tallied: Family<VoteLabel, Counter>,

    /// Broadcast deliveries that exhausted `BROADCAST_RETRY_TIMES` and
    /// marked their subscriber disconnected (§4.4).
    pub broadcast_failures: Family<ChannelLabel, Counter>,

    /// Height-Sync runs started, per channel (§4.7).
    pub height_sync_runs: Family<ChannelLabel, Counter>,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics(Arc::new(Inner {
            block_height: Family::default(),
            confirmed_txes: Family::default(),
            time_to_confirm: Family::new_with_constructor(|| {
                Histogram::new(linear_buckets(0.0, 0.1, 20))
            }),
            votes_tallied: Family::default(),
            broadcast_failures: Family::default(),
            height_sync_runs: Family::default(),
        }))
    }

    /// Registers every metric under `registry`, matching the teacher's
    /// `Metrics::register` shape (one `registry.register(name, help, m)`
    /// call per field).
    pub fn register(registry: &mut Registry) -> Self {
        let metrics = Self::new();

        registry.register(
            "block_height",
            "Current confirmed block height",
            metrics.block_height.clone(),
        );
        registry.register(
            "confirmed_txes",
            "Number of confirmed transactions",
            metrics.confirmed_txes.clone(),
        );
        registry.register(
            "time_to_confirm_seconds",
            "Time from block proposal to confirmation",
            metrics.time_to_confirm.clone(),
        );
        registry.register(
            "votes_tallied",
            "Votes tallied by outcome",
            metrics.votes_tallied.clone(),
        );
        registry.register(
            "broadcast_failures",
            "Broadcasts that exhausted their retry budget",
            metrics.broadcast_failures.clone(),
        );
        registry.register(
            "height_sync_runs",
            "Height-Sync runs started",
            metrics.height_sync_runs.clone(),
        );

        metrics
    }

    pub fn record_block_height(&self, channel: &str, height: u64) {
        self.block_height
            .get_or_create(&ChannelLabel { channel: channel.to_string() })
            .set(height as i64);
    }

    pub fn record_confirmed_txes(&self, channel: &str, count: u64) {
        self.confirmed_txes
            .get_or_create(&ChannelLabel { channel: channel.to_string() })
            .inc_by(count);
    }

    pub fn record_vote(&self, channel: &str, outcome: VoteOutcome) {
        self.votes_tallied
            .get_or_create(&VoteLabel { channel: channel.to_string(), outcome })
            .inc();
    }

    pub fn record_broadcast_failure(&self, channel: &str) {
        self.broadcast_failures
            .get_or_create(&ChannelLabel { channel: channel.to_string() })
            .inc();
    }

    pub fn record_height_sync_run(&self, channel: &str) {
        self.height_sync_runs
            .get_or_create(&ChannelLabel { channel: channel.to_string() })
            .inc();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Encodes `registry`'s current state in the Prometheus text exposition
/// format, for the CLI's `/metrics` HTTP handler.
pub fn export(registry: &Registry) -> String {
    let mut buf = String::new();
    prometheus_client::encoding::text::encode(&mut buf, registry).unwrap();
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_height_is_recorded_per_channel() {
        let mut registry = Registry::default();
        let metrics = Metrics::register(&mut registry);

        metrics.record_block_height("chain1", 5);
        metrics.record_block_height("chain2", 9);

        let text = export(&registry);
        assert!(text.contains("block_height"));
    }

    #[test]
    fn vote_family_distinguishes_outcome() {
        let mut registry = Registry::default();
        let metrics = Metrics::register(&mut registry);

        metrics.record_vote("chain1", VoteOutcome::Yea);
        metrics.record_vote("chain1", VoteOutcome::Yea);
        metrics.record_vote("chain1", VoteOutcome::Nay);

        let yea = metrics
            .votes_tallied
            .get_or_create(&VoteLabel { channel: "chain1".to_string(), outcome: VoteOutcome::Yea })
            .get();
        let nay = metrics
            .votes_tallied
            .get_or_create(&VoteLabel { channel: "chain1".to_string(), outcome: VoteOutcome::Nay })
            .get();

        assert_eq!(yea, 2);
        assert_eq!(nay, 1);
    }
}

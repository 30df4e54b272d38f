//! Tunables named explicitly in the specification. Kept as plain constants
//! rather than config fields where the spec treats them as fixed defaults;
//! `siever-config` exposes the subset that's meant to be operator-tunable.
use std::time::Duration;

pub const GRPC_TIMEOUT_BROADCAST_RETRY: Duration = Duration::from_secs(6);
pub const BROADCAST_RETRY_TIMES: u32 = 5;
pub const MAX_WORKERS: usize = 100;

pub const VOTING_RATIO: f64 = 0.65;

pub const TIMEOUT_FOR_PEER_VOTE: Duration = Duration::from_secs(20);
pub const BLOCK_VOTE_TIMEOUT: Duration = Duration::from_secs(600);

pub const INTERVAL_BLOCKGENERATION: Duration = Duration::from_secs(1);
pub const MAX_BLOCK_TX_NUM: usize = 1000;
pub const MAX_BLOCK_KBYTES: usize = 3000 * 1024;
pub const LEADER_BLOCK_CREATION_LIMIT: u32 = 1000;

pub const SLEEP_SECONDS_IN_SERVICE_LOOP: Duration = Duration::from_millis(100);
pub const SLEEP_SECONDS_IN_SERVICE_NONE: Duration = Duration::from_secs(2);

pub const INTERVAL_SECONDS_PROCESS_MONITORING: Duration = Duration::from_secs(30);

/// Not fixed by the spec; the original recycles gRPC channels opportunistically
/// rather than on a fixed timer. We resolve this open question with a fixed
/// reuse window, see DESIGN.md.
pub const STUB_REUSE_TIMEOUT: Duration = Duration::from_secs(60);

/// Sentinel payload reserved for fault-injection nay votes, gated behind
/// `ConsensusConfig::fault_injection` rather than matched on the wire.
pub const TEST_FAIL_VOTE_SIGN: &str = "TEST_FAIL_VOTE_SIGN";

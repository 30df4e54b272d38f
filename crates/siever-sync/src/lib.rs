//! Block-height synchronization (§4.7): invoked when a channel's local
//! height falls behind an observed peer, or a validation step reveals a
//! height/hash mismatch, or right after a `BlockStore::rebuild()` at
//! startup.
//!
//! The round-robin peer walk and the recursive "did we actually catch up"
//! check are kept as plain, synchronously-testable helpers (`pick_next`,
//! `partition_by_height`), separate from the async driver that performs the
//! actual RPCs — mirroring how the teacher's sync crate keeps its
//! `find_next_uncovered_*` helpers pure and its effectful `handle` thin.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use siever_network::rpc::{RpcReply, RpcRequest};
use siever_network::Transport;
use siever_store::BlockStore;
use siever_types::{Block, SievError, SievResult};
use tracing::{info, warn};

/// Guards one channel's Height-Sync against concurrent invocations (§4.7
/// point 3: "concurrent invocations return immediately").
#[derive(Default)]
pub struct SyncGuard {
    in_progress: AtomicBool,
}

impl SyncGuard {
    pub fn new() -> Self {
        SyncGuard::default()
    }

    /// Returns `true` if this call acquired the guard (and must call
    /// [`SyncGuard::finish`] when done), `false` if a sync was already
    /// running.
    pub fn try_begin(&self) -> bool {
        self.in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn finish(&self) {
        self.in_progress.store(false, Ordering::SeqCst);
    }
}

/// Picks the next peer to try, round-robin, by rotating the front of the
/// queue to the back. Returns `None` if the queue is empty.
pub fn pick_next(queue: &mut VecDeque<String>) -> Option<String> {
    let peer = queue.pop_front()?;
    queue.push_back(peer.clone());
    Some(peer)
}

/// Drops `target` from the round's stub list (it errored or timed out).
pub fn evict(queue: &mut VecDeque<String>, target: &str) {
    queue.retain(|t| t != target);
}

/// The max `block_height` observed across a set of `GetStatus` replies.
pub fn max_observed_height(heights: &[u64]) -> Option<u64> {
    heights.iter().copied().max()
}

/// Runs Height-Sync for one channel to completion (or until the stub list
/// empties and can't be rebuilt). `peer_targets` excludes self and is
/// refreshed by the caller via `refresh_peers` when the round's working
/// list is exhausted.
pub async fn run(
    channel: &str,
    store: &mut BlockStore,
    transport: Arc<dyn Transport>,
    guard: &SyncGuard,
    mut peer_targets: Vec<String>,
    refresh_peers: impl Fn() -> Vec<String>,
) -> SievResult<()> {
    if !guard.try_begin() {
        info!(%channel, "height-sync already in progress, skipping");
        return Ok(());
    }

    let result = run_inner(channel, store, transport, &mut peer_targets, refresh_peers).await;
    guard.finish();
    result
}

async fn run_inner(
    channel: &str,
    store: &mut BlockStore,
    transport: Arc<dyn Transport>,
    peer_targets: &mut Vec<String>,
    refresh_peers: impl Fn() -> Vec<String>,
) -> SievResult<()> {
    let mut max_height = fetch_max_height(channel, &transport, peer_targets).await?;
    let mut local_height = store.last_height().unwrap_or(0);

    if local_height >= max_height {
        info!(%channel, local_height, max_height, "height-sync: already up to date");
        return Ok(());
    }

    let mut queue: VecDeque<String> = peer_targets.iter().cloned().collect();

    while local_height < max_height {
        let Some(target) = pick_next(&mut queue) else {
            let refreshed = refresh_peers();
            if refreshed.is_empty() {
                return Err(SievError::TransportUnreachable(
                    "height-sync: no peers left to sync from".to_string(),
                ));
            }
            queue = refreshed.into_iter().collect();
            continue;
        };

        let request = RpcRequest::BlockSync { channel: channel.to_string(), height: local_height + 1 };
        let timeout = siever_network::rpc::timeout_for(&request);
        let reply = transport.send(&target, request, timeout).await;

        let (block, peer_max_height) = match reply {
            Ok(RpcReply::BlockSync(sync_reply)) if sync_reply.block_bytes.is_some() => {
                let bytes = sync_reply.block_bytes.unwrap();
                let block: Block = match serde_json::from_slice(&bytes) {
                    Ok(b) => b,
                    Err(e) => {
                        warn!(%target, error = %e, "height-sync: malformed block body, evicting peer");
                        evict(&mut queue, &target);
                        continue;
                    }
                };
                (block, sync_reply.max_block_height)
            }
            Ok(_) | Err(_) => {
                warn!(%target, "height-sync: peer errored or had no block, evicting");
                evict(&mut queue, &target);
                continue;
            }
        };

        match store.append(&block) {
            Ok(()) => {
                local_height = store.last_height().unwrap_or(local_height);
            }
            Err(e) if is_hash_or_duplicate_mismatch(&e) => {
                warn!(%channel, error = %e, "height-sync: store mismatch, clearing and resyncing from genesis");
                store.clear().map_err(|e| SievError::StoreCorrupt(e.to_string()))?;
                local_height = 0;
                continue;
            }
            Err(e) => return Err(SievError::StoreCorrupt(e.to_string())),
        }

        max_height = max_height.max(peer_max_height);
    }

    info!(%channel, local_height, "height-sync: complete");
    Ok(())
}

async fn fetch_max_height(
    channel: &str,
    transport: &Arc<dyn Transport>,
    peer_targets: &[String],
) -> SievResult<u64> {
    let mut heights = Vec::new();
    for target in peer_targets {
        let request = RpcRequest::GetStatus { channel: channel.to_string() };
        if let Ok(RpcReply::Status(status)) =
            transport.send(target, request, std::time::Duration::from_secs(30)).await
        {
            heights.push(status.block_height);
        }
    }
    max_observed_height(&heights).ok_or_else(|| {
        SievError::TransportUnreachable("height-sync: no peer responded to GetStatus".to_string())
    })
}

fn is_hash_or_duplicate_mismatch(err: &siever_store::StoreError) -> bool {
    matches!(
        err,
        siever_store::StoreError::Sieve(SievError::HashMismatch { .. })
            | siever_store::StoreError::Sieve(SievError::DuplicateHeight { .. })
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_next_rotates_round_robin() {
        let mut q: VecDeque<String> = vec!["a", "b", "c"].into_iter().map(String::from).collect();
        assert_eq!(pick_next(&mut q), Some("a".to_string()));
        assert_eq!(pick_next(&mut q), Some("b".to_string()));
        assert_eq!(pick_next(&mut q), Some("c".to_string()));
        assert_eq!(pick_next(&mut q), Some("a".to_string()));
    }

    #[test]
    fn pick_next_on_empty_queue_is_none() {
        let mut q: VecDeque<String> = VecDeque::new();
        assert_eq!(pick_next(&mut q), None);
    }

    #[test]
    fn evict_removes_target_and_preserves_order() {
        let mut q: VecDeque<String> = vec!["a", "b", "c"].into_iter().map(String::from).collect();
        evict(&mut q, "b");
        assert_eq!(q, VecDeque::from(vec!["a".to_string(), "c".to_string()]));
    }

    #[test]
    fn max_observed_height_of_empty_is_none() {
        assert_eq!(max_observed_height(&[]), None);
    }

    #[test]
    fn max_observed_height_picks_largest() {
        assert_eq!(max_observed_height(&[3, 7, 1]), Some(7));
    }

    #[test]
    fn guard_rejects_concurrent_entry() {
        let guard = SyncGuard::new();
        assert!(guard.try_begin());
        assert!(!guard.try_begin());
        guard.finish();
        assert!(guard.try_begin());
    }
}

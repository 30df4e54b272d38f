//! Authoritative view of one channel's membership: identity, network target,
//! liveness, leader pointer, and the ordered ring used for leader rotation
//! (§4.3). Stub caching lives here too, since reuse is a property of the
//! membership view, not of the transport.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use siever_types::constants::STUB_REUSE_TIMEOUT;
use siever_types::{PeerEntry, PeerStatus, SievError, SievResult};
use uuid::Uuid;

/// A cached, connected RPC client to one peer. The network crate supplies
/// the concrete implementation; `PeerManager` only needs to know a stub can
/// report which peer it's connected to, so it can be safely reused or
/// evicted.
pub trait PeerStub: Send + Sync {
    fn peer_id(&self) -> Uuid;
}

/// Builds a `PeerStub` for a given `PeerEntry`, with the actual connect
/// performed wherever `siever-network` implements the trait.
pub trait PeerStubFactory: Send + Sync {
    fn connect(&self, peer: &PeerEntry) -> SievResult<Arc<dyn PeerStub>>;
}

struct CachedStub {
    stub: Arc<dyn PeerStub>,
    fetched_at: Instant,
}

/// The ordered peer set for one channel, plus the current leader pointer.
///
/// Invariants: (a) `order` is stable across `dump`/`load`; (b) at most one
/// leader, or none when `peers` is empty; (c) `get_next_leader` walks the
/// ordered sequence skipping `Disconnected` entries.
pub struct PeerManager {
    peers: Vec<PeerEntry>,
    leader_peer_id: Option<Uuid>,
    stubs: Mutex<HashMap<Uuid, CachedStub>>,
}

impl PeerManager {
    pub fn new() -> Self {
        PeerManager {
            peers: Vec::new(),
            leader_peer_id: None,
            stubs: Mutex::new(HashMap::new()),
        }
    }

    pub fn peers(&self) -> &[PeerEntry] {
        &self.peers
    }

    pub fn find(&self, peer_id: Uuid) -> Option<&PeerEntry> {
        self.peers.iter().find(|p| p.peer_id == peer_id)
    }

    pub fn add(&mut self, peer: PeerEntry) {
        if let Some(existing) = self.peers.iter_mut().find(|p| p.peer_id == peer.peer_id) {
            *existing = peer;
            return;
        }
        self.peers.push(peer);
        self.peers.sort_by_key(|p| p.order);
    }

    pub fn remove(&mut self, peer_id: Uuid) {
        self.peers.retain(|p| p.peer_id != peer_id);
        if self.leader_peer_id == Some(peer_id) {
            self.leader_peer_id = None;
        }
        self.stubs.lock().unwrap().remove(&peer_id);
    }

    pub fn set_leader(&mut self, peer_id: Uuid) -> SievResult<()> {
        if !self.peers.iter().any(|p| p.peer_id == peer_id) {
            return Err(SievError::ChannelUnknown(peer_id.to_string()));
        }
        self.leader_peer_id = Some(peer_id);
        Ok(())
    }

    pub fn get_leader(&self) -> Option<&PeerEntry> {
        let id = self.leader_peer_id?;
        self.peers.iter().find(|p| p.peer_id == id)
    }

    /// Walks the ordered sequence starting just after the current leader
    /// (or from the front, if there is none), skipping `Disconnected` peers
    /// unless `skip_disconnected` is false, and wrapping at the end.
    pub fn get_next_leader(&self, skip_disconnected: bool) -> Option<&PeerEntry> {
        if self.peers.is_empty() {
            return None;
        }

        let start = match self.leader_peer_id {
            Some(id) => self
                .peers
                .iter()
                .position(|p| p.peer_id == id)
                .map(|i| (i + 1) % self.peers.len())
                .unwrap_or(0),
            None => 0,
        };

        (0..self.peers.len())
            .map(|offset| &self.peers[(start + offset) % self.peers.len()])
            .find(|p| !skip_disconnected || p.status != PeerStatus::Disconnected)
    }

    pub fn mark(&mut self, peer_id: Uuid, status: PeerStatus) {
        if let Some(peer) = self.peers.iter_mut().find(|p| p.peer_id == peer_id) {
            peer.status = status;
            peer.last_contact = Some(now_unix());
        }
        if status == PeerStatus::Disconnected {
            self.stubs.lock().unwrap().remove(&peer_id);
        }
    }

    pub fn dump(&self) -> SievResult<String> {
        serde_json::to_string(&self.peers).map_err(|e| SievError::SchemaInvalid(e.to_string()))
    }

    pub fn load(&mut self, json: &str) -> SievResult<()> {
        let mut peers: Vec<PeerEntry> =
            serde_json::from_str(json).map_err(|e| SievError::SchemaInvalid(e.to_string()))?;
        peers.sort_by_key(|p| p.order);
        self.peers = peers;
        if !self.peers.iter().any(|p| Some(p.peer_id) == self.leader_peer_id) {
            self.leader_peer_id = None;
        }
        Ok(())
    }

    /// Returns a cached stub for `peer_id` if one was fetched within
    /// `STUB_REUSE_TIMEOUT`, otherwise connects a fresh one via `factory`
    /// and caches it.
    pub fn get_stub(
        &self,
        peer_id: Uuid,
        factory: &dyn PeerStubFactory,
    ) -> SievResult<Arc<dyn PeerStub>> {
        let peer = self
            .peers
            .iter()
            .find(|p| p.peer_id == peer_id)
            .ok_or_else(|| SievError::ChannelUnknown(peer_id.to_string()))?;

        let mut stubs = self.stubs.lock().unwrap();
        if let Some(cached) = stubs.get(&peer_id) {
            if cached.fetched_at.elapsed() < STUB_REUSE_TIMEOUT {
                return Ok(cached.stub.clone());
            }
        }

        let stub = factory.connect(peer)?;
        stubs.insert(
            peer_id,
            CachedStub {
                stub: stub.clone(),
                fetched_at: Instant::now(),
            },
        );
        tracing::debug!(%peer_id, "connected fresh peer stub");
        Ok(stub)
    }
}

impl Default for PeerManager {
    fn default() -> Self {
        Self::new()
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(order: u64, status: PeerStatus) -> PeerEntry {
        PeerEntry::new(
            Uuid::new_v4(),
            "group1".to_string(),
            format!("127.0.0.1:{}", 7100 + order),
            vec![],
            order,
        )
        .with_status(status)
    }

    #[test]
    fn rotation_skips_disconnected_and_wraps() {
        let mut mgr = PeerManager::new();
        let a = entry(0, PeerStatus::Connected);
        let b = entry(1, PeerStatus::Disconnected);
        let c = entry(2, PeerStatus::Connected);
        mgr.add(a.clone());
        mgr.add(b.clone());
        mgr.add(c.clone());

        mgr.set_leader(a.peer_id).unwrap();
        let next = mgr.get_next_leader(true).unwrap();
        assert_eq!(next.peer_id, c.peer_id);

        mgr.set_leader(c.peer_id).unwrap();
        let next = mgr.get_next_leader(true).unwrap();
        assert_eq!(next.peer_id, a.peer_id);
    }

    #[test]
    fn dump_and_load_round_trips_order() {
        let mut mgr = PeerManager::new();
        mgr.add(entry(2, PeerStatus::Connected));
        mgr.add(entry(0, PeerStatus::Connected));
        mgr.add(entry(1, PeerStatus::Connected));

        let json = mgr.dump().unwrap();
        let mut reloaded = PeerManager::new();
        reloaded.load(&json).unwrap();

        let orders: Vec<u64> = reloaded.peers().iter().map(|p| p.order).collect();
        assert_eq!(orders, vec![0, 1, 2]);
    }

    #[test]
    fn remove_clears_leader_and_stub_cache() {
        let mut mgr = PeerManager::new();
        let a = entry(0, PeerStatus::Connected);
        mgr.add(a.clone());
        mgr.set_leader(a.peer_id).unwrap();

        mgr.remove(a.peer_id);
        assert!(mgr.get_leader().is_none());
        assert!(mgr.peers().is_empty());
    }

    #[test]
    fn empty_manager_has_no_next_leader() {
        let mgr = PeerManager::new();
        assert!(mgr.get_next_leader(true).is_none());
    }

    struct CountingFactory {
        calls: Mutex<u32>,
    }

    struct DummyStub(Uuid);
    impl PeerStub for DummyStub {
        fn peer_id(&self) -> Uuid {
            self.0
        }
    }

    impl PeerStubFactory for CountingFactory {
        fn connect(&self, peer: &PeerEntry) -> SievResult<Arc<dyn PeerStub>> {
            *self.calls.lock().unwrap() += 1;
            Ok(Arc::new(DummyStub(peer.peer_id)))
        }
    }

    #[test]
    fn get_stub_reuses_cached_connection() {
        let mut mgr = PeerManager::new();
        let a = entry(0, PeerStatus::Connected);
        mgr.add(a.clone());

        let factory = CountingFactory { calls: Mutex::new(0) };
        mgr.get_stub(a.peer_id, &factory).unwrap();
        mgr.get_stub(a.peer_id, &factory).unwrap();

        assert_eq!(*factory.calls.lock().unwrap(), 1);
    }
}

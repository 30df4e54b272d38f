use serde::{Deserialize, Serialize};

/// Liveness state of a [`PeerEntry`] as observed by the owning channel's
/// `PeerManager`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerStatus {
    Unknown,
    Connected,
    Disconnected,
}

/// One member of a channel's peer set.
///
/// `order` is the stable join index used for deterministic leader rotation;
/// it is assigned once and never reused, even if the peer is later removed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PeerEntry {
    pub peer_id: uuid::Uuid,
    pub group_id: String,
    pub target: String,
    #[serde(with = "hex::serde")]
    pub cert: Vec<u8>,
    pub status: PeerStatus,
    pub order: u64,
    pub last_contact: Option<i64>,
    pub made_block_count: u32,
}

impl PeerEntry {
    pub fn new(peer_id: uuid::Uuid, group_id: String, target: String, cert: Vec<u8>, order: u64) -> Self {
        PeerEntry {
            peer_id,
            group_id,
            target,
            cert,
            status: PeerStatus::Unknown,
            order,
            last_contact: None,
            made_block_count: 0,
        }
    }

    pub fn with_status(mut self, status: PeerStatus) -> Self {
        self.status = status;
        self
    }
}

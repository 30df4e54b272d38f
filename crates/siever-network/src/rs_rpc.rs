//! The directory-service (RS) RPC surface, carried on its own
//! `/siever/rs/1.0.0` protocol so it can evolve independently of the
//! per-channel peer RPC (§6).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub score_package: String,
    pub peers: Vec<PeerTarget>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeerTarget {
    pub peer_target: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectStatus {
    Connected,
    Rejected,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum RsRequest {
    GetChannelInfos {
        peer_id: Uuid,
        peer_target: String,
        group_id: String,
    },
    ConnectPeer {
        channel: String,
        peer_id: Uuid,
        peer_target: String,
        group_id: String,
        cert: Vec<u8>,
    },
    GetPeerList {
        channel: String,
    },
    GetPeerStatus {
        channel: String,
        peer_id: Uuid,
    },
    GetRandomTable,
    RsSendChannelManageInfo {
        manage_info_json: String,
    },
    RsRestartChannel {
        channel: String,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum RsReply {
    ChannelInfos(std::collections::HashMap<String, ChannelInfo>),
    ConnectPeer {
        status: ConnectStatus,
        peer_list_blob: String,
    },
    PeerList(String),
    PeerStatus(String),
    RandomTable(Vec<u8>),
    Ack,
    Error(String),
}

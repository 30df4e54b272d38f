//! The outer peer-to-peer RPC surface: one request/reply enum pair carried
//! over `libp2p::request_response` with the `cbor` codec (§6). Each method
//! below mirrors one row of the method/timeout table; the timeout itself is
//! enforced by the caller (`tokio::time::timeout` around the outbound
//! request), not by the protocol.

use serde::{Deserialize, Serialize};
use siever_types::Hash;
use uuid::Uuid;

/// Coarse outcome carried on most replies, analogous to an HTTP status but
/// closed over the domain's own error kinds (§7).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseCode {
    Ok,
    SchemaInvalid,
    SignatureInvalid,
    HeightMismatch,
    HashMismatch,
    ChannelUnknown,
    LeaderUnknown,
    Busy,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommonReply {
    pub code: ResponseCode,
    pub msg: String,
}

impl CommonReply {
    pub fn ok() -> Self {
        CommonReply { code: ResponseCode::Ok, msg: String::new() }
    }

    pub fn err(code: ResponseCode, msg: impl Into<String>) -> Self {
        CommonReply { code, msg: msg.into() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteCode {
    Yea,
    Nay,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerType {
    Peer,
    Citizen,
}

/// One RPC call on the outer peer-to-peer protocol `/siever/rpc/1.0.0`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum RpcRequest {
    GetStatus { channel: String },
    AddTx { channel: String, tx_bytes: Vec<u8> },
    GetTx { channel: String, tx_hash: Hash },
    CreateTx { channel: String, data_json: String },
    GetInvokeResult { channel: String, tx_hash: Hash },
    GetBlock {
        channel: String,
        block_hash: Option<Hash>,
        block_height: Option<u64>,
        block_filter_csv: String,
        tx_filter_csv: String,
    },
    GetLastBlockHash { channel: String },
    Query { channel: String, params_json: String },
    AnnounceUnconfirmedBlock { channel: String, block_bytes: Vec<u8> },
    AnnounceConfirmedBlock {
        channel: String,
        block_hash: Hash,
        block_bytes: Option<Vec<u8>>,
    },
    VoteUnconfirmedBlock {
        channel: String,
        block_hash: Hash,
        peer_id: Uuid,
        group_id: String,
        vote_code: VoteCode,
        message: String,
    },
    BlockSync { channel: String, height: u64 },
    AnnounceNewPeer {
        channel: String,
        peer_bytes: Vec<u8>,
        peer_target: String,
    },
    AnnounceDeletePeer { peer_id: Uuid, group_id: String },
    AnnounceNewLeader {
        channel: String,
        complained_leader_id: Uuid,
        new_leader_id: Uuid,
        message: String,
    },
    ComplainLeader {
        channel: String,
        complained_leader_id: Uuid,
        new_leader_id: Uuid,
        message: String,
    },
    Subscribe {
        channel: String,
        peer_target: String,
        peer_id: Uuid,
        group_id: String,
        peer_type: PeerType,
    },
    UnSubscribe {
        channel: String,
        peer_target: String,
        peer_id: Uuid,
        group_id: String,
        peer_type: PeerType,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusReply {
    pub status_json: String,
    pub block_height: u64,
    pub total_tx: u64,
    pub is_leader_complaining: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GetTxReply {
    pub code: ResponseCode,
    pub meta_json: String,
    pub data: Vec<u8>,
    pub signature: Vec<u8>,
    pub public_key: Vec<u8>,
    pub more_info: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateTxReply {
    pub code: ResponseCode,
    pub tx_hash: Hash,
    pub more_info: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GetInvokeResultReply {
    pub code: ResponseCode,
    pub result_json: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GetBlockReply {
    pub code: ResponseCode,
    pub block_hash: Option<Hash>,
    pub block_data_json: String,
    pub tx_data_json: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockReply {
    pub code: ResponseCode,
    pub message: String,
    pub block_hash: Option<Hash>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryReply {
    pub code: ResponseCode,
    pub response: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockSyncReply {
    pub code: ResponseCode,
    pub block_height: u64,
    pub max_block_height: u64,
    pub block_bytes: Option<Vec<u8>>,
}

/// Reply counterpart to [`RpcRequest`]; each variant lines up positionally.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum RpcReply {
    Status(StatusReply),
    Common(CommonReply),
    Tx(GetTxReply),
    CreateTx(CreateTxReply),
    InvokeResult(GetInvokeResultReply),
    Block(GetBlockReply),
    LastBlockHash(BlockReply),
    Query(QueryReply),
    BlockSync(BlockSyncReply),
}

/// The per-method timeout from §6, used by callers wrapping outbound
/// requests in `tokio::time::timeout`.
pub fn timeout_for(request: &RpcRequest) -> std::time::Duration {
    use std::time::Duration;
    match request {
        RpcRequest::AnnounceUnconfirmedBlock { .. }
        | RpcRequest::AnnounceConfirmedBlock { .. }
        | RpcRequest::VoteUnconfirmedBlock { .. } => {
            siever_types::constants::GRPC_TIMEOUT_BROADCAST_RETRY
        }
        RpcRequest::Query { .. } => Duration::from_secs(120),
        _ => Duration::from_secs(30),
    }
}

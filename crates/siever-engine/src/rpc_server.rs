//! The outer peer-to-peer RPC server (§5: "a thread pool (`MAX_WORKERS`)
//! services inbound RPCs on both the outer ... and inner ... server"):
//! translates each inbound [`RpcRequest`] into a [`NodeService`] call and
//! replies on the same [`InboundRpc`] the transport handed us, bounding
//! in-flight requests with a semaphore the way the teacher's `engine`
//! bounds its own actor mailboxes.
//!
//! Grounded in `siever-network::swarm_transport`'s inbound-request
//! channel design (a background task hands each party's request to a
//! `reply`-capable handle) and `siever-rs::server`'s
//! request/dispatch/reply shape.

use std::sync::Arc;

use siever_network::rpc::{
    BlockReply, BlockSyncReply, CommonReply, CreateTxReply, GetBlockReply, GetInvokeResultReply,
    GetTxReply, QueryReply, ResponseCode, RpcReply, RpcRequest, StatusReply, VoteCode,
};
use siever_network::swarm_transport::InboundRpc;
use siever_network::RsTransport;
use siever_types::{Block, SievError};
use siever_votekeeper::Vote as TallyVote;
use tokio::sync::{mpsc, Semaphore};
use tracing::warn;

use crate::node_service::NodeService;

/// Runs until `inbound` closes, dispatching each request on its own task
/// bounded by `MAX_WORKERS` concurrent in-flight handlers (§5).
pub async fn serve<T: RsTransport + 'static>(
    node: Arc<NodeService<T>>,
    mut inbound: mpsc::UnboundedReceiver<InboundRpc>,
) {
    let permits = Arc::new(Semaphore::new(siever_types::constants::MAX_WORKERS));

    while let Some(call) = inbound.recv().await {
        let node = node.clone();
        let permits = permits.clone();
        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else { return };
            let InboundRpc { request, .. } = &call;
            let reply = dispatch(&node, request.clone());
            call.reply(reply);
        });
    }
}

/// Translates one [`RpcRequest`] into the matching [`NodeService`] call and
/// builds its [`RpcReply`]. Exposed (not just used by [`serve`]) so a
/// loopback [`Transport`](siever_network::Transport) can route requests
/// straight into a node without a real swarm in between.
pub fn dispatch<T: RsTransport>(node: &NodeService<T>, request: RpcRequest) -> RpcReply {
    match request {
        RpcRequest::GetStatus { channel } => match node.tip(&channel) {
            Ok((height, _)) => {
                let total_tx = node.total_tx(&channel).unwrap_or(0);
                RpcReply::Status(StatusReply {
                    status_json: "{}".to_string(),
                    block_height: height,
                    total_tx,
                    is_leader_complaining: false,
                })
            }
            Err(e) => common_err(e),
        },

        RpcRequest::AddTx { channel, tx_bytes } => match serde_json::from_slice(&tx_bytes) {
            Ok(tx) => match node.submit_tx(&channel, tx) {
                Ok(()) => RpcReply::Common(CommonReply::ok()),
                Err(e) => common_err(e),
            },
            Err(e) => RpcReply::Common(CommonReply::err(ResponseCode::SchemaInvalid, e.to_string())),
        },

        RpcRequest::GetTx { channel, tx_hash } => match node.find_tx(&channel, &tx_hash) {
            Ok(Some(block)) => {
                let tx = block.confirmed_transactions.iter().find(|t| t.tx_hash == tx_hash);
                match tx {
                    Some(tx) => RpcReply::Tx(GetTxReply {
                        code: ResponseCode::Ok,
                        meta_json: serde_json::to_string(&tx).unwrap_or_default(),
                        data: tx.data.clone(),
                        signature: tx.signature.clone(),
                        public_key: tx.public_key.clone(),
                        more_info: String::new(),
                    }),
                    None => RpcReply::Tx(not_found_tx()),
                }
            }
            Ok(None) => RpcReply::Tx(not_found_tx()),
            Err(e) => RpcReply::Tx(GetTxReply {
                code: code_for(&e),
                meta_json: String::new(),
                data: vec![],
                signature: vec![],
                public_key: vec![],
                more_info: e.to_string(),
            }),
        },

        RpcRequest::CreateTx { channel, data_json } => match node.create_tx(&channel, &data_json) {
            Ok(tx) => RpcReply::CreateTx(CreateTxReply {
                code: ResponseCode::Ok,
                tx_hash: tx.tx_hash,
                more_info: String::new(),
            }),
            Err(e) => RpcReply::CreateTx(CreateTxReply {
                code: code_for(&e),
                tx_hash: siever_types::Hash::ZERO,
                more_info: e.to_string(),
            }),
        },

        RpcRequest::GetInvokeResult { channel, tx_hash } => match node.invoke_result(&channel, &tx_hash) {
            Ok(Some(result_json)) => RpcReply::InvokeResult(GetInvokeResultReply { code: ResponseCode::Ok, result_json }),
            Ok(None) => RpcReply::InvokeResult(GetInvokeResultReply {
                code: ResponseCode::Ok,
                result_json: "null".to_string(),
            }),
            Err(e) => RpcReply::InvokeResult(GetInvokeResultReply { code: code_for(&e), result_json: String::new() }),
        },

        RpcRequest::GetBlock { channel, block_hash, block_height, .. } => {
            let found = if let Some(hash) = block_hash {
                node.find_by_hash(&channel, &hash)
            } else if let Some(height) = block_height {
                node.find_by_height(&channel, height)
            } else {
                node.tip(&channel).and_then(|(height, _)| node.find_by_height(&channel, height))
            };

            match found {
                Ok(Some(block)) => RpcReply::Block(block_to_reply(&block)),
                Ok(None) => RpcReply::Block(GetBlockReply {
                    code: ResponseCode::ChannelUnknown,
                    block_hash: None,
                    block_data_json: String::new(),
                    tx_data_json: vec![],
                }),
                Err(e) => RpcReply::Block(GetBlockReply {
                    code: code_for(&e),
                    block_hash: None,
                    block_data_json: String::new(),
                    tx_data_json: vec![],
                }),
            }
        }

        RpcRequest::GetLastBlockHash { channel } => match node.tip(&channel) {
            Ok((_, Some(hash))) => RpcReply::LastBlockHash(BlockReply { code: ResponseCode::Ok, message: String::new(), block_hash: Some(hash) }),
            Ok((_, None)) => RpcReply::LastBlockHash(BlockReply { code: ResponseCode::Ok, message: "empty chain".to_string(), block_hash: None }),
            Err(e) => RpcReply::LastBlockHash(BlockReply { code: code_for(&e), message: e.to_string(), block_hash: None }),
        },

        // The score service is an external collaborator out of scope (§1);
        // `Query` is proxied there in a full deployment, so this node
        // reports it unavailable rather than answering locally.
        RpcRequest::Query { .. } => RpcReply::Query(QueryReply {
            code: ResponseCode::Busy,
            response: "score service unavailable".to_string(),
        }),

        RpcRequest::AnnounceUnconfirmedBlock { channel, block_bytes } => match serde_json::from_slice::<Block>(&block_bytes) {
            Ok(block) => {
                let _ = node.announce_unconfirmed(&channel, block);
                RpcReply::Common(CommonReply::ok())
            }
            Err(e) => RpcReply::Common(CommonReply::err(ResponseCode::SchemaInvalid, e.to_string())),
        },

        RpcRequest::AnnounceConfirmedBlock { channel, block_hash, block_bytes } => {
            let body = block_bytes.and_then(|b| serde_json::from_slice::<Block>(&b).ok());
            let _ = node.announce_confirmed(&channel, block_hash, body);
            RpcReply::Common(CommonReply::ok())
        }

        RpcRequest::VoteUnconfirmedBlock { channel, block_hash, peer_id, vote_code, .. } => {
            let vote = match vote_code {
                VoteCode::Yea => TallyVote::Yea,
                VoteCode::Nay => TallyVote::Nay,
            };
            match node.vote(&channel, block_hash, peer_id, vote) {
                Ok(()) => RpcReply::Common(CommonReply::ok()),
                Err(e) => common_err(e),
            }
        }

        RpcRequest::BlockSync { channel, height } => {
            let max_height = node.tip(&channel).map(|(h, _)| h).unwrap_or(0);
            match node.find_by_height(&channel, height) {
                Ok(Some(block)) => RpcReply::BlockSync(BlockSyncReply {
                    code: ResponseCode::Ok,
                    block_height: height,
                    max_block_height: max_height,
                    block_bytes: serde_json::to_vec(&block).ok(),
                }),
                Ok(None) => RpcReply::BlockSync(BlockSyncReply {
                    code: ResponseCode::HeightMismatch,
                    block_height: height,
                    max_block_height: max_height,
                    block_bytes: None,
                }),
                Err(e) => RpcReply::BlockSync(BlockSyncReply {
                    code: code_for(&e),
                    block_height: height,
                    max_block_height: max_height,
                    block_bytes: None,
                }),
            }
        }

        RpcRequest::AnnounceNewPeer { channel, peer_bytes, peer_target: _ } => {
            match serde_json::from_slice(&peer_bytes) {
                Ok(peer) => match node.announce_new_peer(&channel, peer) {
                    Ok(()) => RpcReply::Common(CommonReply::ok()),
                    Err(e) => common_err(e),
                },
                Err(e) => RpcReply::Common(CommonReply::err(ResponseCode::SchemaInvalid, e.to_string())),
            }
        }

        RpcRequest::AnnounceDeletePeer { peer_id, group_id: _ } => {
            // Applies to every channel this node knows about, matching
            // `AnnounceDeletePeer`'s channel-agnostic signature (§6).
            for (channel, _, _) in node.channel_stats() {
                let _ = node.announce_delete_peer(&channel, peer_id);
            }
            RpcReply::Common(CommonReply::ok())
        }

        RpcRequest::AnnounceNewLeader { channel, new_leader_id, .. } => match node.announce_new_leader(&channel, new_leader_id) {
            Ok(()) => RpcReply::Common(CommonReply::ok()),
            Err(e) => common_err(e),
        },

        RpcRequest::ComplainLeader { channel, new_leader_id, message, .. } => {
            // §9: "the full complaint-vote protocol is unspecified"; this
            // implements the recommended immediate-override behavior.
            warn!(%channel, %message, "leader complaint received, applying immediate override");
            match node.announce_new_leader(&channel, new_leader_id) {
                Ok(()) => RpcReply::Common(CommonReply::ok()),
                Err(e) => common_err(e),
            }
        }

        RpcRequest::Subscribe { channel, peer_target, .. } => match node.subscribe(&channel, peer_target) {
            Ok(()) => RpcReply::Common(CommonReply::ok()),
            Err(e) => common_err(e),
        },

        RpcRequest::UnSubscribe { channel, peer_target, .. } => match node.unsubscribe(&channel, peer_target) {
            Ok(()) => RpcReply::Common(CommonReply::ok()),
            Err(e) => common_err(e),
        },
    }
}

fn block_to_reply(block: &Block) -> GetBlockReply {
    GetBlockReply {
        code: ResponseCode::Ok,
        block_hash: Some(block.block_hash),
        block_data_json: serde_json::to_string(block).unwrap_or_default(),
        tx_data_json: block
            .confirmed_transactions
            .iter()
            .map(|tx| serde_json::to_string(tx).unwrap_or_default())
            .collect(),
    }
}

fn not_found_tx() -> GetTxReply {
    GetTxReply {
        code: ResponseCode::ChannelUnknown,
        meta_json: String::new(),
        data: vec![],
        signature: vec![],
        public_key: vec![],
        more_info: "tx not found".to_string(),
    }
}

fn common_err(e: SievError) -> RpcReply {
    RpcReply::Common(CommonReply::err(code_for(&e), e.to_string()))
}

fn code_for(e: &SievError) -> ResponseCode {
    match e {
        SievError::SchemaInvalid(_) => ResponseCode::SchemaInvalid,
        SievError::SignatureInvalid => ResponseCode::SignatureInvalid,
        SievError::HeightMismatch { .. } => ResponseCode::HeightMismatch,
        SievError::HashMismatch { .. } | SievError::DuplicateHeight { .. } => ResponseCode::HashMismatch,
        SievError::ChannelUnknown(_) => ResponseCode::ChannelUnknown,
        SievError::LeaderUnknown(_) => ResponseCode::LeaderUnknown,
        _ => ResponseCode::Busy,
    }
}

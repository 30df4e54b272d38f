//! Composition root for a running siever node (§4.8): [`ChannelRuntime`]
//! owns the per-channel actors and store, [`NodeService`] owns the set of
//! channels plus the node-wide RS client and signer.

pub mod channel_runtime;
pub mod node_service;
pub mod rpc_server;

pub use channel_runtime::{ChannelBootArgs, ChannelRuntime, ScoreServiceHandle};
pub use node_service::NodeService;
pub use rpc_server::dispatch;

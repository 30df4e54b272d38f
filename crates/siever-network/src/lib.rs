//! Peer-to-peer transport: the wire message enums (§6), the `libp2p` swarm
//! driving them, and the per-channel `BroadcastWorker` that fans them out.

pub mod behaviour;
pub mod broadcast;
pub mod rpc;
pub mod rs_rpc;
pub mod swarm_transport;
pub mod transport;

pub use broadcast::{BroadcastMsg, BroadcastWorker, BroadcastWorkerRef, SubscriberFailed};
pub use swarm_transport::multiaddr_from_target;
pub use transport::{RsTransport, Transport};

//! Per-channel block-agreement (§4.5–§4.7): [`core`] is the pure
//! leader/voter state machine, [`actor`] is the `ractor` shell that drives
//! it against the real `BlockStore`, `Signer`, `BroadcastWorkerRef` and
//! `PeerManager`.

pub mod actor;
pub mod core;

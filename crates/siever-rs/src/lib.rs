//! RadioStation (RS): the directory service that hands channel membership
//! to joining peers (§2, §6). The RS server's own persistence and admin UI
//! are out of scope (§1) — this crate only provides the typed client a
//! booting `NodeService` speaks, plus a minimal in-memory server so the
//! CLI's `rs` subcommand and integration tests have something to talk to.

mod client;
mod server;

pub use client::RsClient;
pub use server::{RsServer, RsServerMsg, RsServerRef, State as RsServerState};

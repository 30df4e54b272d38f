//! `<prog> rs` (spec.md §6): runs a minimal RadioStation directory-service
//! node — seeds [`RsServer`] from the configured channel membership, then
//! bridges inbound RS RPCs off the swarm into the actor.

use std::collections::HashMap;
use std::time::Duration;

use color_eyre::eyre::Result;
use libp2p::identity::Keypair;
use ractor::Actor;
use siever_config::Config;
use siever_network::multiaddr_from_target;
use siever_network::rs_rpc::{ChannelInfo, PeerTarget};
use siever_network::swarm_transport::SwarmTransport;
use siever_rs::{RsServer, RsServerMsg};
use tracing::{info, warn};

use crate::cli::RsArgs;
use crate::logging;

const RS_CALL_TIMEOUT: u64 = 5_000;

pub async fn run(args: RsArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => siever_config::load_config(path)?,
        None => Config::default(),
    };
    logging::init(&config.logging);

    if let Some(port) = args.port {
        config.network.listen_addr = format!("0.0.0.0:{port}");
    }
    if args.cert.is_some() {
        warn!("--cert is accepted for launcher-surface compatibility; certificate issuance is out of scope (spec.md §1)");
    }
    if args.seed.is_some() {
        info!("a --seed was provided; peers using SeedDerivedSigner should fetch it via GetRandomTable");
    }
    if args.detach {
        warn!("-d/--detach is accepted for launcher-surface compatibility; process supervision owns daemonization");
    }

    let channels: HashMap<String, ChannelInfo> = config
        .channels
        .iter()
        .map(|(name, membership)| {
            let info = ChannelInfo {
                score_package: membership.score_package.clone(),
                peers: membership
                    .peers
                    .iter()
                    .map(|p| PeerTarget { peer_target: p.peer_target.clone() })
                    .collect(),
            };
            (name.clone(), info)
        })
        .collect();

    let (server, state) = RsServer::with_channels(channels);
    let (rs_actor, rs_handle) = Actor::spawn(None, server, state).await?;

    let keypair = Keypair::generate_ed25519();
    let listen_addr = multiaddr_from_target(&config.network.listen_addr)?;
    let (_transport, mut rpc_in, mut rs_in) = SwarmTransport::spawn(keypair, listen_addr)?;

    tokio::spawn(async move {
        while let Some(call) = rpc_in.recv().await {
            call.reply(siever_network::rpc::RpcReply::Common(
                siever_network::rpc::CommonReply::err(
                    siever_network::rpc::ResponseCode::Busy,
                    "this node is a RadioStation, not a channel peer".to_string(),
                ),
            ));
        }
    });

    info!(listen_addr = %config.network.listen_addr, "RadioStation listening");

    let bridge = {
        let rs_actor = rs_actor.clone();
        tokio::spawn(async move {
            while let Some(call) = rs_in.recv().await {
                let reply = ractor::call_t!(rs_actor, RsServerMsg::Request, RS_CALL_TIMEOUT, call.request.clone());
                match reply {
                    Ok(reply) => call.reply(reply),
                    Err(e) => {
                        warn!(error = ?e, "RS actor call failed");
                    }
                }
            }
        })
    };

    tokio::signal::ctrl_c().await?;
    info!("received Ctrl-C, shutting down");
    bridge.abort();
    rs_actor.stop(None);
    let _ = tokio::time::timeout(Duration::from_secs(2), rs_handle).await;
    Ok(())
}

//! `<prog> peer` (spec.md §6): boots a node that joins its configured
//! channels as an ordinary peer — loads config, opens the swarm, registers
//! with RS, then hands off to [`siever_engine::NodeService`] for the rest of
//! its life.

use std::path::PathBuf;
use std::sync::Arc;

use color_eyre::eyre::{eyre, Result};
use libp2p::identity::Keypair;
use siever_config::Config;
use siever_crypto::{FileKeySigner, Signer};
use siever_engine::NodeService;
use siever_network::swarm_transport::SwarmTransport;
use siever_network::{multiaddr_from_target, Transport};
use siever_rs::RsClient;
use tracing::{info, warn};

use crate::cli::PeerArgs;
use crate::metrics_http;
use crate::{identity, logging};

pub async fn run(args: PeerArgs) -> Result<()> {
    let config = load_config(&args)?;
    logging::init(&config.logging);

    if args.kms_pin.is_some() {
        warn!("KMS-backed key custody is an external collaborator (spec.md §4.1); signing with a local file key instead");
    }

    std::fs::create_dir_all(&config.storage.path)?;
    let self_id = identity::load_or_create(&config.storage.path)?;
    let signer: Arc<dyn Signer> = Arc::new(load_signer(&config.storage.path)?);

    let keypair = Keypair::generate_ed25519();
    let listen_addr = multiaddr_from_target(&config.network.listen_addr)?;
    let (transport, rpc_in, rs_in) = SwarmTransport::spawn(keypair, listen_addr)?;
    let transport = Arc::new(transport);

    tokio::spawn(reject_inbound_rs(rs_in));

    let rs_target = config
        .rs
        .targets
        .first()
        .ok_or_else(|| eyre!("at least one RS target is required (-r RS_TARGET)"))?
        .clone();
    let rs_client = RsClient::new(transport.clone(), rs_target);

    let node = Arc::new(NodeService::new(
        self_id,
        &config,
        signer,
        transport.clone() as Arc<dyn Transport>,
        rs_client,
    ));

    info!(%self_id, moniker = %config.moniker, "booting node");
    node.boot().await?;

    tokio::spawn(siever_engine::rpc_server::serve(node.clone(), rpc_in));

    if config.metrics.enabled {
        tokio::spawn(metrics_http::serve(node.clone(), config.metrics.listen_addr.clone()));
    }

    if args.detach {
        warn!("-d/--detach is accepted for launcher-surface compatibility; process supervision (systemd, docker) is expected to own daemonization, not this binary");
    }

    tokio::signal::ctrl_c().await?;
    info!("received Ctrl-C, shutting down");
    Ok(())
}

fn load_config(args: &PeerArgs) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => siever_config::load_config(path)?,
        None => Config::default(),
    };

    if let Some(port) = args.port {
        config.network.listen_addr = format!("0.0.0.0:{port}");
    }
    if !args.rs_target.is_empty() {
        config.rs.targets = args.rs_target.clone();
    }

    Ok(config)
}

/// Loads the node's Ed25519 signing key from `storage_root/node.key`,
/// minting a fresh one on first boot (spec.md §4.1: "signing happens
/// in-memory against a key loaded once at startup").
fn load_signer(storage_root: &std::path::Path) -> Result<FileKeySigner> {
    let path: PathBuf = storage_root.join("node.key");

    if !path.exists() {
        use rand::RngCore;
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        std::fs::write(&path, seed)?;
    }

    FileKeySigner::load(&path).map_err(|e| eyre!(e.to_string()))
}

/// A bare peer never answers RS RPCs; replies `Error` so a misdirected
/// caller doesn't hang waiting on a response that will never come.
async fn reject_inbound_rs(mut rs_in: tokio::sync::mpsc::UnboundedReceiver<siever_network::swarm_transport::InboundRs>) {
    while let Some(call) = rs_in.recv().await {
        call.reply(siever_network::rs_rpc::RsReply::Error("this node is not a RadioStation".to_string()));
    }
}

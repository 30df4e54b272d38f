//! `siever` launcher binary (spec.md §6): parses the top-level `Cli` and
//! dispatches to the `peer`/`rs` subcommand runners, with `score`/`tool`
//! kept as the single informational commands spec.md's Non-goals (external
//! score executor, CA tooling) call for, and `admin` as a small interactive
//! RS REPL over the already-typed `RsClient`.

mod cli;
mod identity;
mod logging;
mod metrics_http;
mod peer;
mod rs;

use std::io::Write;

use clap::Parser;
use cli::{AdminArgs, Cli, Command};
use color_eyre::eyre::Result;
use libp2p::identity::Keypair;
use siever_network::multiaddr_from_target;
use siever_network::swarm_transport::SwarmTransport;
use siever_rs::RsClient;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    match cli.command {
        Command::Peer(args) => peer::run(args).await,
        Command::Rs(args) => rs::run(args).await,
        Command::Score(args) => run_score(args),
        Command::Admin(args) => run_admin(args).await,
        Command::Tool => run_tool(),
    }
}

/// The external score-execution service is out of scope (spec.md §1); this
/// launcher only reports the wiring a real proxy would need.
fn run_score(args: cli::ScoreArgs) -> Result<()> {
    println!(
        "score service proxy for channel '{}' (package {}) would listen on {}:{} \u{2014} \
         score execution is an external collaborator (spec.md §1) and is not implemented by this binary",
        args.channel,
        args.score_package,
        args.peer_target,
        args.port.unwrap_or(0),
    );
    Ok(())
}

/// Certificate issuance tooling is out of scope (spec.md §1).
fn run_tool() -> Result<()> {
    println!(
        "CA/certificate tooling (generate CA cert, peer cert, self-signed cert) is out of \
         scope for this launcher (spec.md §1); use an external CA tool and point `peer -o` at \
         the resulting key/cert files"
    );
    Ok(())
}

/// A minimal interactive RS admin REPL (spec.md §6 `<prog> admin`):
/// dials the RS target over an ephemeral swarm and relays typed lines to
/// the already-implemented `RsClient` operations.
async fn run_admin(args: AdminArgs) -> Result<()> {
    let keypair = Keypair::generate_ed25519();
    let listen_addr = multiaddr_from_target("0.0.0.0:0")?;
    let (transport, mut rpc_in, mut rs_in) = SwarmTransport::spawn(keypair, listen_addr)?;

    tokio::spawn(async move {
        while let Some(call) = rpc_in.recv().await {
            call.reply(siever_network::rpc::RpcReply::Common(siever_network::rpc::CommonReply::err(
                siever_network::rpc::ResponseCode::Busy,
                "this is the admin REPL, not a channel peer".to_string(),
            )));
        }
    });
    tokio::spawn(async move {
        while let Some(call) = rs_in.recv().await {
            call.reply(siever_network::rs_rpc::RsReply::Error("admin REPL answers no inbound RS calls".to_string()));
        }
    });

    let client = RsClient::new(transport, args.rs_target.clone());

    println!("connected to RS at {} \u{2014} commands: list <channel> | restart <channel> | manage <json> | quit", args.rs_target);

    let stdin = std::io::stdin();
    loop {
        print!("admin> ");
        std::io::stdout().flush().ok();

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let mut parts = line.splitn(2, ' ');
        let cmd = parts.next().unwrap_or_default();
        let rest = parts.next().unwrap_or_default().trim();

        match cmd {
            "quit" | "exit" => break,
            "list" => match client.get_peer_list(rest).await {
                Ok(blob) => println!("{blob}"),
                Err(e) => println!("error: {e}"),
            },
            "restart" => match client.rs_restart_channel(rest).await {
                Ok(()) => println!("ok"),
                Err(e) => println!("error: {e}"),
            },
            "manage" => match client.rs_send_channel_manage_info(rest).await {
                Ok(()) => println!("ok"),
                Err(e) => println!("error: {e}"),
            },
            other => println!("unrecognized command {other:?}; use list/restart/manage/quit"),
        }
    }

    info!("admin REPL exiting");
    Ok(())
}

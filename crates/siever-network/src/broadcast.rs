//! One `BroadcastWorker` per channel: maintains a subscriber set and fans
//! out method calls to it with bounded concurrency, isolating slow or dead
//! peers (§4.4).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use siever_types::constants::{BROADCAST_RETRY_TIMES, GRPC_TIMEOUT_BROADCAST_RETRY, MAX_WORKERS};
use siever_types::PeerEntry;
use tracing::warn;

use crate::rpc::{RpcReply, RpcRequest};
use crate::transport::Transport;

/// Reported to the owning `ChannelRuntime` when a subscriber crosses the
/// failure threshold; `PeerManager` owns the decision to mark it
/// disconnected, `BroadcastWorker` only observes and reports.
#[derive(Debug, Clone)]
pub struct SubscriberFailed {
    pub target: String,
}

pub type BroadcastWorkerRef = ActorRef<BroadcastMsg>;

pub enum BroadcastMsg {
    Subscribe(String),
    Unsubscribe(String),
    UpdateAudience(Vec<PeerEntry>),
    Broadcast(RpcRequest),
    CreateTx(RpcRequest),
    ConnectToLeader(String),
    MakeSelfPeerConnection(String),
    Status(ractor::RpcReplyPort<Vec<String>>),
}

pub struct BroadcastWorker {
    transport: Arc<dyn Transport>,
    on_subscriber_failed: Option<ActorRef<SubscriberFailed>>,
}

impl BroadcastWorker {
    pub fn new(transport: Arc<dyn Transport>, on_subscriber_failed: Option<ActorRef<SubscriberFailed>>) -> Self {
        BroadcastWorker { transport, on_subscriber_failed }
    }
}

pub struct State {
    subscribers: Vec<String>,
    failure_counts: HashMap<String, u32>,
}

#[async_trait]
impl Actor for BroadcastWorker {
    type Msg = BroadcastMsg;
    type State = State;
    type Arguments = ();

    async fn pre_start(&self, _myself: BroadcastWorkerRef, _args: ()) -> Result<State, ActorProcessingErr> {
        Ok(State { subscribers: Vec::new(), failure_counts: HashMap::new() })
    }

    async fn handle(
        &self,
        _myself: BroadcastWorkerRef,
        msg: BroadcastMsg,
        state: &mut State,
    ) -> Result<(), ActorProcessingErr> {
        match msg {
            BroadcastMsg::Subscribe(target) => {
                if !state.subscribers.contains(&target) {
                    state.subscribers.push(target.clone());
                    state.failure_counts.insert(target, 0);
                }
            }
            BroadcastMsg::Unsubscribe(target) => {
                state.subscribers.retain(|t| t != &target);
                state.failure_counts.remove(&target);
            }
            BroadcastMsg::UpdateAudience(peers) => {
                state.subscribers = peers.iter().map(|p| p.target.clone()).collect();
                state.failure_counts.retain(|t, _| state.subscribers.contains(t));
                for target in &state.subscribers {
                    state.failure_counts.entry(target.clone()).or_insert(0);
                }
            }
            BroadcastMsg::Broadcast(request) | BroadcastMsg::CreateTx(request) => {
                self.fan_out(state, request).await;
            }
            BroadcastMsg::ConnectToLeader(target) => {
                if !state.subscribers.contains(&target) {
                    state.subscribers.push(target.clone());
                    state.failure_counts.insert(target, 0);
                }
            }
            BroadcastMsg::MakeSelfPeerConnection(_inner_target) => {
                // Control-channel loopback; no subscriber-set change needed
                // since this targets the owning node, not a remote peer.
            }
            BroadcastMsg::Status(reply) => {
                let _ = reply.send(state.subscribers.clone());
            }
        }

        Ok(())
    }
}

impl BroadcastWorker {
    /// Fans `request` out to every current subscriber with bounded
    /// concurrency (`MAX_WORKERS`), best-effort and at-most-once per
    /// subscriber; no retry buffer per §4.4's delivery contract.
    async fn fan_out(&self, state: &mut State, request: RpcRequest) {
        use futures::stream::{self, StreamExt};

        let targets = state.subscribers.clone();
        let transport = self.transport.clone();

        let results: Vec<(String, siever_types::SievResult<RpcReply>)> = stream::iter(targets.into_iter())
            .map(|target| {
                let transport = transport.clone();
                let request = request.clone();
                async move {
                    let outcome = transport.send(&target, request, GRPC_TIMEOUT_BROADCAST_RETRY).await;
                    (target, outcome)
                }
            })
            .buffer_unordered(MAX_WORKERS)
            .collect()
            .await;

        for (target, outcome) in results {
            match outcome {
                Ok(_reply) => {
                    state.failure_counts.insert(target, 0);
                }
                Err(err) => {
                    let count = state.failure_counts.entry(target.clone()).or_insert(0);
                    *count += 1;
                    warn!(%target, failures = *count, %err, "broadcast delivery failed");

                    if *count >= BROADCAST_RETRY_TIMES {
                        if let Some(sup) = &self.on_subscriber_failed {
                            let _ = sup.cast(SubscriberFailed { target: target.clone() });
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyTransport {
        fail_count: AtomicU32,
        always_fail_targets: Vec<String>,
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        async fn send(&self, target: &str, _request: RpcRequest, _timeout: Duration) -> siever_types::SievResult<RpcReply> {
            if self.always_fail_targets.iter().any(|t| t == target) {
                self.fail_count.fetch_add(1, Ordering::SeqCst);
                return Err(siever_types::SievError::TransportTimeout);
            }
            Ok(RpcReply::Common(crate::rpc::CommonReply::ok()))
        }
    }

    #[tokio::test]
    async fn subscribe_then_broadcast_delivers_to_all() {
        let transport = Arc::new(FlakyTransport { fail_count: AtomicU32::new(0), always_fail_targets: vec![] });
        let worker = BroadcastWorker::new(transport, None);
        let (actor, handle) = Actor::spawn(None, worker, ()).await.unwrap();

        actor.cast(BroadcastMsg::Subscribe("127.0.0.1:7100".to_string())).unwrap();
        actor.cast(BroadcastMsg::Subscribe("127.0.0.1:7101".to_string())).unwrap();

        let status = ractor::call_t!(actor, BroadcastMsg::Status, 1000).unwrap();
        assert_eq!(status.len(), 2);

        actor.stop(None);
        let _ = handle.await;
    }
}

use std::time::Duration;

use async_trait::async_trait;
use siever_types::SievResult;

use crate::rpc::{RpcReply, RpcRequest};
use crate::rs_rpc::{RsReply, RsRequest};

/// The capability a [`crate::broadcast::BroadcastWorker`] needs from the
/// swarm: fire one framed request at a target and await its reply or a
/// transport failure. The worker never touches `libp2p` types directly, so
/// it can be driven by a fake in tests.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, target: &str, request: RpcRequest, timeout: Duration) -> SievResult<RpcReply>;
}

/// The directory-service counterpart of [`Transport`], carried on the
/// second `request_response` protocol (`/siever/rs/1.0.0`, §6).
#[async_trait]
pub trait RsTransport: Send + Sync {
    async fn send(&self, target: &str, request: RsRequest, timeout: Duration) -> SievResult<RsReply>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn send(&self, target: &str, request: RpcRequest, timeout: Duration) -> SievResult<RpcReply> {
        (**self).send(target, request, timeout).await
    }
}

#[async_trait]
impl<T: RsTransport + ?Sized> RsTransport for std::sync::Arc<T> {
    async fn send(&self, target: &str, request: RsRequest, timeout: Duration) -> SievResult<RsReply> {
        (**self).send(target, request, timeout).await
    }
}

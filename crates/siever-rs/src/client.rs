//! Typed client for the five RS RPCs a booting node needs (§6): the RS
//! server's own persistence and admin REPL stay out of scope (§1), this
//! crate only speaks the wire protocol a `NodeService` consumes.

use std::collections::HashMap;
use std::time::Duration;

use siever_network::rs_rpc::{ChannelInfo, ConnectStatus, RsReply, RsRequest};
use siever_network::RsTransport;
use siever_types::{SievError, SievResult};
use uuid::Uuid;

const RS_RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Thin typed wrapper around an [`RsTransport`] bound to one RS target.
pub struct RsClient<T: RsTransport> {
    transport: T,
    target: String,
}

impl<T: RsTransport> RsClient<T> {
    pub fn new(transport: T, target: impl Into<String>) -> Self {
        RsClient { transport, target: target.into() }
    }

    async fn call(&self, request: RsRequest) -> SievResult<RsReply> {
        self.transport.send(&self.target, request, RS_RPC_TIMEOUT).await
    }

    /// `GetChannelInfos(peer_id, peer_target, group_id) -> {channel ->
    /// {score_package, peers}}` (§6).
    pub async fn get_channel_infos(
        &self,
        peer_id: Uuid,
        peer_target: &str,
        group_id: &str,
    ) -> SievResult<HashMap<String, ChannelInfo>> {
        let reply = self
            .call(RsRequest::GetChannelInfos {
                peer_id,
                peer_target: peer_target.to_string(),
                group_id: group_id.to_string(),
            })
            .await?;

        match reply {
            RsReply::ChannelInfos(infos) => Ok(infos),
            RsReply::Error(msg) => Err(SievError::ChannelUnknown(msg)),
            _ => Err(SievError::SchemaInvalid("unexpected RS reply to GetChannelInfos".to_string())),
        }
    }

    /// `ConnectPeer(channel, peer_id, peer_target, group_id, cert) ->
    /// {status, peer_list_blob}` (§6).
    pub async fn connect_peer(
        &self,
        channel: &str,
        peer_id: Uuid,
        peer_target: &str,
        group_id: &str,
        cert: Vec<u8>,
    ) -> SievResult<(ConnectStatus, String)> {
        let reply = self
            .call(RsRequest::ConnectPeer {
                channel: channel.to_string(),
                peer_id,
                peer_target: peer_target.to_string(),
                group_id: group_id.to_string(),
                cert,
            })
            .await?;

        match reply {
            RsReply::ConnectPeer { status, peer_list_blob } => Ok((status, peer_list_blob)),
            RsReply::Error(msg) => Err(SievError::ChannelUnknown(msg)),
            _ => Err(SievError::SchemaInvalid("unexpected RS reply to ConnectPeer".to_string())),
        }
    }

    pub async fn get_peer_list(&self, channel: &str) -> SievResult<String> {
        match self.call(RsRequest::GetPeerList { channel: channel.to_string() }).await? {
            RsReply::PeerList(blob) => Ok(blob),
            RsReply::Error(msg) => Err(SievError::ChannelUnknown(msg)),
            _ => Err(SievError::SchemaInvalid("unexpected RS reply to GetPeerList".to_string())),
        }
    }

    pub async fn get_peer_status(&self, channel: &str, peer_id: Uuid) -> SievResult<String> {
        match self.call(RsRequest::GetPeerStatus { channel: channel.to_string(), peer_id }).await? {
            RsReply::PeerStatus(blob) => Ok(blob),
            RsReply::Error(msg) => Err(SievError::ChannelUnknown(msg)),
            _ => Err(SievError::SchemaInvalid("unexpected RS reply to GetPeerStatus".to_string())),
        }
    }

    /// `GetRandomTable` — the shared seed table used by
    /// `SeedDerivedSigner`, "used only in controlled test networks" (§4.1).
    pub async fn get_random_table(&self) -> SievResult<Vec<u8>> {
        match self.call(RsRequest::GetRandomTable).await? {
            RsReply::RandomTable(bytes) => Ok(bytes),
            RsReply::Error(msg) => Err(SievError::ChannelUnknown(msg)),
            _ => Err(SievError::SchemaInvalid("unexpected RS reply to GetRandomTable".to_string())),
        }
    }

    pub async fn rs_send_channel_manage_info(&self, manage_info_json: &str) -> SievResult<()> {
        match self.call(RsRequest::RsSendChannelManageInfo { manage_info_json: manage_info_json.to_string() }).await? {
            RsReply::Ack => Ok(()),
            RsReply::Error(msg) => Err(SievError::ChannelUnknown(msg)),
            _ => Err(SievError::SchemaInvalid("unexpected RS reply to RsSendChannelManageInfo".to_string())),
        }
    }

    pub async fn rs_restart_channel(&self, channel: &str) -> SievResult<()> {
        match self.call(RsRequest::RsRestartChannel { channel: channel.to_string() }).await? {
            RsReply::Ack => Ok(()),
            RsReply::Error(msg) => Err(SievError::ChannelUnknown(msg)),
            _ => Err(SievError::SchemaInvalid("unexpected RS reply to RsRestartChannel".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FakeTransport {
        reply: RsReply,
    }

    #[async_trait]
    impl RsTransport for FakeTransport {
        async fn send(&self, _target: &str, _request: RsRequest, _timeout: Duration) -> SievResult<RsReply> {
            Ok(self.reply.clone())
        }
    }

    #[tokio::test]
    async fn get_peer_list_unwraps_blob() {
        let client = RsClient::new(FakeTransport { reply: RsReply::PeerList("[]".to_string()) }, "rs:7300");
        let blob = client.get_peer_list("chain1").await.unwrap();
        assert_eq!(blob, "[]");
    }

    #[tokio::test]
    async fn error_reply_surfaces_as_channel_unknown() {
        let client = RsClient::new(FakeTransport { reply: RsReply::Error("no such channel".to_string()) }, "rs:7300");
        let err = client.get_peer_list("chain1").await.unwrap_err();
        assert!(matches!(err, SievError::ChannelUnknown(msg) if msg == "no such channel"));
    }
}

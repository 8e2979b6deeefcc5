// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Join, push and leave against an in-process endpoint speaking the V2 wire
//! format. Run with `RUST_LOG=debug` to see the channel's own logging.

use async_trait::async_trait;
use phoenix_channel::proto::wire::{self, WireFormat};
use phoenix_channel::proto::{Incoming, Outgoing, PHX_JOIN, PHX_LEAVE, PHX_REPLY};
use phoenix_channel::{Channel, ChannelError, ChannelPort, ChannelResult, SendRequest, TimeoutPolicy};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Registry stand-in: frames each request as text, hands it to [`endpoint`]
/// and decodes the answer.
struct Loopback {
    next_ref: AtomicU64,
    inbound: broadcast::Sender<Incoming>,
}

#[async_trait]
impl ChannelPort for Loopback {
    async fn send(&self, request: SendRequest) -> ChannelResult<Option<Incoming>> {
        let msg_ref = (self.next_ref.fetch_add(1, Ordering::Relaxed) + 1).to_string();
        let frame = wire::encode_outgoing(&request.to_outgoing(msg_ref), WireFormat::V2)
            .map_err(ChannelError::transport)?;
        let answer = endpoint(&frame).map_err(ChannelError::transport)?;
        let msg = wire::decode_incoming(&answer, WireFormat::V2).map_err(ChannelError::transport)?;
        let _ = self.inbound.send(msg.clone());
        Ok((!request.no_reply).then_some(msg))
    }

    async fn dispose(&self, topic: &str) {
        info!(topic, "disposed");
    }

    fn subscribe(&self) -> broadcast::Receiver<Incoming> {
        self.inbound.subscribe()
    }
}

/// Answers joins, leaves and `hello`; rejects everything else.
fn endpoint(frame: &str) -> Result<String, phoenix_channel::proto::ProtoError> {
    let push: Outgoing = wire::decode_outgoing_any(frame)?;
    let join_ref = match push.event.as_str() {
        PHX_JOIN => push.msg_ref.clone(),
        _ => push.join_ref.clone(),
    };
    let (status, response) = match push.event.as_str() {
        PHX_JOIN | PHX_LEAVE => ("ok", json!({})),
        "hello" => {
            let name = push.payload.get("name").and_then(Value::as_str).unwrap_or("stranger");
            ("ok", json!({"message": format!("hello {name}")}))
        }
        _ => ("error", json!({"reason": "unhandled event"})),
    };
    let reply = Incoming {
        topic: push.topic,
        event: PHX_REPLY.to_owned(),
        payload: json!({"status": status, "response": response}),
        msg_ref: push.msg_ref,
        join_ref,
    };
    wire::encode_incoming(&reply, WireFormat::V2)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let (inbound, _) = broadcast::channel(64);
    let port = Arc::new(Loopback {
        next_ref: AtomicU64::new(0),
        inbound,
    });
    let channel = Channel::new("room:lobby", port);

    channel
        .join(json!({"token": "demo"}), TimeoutPolicy::default())
        .await?;
    info!(state = %channel.state(), join_ref = ?channel.join_ref(), "joined");

    let reply = channel.push("hello", json!({"name": "echo"})).await?;
    let message: String = reply.convert_field_to("message")?;
    info!(%message, "reply");

    match channel.push("shout", json!({})).await {
        Err(ChannelError::ServerRejection { response, .. }) => info!(%response, "rejected"),
        other => anyhow::bail!("expected a rejection, got {other:?}"),
    }

    channel.close(channel.default_timeout()).await?;
    channel.leave().await;
    info!(state = %channel.state(), "done");
    Ok(())
}

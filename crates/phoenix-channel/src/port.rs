// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Registry/transport port consumed by [`Channel`](crate::Channel).
//!
//! The registry owns the physical connection, assigns per-message refs, routes
//! replies back to the pending request and broadcasts every inbound envelope.
//! A channel only needs the three primitives below, so tests substitute a
//! fake registry without any socket.

use async_trait::async_trait;
use phoenix_proto::{Incoming, Outgoing};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::{ChannelResult, TimeoutPolicy};

/// One request a channel asks the registry to deliver.
#[derive(Debug, Clone, PartialEq)]
pub struct SendRequest {
    /// Channel topic.
    pub topic: String,
    /// Event name.
    pub event: String,
    /// Event body.
    pub payload: Value,
    /// Join generation to stamp; `None` for `phx_join`.
    pub join_ref: Option<String>,
    /// How long the registry waits for the correlated reply, per attempt.
    pub timeout: TimeoutPolicy,
    /// Resolve as soon as the frame is written; no reply is awaited.
    pub no_reply: bool,
}

impl SendRequest {
    /// Envelope for this request under the ref the registry assigned.
    pub fn to_outgoing(&self, msg_ref: impl Into<String>) -> Outgoing {
        Outgoing::new(self.topic.clone(), self.event.clone(), self.payload.clone())
            .with_ref(msg_ref)
            .with_join_ref(self.join_ref.clone())
    }
}

/// The primitives a channel consumes from its owning registry.
#[async_trait]
pub trait ChannelPort: Send + Sync {
    /// Deliver `request` and resolve with the reply whose ref matches.
    ///
    /// Resolves `Ok(None)` for `no_reply` requests once the frame is written.
    /// Transport failures and elapsed timeouts are errors.
    async fn send(&self, request: SendRequest) -> ChannelResult<Option<Incoming>>;

    /// Remove `topic` from the routing table; nothing is delivered afterwards.
    async fn dispose(&self, topic: &str);

    /// Shared inbound stream carrying every envelope for every topic.
    ///
    /// New receivers see only future messages. The stream is bounded: a
    /// receiver that falls behind gets `RecvError::Lagged(n)` and continues
    /// from the oldest envelope still buffered.
    fn subscribe(&self) -> broadcast::Receiver<Incoming>;
}

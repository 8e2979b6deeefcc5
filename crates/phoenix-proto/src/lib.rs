// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Envelope schema for the Phoenix Channels protocol.
//!
//! Every frame exchanged over the shared connection is an envelope
//! `{topic, event, payload, ref, join_ref}`. `ref` pairs one push with its
//! one reply; `join_ref` ties a message to one join generation of a topic so
//! stale replies from an earlier join can be told apart. Replies travel as
//! `phx_reply` events whose payload is `{status, response}`.
//!
//! Framing lives in [`wire`].

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub mod wire;

/// Event opening a topic.
pub const PHX_JOIN: &str = "phx_join";
/// Event closing a topic.
pub const PHX_LEAVE: &str = "phx_leave";
/// Event wrapping a `{status, response}` reply.
pub const PHX_REPLY: &str = "phx_reply";
/// Server-initiated channel crash.
pub const PHX_ERROR: &str = "phx_error";
/// Server-initiated channel close.
pub const PHX_CLOSE: &str = "phx_close";
/// Heartbeat event, sent on [`PHOENIX_TOPIC`].
pub const HEARTBEAT: &str = "heartbeat";
/// Reserved topic for connection-level traffic.
pub const PHOENIX_TOPIC: &str = "phoenix";

/// Empty JSON object, the payload used when a caller supplies none.
pub fn empty_payload() -> Value {
    Value::Object(Map::new())
}

/// Errors raised while framing or interpreting envelopes.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// JSON (de)serialization failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// The frame parsed as JSON but is not an envelope.
    #[error("malformed envelope: {0}")]
    Malformed(String),
    /// A reply was expected but the envelope carries another event.
    #[error("expected phx_reply, got {0:?}")]
    NotAReply(String),
    /// A `phx_reply` payload without a string `status`.
    #[error("reply payload has no status")]
    MissingStatus,
    /// A requested field is absent from the body.
    #[error("missing field {0:?}")]
    MissingField(String),
}

/// Client → server envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outgoing {
    /// Topic the message belongs to.
    pub topic: String,
    /// Event name.
    pub event: String,
    /// Event body.
    #[serde(default)]
    pub payload: Value,
    /// Correlation token pairing this push with its reply.
    #[serde(rename = "ref", default)]
    pub msg_ref: Option<String>,
    /// Join generation this message belongs to (`None` for `phx_join`).
    #[serde(default)]
    pub join_ref: Option<String>,
}

impl Outgoing {
    /// Create an envelope without correlation tokens.
    pub fn new(topic: impl Into<String>, event: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            event: event.into(),
            payload,
            msg_ref: None,
            join_ref: None,
        }
    }

    /// Set the per-message ref.
    pub fn with_ref(mut self, msg_ref: impl Into<String>) -> Self {
        self.msg_ref = Some(msg_ref.into());
        self
    }

    /// Set the join generation ref.
    pub fn with_join_ref(mut self, join_ref: Option<String>) -> Self {
        self.join_ref = join_ref;
        self
    }
}

/// Server → client envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incoming {
    /// Topic the message belongs to.
    pub topic: String,
    /// Event name.
    pub event: String,
    /// Event body.
    #[serde(default)]
    pub payload: Value,
    /// Ref of the push this message answers, if any.
    #[serde(rename = "ref", default)]
    pub msg_ref: Option<String>,
    /// Join generation the message belongs to, if any.
    #[serde(default)]
    pub join_ref: Option<String>,
}

impl Incoming {
    /// Whether this envelope is a `phx_reply`.
    pub fn is_reply(&self) -> bool {
        self.event == PHX_REPLY
    }

    /// Status tag of a reply, `None` for non-reply events.
    pub fn status(&self) -> Option<ReplyStatus> {
        if !self.is_reply() {
            return None;
        }
        self.payload
            .get("status")
            .and_then(Value::as_str)
            .map(ReplyStatus::from)
    }

    /// Decode the `{status, response}` body of a `phx_reply`.
    pub fn to_reply(&self) -> Result<Reply, ProtoError> {
        if !self.is_reply() {
            return Err(ProtoError::NotAReply(self.event.clone()));
        }
        let status = self.status().ok_or(ProtoError::MissingStatus)?;
        let response = self
            .payload
            .get("response")
            .cloned()
            .unwrap_or_else(empty_payload);
        Ok(Reply { status, response })
    }

    /// Deserialize one field of the payload (e.g. `"response"` of a reply).
    pub fn payload_field_to<T: DeserializeOwned>(&self, field: &str) -> Result<T, ProtoError> {
        field_to(&self.payload, field)
    }
}

/// Status tag of a `phx_reply`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ReplyStatus {
    /// `"ok"`.
    Ok,
    /// `"error"`.
    Error,
    /// `"timeout"`, synthesized by some servers and clients.
    Timeout,
    /// Any other status string.
    Other(String),
}

impl ReplyStatus {
    /// Wire spelling of the status.
    pub fn as_str(&self) -> &str {
        match self {
            ReplyStatus::Ok => "ok",
            ReplyStatus::Error => "error",
            ReplyStatus::Timeout => "timeout",
            ReplyStatus::Other(s) => s,
        }
    }
}

impl From<&str> for ReplyStatus {
    fn from(s: &str) -> Self {
        match s {
            "ok" => ReplyStatus::Ok,
            "error" => ReplyStatus::Error,
            "timeout" => ReplyStatus::Timeout,
            other => ReplyStatus::Other(other.to_owned()),
        }
    }
}

impl From<String> for ReplyStatus {
    fn from(s: String) -> Self {
        ReplyStatus::from(s.as_str())
    }
}

impl From<ReplyStatus> for String {
    fn from(status: ReplyStatus) -> Self {
        status.as_str().to_owned()
    }
}

impl std::fmt::Display for ReplyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded `phx_reply` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// Reply status.
    pub status: ReplyStatus,
    /// Response body.
    pub response: Value,
}

impl Reply {
    /// Whether the server answered `"ok"`.
    pub fn is_ok(&self) -> bool {
        self.status == ReplyStatus::Ok
    }

    /// Deserialize the whole response body.
    pub fn convert_to<T: DeserializeOwned>(&self) -> Result<T, ProtoError> {
        Ok(T::deserialize(&self.response)?)
    }

    /// Deserialize a single field of the response body.
    pub fn convert_field_to<T: DeserializeOwned>(&self, field: &str) -> Result<T, ProtoError> {
        field_to(&self.response, field)
    }
}

fn field_to<T: DeserializeOwned>(body: &Value, field: &str) -> Result<T, ProtoError> {
    let value = body
        .get(field)
        .ok_or_else(|| ProtoError::MissingField(field.to_owned()))?;
    Ok(T::deserialize(value)?)
}

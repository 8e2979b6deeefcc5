// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Envelope builders for tests.

use phoenix_proto::{Incoming, PHX_REPLY};
use serde_json::{json, Value};

/// `phx_reply` envelope with the given status and response body.
pub fn reply(
    topic: &str,
    status: &str,
    response: Value,
    msg_ref: &str,
    join_ref: Option<String>,
) -> Incoming {
    Incoming {
        topic: topic.to_owned(),
        event: PHX_REPLY.to_owned(),
        payload: json!({"status": status, "response": response}),
        msg_ref: Some(msg_ref.to_owned()),
        join_ref,
    }
}

/// `ok` reply with the given response body.
pub fn ok_reply(topic: &str, response: Value, msg_ref: &str, join_ref: Option<String>) -> Incoming {
    reply(topic, "ok", response, msg_ref, join_ref)
}

/// `error` reply with the given response body.
pub fn error_reply(
    topic: &str,
    response: Value,
    msg_ref: &str,
    join_ref: Option<String>,
) -> Incoming {
    reply(topic, "error", response, msg_ref, join_ref)
}

/// Server-initiated broadcast: no ref, no join ref.
pub fn broadcast(topic: &str, event: &str, payload: Value) -> Incoming {
    Incoming {
        topic: topic.to_owned(),
        event: event.to_owned(),
        payload,
        msg_ref: None,
        join_ref: None,
    }
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! JSON framing for Phoenix envelopes.
//!
//! Two text layouts are in use on the wire:
//!
//! * V1 (object): `{"topic":..,"event":..,"payload":..,"ref":..,"join_ref":..}`
//! * V2 (array, serializer `2.0.0`): `[join_ref, ref, topic, event, payload]`
//!
//! Absent refs are encoded as `null` in both layouts. Both layouts decode refs
//! the same way: `null` or missing is absent, numbers become their decimal
//! text.

use serde_json::{Map, Value};

use crate::{Incoming, Outgoing, ProtoError};

/// Text layout of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    /// Object form.
    #[default]
    V1,
    /// Array form `[join_ref, ref, topic, event, payload]`.
    V2,
}

impl WireFormat {
    /// `vsn` query parameter a socket announces for this layout.
    pub fn vsn(self) -> &'static str {
        match self {
            WireFormat::V1 => "1.0.0",
            WireFormat::V2 => "2.0.0",
        }
    }
}

/// Encode a client → server envelope.
pub fn encode_outgoing(msg: &Outgoing, format: WireFormat) -> Result<String, ProtoError> {
    encode_parts(
        &msg.topic,
        &msg.event,
        &msg.payload,
        msg.msg_ref.as_deref(),
        msg.join_ref.as_deref(),
        format,
    )
}

/// Encode a server → client envelope (used by loopback servers and fixtures).
pub fn encode_incoming(msg: &Incoming, format: WireFormat) -> Result<String, ProtoError> {
    encode_parts(
        &msg.topic,
        &msg.event,
        &msg.payload,
        msg.msg_ref.as_deref(),
        msg.join_ref.as_deref(),
        format,
    )
}

/// Decode a server → client envelope in the given layout.
pub fn decode_incoming(text: &str, format: WireFormat) -> Result<Incoming, ProtoError> {
    let value: Value = serde_json::from_str(text)?;
    match (format, value) {
        (WireFormat::V1, Value::Object(fields)) => from_object(fields),
        (WireFormat::V2, Value::Array(items)) => from_array(items),
        (WireFormat::V1, _) => Err(ProtoError::Malformed("expected a JSON object".into())),
        (WireFormat::V2, _) => Err(ProtoError::Malformed("expected a JSON array".into())),
    }
}

/// Decode a server → client envelope, detecting the layout from the frame.
pub fn decode_incoming_any(text: &str) -> Result<Incoming, ProtoError> {
    match serde_json::from_str::<Value>(text)? {
        Value::Object(fields) => from_object(fields),
        Value::Array(items) => from_array(items),
        _ => Err(ProtoError::Malformed("expected a JSON object or array".into())),
    }
}

/// Decode a client → server envelope (server side of a loopback).
pub fn decode_outgoing_any(text: &str) -> Result<Outgoing, ProtoError> {
    let incoming = decode_incoming_any(text)?;
    Ok(Outgoing {
        topic: incoming.topic,
        event: incoming.event,
        payload: incoming.payload,
        msg_ref: incoming.msg_ref,
        join_ref: incoming.join_ref,
    })
}

fn encode_parts(
    topic: &str,
    event: &str,
    payload: &Value,
    msg_ref: Option<&str>,
    join_ref: Option<&str>,
    format: WireFormat,
) -> Result<String, ProtoError> {
    let value = match format {
        WireFormat::V1 => serde_json::json!({
            "topic": topic,
            "event": event,
            "payload": payload,
            "ref": msg_ref,
            "join_ref": join_ref,
        }),
        WireFormat::V2 => serde_json::json!([join_ref, msg_ref, topic, event, payload]),
    };
    Ok(serde_json::to_string(&value)?)
}

fn from_array(items: Vec<Value>) -> Result<Incoming, ProtoError> {
    let [join_ref, msg_ref, topic, event, payload]: [Value; 5] = items
        .try_into()
        .map_err(|v: Vec<Value>| ProtoError::Malformed(format!("expected 5 elements, got {}", v.len())))?;
    Ok(Incoming {
        topic: string_field(topic, "topic")?,
        event: string_field(event, "event")?,
        payload,
        msg_ref: ref_field(msg_ref, "ref")?,
        join_ref: ref_field(join_ref, "join_ref")?,
    })
}

fn from_object(mut fields: Map<String, Value>) -> Result<Incoming, ProtoError> {
    let mut take = |name: &str| fields.remove(name).unwrap_or(Value::Null);
    Ok(Incoming {
        topic: string_field(take("topic"), "topic")?,
        event: string_field(take("event"), "event")?,
        payload: take("payload"),
        msg_ref: ref_field(take("ref"), "ref")?,
        join_ref: ref_field(take("join_ref"), "join_ref")?,
    })
}

fn string_field(value: Value, name: &str) -> Result<String, ProtoError> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(ProtoError::Malformed(format!(
            "{name} must be a string, got {other}"
        ))),
    }
}

// Some servers mint numeric refs.
fn ref_field(value: Value, name: &str) -> Result<Option<String>, ProtoError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(ProtoError::Malformed(format!(
            "{name} must be a string or null, got {other}"
        ))),
    }
}

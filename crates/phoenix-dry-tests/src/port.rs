// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Scripted fake of the registry port.

use async_trait::async_trait;
use phoenix_channel::{ChannelError, ChannelPort, ChannelResult, SendRequest};
use phoenix_proto::{empty_payload, Incoming, PHX_JOIN};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::fixtures::reply;

/// Capacity of the fake's inbound broadcast buffer.
pub const INBOUND_CAPACITY: usize = 256;

/// How the fake answers one request.
#[derive(Debug, Clone)]
pub enum Scripted {
    /// `ok` reply with this response body.
    Ok(Value),
    /// `error` reply with this response body.
    Error(Value),
    /// Transport failure with this message.
    TransportFailure(String),
    /// Never resolves.
    Hang,
    /// `ok` reply with an empty body after the delay.
    Delay(Duration),
    /// `ok` reply with this response body after the delay.
    OkAfter(Duration, Value),
    /// Resolve with exactly this envelope.
    Envelope(Incoming),
}

/// Fake [`ChannelPort`] that answers from a script and records traffic.
///
/// Requests are answered in order from the script; once it is exhausted every
/// request gets an `ok` reply with an empty body. Refs are numbered from 1,
/// and a join reply carries its own ref as join ref, as a Phoenix endpoint
/// does. Every reply is also published on the inbound stream.
///
/// # Example
///
/// ```
/// use phoenix_dry_tests::{FakePort, Scripted};
/// use serde_json::json;
///
/// let port = FakePort::new();
/// port.script(Scripted::Error(json!({"reason": "unmatched topic"})));
/// assert_eq!(port.send_count(), 0);
/// ```
#[derive(Clone)]
pub struct FakePort {
    inner: Arc<Mutex<FakePortInner>>,
    inbound: broadcast::Sender<Incoming>,
}

#[derive(Default)]
struct FakePortInner {
    script: VecDeque<Scripted>,
    sent: Vec<SendRequest>,
    disposed: Vec<String>,
    next_ref: u64,
}

impl Default for FakePort {
    fn default() -> Self {
        let (inbound, _) = broadcast::channel(INBOUND_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(FakePortInner::default())),
            inbound,
        }
    }
}

impl FakePort {
    /// Create a fake with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle suitable for [`phoenix_channel::Channel::new`].
    pub fn as_port(&self) -> Arc<dyn ChannelPort> {
        Arc::new(self.clone())
    }

    /// Append one scripted answer.
    pub fn script(&self, answer: Scripted) {
        self.lock().script.push_back(answer);
    }

    /// Every request received so far, in order.
    pub fn sent(&self) -> Vec<SendRequest> {
        self.lock().sent.clone()
    }

    /// Event names of every request received so far.
    pub fn sent_events(&self) -> Vec<String> {
        self.lock().sent.iter().map(|r| r.event.clone()).collect()
    }

    /// Number of requests received (attempted, whatever their outcome).
    pub fn send_count(&self) -> usize {
        self.lock().sent.len()
    }

    /// Topics passed to `dispose`.
    pub fn disposed(&self) -> Vec<String> {
        self.lock().disposed.clone()
    }

    /// Inject a server-initiated message on the inbound stream.
    pub fn publish(&self, msg: Incoming) {
        // No subscribers is fine.
        let _ = self.inbound.send(msg);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakePortInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ChannelPort for FakePort {
    async fn send(&self, request: SendRequest) -> ChannelResult<Option<Incoming>> {
        let (answer, msg_ref) = {
            let mut inner = self.lock();
            inner.sent.push(request.clone());
            inner.next_ref += 1;
            (inner.script.pop_front(), inner.next_ref.to_string())
        };
        let join_ref = if request.event == PHX_JOIN {
            Some(msg_ref.clone())
        } else {
            request.join_ref.clone()
        };

        let msg = match answer.unwrap_or_else(|| Scripted::Ok(empty_payload())) {
            Scripted::Ok(body) => reply(&request.topic, "ok", body, &msg_ref, join_ref),
            Scripted::Error(body) => reply(&request.topic, "error", body, &msg_ref, join_ref),
            Scripted::TransportFailure(message) => return Err(ChannelError::transport(message)),
            Scripted::Hang => std::future::pending::<Incoming>().await,
            Scripted::Delay(after) => {
                tokio::time::sleep(after).await;
                reply(&request.topic, "ok", empty_payload(), &msg_ref, join_ref)
            }
            Scripted::OkAfter(after, body) => {
                tokio::time::sleep(after).await;
                reply(&request.topic, "ok", body, &msg_ref, join_ref)
            }
            Scripted::Envelope(msg) => msg,
        };
        self.publish(msg.clone());
        if request.no_reply {
            Ok(None)
        } else {
            Ok(Some(msg))
        }
    }

    async fn dispose(&self, topic: &str) {
        self.lock().disposed.push(topic.to_owned());
    }

    fn subscribe(&self) -> broadcast::Receiver<Incoming> {
        self.inbound.subscribe()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use phoenix_channel::TimeoutPolicy;
    use phoenix_proto::ReplyStatus;
    use serde_json::json;

    fn request(event: &str, join_ref: Option<&str>) -> SendRequest {
        SendRequest {
            topic: "room:1".into(),
            event: event.into(),
            payload: json!({}),
            join_ref: join_ref.map(str::to_owned),
            timeout: TimeoutPolicy::default(),
            no_reply: false,
        }
    }

    #[tokio::test]
    async fn unscripted_requests_get_ok_with_sequential_refs() {
        let port = FakePort::new();
        let first = port.send(request(PHX_JOIN, None)).await.unwrap().unwrap();
        let second = port.send(request("hello", Some("1"))).await.unwrap().unwrap();
        assert_eq!(first.msg_ref.as_deref(), Some("1"));
        assert_eq!(first.join_ref.as_deref(), Some("1"));
        assert_eq!(second.msg_ref.as_deref(), Some("2"));
        assert_eq!(second.join_ref.as_deref(), Some("1"));
        assert_eq!(port.sent_events(), vec![PHX_JOIN, "hello"]);
    }

    #[tokio::test]
    async fn script_is_consumed_in_order() {
        let port = FakePort::new();
        port.script(Scripted::Error(json!({"reason": "nope"})));
        port.script(Scripted::TransportFailure("socket closed".into()));

        let rejected = port.send(request("a", Some("1"))).await.unwrap().unwrap();
        assert_eq!(rejected.status(), Some(ReplyStatus::Error));
        let failed = port.send(request("b", Some("1"))).await.unwrap_err();
        assert_eq!(failed.to_string(), "transport error: socket closed");
        assert!(port.send(request("c", Some("1"))).await.is_ok());
        assert_eq!(port.send_count(), 3);
    }

    #[tokio::test]
    async fn replies_are_published_to_subscribers() {
        let port = FakePort::new();
        let mut rx = port.subscribe();
        port.send(request("hello", Some("1"))).await.unwrap();
        let seen = rx.recv().await.unwrap();
        assert_eq!(seen.msg_ref.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn no_reply_requests_resolve_empty() {
        let port = FakePort::new();
        let mut req = request("ping", Some("1"));
        req.no_reply = true;
        assert!(port.send(req).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dispose_is_recorded() {
        let port = FakePort::new();
        port.dispose("room:1").await;
        assert_eq!(port.disposed(), vec!["room:1".to_string()]);
    }
}

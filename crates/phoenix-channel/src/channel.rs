// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-topic channel state machine.
//!
//! ```text
//!            join                ok reply
//!   Close ──────────▶ Joining ──────────▶ Joined
//!     ▲                  │                   │
//!     │   join failed    │                   │ close
//!     ├──────────────────┘                   ▼
//!     │          leave done (ok or not)   Leaving
//!     └──────────────────────────────────────┘
//!
//!   dirty_close: any state ──▶ Close, join ref kept
//! ```
//!
//! Every join, close and dirty close starts a new epoch. A join or leave
//! reply only moves the state (and installs a join ref) while its own epoch is
//! still current. A late join reply is reported as
//! [`ChannelError::Superseded`]; a late leave reply changes nothing.
//!
//! The join ref is the only precondition for pushing: a channel that was
//! dirty-closed after a transport loss keeps its ref, so pushes are still
//! attempted and `rejoin` stays available. Only a clean `close` clears it.

use phoenix_proto::{empty_payload, Incoming, ProtoError, Reply, PHX_JOIN, PHX_LEAVE};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, trace, warn};

use crate::{
    ChannelConfig, ChannelError, ChannelPort, ChannelResult, Misuse, SendRequest, TimeoutPolicy,
};

/// Life-cycle state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// A `phx_join` is in flight.
    Joining,
    /// The server accepted the join.
    Joined,
    /// A `phx_leave` is in flight.
    Leaving,
    /// Initial state, and the state after every leave or reset.
    Close,
}

impl ChannelState {
    /// Upper-case name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelState::Joining => "JOINING",
            ChannelState::Joined => "JOINED",
            ChannelState::Leaving => "LEAVING",
            ChannelState::Close => "CLOSE",
        }
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Default)]
struct Generation {
    join_ref: Option<String>,
    join_payload: Option<Value>,
    epoch: u64,
}

/// One logical channel on the shared connection.
///
/// All operations take `&self`; share the channel as `Arc<Channel>` between
/// tasks. Pushes run concurrently. `join`, `rejoin` and `close` check and move
/// the state in one step on the state cell, so two of them never overlap.
pub struct Channel {
    topic: String,
    state: watch::Sender<ChannelState>,
    generation: Mutex<Generation>,
    default_timeout: Duration,
    rejoin_timeout: TimeoutPolicy,
    port: Arc<dyn ChannelPort>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("topic", &self.topic)
            .field("state", &self.state())
            .field("join_ref", &self.join_ref())
            .finish_non_exhaustive()
    }
}

impl Channel {
    /// Create a closed channel for `topic` with default timeouts.
    pub fn new(topic: impl Into<String>, port: Arc<dyn ChannelPort>) -> Self {
        Self::with_config(topic, port, &ChannelConfig::default())
    }

    /// Create a closed channel using the timeouts in `config`.
    pub fn with_config(
        topic: impl Into<String>,
        port: Arc<dyn ChannelPort>,
        config: &ChannelConfig,
    ) -> Self {
        let (state, _) = watch::channel(ChannelState::Close);
        Self {
            topic: topic.into(),
            state,
            generation: Mutex::new(Generation::default()),
            default_timeout: config.default_timeout(),
            rejoin_timeout: config.rejoin.clone(),
            port,
        }
    }

    /// Topic this channel is bound to.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Current state.
    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Watch state changes; the receiver starts at the current state.
    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    /// Inbound traffic of the whole connection, unfiltered, future messages
    /// only. Subscribers filter by topic or ref themselves.
    pub fn messages(&self) -> broadcast::Receiver<Incoming> {
        self.port.subscribe()
    }

    /// Ref of the current join generation.
    pub fn join_ref(&self) -> Option<String> {
        self.generation().join_ref.clone()
    }

    /// Whether a join completed since the last clean close.
    pub fn is_joined_once(&self) -> bool {
        self.generation().join_ref.is_some()
    }

    /// Timeout used by [`push`](Self::push) and [`push_no_reply`](Self::push_no_reply).
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Policy the owner should pass to [`rejoin`](Self::rejoin) after a reconnect.
    pub fn rejoin_timeout(&self) -> &TimeoutPolicy {
        &self.rejoin_timeout
    }

    /// Join the topic with `payload`.
    ///
    /// Refused without any network traffic while joining, joined or leaving.
    /// On failure the channel returns to `Close`; the previous join ref, if
    /// any, is kept so [`rejoin`](Self::rejoin) remains possible. If the
    /// channel was closed or dirty-closed before the reply arrived, the reply
    /// is discarded and [`ChannelError::Superseded`] is returned.
    pub async fn join(&self, payload: Value, timeout: TimeoutPolicy) -> ChannelResult<&Self> {
        let mut admitted = Err(Misuse::AlreadyJoining);
        self.state.send_if_modified(|state| match Misuse::for_join(*state) {
            None => {
                *state = ChannelState::Joining;
                let mut generation = self.generation();
                generation.epoch += 1;
                generation.join_payload = Some(payload.clone());
                admitted = Ok(generation.epoch);
                true
            }
            Some(misuse) => {
                admitted = Err(misuse);
                false
            }
        });
        let epoch = admitted.map_err(|misuse| self.misuse(misuse))?;
        let mut guard = Transition::new(self, ChannelState::Joining, ChannelState::Close, epoch);

        let request = SendRequest {
            topic: self.topic.clone(),
            event: PHX_JOIN.to_owned(),
            payload,
            join_ref: None,
            timeout,
            no_reply: false,
        };
        let outcome = match self.port.send(request).await {
            Ok(reply) => self.accept_join(reply),
            Err(err) => Err(err),
        };

        match outcome {
            Ok(join_ref) => {
                let installed = join_ref.clone();
                if guard.finish(ChannelState::Joined, |generation| {
                    generation.join_ref = Some(installed);
                }) {
                    debug!(topic = %self.topic, join_ref = %join_ref, "channel joined");
                    Ok(self)
                } else {
                    debug!(topic = %self.topic, join_ref = %join_ref, "discarding stale join reply");
                    Err(self.superseded(PHX_JOIN))
                }
            }
            Err(err) => {
                error!(topic = %self.topic, %err, "failed to join channel");
                guard.finish(ChannelState::Close, |_| {});
                Err(err)
            }
        }
    }

    /// Join again with the payload of the last `join`.
    ///
    /// Refused when the channel never completed a join.
    pub async fn rejoin(&self, timeout: TimeoutPolicy) -> ChannelResult<&Self> {
        let payload = {
            let generation = self.generation();
            if generation.join_ref.is_none() {
                return Err(self.misuse(Misuse::NeverJoined));
            }
            generation.join_payload.clone()
        };
        self.join(payload.unwrap_or_else(empty_payload), timeout)
            .await
    }

    /// Push `event` and wait up to the default timeout for the reply.
    pub async fn push(&self, event: &str, payload: Value) -> ChannelResult<Reply> {
        self.push_with_timeout(event, payload, self.default_timeout)
            .await
    }

    /// Push `event` and wait up to `timeout` for the reply.
    ///
    /// Fails with a protocol misuse when the channel has no join ref. The
    /// current state is not otherwise checked: a push during a rejoin or after
    /// a dirty close is attempted and the transport decides.
    pub async fn push_with_timeout(
        &self,
        event: &str,
        payload: Value,
        timeout: Duration,
    ) -> ChannelResult<Reply> {
        let join_ref = self.require_join_ref()?;
        match self.send_within(event, payload, join_ref, timeout, false).await? {
            Some(msg) => self.decode_reply(event, &msg),
            None => Err(ChannelError::transport(format!(
                "registry resolved {event:?} without a reply"
            ))),
        }
    }

    /// Push `event` without waiting for a reply body.
    pub async fn push_no_reply(&self, event: &str, payload: Value) -> ChannelResult<()> {
        self.push_no_reply_with_timeout(event, payload, self.default_timeout)
            .await
    }

    /// Push `event` without waiting for a reply body, bounded by `timeout`.
    pub async fn push_no_reply_with_timeout(
        &self,
        event: &str,
        payload: Value,
        timeout: Duration,
    ) -> ChannelResult<()> {
        let join_ref = self.require_join_ref()?;
        self.send_within(event, payload, join_ref, timeout, true)
            .await
            .map(|_| ())
    }

    /// Ask the registry to drop this channel.
    ///
    /// The registry decides when the channel is torn down (normally by calling
    /// [`close`](Self::close) and then removing it from its routing table).
    pub async fn leave(&self) {
        self.port.dispose(&self.topic).await;
    }

    /// Leave the topic.
    ///
    /// No-op while leaving or closed. The join ref is cleared before the
    /// `phx_leave` is sent, so pushes are refused from this point on. The
    /// channel ends in `Close` whether or not the leave was acknowledged; a
    /// failed leave is reported to the caller.
    pub async fn close(&self, timeout: Duration) -> ChannelResult<()> {
        let mut started = None;
        self.state.send_if_modified(|state| match *state {
            ChannelState::Leaving | ChannelState::Close => false,
            ChannelState::Joining | ChannelState::Joined => {
                *state = ChannelState::Leaving;
                let mut generation = self.generation();
                generation.epoch += 1;
                started = Some((generation.join_ref.take(), generation.epoch));
                true
            }
        });
        let Some((join_ref, epoch)) = started else {
            return Ok(());
        };
        let mut guard = Transition::new(self, ChannelState::Leaving, ChannelState::Close, epoch);
        debug!(topic = %self.topic, "leaving channel");

        let outcome = match self
            .send_within(PHX_LEAVE, empty_payload(), join_ref, timeout, false)
            .await
        {
            Ok(Some(msg)) => self.decode_reply(PHX_LEAVE, &msg).map(|_| ()),
            Ok(None) => Ok(()),
            Err(err) => Err(err),
        };
        guard.finish(ChannelState::Close, |_| {});
        match outcome {
            Ok(()) => {
                debug!(topic = %self.topic, "channel closed");
                Ok(())
            }
            Err(err) => {
                warn!(topic = %self.topic, %err, "leave was not acknowledged; channel closed");
                Err(err)
            }
        }
    }

    /// Force the channel to `Close` without contacting the server.
    ///
    /// Used by the registry after the transport was lost. The join ref is
    /// kept so the channel can [`rejoin`](Self::rejoin) once reconnected.
    pub fn dirty_close(&self) {
        debug!(topic = %self.topic, "dirty closing channel");
        self.state.send_modify(|state| {
            *state = ChannelState::Close;
            self.generation().epoch += 1;
        });
    }

    fn generation(&self) -> MutexGuard<'_, Generation> {
        self.generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn misuse(&self, misuse: Misuse) -> ChannelError {
        ChannelError::ProtocolMisuse {
            topic: self.topic.clone(),
            misuse,
        }
    }

    fn superseded(&self, event: &str) -> ChannelError {
        ChannelError::Superseded {
            topic: self.topic.clone(),
            event: event.to_owned(),
        }
    }

    fn require_join_ref(&self) -> ChannelResult<Option<String>> {
        match self.join_ref() {
            Some(join_ref) => Ok(Some(join_ref)),
            None => Err(self.misuse(Misuse::NotJoined)),
        }
    }

    async fn send_within(
        &self,
        event: &str,
        payload: Value,
        join_ref: Option<String>,
        after: Duration,
        no_reply: bool,
    ) -> ChannelResult<Option<Incoming>> {
        trace!(topic = %self.topic, event, no_reply, "push");
        let request = SendRequest {
            topic: self.topic.clone(),
            event: event.to_owned(),
            payload,
            join_ref,
            timeout: TimeoutPolicy::fixed(after),
            no_reply,
        };
        match tokio::time::timeout(after, self.port.send(request)).await {
            Ok(result) => result,
            Err(_) => Err(ChannelError::Timeout {
                topic: self.topic.clone(),
                event: event.to_owned(),
                after,
            }),
        }
    }

    fn decode_reply(&self, event: &str, msg: &Incoming) -> ChannelResult<Reply> {
        let reply = msg.to_reply().map_err(|source| ChannelError::Decode {
            topic: self.topic.clone(),
            source,
        })?;
        if reply.is_ok() {
            Ok(reply)
        } else {
            Err(ChannelError::ServerRejection {
                topic: self.topic.clone(),
                event: event.to_owned(),
                status: reply.status,
                response: reply.response,
            })
        }
    }

    // The join generation is named by the ref of the join reply.
    fn accept_join(&self, reply: Option<Incoming>) -> ChannelResult<String> {
        let msg = reply.ok_or_else(|| {
            ChannelError::transport("registry resolved phx_join without a reply")
        })?;
        self.decode_reply(PHX_JOIN, &msg)?;
        msg.msg_ref
            .or(msg.join_ref)
            .ok_or_else(|| ChannelError::Decode {
                topic: self.topic.clone(),
                source: ProtoError::MissingField("ref".to_owned()),
            })
    }
}

/// Pending transition out of an in-flight state, owned by one epoch.
///
/// If the owning future is dropped (cancelled) before `finish`, the state is
/// moved to `fallback`, provided the epoch is still current.
struct Transition<'a> {
    channel: &'a Channel,
    from: ChannelState,
    fallback: ChannelState,
    epoch: u64,
    armed: bool,
}

impl<'a> Transition<'a> {
    fn new(channel: &'a Channel, from: ChannelState, fallback: ChannelState, epoch: u64) -> Self {
        Self {
            channel,
            from,
            fallback,
            epoch,
            armed: true,
        }
    }

    // Moves to `to` and applies `update` in one step, only while the state is
    // still `from` and no later join, close or dirty close has started.
    fn finish(&mut self, to: ChannelState, update: impl FnOnce(&mut Generation)) -> bool {
        self.armed = false;
        let (channel, from, epoch) = (self.channel, self.from, self.epoch);
        channel.state.send_if_modified(|state| {
            let mut generation = channel.generation();
            if *state != from || generation.epoch != epoch {
                return false;
            }
            update(&mut generation);
            *state = to;
            true
        })
    }
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        if self.armed {
            let fallback = self.fallback;
            self.finish(fallback, |_| {});
        }
    }
}

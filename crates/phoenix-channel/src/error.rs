// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Error taxonomy for channel operations.

use phoenix_proto::{ProtoError, ReplyStatus};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::ChannelState;

/// Boxed error as handed over by a transport.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Operation invoked in a life-cycle state that does not allow it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Misuse {
    /// `join` while a join is in flight.
    #[error("is already joining")]
    AlreadyJoining,
    /// `join` on a joined channel.
    #[error("is already joined")]
    AlreadyJoined,
    /// `join` while a leave is in flight.
    #[error("is leaving")]
    Leaving,
    /// `rejoin` on a channel that never completed a join.
    #[error("was never joined")]
    NeverJoined,
    /// Push on a channel without a join ref.
    #[error("is not joined; pushing is not allowed")]
    NotJoined,
}

impl Misuse {
    /// Guard failure for `join` attempted in `state`, if `state` refuses it.
    pub fn for_join(state: ChannelState) -> Option<Self> {
        match state {
            ChannelState::Joining => Some(Misuse::AlreadyJoining),
            ChannelState::Joined => Some(Misuse::AlreadyJoined),
            ChannelState::Leaving => Some(Misuse::Leaving),
            ChannelState::Close => None,
        }
    }
}

/// Opaque failure surfaced verbatim from the transport boundary.
///
/// The wrapper is transparent: it displays as the wrapped error and its
/// `source` is the wrapped error's `source`, so walking the chain from a
/// [`ChannelError::Transport`] visits the wrapped error (through this
/// wrapper) and then its causes, with no extra level. Use
/// [`get_ref`](Self::get_ref) to reach the wrapped error itself.
#[derive(Debug)]
pub struct TransportError(BoxError);

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

impl TransportError {
    /// Wrap any error (or message) raised by a transport.
    pub fn new(err: impl Into<BoxError>) -> Self {
        Self(err.into())
    }

    /// Borrow the wrapped error.
    pub fn get_ref(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.0.as_ref()
    }

    /// Unwrap into the original boxed error.
    pub fn into_inner(self) -> BoxError {
        self.0
    }
}

/// Failure of a channel operation.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Invalid for the current life-cycle; no network call was made.
    #[error("channel {topic:?} {misuse}")]
    ProtocolMisuse {
        /// Channel topic.
        topic: String,
        /// What was refused.
        misuse: Misuse,
    },
    /// The server replied with a non-`ok` status.
    #[error("channel {topic:?}: {event:?} rejected with status {status}")]
    ServerRejection {
        /// Channel topic.
        topic: String,
        /// Event that was pushed.
        event: String,
        /// Reply status.
        status: ReplyStatus,
        /// Reply body.
        response: Value,
    },
    /// Connection loss, encode failure or any other transport failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// No correlated reply within the timeout.
    #[error("channel {topic:?}: no reply to {event:?} within {after:?}")]
    Timeout {
        /// Channel topic.
        topic: String,
        /// Event that was pushed.
        event: String,
        /// Deadline that elapsed.
        after: Duration,
    },
    /// The reply arrived after a close, dirty close or newer join took over;
    /// it was discarded and the state was left alone.
    #[error("channel {topic:?}: reply to {event:?} arrived after the channel moved on")]
    Superseded {
        /// Channel topic.
        topic: String,
        /// Event whose reply was discarded.
        event: String,
    },
    /// A reply arrived but could not be interpreted.
    #[error("channel {topic:?}: undecodable reply: {source}")]
    Decode {
        /// Channel topic.
        topic: String,
        /// Decoding failure.
        source: ProtoError,
    },
}

impl ChannelError {
    /// Shorthand for [`ChannelError::Transport`].
    pub fn transport(err: impl Into<BoxError>) -> Self {
        ChannelError::Transport(TransportError::new(err))
    }

    /// The refused operation, for [`ChannelError::ProtocolMisuse`].
    pub fn misuse(&self) -> Option<Misuse> {
        match self {
            ChannelError::ProtocolMisuse { misuse, .. } => Some(*misuse),
            _ => None,
        }
    }

    /// Whether the error was raised locally before reaching the transport.
    pub fn is_protocol_misuse(&self) -> bool {
        matches!(self, ChannelError::ProtocolMisuse { .. })
    }

    /// Whether the reply was discarded because the channel moved on.
    pub fn is_superseded(&self) -> bool {
        matches!(self, ChannelError::Superseded { .. })
    }

    /// Whether no reply arrived in time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ChannelError::Timeout { .. })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn join_guard_names_the_current_state() {
        assert_eq!(Misuse::for_join(ChannelState::Close), None);
        assert_eq!(
            Misuse::for_join(ChannelState::Joining),
            Some(Misuse::AlreadyJoining)
        );
        assert_eq!(
            Misuse::for_join(ChannelState::Joined),
            Some(Misuse::AlreadyJoined)
        );
        assert_eq!(Misuse::for_join(ChannelState::Leaving), Some(Misuse::Leaving));
    }

    #[test]
    fn misuse_message_mentions_topic() {
        let err = ChannelError::ProtocolMisuse {
            topic: "room:1".into(),
            misuse: Misuse::AlreadyJoined,
        };
        assert_eq!(err.to_string(), "channel \"room:1\" is already joined");
        assert_eq!(err.misuse(), Some(Misuse::AlreadyJoined));
    }

    #[test]
    fn transport_error_is_verbatim() {
        let err = ChannelError::transport("socket closed");
        assert_eq!(err.to_string(), "transport error: socket closed");
        assert!(!err.is_protocol_misuse());
        match err {
            ChannelError::Transport(inner) => assert_eq!(inner.get_ref().to_string(), "socket closed"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[derive(Debug, Error)]
    #[error("handshake failed")]
    struct Handshake(#[source] std::io::Error);

    #[test]
    fn transport_chain_has_no_extra_level() {
        use std::error::Error as _;

        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = ChannelError::transport(Handshake(refused));
        assert_eq!(err.to_string(), "transport error: handshake failed");

        let wrapped = err.source().unwrap();
        assert_eq!(wrapped.to_string(), "handshake failed");
        let cause = wrapped.source().unwrap();
        assert_eq!(cause.to_string(), "refused");
        assert!(cause.source().is_none());
    }
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Client-side channel state machine for Phoenix Channels.
//!
//! Many topics share one connection. Each topic is a [`Channel`] with its own
//! join life-cycle and push/reply correlation. Everything connection-wide
//! (socket, ref allocation, reply routing, heartbeats, reconnects) belongs to
//! a registry the channel reaches through the [`ChannelPort`] trait.
//!
//! ```ignore
//! use phoenix_channel::{Channel, TimeoutPolicy};
//! use serde_json::json;
//!
//! let channel = Channel::new("room:1", registry.clone());
//! channel.join(json!({"token": "t"}), TimeoutPolicy::default()).await?;
//! let reply = channel.push("hello", json!({"name": "a"})).await?;
//! channel.close(channel.default_timeout()).await?;
//! ```
//!
//! On transport loss the registry calls [`Channel::dirty_close`], and after
//! reconnecting [`Channel::rejoin`]; the channel itself never retries.

mod channel;
pub mod config;
mod error;
mod port;
mod timeout;

pub use channel::{Channel, ChannelState};
pub use config::{ChannelConfig, ConfigError, ConfigService, ConfigStore};
pub use error::{BoxError, ChannelError, ChannelResult, Misuse, TransportError};
pub use port::{ChannelPort, SendRequest};
pub use timeout::{default_rejoin_policy, TimeoutPolicy, DEFAULT_TIMEOUT};

pub use phoenix_proto as proto;
pub use phoenix_proto::{Incoming, Outgoing, Reply, ReplyStatus};

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for the Phoenix channel crates.
#![forbid(unsafe_code)]
//!
//! # Modules
//!
//! - [`config`] - In-memory config store fake for testing without filesystem
//! - [`fixtures`] - Reply and broadcast envelope builders
//! - [`port`] - Scripted registry port that records traffic

pub mod config;
pub mod fixtures;
pub mod port;

pub use config::InMemoryConfigStore;
pub use fixtures::{broadcast, error_reply, ok_reply, reply};
pub use port::{FakePort, Scripted, INBOUND_CAPACITY};

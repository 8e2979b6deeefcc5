// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Timeout policies for pushes and joins.
//!
//! A [`TimeoutPolicy`] answers one question: how long to wait for attempt `n`
//! (0-indexed). Pushes use a [`TimeoutPolicy::Fixed`] built from a plain
//! [`Duration`]. Joins and rejoins hand a richer policy to the registry, which
//! may retry a join across reconnects and ask for a longer wait each time.
//!
//! Policies serialize with durations in milliseconds:
//!
//! ```json
//! {"kind": "steps", "steps_ms": [1000, 2000, 5000, 10000]}
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Push timeout used when a call site supplies none.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Schedule used for join and rejoin attempts unless configured otherwise:
/// 1s, 2s, 5s, then 10s for every later attempt.
pub fn default_rejoin_policy() -> TimeoutPolicy {
    TimeoutPolicy::Steps {
        steps: vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(5),
            Duration::from_secs(10),
        ],
    }
}

/// Duration-producing strategy, parameterized per call site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// Same duration for every attempt.
    Fixed {
        /// Duration of each attempt.
        #[serde(rename = "after_ms", with = "millis")]
        after: Duration,
    },
    /// Explicit schedule; attempts past the end reuse the last step.
    Steps {
        /// Per-attempt durations.
        #[serde(rename = "steps_ms", with = "millis_seq")]
        steps: Vec<Duration>,
    },
    /// `first × factor^attempt`, capped at `max`.
    Backoff {
        /// Duration of attempt 0.
        #[serde(rename = "first_ms", with = "millis")]
        first: Duration,
        /// Growth factor per attempt.
        factor: f64,
        /// Upper bound.
        #[serde(rename = "max_ms", with = "millis")]
        max: Duration,
    },
}

impl TimeoutPolicy {
    /// A fixed policy.
    pub fn fixed(after: Duration) -> Self {
        TimeoutPolicy::Fixed { after }
    }

    /// Duration to wait for the given attempt (0-indexed).
    pub fn duration(&self, attempt: u32) -> Duration {
        match self {
            TimeoutPolicy::Fixed { after } => *after,
            TimeoutPolicy::Steps { steps } => {
                let idx = usize::try_from(attempt).unwrap_or(usize::MAX);
                steps
                    .get(idx)
                    .or_else(|| steps.last())
                    .copied()
                    .unwrap_or(DEFAULT_TIMEOUT)
            }
            TimeoutPolicy::Backoff { first, factor, max } => {
                let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
                let secs = first.as_secs_f64() * factor.powi(exp);
                if !secs.is_finite() || secs < 0.0 || secs > max.as_secs_f64() {
                    *max
                } else {
                    Duration::from_secs_f64(secs)
                }
            }
        }
    }
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        TimeoutPolicy::fixed(DEFAULT_TIMEOUT)
    }
}

impl From<Duration> for TimeoutPolicy {
    fn from(after: Duration) -> Self {
        TimeoutPolicy::fixed(after)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

mod millis_seq {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(steps: &[Duration], s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(
            steps
                .iter()
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
        )
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Duration>, D::Error> {
        Vec::<u64>::deserialize(d).map(|ms| ms.into_iter().map(Duration::from_millis).collect())
    }
}

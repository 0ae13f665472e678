//! Broker policies
//!
//! Behaviour that deployments may reasonably want to differ on is gathered
//! here rather than hard-coded in the dispatch table. Defaults match the
//! values in [`BrokerSettings`](crate::config::BrokerSettings).

use std::fmt;

use serde::Deserialize;

use crate::protocol::codec::DEFAULT_MAX_FRAME_LEN;

/// What happens when a client logs in with an identity that is already
/// bound to another live session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityPolicy {
    /// The new login fails with `IdentityInUse`; the existing session is untouched.
    #[default]
    Reject,
    /// The existing session is disconnected and the new login succeeds.
    Takeover,
}

/// What a publish to a topic without subscribers replies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyTopicPolicy {
    /// Reply `OK`; nothing is delivered.
    #[default]
    Accept,
    /// Reply `ERROR NoSuchTopic`.
    Reject,
}

impl fmt::Display for IdentityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IdentityPolicy::Reject => "reject",
            IdentityPolicy::Takeover => "takeover",
        })
    }
}

impl fmt::Display for EmptyTopicPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EmptyTopicPolicy::Accept => "accept",
            EmptyTopicPolicy::Reject => "reject",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerPolicy {
    pub identity: IdentityPolicy,
    pub empty_topic: EmptyTopicPolicy,
    pub max_connections: usize,
    /// Undelivered events a session may accumulate before it is disconnected.
    pub max_queue_len: usize,
    /// Consecutive malformed records tolerated before the session is closed.
    pub max_malformed_frames: u32,
    pub max_frame_len: usize,
}

impl Default for BrokerPolicy {
    fn default() -> Self {
        Self {
            identity: IdentityPolicy::default(),
            empty_topic: EmptyTopicPolicy::default(),
            max_connections: 1000,
            max_queue_len: 1024,
            max_malformed_frames: 8,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

//! Resolved run membership: who we are, who contributes, who to ask for
//! buffers.
//!
//! The membership service (or a static file) resolves this record before
//! the core starts; the core treats it as opaque startup input.

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::validation;

/// One upstream peer serving buffer requests.
#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq, Eq)]
pub struct PeerEndpoint {
    #[validate(length(min = 1, message = "peer address must not be empty"))]
    pub addr: String,

    pub port: u16,
}

/// Resolved membership record for this run.
#[derive(Debug, Default, Serialize, Deserialize, Validate, Clone)]
pub struct MembershipConfig {
    /// Our own builder id, shared with peers in immediate values.
    #[serde(default)]
    #[validate(range(max = 63, message = "own id must be below 64"))]
    pub own_id: u32,

    /// Ids of the contributors expected to send a fragment per event.
    #[serde(default)]
    #[validate(length(min = 1, message = "contributor set must not be empty"))]
    #[validate(custom(function = validation::validate_contributor_ids))]
    pub contributors: Vec<u32>,

    /// Upstream peers accepting buffer replenishment requests.
    #[serde(default)]
    #[validate(length(min = 1, message = "at least one peer endpoint is required"))]
    #[validate(nested)]
    pub peers: Vec<PeerEndpoint>,

    /// Connect timeout towards each peer, in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_connect_timeout_ms() -> u64 {
    120_000
}

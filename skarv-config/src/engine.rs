//! Distribution engine sizing parameters.
//!
//! These are the values the core consumes; how they are discovered
//! (service discovery, static file) is the caller's concern.

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::validation;

/// Buffer pool and delivery configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct EngineConfig {
    /// Number of buffer slots in the shared pool. Bounded by the 24-bit
    /// index field of the immediate-value message format.
    #[serde(default = "default_max_buffers")]
    #[validate(range(min = 1, max = 16777215))]
    pub max_buffers: usize,

    /// Byte size of one buffer slot. Every built event must fit.
    #[serde(default = "default_buffer_size")]
    #[validate(range(min = 64, max = 1073741824))]
    pub buffer_size: usize,

    /// Number of consumer queue groups served.
    #[serde(default = "default_num_queue_groups")]
    #[validate(range(min = 1, max = 64))]
    pub num_queue_groups: usize,

    /// Capacity of the completed-event handoff ring.
    #[serde(default = "default_ring_capacity")]
    #[validate(range(min = 2, max = 1048576))]
    #[validate(custom(function = validation::validate_power_of_two))]
    pub ring_capacity: usize,
}

fn default_max_buffers() -> usize {
    8
}

fn default_buffer_size() -> usize {
    1024
}

fn default_num_queue_groups() -> usize {
    1
}

fn default_ring_capacity() -> usize {
    4096
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_buffers: default_max_buffers(),
            buffer_size: default_buffer_size(),
            num_queue_groups: default_num_queue_groups(),
            ring_capacity: default_ring_capacity(),
        }
    }
}

use thiserror::Error;
use tokio::task::JoinError;

use skarv_codec::CodecError;
use skarv_config::ConfigError;
use skarv_core::assembly::AssemblyError;
use skarv_core::pool::PoolError;
use skarv_core::ring::RingError;
use skarv_transport::TransportError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("assembly error: {0}")]
    Assembly(#[from] AssemblyError),

    #[error("buffer pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("container codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("completion ring error: {0}")]
    Ring(#[from] RingError),

    /// The built event cannot fit one buffer slot. Copying anyway would
    /// overrun into a neighboring slot, so this aborts the process.
    #[error("built event of {size} bytes exceeds buffer slot size {slot_size}")]
    EventTooLarge { size: usize, slot_size: usize },

    #[error("fragment arena {0} vanished before materialization")]
    MissingFragment(u32),

    #[error("queue group {0} does not exist")]
    QueueOutOfRange(usize),

    #[error("event processing error: {0}")]
    Processing(String),
}

impl EngineError {
    /// Whether this condition violates a shared-memory invariant that
    /// cannot be locally contained. Fatal errors terminate the process.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::EventTooLarge { .. } | EngineError::MissingFragment(_)
        )
    }
}

impl From<JoinError> for EngineError {
    fn from(err: JoinError) -> Self {
        EngineError::Processing(err.to_string())
    }
}

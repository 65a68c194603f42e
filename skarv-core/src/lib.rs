//! # skarv-core
//!
//! Foundation layer for event assembly and buffer management.
//!
//! ### Expectations (Production):
//! - Fixed memory footprint: every buffer exists before the run starts
//! - No blocking on the fragment-assembly path
//! - Backpressure signalled explicitly, never by stalling a caller
//!
//! ### Key Submodules:
//! - `pool`: fixed-capacity buffer slots plus the recycling free list
//! - `registry`: fragment arenas addressed as `(arena id, byte offset)`
//! - `assembly`: per-event-id contributor state machine and directory
//! - `ring`: SPSC handoff of completed events to the distribution path

pub mod assembly;
pub mod pool;
pub mod registry;
pub mod ring;
pub mod stats;

pub mod prelude {
    pub use crate::assembly::*;
    pub use crate::pool::*;
    pub use crate::registry::*;
    pub use crate::ring::*;
    pub use crate::stats::*;
}

//! ## skarv-codec::source
//! **Node origin identity**
//!
//! A `Src` names the endpoint a container node came from. Ordering is the
//! `(value, log)` tuple, which gives a deterministic tie-break among
//! same-level sources when directories need a stable order.

/// Role of an endpoint in the data path, encoded in the top byte of the
/// `log` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Level {
    /// Run control and configuration endpoints.
    Control = 0,
    /// A fragment-producing contributor.
    Source = 1,
    /// An event builder.
    Event = 2,
    /// A downstream consumer pool.
    Monitor = 3,
}

impl Level {
    pub fn from_u8(value: u8) -> Option<Level> {
        match value {
            0 => Some(Level::Control),
            1 => Some(Level::Source),
            2 => Some(Level::Event),
            3 => Some(Level::Monitor),
            _ => None,
        }
    }
}

/// Origin endpoint of a container node.
///
/// Two `u32` sub-fields of the 64-bit wire representation: `log` carries
/// the level in its top byte, `value` is the endpoint's numeric id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Src {
    log: u32,
    value: u32,
}

impl Src {
    pub fn new(level: Level, value: u32) -> Self {
        Self {
            log: (level as u32 & 0xff) << 24,
            value,
        }
    }

    pub const fn from_raw(log: u32, value: u32) -> Self {
        Self { log, value }
    }

    pub fn log(&self) -> u32 {
        self.log
    }

    pub fn value(&self) -> u32 {
        self.value
    }

    pub fn level(&self) -> Option<Level> {
        Level::from_u8(((self.log >> 24) & 0xff) as u8)
    }
}

impl Default for Src {
    fn default() -> Self {
        Self {
            log: u32::MAX,
            value: u32::MAX,
        }
    }
}

impl PartialOrd for Src {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Src {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.value, self.log).cmp(&(other.value, other.log))
    }
}

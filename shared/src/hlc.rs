//! Hybrid logical clock (Kulkarni et al.).
//!
//! A timestamp packs three fields into 128 bits: 48 bits of physical
//! milliseconds, a 16-bit logical counter, and a 64-bit node id. Comparison
//! is lexicographic over `(physical, logical, node)`, which gives every pair
//! of timestamps the same order on every replica. The logical counter keeps
//! two operations generated in the same millisecond on the same node
//! distinct; the node id breaks the remaining tie deterministically.

use std::time::SystemTime;

use thiserror::Error;

/// Physical milliseconds are carried in 48 bits on the wire.
const PHYSICAL_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

/// Errors from parsing an externally supplied timestamp rendering.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HlcError {
    /// Lexicographic rendering has the wrong length
    #[error("timestamp rendering has length {len}, expected 32")]
    BadLength { len: usize },

    /// Lexicographic rendering contains a non-hex character
    #[error("timestamp rendering is not lowercase hex")]
    BadDigit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HlcTimestamp {
    pub physical: u64,
    pub logical: u16,
    pub node: u64,
}

impl HlcTimestamp {
    /// Sentinel used when rehydrating persisted entries: any timestamp
    /// observed over the wire supersedes it.
    pub const BASE: HlcTimestamp = HlcTimestamp {
        physical: 1,
        logical: 0,
        node: 0,
    };

    pub fn new(physical: u64, logical: u16, node: u64) -> Self {
        Self {
            physical: physical & PHYSICAL_MASK,
            logical,
            node,
        }
    }

    /// Base timestamp anchored at a server-provided wall time, used when a
    /// snapshot replaces local state.
    pub fn base_at(physical: u64) -> Self {
        Self::new(physical, 0, 0)
    }

    /// 16-byte wire form: `(physical << 16 | logical)` as u64 LE, then the
    /// node id as u64 LE.
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        let packed = (self.physical & PHYSICAL_MASK) << 16 | u64::from(self.logical);
        out[..8].copy_from_slice(&packed.to_le_bytes());
        out[8..].copy_from_slice(&self.node.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; 16]) -> Self {
        let mut packed = [0u8; 8];
        packed.copy_from_slice(&bytes[..8]);
        let packed = u64::from_le_bytes(packed);
        let mut node = [0u8; 8];
        node.copy_from_slice(&bytes[8..]);
        Self {
            physical: packed >> 16,
            logical: (packed & 0xFFFF) as u16,
            node: u64::from_le_bytes(node),
        }
    }

    /// Fixed-width rendering whose lexicographic order equals timestamp
    /// order: 12 hex chars of physical, 4 of logical, 16 of node. Durable
    /// queue keys embed this so a plain key scan comes back in op order.
    pub fn to_lex_string(&self) -> String {
        format!(
            "{:012x}{:04x}{:016x}",
            self.physical & PHYSICAL_MASK,
            self.logical,
            self.node
        )
    }

    pub fn from_lex_string(s: &str) -> Result<Self, HlcError> {
        if s.len() != 32 {
            return Err(HlcError::BadLength { len: s.len() });
        }
        let physical = u64::from_str_radix(&s[..12], 16).map_err(|_| HlcError::BadDigit)?;
        let logical = u16::from_str_radix(&s[12..16], 16).map_err(|_| HlcError::BadDigit)?;
        let node = u64::from_str_radix(&s[16..], 16).map_err(|_| HlcError::BadDigit)?;
        Ok(Self {
            physical,
            logical,
            node,
        })
    }
}

/// Generator state for one node. `now` stamps local operations, `observe`
/// advances the floor past remote timestamps so subsequent local stamps
/// always dominate everything seen so far.
pub struct HlcClock {
    node: u64,
    last: HlcTimestamp,
}

impl HlcClock {
    pub fn new(node: u64) -> Self {
        Self {
            node,
            last: HlcTimestamp::new(0, 0, node),
        }
    }

    pub fn node(&self) -> u64 {
        self.node
    }

    pub fn last(&self) -> HlcTimestamp {
        self.last
    }

    /// Strictly increasing per clock: physical is the max of wall time
    /// (corrected by `offset_ms`) and the previous stamp; the logical
    /// counter increments whenever physical stalls.
    pub fn now(&mut self, offset_ms: i64) -> HlcTimestamp {
        let wall = corrected_wall_ms(offset_ms);
        let mut physical = wall.max(self.last.physical);
        let logical = if physical == self.last.physical {
            match self.last.logical.checked_add(1) {
                Some(l) => l,
                None => {
                    // 65536 stamps in one millisecond; spill into the next.
                    physical += 1;
                    0
                }
            }
        } else {
            0
        };
        let ts = HlcTimestamp::new(physical, logical, self.node);
        self.last = ts;
        ts
    }

    /// Receive rule: merge a remote timestamp into the floor. Never emits a
    /// timestamp, only guarantees the next `now` call dominates `remote`.
    pub fn observe(&mut self, remote: &HlcTimestamp, offset_ms: i64) {
        let wall = corrected_wall_ms(offset_ms);
        let physical = wall.max(self.last.physical).max(remote.physical);
        let logical = if physical == self.last.physical && physical == remote.physical {
            self.last.logical.max(remote.logical)
        } else if physical == self.last.physical {
            self.last.logical
        } else if physical == remote.physical {
            remote.logical
        } else {
            0
        };
        self.last = HlcTimestamp::new(physical, logical, self.node);
    }
}

/// Wall-clock milliseconds shifted by the engine's server-time offset. A
/// clock before the epoch degrades to 0 rather than failing: ordering is
/// then carried entirely by the logical counter.
pub fn corrected_wall_ms(offset_ms: i64) -> u64 {
    let wall = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    if offset_ms >= 0 {
        wall.saturating_add(offset_ms as u64)
    } else {
        wall.saturating_sub(offset_ms.unsigned_abs())
    }
}

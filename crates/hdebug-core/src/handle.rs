use std::fmt;

use serde::{Deserialize, Serialize};

/// Raw pointer-sized token as it crosses the ABI.
///
/// The same type is used for universal and debug handles because both
/// contexts share one call surface. Which namespace a value belongs to is
/// decided by the context it is passed to.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(pub usize);

impl Handle {
    pub const NULL: Handle = Handle(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn raw(self) -> usize {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

// Debug handle layout, low bits first:
//   [slot + 1 : SLOT_BITS][context tag : TAG_BITS][generation : rest]
// A zero slot field never decodes, so 0 stays the null handle.
#[cfg(target_pointer_width = "64")]
const SLOT_BITS: u32 = 28;
#[cfg(target_pointer_width = "64")]
const TAG_BITS: u32 = 8;

#[cfg(not(target_pointer_width = "64"))]
const SLOT_BITS: u32 = 18;
#[cfg(not(target_pointer_width = "64"))]
const TAG_BITS: u32 = 4;

const SLOT_MASK: usize = (1usize << SLOT_BITS) - 1;
pub(crate) const TAG_MASK: usize = (1usize << TAG_BITS) - 1;
const GEN_SHIFT: u32 = SLOT_BITS + TAG_BITS;
pub(crate) const GEN_MASK: usize = usize::MAX >> GEN_SHIFT;

/// Maximum number of slots a single table can address.
pub const MAX_SLOTS: usize = SLOT_MASK;

/// Decoded form of a debug handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DebugHandle {
    pub slot: usize,
    pub tag: usize,
    pub generation: usize,
}

impl DebugHandle {
    pub fn encode(self) -> Handle {
        debug_assert!(self.slot < MAX_SLOTS);
        Handle(
            ((self.generation & GEN_MASK) << GEN_SHIFT)
                | ((self.tag & TAG_MASK) << SLOT_BITS)
                | (self.slot + 1),
        )
    }

    /// Returns `None` for the null handle and for values with an empty slot field.
    pub fn decode(h: Handle) -> Option<DebugHandle> {
        let low = h.0 & SLOT_MASK;
        if low == 0 {
            return None;
        }
        Some(DebugHandle {
            slot: low - 1,
            tag: (h.0 >> SLOT_BITS) & TAG_MASK,
            generation: h.0 >> GEN_SHIFT,
        })
    }
}

pub(crate) fn next_generation(g: usize) -> usize {
    g.wrapping_add(1) & GEN_MASK
}

/// Bookkeeping for one issued debug handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HandleEntry {
    pub underlying: Handle,
    pub alive: bool,
    pub generation: usize,
    /// Leak-detection generation current when the handle was opened.
    pub opened_in: u64,
}

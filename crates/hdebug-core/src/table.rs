//! Slot table translating debug handles to universal handles.
//!
//! Slots are addressed by index and versioned by a per-slot generation.
//! Closing a handle keeps its entry (so a later use is reported as
//! use-after-close) and queues the slot. Only when the slot falls off the
//! bounded closed queue is it retired: the generation is bumped and the slot
//! becomes reusable, after which stale handles classify as invalid.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::{DebugError, InvalidReason};
use crate::handle::{next_generation, DebugHandle, Handle, HandleEntry, MAX_SLOTS, TAG_MASK};

pub const DEFAULT_CLOSED_QUEUE_MAX: usize = 1024;

#[derive(Debug, Clone)]
enum Slot {
    Occupied(HandleEntry),
    /// Retired; the next handle issued from this slot uses `generation`.
    Free { generation: usize },
}

/// An alive entry as reported by leak queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenHandle {
    pub handle: Handle,
    pub underlying: Handle,
    pub opened_in: u64,
}

#[derive(Debug)]
pub struct HandleTable {
    tag: usize,
    slots: Vec<Slot>,
    free: Vec<usize>,
    closed: VecDeque<usize>,
    closed_queue_max: usize,
    capacity: usize,
    leak_generation: u64,
    open_count: usize,
}

impl HandleTable {
    pub fn new(tag: usize, closed_queue_max: usize) -> Self {
        HandleTable::with_capacity_limit(tag, closed_queue_max, MAX_SLOTS)
    }

    pub(crate) fn with_capacity_limit(tag: usize, closed_queue_max: usize, capacity: usize) -> Self {
        HandleTable {
            tag: tag & TAG_MASK,
            slots: Vec::new(),
            free: Vec::new(),
            closed: VecDeque::new(),
            closed_queue_max,
            capacity: capacity.min(MAX_SLOTS),
            leak_generation: 0,
            open_count: 0,
        }
    }

    pub fn tag(&self) -> usize {
        self.tag
    }

    pub fn open_count(&self) -> usize {
        self.open_count
    }

    pub fn closed_count(&self) -> usize {
        self.closed.len()
    }

    pub fn closed_queue_max(&self) -> usize {
        self.closed_queue_max
    }

    pub fn set_closed_queue_max(&mut self, max: usize) {
        self.closed_queue_max = max;
        while self.closed.len() > self.closed_queue_max {
            self.retire_oldest_closed();
        }
    }

    pub fn leak_generation(&self) -> u64 {
        self.leak_generation
    }

    pub fn new_generation(&mut self) -> u64 {
        self.leak_generation += 1;
        self.leak_generation
    }

    pub fn open(&mut self, underlying: Handle) -> Result<Handle, DebugError> {
        if underlying.is_null() {
            return Ok(Handle::NULL);
        }
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None if self.slots.len() < self.capacity => {
                self.slots.push(Slot::Free { generation: 0 });
                self.slots.len() - 1
            }
            None => {
                if !self.retire_oldest_closed() {
                    return Err(DebugError::TableFull {
                        capacity: self.capacity,
                    });
                }
                match self.free.pop() {
                    Some(slot) => slot,
                    None => {
                        return Err(DebugError::TableFull {
                            capacity: self.capacity,
                        })
                    }
                }
            }
        };

        let generation = match self.slots[slot] {
            Slot::Free { generation } => generation,
            Slot::Occupied(_) => unreachable!("free list holds occupied slot {slot}"),
        };
        self.slots[slot] = Slot::Occupied(HandleEntry {
            underlying,
            alive: true,
            generation,
            opened_in: self.leak_generation,
        });
        self.open_count += 1;
        Ok(DebugHandle {
            slot,
            tag: self.tag,
            generation,
        }
        .encode())
    }

    pub fn unwrap(&self, h: Handle) -> Result<Handle, DebugError> {
        if h.is_null() {
            return Ok(Handle::NULL);
        }
        let (_, entry) = self.lookup(h)?;
        if !entry.alive {
            return Err(DebugError::UseAfterClose { handle: h });
        }
        Ok(entry.underlying)
    }

    /// Marks the handle closed and returns the universal handle it wrapped.
    pub fn close(&mut self, h: Handle) -> Result<Handle, DebugError> {
        if h.is_null() {
            return Ok(Handle::NULL);
        }
        let (slot, entry) = self.lookup(h)?;
        if !entry.alive {
            return Err(DebugError::DoubleClose { handle: h });
        }
        let underlying = entry.underlying;
        if let Slot::Occupied(entry) = &mut self.slots[slot] {
            entry.alive = false;
        }
        self.open_count -= 1;
        self.closed.push_back(slot);
        while self.closed.len() > self.closed_queue_max {
            self.retire_oldest_closed();
        }
        Ok(underlying)
    }

    pub fn entry(&self, h: Handle) -> Option<&HandleEntry> {
        self.lookup(h).ok().map(|(_, e)| e)
    }

    /// Alive handles opened in leak generation `since` or later.
    pub fn open_handles(&self, since: u64) -> Vec<OpenHandle> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, s)| match s {
                Slot::Occupied(e) if e.alive && e.opened_in >= since => Some(OpenHandle {
                    handle: self.encode(slot, e.generation),
                    underlying: e.underlying,
                    opened_in: e.opened_in,
                }),
                _ => None,
            })
            .collect()
    }

    /// Closed handles still tracked for use-after-close detection, oldest first.
    pub fn closed_handles(&self) -> Vec<Handle> {
        self.closed
            .iter()
            .filter_map(|&slot| match &self.slots[slot] {
                Slot::Occupied(e) => Some(self.encode(slot, e.generation)),
                Slot::Free { .. } => None,
            })
            .collect()
    }

    fn encode(&self, slot: usize, generation: usize) -> Handle {
        DebugHandle {
            slot,
            tag: self.tag,
            generation,
        }
        .encode()
    }

    fn lookup(&self, h: Handle) -> Result<(usize, &HandleEntry), DebugError> {
        let invalid = |reason| DebugError::InvalidHandle { handle: h, reason };
        let dh = DebugHandle::decode(h).ok_or_else(|| invalid(InvalidReason::Malformed))?;
        if dh.tag != self.tag {
            return Err(invalid(InvalidReason::ForeignContext));
        }
        match self.slots.get(dh.slot) {
            None => Err(invalid(InvalidReason::NeverIssued)),
            Some(Slot::Free { .. }) => Err(invalid(InvalidReason::Retired)),
            Some(Slot::Occupied(e)) if e.generation != dh.generation => {
                Err(invalid(InvalidReason::StaleGeneration))
            }
            Some(Slot::Occupied(e)) => Ok((dh.slot, e)),
        }
    }

    fn retire_oldest_closed(&mut self) -> bool {
        let Some(slot) = self.closed.pop_front() else {
            return false;
        };
        if let Slot::Occupied(e) = &self.slots[slot] {
            self.slots[slot] = Slot::Free {
                generation: next_generation(e.generation),
            };
            self.free.push(slot);
        }
        true
    }
}

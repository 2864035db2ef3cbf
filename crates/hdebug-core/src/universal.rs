//! In-memory universal context.
//!
//! A minimal production-style context: handles are object addresses (slot
//! index + 1), `dup` bumps a reference count and returns the same handle,
//! `close` drops one reference. It performs only the checks needed to avoid
//! corrupting its own store, so bugs it cannot see are left for the debug
//! layer to catch. Used by the replay harness and by tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::abi::{AbiError, ContextId, HandleAbi, OpId};
use crate::context::lock;
use crate::handle::Handle;

pub mod op {
    use crate::abi::OpId;

    /// `ADD(a, b)`: new integer `a + b` (wrapping).
    pub const ADD: OpId = OpId(1);
    /// `NEG(a)`: new integer `-a` (wrapping).
    pub const NEG: OpId = OpId(2);
}

pub const ERR_BAD_HANDLE: u32 = 1;
pub const ERR_BAD_ARITY: u32 = 2;
pub const ERR_UNKNOWN_OP: u32 = 3;

#[derive(Debug)]
struct Object {
    value: i64,
    refcnt: u32,
}

#[derive(Debug)]
pub struct MemoryUniversal {
    id: ContextId,
    name: String,
    objects: Mutex<Vec<Option<Object>>>,
    calls: AtomicU64,
}

impl MemoryUniversal {
    pub fn new(name: impl Into<String>) -> Self {
        MemoryUniversal {
            id: ContextId::fresh(),
            name: name.into(),
            objects: Mutex::new(Vec::new()),
            calls: AtomicU64::new(0),
        }
    }

    /// Objects with at least one outstanding reference.
    pub fn live_objects(&self) -> usize {
        lock(&self.objects).iter().filter(|o| o.is_some()).count()
    }

    /// Number of operations forwarded into this context so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn count_call(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    fn alloc(&self, value: i64) -> Handle {
        let mut objects = lock(&self.objects);
        let obj = Object { value, refcnt: 1 };
        let idx = match objects.iter().position(|o| o.is_none()) {
            Some(idx) => {
                objects[idx] = Some(obj);
                idx
            }
            None => {
                objects.push(Some(obj));
                objects.len() - 1
            }
        };
        Handle(idx + 1)
    }

    fn value(&self, h: Handle) -> Result<i64, AbiError> {
        let objects = lock(&self.objects);
        object_idx(h)
            .and_then(|idx| objects.get(idx))
            .and_then(|o| o.as_ref())
            .map(|o| o.value)
            .ok_or_else(|| bad_handle(h))
    }
}

fn object_idx(h: Handle) -> Option<usize> {
    h.raw().checked_sub(1)
}

fn bad_handle(h: Handle) -> AbiError {
    AbiError::call(ERR_BAD_HANDLE, format!("no object at {h}"))
}

impl HandleAbi for MemoryUniversal {
    fn ctx_id(&self) -> ContextId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn dup(&self, h: Handle) -> Result<Handle, AbiError> {
        self.count_call();
        let mut objects = lock(&self.objects);
        let obj = object_idx(h)
            .and_then(|idx| objects.get_mut(idx))
            .and_then(|o| o.as_mut())
            .ok_or_else(|| bad_handle(h))?;
        obj.refcnt = obj.refcnt.saturating_add(1);
        Ok(h)
    }

    fn close(&self, h: Handle) -> Result<(), AbiError> {
        self.count_call();
        let mut objects = lock(&self.objects);
        let slot = object_idx(h)
            .and_then(|idx| objects.get_mut(idx))
            .filter(|o| o.is_some())
            .ok_or_else(|| bad_handle(h))?;
        if let Some(obj) = slot.as_mut() {
            obj.refcnt -= 1;
            if obj.refcnt == 0 {
                *slot = None;
            }
        }
        Ok(())
    }

    fn from_i64(&self, value: i64) -> Result<Handle, AbiError> {
        self.count_call();
        Ok(self.alloc(value))
    }

    fn as_i64(&self, h: Handle) -> Result<i64, AbiError> {
        self.count_call();
        self.value(h)
    }

    fn is(&self, a: Handle, b: Handle) -> Result<bool, AbiError> {
        self.count_call();
        Ok(a == b)
    }

    fn invoke(&self, code: OpId, args: &[Handle]) -> Result<Handle, AbiError> {
        self.count_call();
        let arity = |n: usize| {
            if args.len() == n {
                Ok(())
            } else {
                Err(AbiError::call(
                    ERR_BAD_ARITY,
                    format!("op {} takes {n} argument(s), got {}", code.0, args.len()),
                ))
            }
        };
        let v = match code {
            op::ADD => {
                arity(2)?;
                self.value(args[0])?.wrapping_add(self.value(args[1])?)
            }
            op::NEG => {
                arity(1)?;
                self.value(args[0])?.wrapping_neg()
            }
            other => {
                return Err(AbiError::call(
                    ERR_UNKNOWN_OP,
                    format!("unknown op {}", other.0),
                ))
            }
        };
        Ok(self.alloc(v))
    }
}

//! Generation-checked handle tables
//!
//! Resources handed to the host are stored in slot arenas and named by `u64`
//! handles. A handle packs the slot index (plus one, so `0` is never valid),
//! the slot's generation and a per-table kind tag:
//!
//! ```text
//!  63      56 55                   32 31                     0
//! +----------+-----------------------+------------------------+
//! |   kind   |      generation       |       index + 1        |
//! +----------+-----------------------+------------------------+
//! ```
//!
//! Removing an entry bumps its slot's generation, so a stale copy of the
//! handle is rejected even after the slot is reused, and a handle from one
//! table is rejected by every other table.
//!
//! Generations are 24 bits wide. A slot whose generation is exhausted is
//! retired rather than reused, so no handle value is ever issued twice.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{BridgeError, Result};

const INDEX_BITS: u32 = 32;
const GENERATION_BITS: u32 = 24;
const GENERATION_MASK: u32 = (1 << GENERATION_BITS) - 1;
const KIND_SHIFT: u32 = INDEX_BITS + GENERATION_BITS;

/// Kind tag carried in the top byte of every handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    Connection = 1,
    WriteStream = 2,
    ReadStream = 3,
}

impl HandleKind {
    pub fn name(self) -> &'static str {
        match self {
            HandleKind::Connection => "connection",
            HandleKind::WriteStream => "write stream",
            HandleKind::ReadStream => "read stream",
        }
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<Arc<T>>,
}

struct Slots<T> {
    entries: Vec<Slot<T>>,
    free: Vec<u32>,
    live: usize,
}

/// Arena of shared resources addressed by opaque handles
pub struct HandleTable<T> {
    kind: HandleKind,
    slots: Mutex<Slots<T>>,
}

impl<T> HandleTable<T> {
    pub fn new(kind: HandleKind) -> Self {
        Self {
            kind,
            slots: Mutex::new(Slots {
                entries: Vec::new(),
                free: Vec::new(),
                live: 0,
            }),
        }
    }

    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    /// Store `value` and return its handle
    pub fn insert(&self, value: T) -> Result<u64> {
        let mut slots = self.slots.lock();

        let index = match slots.free.pop() {
            Some(index) => index,
            None => {
                let index = u32::try_from(slots.entries.len())
                    .ok()
                    .filter(|i| *i < u32::MAX)
                    .ok_or_else(|| BridgeError::internal(format!("{} table is full", self.kind.name())))?;
                slots.entries.push(Slot {
                    generation: 0,
                    value: None,
                });
                index
            }
        };

        let slot = &mut slots.entries[index as usize];
        slot.value = Some(Arc::new(value));
        let handle = self.encode(index, slot.generation);
        slots.live += 1;
        Ok(handle)
    }

    /// Shared reference to the entry behind `handle`
    pub fn get(&self, handle: u64) -> Result<Arc<T>> {
        let slots = self.slots.lock();
        let index = self.decode(handle, &slots)?;
        slots.entries[index]
            .value
            .clone()
            .ok_or_else(|| self.invalid(handle))
    }

    /// Detach the entry behind `handle`; the handle is dead afterwards
    ///
    /// Callers still holding an `Arc` from [`get`](Self::get) keep the entry
    /// alive until they drop it.
    pub fn remove(&self, handle: u64) -> Result<Arc<T>> {
        let mut slots = self.slots.lock();
        let index = self.decode(handle, &slots)?;

        let slot = &mut slots.entries[index];
        let value = slot.value.take().ok_or_else(|| self.invalid(handle))?;

        if advance(slot) {
            slots.free.push(index as u32);
        }
        slots.live -= 1;
        Ok(value)
    }

    /// Detach every entry
    pub fn drain(&self) -> Vec<Arc<T>> {
        let mut slots = self.slots.lock();
        let mut drained = Vec::with_capacity(slots.live);
        let mut freed = Vec::new();

        for (index, slot) in slots.entries.iter_mut().enumerate() {
            if let Some(value) = slot.value.take() {
                drained.push(value);
                if advance(slot) {
                    freed.push(index as u32);
                }
            }
        }

        slots.free.extend(freed);
        slots.live = 0;
        drained
    }

    pub fn len(&self) -> usize {
        self.slots.lock().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn encode(&self, index: u32, generation: u32) -> u64 {
        ((self.kind as u64) << KIND_SHIFT)
            | (u64::from(generation & GENERATION_MASK) << INDEX_BITS)
            | (u64::from(index) + 1)
    }

    fn decode(&self, handle: u64, slots: &Slots<T>) -> Result<usize> {
        let kind = (handle >> KIND_SHIFT) as u8;
        let generation = ((handle >> INDEX_BITS) as u32) & GENERATION_MASK;
        let index = (handle as u32).checked_sub(1).ok_or_else(|| self.invalid(handle))? as usize;

        if kind != self.kind as u8 {
            return Err(self.invalid(handle));
        }
        match slots.entries.get(index) {
            Some(slot) if slot.generation == generation => Ok(index),
            _ => Err(self.invalid(handle)),
        }
    }

    fn invalid(&self, handle: u64) -> BridgeError {
        BridgeError::InvalidHandle {
            kind: self.kind.name(),
            handle,
        }
    }
}

/// Bump the generation of an emptied slot; false once it is exhausted
fn advance<T>(slot: &mut Slot<T>) -> bool {
    if slot.generation == GENERATION_MASK {
        return false;
    }
    slot.generation += 1;
    true
}

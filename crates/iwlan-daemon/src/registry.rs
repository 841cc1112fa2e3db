//! Registry of live slot handles.
//!
//! The only state touched from many tasks at once: request entry points look
//! up the handle for their slot here, everything else goes through the
//! dispatcher queue.

use std::fmt;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;

use crate::dispatch::{DispatchError, SlotHandle};

/// Physical SIM slot index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SlotId(u32);

impl From<u32> for SlotId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl SlotId {
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot{}", self.0)
    }
}

/// Concurrent map of slot handles keyed by [`SlotId`].
#[derive(Debug, Default)]
pub struct SlotRegistry(DashMap<SlotId, SlotHandle>);

impl SlotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, slot: SlotId) -> Option<SlotHandle> {
        self.0.get(&slot).map(|entry| entry.value().clone())
    }

    /// Insert a handle for a new slot; fails if the slot is taken.
    pub fn insert(&self, handle: SlotHandle) -> Result<(), DispatchError> {
        match self.0.entry(handle.slot()) {
            Entry::Occupied(_) => Err(DispatchError::DuplicateSlot(handle.slot())),
            Entry::Vacant(vacant) => {
                vacant.insert(handle);
                Ok(())
            }
        }
    }

    pub fn remove(&self, slot: SlotId) -> Option<SlotHandle> {
        self.0.remove(&slot).map(|(_, handle)| handle)
    }

    pub fn contains(&self, slot: SlotId) -> bool {
        self.0.contains_key(&slot)
    }

    /// Registered slots in ascending order.
    pub fn slots(&self) -> Vec<SlotId> {
        let mut slots: Vec<SlotId> = self.0.iter().map(|entry| *entry.key()).collect();
        slots.sort_unstable();
        slots
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

//! The registry of live ad slots.
//!
//! The registry is the single source of truth for which placements currently
//! exist. Every operation takes the one lock guarding the whole map, so each
//! insert, removal or flag toggle is observed atomically by the scheduler, the
//! auction and the render event bridge. Callbacks are cloned out and invoked by
//! callers after the lock is released, and host layout is never queried while
//! the lock is held.

use core::fmt;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::render::RenderHandle;
use crate::sizes::AdSize;
use crate::visibility::LayoutElement;

/// Callback invoked on slot lifecycle transitions.
pub type SlotCallback = Arc<dyn Fn() + Send + Sync>;

/// Opaque, never reused slot identifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(u64);

impl fmt::Display for SlotId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "slot-{}", self.0)
    }
}

/// Caller-provided lifecycle hooks.
#[derive(Clone, Default)]
pub struct SlotCallbacks {
    pub on_load: Option<SlotCallback>,
    pub on_empty: Option<SlotCallback>,
    pub on_refresh_start: Option<SlotCallback>,
}

/// Everything known about one registered placement.
#[derive(Clone)]
pub struct SlotRecord {
    pub id: SlotId,
    pub ad_unit_path: String,
    /// Id of the container element the render service draws into.
    pub container_id: String,
    /// The placement element, used only for visibility queries.
    pub source_element: Arc<dyn LayoutElement>,
    pub sizes: Vec<AdSize>,
    /// Set once the render service has defined the slot.
    pub render_handle: Option<RenderHandle>,
    pub out_of_page: bool,
    pub immediate: bool,
    pub collapse_empty: bool,
    pub openx_ignore: bool,
    pub preload_margin: u32,
    pub pending_refresh: bool,
    pub callbacks: SlotCallbacks,
}

impl fmt::Debug for SlotRecord {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SlotRecord")
            .field("id", &self.id)
            .field("ad_unit_path", &self.ad_unit_path)
            .field("container_id", &self.container_id)
            .field("render_handle", &self.render_handle)
            .field("out_of_page", &self.out_of_page)
            .field("immediate", &self.immediate)
            .field("openx_ignore", &self.openx_ignore)
            .field("pending_refresh", &self.pending_refresh)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct RegistryState {
    slots: BTreeMap<SlotId, SlotRecord>,
    next_id: u64,
}

/// Process-wide map from slot id to slot record.
#[derive(Default)]
pub struct SlotRegistry {
    inner: Mutex<RegistryState>,
    definitions: Mutex<()>,
}

impl SlotRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serialises slot definition against slot removal.
    ///
    /// Registration holds the guard from its liveness check until the render
    /// handle is recorded, and destruction holds it while removing the record,
    /// so a slot removed first is never defined. No callbacks may run while it
    /// is held.
    pub fn definition_guard(&self) -> MutexGuard<'_, ()> {
        self.definitions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mint a fresh identifier. Identifiers are never handed out twice.
    pub fn next_id(&self) -> SlotId {
        let mut state = self.state();
        state.next_id = state.next_id.wrapping_add(1);
        SlotId(state.next_id)
    }

    /// Insert a record. Returns false, leaving the registry untouched, if a
    /// record with the same id is already live.
    pub fn insert(&self, record: SlotRecord) -> bool {
        let mut state = self.state();
        if state.slots.contains_key(&record.id) {
            return false;
        }
        state.slots.insert(record.id, record);
        true
    }

    #[must_use]
    pub fn get(&self, id: SlotId) -> Option<SlotRecord> {
        self.state().slots.get(&id).cloned()
    }

    #[must_use]
    pub fn contains(&self, id: SlotId) -> bool {
        self.state().slots.contains_key(&id)
    }

    pub fn remove(&self, id: SlotId) -> Option<SlotRecord> {
        self.state().slots.remove(&id)
    }

    /// Linear scan for the record owning `handle`.
    #[must_use]
    pub fn find_by_render_handle(&self, handle: RenderHandle) -> Option<SlotRecord> {
        self.state()
            .slots
            .values()
            .find(|record| record.render_handle == Some(handle))
            .cloned()
    }

    /// All records waiting for a refresh, in registration order.
    #[must_use]
    pub fn all_pending(&self) -> Vec<SlotRecord> {
        self.state()
            .slots
            .values()
            .filter(|record| record.pending_refresh)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state().slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state().slots.is_empty()
    }

    /// Flag a slot for refresh. Returns false for unknown ids.
    pub fn mark_pending(&self, id: SlotId) -> bool {
        match self.state().slots.get_mut(&id) {
            Some(record) => {
                record.pending_refresh = true;
                true
            }
            None => false,
        }
    }

    /// Record the render handle of a defined slot. The handle can only be set
    /// once; returns false if the slot is gone or already has one.
    pub fn set_render_handle(&self, id: SlotId, handle: RenderHandle) -> bool {
        match self.state().slots.get_mut(&id) {
            Some(record) if record.render_handle.is_none() => {
                record.render_handle = Some(handle);
                true
            }
            _ => false,
        }
    }

    /// Edit the callbacks of a live slot. Returns false for unknown ids.
    pub fn update_callbacks<F>(&self, id: SlotId, edit: F) -> bool
    where
        F: FnOnce(&mut SlotCallbacks),
    {
        match self.state().slots.get_mut(&id) {
            Some(record) => {
                edit(&mut record.callbacks);
                true
            }
            None => false,
        }
    }

    /// Move every pending, defined slot accepted by `eligible` into a batch.
    ///
    /// Candidates are copied out under the lock and judged after it is
    /// released, so `eligible` may call back into the host or the registry.
    /// A chosen slot only joins the batch if it is still registered and still
    /// pending once the lock is taken again; its pending flag is cleared in
    /// that same critical section. Slots the render service has not defined
    /// yet stay pending regardless of `eligible`.
    pub fn take_eligible<F>(&self, mut eligible: F) -> Vec<SlotRecord>
    where
        F: FnMut(&SlotRecord) -> bool,
    {
        let candidates: Vec<SlotRecord> = self
            .state()
            .slots
            .values()
            .filter(|record| record.pending_refresh && record.render_handle.is_some())
            .cloned()
            .collect();
        let chosen: Vec<SlotId> = candidates
            .iter()
            .filter(|record| eligible(record))
            .map(|record| record.id)
            .collect();
        if chosen.is_empty() {
            return Vec::new();
        }

        let mut state = self.state();
        chosen
            .into_iter()
            .filter_map(|id| {
                let record = state.slots.get_mut(&id)?;
                if !record.pending_refresh {
                    return None;
                }
                record.pending_refresh = false;
                Some(record.clone())
            })
            .collect()
    }
}

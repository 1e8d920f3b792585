//! Render completion event fan-out.
//!
//! Completion events from the render service are matched back to live slots
//! by render handle and turned into the `on_load` / `on_empty` callbacks.

use log::{debug, trace};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use crate::registry::SlotRegistry;
use crate::render::RenderEnded;

/// Routes render completion events back to the callbacks of the slot they belong to.
///
/// The bridge owns the single subscription to the render service's completion
/// events. Events for slots that are no longer registered are dropped; repeated
/// events for the same slot simply invoke the callback again.
pub struct RenderEventBridge {
    registry: Arc<SlotRegistry>,
}

impl RenderEventBridge {
    #[must_use]
    pub fn new(registry: Arc<SlotRegistry>) -> Self {
        Self { registry }
    }

    /// Consume `events` on `runtime` until the render service closes the stream.
    pub fn spawn(self, runtime: &Handle, mut events: UnboundedReceiver<RenderEnded>) -> JoinHandle<()> {
        runtime.spawn(async move {
            while let Some(event) = events.recv().await {
                self.dispatch(event);
            }
            debug!("render event stream closed");
        })
    }

    /// Invoke `on_empty` or `on_load` for the slot that rendered. Returns false
    /// when the event matched no live slot.
    pub fn dispatch(&self, event: RenderEnded) -> bool {
        let Some(record) = self.registry.find_by_render_handle(event.handle) else {
            trace!("render ended for unknown handle {:?}, dropping", event.handle);
            return false;
        };
        let callback = if event.is_empty {
            debug!("{}: rendered empty", record.id);
            record.callbacks.on_empty
        } else {
            debug!("{}: rendered", record.id);
            record.callbacks.on_load
        };
        if let Some(callback) = callback {
            callback();
        }
        true
    }
}

//! Placement elements and their attribute contract.
//!
//! An element reads its slot configuration from string attributes when it is
//! attached, registers the slot with the [`AdSlotManager`] and mirrors the
//! slot's render outcome into its own presentation state.

use log::{debug, warn};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::error::ConfigError;
use crate::manager::AdSlotManager;
use crate::registration::{SlotConfig, SlotHandle};
use crate::registry::SlotId;
use crate::sizes::smallest_by_height;
use crate::visibility::LayoutElement;

/// A page element that can own an ad slot while it is attached to the document.
pub trait Registerable {
    /// Called when the element is inserted into the document.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the element's attributes do not describe
    /// a usable slot.
    fn on_attach(&mut self, manager: &AdSlotManager) -> Result<AttachOutcome, ConfigError>;
    /// Called when the element is removed from the document.
    fn on_detach(&mut self);
}

/// What attaching an element did.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AttachOutcome {
    Registered(SlotId),
    /// Ads are switched off for the page; the element stays inert.
    Disabled,
    /// The viewport is outside the element's resolution bounds.
    Hidden,
    /// No size is eligible; the element is marked empty.
    NoEligibleSizes,
}

/// Presentation state of a placement element.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ElementState {
    pub loaded: bool,
    pub empty: bool,
    pub hidden: bool,
    /// Space reserved up front as `(width, height)`.
    pub min_size: Option<(u32, u32)>,
}

/// Events an element emits to the page.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ElementEvent {
    Loaded,
    Empty,
}

#[derive(Clone)]
struct Presentation {
    state: Arc<Mutex<ElementState>>,
    events: UnboundedSender<ElementEvent>,
}

impl Presentation {
    fn state(&self) -> MutexGuard<'_, ElementState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ElementEvent) {
        if self.events.send(event).is_err() {
            debug!("element event {event:?} has no listener");
        }
    }

    fn mark_empty(&self) {
        self.state().empty = true;
        self.emit(ElementEvent::Empty);
    }

    fn mark_loaded(&self) {
        self.state().loaded = true;
        self.emit(ElementEvent::Loaded);
    }

    fn reset(&self) {
        let mut state = self.state();
        state.loaded = false;
        state.empty = false;
    }
}

/// Placement element driven by its attributes.
///
/// Recognised attributes: `ad-unit`, `sizes`, `size-mapping`, `out-of-page`,
/// `immediate`, `collapse-empty`, `openx-ignore`, `preload`, and the viewport
/// bounds `min-x-resolution`, `max-x-resolution`, `min-y-resolution`,
/// `max-y-resolution`. Boolean attributes count as set when present.
pub struct AdSlotElement {
    attributes: BTreeMap<String, String>,
    layout: Arc<dyn LayoutElement>,
    container_id: String,
    presentation: Presentation,
    events: Option<UnboundedReceiver<ElementEvent>>,
    slot: Option<SlotHandle>,
}

impl AdSlotElement {
    pub fn new(container_id: impl Into<String>, layout: Arc<dyn LayoutElement>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            attributes: BTreeMap::new(),
            layout,
            container_id: container_id.into(),
            presentation: Presentation {
                state: Arc::new(Mutex::new(ElementState::default())),
                events: events_tx,
            },
            events: Some(events_rx),
            slot: None,
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.set_attribute(name, value);
        self
    }

    pub fn set_attribute(&mut self, name: &str, value: &str) {
        self.attributes.insert(name.to_ascii_lowercase(), value.to_owned());
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    #[must_use]
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    #[must_use]
    pub fn state(&self) -> ElementState {
        *self.presentation.state()
    }

    /// Take the receiving end of this element's events. Only the first call returns it.
    pub fn take_events(&mut self) -> Option<UnboundedReceiver<ElementEvent>> {
        self.events.take()
    }

    #[must_use]
    pub const fn slot(&self) -> Option<&SlotHandle> {
        self.slot.as_ref()
    }

    /// Ask for the slot to be reloaded. Does nothing before registration.
    pub fn refresh_slot(&self) {
        if let Some(slot) = &self.slot {
            slot.refresh();
        }
    }

    fn resolution_bound(&self, name: &str, default: f64) -> f64 {
        self.attribute(name)
            .and_then(|raw| raw.trim().parse::<f64>().ok())
            .unwrap_or(default)
    }

    fn resolution_prohibits(&self, (width, height): (f64, f64)) -> bool {
        let min_x = self.resolution_bound("min-x-resolution", 0.0);
        let max_x = self.resolution_bound("max-x-resolution", f64::INFINITY);
        let min_y = self.resolution_bound("min-y-resolution", 0.0);
        let max_y = self.resolution_bound("max-y-resolution", f64::INFINITY);
        min_x > width || max_x < width || min_y > height || max_y < height
    }

    fn preload_margin(&self) -> u32 {
        match self.attribute("preload") {
            None => 0,
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                debug!("ignoring preload value {raw:?}");
                0
            }),
        }
    }

    fn slot_config(&self) -> Result<SlotConfig, ConfigError> {
        let ad_unit = self
            .attribute("ad-unit")
            .filter(|unit| !unit.trim().is_empty())
            .ok_or(ConfigError::MissingAdUnit)?;
        let mut config = SlotConfig::new(ad_unit, self.container_id.clone(), Arc::clone(&self.layout))
            .with_raw_sizes(self.attribute("sizes"), self.attribute("size-mapping"))?;
        config.out_of_page = self.has_attribute("out-of-page");
        config.immediate = self.has_attribute("immediate");
        config.collapse_empty = self.has_attribute("collapse-empty");
        config.openx_ignore = self.has_attribute("openx-ignore");
        config.preload_margin = self.preload_margin();
        Ok(config)
    }

    fn wire_callbacks(&self, slot: &SlotHandle) {
        let presentation = self.presentation.clone();
        slot.on_refresh_start(move || presentation.reset());
        let presentation = self.presentation.clone();
        slot.on_load(move || presentation.mark_loaded());
        let presentation = self.presentation.clone();
        slot.on_empty(move || presentation.mark_empty());
    }
}

impl Registerable for AdSlotElement {
    fn on_attach(&mut self, manager: &AdSlotManager) -> Result<AttachOutcome, ConfigError> {
        if self.slot.is_some() {
            self.on_detach();
        }
        if manager.ads_disabled() {
            return Ok(AttachOutcome::Disabled);
        }
        if self.resolution_prohibits(manager.viewport().size()) {
            self.presentation.state().hidden = true;
            return Ok(AttachOutcome::Hidden);
        }

        let config = self.slot_config()?;
        if config.sizes.is_empty() {
            self.presentation.mark_empty();
            return Ok(AttachOutcome::NoEligibleSizes);
        }
        if !config.collapse_empty {
            self.presentation.state().min_size = smallest_by_height(&config.sizes);
        }

        let slot = manager.register(config).inspect_err(|err| {
            warn!("{}: registration failed: {err}", self.container_id);
        })?;
        self.wire_callbacks(&slot);
        let id = slot.id();
        self.slot = Some(slot);
        Ok(AttachOutcome::Registered(id))
    }

    fn on_detach(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.destroy();
        }
    }
}

//! Slot registration and the caller-facing slot handle.
//!
//! Registration is split in two. The synchronous part validates the
//! configuration, inserts a pending record and hands back a [`SlotHandle`]
//! right away. The asynchronous part waits for the render service, defines and
//! displays the slot, records its render handle and requests the first refresh.
//! A slot destroyed before the asynchronous part starts defining it is never
//! defined; one destroyed while the definition runs is released right after.

use anyhow::Result;
use log::{debug, warn};
use std::sync::Arc;
use tokio::runtime::Handle;

use crate::error::ConfigError;
use crate::registry::{SlotCallback, SlotCallbacks, SlotId, SlotRecord, SlotRegistry};
use crate::render::{RenderHandle, RenderService};
use crate::scheduler::RefreshScheduler;
use crate::sizes::{AdSize, SizeMapping, parse_sizes};
use crate::visibility::LayoutElement;

/// Everything needed to register one placement.
#[derive(Clone)]
pub struct SlotConfig {
    pub ad_unit_path: String,
    pub out_of_page: bool,
    /// Sizes eligible for the current viewport.
    pub sizes: Vec<AdSize>,
    pub size_mapping: SizeMapping,
    pub container_id: String,
    pub source_element: Arc<dyn LayoutElement>,
    pub immediate: bool,
    pub collapse_empty: bool,
    pub openx_ignore: bool,
    /// Extra pixels around the element counted as "in view".
    pub preload_margin: u32,
}

impl SlotConfig {
    /// An in-page slot with no sizes and every flag off.
    pub fn new(
        ad_unit_path: impl Into<String>,
        container_id: impl Into<String>,
        source_element: Arc<dyn LayoutElement>,
    ) -> Self {
        Self {
            ad_unit_path: ad_unit_path.into(),
            out_of_page: false,
            sizes: Vec::new(),
            size_mapping: SizeMapping::default(),
            container_id: container_id.into(),
            source_element,
            immediate: false,
            collapse_empty: false,
            openx_ignore: false,
            preload_margin: 0,
        }
    }

    #[must_use]
    pub fn with_sizes(mut self, sizes: Vec<AdSize>) -> Self {
        self.sizes = sizes;
        self
    }

    /// Fill sizes and mapping from their raw JSON attribute values.
    ///
    /// At least one of the two must be present. When only a mapping is given,
    /// every size it mentions becomes a slot size.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingSizes`] when both are absent, or the parse
    /// error of whichever value is malformed.
    pub fn with_raw_sizes(mut self, sizes: Option<&str>, size_mapping: Option<&str>) -> Result<Self, ConfigError> {
        if sizes.is_none() && size_mapping.is_none() {
            return Err(ConfigError::MissingSizes);
        }
        let parsed_sizes = sizes.map(parse_sizes).transpose()?.unwrap_or_default();
        let mapping = size_mapping
            .map(SizeMapping::parse)
            .transpose()?
            .unwrap_or_default();
        self.sizes = if parsed_sizes.is_empty() {
            mapping.all_sizes()
        } else {
            parsed_sizes
        };
        self.size_mapping = mapping;
        Ok(self)
    }

    /// Reject configurations that cannot produce a working slot.
    ///
    /// # Errors
    ///
    /// Returns the first problem found: a blank ad unit or container, no
    /// sizes, or a size with a zero dimension.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ad_unit_path.trim().is_empty() {
            return Err(ConfigError::MissingAdUnit);
        }
        if self.container_id.trim().is_empty() {
            return Err(ConfigError::InvalidAttribute {
                name: String::from("container"),
                value: self.container_id.clone(),
            });
        }
        if self.sizes.is_empty() {
            return Err(ConfigError::MissingSizes);
        }
        if let Some(size) = self.sizes.iter().find(|size| size.is_degenerate()) {
            return Err(ConfigError::InvalidSizes(format!("degenerate size {size:?}")));
        }
        Ok(())
    }

    fn into_record(self, id: SlotId) -> SlotRecord {
        SlotRecord {
            id,
            ad_unit_path: self.ad_unit_path,
            container_id: self.container_id,
            source_element: self.source_element,
            sizes: self.sizes,
            render_handle: None,
            out_of_page: self.out_of_page,
            immediate: self.immediate,
            collapse_empty: self.collapse_empty,
            openx_ignore: self.openx_ignore,
            preload_margin: self.preload_margin,
            pending_refresh: true,
            callbacks: SlotCallbacks::default(),
        }
    }
}

/// Creates slot records and defines them with the render service.
pub struct Registrar {
    registry: Arc<SlotRegistry>,
    scheduler: Arc<RefreshScheduler>,
    render: Arc<dyn RenderService>,
    runtime: Handle,
}

impl Registrar {
    #[must_use]
    pub fn new(
        registry: Arc<SlotRegistry>,
        scheduler: Arc<RefreshScheduler>,
        render: Arc<dyn RenderService>,
        runtime: Handle,
    ) -> Self {
        Self {
            registry,
            scheduler,
            render,
            runtime,
        }
    }

    /// Register a placement.
    ///
    /// # Errors
    ///
    /// Fails fast, without touching the registry or the render service, when
    /// [`SlotConfig::validate`] rejects the configuration.
    pub fn register(&self, config: SlotConfig) -> Result<SlotHandle, ConfigError> {
        config.validate()?;

        let id = self.registry.next_id();
        let definition = SlotDefinition {
            ad_unit_path: config.ad_unit_path.clone(),
            out_of_page: config.out_of_page,
            sizes: config.sizes.clone(),
            size_mapping: config.size_mapping.clone(),
            container_id: config.container_id.clone(),
            collapse_empty: config.collapse_empty,
        };
        self.registry.insert(config.into_record(id));
        debug!("{id}: registered {}", definition.ad_unit_path);

        let registry = Arc::clone(&self.registry);
        let scheduler = Arc::clone(&self.scheduler);
        let render = Arc::clone(&self.render);
        drop(self.runtime.spawn(async move {
            render.ready().await;
            complete_registration(&registry, &scheduler, render.as_ref(), id, &definition);
        }));

        Ok(SlotHandle {
            id,
            registry: Arc::clone(&self.registry),
            scheduler: Arc::clone(&self.scheduler),
            render: Arc::clone(&self.render),
        })
    }
}

/// The part of a slot config the render service needs.
struct SlotDefinition {
    ad_unit_path: String,
    out_of_page: bool,
    sizes: Vec<AdSize>,
    size_mapping: SizeMapping,
    container_id: String,
    collapse_empty: bool,
}

fn complete_registration(
    registry: &SlotRegistry,
    scheduler: &RefreshScheduler,
    render: &dyn RenderService,
    id: SlotId,
    definition: &SlotDefinition,
) {
    let defined = {
        let _definition = registry.definition_guard();
        if !registry.contains(id) {
            debug!("{id}: destroyed before definition, skipping");
            return;
        }
        define(render, definition).map(|handle| (handle, registry.set_render_handle(id, handle)))
    };
    match defined {
        Ok((_, true)) => scheduler.request_refresh(id),
        Ok((handle, false)) => {
            debug!("{id}: already defined, releasing {handle:?}");
            if let Err(err) = render.destroy_slots(&[handle]) {
                warn!("{id}: failed to release {handle:?}: {err:#}");
            }
        }
        Err(err) => {
            warn!("{id}: render service rejected {}: {err:#}", definition.ad_unit_path);
            if let Some(on_empty) = registry.get(id).and_then(|record| record.callbacks.on_empty) {
                on_empty();
            }
        }
    }
}

fn define(render: &dyn RenderService, definition: &SlotDefinition) -> Result<RenderHandle> {
    let handle = if definition.out_of_page {
        render.define_out_of_page_slot(&definition.ad_unit_path, &definition.container_id)?
    } else {
        render.define_slot(&definition.ad_unit_path, &definition.sizes, &definition.container_id)?
    };
    let configured = configure(render, handle, definition);
    if configured.is_err() {
        if let Err(err) = render.destroy_slots(&[handle]) {
            warn!("failed to release half-configured {handle:?}: {err:#}");
        }
    }
    configured.map(|()| handle)
}

fn configure(render: &dyn RenderService, handle: RenderHandle, definition: &SlotDefinition) -> Result<()> {
    if !definition.out_of_page {
        render.define_size_mapping(handle, &definition.size_mapping)?;
    }
    render.add_service(handle)?;
    if definition.collapse_empty {
        render.set_collapse_empty_div(handle, true)?;
    }
    render.display(&definition.container_id)
}

/// Caller-side handle to a registered slot.
///
/// All operations on a destroyed slot are no-ops.
#[derive(Clone)]
pub struct SlotHandle {
    id: SlotId,
    registry: Arc<SlotRegistry>,
    scheduler: Arc<RefreshScheduler>,
    render: Arc<dyn RenderService>,
}

impl SlotHandle {
    #[inline]
    #[must_use]
    pub const fn id(&self) -> SlotId {
        self.id
    }

    /// Ask for the slot to be reloaded once it is eligible.
    pub fn refresh(&self) {
        self.scheduler.request_refresh(self.id);
    }

    /// Remove the slot and release it in the render service.
    ///
    /// Waits for a definition already in progress, so the release covers the
    /// handle it produced.
    pub fn destroy(&self) {
        let removed = {
            let _definition = self.registry.definition_guard();
            self.registry.remove(self.id)
        };
        let Some(record) = removed else {
            debug!("{}: already destroyed", self.id);
            return;
        };
        if let Some(handle) = record.render_handle {
            if let Err(err) = self.render.destroy_slots(&[handle]) {
                warn!("{}: failed to destroy {handle:?}: {err:#}", self.id);
            }
        }
        debug!("{}: destroyed", self.id);
    }

    /// True while the slot is registered.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.registry.contains(self.id)
    }

    /// Whether the slot is waiting to be batched; `None` once destroyed.
    #[must_use]
    pub fn is_pending(&self) -> Option<bool> {
        self.registry.get(self.id).map(|record| record.pending_refresh)
    }

    pub fn on_load<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let callback: SlotCallback = Arc::new(callback);
        self.registry
            .update_callbacks(self.id, |callbacks| callbacks.on_load = Some(callback));
    }

    pub fn on_empty<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let callback: SlotCallback = Arc::new(callback);
        self.registry
            .update_callbacks(self.id, |callbacks| callbacks.on_empty = Some(callback));
    }

    pub fn on_refresh_start<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let callback: SlotCallback = Arc::new(callback);
        self.registry
            .update_callbacks(self.id, |callbacks| callbacks.on_refresh_start = Some(callback));
    }
}

//! Facade wiring the registry, scheduler, auction and render event bridge together.

use log::{debug, info, trace, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::auction::{AuctionCoordinator, BidProvider};
use crate::bridge::RenderEventBridge;
use crate::config::SlotHandlerConfig;
use crate::error::ConfigError;
use crate::events::PageEvent;
use crate::registration::{Registrar, SlotConfig, SlotHandle};
use crate::registry::SlotRegistry;
use crate::render::RenderService;
use crate::scheduler::RefreshScheduler;
use crate::targeting::PageTargeting;
use crate::visibility::{Viewport, VisibilityOracle};

/// External services the manager drives.
pub struct Collaborators {
    pub render: Arc<dyn RenderService>,
    pub viewport: Arc<dyn Viewport>,
    /// Bidding providers, consulted in this order. Unavailable ones are skipped.
    pub providers: Vec<Arc<dyn BidProvider>>,
}

/// Owns every slot on one page for the lifetime of the page.
pub struct AdSlotManager {
    config: SlotHandlerConfig,
    registry: Arc<SlotRegistry>,
    scheduler: Arc<RefreshScheduler>,
    registrar: Registrar,
    render: Arc<dyn RenderService>,
    oracle: VisibilityOracle,
    ads_disabled: AtomicBool,
    tasks: Vec<JoinHandle<()>>,
}

impl AdSlotManager {
    /// Build the manager and start its background tasks on `runtime`.
    ///
    /// This subscribes to the render service's completion events; it must be
    /// the only subscriber created for the page.
    #[must_use]
    pub fn new(runtime: &Handle, config: SlotHandlerConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            render,
            viewport,
            providers,
        } = collaborators;
        let registry = Arc::new(SlotRegistry::new());
        let oracle = VisibilityOracle::new(viewport);
        let coordinator = Arc::new(AuctionCoordinator::new(
            Arc::clone(&registry),
            Arc::clone(&render),
            providers,
            config.bid_timeout(),
        ));
        let scheduler = Arc::new(RefreshScheduler::new(
            config.debounce(),
            Arc::clone(&registry),
            oracle.clone(),
            coordinator,
            runtime.clone(),
        ));
        let registrar = Registrar::new(
            Arc::clone(&registry),
            Arc::clone(&scheduler),
            Arc::clone(&render),
            runtime.clone(),
        );

        let bridge = RenderEventBridge::new(Arc::clone(&registry));
        let tasks = vec![
            runtime.spawn(Arc::clone(&scheduler).run()),
            bridge.spawn(runtime, render.subscribe_render_ended()),
        ];
        info!(
            "slot handler started (debounce={:?}, bid timeout={:?})",
            config.debounce(),
            config.bid_timeout()
        );

        Self {
            config,
            registry,
            scheduler,
            registrar,
            render,
            oracle,
            ads_disabled: AtomicBool::new(false),
            tasks,
        }
    }

    /// Configure the render service for the page and apply page targeting.
    ///
    /// Failures are logged; the page keeps working with the service defaults.
    /// When the targeting reports ads as switched off, nothing is sent to the
    /// render service and the manager ignores every later registration and
    /// page event.
    ///
    /// # Arguments
    ///
    /// * `targeting` - Page targeting built from the page's sources and address.
    pub async fn init_page(&self, targeting: &PageTargeting) {
        if targeting.ads_disabled() {
            info!("ads switched off for this page");
            self.ads_disabled.store(true, Ordering::Release);
            return;
        }
        self.render.ready().await;
        if let Err(err) = self.render.enable_services(self.config.page_settings()) {
            warn!("failed to enable render services: {err:#}");
        }
        if let Err(err) = targeting.apply(self.render.as_ref()) {
            warn!("failed to apply page targeting: {err:#}");
        }
    }

    /// Register a placement.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::AdsDisabled`] once ads were switched off for the
    /// page, or the validation error of an unusable configuration.
    pub fn register(&self, config: SlotConfig) -> Result<SlotHandle, ConfigError> {
        if self.ads_disabled() {
            debug!("ads disabled, not registering {}", config.ad_unit_path);
            return Err(ConfigError::AdsDisabled);
        }
        self.registrar.register(config)
    }

    /// Signal that layout may have changed. Bursts collapse into one scan.
    pub fn handle_page_event(&self, event: PageEvent) {
        if self.ads_disabled() {
            return;
        }
        trace!("page event: {}", event.dom_name());
        self.scheduler.trigger();
    }

    /// Whether ads were switched off by [`Self::init_page`].
    #[must_use]
    pub fn ads_disabled(&self) -> bool {
        self.ads_disabled.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.registry.len()
    }

    #[must_use]
    pub fn registry(&self) -> &SlotRegistry {
        &self.registry
    }

    #[must_use]
    pub fn scheduler(&self) -> &RefreshScheduler {
        &self.scheduler
    }

    #[must_use]
    pub fn viewport(&self) -> &dyn Viewport {
        self.oracle.viewport()
    }
}

impl Drop for AdSlotManager {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

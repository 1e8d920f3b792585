//! In-process stand-ins for the page, the render service and the bidders.

use anyhow::{Result, anyhow};
use core::time::Duration;
use log::info;
use serde_json::json;
use slot_handler::auction::{ApsClient, ApsRequest, BidCallback, OpenXClient};
use slot_handler::{
    AdSize, LayoutElement, PageSettings, Rect, RefreshOptions, RenderEnded, RenderHandle,
    RenderService, ServiceFuture, SizeMapping, Viewport,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time;

const RENDER_LATENCY: Duration = Duration::from_millis(80);

/// Vertical scroll offset of the simulated document.
#[derive(Clone, Default)]
pub struct Scroll(Arc<AtomicU64>);

impl Scroll {
    pub fn set(&self, offset: u32) {
        self.0.store(u64::from(offset), Ordering::Relaxed);
    }

    fn offset(&self) -> f64 {
        self.0.load(Ordering::Relaxed) as f64
    }
}

pub struct PageViewport {
    pub width: f64,
    pub height: f64,
}

impl Viewport for PageViewport {
    fn size(&self) -> (f64, f64) {
        (self.width, self.height)
    }
}

/// A block laid out at a fixed document position.
pub struct PageBlock {
    top: f64,
    width: f64,
    height: f64,
    scroll: Scroll,
}

impl PageBlock {
    pub fn new(top: f64, (width, height): (f64, f64), scroll: &Scroll) -> Arc<Self> {
        Arc::new(Self {
            top,
            width,
            height,
            scroll: scroll.clone(),
        })
    }
}

impl LayoutElement for PageBlock {
    fn bounding_client_rect(&self) -> Rect {
        Rect::new(0.0, self.top - self.scroll.offset(), self.width, self.height)
    }
}

/// Render service that logs commands and completes every refresh shortly after.
///
/// Every third slot comes back empty.
#[derive(Default)]
pub struct SimulatedRender {
    next_handle: AtomicU64,
    events: Mutex<Option<UnboundedSender<RenderEnded>>>,
}

impl SimulatedRender {
    fn mint(&self) -> RenderHandle {
        RenderHandle(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    fn sender(&self) -> Result<UnboundedSender<RenderEnded>> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| anyhow!("nobody subscribed to render events"))
    }
}

impl RenderService for SimulatedRender {
    fn ready(&self) -> ServiceFuture<'_, ()> {
        Box::pin(time::sleep(Duration::from_millis(30)))
    }

    fn define_slot(&self, ad_unit_path: &str, sizes: &[AdSize], container_id: &str) -> Result<RenderHandle> {
        let handle = self.mint();
        info!("render: define {ad_unit_path} in #{container_id} {sizes:?} -> {handle:?}");
        Ok(handle)
    }

    fn define_out_of_page_slot(&self, ad_unit_path: &str, container_id: &str) -> Result<RenderHandle> {
        let handle = self.mint();
        info!("render: define out-of-page {ad_unit_path} in #{container_id} -> {handle:?}");
        Ok(handle)
    }

    fn define_size_mapping(&self, handle: RenderHandle, mapping: &SizeMapping) -> Result<()> {
        if !mapping.is_empty() {
            info!("render: {handle:?} size mapping with {} breakpoint(s)", mapping.entries().len());
        }
        Ok(())
    }

    fn add_service(&self, _handle: RenderHandle) -> Result<()> {
        Ok(())
    }

    fn set_collapse_empty_div(&self, handle: RenderHandle, collapse: bool) -> Result<()> {
        info!("render: {handle:?} collapse empty = {collapse}");
        Ok(())
    }

    fn display(&self, container_id: &str) -> Result<()> {
        info!("render: display #{container_id}");
        Ok(())
    }

    fn refresh(&self, handles: &[RenderHandle], options: RefreshOptions) -> Result<()> {
        info!("render: refresh {handles:?} (change correlator: {})", options.change_correlator);
        let sender = self.sender()?;
        let handles = handles.to_vec();
        drop(tokio::spawn(async move {
            time::sleep(RENDER_LATENCY).await;
            for handle in handles {
                let is_empty = handle.0 % 3 == 0;
                if sender.send(RenderEnded { handle, is_empty }).is_err() {
                    return;
                }
            }
        }));
        Ok(())
    }

    fn destroy_slots(&self, handles: &[RenderHandle]) -> Result<()> {
        info!("render: destroy {handles:?}");
        Ok(())
    }

    fn set_page_targeting(&self, key: &str, values: &[String]) -> Result<()> {
        info!("render: page targeting {key}={values:?}");
        Ok(())
    }

    fn enable_services(&self, settings: PageSettings) -> Result<()> {
        info!("render: services enabled {settings:?}");
        Ok(())
    }

    fn subscribe_render_ended(&self) -> UnboundedReceiver<RenderEnded> {
        let (sender, receiver) = mpsc::unbounded_channel();
        *self.events.lock().unwrap_or_else(PoisonError::into_inner) = Some(sender);
        receiver
    }
}

/// First bidder, speaking the future-returning protocol.
pub struct SimulatedOpenX {
    pub latency: Duration,
}

impl OpenXClient for SimulatedOpenX {
    fn is_enabled(&self) -> bool {
        true
    }

    fn supports_fetch(&self) -> bool {
        true
    }

    fn get_bids(&self, ad_mappings: Vec<RenderHandle>) -> ServiceFuture<'_, Result<serde_json::Value>> {
        Box::pin(async move {
            time::sleep(self.latency).await;
            Ok(json!({ "slots": ad_mappings.len(), "cpm": 1.25 }))
        })
    }

    fn set_targeting_for_slot(&self, handle: RenderHandle, bids: &serde_json::Value) -> Result<()> {
        info!("openx: targeting {handle:?} with {bids}");
        Ok(())
    }

    fn refresh(&self, on_done: BidCallback) -> Result<()> {
        on_done();
        Ok(())
    }

    fn set_ox_targeting(&self, _handles: &[RenderHandle]) -> Result<()> {
        Ok(())
    }
}

/// Second bidder, answering through a completion callback.
pub struct SimulatedAps {
    pub latency: Duration,
}

impl ApsClient for SimulatedAps {
    fn is_enabled(&self) -> bool {
        true
    }

    fn fetch_bids(&self, request: ApsRequest, on_done: BidCallback) -> Result<()> {
        info!("aps: bid request {}", serde_json::to_string(&request)?);
        let latency = self.latency;
        drop(tokio::spawn(async move {
            time::sleep(latency).await;
            on_done();
        }));
        Ok(())
    }

    fn set_display_bids(&self) -> Result<()> {
        info!("aps: display bids applied");
        Ok(())
    }
}

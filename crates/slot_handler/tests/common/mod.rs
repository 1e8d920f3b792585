#![allow(dead_code, reason = "each test binary uses a different subset of the fakes")]
use anyhow::{Result, anyhow};
use core::time::Duration;
use futures::future;
use log::debug;
use serde_json::json;
use slot_handler::auction::{
    ApsClient, ApsProvider, ApsRequest, BidCallback, OpenXClient, select_openx,
};
use slot_handler::{
    AdSize, AdSlotManager, BidProvider, Collaborators, LayoutElement, PageSettings, Rect,
    RefreshOptions, RenderEnded, RenderHandle, RenderService, ServiceFuture, SizeMapping,
    SlotConfig, SlotHandlerConfig, SlotId, Viewport,
};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tokio::time::{self, Instant};

pub const VIEWPORT: (f64, f64) = (1024.0, 768.0);

/// Initialize logging for visibility during test runs.
pub fn init_logging() {
    if let Err(err) = env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init()
    {
        debug!("logger already installed: {err}");
    }
}

/// Let background tasks run for `millis` of (paused) time.
pub async fn settle(millis: u64) {
    time::sleep(Duration::from_millis(millis)).await;
}

/// Every externally observable command, in the order it was issued.
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    DefineSlot { path: String, container: String },
    DefineOutOfPageSlot { path: String, container: String },
    DefineSizeMapping(RenderHandle),
    AddService(RenderHandle),
    SetCollapseEmptyDiv(RenderHandle),
    Display(String),
    Refresh { handles: Vec<RenderHandle>, change_correlator: bool },
    Destroy(Vec<RenderHandle>),
    PageTargeting { key: String, values: Vec<String> },
    EnableServices(PageSettings),
    OpenXFetch(Vec<RenderHandle>),
    OpenXLegacyRefresh,
    OpenXSlotTargeting(RenderHandle),
    OpenXBatchTargeting(Vec<RenderHandle>),
    ApsFetch(ApsRequest),
    ApsDisplayBids,
}

#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<(Instant, Call)>>>);

impl CallLog {
    pub fn push(&self, call: Call) {
        if let Ok(mut calls) = self.0.lock() {
            calls.push((Instant::now(), call));
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.timed().into_iter().map(|(_, call)| call).collect()
    }

    pub fn timed(&self) -> Vec<(Instant, Call)> {
        self.0.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    pub fn count<F: Fn(&Call) -> bool>(&self, matches: F) -> usize {
        self.calls().iter().filter(|call| matches(call)).count()
    }

    pub fn position<F: Fn(&Call) -> bool>(&self, matches: F) -> Option<usize> {
        self.calls().iter().position(matches)
    }

    pub fn refreshes(&self) -> Vec<Vec<RenderHandle>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Refresh { handles, .. } => Some(handles),
                _ => None,
            })
            .collect()
    }

    pub fn refresh_times(&self) -> Vec<Instant> {
        self.timed()
            .into_iter()
            .filter(|(_, call)| matches!(call, Call::Refresh { .. }))
            .map(|(at, _)| at)
            .collect()
    }
}

/// Render service double that records every command.
pub struct FakeRenderService {
    log: CallLog,
    next_handle: AtomicU64,
    ready: watch::Sender<bool>,
    events: Mutex<Option<UnboundedSender<RenderEnded>>>,
    subscriptions: AtomicUsize,
    fail_define: AtomicBool,
    fail_display: AtomicBool,
    fail_refresh: AtomicBool,
    define_delay_ms: AtomicU64,
}

impl FakeRenderService {
    pub fn new(log: CallLog) -> Self {
        let (ready, _) = watch::channel(true);
        Self {
            log,
            next_handle: AtomicU64::new(100),
            ready,
            events: Mutex::new(None),
            subscriptions: AtomicUsize::new(0),
            fail_define: AtomicBool::new(false),
            fail_display: AtomicBool::new(false),
            fail_refresh: AtomicBool::new(false),
            define_delay_ms: AtomicU64::new(0),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.send_replace(ready);
    }

    pub fn fail_defines(&self) {
        self.fail_define.store(true, Ordering::SeqCst);
    }

    pub fn fail_displays(&self) {
        self.fail_display.store(true, Ordering::SeqCst);
    }

    /// Reject refresh commands until switched back.
    pub fn fail_refreshes(&self, fail: bool) {
        self.fail_refresh.store(fail, Ordering::SeqCst);
    }

    /// Block the calling thread inside every in-page define for `delay`.
    pub fn delay_defines(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.define_delay_ms.store(millis, Ordering::SeqCst);
    }

    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    pub fn emit(&self, handle: RenderHandle, is_empty: bool) {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        let delivered = events
            .as_ref()
            .is_some_and(|sender| sender.send(RenderEnded { handle, is_empty }).is_ok());
        if !delivered {
            debug!("render event for {handle:?} had no subscriber");
        }
    }

    fn mint(&self) -> RenderHandle {
        RenderHandle(self.next_handle.fetch_add(1, Ordering::SeqCst))
    }
}

impl RenderService for FakeRenderService {
    fn ready(&self) -> ServiceFuture<'_, ()> {
        let mut ready = self.ready.subscribe();
        Box::pin(async move {
            while !*ready.borrow_and_update() {
                if ready.changed().await.is_err() {
                    return;
                }
            }
        })
    }

    fn define_slot(&self, ad_unit_path: &str, _sizes: &[AdSize], container_id: &str) -> Result<RenderHandle> {
        if self.fail_define.load(Ordering::SeqCst) {
            return Err(anyhow!("define rejected"));
        }
        self.log.push(Call::DefineSlot {
            path: ad_unit_path.to_owned(),
            container: container_id.to_owned(),
        });
        let delay = self.define_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            thread::sleep(Duration::from_millis(delay));
        }
        Ok(self.mint())
    }

    fn define_out_of_page_slot(&self, ad_unit_path: &str, container_id: &str) -> Result<RenderHandle> {
        if self.fail_define.load(Ordering::SeqCst) {
            return Err(anyhow!("define rejected"));
        }
        self.log.push(Call::DefineOutOfPageSlot {
            path: ad_unit_path.to_owned(),
            container: container_id.to_owned(),
        });
        Ok(self.mint())
    }

    fn define_size_mapping(&self, handle: RenderHandle, _mapping: &SizeMapping) -> Result<()> {
        self.log.push(Call::DefineSizeMapping(handle));
        Ok(())
    }

    fn add_service(&self, handle: RenderHandle) -> Result<()> {
        self.log.push(Call::AddService(handle));
        Ok(())
    }

    fn set_collapse_empty_div(&self, handle: RenderHandle, _collapse: bool) -> Result<()> {
        self.log.push(Call::SetCollapseEmptyDiv(handle));
        Ok(())
    }

    fn display(&self, container_id: &str) -> Result<()> {
        if self.fail_display.load(Ordering::SeqCst) {
            return Err(anyhow!("display rejected"));
        }
        self.log.push(Call::Display(container_id.to_owned()));
        Ok(())
    }

    fn refresh(&self, handles: &[RenderHandle], options: RefreshOptions) -> Result<()> {
        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(anyhow!("refresh rejected"));
        }
        self.log.push(Call::Refresh {
            handles: handles.to_vec(),
            change_correlator: options.change_correlator,
        });
        Ok(())
    }

    fn destroy_slots(&self, handles: &[RenderHandle]) -> Result<()> {
        self.log.push(Call::Destroy(handles.to_vec()));
        Ok(())
    }

    fn set_page_targeting(&self, key: &str, values: &[String]) -> Result<()> {
        self.log.push(Call::PageTargeting {
            key: key.to_owned(),
            values: values.to_vec(),
        });
        Ok(())
    }

    fn enable_services(&self, settings: PageSettings) -> Result<()> {
        self.log.push(Call::EnableServices(settings));
        Ok(())
    }

    fn subscribe_render_ended(&self) -> UnboundedReceiver<RenderEnded> {
        let (sender, receiver) = mpsc::unbounded_channel();
        if let Ok(mut events) = self.events.lock() {
            *events = Some(sender);
        }
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        receiver
    }
}

pub struct FixedViewport;

impl Viewport for FixedViewport {
    fn size(&self) -> (f64, f64) {
        VIEWPORT
    }
}

/// Element whose box can be moved by the test.
pub struct FakeElement {
    rect: Mutex<Rect>,
}

impl FakeElement {
    pub fn at(rect: Rect) -> Arc<Self> {
        Arc::new(Self {
            rect: Mutex::new(rect),
        })
    }

    pub fn visible() -> Arc<Self> {
        Self::at(Rect::new(0.0, 100.0, 300.0, 250.0))
    }

    pub fn below_fold() -> Arc<Self> {
        Self::at(Rect::new(0.0, 2000.0, 300.0, 250.0))
    }

    pub fn move_to(&self, rect: Rect) {
        if let Ok(mut current) = self.rect.lock() {
            *current = rect;
        }
    }
}

impl LayoutElement for FakeElement {
    fn bounding_client_rect(&self) -> Rect {
        self.rect.lock().map(|rect| *rect).unwrap_or_default()
    }
}

/// How a fake bidder behaves.
#[derive(Clone, Copy, Debug)]
pub enum BidBehaviour {
    /// Answer after the delay.
    AnswerAfter(Duration),
    /// Never answer.
    Silent,
    /// Fail immediately.
    Fail,
}

pub struct FakeOpenX {
    log: CallLog,
    enabled: bool,
    fetch: bool,
    behaviour: BidBehaviour,
    pub legacy_refreshes: AtomicUsize,
}

impl FakeOpenX {
    pub fn new(log: CallLog, enabled: bool, fetch: bool, behaviour: BidBehaviour) -> Arc<Self> {
        Arc::new(Self {
            log,
            enabled,
            fetch,
            behaviour,
            legacy_refreshes: AtomicUsize::new(0),
        })
    }
}

impl OpenXClient for FakeOpenX {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn supports_fetch(&self) -> bool {
        self.fetch
    }

    fn get_bids(&self, ad_mappings: Vec<RenderHandle>) -> ServiceFuture<'_, Result<serde_json::Value>> {
        self.log.push(Call::OpenXFetch(ad_mappings.clone()));
        let behaviour = self.behaviour;
        Box::pin(async move {
            match behaviour {
                BidBehaviour::AnswerAfter(delay) => {
                    time::sleep(delay).await;
                    Ok(json!({ "bids": ad_mappings.len() }))
                }
                BidBehaviour::Silent => {
                    future::pending::<()>().await;
                    Err(anyhow!("unreachable"))
                }
                BidBehaviour::Fail => Err(anyhow!("openx exploded")),
            }
        })
    }

    fn set_targeting_for_slot(&self, handle: RenderHandle, _bids: &serde_json::Value) -> Result<()> {
        self.log.push(Call::OpenXSlotTargeting(handle));
        Ok(())
    }

    fn refresh(&self, on_done: BidCallback) -> Result<()> {
        self.log.push(Call::OpenXLegacyRefresh);
        self.legacy_refreshes.fetch_add(1, Ordering::SeqCst);
        complete_later(self.behaviour, on_done)
    }

    fn set_ox_targeting(&self, handles: &[RenderHandle]) -> Result<()> {
        self.log.push(Call::OpenXBatchTargeting(handles.to_vec()));
        Ok(())
    }
}

pub struct FakeAps {
    log: CallLog,
    enabled: bool,
    behaviour: BidBehaviour,
}

impl FakeAps {
    pub fn new(log: CallLog, enabled: bool, behaviour: BidBehaviour) -> Arc<Self> {
        Arc::new(Self {
            log,
            enabled,
            behaviour,
        })
    }
}

impl ApsClient for FakeAps {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn fetch_bids(&self, request: ApsRequest, on_done: BidCallback) -> Result<()> {
        self.log.push(Call::ApsFetch(request));
        complete_later(self.behaviour, on_done)
    }

    fn set_display_bids(&self) -> Result<()> {
        self.log.push(Call::ApsDisplayBids);
        Ok(())
    }
}

fn complete_later(behaviour: BidBehaviour, on_done: BidCallback) -> Result<()> {
    match behaviour {
        BidBehaviour::AnswerAfter(delay) => {
            drop(tokio::spawn(async move {
                time::sleep(delay).await;
                on_done();
            }));
            Ok(())
        }
        BidBehaviour::Silent => {
            // Keep the callback alive forever without calling it.
            core::mem::forget(on_done);
            Ok(())
        }
        BidBehaviour::Fail => Err(anyhow!("bidder exploded")),
    }
}

/// A manager wired to fakes.
pub struct TestPage {
    pub manager: AdSlotManager,
    pub render: Arc<FakeRenderService>,
    pub log: CallLog,
}

impl TestPage {
    pub fn new() -> Self {
        Self::with_providers(|_| Vec::new())
    }

    pub fn with_providers<F>(providers: F) -> Self
    where
        F: FnOnce(&CallLog) -> Vec<Arc<dyn BidProvider>>,
    {
        init_logging();
        let log = CallLog::default();
        let render = Arc::new(FakeRenderService::new(log.clone()));
        let manager = AdSlotManager::new(
            &Handle::current(),
            SlotHandlerConfig::default(),
            Collaborators {
                render: Arc::<FakeRenderService>::clone(&render),
                viewport: Arc::new(FixedViewport),
                providers: providers(&log),
            },
        );
        Self { manager, render, log }
    }

    pub fn render_handle(&self, id: SlotId) -> Option<RenderHandle> {
        let record = self.manager.registry().get(id)?;
        record.render_handle
    }
}

/// Standard bidder pair: openx first, aps second.
pub fn bidders(
    log: &CallLog,
    openx: Option<(bool, BidBehaviour)>,
    aps: Option<BidBehaviour>,
) -> Vec<Arc<dyn BidProvider>> {
    let openx = match openx {
        Some((fetch, behaviour)) => FakeOpenX::new(log.clone(), true, fetch, behaviour),
        None => FakeOpenX::new(log.clone(), false, true, BidBehaviour::Fail),
    };
    let mut providers = vec![select_openx(openx)];
    if let Some(behaviour) = aps {
        providers.push(Arc::new(ApsProvider::new(
            FakeAps::new(log.clone(), true, behaviour),
            20,
        )));
    }
    providers
}

pub fn slot(container: &str, element: Arc<FakeElement>) -> SlotConfig {
    SlotConfig::new("/1234/home/top", container, element)
        .with_sizes(vec![AdSize::Fixed { width: 300, height: 250 }])
}

//! Debounced refresh scheduling.
//!
//! Page events and explicit refresh requests all arm the same debounce timer.
//! Once the page has been quiet for the configured window, one scan moves every
//! pending slot that is eligible right now into a batch and hands the batch to
//! the auction coordinator. Slots that are not eligible stay pending for the
//! next scan.

use core::time::Duration;
use log::{debug, trace};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::time::{self, Instant};
use tracing::info_span;

use crate::auction::AuctionCoordinator;
use crate::registry::{SlotId, SlotRecord, SlotRegistry};
use crate::visibility::VisibilityOracle;

/// Phase of the debounce timer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DebounceState {
    /// No trigger since the last scan.
    Idle,
    /// A scan will fire at `deadline` unless another trigger pushes it back.
    Armed { deadline: Instant },
    /// A scan is running; `rearm` records triggers that arrived meanwhile.
    Firing { rearm: bool },
}

/// Trailing-edge debounce state machine: Idle -> Armed -> Firing -> Idle.
#[derive(Debug)]
pub struct Debouncer {
    /// Quiet period required before a scan fires.
    window: Duration,
    state: DebounceState,
    /// Number of scans fired since creation.
    fired: u64,
}

impl Debouncer {
    #[inline]
    #[must_use]
    pub const fn new(window: Duration) -> Self {
        Self {
            window,
            state: DebounceState::Idle,
            fired: 0,
        }
    }

    #[inline]
    #[must_use]
    pub const fn state(&self) -> DebounceState {
        self.state
    }

    /// Register a trigger. Pushes the deadline back while armed; during a scan
    /// it only remembers that another scan is owed.
    pub fn trigger(&mut self, now: Instant) {
        self.state = match self.state {
            DebounceState::Idle | DebounceState::Armed { .. } => DebounceState::Armed {
                deadline: now + self.window,
            },
            DebounceState::Firing { .. } => DebounceState::Firing { rearm: true },
        };
    }

    /// When the next scan is due, if one is armed.
    #[inline]
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        match self.state {
            DebounceState::Armed { deadline } => Some(deadline),
            DebounceState::Idle | DebounceState::Firing { .. } => None,
        }
    }

    /// Enter `Firing` if armed and the deadline has passed.
    #[must_use]
    pub fn try_fire(&mut self, now: Instant) -> bool {
        match self.state {
            DebounceState::Armed { deadline } if now >= deadline => {
                self.state = DebounceState::Firing { rearm: false };
                self.fired = self.fired.saturating_add(1);
                true
            }
            _ => false,
        }
    }

    /// Leave `Firing`, re-arming if a trigger arrived during the scan.
    pub fn finish(&mut self, now: Instant) {
        self.state = match self.state {
            DebounceState::Firing { rearm: true } => DebounceState::Armed {
                deadline: now + self.window,
            },
            DebounceState::Firing { rearm: false } => DebounceState::Idle,
            other => other,
        };
    }

    /// Number of scans fired since creation.
    #[inline]
    #[must_use]
    pub const fn fired(&self) -> u64 {
        self.fired
    }
}

/// Coalesces refresh triggers into debounced scans of the registry.
pub struct RefreshScheduler {
    debouncer: Mutex<Debouncer>,
    wake: Notify,
    registry: Arc<SlotRegistry>,
    oracle: VisibilityOracle,
    coordinator: Arc<AuctionCoordinator>,
    runtime: Handle,
}

impl RefreshScheduler {
    #[must_use]
    pub fn new(
        window: Duration,
        registry: Arc<SlotRegistry>,
        oracle: VisibilityOracle,
        coordinator: Arc<AuctionCoordinator>,
        runtime: Handle,
    ) -> Self {
        Self {
            debouncer: Mutex::new(Debouncer::new(window)),
            wake: Notify::new(),
            registry,
            oracle,
            coordinator,
            runtime,
        }
    }

    fn debouncer(&self) -> MutexGuard<'_, Debouncer> {
        self.debouncer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Arm (or push back) the next scan.
    pub fn trigger(&self) {
        self.debouncer().trigger(Instant::now());
        self.wake.notify_one();
    }

    /// Flag a slot for refresh and schedule a scan. Unknown ids are ignored.
    pub fn request_refresh(&self, id: SlotId) {
        if self.registry.mark_pending(id) {
            self.trigger();
        } else {
            debug!("refresh requested for unknown {id}, ignoring");
        }
    }

    /// Number of scans fired so far.
    #[must_use]
    pub fn scan_count(&self) -> u64 {
        self.debouncer().fired()
    }

    /// Drive the debounce timer forever.
    pub async fn run(self: Arc<Self>) {
        loop {
            let deadline = self.debouncer().deadline();
            match deadline {
                Some(deadline) => {
                    tokio::select! {
                        () = time::sleep_until(deadline) => {}
                        () = self.wake.notified() => continue,
                    }
                }
                None => {
                    self.wake.notified().await;
                    continue;
                }
            }
            let fire = self.debouncer().try_fire(Instant::now());
            if fire {
                self.scan_and_dispatch();
                self.debouncer().finish(Instant::now());
            }
        }
    }

    fn is_eligible(&self, record: &SlotRecord) -> bool {
        record.out_of_page
            || record.immediate
            || self
                .oracle
                .is_eligible(record.source_element.as_ref(), record.preload_margin)
    }

    /// Batch every pending slot that is eligible now and start its auction.
    ///
    /// Returns the ids of the batched slots; an idle scan returns nothing and
    /// does not reach the coordinator.
    pub fn scan_and_dispatch(&self) -> Vec<SlotId> {
        let span = info_span!("refresh_scan");
        let _entered = span.enter();

        let batch = self.registry.take_eligible(|record| self.is_eligible(record));
        if batch.is_empty() {
            trace!("refresh scan: no eligible slots");
            return Vec::new();
        }

        for record in &batch {
            if let Some(on_refresh_start) = &record.callbacks.on_refresh_start {
                on_refresh_start();
            }
        }

        let ids: Vec<SlotId> = batch.iter().map(|record| record.id).collect();
        debug!("refresh scan: batching {} slot(s)", ids.len());
        let coordinator = Arc::clone(&self.coordinator);
        drop(self.runtime.spawn(async move {
            coordinator.run_auction(batch).await;
        }));
        ids
    }
}

//! Header bidding auction run in front of every batch refresh.
//!
//! For one batch the coordinator asks every available bidding provider for bids
//! concurrently, bounds each provider by the same fixed timeout, waits until all
//! of them have settled, applies the targeting of the providers that answered,
//! and only then issues a single refresh for the whole batch. A provider that is
//! missing, slow or failing degrades to "no bid" for that provider; it never
//! blocks or aborts the refresh.

mod aps;
mod openx;

pub use aps::{ApsClient, ApsProvider, ApsRequest, ApsSlot};
pub use openx::{OpenXCallbackProvider, OpenXClient, OpenXFetchProvider, select_openx};

use anyhow::{Result, anyhow};
use core::time::Duration;
use futures::future::join_all;
use log::{debug, info, trace, warn};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time;
use tracing::{Instrument as _, info_span};

use crate::error::BidError;
use crate::registry::{SlotId, SlotRecord, SlotRegistry};
use crate::render::{RefreshOptions, RenderHandle, RenderService, ServiceFuture};
use crate::sizes::AdSize;

/// Completion callback handed to callback-style bidding clients.
pub type BidCallback = Box<dyn FnOnce() + Send>;

/// The view of a batched slot that bidding providers get to see.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BidSlot {
    pub slot_id: SlotId,
    pub handle: RenderHandle,
    pub container_id: String,
    pub ad_unit_path: String,
    pub sizes: Vec<AdSize>,
    pub openx_ignore: bool,
}

impl BidSlot {
    /// Slots the render service has not defined cannot take part in an auction.
    #[must_use]
    pub fn from_record(record: &SlotRecord) -> Option<Self> {
        let handle = record.render_handle?;
        Some(Self {
            slot_id: record.id,
            handle,
            container_id: record.container_id.clone(),
            ad_unit_path: record.ad_unit_path.clone(),
            sizes: record.sizes.clone(),
            openx_ignore: record.openx_ignore,
        })
    }
}

/// What a provider produced once its fetch settled.
#[derive(Clone, Debug, PartialEq)]
pub enum Bids {
    /// Bids handed back to the caller, to be passed on when targeting.
    Returned(serde_json::Value),
    /// Bids kept inside the provider's client library.
    Held,
}

/// A header bidding provider, as seen by the coordinator.
pub trait BidProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the provider's client is present and enabled on this page.
    fn is_available(&self) -> bool;

    /// The subset of the batch this provider bids on.
    fn candidates(&self, batch: &[BidSlot]) -> Vec<BidSlot>;

    /// Request bids for `slots`. The coordinator bounds the returned future by
    /// `timeout` and drops it when the bound elapses.
    fn fetch_bids<'future>(&'future self, slots: &'future [BidSlot], timeout: Duration) -> ServiceFuture<'future, Result<Bids>>;

    /// Push the provider's targeting onto the render service's slots.
    ///
    /// # Errors
    ///
    /// Returns the client's error; the coordinator treats it as "no bid".
    fn apply_targeting(&self, slots: &[BidSlot], bids: &Bids) -> Result<()>;
}

/// Turn a callback-style client call into a future resolving on completion.
///
/// Completions arriving after the future was dropped are ignored.
pub(crate) async fn await_callback<F>(provider: &'static str, start: F) -> Result<Bids>
where
    F: FnOnce(BidCallback) -> Result<()>,
{
    let (done_tx, done_rx) = oneshot::channel::<()>();
    start(Box::new(move || {
        if done_tx.send(()).is_err() {
            trace!("{provider}: completion arrived after the auction moved on");
        }
    }))?;
    done_rx
        .await
        .map_err(|_| anyhow!("{provider} dropped its completion callback"))?;
    Ok(Bids::Held)
}

/// How one provider fared in one auction.
#[derive(Debug)]
pub enum ProviderOutcome {
    /// Client missing or disabled.
    Skipped,
    /// Nothing in the batch was eligible for this provider.
    NoCandidates,
    /// Targeting applied for this many slots.
    Applied(usize),
    /// The provider contributed no targeting.
    NoBid(BidError),
}

/// Summary of one auction.
#[derive(Debug, Default)]
pub struct AuctionReport {
    /// Slots included in the refresh command, in batch order.
    pub refreshed: Vec<SlotId>,
    pub outcomes: Vec<(&'static str, ProviderOutcome)>,
}

impl AuctionReport {
    #[must_use]
    pub fn outcome(&self, provider: &str) -> Option<&ProviderOutcome> {
        self.outcomes
            .iter()
            .find(|(name, _)| *name == provider)
            .map(|(_, outcome)| outcome)
    }
}

enum Round {
    Skipped,
    NoCandidates,
    Settled {
        candidates: Vec<BidSlot>,
        result: Result<Bids, BidError>,
    },
}

/// Runs the header bidding auction for refresh batches.
pub struct AuctionCoordinator {
    registry: Arc<SlotRegistry>,
    render: Arc<dyn RenderService>,
    providers: Vec<Arc<dyn BidProvider>>,
    timeout: Duration,
}

impl AuctionCoordinator {
    #[must_use]
    pub fn new(
        registry: Arc<SlotRegistry>,
        render: Arc<dyn RenderService>,
        providers: Vec<Arc<dyn BidProvider>>,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            render,
            providers,
            timeout,
        }
    }

    /// Run the auction for `batch` and refresh it.
    ///
    /// Targeting from every provider that answered in time is applied before
    /// the refresh command is issued. The refresh covers every slot of the
    /// batch that is still registered, whether or not it was bid on.
    pub async fn run_auction(&self, batch: Vec<SlotRecord>) -> AuctionReport {
        let span = info_span!("auction", slots = batch.len());
        self.run_auction_inner(batch).instrument(span).await
    }

    async fn run_auction_inner(&self, batch: Vec<SlotRecord>) -> AuctionReport {
        self.render.ready().await;

        let slots: Vec<BidSlot> = batch.iter().filter_map(BidSlot::from_record).collect();
        let rounds = join_all(
            self.providers
                .iter()
                .map(|provider| self.bid_round(provider.as_ref(), &slots)),
        )
        .await;

        let mut report = AuctionReport::default();
        for (provider, round) in self.providers.iter().zip(rounds) {
            let outcome = Self::settle(provider.as_ref(), round);
            report.outcomes.push((provider.name(), outcome));
        }

        let live: Vec<&BidSlot> = slots
            .iter()
            .filter(|slot| self.registry.contains(slot.slot_id))
            .collect();
        if live.is_empty() {
            debug!("auction: every slot of the batch was destroyed, nothing to refresh");
            return report;
        }
        let handles: Vec<RenderHandle> = live.iter().map(|slot| slot.handle).collect();
        match self.render.refresh(
            &handles,
            RefreshOptions {
                change_correlator: false,
            },
        ) {
            Ok(()) => {
                info!("auction: refreshed {} slot(s)", handles.len());
                report.refreshed = live.iter().map(|slot| slot.slot_id).collect();
            }
            Err(err) => warn!("auction: refresh of {} slot(s) failed: {err:#}", handles.len()),
        }
        report
    }

    async fn bid_round(&self, provider: &dyn BidProvider, batch: &[BidSlot]) -> Round {
        let name = provider.name();
        if !provider.is_available() {
            debug!("{name}: client unavailable, skipping");
            return Round::Skipped;
        }
        let candidates = provider.candidates(batch);
        if candidates.is_empty() {
            debug!("{name}: no eligible slots in batch");
            return Round::NoCandidates;
        }
        let result = match time::timeout(self.timeout, provider.fetch_bids(&candidates, self.timeout)).await {
            Ok(Ok(bids)) => Ok(bids),
            Ok(Err(cause)) => Err(BidError::Fault {
                provider: name,
                cause,
            }),
            Err(_) => Err(BidError::Timeout {
                provider: name,
                after: self.timeout,
            }),
        };
        Round::Settled { candidates, result }
    }

    fn settle(provider: &dyn BidProvider, round: Round) -> ProviderOutcome {
        match round {
            Round::Skipped => ProviderOutcome::Skipped,
            Round::NoCandidates => ProviderOutcome::NoCandidates,
            Round::Settled {
                result: Err(err), ..
            } => {
                warn!("auction: {err}");
                ProviderOutcome::NoBid(err)
            }
            Round::Settled {
                candidates,
                result: Ok(bids),
            } => match provider.apply_targeting(&candidates, &bids) {
                Ok(()) => ProviderOutcome::Applied(candidates.len()),
                Err(cause) => {
                    let err = BidError::Fault {
                        provider: provider.name(),
                        cause,
                    };
                    warn!("auction: targeting failed: {err}");
                    ProviderOutcome::NoBid(err)
                }
            },
        }
    }
}

//! First bidding provider, over either of its client protocols.

use anyhow::Result;
use core::time::Duration;
use log::info;
use std::sync::Arc;

use super::{BidCallback, BidProvider, BidSlot, Bids, await_callback};
use crate::render::{RenderHandle, ServiceFuture};

const NAME: &str = "openx";

/// Client library of the first bidding provider.
///
/// Newer client versions expose a future-returning bid fetch and per-slot
/// targeting; older ones only offer a callback-based refresh and a batch
/// targeting call.
#[expect(clippy::missing_errors_doc, reason = "commands fail only when the external client rejects them")]
pub trait OpenXClient: Send + Sync {
    fn is_enabled(&self) -> bool;

    /// Whether the client speaks the newer, future-returning protocol.
    fn supports_fetch(&self) -> bool;

    fn get_bids(&self, ad_mappings: Vec<RenderHandle>) -> ServiceFuture<'_, Result<serde_json::Value>>;

    fn set_targeting_for_slot(&self, handle: RenderHandle, bids: &serde_json::Value) -> Result<()>;

    /// Legacy bid refresh; `on_done` fires once bids are in.
    fn refresh(&self, on_done: BidCallback) -> Result<()>;

    /// Legacy targeting for every given slot at once.
    fn set_ox_targeting(&self, handles: &[RenderHandle]) -> Result<()>;
}

/// Pick the provider variant matching the client's protocol.
///
/// The choice is made once, when the page starts, and does not change between
/// auctions.
pub fn select_openx(client: Arc<dyn OpenXClient>) -> Arc<dyn BidProvider> {
    if client.supports_fetch() {
        info!("{NAME}: using future-returning bid fetch");
        Arc::new(OpenXFetchProvider::new(client))
    } else {
        info!("{NAME}: using legacy callback refresh");
        Arc::new(OpenXCallbackProvider::new(client))
    }
}

fn without_ignored(batch: &[BidSlot]) -> Vec<BidSlot> {
    batch.iter().filter(|slot| !slot.openx_ignore).cloned().collect()
}

/// Newer protocol: bids are returned and handed back per slot.
pub struct OpenXFetchProvider {
    client: Arc<dyn OpenXClient>,
}

impl OpenXFetchProvider {
    #[must_use]
    pub fn new(client: Arc<dyn OpenXClient>) -> Self {
        Self { client }
    }
}

impl BidProvider for OpenXFetchProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_available(&self) -> bool {
        self.client.is_enabled()
    }

    fn candidates(&self, batch: &[BidSlot]) -> Vec<BidSlot> {
        without_ignored(batch)
    }

    fn fetch_bids<'future>(&'future self, slots: &'future [BidSlot], _timeout: Duration) -> ServiceFuture<'future, Result<Bids>> {
        let ad_mappings: Vec<RenderHandle> = slots.iter().map(|slot| slot.handle).collect();
        Box::pin(async move {
            let bids = self.client.get_bids(ad_mappings).await?;
            Ok(Bids::Returned(bids))
        })
    }

    fn apply_targeting(&self, slots: &[BidSlot], bids: &Bids) -> Result<()> {
        let Bids::Returned(bids) = bids else {
            return Ok(());
        };
        for slot in slots {
            self.client.set_targeting_for_slot(slot.handle, bids)?;
        }
        Ok(())
    }
}

/// Legacy protocol: bids stay inside the client and a callback signals completion.
pub struct OpenXCallbackProvider {
    client: Arc<dyn OpenXClient>,
}

impl OpenXCallbackProvider {
    #[must_use]
    pub fn new(client: Arc<dyn OpenXClient>) -> Self {
        Self { client }
    }
}

impl BidProvider for OpenXCallbackProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_available(&self) -> bool {
        self.client.is_enabled()
    }

    fn candidates(&self, batch: &[BidSlot]) -> Vec<BidSlot> {
        without_ignored(batch)
    }

    fn fetch_bids<'future>(&'future self, _slots: &'future [BidSlot], _timeout: Duration) -> ServiceFuture<'future, Result<Bids>> {
        Box::pin(await_callback(NAME, move |done| self.client.refresh(done)))
    }

    fn apply_targeting(&self, slots: &[BidSlot], _bids: &Bids) -> Result<()> {
        let handles: Vec<RenderHandle> = slots.iter().map(|slot| slot.handle).collect();
        self.client.set_ox_targeting(&handles)
    }
}

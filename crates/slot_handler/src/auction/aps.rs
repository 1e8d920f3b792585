//! Second bidding provider, bidding only on sizes above a minimum.

use anyhow::Result;
use core::time::Duration;
use serde::Serialize;
use std::sync::Arc;

use super::{BidCallback, BidProvider, BidSlot, Bids, await_callback};
use crate::render::ServiceFuture;
use crate::sizes::AdSize;

const NAME: &str = "aps";

/// One slot in a bid request of the second provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApsSlot {
    #[serde(rename = "slotID")]
    pub slot_id: String,
    pub slot_name: String,
    pub sizes: Vec<[u32; 2]>,
}

/// Bid request of the second provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ApsRequest {
    pub slots: Vec<ApsSlot>,
    /// Client-side timeout in milliseconds.
    pub timeout: u64,
}

/// Client library of the second bidding provider.
#[expect(clippy::missing_errors_doc, reason = "commands fail only when the external client rejects them")]
pub trait ApsClient: Send + Sync {
    fn is_enabled(&self) -> bool;

    /// Start a bid fetch; `on_done` fires once bids are in.
    fn fetch_bids(&self, request: ApsRequest, on_done: BidCallback) -> Result<()>;

    /// Apply whatever bids the client holds to the render service.
    fn set_display_bids(&self) -> Result<()>;
}

/// Size-aware provider: only fixed sizes above a minimum are offered.
pub struct ApsProvider {
    client: Arc<dyn ApsClient>,
    min_dimension: u32,
}

impl ApsProvider {
    #[must_use]
    pub fn new(client: Arc<dyn ApsClient>, min_dimension: u32) -> Self {
        Self {
            client,
            min_dimension,
        }
    }
}

impl BidProvider for ApsProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_available(&self) -> bool {
        self.client.is_enabled()
    }

    fn candidates(&self, batch: &[BidSlot]) -> Vec<BidSlot> {
        batch
            .iter()
            .filter_map(|slot| {
                let sizes: Vec<AdSize> = slot
                    .sizes
                    .iter()
                    .copied()
                    .filter(|size| size.exceeds(self.min_dimension))
                    .collect();
                (!sizes.is_empty()).then(|| BidSlot {
                    sizes,
                    ..slot.clone()
                })
            })
            .collect()
    }

    fn fetch_bids<'future>(&'future self, slots: &'future [BidSlot], timeout: Duration) -> ServiceFuture<'future, Result<Bids>> {
        let request = ApsRequest {
            slots: slots
                .iter()
                .map(|slot| ApsSlot {
                    slot_id: slot.container_id.clone(),
                    slot_name: slot.ad_unit_path.clone(),
                    sizes: slot
                        .sizes
                        .iter()
                        .filter_map(|size| size.dimensions())
                        .map(|(width, height)| [width, height])
                        .collect(),
                })
                .collect(),
            timeout: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        };
        Box::pin(await_callback(NAME, move |done| self.client.fetch_bids(request, done)))
    }

    fn apply_targeting(&self, _slots: &[BidSlot], _bids: &Bids) -> Result<()> {
        self.client.set_display_bids()
    }
}

//! Ad slot handler for placements embedded in a web page.
//!
//! This crate owns the lifecycle of advertisement placements: it registers slots
//! with an external render service, decides when each slot is visible enough to
//! be requested, batches those requests through a debounced scheduler, runs a
//! header bidding auction across two independent providers, and only then asks
//! the render service to refresh the batch. Render completion events are fanned
//! back into per-slot callbacks.
//!
//! The DOM, the render service and the bidding client libraries are external
//! collaborators, expressed as traits so that hosts and tests can supply their own.

pub mod auction;
pub mod bridge;
pub mod config;
pub mod element;
pub mod error;
pub mod events;
pub mod manager;
pub mod registration;
pub mod registry;
pub mod render;
pub mod scheduler;
pub mod sizes;
pub mod targeting;
pub mod visibility;

pub use auction::{AuctionCoordinator, AuctionReport, BidProvider, BidSlot, Bids, ProviderOutcome};
pub use config::SlotHandlerConfig;
pub use element::{AdSlotElement, AttachOutcome, ElementEvent, ElementState, Registerable};
pub use error::{BidError, ConfigError};
pub use events::PageEvent;
pub use manager::{AdSlotManager, Collaborators};
pub use registration::{SlotConfig, SlotHandle};
pub use registry::{SlotCallback, SlotId, SlotRecord, SlotRegistry};
pub use render::{
    PageSettings, RefreshOptions, RenderEnded, RenderHandle, RenderService, ServiceFuture,
};
pub use sizes::{AdSize, SizeMapping, SizeMappingEntry};
pub use targeting::PageTargeting;
pub use visibility::{LayoutElement, Rect, Viewport, VisibilityOracle};

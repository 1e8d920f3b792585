//! Interface to the external ad render service.
//!
//! The render service owns the actual creatives: it defines slots, fetches and
//! draws them into container elements, and reports when a slot finished
//! rendering. Every command is synchronous once the service is ready; the only
//! suspension point is waiting for readiness.

use anyhow::Result;
use core::future::Future;
use core::pin::Pin;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::sizes::{AdSize, SizeMapping};

// Boxed future returned by collaborator traits so they stay object safe
pub type ServiceFuture<'future, T> = Pin<Box<dyn Future<Output = T> + Send + 'future>>;

/// The render service's opaque reference to a defined slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderHandle(pub u64);

/// Options for a refresh command.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RefreshOptions {
    /// Whether the service may start a new page-level correlation for this refresh.
    pub change_correlator: bool,
}

/// Page-wide settings applied once before any slot is displayed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PageSettings {
    pub single_request: bool,
    pub disable_initial_load: bool,
}

/// A slot finished rendering.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RenderEnded {
    pub handle: RenderHandle,
    /// True when no creative was returned for the slot.
    pub is_empty: bool,
}

/// Commands consumed from the render service.
///
/// Definition commands run while slot removal is held off, so implementations
/// must not call back into slot handles from them.
#[expect(clippy::missing_errors_doc, reason = "commands fail only when the external client rejects them")]
pub trait RenderService: Send + Sync {
    /// Resolves once the service accepts commands.
    fn ready(&self) -> ServiceFuture<'_, ()>;

    /// Define an in-flow slot drawn into `container_id`.
    fn define_slot(&self, ad_unit_path: &str, sizes: &[AdSize], container_id: &str) -> Result<RenderHandle>;

    /// Define an out-of-page slot (interstitials and the like).
    fn define_out_of_page_slot(&self, ad_unit_path: &str, container_id: &str) -> Result<RenderHandle>;

    fn define_size_mapping(&self, handle: RenderHandle, mapping: &SizeMapping) -> Result<()>;

    /// Attach the slot to the publisher ads service.
    fn add_service(&self, handle: RenderHandle) -> Result<()>;

    fn set_collapse_empty_div(&self, handle: RenderHandle, collapse: bool) -> Result<()>;

    fn display(&self, container_id: &str) -> Result<()>;

    /// Fetch and render the given slots in one request.
    fn refresh(&self, handles: &[RenderHandle], options: RefreshOptions) -> Result<()>;

    fn destroy_slots(&self, handles: &[RenderHandle]) -> Result<()>;

    /// Set a page-level key/values pair sent with every request.
    fn set_page_targeting(&self, key: &str, values: &[String]) -> Result<()>;

    fn enable_services(&self, settings: PageSettings) -> Result<()>;

    /// Subscribe to render completion events.
    fn subscribe_render_ended(&self) -> UnboundedReceiver<RenderEnded>;
}

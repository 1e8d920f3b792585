//! Configuration settings for the slot handler.
//!
//! This module defines the debounce window for the refresh scheduler, the bid
//! timeout applied to every header bidding provider, and the page-level render
//! service settings. Configuration can be loaded from environment variables
//! or constructed programmatically.

use core::time::Duration;
use std::env;

use crate::render::PageSettings;

const DEFAULT_DEBOUNCE_MS: u64 = 50;
const DEFAULT_BID_TIMEOUT_MS: u64 = 1500;
const DEFAULT_MIN_BID_DIMENSION: u32 = 20;

/// Runtime configuration for the slot handler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotHandlerConfig {
    /// Quiescence window in milliseconds before a refresh scan fires
    pub debounce_ms: u64,
    /// Upper bound in milliseconds for each bidding provider
    pub bid_timeout_ms: u64,
    /// Sizes must exceed this in both dimensions to be offered to size-aware bidders
    pub min_bid_dimension: u32,
    /// Whether the render service should fetch all slots in a single request
    pub single_request: bool,
    /// Whether the render service should skip its own initial load
    pub disable_initial_load: bool,
}

impl SlotHandlerConfig {
    /// Construct a configuration with explicit timing values.
    ///
    /// Both values are clamped to at least 1ms; the remaining settings take
    /// their defaults.
    ///
    /// # Arguments
    ///
    /// * `debounce_ms` - Quiescence window before a refresh scan fires.
    /// * `bid_timeout_ms` - Upper bound for each bidding provider.
    #[inline]
    #[must_use]
    pub const fn new(debounce_ms: u64, bid_timeout_ms: u64) -> Self {
        let debounce_ms = if debounce_ms < 1 { 1 } else { debounce_ms };
        let bid_timeout_ms = if bid_timeout_ms < 1 { 1 } else { bid_timeout_ms };
        Self {
            debounce_ms,
            bid_timeout_ms,
            min_bid_dimension: DEFAULT_MIN_BID_DIMENSION,
            single_request: true,
            disable_initial_load: true,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Reads the following environment variables:
    /// - `ADSLOTS_DEBOUNCE_MS`: Scan debounce window in milliseconds (default: 50)
    /// - `ADSLOTS_BID_TIMEOUT_MS`: Per-provider bid timeout in milliseconds (default: 1500)
    /// - `ADSLOTS_MIN_BID_DIMENSION`: Minimum bid size dimension in pixels (default: 20)
    /// - `ADSLOTS_SINGLE_REQUEST`: Set to "0" to disable single request mode
    /// - `ADSLOTS_DISABLE_INITIAL_LOAD`: Set to "0" to let the render service load on display
    ///
    /// # Returns
    ///
    /// A new `SlotHandlerConfig` instance populated from environment variables
    #[inline]
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`Self::from_env`] but over an arbitrary variable lookup.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let debounce_ms = lookup("ADSLOTS_DEBOUNCE_MS")
            .and_then(|val| val.parse::<u64>().ok())
            .unwrap_or(DEFAULT_DEBOUNCE_MS)
            .max(1);
        let bid_timeout_ms = lookup("ADSLOTS_BID_TIMEOUT_MS")
            .and_then(|val| val.parse::<u64>().ok())
            .unwrap_or(DEFAULT_BID_TIMEOUT_MS)
            .max(1);
        let min_bid_dimension = lookup("ADSLOTS_MIN_BID_DIMENSION")
            .and_then(|val| val.parse::<u32>().ok())
            .unwrap_or(DEFAULT_MIN_BID_DIMENSION);
        let single_request = lookup("ADSLOTS_SINGLE_REQUEST").as_deref() != Some("0");
        let disable_initial_load = lookup("ADSLOTS_DISABLE_INITIAL_LOAD").as_deref() != Some("0");
        Self {
            debounce_ms,
            bid_timeout_ms,
            min_bid_dimension,
            single_request,
            disable_initial_load,
        }
    }

    /// Get the scan debounce window as a `Duration`.
    ///
    /// # Returns
    ///
    /// The debounce duration
    #[inline]
    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Get the per-provider bid timeout as a `Duration`.
    ///
    /// # Returns
    ///
    /// The bid timeout duration
    #[inline]
    #[must_use]
    pub const fn bid_timeout(&self) -> Duration {
        Duration::from_millis(self.bid_timeout_ms)
    }

    /// Page-level settings handed to the render service on init.
    #[inline]
    #[must_use]
    pub const fn page_settings(&self) -> PageSettings {
        PageSettings {
            single_request: self.single_request,
            disable_initial_load: self.disable_initial_load,
        }
    }
}

impl Default for SlotHandlerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE_MS, DEFAULT_BID_TIMEOUT_MS)
    }
}

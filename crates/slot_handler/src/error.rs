//! Error types for slot registration and bidding.
//!
//! Only configuration problems are ever returned to callers. Bidding errors are
//! produced internally so they can be logged with context, and then degrade to
//! "no bid" for the provider that raised them.

use core::time::Duration;
use thiserror::Error;

/// Errors raised while turning placement configuration into a slot.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The ad unit path is absent or blank.
    #[error("missing ad unit path")]
    MissingAdUnit,

    /// Neither sizes nor a size mapping were provided.
    #[error("missing size information: either sizes or a size mapping must be provided")]
    MissingSizes,

    /// The sizes could not be parsed or contain a degenerate size.
    #[error("invalid sizes: {0}")]
    InvalidSizes(String),

    /// The size mapping could not be parsed.
    #[error("invalid size mapping: {0}")]
    InvalidSizeMapping(String),

    /// A page targeting source could not be parsed.
    #[error("invalid targeting: {0}")]
    InvalidTargeting(String),

    /// Ads were switched off for the page.
    #[error("ads are disabled on this page")]
    AdsDisabled,

    /// An attribute carried a value that cannot be used.
    #[error("invalid attribute {name}={value:?}")]
    InvalidAttribute {
        /// Attribute name.
        name: String,
        /// Raw attribute value.
        value: String,
    },
}

/// Failures of a single bidding provider within one auction.
#[derive(Error, Debug)]
pub enum BidError {
    /// The provider did not settle before the auction timeout.
    #[error("{provider} did not answer within {after:?}")]
    Timeout {
        /// Provider name.
        provider: &'static str,
        /// The bound that elapsed.
        after: Duration,
    },

    /// The provider client raised an error or dropped its completion.
    #[error("{provider} failed: {cause:#}")]
    Fault {
        /// Provider name.
        provider: &'static str,
        /// Underlying client error.
        cause: anyhow::Error,
    },
}

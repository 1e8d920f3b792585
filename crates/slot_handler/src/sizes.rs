//! Creative sizes and size mappings as carried by placement attributes.
//!
//! Sizes use the JSON shape the render service understands: a fixed size is a
//! `[width, height]` pair and a fluid size is the string `"fluid"`. A size
//! mapping is a list of `[[viewportWidth, viewportHeight], [sizes...]]` entries.
//! This module only parses and inspects them; choosing sizes for a given
//! resolution is left to the host.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// One creative size.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawSize", into = "RawSize")]
pub enum AdSize {
    Fixed { width: u32, height: u32 },
    Fluid,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawSize {
    Pair(u32, u32),
    Named(String),
}

impl TryFrom<RawSize> for AdSize {
    type Error = String;

    fn try_from(value: RawSize) -> Result<Self, Self::Error> {
        match value {
            RawSize::Pair(width, height) => Self::fixed(width, height),
            RawSize::Named(name) if name.eq_ignore_ascii_case("fluid") => Ok(Self::Fluid),
            RawSize::Named(name) => Err(format!("unknown named size {name:?}")),
        }
    }
}

impl From<AdSize> for RawSize {
    fn from(value: AdSize) -> Self {
        match value {
            AdSize::Fixed { width, height } => Self::Pair(width, height),
            AdSize::Fluid => Self::Named(String::from("fluid")),
        }
    }
}

impl AdSize {
    /// A fixed size; both dimensions must be non-zero.
    ///
    /// # Errors
    ///
    /// Describes the degenerate size when either dimension is zero.
    pub fn fixed(width: u32, height: u32) -> Result<Self, String> {
        if width == 0 || height == 0 {
            return Err(format!("degenerate size {width}x{height}"));
        }
        Ok(Self::Fixed { width, height })
    }

    /// `(width, height)` for fixed sizes.
    #[inline]
    #[must_use]
    pub const fn dimensions(self) -> Option<(u32, u32)> {
        match self {
            Self::Fixed { width, height } => Some((width, height)),
            Self::Fluid => None,
        }
    }

    /// True iff this is a fixed size larger than `min` in both dimensions.
    #[inline]
    #[must_use]
    pub const fn exceeds(self, min: u32) -> bool {
        match self {
            Self::Fixed { width, height } => width > min && height > min,
            Self::Fluid => false,
        }
    }

    /// True for fixed sizes with a zero dimension.
    #[inline]
    #[must_use]
    pub const fn is_degenerate(self) -> bool {
        matches!(self, Self::Fixed { width: 0, .. } | Self::Fixed { height: 0, .. })
    }
}

/// Parse a JSON list of sizes, e.g. `[[300,250],[728,90],"fluid"]`.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidSizes`] for malformed JSON, unknown named
/// sizes and zero dimensions.
pub fn parse_sizes(raw: &str) -> Result<Vec<AdSize>, ConfigError> {
    serde_json::from_str(raw).map_err(|err| ConfigError::InvalidSizes(err.to_string()))
}

/// The fixed size with the smallest height, used to reserve space up front.
#[must_use]
pub fn smallest_by_height(sizes: &[AdSize]) -> Option<(u32, u32)> {
    sizes
        .iter()
        .filter_map(|size| size.dimensions())
        .min_by_key(|&(_, height)| height)
}

/// Sizes offered for one viewport breakpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawMappingEntry", into = "RawMappingEntry")]
pub struct SizeMappingEntry {
    /// Minimum `[width, height]` of the viewport for this entry.
    pub viewport: [u32; 2],
    /// Sizes eligible at that viewport; empty means "no ad".
    pub sizes: Vec<AdSize>,
}

#[derive(Serialize, Deserialize)]
struct RawMappingEntry([u32; 2], Vec<AdSize>);

impl From<RawMappingEntry> for SizeMappingEntry {
    fn from(RawMappingEntry(viewport, sizes): RawMappingEntry) -> Self {
        Self { viewport, sizes }
    }
}

impl From<SizeMappingEntry> for RawMappingEntry {
    fn from(value: SizeMappingEntry) -> Self {
        Self(value.viewport, value.sizes)
    }
}

/// Responsive size mapping passed through to the render service.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SizeMapping(Vec<SizeMappingEntry>);

impl SizeMapping {
    /// Parse the JSON form of a size mapping.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidSizeMapping`] when `raw` is not a mapping.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(|err| ConfigError::InvalidSizeMapping(err.to_string()))
    }

    #[inline]
    #[must_use]
    pub fn entries(&self) -> &[SizeMappingEntry] {
        &self.0
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Every size mentioned by any entry, in mapping order.
    #[must_use]
    pub fn all_sizes(&self) -> Vec<AdSize> {
        self.0
            .iter()
            .flat_map(|entry| entry.sizes.iter().copied())
            .collect()
    }
}

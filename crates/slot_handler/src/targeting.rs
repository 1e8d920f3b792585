//! Page-level key/value targeting sent with every ad request.
//!
//! Targeting is collected from JSON objects embedded in the page, merged in
//! document order (later keys win), optionally extended with a `test` key taken
//! from the page's query string, and applied once to the render service. A page
//! whose address mentions `ads-off` anywhere gets no ads at all.

use anyhow::Result;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::ConfigError;
use crate::render::RenderService;

/// Query parameter forwarded as the `test` targeting key.
const TEST_PARAM: &str = "test";
/// Marker that switches ads off when it appears anywhere in the page address.
const ADS_OFF: &str = "ads-off";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PageTargeting {
    entries: BTreeMap<String, Vec<String>>,
    ads_off: bool,
}

impl PageTargeting {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge targeting blobs and the page address.
    ///
    /// An empty blob counts as `{}`; anything that is not a JSON object is rejected.
    ///
    /// # Arguments
    ///
    /// * `blobs` - JSON objects embedded in the page, in document order.
    /// * `page_url` - The page address, or just its query string (`?key=value&...`).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidTargeting`] for a blob that is not a JSON object.
    pub fn from_sources<'blob, I>(blobs: I, page_url: Option<&str>) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = &'blob str>,
    {
        let mut merged = Map::new();
        for blob in blobs {
            let blob = blob.trim();
            if blob.is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(blob) {
                Ok(Value::Object(object)) => merged.extend(object),
                Ok(other) => {
                    return Err(ConfigError::InvalidTargeting(format!(
                        "expected an object, got {other}"
                    )));
                }
                Err(err) => return Err(ConfigError::InvalidTargeting(err.to_string())),
            }
        }

        let mut targeting = Self::new();
        for (key, value) in &merged {
            targeting.insert(key, &display_value(value));
        }
        if let Some(test) = page_url.and_then(test_param) {
            targeting.insert(TEST_PARAM, test);
        }
        targeting.ads_off = page_url.is_some_and(|url| url.contains(ADS_OFF));
        Ok(targeting)
    }

    /// Set `key` to the comma-separated parts of `raw`.
    pub fn insert(&mut self, key: &str, raw: &str) {
        let values = raw.split(',').map(str::to_owned).collect();
        self.entries.insert(key.to_owned(), values);
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when the page address switched ads off.
    #[inline]
    #[must_use]
    pub const fn ads_disabled(&self) -> bool {
        self.ads_off
    }

    /// Send every key to the render service.
    ///
    /// # Errors
    ///
    /// Stops at the first key the render service rejects.
    pub fn apply(&self, render: &dyn RenderService) -> Result<()> {
        for (key, values) in &self.entries {
            render.set_page_targeting(key, values)?;
        }
        Ok(())
    }
}

/// Render a JSON value the way page scripts stringify it.
fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Array(items) => items.iter().map(display_value).collect::<Vec<_>>().join(","),
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::Object(_) => value.to_string(),
    }
}

fn test_param(page_url: &str) -> Option<&str> {
    let address = page_url.split_once('#').map_or(page_url, |(address, _)| address);
    let query = address.split_once('?').map_or(address, |(_, query)| query);
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == TEST_PARAM)
        .map(|(_, value)| value)
}

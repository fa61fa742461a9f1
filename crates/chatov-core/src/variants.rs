//! Multi-resolution image variant selection (badges, avatars).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::Tier;

/// Tiers probed when the exact target tier is missing, highest first.
pub const TIER_PRIORITY: [u32; 3] = [4, 2, 1];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VariantError {
    #[error("no image variant available")]
    Empty,
}

/// Mapping from scale tier to a source locator (URL).
///
/// On the wire this is a JSON object keyed by the tier's decimal string: `{"1": "..", "2": ".."}`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageVariantSet(BTreeMap<u32, String>);

impl ImageVariantSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, tier: u32, locator: impl Into<String>) -> Self {
        self.0.insert(tier, locator.into());
        self
    }

    pub fn get(&self, tier: u32) -> Option<&str> {
        self.0.get(&tier).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl FromIterator<(u32, String)> for ImageVariantSet {
    fn from_iter<I: IntoIterator<Item = (u32, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Pick the best locator in `set` for display at `target`.
///
/// An exact tier match wins. Otherwise tiers are probed in [`TIER_PRIORITY`] order: the first
/// present tier is taken unconditionally, and each later present tier replaces it only when it is
/// at least `target`. This avoids upscaling when an adequate tier exists while still returning
/// something when every tier is too small.
pub fn select(set: &ImageVariantSet, target: Tier) -> Result<&str, VariantError> {
    if set.is_empty() {
        return Err(VariantError::Empty);
    }
    if let Some(exact) = set.get(target.0) {
        return Ok(exact);
    }

    let mut best: Option<&str> = None;
    for tier in TIER_PRIORITY {
        let Some(locator) = set.get(tier) else {
            continue;
        };
        if best.is_none() || tier >= target.0 {
            best = Some(locator);
        }
    }
    if let Some(found) = best {
        return Ok(found);
    }

    // Only non-standard tiers present: smallest adequate tier, else the largest one.
    set.0
        .range(target.0..)
        .next()
        .or_else(|| set.0.iter().next_back())
        .map(|(_, locator)| locator.as_str())
        .ok_or(VariantError::Empty)
}

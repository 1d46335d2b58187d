//! Feature flags a container can switch on at runtime.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Optional update-pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Feature {
    /// Guarded updates are queued and flushed together.
    BatchedUpdates,
    /// Guarded updates run through the middleware chain first.
    Middleware,
}

impl Feature {
    pub const ALL: [Feature; 2] = [Feature::BatchedUpdates, Feature::Middleware];

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::BatchedUpdates => "batched-updates",
            Feature::Middleware => "middleware",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feature {
    type Err = StoreError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Feature::ALL
            .into_iter()
            .find(|feature| feature.as_str() == name)
            .ok_or_else(|| StoreError::UnknownFeature {
                name: name.to_string(),
                valid: Feature::ALL
                    .iter()
                    .map(Feature::as_str)
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}

/// Which features are switched on for one container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeatureSet {
    pub batched_updates: bool,
    pub middleware: bool,
}

impl FeatureSet {
    pub fn enable(&mut self, feature: Feature) {
        match feature {
            Feature::BatchedUpdates => self.batched_updates = true,
            Feature::Middleware => self.middleware = true,
        }
    }

    pub fn is_enabled(&self, feature: Feature) -> bool {
        match feature {
            Feature::BatchedUpdates => self.batched_updates,
            Feature::Middleware => self.middleware,
        }
    }
}

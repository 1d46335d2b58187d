//! StoreConfig - container の設定
//!
//! JSON から読み込める。省略したフィールドはデフォルト値になる。

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::feature::Feature;

/// Default period of the background flush timer (one 60Hz frame).
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Period of the background flush while batched updates are enabled.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Features switched on when the container is built.
    #[serde(default)]
    pub features: Vec<Feature>,
}

fn default_flush_interval_ms() -> u64 {
    DEFAULT_FLUSH_INTERVAL_MS
}

impl StoreConfig {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn flush_interval(&self) -> Duration {
        // interval(0) は tokio が panic するので最低 1ms
        Duration::from_millis(self.flush_interval_ms.max(1))
    }

    pub fn with_feature(mut self, feature: Feature) -> Self {
        if !self.features.contains(&feature) {
            self.features.push(feature);
        }
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            features: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_uses_defaults() {
        let config = StoreConfig::from_json("{}").unwrap();
        assert_eq!(config, StoreConfig::default());
        assert_eq!(config.flush_interval(), Duration::from_millis(16));
    }

    #[test]
    fn json_overrides_fields() {
        let config =
            StoreConfig::from_json(r#"{ "flush_interval_ms": 50, "features": ["middleware"] }"#)
                .unwrap();
        assert_eq!(config.flush_interval(), Duration::from_millis(50));
        assert_eq!(config.features, vec![Feature::Middleware]);
    }

    #[test]
    fn unknown_feature_in_json_is_an_error() {
        assert!(StoreConfig::from_json(r#"{ "features": ["turbo"] }"#).is_err());
    }

    #[test]
    fn zero_interval_is_clamped() {
        let config = StoreConfig {
            flush_interval_ms: 0,
            ..StoreConfig::default()
        };
        assert_eq!(config.flush_interval(), Duration::from_millis(1));
    }

    #[test]
    fn with_feature_does_not_duplicate() {
        let config = StoreConfig::default()
            .with_feature(Feature::Middleware)
            .with_feature(Feature::Middleware);
        assert_eq!(config.features, vec![Feature::Middleware]);
    }
}

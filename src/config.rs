//! Configuration for a hearth session.
//!
//! Every field has a default; a config file may set any subset of them.

use crate::error::{HearthError, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Policy constants and store layout.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct HearthConfig {
    /// Trailing window of articles subscribed per feed.
    /// Default: 250
    pub article_window: usize,

    /// Trailing window of read markers synchronized per user.
    /// Default: 250
    pub read_window: usize,

    /// How long the loading flag stays up without any article arriving.
    /// Default: 4000
    pub loading_delay_ms: u64,

    /// Path prefix under which the store layout lives ("" = store root).
    pub root: String,

    /// Read articles from the demo area instead of the live feeds.
    pub demo: bool,

    /// Capacity of the feed-by-id lookup cache.
    /// Default: 256
    pub feed_cache_size: usize,
}

impl Default for HearthConfig {
    fn default() -> Self {
        Self {
            article_window: 250,
            read_window: 250,
            loading_delay_ms: 4000,
            root: String::new(),
            demo: false,
            feed_cache_size: 256,
        }
    }
}

impl HearthConfig {
    /// Load configuration from a JSON file.
    ///
    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };

        if text.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Self = serde_json::from_str(&text)
            .map_err(|e| HearthError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the session useless.
    pub fn validate(&self) -> Result<()> {
        if self.article_window == 0 {
            return Err(HearthError::Config("article_window must be positive".to_string()));
        }
        if self.read_window == 0 {
            return Err(HearthError::Config("read_window must be positive".to_string()));
        }
        Ok(())
    }

    pub fn loading_delay(&self) -> Duration {
        Duration::from_millis(self.loading_delay_ms)
    }
}

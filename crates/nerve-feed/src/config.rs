//! Feed configuration
//!
//! Built-in defaults, optionally overridden by a JSON file. The binary layers
//! CLI/env flags on top of whatever this produces.

use crate::catalog::default_regions;
use crate::error::{NerveError, Result};
use crate::model::Region;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Upstream base URLs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEndpoints {
    /// Azure Retail Prices API
    #[serde(default = "default_pricing_url")]
    pub pricing_url: String,

    /// Open-Meteo forecast API
    #[serde(default = "default_weather_url")]
    pub weather_url: String,

    /// Carbon Intensity UK API
    #[serde(default = "default_carbon_url")]
    pub carbon_url: String,
}

fn default_pricing_url() -> String {
    "https://prices.azure.com/api/retail/prices".to_string()
}

fn default_weather_url() -> String {
    "https://api.open-meteo.com/v1/forecast".to_string()
}

fn default_carbon_url() -> String {
    "https://api.carbonintensity.org.uk/intensity".to_string()
}

impl Default for SourceEndpoints {
    fn default() -> Self {
        Self {
            pricing_url: default_pricing_url(),
            weather_url: default_weather_url(),
            carbon_url: default_carbon_url(),
        }
    }
}

/// Per-call timeouts, in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceTimeouts {
    /// Spot price query per family prefix
    #[serde(default = "default_spot_timeout")]
    pub spot_secs: u64,

    /// On-demand lookup per SKU
    #[serde(default = "default_call_timeout")]
    pub ondemand_secs: u64,

    /// Weather forecast call
    #[serde(default = "default_call_timeout")]
    pub weather_secs: u64,

    /// Carbon intensity call
    #[serde(default = "default_call_timeout")]
    pub carbon_secs: u64,

    /// Single subscriber send
    #[serde(default = "default_send_timeout")]
    pub send_secs: u64,
}

fn default_spot_timeout() -> u64 {
    15
}

fn default_call_timeout() -> u64 {
    10
}

fn default_send_timeout() -> u64 {
    5
}

impl Default for SourceTimeouts {
    fn default() -> Self {
        Self {
            spot_secs: default_spot_timeout(),
            ondemand_secs: default_call_timeout(),
            weather_secs: default_call_timeout(),
            carbon_secs: default_call_timeout(),
            send_secs: default_send_timeout(),
        }
    }
}

/// Top-level feed configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Seconds between scrape cycles
    #[serde(default = "default_scrape_interval")]
    pub scrape_interval_secs: u64,

    /// Bounded broadcast queue capacity
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,

    /// Source error notes kept in the snapshot
    #[serde(default = "default_error_ring_capacity")]
    pub error_ring_capacity: usize,

    /// Error notes reported in the status summary
    #[serde(default = "default_status_error_count")]
    pub status_error_count: usize,

    /// Price history points kept per region
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Address the HTTP/WebSocket server binds to
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Upstream base URLs
    #[serde(default)]
    pub endpoints: SourceEndpoints,

    /// Per-call timeouts
    #[serde(default)]
    pub timeouts: SourceTimeouts,

    /// Tracked regions
    #[serde(default = "default_regions")]
    pub regions: Vec<Region>,
}

fn default_scrape_interval() -> u64 {
    60
}

fn default_broadcast_capacity() -> usize {
    500
}

fn default_error_ring_capacity() -> usize {
    50
}

fn default_status_error_count() -> usize {
    10
}

fn default_history_capacity() -> usize {
    1440
}

fn default_listen() -> String {
    "0.0.0.0:8000".to_string()
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            scrape_interval_secs: default_scrape_interval(),
            broadcast_capacity: default_broadcast_capacity(),
            error_ring_capacity: default_error_ring_capacity(),
            status_error_count: default_status_error_count(),
            history_capacity: default_history_capacity(),
            listen: default_listen(),
            endpoints: SourceEndpoints::default(),
            timeouts: SourceTimeouts::default(),
            regions: default_regions(),
        }
    }
}

impl FeedConfig {
    /// Load from a JSON file; absent keys keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            NerveError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Set scrape interval
    pub fn with_scrape_interval(mut self, secs: u64) -> Self {
        self.scrape_interval_secs = secs;
        self
    }

    /// Set broadcast queue capacity
    pub fn with_broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity;
        self
    }

    /// Set listen address
    pub fn with_listen(mut self, listen: impl Into<String>) -> Self {
        self.listen = listen.into();
        self
    }

    /// Replace the tracked regions
    pub fn with_regions(mut self, regions: Vec<Region>) -> Self {
        self.regions = regions;
        self
    }

    /// Scrape period
    pub fn scrape_interval(&self) -> Duration {
        Duration::from_secs(self.scrape_interval_secs)
    }

    /// Per-subscriber send timeout
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.send_secs)
    }

    /// Check invariants the rest of the feed relies on
    pub fn validate(&self) -> Result<()> {
        if self.scrape_interval_secs == 0 {
            return Err(NerveError::config("scrape_interval_secs must be positive"));
        }
        if self.broadcast_capacity == 0 {
            return Err(NerveError::config("broadcast_capacity must be positive"));
        }
        if self.regions.is_empty() {
            return Err(NerveError::config("at least one region is required"));
        }

        let mut seen = HashSet::new();
        for region in &self.regions {
            if !seen.insert(region.id.as_str()) {
                return Err(NerveError::config(format!(
                    "duplicate region id: {}",
                    region.id
                )));
            }
        }

        let live = self.regions.iter().filter(|r| r.live_carbon).count();
        if live > 1 {
            return Err(NerveError::config(format!(
                "only one region may use live carbon data, found {}",
                live
            )));
        }

        Ok(())
    }
}

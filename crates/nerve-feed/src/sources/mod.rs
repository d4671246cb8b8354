//! Source adapters
//!
//! One adapter per signal type. Adapters never fail: every upstream problem
//! becomes a fallback value plus a note in the returned [`SourceOutcome`].
//! The orchestrator works through these traits only, so tests swap in fakes.

pub mod carbon;
pub mod pricing;
pub mod weather;

pub use carbon::CarbonIntensitySource;
pub use pricing::AzurePricingSource;
pub use weather::OpenMeteoSource;

use crate::error::{NerveError, Result};
use crate::model::{CarbonSample, ComputeOffer, Region, WeatherSample};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// Value produced by an adapter plus any failures it absorbed
#[derive(Debug, Clone, PartialEq)]
pub struct SourceOutcome<T> {
    /// Normalized value (possibly a fallback)
    pub value: T,

    /// Human readable failure notes
    pub notes: Vec<String>,
}

impl<T> SourceOutcome<T> {
    /// Outcome with no failures
    pub fn ok(value: T) -> Self {
        Self {
            value,
            notes: Vec::new(),
        }
    }

    /// Outcome that fell back after a failure
    pub fn fallback(value: T, note: impl Into<String>) -> Self {
        Self {
            value,
            notes: vec![note.into()],
        }
    }

    /// Whether the adapter absorbed any failure
    pub fn is_degraded(&self) -> bool {
        !self.notes.is_empty()
    }
}

/// GPU spot pricing
#[async_trait]
pub trait PricingSource: Send + Sync {
    /// Priced offers for a region (empty on total failure)
    async fn fetch_offers(&self, region: &Region) -> SourceOutcome<Vec<ComputeOffer>>;
}

/// Weather conditions and forecast
#[async_trait]
pub trait WeatherSource: Send + Sync {
    /// Current weather and today's hourly forecast for a region
    async fn fetch_weather(&self, region: &Region) -> SourceOutcome<WeatherSample>;
}

/// Grid carbon intensity
#[async_trait]
pub trait CarbonSource: Send + Sync {
    /// Carbon intensity for a region
    async fn fetch_carbon(&self, region: &Region) -> SourceOutcome<CarbonSample>;
}

/// GET a JSON document, bounded by `timeout`
pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    query: &[(&str, String)],
    timeout: Duration,
) -> Result<T> {
    debug!(url = %url, "Fetching upstream source");

    let request = async {
        let response = client
            .get(url)
            .query(query)
            .send()
            .await?
            .error_for_status()?;
        let body = response.json::<T>().await?;
        Ok::<T, NerveError>(body)
    };

    tokio::time::timeout(timeout, request)
        .await
        .map_err(|_| NerveError::Timeout(timeout))?
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_constructors() {
        let ok = SourceOutcome::ok(1);
        assert!(!ok.is_degraded());

        let degraded = SourceOutcome::fallback(0, "weather[x]: timeout");
        assert!(degraded.is_degraded());
        assert_eq!(degraded.notes, vec!["weather[x]: timeout".to_string()]);
    }

    #[tokio::test]
    async fn test_get_json_unreachable_is_error() {
        let client = reqwest::Client::new();
        let result: Result<serde_json::Value> =
            get_json(&client, "http://127.0.0.1:1/", &[], Duration::from_secs(2)).await;
        assert!(result.is_err());
    }
}

//! Carbon Intensity UK adapter
//!
//! Only the region flagged `live_carbon` is fetched; every other region gets
//! its static default without touching the network.

use super::{CarbonSource, SourceOutcome, get_json};
use crate::catalog::default_carbon;
use crate::config::{SourceEndpoints, SourceTimeouts};
use crate::error::{NerveError, Result};
use crate::model::{CarbonIndex, CarbonProvenance, CarbonSample, Region};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

const LIVE_SOURCE: &str = "carbonintensity.org.uk (LIVE)";

#[derive(Debug, Deserialize)]
pub(crate) struct IntensityResponse {
    #[serde(default)]
    pub data: Vec<IntensityPeriod>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct IntensityPeriod {
    pub from: Option<String>,
    pub to: Option<String>,
    pub intensity: IntensityReading,
}

#[derive(Debug, Deserialize)]
pub(crate) struct IntensityReading {
    pub actual: Option<f64>,
    pub forecast: Option<f64>,
    pub index: Option<String>,
}

/// Carbon adapter backed by the Carbon Intensity UK API
pub struct CarbonIntensitySource {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl CarbonIntensitySource {
    /// Create a new adapter
    pub fn new(client: reqwest::Client, endpoints: &SourceEndpoints, timeouts: &SourceTimeouts) -> Self {
        Self {
            client,
            base_url: endpoints.carbon_url.clone(),
            timeout: Duration::from_secs(timeouts.carbon_secs),
        }
    }

    async fn fetch_live(&self, region: &Region) -> Result<CarbonSample> {
        let response: IntensityResponse =
            get_json(&self.client, &self.base_url, &[], self.timeout).await?;
        live_sample(region, response)
    }
}

#[async_trait]
impl CarbonSource for CarbonIntensitySource {
    async fn fetch_carbon(&self, region: &Region) -> SourceOutcome<CarbonSample> {
        if !region.live_carbon {
            return SourceOutcome::ok(static_sample(&region.id));
        }

        match self.fetch_live(region).await {
            Ok(sample) => {
                info!(region = %region.id, gco2_kwh = sample.gco2_kwh, index = %sample.index, "Fetched live carbon intensity");
                SourceOutcome::ok(sample)
            }
            Err(e) => {
                warn!(region = %region.id, error = %e, "Live carbon fetch failed, using default");
                SourceOutcome::fallback(
                    static_sample(&region.id),
                    format!("carbon[{}]: {}", region.id, e),
                )
            }
        }
    }
}

/// Static default for a region
pub fn static_sample(region_id: &str) -> CarbonSample {
    let default = default_carbon(region_id);
    CarbonSample {
        gco2_kwh: default.gco2_kwh,
        index: default.index,
        provenance: CarbonProvenance::Default,
        source: default.source.to_string(),
        from: None,
        to: None,
    }
}

/// Prefer `actual`, then `forecast`, then the region's default value
pub(crate) fn live_sample(region: &Region, response: IntensityResponse) -> Result<CarbonSample> {
    let period = response
        .data
        .into_iter()
        .next()
        .ok_or_else(|| NerveError::source("intensity response has no data"))?;

    let default = default_carbon(&region.id);
    let reading = period.intensity;

    Ok(CarbonSample {
        gco2_kwh: reading
            .actual
            .or(reading.forecast)
            .unwrap_or(default.gco2_kwh),
        index: reading
            .index
            .as_deref()
            .and_then(CarbonIndex::from_label)
            .unwrap_or(default.index),
        provenance: CarbonProvenance::Live,
        source: LIVE_SOURCE.to_string(),
        from: period.from,
        to: period.to,
    })
}

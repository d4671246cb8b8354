//! Read-side views over the snapshot
//!
//! [`FeedQuery`] is the read API handed to the HTTP surface and to any
//! decision engine: it resolves region ids against the configured topology
//! and shapes cache entries into per-AZ, summary, curve and analysis views.

use crate::broadcast::{BroadcastStats, EventBroadcaster};
use crate::cache::{FeedStatus, Snapshot, SnapshotCache};
use crate::curve::{PriceCurve, build_price_curve};
use crate::error::{NerveError, Result};
use crate::model::{
    CarbonIndex, CarbonSample, ComputeOffer, Region, RegionSnapshot, WeatherSample, round_to,
};
use crate::sources::carbon::static_sample;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

const NOT_AVAILABLE: &str = "N/A";
const CONTEXT_SOURCE: &str = "NERVE live feed";

/// One availability zone with the region's live signals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AzView {
    /// AZ id
    pub az_id: String,

    /// AZ display name
    pub az_name: String,

    /// Offers available in the region
    pub offers: Vec<ComputeOffer>,

    /// Carbon intensity (gCO2eq/kWh)
    pub carbon_intensity_gco2_kwh: f64,

    /// Carbon index
    pub carbon_index: CarbonIndex,

    /// Temperature with a small per-AZ offset (°C)
    pub temperature_c: f64,

    /// Wind speed with a small per-AZ offset (km/h)
    pub wind_kmh: f64,
}

/// Region topology plus per-AZ signals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionView {
    /// Region id
    pub region_id: String,

    /// Display name
    pub region_name: String,

    /// Cloud provider
    pub cloud_provider: String,

    /// Location label
    pub location: String,

    /// Cycle that produced the data, if any cycle has run
    pub cycle: Option<u64>,

    /// Availability zones in configured order
    pub availability_zones: Vec<AzView>,
}

/// Dashboard line for one region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionSummary {
    /// Region id
    pub region_id: String,
    /// Display name
    pub region_name: String,
    /// Location label
    pub location: String,
    /// Carbon intensity (gCO2eq/kWh), 0 before the first cycle
    pub carbon_gco2_kwh: f64,
    /// Carbon index, if any cycle has run
    pub carbon_index: Option<CarbonIndex>,
    /// Where the carbon figure came from
    pub carbon_source: String,
    /// Current temperature (°C)
    pub temperature_c: f64,
    /// Current wind speed (km/h)
    pub wind_kmh: f64,
    /// Offers tracked
    pub offer_count: usize,
    /// Hardware name of the cheapest offer, or `N/A`
    pub cheapest_gpu_name: String,
    /// SKU of the cheapest offer, or `N/A`
    pub cheapest_sku: String,
    /// Cheapest spot price (USD/hour)
    pub cheapest_spot_price: f64,
    /// On-demand price of the cheapest offer (USD/hour)
    pub cheapest_ondemand_price: f64,
    /// Savings of the cheapest offer (%)
    pub cheapest_savings_pct: f64,
}

/// Metadata block of the analysis context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextMetadata {
    /// When the last cycle completed
    pub last_cycle: Option<DateTime<Utc>>,
    /// Completed cycles
    pub cycle_count: u64,
    /// Feed name
    pub source: String,
}

/// Full-snapshot payload for the natural-language analysis collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisContext {
    /// Cycle metadata
    pub metadata: ContextMetadata,
    /// Offers per region
    pub gpu_prices: BTreeMap<String, Vec<ComputeOffer>>,
    /// Weather per region
    pub weather: BTreeMap<String, WeatherSample>,
    /// Carbon per region
    pub carbon: BTreeMap<String, CarbonSample>,
}

impl AnalysisContext {
    /// Build from an owned snapshot
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut context = Self {
            metadata: ContextMetadata {
                last_cycle: snapshot.last_cycle,
                cycle_count: snapshot.cycle_count,
                source: CONTEXT_SOURCE.to_string(),
            },
            gpu_prices: BTreeMap::new(),
            weather: BTreeMap::new(),
            carbon: BTreeMap::new(),
        };
        for (id, entry) in snapshot.regions {
            context.gpu_prices.insert(id.clone(), entry.offers);
            context.weather.insert(id.clone(), entry.weather);
            context.carbon.insert(id, entry.carbon);
        }
        context
    }

    /// Pretty JSON, as handed to the collaborator
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Shape a region and its (optional) cache entry into the per-AZ view
///
/// Before the first cycle the region shows default weather and carbon.
pub fn region_view(region: &Region, entry: Option<&RegionSnapshot>) -> RegionView {
    let fallback_weather = WeatherSample::fallback();
    let fallback_carbon = static_sample(&region.id);
    let weather = entry.map(|e| &e.weather).unwrap_or(&fallback_weather);
    let carbon = entry.map(|e| &e.carbon).unwrap_or(&fallback_carbon);
    let offers: &[ComputeOffer] = entry.map(|e| e.offers.as_slice()).unwrap_or(&[]);

    let availability_zones = region
        .azs
        .iter()
        .enumerate()
        .map(|(i, az)| {
            let i = i as f64;
            AzView {
                az_id: az.id.clone(),
                az_name: az.name.clone(),
                offers: offers.to_vec(),
                carbon_intensity_gco2_kwh: carbon.gco2_kwh,
                carbon_index: carbon.index,
                temperature_c: round_to(weather.current_temp_c + (i * 0.2 - 0.2), 1),
                wind_kmh: round_to(weather.current_wind_kmh + (i * 0.5 - 0.5), 1),
            }
        })
        .collect();

    RegionView {
        region_id: region.id.clone(),
        region_name: region.name.clone(),
        cloud_provider: region.provider.clone(),
        location: region.location.clone(),
        cycle: entry.map(|e| e.cycle),
        availability_zones,
    }
}

/// Dashboard summary for one region
pub fn region_summary(region: &Region, entry: Option<&RegionSnapshot>) -> RegionSummary {
    let cheapest = entry.and_then(|e| e.cheapest());
    RegionSummary {
        region_id: region.id.clone(),
        region_name: region.name.clone(),
        location: region.location.clone(),
        carbon_gco2_kwh: entry.map(|e| e.carbon.gco2_kwh).unwrap_or(0.0),
        carbon_index: entry.map(|e| e.carbon.index),
        carbon_source: entry.map(|e| e.carbon.source.clone()).unwrap_or_default(),
        temperature_c: entry.map(|e| e.weather.current_temp_c).unwrap_or(0.0),
        wind_kmh: entry.map(|e| e.weather.current_wind_kmh).unwrap_or(0.0),
        offer_count: entry.map(|e| e.offers.len()).unwrap_or(0),
        cheapest_gpu_name: cheapest
            .map(|o| o.hardware.name.clone())
            .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        cheapest_sku: cheapest
            .map(|o| o.sku.clone())
            .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        cheapest_spot_price: cheapest.map(|o| o.spot_price_usd_hr).unwrap_or(0.0),
        cheapest_ondemand_price: cheapest.map(|o| o.ondemand_price_usd_hr).unwrap_or(0.0),
        cheapest_savings_pct: cheapest.map(|o| o.savings_pct).unwrap_or(0.0),
    }
}

/// Health report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    /// Always `ok` while the process serves requests
    pub status: &'static str,
    /// Crate version
    pub version: &'static str,
    /// Whether the scrape loop is running
    pub scheduler_running: bool,
    /// Feed status summary
    pub feed: FeedStatus,
    /// Connected subscribers
    pub subscribers: usize,
    /// Broadcaster counters
    pub broadcast: BroadcastStats,
}

/// Read API over the live snapshot
#[derive(Clone)]
pub struct FeedQuery {
    cache: Arc<SnapshotCache>,
    regions: Arc<Vec<Region>>,
    broadcaster: EventBroadcaster,
}

impl FeedQuery {
    /// Create a query handle
    pub fn new(cache: Arc<SnapshotCache>, regions: Vec<Region>, broadcaster: EventBroadcaster) -> Self {
        Self {
            cache,
            regions: Arc::new(regions),
            broadcaster,
        }
    }

    /// Configured regions
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Broadcaster handle (for subscription)
    pub fn broadcaster(&self) -> &EventBroadcaster {
        &self.broadcaster
    }

    fn lookup(&self, region_id: &str) -> Result<&Region> {
        self.regions
            .iter()
            .find(|r| r.id == region_id)
            .ok_or_else(|| NerveError::UnknownRegion(region_id.to_string()))
    }

    /// Region topology with per-AZ signals
    pub async fn region(&self, region_id: &str) -> Result<RegionView> {
        let region = self.lookup(region_id)?;
        let entry = self.cache.region(region_id).await;
        Ok(region_view(region, entry.as_deref()))
    }

    /// Availability zones of a region
    pub async fn azs(&self, region_id: &str) -> Result<Vec<AzView>> {
        Ok(self.region(region_id).await?.availability_zones)
    }

    /// Current offers for a region
    pub async fn spot_offers(&self, region_id: &str) -> Result<Vec<ComputeOffer>> {
        self.lookup(region_id)?;
        Ok(self
            .cache
            .region(region_id)
            .await
            .map(|e| e.offers.clone())
            .unwrap_or_default())
    }

    /// Current carbon sample for a region
    pub async fn carbon(&self, region_id: &str) -> Result<CarbonSample> {
        self.lookup(region_id)?;
        Ok(self
            .cache
            .region(region_id)
            .await
            .map(|e| e.carbon.clone())
            .unwrap_or_else(|| static_sample(region_id)))
    }

    /// Current weather for a region
    pub async fn weather(&self, region_id: &str) -> Result<WeatherSample> {
        self.lookup(region_id)?;
        Ok(self
            .cache
            .region(region_id)
            .await
            .map(|e| e.weather.clone())
            .unwrap_or_else(WeatherSample::fallback))
    }

    /// Summary of every configured region, in configured order
    pub async fn summary(&self) -> Vec<RegionSummary> {
        let mut out = Vec::with_capacity(self.regions.len());
        for region in self.regions.iter() {
            let entry = self.cache.region(&region.id).await;
            out.push(region_summary(region, entry.as_deref()));
        }
        out
    }

    /// 24 hour price curve for a region
    pub async fn price_curve(&self, region_id: &str) -> Result<PriceCurve> {
        self.lookup(region_id)?;
        let entry = self.cache.region(region_id).await;
        let history = self.cache.price_history(region_id).await;
        Ok(build_price_curve(region_id, entry.as_deref(), &history))
    }

    /// Payload for the analysis collaborator
    pub async fn analysis_context(&self) -> AnalysisContext {
        AnalysisContext::from_snapshot(self.cache.snapshot().await)
    }

    /// Status summary
    pub async fn status(&self) -> FeedStatus {
        self.cache.status().await
    }

    /// Owned copy of the whole snapshot
    pub async fn snapshot(&self) -> Snapshot {
        self.cache.snapshot().await
    }

    /// Health report
    pub async fn health(&self, scheduler_running: bool) -> HealthReport {
        HealthReport {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            scheduler_running,
            feed: self.cache.status().await,
            subscribers: self.broadcaster.subscriber_count().await,
            broadcast: self.broadcaster.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::DEFAULT_SEND_TIMEOUT;
    use crate::catalog::default_regions;
    use crate::model::fixtures::{offer, region_snapshot};
    use tokio_test::assert_err;

    fn query() -> (FeedQuery, Arc<SnapshotCache>) {
        let cache = Arc::new(SnapshotCache::default());
        let (broadcaster, _dispatcher) = EventBroadcaster::channel(8, DEFAULT_SEND_TIMEOUT);
        (FeedQuery::new(cache.clone(), default_regions(), broadcaster), cache)
    }

    #[test]
    fn test_region_view_az_offsets() {
        let regions = default_regions();
        let region = &regions[0];
        let mut entry = region_snapshot(4, vec![offer("francecentral", "Standard_NC6s_v3", 0.4)]);
        entry.weather.current_temp_c = 12.0;
        entry.weather.current_wind_kmh = 20.0;

        let view = region_view(region, Some(&entry));
        assert_eq!(view.cycle, Some(4));
        assert_eq!(view.availability_zones.len(), 3);

        let temps: Vec<f64> = view.availability_zones.iter().map(|a| a.temperature_c).collect();
        let winds: Vec<f64> = view.availability_zones.iter().map(|a| a.wind_kmh).collect();
        assert_eq!(temps, vec![11.8, 12.0, 12.2]);
        assert_eq!(winds, vec![19.5, 20.0, 20.5]);
        assert!(view.availability_zones.iter().all(|a| a.offers.len() == 1));
        assert_eq!(view.availability_zones[0].az_id, "fr-central-1");
    }

    #[test]
    fn test_region_view_before_first_cycle() {
        let regions = default_regions();
        let region = &regions[1];
        let view = region_view(region, None);

        assert!(view.cycle.is_none());
        assert_eq!(view.availability_zones[1].temperature_c, 10.0);
        assert_eq!(view.availability_zones[1].carbon_intensity_gco2_kwh, 328.0);
        assert!(view.availability_zones[0].offers.is_empty());
    }

    #[test]
    fn test_summary_cheapest_and_placeholders() {
        let regions = default_regions();
        let region = &regions[0];
        let entry = region_snapshot(
            1,
            vec![
                offer("francecentral", "Standard_NC6s_v3", 0.9),
                offer("francecentral", "Standard_NV12s_v3", 0.3),
            ],
        );
        let summary = region_summary(region, Some(&entry));
        assert_eq!(summary.offer_count, 2);
        assert_eq!(summary.cheapest_sku, "Standard_NV12s_v3");
        assert_eq!(summary.cheapest_spot_price, 0.3);

        let empty = region_summary(region, None);
        assert_eq!(empty.cheapest_sku, "N/A");
        assert_eq!(empty.cheapest_gpu_name, "N/A");
        assert!(empty.carbon_index.is_none());
    }

    #[test]
    fn test_analysis_context_shape() {
        let mut regions = BTreeMap::new();
        regions.insert("A".to_string(), region_snapshot(2, vec![offer("A", "x", 1.0)]));
        let snapshot = Snapshot {
            cycle_count: 2,
            last_cycle: Some(Utc::now()),
            regions,
            errors: vec![],
        };

        let context = AnalysisContext::from_snapshot(snapshot);
        let value: serde_json::Value = serde_json::from_str(&context.to_json().unwrap()).unwrap();
        assert_eq!(value["metadata"]["cycle_count"], 2);
        assert_eq!(value["metadata"]["source"], "NERVE live feed");
        assert_eq!(value["gpu_prices"]["A"][0]["sku"], "x");
        assert_eq!(value["carbon"]["A"]["gco2_kwh"], 56.0);
        assert!(value["weather"]["A"].is_object());
    }

    #[tokio::test]
    async fn test_unknown_region_is_not_found() {
        let (query, _cache) = query();
        let err = assert_err!(query.region("mars-north").await);
        assert!(err.is_not_found());
        assert_err!(query.price_curve("mars-north").await);
        assert_err!(query.spot_offers("mars-north").await);
    }

    #[tokio::test]
    async fn test_reads_follow_cache() {
        let (query, cache) = query();
        cache
            .install("uksouth", region_snapshot(1, vec![offer("uksouth", "Standard_NC6s_v3", 0.5)]))
            .await;

        assert_eq!(query.spot_offers("uksouth").await.unwrap().len(), 1);
        assert!(query.spot_offers("westeurope").await.unwrap().is_empty());
        assert_eq!(query.carbon("westeurope").await.unwrap().gco2_kwh, 328.0);
        assert_eq!(query.weather("francecentral").await.unwrap(), WeatherSample::fallback());
        assert_eq!(query.azs("uksouth").await.unwrap().len(), 3);

        let summary = query.summary().await;
        let ids: Vec<&str> = summary.iter().map(|s| s.region_id.as_str()).collect();
        assert_eq!(ids, vec!["francecentral", "westeurope", "uksouth"]);
    }

    #[tokio::test]
    async fn test_health_report() {
        let (query, _cache) = query();
        let health = query.health(true).await;
        assert_eq!(health.status, "ok");
        assert!(health.scheduler_running);
        assert_eq!(health.subscribers, 0);
        assert_eq!(health.broadcast, BroadcastStats::default());
    }
}

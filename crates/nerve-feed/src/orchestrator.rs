//! Scrape cycle orchestration
//!
//! A cycle walks the tracked regions in order. For each region the three
//! adapters run concurrently; once all have answered, the region's entry is
//! swapped into the cache as one unit and any price changes are published.

use crate::broadcast::{EventBroadcaster, PublishOutcome};
use crate::cache::{PricePoint, SnapshotCache};
use crate::config::FeedConfig;
use crate::detector::detect_price_changes;
use crate::error::{NerveError, Result};
use crate::model::{ComputeOffer, Region, RegionSnapshot, round_to};
use crate::sources::{
    AzurePricingSource, CarbonIntensitySource, CarbonSource, OpenMeteoSource, PricingSource,
    WeatherSource,
};
use async_trait::async_trait;
use chrono::{Timelike, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Summary of one completed cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    /// Cycle number
    pub cycle: u64,

    /// Regions refreshed
    pub regions: usize,

    /// Offers tracked after the cycle
    pub offers: usize,

    /// Change events accepted by the broadcaster
    pub events_published: usize,

    /// Change events dropped on a full queue
    pub events_dropped: usize,

    /// Source error notes recorded
    pub notes: usize,

    /// Wall time of the cycle
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

/// Something that can run one scrape cycle
#[async_trait]
pub trait CycleRunner: Send + Sync {
    /// Run a full cycle
    async fn run_cycle(&self) -> Result<CycleReport>;
}

/// Drives the adapters and installs their results
pub struct CycleOrchestrator {
    regions: Vec<Region>,
    pricing: Arc<dyn PricingSource>,
    weather: Arc<dyn WeatherSource>,
    carbon: Arc<dyn CarbonSource>,
    cache: Arc<SnapshotCache>,
    broadcaster: EventBroadcaster,
    running: Mutex<()>,
}

impl CycleOrchestrator {
    /// Create an orchestrator over explicit sources
    pub fn new(
        regions: Vec<Region>,
        pricing: Arc<dyn PricingSource>,
        weather: Arc<dyn WeatherSource>,
        carbon: Arc<dyn CarbonSource>,
        cache: Arc<SnapshotCache>,
        broadcaster: EventBroadcaster,
    ) -> Self {
        Self {
            regions,
            pricing,
            weather,
            carbon,
            cache,
            broadcaster,
            running: Mutex::new(()),
        }
    }

    /// Create an orchestrator over the live HTTP sources
    pub fn from_config(
        config: &FeedConfig,
        client: reqwest::Client,
        cache: Arc<SnapshotCache>,
        broadcaster: EventBroadcaster,
    ) -> Self {
        Self::new(
            config.regions.clone(),
            Arc::new(AzurePricingSource::new(
                client.clone(),
                &config.endpoints,
                &config.timeouts,
            )),
            Arc::new(OpenMeteoSource::new(
                client.clone(),
                &config.endpoints,
                &config.timeouts,
            )),
            Arc::new(CarbonIntensitySource::new(
                client,
                &config.endpoints,
                &config.timeouts,
            )),
            cache,
            broadcaster,
        )
    }

    /// Tracked regions
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    async fn refresh_region(&self, region: &Region, cycle: u64, report: &mut CycleReport) {
        let (offers, weather, carbon) = tokio::join!(
            self.pricing.fetch_offers(region),
            self.weather.fetch_weather(region),
            self.carbon.fetch_carbon(region),
        );

        let notes: Vec<String> = offers
            .notes
            .into_iter()
            .chain(weather.notes)
            .chain(carbon.notes)
            .collect();

        let now = Utc::now();
        let entry = RegionSnapshot {
            cycle,
            fetched_at: now,
            offers: offers.value,
            weather: weather.value,
            carbon: carbon.value,
        };
        let current: Vec<ComputeOffer> = entry.offers.clone();
        let average = entry.average_compute_spot();

        let previous = self.cache.install(&region.id, entry).await;
        self.cache.record_errors(&notes).await;

        let prior: &[ComputeOffer] = previous.as_deref().map(|p| p.offers.as_slice()).unwrap_or(&[]);
        let events = detect_price_changes(&region.id, region.primary_az(), prior, &current, now);

        for event in events {
            debug!(region = %region.id, sku = %event.sku, old = event.old_price, new = event.new_price, "Price changed");
            match self.broadcaster.publish(event) {
                PublishOutcome::Queued => report.events_published += 1,
                PublishOutcome::Dropped | PublishOutcome::Closed => report.events_dropped += 1,
            }
        }

        if let Some(avg) = average {
            self.cache
                .record_price_point(
                    &region.id,
                    PricePoint {
                        timestamp: now,
                        hour: now.hour(),
                        avg_compute_spot: round_to(avg, 6),
                    },
                )
                .await;
        }

        if !notes.is_empty() {
            warn!(region = %region.id, notes = notes.len(), "Region refreshed with degraded sources");
        }

        report.regions += 1;
        report.offers += current.len();
        report.notes += notes.len();
    }
}

#[async_trait]
impl CycleRunner for CycleOrchestrator {
    async fn run_cycle(&self) -> Result<CycleReport> {
        if self.regions.is_empty() {
            return Err(NerveError::cycle("no regions configured"));
        }

        let _running = self.running.lock().await;
        let started = Instant::now();
        let cycle = self.cache.begin_cycle().await;
        info!(cycle, regions = self.regions.len(), "Starting scrape cycle");

        let mut report = CycleReport {
            cycle,
            ..Default::default()
        };
        for region in &self.regions {
            self.refresh_region(region, cycle, &mut report).await;
        }

        self.cache.complete_cycle(Utc::now()).await;
        report.duration = started.elapsed();

        info!(
            cycle,
            offers = report.offers,
            events = report.events_published,
            dropped = report.events_dropped,
            notes = report.notes,
            duration_ms = report.duration.as_millis() as u64,
            "Scrape cycle complete"
        );
        Ok(report)
    }
}

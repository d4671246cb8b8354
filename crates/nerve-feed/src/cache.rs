//! Snapshot cache
//!
//! Single source of truth for current world state. Only the orchestrator
//! writes (the writers are crate-private); every read hands back owned or
//! shared immutable data, so a reader can never observe a half-installed
//! region.

use crate::model::RegionSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// One sample of a region's average compute spot price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    /// When the sample was taken
    pub timestamp: DateTime<Utc>,

    /// UTC hour of day (0-23)
    pub hour: u32,

    /// Average compute spot price (USD/hour)
    pub avg_compute_spot: f64,
}

/// Status summary exposed to subscribers and the status route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedStatus {
    /// Completed cycles
    pub cycle_count: u64,

    /// When the last cycle completed
    pub last_cycle: Option<DateTime<Utc>>,

    /// Regions present in the snapshot
    pub regions: Vec<String>,

    /// Offers across all regions
    pub total_offers: usize,

    /// Most recent source error notes, oldest first
    pub recent_errors: Vec<String>,
}

/// Owned copy of the full snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    /// Completed cycles
    pub cycle_count: u64,

    /// When the last cycle completed
    pub last_cycle: Option<DateTime<Utc>>,

    /// Per-region state
    pub regions: BTreeMap<String, RegionSnapshot>,

    /// Source error notes from the latest cycle
    pub errors: Vec<String>,
}

#[derive(Debug, Default)]
struct CacheState {
    cycle_count: u64,
    last_cycle: Option<DateTime<Utc>>,
    regions: BTreeMap<String, Arc<RegionSnapshot>>,
    errors: VecDeque<String>,
    history: HashMap<String, VecDeque<PricePoint>>,
}

/// Shared snapshot of every tracked region
pub struct SnapshotCache {
    state: RwLock<CacheState>,
    error_capacity: usize,
    status_error_count: usize,
    history_capacity: usize,
}

impl SnapshotCache {
    /// Create an empty cache
    pub fn new(error_capacity: usize, status_error_count: usize, history_capacity: usize) -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            error_capacity: error_capacity.max(1),
            status_error_count,
            history_capacity: history_capacity.max(1),
        }
    }

    /// Start a cycle: clear the error ring and return the in-progress cycle number
    pub(crate) async fn begin_cycle(&self) -> u64 {
        let mut state = self.state.write().await;
        state.errors.clear();
        state.cycle_count + 1
    }

    /// Replace a region's entry, returning the previous one
    pub(crate) async fn install(
        &self,
        region_id: &str,
        entry: RegionSnapshot,
    ) -> Option<Arc<RegionSnapshot>> {
        let mut state = self.state.write().await;
        debug!(region = %region_id, cycle = entry.cycle, offers = entry.offers.len(), "Installing region snapshot");
        state.regions.insert(region_id.to_string(), Arc::new(entry))
    }

    /// Append source error notes, evicting the oldest past capacity
    pub(crate) async fn record_errors(&self, notes: &[String]) {
        if notes.is_empty() {
            return;
        }
        let mut state = self.state.write().await;
        for note in notes {
            if state.errors.len() == self.error_capacity {
                state.errors.pop_front();
            }
            state.errors.push_back(note.clone());
        }
    }

    /// Append a price history point for a region
    pub(crate) async fn record_price_point(&self, region_id: &str, point: PricePoint) {
        let mut state = self.state.write().await;
        let history = state.history.entry(region_id.to_string()).or_default();
        if history.len() == self.history_capacity {
            history.pop_front();
        }
        history.push_back(point);
    }

    /// Finish a cycle, returning the new cycle count
    pub(crate) async fn complete_cycle(&self, at: DateTime<Utc>) -> u64 {
        let mut state = self.state.write().await;
        state.cycle_count += 1;
        state.last_cycle = Some(at);
        state.cycle_count
    }

    /// Current entry for one region
    pub async fn region(&self, region_id: &str) -> Option<Arc<RegionSnapshot>> {
        self.state.read().await.regions.get(region_id).cloned()
    }

    /// Owned copy of the whole snapshot
    pub async fn snapshot(&self) -> Snapshot {
        let state = self.state.read().await;
        Snapshot {
            cycle_count: state.cycle_count,
            last_cycle: state.last_cycle,
            regions: state
                .regions
                .iter()
                .map(|(id, entry)| (id.clone(), entry.as_ref().clone()))
                .collect(),
            errors: state.errors.iter().cloned().collect(),
        }
    }

    /// Status summary
    pub async fn status(&self) -> FeedStatus {
        let state = self.state.read().await;
        let skip = state.errors.len().saturating_sub(self.status_error_count);
        FeedStatus {
            cycle_count: state.cycle_count,
            last_cycle: state.last_cycle,
            regions: state.regions.keys().cloned().collect(),
            total_offers: state.regions.values().map(|r| r.offers.len()).sum(),
            recent_errors: state.errors.iter().skip(skip).cloned().collect(),
        }
    }

    /// Price history for a region, oldest first
    pub async fn price_history(&self, region_id: &str) -> Vec<PricePoint> {
        self.state
            .read()
            .await
            .history
            .get(region_id)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Completed cycles
    pub async fn cycle_count(&self) -> u64 {
        self.state.read().await.cycle_count
    }
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new(50, 10, 1440)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{offer, region_snapshot};

    fn point(price: f64) -> PricePoint {
        PricePoint {
            timestamp: Utc::now(),
            hour: 12,
            avg_compute_spot: price,
        }
    }

    #[tokio::test]
    async fn test_empty_cache() {
        let cache = SnapshotCache::default();
        let status = cache.status().await;
        assert_eq!(status.cycle_count, 0);
        assert!(status.last_cycle.is_none());
        assert!(status.regions.is_empty());
        assert!(cache.region("francecentral").await.is_none());
        assert!(cache.price_history("francecentral").await.is_empty());
    }

    #[tokio::test]
    async fn test_install_returns_previous_entry() {
        let cache = SnapshotCache::default();
        let cycle = cache.begin_cycle().await;
        assert_eq!(cycle, 1);

        let first = cache
            .install("A", region_snapshot(cycle, vec![offer("A", "Standard_NC6s_v3", 1.0)]))
            .await;
        assert!(first.is_none());

        let previous = cache
            .install("A", region_snapshot(2, vec![offer("A", "Standard_NC6s_v3", 1.1)]))
            .await
            .unwrap();
        assert_eq!(previous.cycle, 1);
        assert_eq!(previous.offers[0].spot_price_usd_hr, 1.0);
        assert_eq!(cache.region("A").await.unwrap().cycle, 2);
    }

    #[tokio::test]
    async fn test_reader_keeps_its_copy_across_replacement() {
        let cache = SnapshotCache::default();
        cache.install("A", region_snapshot(1, vec![offer("A", "x", 1.0)])).await;
        let held = cache.region("A").await.unwrap();

        cache.install("A", region_snapshot(2, vec![])).await;

        assert_eq!(held.cycle, 1);
        assert_eq!(held.offers.len(), 1);
        assert!(cache.region("A").await.unwrap().offers.is_empty());
    }

    #[tokio::test]
    async fn test_cycle_counter_is_monotonic() {
        let cache = SnapshotCache::default();
        for expected in 1..=3 {
            assert_eq!(cache.begin_cycle().await, expected);
            assert_eq!(cache.complete_cycle(Utc::now()).await, expected);
        }
        assert_eq!(cache.cycle_count().await, 3);
        assert!(cache.status().await.last_cycle.is_some());
    }

    #[tokio::test]
    async fn test_error_ring_is_bounded_and_cleared_per_cycle() {
        let cache = SnapshotCache::new(5, 3, 10);
        let notes: Vec<String> = (0..8).map(|i| format!("note-{}", i)).collect();
        cache.record_errors(&notes).await;

        let snapshot = cache.snapshot().await;
        assert_eq!(snapshot.errors.len(), 5);
        assert_eq!(snapshot.errors[0], "note-3");

        let status = cache.status().await;
        assert_eq!(status.recent_errors, vec!["note-5", "note-6", "note-7"]);

        cache.begin_cycle().await;
        assert!(cache.snapshot().await.errors.is_empty());
    }

    #[tokio::test]
    async fn test_status_totals() {
        let cache = SnapshotCache::default();
        cache
            .install("A", region_snapshot(1, vec![offer("A", "x", 1.0), offer("A", "y", 2.0)]))
            .await;
        cache.install("B", region_snapshot(1, vec![offer("B", "x", 1.5)])).await;

        let status = cache.status().await;
        assert_eq!(status.total_offers, 3);
        assert_eq!(status.regions, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_price_history_is_bounded() {
        let cache = SnapshotCache::new(50, 10, 3);
        for i in 0..5 {
            cache.record_price_point("A", point(i as f64)).await;
        }
        let history = cache.price_history("A").await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].avg_compute_spot, 2.0);
        assert_eq!(history[2].avg_compute_spot, 4.0);
    }
}

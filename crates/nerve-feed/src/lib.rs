//! # NERVE Live Feed
//!
//! Continuously ingests GPU spot pricing, weather and grid carbon intensity
//! for a set of cloud regions, keeps one consistent in-memory snapshot, and
//! pushes price changes to live subscribers.
//!
//! ## Architecture
//!
//! ```text
//! Scheduler ──▶ CycleOrchestrator ──▶ sources (pricing ∥ weather ∥ carbon)
//!                      │
//!                      ├──▶ SnapshotCache  ◀── FeedQuery ◀── HTTP routes
//!                      │
//!                      └──▶ detector ──▶ EventBroadcaster ──▶ Dispatcher ──▶ subscribers
//! ```
//!
//! - Sources never fail: upstream problems become fallback values plus
//!   error notes recorded in the snapshot
//! - Each region's offers, weather and carbon are installed as one unit,
//!   stamped with the cycle that produced them
//! - Publishing never blocks the cycle; a full queue drops the newest event
//! - A subscriber whose send fails or times out is removed; the others are
//!   unaffected
//!
//! See [`orchestrator`] and [`broadcast`] for details.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod broadcast;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod curve;
pub mod detector;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod scheduler;
pub mod server;
pub mod sources;
pub mod views;

// ============================================================================
// Public exports
// ============================================================================

// Error handling
pub use error::{NerveError, Result};

// Configuration
pub use config::{FeedConfig, SourceEndpoints, SourceTimeouts};

// Data model
pub use model::{
    Availability, AvailabilityZone, CarbonIndex, CarbonProvenance, CarbonSample, ChangeEvent,
    ComputeOffer, HardwareSpec, HardwareTier, HourlyWeather, Region, RegionSnapshot,
    WeatherSample,
};

// Snapshot and cycles
pub use cache::{FeedStatus, PricePoint, Snapshot, SnapshotCache};
pub use orchestrator::{CycleOrchestrator, CycleReport, CycleRunner};
pub use scheduler::{Scheduler, SchedulerHandle};

// Fan-out
pub use broadcast::{
    BroadcastStats, DeliveryStatus, Dispatcher, EventBroadcaster, EventSink, FeedMessage,
    PublishOutcome, SubscriberId,
};

// Sources
pub use sources::{
    AzurePricingSource, CarbonIntensitySource, CarbonSource, OpenMeteoSource, PricingSource,
    SourceOutcome, WeatherSource,
};

// Read side
pub use curve::{PriceCurve, build_price_curve};
pub use views::{AnalysisContext, FeedQuery, RegionSummary, RegionView};

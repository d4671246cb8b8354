//! 24 hour spot price curve
//!
//! Hours covered by recorded history use the scraped averages; every other
//! hour comes from a diurnal model centred on the region's current average
//! compute spot price.

use crate::cache::PricePoint;
use crate::model::{RegionSnapshot, round_to};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::PI;

/// On-demand reference when the region has no offers (USD/hour)
pub const DEFAULT_ONDEMAND_REFERENCE: f64 = 3.58;

/// Base price used by the model when the region has no offers
pub const DEFAULT_MODEL_BASE: f64 = 0.5;

/// History points needed before scraped data is used
pub const MIN_HISTORY_POINTS: usize = 3;

const MODEL_AMPLITUDE: f64 = 0.15;
const MODEL_PEAK_HOUR: f64 = 14.0;

/// Where a curve point came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointSource {
    /// Average of recorded history for that hour
    Scraped,
    /// Diurnal model
    Model,
}

/// One hour of the curve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    /// Hour label (`00h`..`23h`)
    pub hour: String,

    /// Spot price (USD/hour)
    pub spot: f64,

    /// On-demand reference (USD/hour)
    pub ondemand: f64,

    /// Data origin
    pub source: PointSource,
}

/// Full 24 hour curve for a region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceCurve {
    /// Region id
    pub region_id: String,

    /// Hardware name of the reference offer, or `N/A`
    pub gpu_name: String,

    /// SKU of the reference offer, or `N/A`
    pub sku: String,

    /// Human readable description of how the curve was built
    pub source: String,

    /// History points available
    pub history_points: usize,

    /// 24 points, hour 0 first
    pub data: Vec<CurvePoint>,
}

/// Modelled spot price for an hour of the day
pub fn model_spot(base: f64, hour: u32) -> f64 {
    base * (1.0 + MODEL_AMPLITUDE * (2.0 * PI * (hour as f64 - MODEL_PEAK_HOUR) / 24.0).cos())
}

/// Build the curve from the region's current entry and its history
pub fn build_price_curve(
    region_id: &str,
    entry: Option<&RegionSnapshot>,
    history: &[PricePoint],
) -> PriceCurve {
    let reference = entry.and_then(|e| e.cheapest_compute());
    let ondemand = round_to(
        reference
            .map(|o| o.ondemand_price_usd_hr)
            .unwrap_or(DEFAULT_ONDEMAND_REFERENCE),
        4,
    );
    let base = entry
        .and_then(|e| e.average_compute_spot())
        .unwrap_or(DEFAULT_MODEL_BASE);

    let mut by_hour: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
    if history.len() >= MIN_HISTORY_POINTS {
        for point in history {
            by_hour.entry(point.hour).or_default().push(point.avg_compute_spot);
        }
    }

    let data: Vec<CurvePoint> = (0..24u32)
        .map(|hour| {
            let (spot, source) = match by_hour.get(&hour) {
                Some(prices) => (
                    prices.iter().sum::<f64>() / prices.len() as f64,
                    PointSource::Scraped,
                ),
                None => (model_spot(base, hour), PointSource::Model),
            };
            CurvePoint {
                hour: format!("{:02}h", hour),
                spot: round_to(spot, 4),
                ondemand,
                source,
            }
        })
        .collect();

    let source = if history.len() >= MIN_HISTORY_POINTS {
        let scraped = data
            .iter()
            .filter(|p| p.source == PointSource::Scraped)
            .count();
        format!("history ({}/24h real)", scraped)
    } else {
        format!("model (building history: {} points)", history.len())
    };

    PriceCurve {
        region_id: region_id.to_string(),
        gpu_name: reference
            .map(|o| o.hardware.name.clone())
            .unwrap_or_else(|| "N/A".to_string()),
        sku: reference
            .map(|o| o.sku.clone())
            .unwrap_or_else(|| "N/A".to_string()),
        source,
        history_points: history.len(),
        data,
    }
}

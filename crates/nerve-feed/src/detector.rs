//! Price change detection
//!
//! Compares one region's offers across consecutive cycles. Only SKUs seen in
//! both cycles can produce an event; appearing or vanishing SKUs are silent.

use crate::model::{AvailabilityZone, CURRENCY, ChangeEvent, ComputeOffer};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Emit one event per SKU whose spot price differs from the previous cycle
pub fn detect_price_changes(
    region_id: &str,
    az: Option<&AvailabilityZone>,
    previous: &[ComputeOffer],
    current: &[ComputeOffer],
    now: DateTime<Utc>,
) -> Vec<ChangeEvent> {
    let old_prices: HashMap<&str, f64> = previous
        .iter()
        .map(|o| (o.sku.as_str(), o.spot_price_usd_hr))
        .collect();

    current
        .iter()
        .filter_map(|offer| {
            let old_price = *old_prices.get(offer.sku.as_str())?;
            if old_price == offer.spot_price_usd_hr {
                return None;
            }
            Some(ChangeEvent {
                region: region_id.to_string(),
                az: az.map(|z| z.id.clone()),
                sku: offer.sku.clone(),
                hardware_name: offer.hardware.name.clone(),
                old_price,
                new_price: offer.spot_price_usd_hr,
                currency: CURRENCY.to_string(),
                timestamp: now,
            })
        })
        .collect()
}

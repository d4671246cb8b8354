//! Azure Retail Prices adapter
//!
//! Spot meters are queried per GPU family prefix, deduplicated by SKU and
//! enriched with the on-demand price of each surviving SKU.

use super::{PricingSource, SourceOutcome, get_json};
use crate::catalog::{GPU_FAMILY_PREFIXES, estimate_availability, identify_sku};
use crate::config::{SourceEndpoints, SourceTimeouts};
use crate::error::{NerveError, Result};
use crate::model::{ComputeOffer, HardwareSpec, Region, round_to};
use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// On-demand multiplier applied to spot when the on-demand lookup fails
const ONDEMAND_FALLBACK_MULTIPLIER: f64 = 5.0;

/// Savings reported alongside the fallback on-demand price
const ONDEMAND_FALLBACK_SAVINGS_PCT: f64 = 80.0;

#[derive(Debug, Deserialize)]
pub(crate) struct PriceResponse {
    #[serde(rename = "Items", default)]
    pub items: Vec<PriceItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct PriceItem {
    #[serde(rename = "armSkuName", default)]
    pub arm_sku_name: String,

    #[serde(rename = "retailPrice", default)]
    pub retail_price: f64,

    #[serde(rename = "meterName", default)]
    pub meter_name: String,
}

/// A spot meter that survived dedup and identification
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SpotQuote {
    pub sku: String,
    pub spot_price: f64,
    pub hardware: HardwareSpec,
}

/// Pricing adapter backed by the Azure Retail Prices API
pub struct AzurePricingSource {
    client: reqwest::Client,
    base_url: String,
    spot_timeout: Duration,
    ondemand_timeout: Duration,
}

impl AzurePricingSource {
    /// Create a new adapter
    pub fn new(client: reqwest::Client, endpoints: &SourceEndpoints, timeouts: &SourceTimeouts) -> Self {
        Self {
            client,
            base_url: endpoints.pricing_url.clone(),
            spot_timeout: Duration::from_secs(timeouts.spot_secs),
            ondemand_timeout: Duration::from_secs(timeouts.ondemand_secs),
        }
    }

    async fn fetch_spot_items(&self, region: &Region, prefix: &str) -> Result<Vec<PriceItem>> {
        let filter = format!(
            "serviceName eq 'Virtual Machines' and armRegionName eq '{}' \
             and contains(meterName,'Spot') and contains(armSkuName,'{}')",
            region.id, prefix
        );
        let response: PriceResponse = get_json(
            &self.client,
            &self.base_url,
            &[("$filter", filter)],
            self.spot_timeout,
        )
        .await?;
        Ok(response.items)
    }

    async fn fetch_ondemand(&self, region: &Region, sku: &str) -> Result<f64> {
        let filter = format!(
            "serviceName eq 'Virtual Machines' and armRegionName eq '{}' and armSkuName eq '{}'",
            region.id, sku
        );
        let response: PriceResponse = get_json(
            &self.client,
            &self.base_url,
            &[("$filter", filter)],
            self.ondemand_timeout,
        )
        .await?;
        select_ondemand_price(&response.items)
            .ok_or_else(|| NerveError::source(format!("no on-demand meter for {}", sku)))
    }
}

#[async_trait]
impl PricingSource for AzurePricingSource {
    async fn fetch_offers(&self, region: &Region) -> SourceOutcome<Vec<ComputeOffer>> {
        let mut notes = Vec::new();
        let mut items = Vec::new();

        for prefix in GPU_FAMILY_PREFIXES {
            match self.fetch_spot_items(region, prefix).await {
                Ok(batch) => {
                    debug!(region = %region.id, prefix, count = batch.len(), "Fetched spot meters");
                    items.extend(batch);
                }
                Err(e) => {
                    warn!(region = %region.id, prefix, error = %e, "Spot price query failed");
                    notes.push(format!("pricing[{}/{}]: {}", region.id, prefix, e));
                }
            }
        }

        let quotes = dedupe_spot_quotes(&items);
        let ondemand = join_all(quotes.iter().map(|q| self.fetch_ondemand(region, &q.sku))).await;

        let mut offers = Vec::with_capacity(quotes.len());
        let mut fallback_skus = Vec::new();
        for (quote, od) in quotes.into_iter().zip(ondemand) {
            match od {
                Ok(price) => offers.push(build_offer(&region.id, quote, Some(price))),
                Err(e) => {
                    debug!(region = %region.id, sku = %quote.sku, error = %e, "On-demand lookup failed, using fallback");
                    fallback_skus.push(quote.sku.clone());
                    offers.push(build_offer(&region.id, quote, None));
                }
            }
        }

        // one note per region, not per SKU
        if !fallback_skus.is_empty() {
            warn!(region = %region.id, skus = fallback_skus.len(), "On-demand lookups failed, using fallback prices");
            notes.push(format!(
                "pricing[{}]: on-demand lookup failed for {} SKU(s): {}",
                region.id,
                fallback_skus.len(),
                fallback_skus.join(", ")
            ));
        }

        info!(region = %region.id, offers = offers.len(), "Priced GPU offers");

        SourceOutcome {
            value: offers,
            notes,
        }
    }
}

/// Keep the cheapest meter per SKU, dropping SKUs we cannot identify
pub(crate) fn dedupe_spot_quotes(items: &[PriceItem]) -> Vec<SpotQuote> {
    let mut cheapest: BTreeMap<&str, f64> = BTreeMap::new();
    for item in items {
        if item.arm_sku_name.is_empty() {
            continue;
        }
        cheapest
            .entry(item.arm_sku_name.as_str())
            .and_modify(|price| {
                if item.retail_price < *price {
                    *price = item.retail_price;
                }
            })
            .or_insert(item.retail_price);
    }

    cheapest
        .into_iter()
        .filter_map(|(sku, price)| {
            identify_sku(sku).map(|hardware| SpotQuote {
                sku: sku.to_string(),
                spot_price: round_to(price, 6),
                hardware,
            })
        })
        .collect()
}

/// First meter that is neither spot nor low priority, if it has a usable price
pub(crate) fn select_ondemand_price(items: &[PriceItem]) -> Option<f64> {
    items
        .iter()
        .find(|item| !item.meter_name.contains("Spot") && !item.meter_name.contains("Low Priority"))
        .map(|item| item.retail_price)
        .filter(|price| *price > 0.0)
}

/// Combine a spot quote with its on-demand price (or the fallback)
pub(crate) fn build_offer(region_id: &str, quote: SpotQuote, ondemand: Option<f64>) -> ComputeOffer {
    let (ondemand_price, savings_pct) = match ondemand {
        Some(od) => (
            round_to(od, 4),
            round_to((1.0 - quote.spot_price / od) * 100.0, 1),
        ),
        None => (
            round_to(quote.spot_price * ONDEMAND_FALLBACK_MULTIPLIER, 4),
            ONDEMAND_FALLBACK_SAVINGS_PCT,
        ),
    };

    ComputeOffer {
        region: region_id.to_string(),
        availability: estimate_availability(quote.spot_price, quote.hardware.tier),
        sku: quote.sku,
        hardware: quote.hardware,
        spot_price_usd_hr: quote.spot_price,
        ondemand_price_usd_hr: ondemand_price,
        savings_pct,
    }
}

//! Static identification tables
//!
//! - SKU → hardware spec for the GPU families we track
//! - Built-in region topology (used when no config file overrides it)
//! - Default grid carbon factors per region

use crate::model::{Availability, CarbonIndex, HardwareSpec, HardwareTier, Region};

/// GPU family prefixes queried from the pricing API
/// (NC = compute, NV = visualization, ND = deep learning)
pub const GPU_FAMILY_PREFIXES: [&str; 3] = ["NC", "NV", "ND"];

/// Spot price above which high-tier hardware is considered contested (USD/hour)
const HIGH_TIER_CONTESTED_PRICE: f64 = 2.0;

/// One row of the SKU table
struct SkuEntry {
    key: &'static str,
    name: &'static str,
    gpu_count: u32,
    vcpus: u32,
    ram_gb: u32,
    tier: HardwareTier,
}

const fn sku(
    key: &'static str,
    name: &'static str,
    gpu_count: u32,
    vcpus: u32,
    ram_gb: u32,
    tier: HardwareTier,
) -> SkuEntry {
    SkuEntry {
        key,
        name,
        gpu_count,
        vcpus,
        ram_gb,
        tier,
    }
}

// Matched by substring in order, so a key must not be a substring of an
// earlier SKU it is not meant to match.
const SKU_TABLE: &[SkuEntry] = &[
    sku("nc6s_v3", "Tesla V100 (16GB)", 1, 6, 112, HardwareTier::High),
    sku("nc12s_v3", "Tesla V100 (16GB)", 2, 12, 224, HardwareTier::High),
    sku("nc24s_v3", "Tesla V100 (16GB)", 4, 24, 448, HardwareTier::High),
    sku("nc24rs_v3", "Tesla V100 (16GB)", 4, 24, 448, HardwareTier::High),
    sku("nc4as_t4_v3", "Tesla T4 (16GB)", 1, 4, 28, HardwareTier::Mid),
    sku("nc8as_t4_v3", "Tesla T4 (16GB)", 1, 8, 56, HardwareTier::Mid),
    sku("nc16as_t4_v3", "Tesla T4 (16GB)", 1, 16, 110, HardwareTier::Mid),
    sku("nc64as_t4_v3", "Tesla T4 (16GB)", 4, 64, 440, HardwareTier::Mid),
    sku("nc8ads_a10_v4", "A10 (24GB)", 1, 8, 55, HardwareTier::Mid),
    sku("nc16ads_a10_v4", "A10 (24GB)", 1, 16, 110, HardwareTier::Mid),
    sku("nc32ads_a10_v4", "A10 (24GB)", 2, 32, 220, HardwareTier::Mid),
    sku("nc48ads_a100_v4", "A100 (80GB)", 2, 48, 440, HardwareTier::Premium),
    sku("nc96ads_a100_v4", "A100 (80GB)", 4, 96, 880, HardwareTier::Premium),
    sku("ncc40ads_h100_v5", "H100 (80GB)", 1, 40, 320, HardwareTier::Premium),
    sku("nc80adis_h100_v5", "H100 (80GB)", 2, 80, 640, HardwareTier::Premium),
    sku("nv6ads_a10_v5", "A10 (6GB slice)", 1, 6, 55, HardwareTier::Low),
    sku("nv12ads_a10_v5", "A10 (12GB slice)", 1, 12, 110, HardwareTier::Low),
    sku("nv18ads_a10_v5", "A10 (18GB slice)", 1, 18, 220, HardwareTier::Mid),
    sku("nv36ads_a10_v5", "A10 (24GB)", 1, 36, 440, HardwareTier::Mid),
    sku("nv4as_v4", "Radeon MI25 (4GB)", 1, 4, 14, HardwareTier::Low),
    sku("nv8as_v4", "Radeon MI25 (8GB)", 1, 8, 28, HardwareTier::Low),
    sku("nv16as_v4", "Radeon MI25 (16GB)", 1, 16, 56, HardwareTier::Low),
    sku("nv32as_v4", "Radeon MI25 (32GB)", 1, 32, 112, HardwareTier::Low),
    sku("nv12s_v3", "Tesla M60 (8GB)", 1, 12, 112, HardwareTier::Low),
    sku("nv24s_v3", "Tesla M60 (16GB)", 2, 24, 224, HardwareTier::Low),
    sku("nv48s_v3", "Tesla M60 (32GB)", 4, 48, 448, HardwareTier::Low),
];

/// Map a provider SKU name to its hardware spec
///
/// Returns `None` for SKUs we do not track; the pricing adapter drops those.
pub fn identify_sku(sku_name: &str) -> Option<HardwareSpec> {
    let lowered = sku_name.to_ascii_lowercase();
    SKU_TABLE
        .iter()
        .find(|entry| lowered.contains(entry.key))
        .map(|entry| HardwareSpec {
            name: entry.name.to_string(),
            gpu_count: entry.gpu_count,
            vcpus: entry.vcpus,
            ram_gb: entry.ram_gb,
            tier: entry.tier,
        })
}

/// Estimate spot availability from hardware tier and price
pub fn estimate_availability(spot_price: f64, tier: HardwareTier) -> Availability {
    match tier {
        HardwareTier::Premium => Availability::Low,
        HardwareTier::High if spot_price > HIGH_TIER_CONTESTED_PRICE => Availability::Medium,
        _ => Availability::High,
    }
}

/// Static carbon factor used when no live measurement is available
#[derive(Debug, Clone, PartialEq)]
pub struct CarbonDefault {
    /// Intensity in gCO2eq/kWh
    pub gco2_kwh: f64,

    /// Index label
    pub index: CarbonIndex,

    /// Provenance text
    pub source: &'static str,
}

/// Default carbon factor for a region
///
/// Unknown regions get the France Central factor.
pub fn default_carbon(region_id: &str) -> CarbonDefault {
    match region_id {
        "westeurope" => CarbonDefault {
            gco2_kwh: 328.0,
            index: CarbonIndex::Moderate,
            source: "NL gas-dominated grid",
        },
        "uksouth" => CarbonDefault {
            gco2_kwh: 120.0,
            index: CarbonIndex::Low,
            source: "Carbon Intensity UK API",
        },
        _ => CarbonDefault {
            gco2_kwh: 56.0,
            index: CarbonIndex::Low,
            source: "RTE (nuclear-dominated grid)",
        },
    }
}

/// Built-in tracked regions
pub fn default_regions() -> Vec<Region> {
    vec![
        Region::new("francecentral", "France Central")
            .with_location("Paris, France")
            .with_coordinates(48.8566, 2.3522)
            .with_timezone("Europe/Paris")
            .with_az("fr-central-1", "France Central AZ-1")
            .with_az("fr-central-2", "France Central AZ-2")
            .with_az("fr-central-3", "France Central AZ-3"),
        Region::new("westeurope", "West Europe")
            .with_location("Amsterdam, Netherlands")
            .with_coordinates(52.3676, 4.9041)
            .with_timezone("Europe/Amsterdam")
            .with_az("we-1", "West Europe AZ-1")
            .with_az("we-2", "West Europe AZ-2")
            .with_az("we-3", "West Europe AZ-3"),
        Region::new("uksouth", "UK South")
            .with_location("London, UK")
            .with_coordinates(51.5074, -0.1278)
            .with_timezone("Europe/London")
            .with_az("uk-south-1", "UK South AZ-1")
            .with_az("uk-south-2", "UK South AZ-2")
            .with_az("uk-south-3", "UK South AZ-3")
            .with_live_carbon(true),
    ]
}

//! Core data model
//!
//! Everything a cycle produces is replaced wholesale, never patched: a
//! [`RegionSnapshot`] bundles the offers, weather and carbon fetched for one
//! region in one cycle so the cache can swap it in as a single unit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// SKU prefixes counted as compute GPUs (as opposed to visualization GPUs)
pub const COMPUTE_SKU_PREFIXES: [&str; 2] = ["Standard_NC", "Standard_ND"];

/// Currency every price in the feed is quoted in
pub const CURRENCY: &str = "USD";

/// An isolated failure domain within a region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityZone {
    /// AZ identifier (e.g. `fr-central-1`)
    pub id: String,

    /// Display name
    pub name: String,
}

impl AvailabilityZone {
    /// Create a new availability zone descriptor
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Static identity of a tracked region
///
/// Defined by configuration and immutable once the process has started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    /// Provider region id (e.g. `francecentral`)
    pub id: String,

    /// Display name
    pub name: String,

    /// Cloud provider
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Human readable location
    #[serde(default)]
    pub location: String,

    /// Latitude in degrees
    pub lat: f64,

    /// Longitude in degrees
    pub lng: f64,

    /// IANA timezone used for weather queries
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Ordered availability zones
    #[serde(default)]
    pub azs: Vec<AvailabilityZone>,

    /// Whether this region has a live carbon-intensity API
    #[serde(default)]
    pub live_carbon: bool,
}

fn default_provider() -> String {
    "azure".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Region {
    /// Create a region with no AZs at (0, 0)
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            provider: default_provider(),
            location: String::new(),
            lat: 0.0,
            lng: 0.0,
            timezone: default_timezone(),
            azs: Vec::new(),
            live_carbon: false,
        }
    }

    /// Set the location label
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    /// Set coordinates
    pub fn with_coordinates(mut self, lat: f64, lng: f64) -> Self {
        self.lat = lat;
        self.lng = lng;
        self
    }

    /// Set timezone
    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    /// Append an availability zone
    pub fn with_az(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.azs.push(AvailabilityZone::new(id, name));
        self
    }

    /// Mark this region as covered by the live carbon API
    pub fn with_live_carbon(mut self, live: bool) -> Self {
        self.live_carbon = live;
        self
    }

    /// First AZ, used to label price events
    pub fn primary_az(&self) -> Option<&AvailabilityZone> {
        self.azs.first()
    }
}

/// Coarse hardware tier from the identification table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareTier {
    /// Older or sliced accelerators
    Low,
    /// Current mainstream accelerators
    Mid,
    /// Previous-generation datacenter accelerators
    High,
    /// Flagship accelerators (A100, H100)
    Premium,
}

/// Resolved hardware description for a SKU
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareSpec {
    /// Accelerator name (e.g. `A100 (80GB)`)
    pub name: String,

    /// Number of accelerators
    pub gpu_count: u32,

    /// Number of vCPUs
    pub vcpus: u32,

    /// Memory in GB
    pub ram_gb: u32,

    /// Hardware tier
    pub tier: HardwareTier,
}

/// Estimated spot availability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    /// Capacity is scarce
    Low,
    /// Capacity is contested
    Medium,
    /// Capacity is plentiful
    High,
}

/// One priceable unit, keyed by (region, SKU)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeOffer {
    /// Region id
    pub region: String,

    /// Provider SKU (e.g. `Standard_NC24ads_A100_v4`)
    pub sku: String,

    /// Hardware behind the SKU
    pub hardware: HardwareSpec,

    /// Current spot price (USD/hour)
    pub spot_price_usd_hr: f64,

    /// Current on-demand price (USD/hour)
    pub ondemand_price_usd_hr: f64,

    /// Savings of spot over on-demand, in percent
    pub savings_pct: f64,

    /// Estimated availability tier
    pub availability: Availability,
}

impl ComputeOffer {
    /// Whether the SKU belongs to a compute GPU family
    pub fn is_compute(&self) -> bool {
        COMPUTE_SKU_PREFIXES
            .iter()
            .any(|prefix| self.sku.starts_with(prefix))
    }
}

/// One hour of forecast data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyWeather {
    /// Hour label as returned upstream (`2024-05-01T13:00`) or `HH:00`
    pub hour: String,

    /// Temperature (°C)
    pub temp_c: f64,

    /// Wind speed (km/h)
    pub wind_kmh: f64,

    /// Direct solar radiation (W/m²)
    pub solar_wm2: f64,
}

/// Current weather plus today's hourly forecast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSample {
    /// Temperature at the current hour (°C)
    pub current_temp_c: f64,

    /// Wind speed at the current hour (km/h)
    pub current_wind_kmh: f64,

    /// Direct solar radiation at the current hour (W/m²)
    pub current_solar_wm2: f64,

    /// Hourly forecast for today, ordered, at most 24 entries.
    /// Empty means the forecast is unavailable, not zero.
    pub hourly: Vec<HourlyWeather>,
}

impl WeatherSample {
    /// Default temperature when the source is unavailable
    pub const FALLBACK_TEMP_C: f64 = 10.0;
    /// Default wind speed when the source is unavailable
    pub const FALLBACK_WIND_KMH: f64 = 15.0;
    /// Default solar radiation when the source is unavailable
    pub const FALLBACK_SOLAR_WM2: f64 = 0.0;

    /// Fixed defaults used when the weather source fails
    pub fn fallback() -> Self {
        Self {
            current_temp_c: Self::FALLBACK_TEMP_C,
            current_wind_kmh: Self::FALLBACK_WIND_KMH,
            current_solar_wm2: Self::FALLBACK_SOLAR_WM2,
            hourly: Vec::new(),
        }
    }

    /// Hourly forecast, or `None` if the forecast is unavailable
    pub fn forecast(&self) -> Option<&[HourlyWeather]> {
        if self.hourly.is_empty() {
            None
        } else {
            Some(&self.hourly)
        }
    }
}

/// Coarse carbon-intensity label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CarbonIndex {
    /// Very low intensity
    #[serde(rename = "very low")]
    VeryLow,
    /// Low intensity
    #[serde(rename = "low")]
    Low,
    /// Moderate intensity
    #[serde(rename = "moderate")]
    Moderate,
    /// High intensity
    #[serde(rename = "high")]
    High,
    /// Very high intensity
    #[serde(rename = "very high")]
    VeryHigh,
}

impl CarbonIndex {
    /// Parse the label used by the carbon API
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "very low" => Some(Self::VeryLow),
            "low" => Some(Self::Low),
            "moderate" => Some(Self::Moderate),
            "high" => Some(Self::High),
            "very high" => Some(Self::VeryHigh),
            _ => None,
        }
    }

    /// Label as used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VeryLow => "very low",
            Self::Low => "low",
            Self::Moderate => "moderate",
            Self::High => "high",
            Self::VeryHigh => "very high",
        }
    }
}

impl fmt::Display for CarbonIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a carbon figure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CarbonProvenance {
    /// Measured (or forecast) by the live API this cycle
    Live,
    /// Static regional default
    Default,
}

/// Grid carbon intensity for a region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarbonSample {
    /// Intensity in gCO2eq/kWh
    pub gco2_kwh: f64,

    /// Coarse index label
    pub index: CarbonIndex,

    /// Live value or static default
    pub provenance: CarbonProvenance,

    /// Textual source description
    pub source: String,

    /// Start of the measurement window (live values only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,

    /// End of the measurement window (live values only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

impl CarbonSample {
    /// Whether this value came from the live API
    pub fn is_live(&self) -> bool {
        self.provenance == CarbonProvenance::Live
    }
}

/// Everything fetched for one region in one cycle
///
/// Installed into the cache as one unit so offers, weather and carbon always
/// share the same `cycle`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionSnapshot {
    /// Cycle number that produced this entry
    pub cycle: u64,

    /// When the region finished fetching
    pub fetched_at: DateTime<Utc>,

    /// Priced offers (possibly empty, never absent)
    pub offers: Vec<ComputeOffer>,

    /// Weather sample
    pub weather: WeatherSample,

    /// Carbon sample
    pub carbon: CarbonSample,
}

impl RegionSnapshot {
    /// Cheapest offer, restricted to compute SKUs when any exist
    pub fn cheapest_compute(&self) -> Option<&ComputeOffer> {
        let compute: Vec<&ComputeOffer> = self.offers.iter().filter(|o| o.is_compute()).collect();
        let pool: Vec<&ComputeOffer> = if compute.is_empty() {
            self.offers.iter().collect()
        } else {
            compute
        };
        pool.into_iter()
            .min_by(|a, b| a.spot_price_usd_hr.total_cmp(&b.spot_price_usd_hr))
    }

    /// Cheapest offer across all SKUs
    pub fn cheapest(&self) -> Option<&ComputeOffer> {
        self.offers
            .iter()
            .min_by(|a, b| a.spot_price_usd_hr.total_cmp(&b.spot_price_usd_hr))
    }

    /// Average spot price of compute SKUs (all SKUs if there are no compute ones)
    pub fn average_compute_spot(&self) -> Option<f64> {
        let compute: Vec<f64> = self
            .offers
            .iter()
            .filter(|o| o.is_compute())
            .map(|o| o.spot_price_usd_hr)
            .collect();
        let prices = if compute.is_empty() {
            self.offers.iter().map(|o| o.spot_price_usd_hr).collect()
        } else {
            compute
        };
        if prices.is_empty() {
            None
        } else {
            Some(prices.iter().sum::<f64>() / prices.len() as f64)
        }
    }
}

/// A previously observed offer changed price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Region id
    pub region: String,

    /// AZ the event is labelled with (the region's first AZ)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub az: Option<String>,

    /// SKU whose price changed
    pub sku: String,

    /// Hardware name of the SKU
    pub hardware_name: String,

    /// Spot price in the previous cycle
    pub old_price: f64,

    /// Spot price in this cycle
    pub new_price: f64,

    /// Currency of both prices
    pub currency: String,

    /// When the change was detected
    pub timestamp: DateTime<Utc>,
}

/// Round to a fixed number of decimals
pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

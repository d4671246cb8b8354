//! Open-Meteo forecast adapter

use super::{SourceOutcome, WeatherSource, get_json};
use crate::config::{SourceEndpoints, SourceTimeouts};
use crate::error::{NerveError, Result};
use crate::model::{HourlyWeather, Region, WeatherSample};
use async_trait::async_trait;
use chrono::{Timelike, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

const HOURS_PER_DAY: usize = 24;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ForecastResponse {
    #[serde(default)]
    pub hourly: HourlySeries,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct HourlySeries {
    #[serde(default)]
    pub time: Vec<String>,

    #[serde(default)]
    pub temperature_2m: Vec<Option<f64>>,

    #[serde(default)]
    pub windspeed_10m: Vec<Option<f64>>,

    #[serde(default)]
    pub direct_radiation: Vec<Option<f64>>,
}

/// Weather adapter backed by the Open-Meteo forecast API
pub struct OpenMeteoSource {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl OpenMeteoSource {
    /// Create a new adapter
    pub fn new(client: reqwest::Client, endpoints: &SourceEndpoints, timeouts: &SourceTimeouts) -> Self {
        Self {
            client,
            base_url: endpoints.weather_url.clone(),
            timeout: Duration::from_secs(timeouts.weather_secs),
        }
    }

    async fn fetch_forecast(&self, region: &Region) -> Result<ForecastResponse> {
        let query = [
            ("latitude", region.lat.to_string()),
            ("longitude", region.lng.to_string()),
            (
                "hourly",
                "temperature_2m,windspeed_10m,direct_radiation".to_string(),
            ),
            ("timezone", region.timezone.clone()),
            ("forecast_days", "1".to_string()),
        ];
        get_json(&self.client, &self.base_url, &query, self.timeout).await
    }
}

#[async_trait]
impl WeatherSource for OpenMeteoSource {
    async fn fetch_weather(&self, region: &Region) -> SourceOutcome<WeatherSample> {
        let hour = Utc::now().hour() as usize;
        let result = self
            .fetch_forecast(region)
            .await
            .and_then(|forecast| sample_from_forecast(&forecast.hourly, hour));

        match result {
            Ok(sample) => {
                debug!(
                    region = %region.id,
                    temp_c = sample.current_temp_c,
                    wind_kmh = sample.current_wind_kmh,
                    "Fetched weather"
                );
                SourceOutcome::ok(sample)
            }
            Err(e) => {
                warn!(region = %region.id, error = %e, "Weather fetch failed, using defaults");
                SourceOutcome::fallback(
                    WeatherSample::fallback(),
                    format!("weather[{}]: {}", region.id, e),
                )
            }
        }
    }
}

/// Build a sample from the hourly series, reading "current" at `hour`
///
/// Out-of-range hours read the first sample. A series with no temperatures
/// is treated as a failure.
pub(crate) fn sample_from_forecast(series: &HourlySeries, hour: usize) -> Result<WeatherSample> {
    if series.temperature_2m.is_empty() {
        return Err(NerveError::source("forecast has no hourly temperatures"));
    }

    let at = |values: &[Option<f64>], default: f64| -> f64 {
        values
            .get(hour)
            .or_else(|| values.first())
            .copied()
            .flatten()
            .unwrap_or(default)
    };

    let current_temp_c = at(&series.temperature_2m, WeatherSample::FALLBACK_TEMP_C);
    let current_wind_kmh = at(&series.windspeed_10m, WeatherSample::FALLBACK_WIND_KMH);
    let current_solar_wm2 = at(&series.direct_radiation, WeatherSample::FALLBACK_SOLAR_WM2);

    let hourly = series
        .temperature_2m
        .iter()
        .take(HOURS_PER_DAY)
        .enumerate()
        .map(|(i, temp)| HourlyWeather {
            hour: series
                .time
                .get(i)
                .cloned()
                .unwrap_or_else(|| format!("{:02}:00", i)),
            temp_c: temp.unwrap_or(WeatherSample::FALLBACK_TEMP_C),
            wind_kmh: series
                .windspeed_10m
                .get(i)
                .copied()
                .flatten()
                .unwrap_or(WeatherSample::FALLBACK_WIND_KMH),
            solar_wm2: series
                .direct_radiation
                .get(i)
                .copied()
                .flatten()
                .unwrap_or(WeatherSample::FALLBACK_SOLAR_WM2),
        })
        .collect();

    Ok(WeatherSample {
        current_temp_c,
        current_wind_kmh,
        current_solar_wm2,
        hourly,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(hours: usize) -> HourlySeries {
        HourlySeries {
            time: (0..hours).map(|h| format!("2024-05-01T{:02}:00", h)).collect(),
            temperature_2m: (0..hours).map(|h| Some(h as f64)).collect(),
            windspeed_10m: (0..hours).map(|h| Some(10.0 + h as f64)).collect(),
            direct_radiation: (0..hours).map(|h| Some(100.0 * h as f64)).collect(),
        }
    }

    #[test]
    fn test_parse_forecast_response() {
        let json = r#"{
            "latitude": 48.86, "longitude": 2.35,
            "hourly": {
                "time": ["2024-05-01T00:00", "2024-05-01T01:00"],
                "temperature_2m": [11.2, null],
                "windspeed_10m": [7.5, 8.1],
                "direct_radiation": [0.0, 0.0]
            }
        }"#;
        let response: ForecastResponse = serde_json::from_str(json).unwrap();
        let sample = sample_from_forecast(&response.hourly, 0).unwrap();

        assert_eq!(sample.current_temp_c, 11.2);
        assert_eq!(sample.hourly.len(), 2);
        assert_eq!(sample.hourly[1].temp_c, WeatherSample::FALLBACK_TEMP_C);
        assert_eq!(sample.hourly[1].wind_kmh, 8.1);
    }

    #[test]
    fn test_current_reads_requested_hour() {
        let sample = sample_from_forecast(&series(24), 13).unwrap();
        assert_eq!(sample.current_temp_c, 13.0);
        assert_eq!(sample.current_wind_kmh, 23.0);
        assert_eq!(sample.current_solar_wm2, 1300.0);
        assert_eq!(sample.hourly.len(), 24);
        assert_eq!(sample.hourly[5].hour, "2024-05-01T05:00");
    }

    #[test]
    fn test_out_of_range_hour_clamps_to_first_sample() {
        let sample = sample_from_forecast(&series(6), 20).unwrap();
        assert_eq!(sample.current_temp_c, 0.0);
        assert_eq!(sample.current_wind_kmh, 10.0);
        assert_eq!(sample.current_solar_wm2, 0.0);
    }

    #[test]
    fn test_forecast_capped_at_one_day() {
        let sample = sample_from_forecast(&series(48), 0).unwrap();
        assert_eq!(sample.hourly.len(), 24);
    }

    #[test]
    fn test_missing_time_labels_use_hour_format() {
        let mut s = series(3);
        s.time.clear();
        let sample = sample_from_forecast(&s, 0).unwrap();
        assert_eq!(sample.hourly[2].hour, "02:00");
    }

    #[test]
    fn test_empty_series_is_error() {
        assert!(sample_from_forecast(&HourlySeries::default(), 0).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_falls_back() {
        let endpoints = SourceEndpoints {
            weather_url: "http://127.0.0.1:1/forecast".to_string(),
            ..Default::default()
        };
        let source = OpenMeteoSource::new(reqwest::Client::new(), &endpoints, &SourceTimeouts::default());
        let region = Region::new("westeurope", "West Europe").with_coordinates(52.37, 4.90);

        let outcome = source.fetch_weather(&region).await;
        assert_eq!(outcome.value, WeatherSample::fallback());
        assert!(outcome.value.forecast().is_none());
        assert_eq!(outcome.notes.len(), 1);
        assert!(outcome.notes[0].starts_with("weather[westeurope]"));
    }
}

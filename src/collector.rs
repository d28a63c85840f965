//! Measurement collection from OpenAQ with a synthetic fallback.
//!
//! Fetching is best-effort: any HTTP, decode or empty-result failure is
//! logged and answered from [`SyntheticSource`], which generates readings
//! from per-city baselines. Requests are never retried here.

use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Duration, DurationRound, Timelike, Utc};
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::models::{Concentrations, Measurement, MeasurementSeries, RawMeasurement};
use crate::Config;

// ---

const COUNTRY: &str = "IN";
const LATEST_LIMIT: u32 = 1000;
const HISTORY_LIMIT: u32 = 10_000;

/// Baseline levels and plausible current ranges for one city.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CityProfile {
    // ---
    pub pm25: f64,
    pub pm10: f64,
    pub no2: f64,
    pub pm25_range: (f64, f64),
    pub pm10_range: (f64, f64),
    pub no2_range: (f64, f64),
}

impl CityProfile {
    // ---
    pub fn for_city(city: &str) -> Self {
        // ---
        let (base, pm25_range, pm10_range, no2_range) = match city {
            "Delhi" => ((120.0, 180.0, 50.0), (80.0, 200.0), (120.0, 300.0), (40.0, 80.0)),
            "Mumbai" => ((90.0, 140.0, 45.0), (60.0, 150.0), (90.0, 200.0), (35.0, 70.0)),
            "Kolkata" => ((110.0, 170.0, 40.0), (70.0, 180.0), (100.0, 250.0), (30.0, 65.0)),
            "Chennai" => ((70.0, 110.0, 35.0), (50.0, 120.0), (80.0, 160.0), (25.0, 55.0)),
            "Bangalore" => ((65.0, 100.0, 30.0), (45.0, 110.0), (70.0, 150.0), (20.0, 50.0)),
            "Hyderabad" => ((80.0, 130.0, 38.0), (55.0, 130.0), (85.0, 180.0), (28.0, 60.0)),
            _ => ((85.0, 130.0, 40.0), (60.0, 140.0), (90.0, 180.0), (30.0, 60.0)),
        };
        CityProfile {
            pm25: base.0,
            pm10: base.1,
            no2: base.2,
            pm25_range,
            pm10_range,
            no2_range,
        }
    }
}

/// Representative coordinates for generated readings.
fn city_coordinates(city: &str) -> (f64, f64) {
    if city == "Delhi" {
        (28.6139, 77.2090)
    } else {
        (19.0760, 72.8777)
    }
}

/// Generates plausible readings when no live data is available.
///
/// Uses one RNG behind a lock so a seeded source is reproducible.
#[derive(Debug)]
pub struct SyntheticSource {
    rng: Mutex<StdRng>,
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }
}

impl SyntheticSource {
    // ---
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// One current reading drawn uniformly from the city's ranges.
    pub fn current(&self, city: &str, now: DateTime<Utc>) -> RawMeasurement {
        // ---
        let profile = CityProfile::for_city(city);
        let (latitude, longitude) = city_coordinates(city);
        let mut rng = self.rng.lock();

        let mut draw = |(lo, hi): (f64, f64)| rng.gen_range(lo..hi);
        let pollutants = Concentrations {
            pm25: Some(draw(profile.pm25_range)),
            pm10: Some(draw(profile.pm10_range)),
            no2: Some(draw(profile.no2_range)),
            so2: Some(draw((10.0, 40.0))),
            o3: Some(draw((20.0, 80.0))),
            co: Some(draw((0.5, 3.0))),
        };

        RawMeasurement {
            timestamp: now,
            city: city.to_string(),
            location: format!("{city} Central"),
            latitude: Some(latitude),
            longitude: Some(longitude),
            pollutants,
        }
    }

    /// Hourly readings for the `days` before `end`, inclusive of both ends.
    ///
    /// Each hour scales the city baseline by a diurnal factor, a seasonal
    /// factor and N(1, 0.1) noise.
    pub fn historical(&self, city: &str, end: DateTime<Utc>, days: u32) -> Vec<RawMeasurement> {
        // ---
        let profile = CityProfile::for_city(city);
        let (latitude, longitude) = city_coordinates(city);
        let end = end.duration_trunc(Duration::hours(1)).unwrap_or(end);
        let hours = i64::from(days) * 24;
        let mut rng = self.rng.lock();

        (0..=hours)
            .map(|i| {
                let ts = end - Duration::hours(hours - i);
                let hour_factor = 1.0 + 0.3 * (2.0 * PI * f64::from(ts.hour()) / 24.0).sin();
                let seasonal_factor =
                    1.0 + 0.4 * (2.0 * PI * f64::from(ts.ordinal()) / 365.0).sin();
                let z: f64 = rng.sample(StandardNormal);
                let noise = 1.0 + 0.1 * z;
                let m = hour_factor * seasonal_factor * noise;

                RawMeasurement {
                    timestamp: ts,
                    city: city.to_string(),
                    location: format!("{city} Central"),
                    latitude: Some(latitude),
                    longitude: Some(longitude),
                    pollutants: Concentrations {
                        pm25: Some((profile.pm25 * m).max(5.0)),
                        pm10: Some((profile.pm10 * m).max(10.0)),
                        no2: Some((profile.no2 * m).max(5.0)),
                        so2: Some((15.0 * m).max(2.0)),
                        o3: Some((40.0 * m).max(10.0)),
                        co: Some((1.5 * m).max(0.1)),
                    },
                }
            })
            .collect()
    }
}

/// One parameter value at one location, before pivoting.
#[derive(Debug, Clone)]
struct ParameterReading {
    timestamp: DateTime<Utc>,
    location: String,
    city: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
    parameter: String,
    value: f64,
}

#[derive(Debug, Deserialize)]
struct Coordinates {
    latitude: Option<f64>,
    longitude: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LatestMeasurement {
    parameter: String,
    value: f64,
    last_updated: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct LatestResult {
    location: Option<String>,
    city: Option<String>,
    coordinates: Option<Coordinates>,
    #[serde(default)]
    measurements: Vec<LatestMeasurement>,
}

#[derive(Debug, Deserialize)]
struct MeasurementDate {
    utc: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct HistoricalResult {
    date: MeasurementDate,
    location: Option<String>,
    city: Option<String>,
    parameter: String,
    value: f64,
}

/// Parse the `results` array of an OpenAQ `/latest` response.
fn parse_latest(body: &serde_json::Value, city: &str) -> Vec<ParameterReading> {
    // ---
    let mut out = Vec::new();
    for (i, item) in results(body).iter().enumerate() {
        let result = match serde_json::from_value::<LatestResult>(item.clone()) {
            Ok(r) => r,
            Err(e) => {
                debug!("Skipping latest result {}: {} - Raw item: {}", i, e, item);
                continue;
            }
        };
        let (latitude, longitude) = result
            .coordinates
            .map_or((None, None), |c| (c.latitude, c.longitude));
        for m in result.measurements {
            out.push(ParameterReading {
                timestamp: m.last_updated,
                location: result.location.clone().unwrap_or_default(),
                city: result.city.clone().unwrap_or_else(|| city.to_string()),
                latitude,
                longitude,
                parameter: m.parameter,
                value: m.value,
            });
        }
    }
    out
}

/// Parse the `results` array of an OpenAQ `/measurements` response.
fn parse_historical(body: &serde_json::Value, city: &str) -> Vec<ParameterReading> {
    // ---
    results(body)
        .iter()
        .enumerate()
        .filter_map(|(i, item)| {
            match serde_json::from_value::<HistoricalResult>(item.clone()) {
                Ok(r) => Some(ParameterReading {
                    timestamp: r.date.utc,
                    location: r.location.unwrap_or_default(),
                    city: r.city.unwrap_or_else(|| city.to_string()),
                    latitude: None,
                    longitude: None,
                    parameter: r.parameter,
                    value: r.value,
                }),
                Err(e) => {
                    debug!("Skipping measurement {}: {} - Raw item: {}", i, e, item);
                    None
                }
            }
        })
        .collect()
}

fn results(body: &serde_json::Value) -> &[serde_json::Value] {
    body.get("results")
        .and_then(|r| r.as_array())
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Pivot parameter rows into one reading per `(timestamp, location)`,
/// averaging duplicate parameters.
fn pivot(readings: Vec<ParameterReading>) -> Vec<RawMeasurement> {
    // ---
    struct Cell {
        city: String,
        latitude: Option<f64>,
        longitude: Option<f64>,
        sums: BTreeMap<String, (f64, usize)>,
    }

    let mut cells: BTreeMap<(DateTime<Utc>, String), Cell> = BTreeMap::new();
    for r in readings {
        let cell = cells
            .entry((r.timestamp, r.location.clone()))
            .or_insert_with(|| Cell {
                city: r.city.clone(),
                latitude: r.latitude,
                longitude: r.longitude,
                sums: BTreeMap::new(),
            });
        let entry = cell.sums.entry(r.parameter).or_insert((0.0, 0));
        entry.0 += r.value;
        entry.1 += 1;
    }

    cells
        .into_iter()
        .map(|((timestamp, location), cell)| {
            let mut pollutants = Concentrations::default();
            for (parameter, (sum, count)) in &cell.sums {
                pollutants.set(parameter, sum / *count as f64);
            }
            RawMeasurement {
                timestamp,
                city: cell.city,
                location,
                latitude: cell.latitude,
                longitude: cell.longitude,
                pollutants,
            }
        })
        .collect()
}

/// Best-effort OpenAQ client with synthetic fallback.
#[derive(Debug)]
pub struct OpenAqCollector {
    // ---
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    default_aqi: f64,
    synthetic: SyntheticSource,
}

impl OpenAqCollector {
    // ---
    pub fn from_config(cfg: &Config) -> Result<Self> {
        // ---
        let client = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(u64::from(cfg.http_timeout_secs)))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: cfg.openaq_api_url.trim_end_matches('/').to_string(),
            api_key: cfg.openaq_api_key.clone(),
            default_aqi: cfg.default_aqi,
            synthetic: SyntheticSource::default(),
        })
    }

    /// Replace the fallback source, e.g. with a seeded one.
    pub fn with_synthetic(mut self, synthetic: SyntheticSource) -> Self {
        self.synthetic = synthetic;
        self
    }

    /// Most recent reading for `city`, live or generated.
    pub async fn get_current(&self, city: &str) -> Option<Measurement> {
        // ---
        let live = match self.fetch_latest(city).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("OpenAQ latest fetch for {city} failed: {e:#}");
                Vec::new()
            }
        };

        let latest = live.into_iter().max_by_key(|r| r.timestamp);
        let raw = match latest {
            Some(raw) => raw,
            None => {
                info!("No live reading for {city}, using synthetic data");
                self.synthetic.current(city, Utc::now())
            }
        };
        Some(raw.to_measurement(self.default_aqi))
    }

    /// Measurements for the last `days` days, live or generated.
    pub async fn get_historical(&self, city: &str, days: u32) -> MeasurementSeries {
        // ---
        let end = Utc::now();
        let start = end - Duration::days(i64::from(days));

        let mut raw = match self.fetch_measurements(city, start, end).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("OpenAQ history fetch for {city} failed: {e:#}");
                Vec::new()
            }
        };
        if raw.is_empty() {
            info!("No live history for {city}, generating {days} days of synthetic data");
            raw = self.synthetic.historical(city, end, days);
        }

        // OpenAQ city labels vary ("Delhi" vs "New Delhi"); the series is
        // keyed by the requested name
        let rows: Vec<Measurement> = raw
            .iter()
            .map(|r| Measurement {
                city: city.to_string(),
                ..r.to_measurement(self.default_aqi)
            })
            .collect();
        MeasurementSeries::new(city, rows).unwrap_or_else(|_| MeasurementSeries::empty(city))
    }

    async fn fetch_latest(&self, city: &str) -> Result<Vec<RawMeasurement>> {
        // ---
        let url = format!("{}/latest", self.base_url);
        let limit = LATEST_LIMIT.to_string();
        let params = [("city", city), ("country", COUNTRY), ("limit", limit.as_str())];
        let body = self.get_json(&url, &params).await?;
        let rows = pivot(parse_latest(&body, city));
        debug!("OpenAQ latest returned {} readings for {}", rows.len(), city);
        Ok(rows)
    }

    async fn fetch_measurements(
        &self,
        city: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawMeasurement>> {
        // ---
        let url = format!("{}/measurements", self.base_url);
        let date_from = start.format("%Y-%m-%d").to_string();
        let date_to = end.format("%Y-%m-%d").to_string();
        let limit = HISTORY_LIMIT.to_string();
        let params = [
            ("city", city),
            ("date_from", date_from.as_str()),
            ("date_to", date_to.as_str()),
            ("limit", limit.as_str()),
        ];
        let body = self.get_json(&url, &params).await?;
        let rows = pivot(parse_historical(&body, city));
        debug!("OpenAQ history returned {} readings for {}", rows.len(), city);
        Ok(rows)
    }

    async fn get_json(&self, url: &str, params: &[(&str, &str)]) -> Result<serde_json::Value> {
        // ---
        let mut request = self.client.get(url).query(params);
        if let Some(key) = &self.api_key {
            request = request.header("X-API-Key", key);
        }
        let body = request
            .send()
            .await
            .with_context(|| format!("GET {url}"))?
            .error_for_status()
            .with_context(|| format!("GET {url}"))?
            .json::<serde_json::Value>()
            .await
            .with_context(|| format!("Decoding response from {url}"))?;
        Ok(body)
    }
}

//! Health-risk scoring from AQI and city demographics.
//!
//! Everything here is a deterministic function of an AQI value, a static
//! demographics table and (for impact metrics) a set of measurements. The
//! step tables and dose-response constants are policy parameters carried
//! verbatim, not derived.

use chrono::NaiveDate;
use serde::Serialize;
use tracing::warn;

use crate::models::Measurement;

// ---

/// Demographics used when a city is not in [`CITY_DEMOGRAPHICS`].
pub const DEFAULT_CITY: &str = "Delhi";

/// `(upper AQI bound inclusive, risk)`; the last band is open-ended.
pub type RiskBands = [(f64, f64); 6];

/// Base risk per AQI band, used for the aggregate score.
pub const BASE_RISK_BANDS: RiskBands = [
    (50.0, 0.1),
    (100.0, 0.3),
    (150.0, 0.6),
    (200.0, 0.8),
    (300.0, 0.95),
    (f64::INFINITY, 1.0),
];

/// Finer risk per AQI band, used only to decide which groups enter the
/// at-risk breakdown.
pub const GATING_RISK_BANDS: RiskBands = [
    (50.0, 0.05),
    (100.0, 0.15),
    (150.0, 0.35),
    (200.0, 0.60),
    (300.0, 0.85),
    (f64::INFINITY, 1.0),
];

// Dose-response and cost constants (INR)
const BASELINE_MORTALITY_RATE: f64 = 0.008;
const MORTALITY_SLOPE: f64 = 0.06;
const RESPIRATORY_BASELINE_RATE: f64 = 0.15;
const RESPIRATORY_SLOPE: f64 = 0.12;
const DOSE_RESPONSE_ORIGIN_PM25: f64 = 10.0;
const COST_PER_DEATH_INR: f64 = 3_500_000.0;
const COST_PER_ILLNESS_INR: f64 = 25_000.0;
const WHO_PM25_GUIDELINE: f64 = 5.0;
const WHO_PM10_GUIDELINE: f64 = 15.0;
const LOW_INCOME_RISK_WEIGHT: f64 = 0.3;

/// Look up the risk for `aqi` in a band table.
pub fn band_risk(aqi: f64, bands: &RiskBands) -> f64 {
    // ---
    bands
        .iter()
        .find(|(upper, _)| aqi <= *upper)
        .map_or(1.0, |(_, risk)| *risk)
}

/// Group-risk level a group must reach to be counted as at risk.
pub fn gating_threshold(aqi: f64) -> f64 {
    match aqi {
        a if a <= 100.0 => 0.1,
        a if a <= 150.0 => 0.3,
        _ => 0.6,
    }
}

/// The six fixed vulnerable population groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VulnerableGroup {
    ChildrenUnder5,
    ElderlyOver65,
    RespiratoryConditions,
    CardiovascularConditions,
    PregnantWomen,
    OutdoorWorkers,
}

impl VulnerableGroup {
    // ---
    pub const ALL: [VulnerableGroup; 6] = [
        VulnerableGroup::ChildrenUnder5,
        VulnerableGroup::ElderlyOver65,
        VulnerableGroup::RespiratoryConditions,
        VulnerableGroup::CardiovascularConditions,
        VulnerableGroup::PregnantWomen,
        VulnerableGroup::OutdoorWorkers,
    ];

    /// Relative-risk multiplier for the group.
    pub fn multiplier(self) -> f64 {
        match self {
            VulnerableGroup::ChildrenUnder5 => 1.8,
            VulnerableGroup::ElderlyOver65 => 1.6,
            VulnerableGroup::RespiratoryConditions => 2.2,
            VulnerableGroup::CardiovascularConditions => 1.9,
            VulnerableGroup::PregnantWomen => 1.4,
            VulnerableGroup::OutdoorWorkers => 1.5,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            VulnerableGroup::ChildrenUnder5 => "Children Under 5",
            VulnerableGroup::ElderlyOver65 => "Elderly (65+)",
            VulnerableGroup::RespiratoryConditions => "Respiratory Conditions",
            VulnerableGroup::CardiovascularConditions => "Cardiovascular Conditions",
            VulnerableGroup::PregnantWomen => "Pregnant Women",
            VulnerableGroup::OutdoorWorkers => "Outdoor Workers",
        }
    }
}

/// Static per-city reference data. Shares are percentages of population.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CityDemographics {
    // ---
    pub city: &'static str,
    pub population: u64,
    pub children_under_5: f64,
    pub elderly_over_65: f64,
    pub respiratory_conditions: f64,
    pub cardiovascular_conditions: f64,
    pub pregnant_women: f64,
    pub outdoor_workers: f64,
    pub low_income_percentage: f64,
}

impl CityDemographics {
    // ---
    pub fn share(&self, group: VulnerableGroup) -> f64 {
        match group {
            VulnerableGroup::ChildrenUnder5 => self.children_under_5,
            VulnerableGroup::ElderlyOver65 => self.elderly_over_65,
            VulnerableGroup::RespiratoryConditions => self.respiratory_conditions,
            VulnerableGroup::CardiovascularConditions => self.cardiovascular_conditions,
            VulnerableGroup::PregnantWomen => self.pregnant_women,
            VulnerableGroup::OutdoorWorkers => self.outdoor_workers,
        }
    }

    pub fn low_income_population(&self) -> u64 {
        (self.population as f64 * self.low_income_percentage / 100.0) as u64
    }
}

#[allow(clippy::too_many_arguments)]
const fn city(
    city: &'static str,
    children_under_5: f64,
    elderly_over_65: f64,
    respiratory_conditions: f64,
    cardiovascular_conditions: f64,
    pregnant_women: f64,
    outdoor_workers: f64,
    population: u64,
    low_income_percentage: f64,
) -> CityDemographics {
    CityDemographics {
        city,
        population,
        children_under_5,
        elderly_over_65,
        respiratory_conditions,
        cardiovascular_conditions,
        pregnant_women,
        outdoor_workers,
        low_income_percentage,
    }
}

pub static CITY_DEMOGRAPHICS: [CityDemographics; 6] = [
    city("Delhi", 8.2, 4.6, 12.5, 8.9, 2.1, 28.5, 32_900_000, 35.2),
    city("Mumbai", 7.8, 5.2, 10.8, 7.6, 1.9, 31.2, 20_700_000, 41.3),
    city("Kolkata", 8.9, 6.1, 14.2, 9.8, 2.0, 25.7, 15_000_000, 32.8),
    city("Chennai", 7.5, 5.8, 9.8, 7.2, 1.8, 23.4, 11_700_000, 29.6),
    city("Bangalore", 7.2, 4.9, 8.9, 6.8, 1.9, 22.1, 13_200_000, 26.4),
    city("Hyderabad", 7.8, 5.1, 10.2, 7.5, 2.0, 24.8, 10_500_000, 31.2),
];

/// Demographics for `name`, if the city is known.
pub fn find_city(name: &str) -> Option<&'static CityDemographics> {
    CITY_DEMOGRAPHICS.iter().find(|c| c.city == name)
}

/// Demographics for `name`, substituting [`DEFAULT_CITY`] when unknown.
///
/// The flag is `true` when the substitution happened.
pub fn demographics_or_default(name: &str) -> (&'static CityDemographics, bool) {
    // ---
    match find_city(name) {
        Some(d) => (d, false),
        None => {
            warn!("Unknown city `{name}`, using {DEFAULT_CITY} demographics");
            (&CITY_DEMOGRAPHICS[0], true)
        }
    }
}

/// One group's entry in the at-risk breakdown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupRisk {
    // ---
    pub group: VulnerableGroup,
    pub population_count: u64,
    pub at_risk_count: u64,
    pub risk_level: f64,
    /// Share of the city population, percent.
    pub share: f64,
}

/// Risk of one AQI value for one city.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskAssessment {
    // ---
    /// City as requested by the caller.
    pub city: String,
    /// City whose demographics were used; differs from `city` only when
    /// `used_default_city` is set.
    pub demographics_city: String,
    pub aqi: f64,
    pub base_risk: f64,
    /// Groups that passed the gating threshold, in [`VulnerableGroup::ALL`] order.
    pub groups: Vec<GroupRisk>,
    pub weighted_risk: f64,
    pub final_risk: f64,
    pub total_at_risk: u64,
    pub used_default_city: bool,
}

/// Scores AQI values against the static demographics table.
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskScorer;

impl RiskScorer {
    // ---
    pub fn new() -> Self {
        RiskScorer
    }

    /// Score `aqi` for `city`. Unknown cities use the default city.
    pub fn score(&self, aqi: f64, city: &str) -> RiskAssessment {
        // ---
        let (demographics, used_default_city) = demographics_or_default(city);
        let base_risk = band_risk(aqi, &BASE_RISK_BANDS);

        let mut risk_sum = 0.0;
        let mut share_sum = 0.0;
        for group in VulnerableGroup::ALL {
            let share = demographics.share(group) / 100.0;
            risk_sum += base_risk * group.multiplier() * share;
            share_sum += share;
        }
        let weighted_risk = if share_sum > 0.0 {
            risk_sum / share_sum
        } else {
            base_risk
        };
        let low_income_factor =
            1.0 + demographics.low_income_percentage / 100.0 * LOW_INCOME_RISK_WEIGHT;
        let final_risk = (weighted_risk * low_income_factor).min(1.0);

        let groups = at_risk_groups(aqi, demographics);
        let total_at_risk = groups.iter().map(|g| g.at_risk_count).sum();

        RiskAssessment {
            city: city.to_string(),
            demographics_city: demographics.city.to_string(),
            aqi,
            base_risk,
            groups,
            weighted_risk,
            final_risk,
            total_at_risk,
            used_default_city,
        }
    }
}

fn at_risk_groups(aqi: f64, demographics: &CityDemographics) -> Vec<GroupRisk> {
    // ---
    let gating = band_risk(aqi, &GATING_RISK_BANDS);
    let threshold = gating_threshold(aqi);
    let population = demographics.population as f64;

    VulnerableGroup::ALL
        .into_iter()
        .filter_map(|group| {
            let risk_level = gating * group.multiplier();
            if risk_level < threshold {
                return None;
            }
            let share = demographics.share(group);
            let group_population = population * share / 100.0;
            let population_count = group_population as u64;
            let at_risk_count = ((group_population * risk_level) as u64).min(population_count);
            Some(GroupRisk {
                group,
                population_count,
                at_risk_count,
                risk_level,
                share,
            })
        })
        .collect()
}

/// Population-level impact of a period of measurements.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthImpactMetrics {
    // ---
    pub city: String,
    pub population: u64,
    /// Population figures come from the default city.
    pub used_default_city: bool,
    pub average_aqi: f64,
    pub average_pm25: f64,
    pub average_pm10: f64,
    pub average_no2: f64,
    pub excess_deaths_annual: u64,
    pub excess_respiratory_cases: u64,
    pub economic_impact_inr: f64,
    pub unhealthy_readings: usize,
    pub total_readings: usize,
    pub percentage_unhealthy: f64,
    pub who_pm25_exceedance: f64,
    pub who_pm10_exceedance: f64,
    pub low_income_population: u64,
}

/// Impact metrics over `measurements`; `None` when there are none.
///
/// Missing pollutant averages count as zero.
pub fn health_impact(measurements: &[Measurement], city: &str) -> Option<HealthImpactMetrics> {
    // ---
    if measurements.is_empty() {
        return None;
    }
    let (demographics, used_default_city) = demographics_or_default(city);
    let population = demographics.population as f64;

    let avg = |f: fn(&Measurement) -> Option<f64>| -> f64 {
        let values: Vec<f64> = measurements.iter().filter_map(f).collect();
        if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        }
    };
    let average_pm25 = avg(|m| m.pollutants.pm25);
    let average_pm10 = avg(|m| m.pollutants.pm10);
    let average_no2 = avg(|m| m.pollutants.no2);
    let average_aqi = avg(|m| Some(m.aqi));

    let excess = (average_pm25 - DOSE_RESPONSE_ORIGIN_PM25) / 10.0;
    let mortality_factor = (excess * MORTALITY_SLOPE).max(0.0);
    let respiratory_factor = (excess * RESPIRATORY_SLOPE).max(0.0);
    let excess_deaths_annual = (population * BASELINE_MORTALITY_RATE * mortality_factor) as u64;
    let excess_respiratory_cases =
        (population * RESPIRATORY_BASELINE_RATE * respiratory_factor) as u64;
    let economic_impact_inr = excess_deaths_annual as f64 * COST_PER_DEATH_INR
        + excess_respiratory_cases as f64 * COST_PER_ILLNESS_INR;

    let total_readings = measurements.len();
    let unhealthy_readings = measurements.iter().filter(|m| m.aqi > 100.0).count();

    Some(HealthImpactMetrics {
        city: city.to_string(),
        population: demographics.population,
        used_default_city,
        average_aqi,
        average_pm25,
        average_pm10,
        average_no2,
        excess_deaths_annual,
        excess_respiratory_cases,
        economic_impact_inr,
        unhealthy_readings,
        total_readings,
        percentage_unhealthy: unhealthy_readings as f64 / total_readings as f64 * 100.0,
        who_pm25_exceedance: (average_pm25 - WHO_PM25_GUIDELINE).max(0.0),
        who_pm10_exceedance: (average_pm10 - WHO_PM10_GUIDELINE).max(0.0),
        low_income_population: demographics.low_income_population(),
    })
}

/// Protective actions for the AQI band, plus notes for known cities.
pub fn recommendations(aqi: f64, city: &str) -> Vec<String> {
    // ---
    let band: &[&str] = match aqi {
        a if a <= 50.0 => &["Air quality is good. Normal outdoor activities are safe for everyone."],
        a if a <= 100.0 => &[
            "Air quality is moderate. Sensitive individuals should consider limiting prolonged outdoor activities.",
            "Children and elderly should avoid strenuous outdoor activities during peak hours.",
        ],
        a if a <= 150.0 => &[
            "Unhealthy for sensitive groups. Children, elderly, and people with respiratory/heart conditions should avoid outdoor activities.",
            "Consider wearing N95 masks when outdoors.",
            "Keep windows closed and use air purifiers indoors.",
        ],
        a if a <= 200.0 => &[
            "Unhealthy air quality. Everyone should avoid prolonged outdoor activities.",
            "Wear N95 masks when going outdoors.",
            "Stay indoors with air purifiers running.",
            "Seek medical attention if experiencing difficulty breathing.",
        ],
        _ => &[
            "Hazardous air quality. Avoid all outdoor activities.",
            "Wear N95/N99 masks even for brief outdoor exposure.",
            "Seal windows and doors. Use air purifiers continuously.",
            "Seek immediate medical attention for any respiratory symptoms.",
            "Avoid driving with windows down.",
        ],
    };
    let mut out: Vec<String> = band.iter().map(|s| s.to_string()).collect();

    if let Some(d) = find_city(city) {
        if d.outdoor_workers > 25.0 {
            out.push(format!(
                "Special attention needed for {city}'s large outdoor worker population: provide protective equipment and schedule breaks indoors."
            ));
        }
        if d.low_income_percentage > 35.0 {
            out.push(format!(
                "Community health centers in {city} should provide free masks and health check-ups for low-income residents."
            ));
        }
    }
    out
}

/// Structural vulnerability of a city next to its current risk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VulnerabilityIndex {
    // ---
    pub city: String,
    pub population: u64,
    pub vulnerability_score: f64,
    pub current_risk_score: f64,
    pub current_aqi: f64,
    pub low_income_percentage: f64,
    pub children_percentage: f64,
    pub elderly_percentage: f64,
}

/// Vulnerability of a known city; `None` for cities without demographics.
pub fn vulnerability_index(city: &str, aqi: f64) -> Option<VulnerabilityIndex> {
    // ---
    let d = find_city(city)?;
    let raw: f64 = VulnerableGroup::ALL
        .iter()
        .map(|g| d.share(*g) / 100.0 * g.multiplier())
        .sum();
    let vulnerability_score = (raw / VulnerableGroup::ALL.len() as f64).min(1.0);

    Some(VulnerabilityIndex {
        city: d.city.to_string(),
        population: d.population,
        vulnerability_score,
        current_risk_score: RiskScorer.score(aqi, city).final_risk,
        current_aqi: aqi,
        low_income_percentage: d.low_income_percentage,
        children_percentage: d.children_under_5,
        elderly_percentage: d.elderly_over_65,
    })
}

/// Daily health report keyed by `(city, report_date)`.
///
/// `city` is always the requested name, so an unknown city never shares a
/// key with the default city whose demographics it borrowed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    // ---
    pub city: String,
    pub report_date: NaiveDate,
    pub impact: HealthImpactMetrics,
    pub risk: RiskAssessment,
    pub recommendations: Vec<String>,
}

impl HealthReport {
    // ---
    /// Build the report for a period; `None` without measurements.
    ///
    /// Risk and recommendations are evaluated at the period's average AQI.
    pub fn build(city: &str, report_date: NaiveDate, measurements: &[Measurement]) -> Option<Self> {
        // ---
        let impact = health_impact(measurements, city)?;
        let risk = RiskScorer.score(impact.average_aqi, city);
        let recommendations = recommendations(impact.average_aqi, city);

        Some(HealthReport {
            city: city.to_string(),
            report_date,
            impact,
            risk,
            recommendations,
        })
    }

    /// Recommendations joined for storage as one text field.
    pub fn recommendation_text(&self) -> String {
        self.recommendations.join("\n")
    }
}

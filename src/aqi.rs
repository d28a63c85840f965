//! Pollutant concentration to AQI conversion.
//!
//! Implements the US EPA piecewise-linear breakpoint method for PM2.5, PM10
//! and NO2. Each pollutant yields a sub-index; the row AQI is the worst
//! (highest) sub-index. Pure and deterministic, O(1) per row.

use serde::Serialize;

use crate::models::Concentrations;

// ---

/// AQI reported when no supported pollutant is available.
///
/// This is a policy value for "unknown but assume moderate", not a
/// measurement of anything.
pub const DEFAULT_AQI: f64 = 100.0;

/// AQI reported for concentrations above the highest bracket.
pub const HAZARDOUS_CEILING: f64 = 500.0;

/// One linear segment of the concentration to AQI mapping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bracket {
    // ---
    pub bp_lo: f64,
    pub bp_hi: f64,
    pub aqi_lo: f64,
    pub aqi_hi: f64,
}

const fn bracket(bp_lo: f64, bp_hi: f64, aqi_lo: f64, aqi_hi: f64) -> Bracket {
    Bracket {
        bp_lo,
        bp_hi,
        aqi_lo,
        aqi_hi,
    }
}

/// PM2.5 breakpoints, µg/m³ (24-hour).
pub const PM25_BRACKETS: [Bracket; 6] = [
    bracket(0.0, 12.0, 0.0, 50.0),
    bracket(12.1, 35.4, 51.0, 100.0),
    bracket(35.5, 55.4, 101.0, 150.0),
    bracket(55.5, 150.4, 151.0, 200.0),
    bracket(150.5, 250.4, 201.0, 300.0),
    bracket(250.5, 500.4, 301.0, 500.0),
];

/// PM10 breakpoints, µg/m³ (24-hour).
pub const PM10_BRACKETS: [Bracket; 6] = [
    bracket(0.0, 54.0, 0.0, 50.0),
    bracket(55.0, 154.0, 51.0, 100.0),
    bracket(155.0, 254.0, 101.0, 150.0),
    bracket(255.0, 354.0, 151.0, 200.0),
    bracket(355.0, 424.0, 201.0, 300.0),
    bracket(425.0, 604.0, 301.0, 500.0),
];

/// NO2 breakpoints, ppb (1-hour).
pub const NO2_BRACKETS: [Bracket; 6] = [
    bracket(0.0, 53.0, 0.0, 50.0),
    bracket(54.0, 100.0, 51.0, 100.0),
    bracket(101.0, 360.0, 101.0, 150.0),
    bracket(361.0, 649.0, 151.0, 200.0),
    bracket(650.0, 1249.0, 201.0, 300.0),
    bracket(1250.0, 2049.0, 301.0, 500.0),
];

/// Sub-index for one concentration against a bracket table.
///
/// The first bracket whose upper bound covers `concentration` is used, so a
/// value falling in the gap between two published brackets (12.05 for PM2.5)
/// interpolates into the next bracket instead of jumping to the ceiling. The
/// result never drops below the previous bracket's upper AQI.
pub fn sub_index(concentration: f64, brackets: &[Bracket]) -> f64 {
    // ---
    let mut floor = 0.0;
    for b in brackets {
        if concentration <= b.bp_hi {
            let aqi =
                (b.aqi_hi - b.aqi_lo) / (b.bp_hi - b.bp_lo) * (concentration - b.bp_lo) + b.aqi_lo;
            return aqi.max(floor);
        }
        floor = b.aqi_hi;
    }
    HAZARDOUS_CEILING
}

/// AQI for a set of concentrations, falling back to [`DEFAULT_AQI`].
pub fn aqi_from_concentrations(concentrations: &Concentrations) -> f64 {
    // ---
    aqi_from_concentrations_or(concentrations, DEFAULT_AQI)
}

/// AQI for a set of concentrations with an explicit fallback.
///
/// Only PM2.5, PM10 and NO2 contribute. Absent, negative or non-finite
/// values are ignored.
pub fn aqi_from_concentrations_or(concentrations: &Concentrations, default: f64) -> f64 {
    // ---
    let inputs = [
        (concentrations.pm25, &PM25_BRACKETS[..]),
        (concentrations.pm10, &PM10_BRACKETS[..]),
        (concentrations.no2, &NO2_BRACKETS[..]),
    ];

    inputs
        .into_iter()
        .filter_map(|(value, table)| {
            value
                .filter(|c| c.is_finite() && *c >= 0.0)
                .map(|c| sub_index(c, table))
        })
        .reduce(f64::max)
        .unwrap_or(default)
}

/// EPA AQI category bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AqiCategory {
    Good,
    Moderate,
    UnhealthyForSensitiveGroups,
    Unhealthy,
    VeryUnhealthy,
    Hazardous,
}

impl AqiCategory {
    // ---
    pub fn from_aqi(aqi: f64) -> Self {
        // ---
        match aqi {
            a if a <= 50.0 => AqiCategory::Good,
            a if a <= 100.0 => AqiCategory::Moderate,
            a if a <= 150.0 => AqiCategory::UnhealthyForSensitiveGroups,
            a if a <= 200.0 => AqiCategory::Unhealthy,
            a if a <= 300.0 => AqiCategory::VeryUnhealthy,
            _ => AqiCategory::Hazardous,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AqiCategory::Good => "Good",
            AqiCategory::Moderate => "Moderate",
            AqiCategory::UnhealthyForSensitiveGroups => "Unhealthy for Sensitive Groups",
            AqiCategory::Unhealthy => "Unhealthy",
            AqiCategory::VeryUnhealthy => "Very Unhealthy",
            AqiCategory::Hazardous => "Hazardous",
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            AqiCategory::Good => "green",
            AqiCategory::Moderate => "yellow",
            AqiCategory::UnhealthyForSensitiveGroups => "orange",
            AqiCategory::Unhealthy => "red",
            AqiCategory::VeryUnhealthy => "purple",
            AqiCategory::Hazardous => "maroon",
        }
    }

    pub fn health_message(self) -> &'static str {
        match self {
            AqiCategory::Good => "Air quality is satisfactory and poses little to no health risk.",
            AqiCategory::Moderate => {
                "Air quality is acceptable. Sensitive individuals may experience minor symptoms."
            }
            AqiCategory::UnhealthyForSensitiveGroups => {
                "Sensitive groups may experience health effects. General public is less likely to be affected."
            }
            AqiCategory::Unhealthy => {
                "Everyone may begin to experience health effects. Sensitive groups may experience more serious effects."
            }
            AqiCategory::VeryUnhealthy => {
                "Health warnings of emergency conditions. Everyone may experience more serious health effects."
            }
            AqiCategory::Hazardous => {
                "Emergency conditions. Everyone is likely to be affected. Avoid outdoor activities."
            }
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn pm25_only(value: f64) -> Concentrations {
        Concentrations {
            pm25: Some(value),
            ..Concentrations::default()
        }
    }

    #[test]
    fn bracket_ceilings_give_one_hundred() {
        // ---
        let c = Concentrations {
            pm25: Some(35.4),
            pm10: Some(54.0),
            no2: Some(53.0),
            ..Concentrations::default()
        };
        assert!((aqi_from_concentrations(&c) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn continuous_at_bracket_boundary() {
        // ---
        assert!((aqi_from_concentrations(&pm25_only(12.0)) - 50.0).abs() < 1e-9);
        assert!((aqi_from_concentrations(&pm25_only(12.1)) - 51.0).abs() < 1e-9);

        // Gap between published brackets stays between the two neighbours
        let gap = aqi_from_concentrations(&pm25_only(12.05));
        assert!(gap > 50.0 && gap < 51.0, "gap value {gap}");
    }

    #[test]
    fn monotonic_in_concentration() {
        // ---
        let mut previous = -1.0;
        let mut c = 0.0;
        while c <= 520.0 {
            let aqi = aqi_from_concentrations(&pm25_only(c));
            assert!(aqi >= previous, "AQI decreased at {c}: {aqi} < {previous}");
            previous = aqi;
            c += 0.05;
        }
    }

    #[test]
    fn above_all_brackets_reports_ceiling() {
        // ---
        assert_eq!(sub_index(700.0, &PM25_BRACKETS), HAZARDOUS_CEILING);
        assert_eq!(sub_index(5000.0, &NO2_BRACKETS), HAZARDOUS_CEILING);
    }

    #[test]
    fn worst_pollutant_governs() {
        // ---
        let c = Concentrations {
            pm25: Some(5.0),
            pm10: Some(300.0),
            no2: Some(20.0),
            ..Concentrations::default()
        };
        let expected = sub_index(300.0, &PM10_BRACKETS);
        assert_eq!(aqi_from_concentrations(&c), expected);
        assert!(expected > 150.0 && expected < 200.0);
    }

    #[test]
    fn no_pollutants_uses_default() {
        // ---
        let c = Concentrations {
            so2: Some(20.0),
            o3: Some(40.0),
            co: Some(1.2),
            ..Concentrations::default()
        };
        assert_eq!(aqi_from_concentrations(&c), DEFAULT_AQI);
        assert_eq!(aqi_from_concentrations_or(&c, 80.0), 80.0);
    }

    #[test]
    fn invalid_values_are_ignored() {
        // ---
        let c = Concentrations {
            pm25: Some(-3.0),
            pm10: Some(f64::NAN),
            no2: Some(53.0),
            ..Concentrations::default()
        };
        assert!((aqi_from_concentrations(&c) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn categories_follow_epa_bands() {
        // ---
        assert_eq!(AqiCategory::from_aqi(0.0), AqiCategory::Good);
        assert_eq!(AqiCategory::from_aqi(50.0), AqiCategory::Good);
        assert_eq!(AqiCategory::from_aqi(50.5), AqiCategory::Moderate);
        assert_eq!(
            AqiCategory::from_aqi(150.0),
            AqiCategory::UnhealthyForSensitiveGroups
        );
        assert_eq!(AqiCategory::from_aqi(301.0), AqiCategory::Hazardous);
        assert_eq!(AqiCategory::from_aqi(175.0).color(), "red");
    }
}

//! Threshold alerts derived from a risk assessment.
//!
//! The core only decides whether an assessment is alert-worthy and builds
//! the event; persisting or displaying it is up to the caller.

use serde::{Deserialize, Serialize};

use crate::risk::{self, RiskAssessment, VulnerableGroup};

// ---

/// Alert kind for AQI threshold crossings.
pub const AQI_THRESHOLD_KIND: &str = "aqi_threshold";

/// How long an open alert suppresses repeats of itself.
pub const REPEAT_WINDOW_HOURS: u32 = 6;

/// Severity ladder, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Moderate,
    Sensitive,
    Unhealthy,
    VeryUnhealthy,
    Hazardous,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Moderate => "moderate",
            Severity::Sensitive => "sensitive",
            Severity::Unhealthy => "unhealthy",
            Severity::VeryUnhealthy => "very_unhealthy",
            Severity::Hazardous => "hazardous",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "moderate" => Some(Severity::Moderate),
            "sensitive" => Some(Severity::Sensitive),
            "unhealthy" => Some(Severity::Unhealthy),
            "very_unhealthy" => Some(Severity::VeryUnhealthy),
            "hazardous" => Some(Severity::Hazardous),
            _ => None,
        }
    }
}

/// AQI values above which each severity applies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertThresholds {
    // ---
    pub moderate: f64,
    pub sensitive: f64,
    pub unhealthy: f64,
    pub very_unhealthy: f64,
    pub hazardous: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            moderate: 50.0,
            sensitive: 100.0,
            unhealthy: 150.0,
            very_unhealthy: 200.0,
            hazardous: 300.0,
        }
    }
}

impl AlertThresholds {
    // ---
    /// Highest severity whose threshold `aqi` exceeds, with that threshold.
    pub fn classify(&self, aqi: f64) -> Option<(Severity, f64)> {
        // ---
        let ladder = [
            (Severity::Hazardous, self.hazardous),
            (Severity::VeryUnhealthy, self.very_unhealthy),
            (Severity::Unhealthy, self.unhealthy),
            (Severity::Sensitive, self.sensitive),
            (Severity::Moderate, self.moderate),
        ];
        ladder.into_iter().find(|(_, threshold)| aqi > *threshold)
    }
}

/// An alert-worthy event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    // ---
    pub city: String,
    pub kind: String,
    pub severity: Severity,
    pub aqi_value: f64,
    pub threshold_exceeded: f64,
    pub affected_groups: Vec<VulnerableGroup>,
    pub people_affected: u64,
    pub recommendation_text: String,
    /// Group populations come from the default city.
    pub used_default_city: bool,
}

impl AlertEvent {
    // ---
    /// Whether an open alert with these fields already covers this event:
    /// same city and kind, at this severity or higher. Unknown severities
    /// never cover anything.
    pub fn is_repeat_of(&self, city: &str, kind: &str, severity: &str) -> bool {
        // ---
        city == self.city
            && kind == self.kind
            && Severity::parse(severity).is_some_and(|open| open >= self.severity)
    }
}

/// Build an alert for `assessment` if its AQI crosses a threshold.
pub fn evaluate(assessment: &RiskAssessment, thresholds: &AlertThresholds) -> Option<AlertEvent> {
    // ---
    let (severity, threshold_exceeded) = thresholds.classify(assessment.aqi)?;

    let recommendation_text = risk::recommendations(assessment.aqi, &assessment.city).join("\n");

    tracing::debug!(
        "Alert {} for {} at AQI {:.0}",
        severity.as_str(),
        assessment.city,
        assessment.aqi
    );

    Some(AlertEvent {
        city: assessment.city.clone(),
        kind: AQI_THRESHOLD_KIND.to_string(),
        severity,
        aqi_value: assessment.aqi,
        threshold_exceeded,
        affected_groups: assessment.groups.iter().map(|g| g.group).collect(),
        people_affected: assessment.total_at_risk,
        recommendation_text,
        used_default_city: assessment.used_default_city,
    })
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::risk::RiskScorer;

    #[test]
    fn clean_air_raises_nothing() {
        // ---
        let r = RiskScorer::new().score(50.0, "Delhi");
        assert!(evaluate(&r, &AlertThresholds::default()).is_none());
    }

    #[test]
    fn highest_crossed_threshold_wins() {
        // ---
        let t = AlertThresholds::default();
        assert_eq!(t.classify(75.0), Some((Severity::Moderate, 50.0)));
        assert_eq!(t.classify(150.0), Some((Severity::Sensitive, 100.0)));
        assert_eq!(t.classify(150.1), Some((Severity::Unhealthy, 150.0)));
        assert_eq!(t.classify(420.0), Some((Severity::Hazardous, 300.0)));
        assert!(Severity::Hazardous > Severity::Moderate);
    }

    #[test]
    fn event_carries_groups_and_people() {
        // ---
        let r = RiskScorer::new().score(180.0, "Mumbai");
        let event = evaluate(&r, &AlertThresholds::default()).unwrap();
        assert_eq!(event.kind, "aqi_threshold");
        assert_eq!(event.severity, Severity::Unhealthy);
        assert_eq!(event.threshold_exceeded, 150.0);
        assert_eq!(event.affected_groups.len(), r.groups.len());
        assert_eq!(event.people_affected, r.total_at_risk);
        assert!(event.recommendation_text.contains("N95"));
    }

    #[test]
    fn unknown_city_alert_is_filed_under_its_own_name() {
        // ---
        let r = RiskScorer::new().score(220.0, "Atlantis");
        let event = evaluate(&r, &AlertThresholds::default()).unwrap();
        assert_eq!(event.city, "Atlantis");
        assert!(event.used_default_city);
        assert_eq!(event.severity, Severity::VeryUnhealthy);
    }

    #[test]
    fn open_alert_suppresses_same_or_lower_severity() {
        // ---
        let r = RiskScorer::new().score(180.0, "Mumbai");
        let event = evaluate(&r, &AlertThresholds::default()).unwrap();

        assert!(event.is_repeat_of("Mumbai", AQI_THRESHOLD_KIND, "unhealthy"));
        assert!(event.is_repeat_of("Mumbai", AQI_THRESHOLD_KIND, "hazardous"));

        // Escalation, other cities and other kinds are new alerts
        assert!(!event.is_repeat_of("Mumbai", AQI_THRESHOLD_KIND, "sensitive"));
        assert!(!event.is_repeat_of("Delhi", AQI_THRESHOLD_KIND, "unhealthy"));
        assert!(!event.is_repeat_of("Mumbai", "sensor_offline", "unhealthy"));
        assert!(!event.is_repeat_of("Mumbai", AQI_THRESHOLD_KIND, "severe"));
    }

    #[test]
    fn severity_names_parse_back() {
        // ---
        for s in [
            Severity::Moderate,
            Severity::Sensitive,
            Severity::Unhealthy,
            Severity::VeryUnhealthy,
            Severity::Hazardous,
        ] {
            assert_eq!(Severity::parse(s.as_str()), Some(s));
        }
    }

    #[test]
    fn thresholds_are_configurable() {
        // ---
        let strict = AlertThresholds {
            moderate: 20.0,
            ..AlertThresholds::default()
        };
        let r = RiskScorer::new().score(30.0, "Chennai");
        let event = evaluate(&r, &strict).unwrap();
        assert_eq!(event.severity, Severity::Moderate);
    }
}

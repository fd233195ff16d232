use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Stored user role. The set of recognized roles is closed; anything else
/// collapses into `Other` and is rejected at access-filter time, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Bulk,
    Tanker,
    Other,
}

impl Role {
    pub fn parse(raw: &str) -> Role {
        match raw.trim() {
            "admin" => Role::Admin,
            "bulk" => Role::Bulk,
            "tanker" => Role::Tanker,
            _ => Role::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Bulk => "bulk",
            Role::Tanker => "tanker",
            Role::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub role: Role,
}

/// One raw measurement as written by the ingestion job. Multiple
/// observations may share the same `(group, id, date)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub group: String,
    pub id: String,
    pub date: NaiveDate,
    pub value: f64,
    pub fetched_at: DateTime<Utc>,
}

impl Observation {
    pub fn series_key(&self) -> SeriesKey {
        SeriesKey {
            group: self.group.clone(),
            id: self.id.clone(),
        }
    }
}

/// Identifies one logical time series.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeriesKey {
    pub group: String,
    pub id: String,
}

/// A single aggregated day: today's value plus the previous calendar day's
/// value (absent when the series has no point for that day) and the
/// day-over-day percentage change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedPoint {
    pub date: NaiveDate,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yesterday_value: Option<f64>,
    pub percentage_difference: f64,
}

/// Derived per-series output; `data` is strictly ascending by date with at
/// most one point per calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedSeries {
    pub group: String,
    pub id: String,
    pub data: Vec<AnnotatedPoint>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parse_recognizes_closed_set_and_collapses_the_rest() {
        assert_eq!(Role::parse("admin"), Role::Admin);
        assert_eq!(Role::parse("bulk"), Role::Bulk);
        assert_eq!(Role::parse("tanker"), Role::Tanker);
        assert_eq!(Role::parse(" tanker "), Role::Tanker);
        assert_eq!(Role::parse("guest"), Role::Other);
        assert_eq!(Role::parse("ADMIN"), Role::Other);
        assert_eq!(Role::parse(""), Role::Other);
    }

    #[test]
    fn annotated_point_renders_date_as_plain_string() {
        let point = AnnotatedPoint {
            date: NaiveDate::from_ymd_opt(2024, 1, 2).expect("valid date"),
            value: 150.0,
            yesterday_value: Some(100.0),
            percentage_difference: 50.0,
        };

        let json = serde_json::to_value(&point).expect("serialize point");
        assert_eq!(
            json,
            serde_json::json!({
                "date": "2024-01-02",
                "value": 150.0,
                "yesterday_value": 100.0,
                "percentage_difference": 50.0,
            })
        );
    }

    #[test]
    fn annotated_point_omits_absent_yesterday_value() {
        let point = AnnotatedPoint {
            date: NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid date"),
            value: 100.0,
            yesterday_value: None,
            percentage_difference: 100.0,
        };

        let json = serde_json::to_value(&point).expect("serialize point");
        assert!(json.get("yesterday_value").is_none());
    }

    #[test]
    fn series_key_orders_by_group_then_id() {
        let a = SeriesKey {
            group: "bulk".to_string(),
            id: "Z".to_string(),
        };
        let b = SeriesKey {
            group: "tanker".to_string(),
            id: "A".to_string(),
        };
        assert!(a < b);
    }
}

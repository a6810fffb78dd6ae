//! Data models for Stock Insight

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Number of weekly checkpoints a prediction is tracked for
pub const TRACKING_WEEKS: usize = 4;

/// Predicted price direction over the tracking horizon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    /// Parse "up"/"down" (case-insensitive); anything else is rejected
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "up" => Some(Direction::Up),
            "down" => Some(Direction::Down),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

/// Lifecycle status of a prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionStatus {
    Active,
    Completed,
}

impl PredictionStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(PredictionStatus::Active),
            "completed" => Some(PredictionStatus::Completed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionStatus::Active => "active",
            PredictionStatus::Completed => "completed",
        }
    }
}

/// One weekly price/analysis checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyUpdate {
    pub week: u32,
    pub price: f64,
    #[serde(with = "timestamp")]
    pub date: DateTime<Utc>,
    pub analysis: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alignment_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alignment_reason: Option<String>,
}

/// A tracked forecast for one ticker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub id: String,
    pub ticker: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub chart_image: String,
    pub user_prediction: Direction,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub user_reasoning: String,
    #[serde(default)]
    pub target_price: Option<f64>,
    pub gemini_prediction: Direction,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub gemini_reasoning: String,
    #[serde(default)]
    pub gemini_alignment_score: Option<f64>,
    #[serde(default)]
    pub gemini_alignment_reason: Option<String>,
    pub initial_price: f64,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    pub status: PredictionStatus,
    #[serde(default)]
    pub weekly_data: Vec<WeeklyUpdate>,
    #[serde(default)]
    pub final_retrospective: Option<String>,
}

/// User input for a new prediction, validated by the lifecycle manager
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewPrediction {
    pub ticker: String,
    /// Chart as a `data:<mime>;base64,<payload>` URL
    pub chart_image: String,
    pub direction: String,
    pub reasoning: String,
    pub target_price: Option<f64>,
}

/// Partial update of the mutable prediction fields.
/// Everything else is write-once at creation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PredictionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weekly_data: Option<Vec<WeeklyUpdate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_retrospective: Option<String>,
}

impl PredictionPatch {
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.weekly_data.is_none() && self.final_retrospective.is_none()
    }
}

/// AI calls made on one calendar day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounter {
    pub date: NaiveDate,
    pub count: u32,
}

/// Older stores kept these text columns nullable
fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// RFC 3339 timestamps on the way out; RFC 3339 or SQLite's
/// `YYYY-MM-DD HH:MM:SS` (as UTC) on the way in.
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, SubsecRound, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Current time at the millisecond precision timestamps are stored with
    pub fn now() -> DateTime<Utc> {
        Utc::now().trunc_subsecs(3)
    }

    pub fn format(ts: &DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_direction_parse() {
        assert_eq!(Direction::parse("up"), Some(Direction::Up));
        assert_eq!(Direction::parse(" DOWN "), Some(Direction::Down));
        assert_eq!(Direction::parse("sideways"), None);
        assert_eq!(Direction::parse(""), None);
    }

    #[test]
    fn test_timestamp_parse_formats() {
        let expected = Utc.with_ymd_and_hms(2025, 3, 14, 9, 30, 0).unwrap();
        assert_eq!(timestamp::parse("2025-03-14T09:30:00.000Z"), Some(expected));
        assert_eq!(timestamp::parse("2025-03-14T16:30:00+07:00"), Some(expected));
        assert_eq!(timestamp::parse("2025-03-14 09:30:00"), Some(expected));
        assert_eq!(timestamp::parse("last tuesday"), None);
    }

    #[test]
    fn test_now_survives_format_and_parse() {
        let now = timestamp::now();
        assert_eq!(timestamp::parse(&timestamp::format(&now)), Some(now));
    }

    #[test]
    fn test_weekly_update_json_omits_missing_alignment() {
        let update = WeeklyUpdate {
            week: 1,
            price: 150.0,
            date: Utc.with_ymd_and_hms(2025, 3, 21, 0, 0, 0).unwrap(),
            analysis: "Holding above support".to_string(),
            alignment_score: None,
            alignment_reason: None,
        };

        let json = serde_json::to_string(&update).unwrap();
        assert!(!json.contains("alignment_score"));
        assert!(json.contains("\"date\":\"2025-03-21T00:00:00.000Z\""));

        let back: WeeklyUpdate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, update);
    }

    #[test]
    fn test_prediction_accepts_nulls_from_older_backups() {
        let json = r#"{
            "id": "p-1", "ticker": "AAPL", "chart_image": "data:image/png;base64,AA==",
            "user_prediction": "up", "user_reasoning": "breakout",
            "target_price": null,
            "gemini_prediction": "down", "gemini_reasoning": "overbought",
            "gemini_alignment_score": null, "gemini_alignment_reason": null,
            "initial_price": 148.5, "created_at": "2025-01-02 10:00:00",
            "status": "active", "weekly_data": [], "final_retrospective": null
        }"#;

        let prediction: Prediction = serde_json::from_str(json).unwrap();
        assert_eq!(prediction.gemini_prediction, Direction::Down);
        assert_eq!(prediction.status, PredictionStatus::Active);
        assert!(prediction.target_price.is_none());
    }

    #[test]
    fn test_prediction_null_text_columns_read_as_empty() {
        let json = r#"{
            "id": "p-2", "ticker": "MSFT", "chart_image": null,
            "user_prediction": "down", "user_reasoning": null,
            "gemini_prediction": "down",
            "initial_price": 410.0, "created_at": "2025-01-03 10:00:00",
            "status": "active"
        }"#;

        let prediction: Prediction = serde_json::from_str(json).unwrap();
        assert_eq!(prediction.chart_image, "");
        assert_eq!(prediction.user_reasoning, "");
        assert_eq!(prediction.gemini_reasoning, "");
    }

    #[test]
    fn test_patch_is_empty() {
        assert!(PredictionPatch::default().is_empty());
        let patch = PredictionPatch {
            final_retrospective: Some("done".to_string()),
            ..Default::default()
        };
        assert!(!patch.is_empty());
    }
}

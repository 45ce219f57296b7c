//! Clickstream records carried on the Kinesis stream, and the rules that
//! validate and enrich them before they are stored.

use bon::Builder;
use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("record data is not UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("record data is not JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("record data is not a JSON object")]
    NotAnObject,

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid timestamp format")]
    InvalidTimestamp,

    #[error("Invalid event_type: {0}")]
    InvalidEventType(String),

    #[error("Invalid user_id")]
    InvalidUserId,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    View,
    Click,
    Purchase,
    Signup,
    Login,
    Logout,
}

impl EventType {
    /// Event types scored by the model endpoint.
    pub fn wants_prediction(&self) -> bool {
        matches!(self, Self::Purchase | Self::View | Self::Click)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::View => write!(f, "view"),
            Self::Click => write!(f, "click"),
            Self::Purchase => write!(f, "purchase"),
            Self::Signup => write!(f, "signup"),
            Self::Login => write!(f, "login"),
            Self::Logout => write!(f, "logout"),
        }
    }
}

impl FromStr for EventType {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "view" => Ok(Self::View),
            "click" => Ok(Self::Click),
            "purchase" => Ok(Self::Purchase),
            "signup" => Ok(Self::Signup),
            "login" => Ok(Self::Login),
            "logout" => Ok(Self::Logout),
            other => Err(RecordError::InvalidEventType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserSegment {
    HighValue,
    MediumValue,
    LowValue,
}

impl UserSegment {
    pub fn classify(event_type: EventType, value: f64) -> Self {
        if event_type == EventType::Purchase {
            Self::HighValue
        } else if value > 100.0 {
            Self::MediumValue
        } else {
            Self::LowValue
        }
    }
}

impl fmt::Display for UserSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HighValue => write!(f, "high_value"),
            Self::MediumValue => write!(f, "medium_value"),
            Self::LowValue => write!(f, "low_value"),
        }
    }
}

/// Reads the payload of a Kinesis record, already base64-decoded by the
/// event envelope, as a JSON object.
pub fn decode_record(data: &[u8]) -> Result<Map<String, Value>, RecordError> {
    let text = std::str::from_utf8(data)?;
    match serde_json::from_str(text)? {
        Value::Object(map) => Ok(map),
        _ => Err(RecordError::NotAnObject),
    }
}

/// RFC 3339 (`Z` or an offset); a timestamp without an offset is read as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<FixedOffset>, RecordError> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .map(|naive| naive.and_utc().fixed_offset())
        })
        .map_err(|_| RecordError::InvalidTimestamp)
}

/// A validated record plus the fields added while processing it. `data`
/// keeps every field the producer sent.
#[derive(Builder, Debug, Clone, PartialEq)]
pub struct ClickEvent {
    pub data: Map<String, Value>,
    pub timestamp: DateTime<FixedOffset>,
    pub user_id: String,
    pub event_type: EventType,
    #[builder(default)]
    pub value: f64,
    #[builder(default)]
    pub session_duration: i64,
    pub user_segment: UserSegment,
    pub processed_at: String,
    pub ml_prediction: Option<Value>,
}

impl ClickEvent {
    pub fn from_data(data: Map<String, Value>, now: DateTime<Utc>) -> Result<Self, RecordError> {
        for field in ["timestamp", "user_id", "event_type"] {
            if !data.contains_key(field) {
                return Err(RecordError::MissingField(field));
            }
        }

        let timestamp = data
            .get("timestamp")
            .and_then(Value::as_str)
            .ok_or(RecordError::InvalidTimestamp)
            .and_then(parse_timestamp)?;

        let event_type = match data.get("event_type") {
            Some(Value::String(raw)) => raw.parse::<EventType>()?,
            Some(other) => return Err(RecordError::InvalidEventType(other.to_string())),
            None => return Err(RecordError::MissingField("event_type")),
        };

        let user_id = match data.get("user_id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => return Err(RecordError::InvalidUserId),
        };

        let value = data.get("value").and_then(Value::as_f64).unwrap_or(0.0);
        let session_duration = match event_type {
            EventType::Login => 0,
            _ => data
                .get("session_duration")
                .and_then(|d| d.as_i64().or_else(|| d.as_f64().map(|f| f as i64)))
                .unwrap_or(0),
        };

        Ok(Self::builder()
            .user_segment(UserSegment::classify(event_type, value))
            .data(data)
            .timestamp(timestamp)
            .user_id(user_id)
            .event_type(event_type)
            .value(value)
            .session_duration(session_duration)
            .processed_at(now.to_rfc3339())
            .build())
    }

    /// `[value, session_duration, is_purchase, is_high_value]`
    pub fn features(&self) -> [f64; 4] {
        [
            self.value,
            self.session_duration as f64,
            if self.event_type == EventType::Purchase { 1.0 } else { 0.0 },
            if self.user_segment == UserSegment::HighValue { 1.0 } else { 0.0 },
        ]
    }

    pub fn inference_payload(&self) -> String {
        json!({ "instances": [self.features()] }).to_string()
    }

    /// Partitioned data lake key, `events/year=/month=/day=/hour=/user_ts.json`.
    pub fn s3_key(&self) -> String {
        format!(
            "events/year={}/month={}/day={}/hour={}/{}_{}.json",
            self.timestamp.format("%Y"),
            self.timestamp.format("%m"),
            self.timestamp.format("%d"),
            self.timestamp.format("%H"),
            self.user_id,
            self.timestamp.to_rfc3339()
        )
    }

    /// The producer's fields with the enrichment applied.
    pub fn to_json(&self) -> Value {
        let mut data = self.data.clone();
        data.insert("processed_at".to_string(), json!(self.processed_at));
        data.insert("session_duration".to_string(), json!(self.session_duration));
        data.insert("user_segment".to_string(), json!(self.user_segment));
        if let Some(prediction) = &self.ml_prediction {
            data.insert("ml_prediction".to_string(), prediction.clone());
        }
        Value::Object(data)
    }
}

pub fn fallback_prediction() -> Value {
    json!({ "prediction": 0.0, "confidence": 0.0 })
}

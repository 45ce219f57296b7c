//! Turning a prediction request into the model's feature vector, and the
//! model's answer back into a prediction.

use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

pub const FEATURE_COUNT: usize = 8;

#[derive(Debug, Error, PartialEq)]
pub enum RequestError {
    #[error("Invalid JSON body")]
    InvalidJson,

    #[error("Request body must be a JSON object")]
    NotAnObject,

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Field {0} must be numeric")]
    NotNumeric(&'static str),
}

/// Reads a number the way a loose client sends it: a JSON number, a
/// numeric string or a boolean. Absent and null read as zero.
pub fn loose_number(value: Option<&Value>) -> Option<f64> {
    match value {
        None | Some(Value::Null) => Some(0.0),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        Some(Value::Bool(b)) => Some(if *b { 1.0 } else { 0.0 }),
        Some(_) => None,
    }
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
    }
}

pub fn validate(data: &Map<String, Value>) -> Result<(), RequestError> {
    if !data.contains_key("user_id") {
        return Err(RequestError::MissingField("user_id"));
    }

    if let Some(age) = data.get("user_age") {
        let whole = match age {
            Value::Number(n) => n.as_f64().is_some(),
            Value::String(s) => s.trim().parse::<i64>().is_ok(),
            _ => false,
        };
        if !whole {
            return Err(RequestError::NotNumeric("user_age"));
        }
    }

    for field in ["income", "session_duration"] {
        if data.contains_key(field) && loose_number(data.get(field)).is_none() {
            return Err(RequestError::NotNumeric(field));
        }
    }
    Ok(())
}

/// Normalized model inputs in the order the endpoint was trained on. Any
/// unreadable field zeroes the whole vector.
pub fn extract_features(data: &Map<String, Value>) -> Vec<f64> {
    let scaled = |field: &str, divisor: f64| loose_number(data.get(field)).map(|v| v / divisor);
    let flag = |field: &str| if truthy(data.get(field)) { 1.0 } else { 0.0 };

    let features = [
        scaled("user_age", 100.0),
        scaled("income", 100_000.0),
        scaled("session_duration", 3600.0),
        Some(flag("is_premium_user")),
        Some(flag("has_previous_purchase")),
        scaled("page_views", 100.0),
        scaled("time_on_site", 3600.0),
        scaled("bounce_rate", 100.0),
    ];

    match features.into_iter().collect::<Option<Vec<_>>>() {
        Some(features) => features,
        None => {
            tracing::error!("Error extracting features, using zeros");
            vec![0.0; FEATURE_COUNT]
        }
    }
}

pub fn inference_payload(features: &[f64]) -> String {
    json!({ "instances": [features] }).to_string()
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct Prediction {
    pub prediction: f64,
    pub confidence: f64,
    pub probability: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Prediction {
    /// Reads the first entry of `predictions`. Anything missing is zero.
    pub fn from_response(response: &Value) -> Self {
        let Some(first) = response
            .get("predictions")
            .and_then(Value::as_array)
            .and_then(|predictions| predictions.first())
        else {
            return Self::default();
        };

        let field = |name: &str| loose_number(first.get(name)).unwrap_or(0.0);
        Self {
            prediction: field("prediction"),
            confidence: field("confidence"),
            probability: field("probability"),
            error: None,
        }
    }

    pub fn failed(error: &anyhow::Error) -> Self {
        Self {
            error: Some(format!("{:#}", error)),
            ..Self::default()
        }
    }
}

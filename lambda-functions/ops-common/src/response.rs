use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// `{statusCode, body}` envelope returned by the EventBridge-triggered
/// functions. `body` holds a serialized JSON document.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LambdaResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: String,
}

impl LambdaResponse {
    pub fn ok(body: Value) -> Self {
        Self {
            status_code: 200,
            body: body.to_string(),
        }
    }

    pub fn error(message: impl std::fmt::Display) -> Self {
        Self {
            status_code: 500,
            body: json!({ "error": message.to_string() }).to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Parses `body` back into JSON. Returns `Value::Null` for a non-JSON body.
    pub fn body_json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }
}

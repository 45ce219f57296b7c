mod aws;
pub mod request;

pub use aws::{RedshiftWarehouse, SageMakerInference};
pub use request::{extract_features, inference_payload, validate, Prediction, RequestError};

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_lambda_events::apigw::{ApiGatewayProxyRequest, ApiGatewayProxyResponse};
use aws_lambda_events::encodings::Body;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    CONTENT_TYPE,
};
use http::{HeaderMap, HeaderValue, Method};
use ops_common::{env_or, optional_env, required_env, ConfigError};
use serde_json::{json, Map, Value};
use tracing::{error, info};

const ALLOW_METHODS: &str = "POST, OPTIONS";
const ALLOW_HEADERS: &str = "Content-Type";

pub const INSERT_PREDICTION_SQL: &str = "INSERT INTO ml_predictions (\
user_id, prediction, confidence, probability, features, request_timestamp, response_timestamp\
) VALUES (\
:user_id, CAST(:prediction AS DOUBLE PRECISION), CAST(:confidence AS DOUBLE PRECISION), \
CAST(:probability AS DOUBLE PRECISION), :features, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)";

/// A named value bound to a `:name` placeholder.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlParam {
    pub name: &'static str,
    pub value: String,
}

impl SqlParam {
    pub fn new(name: &'static str, value: impl Into<String>) -> Self {
        Self {
            name,
            value: value.into(),
        }
    }
}

#[async_trait]
pub trait Inference: Send + Sync {
    async fn invoke(&self, endpoint: &str, payload: String) -> anyhow::Result<Value>;
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Runs one statement and returns its statement id.
    async fn execute(&self, sql: &str, params: Vec<SqlParam>) -> anyhow::Result<String>;
}

#[derive(Debug, Clone)]
pub struct Config {
    pub sagemaker_endpoint: String,
    pub cluster_id: String,
    pub database: String,
    pub db_user: Option<String>,
    pub secret_arn: Option<String>,
    pub allowed_origin: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            sagemaker_endpoint: required_env("SAGEMAKER_ENDPOINT")?,
            cluster_id: required_env("REDSHIFT_CLUSTER_ID")?,
            database: env_or("REDSHIFT_DATABASE", "analytics"),
            db_user: optional_env("REDSHIFT_DB_USER"),
            secret_arn: optional_env("REDSHIFT_SECRET_ARN"),
            allowed_origin: env_or("ALLOWED_ORIGIN", "*"),
        })
    }
}

/// Decodes the request body into a JSON object. A missing body is an empty
/// object.
pub fn parse_body(request: &ApiGatewayProxyRequest) -> Result<Map<String, Value>, RequestError> {
    let Some(raw) = request.body.as_deref() else {
        return Ok(Map::new());
    };

    let text = if request.is_base64_encoded {
        let bytes = STANDARD.decode(raw).map_err(|_| RequestError::InvalidJson)?;
        String::from_utf8(bytes).map_err(|_| RequestError::InvalidJson)?
    } else {
        raw.to_string()
    };

    if text.trim().is_empty() {
        return Ok(Map::new());
    }

    match serde_json::from_str(&text).map_err(|_| RequestError::InvalidJson)? {
        Value::Object(data) => Ok(data),
        _ => Err(RequestError::NotAnObject),
    }
}

pub fn insert_params(data: &Map<String, Value>, prediction: &Prediction) -> Vec<SqlParam> {
    let user_id = match data.get("user_id") {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Null) | None => "unknown".to_string(),
        Some(other) => other.to_string(),
    };

    vec![
        SqlParam::new("user_id", user_id),
        SqlParam::new("prediction", prediction.prediction.to_string()),
        SqlParam::new("confidence", prediction.confidence.to_string()),
        SqlParam::new("probability", prediction.probability.to_string()),
        SqlParam::new("features", Value::Object(data.clone()).to_string()),
    ]
}

pub struct MlInferenceService<I, W> {
    inference: I,
    warehouse: W,
    config: Config,
}

impl MlInferenceService<SageMakerInference, RedshiftWarehouse> {
    pub async fn from_env() -> Result<Self, lambda_runtime::Error> {
        let config = Config::from_env()?;
        let sdk_config = aws_config::defaults(BehaviorVersion::latest()).load().await;

        Ok(Self::new(
            SageMakerInference::new(aws_sdk_sagemakerruntime::Client::new(&sdk_config)),
            RedshiftWarehouse::new(aws_sdk_redshiftdata::Client::new(&sdk_config), &config),
            config,
        ))
    }
}

impl<I: Inference, W: Warehouse> MlInferenceService<I, W> {
    pub fn new(inference: I, warehouse: W, config: Config) -> Self {
        Self {
            inference,
            warehouse,
            config,
        }
    }

    fn headers(&self) -> HeaderMap {
        let origin = HeaderValue::from_str(&self.config.allowed_origin)
            .unwrap_or_else(|_| HeaderValue::from_static("*"));

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        headers.insert(
            ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOW_METHODS),
        );
        headers.insert(
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOW_HEADERS),
        );
        headers
    }

    pub fn respond(&self, status_code: i64, body: Value) -> ApiGatewayProxyResponse {
        let mut response = ApiGatewayProxyResponse::default();
        response.status_code = status_code;
        response.headers = self.headers();
        response.body = Some(Body::Text(body.to_string()));
        response
    }

    /// Asks the endpoint for a score. A failed call yields a zero
    /// prediction that carries the error.
    pub async fn predict(&self, features: &[f64]) -> Prediction {
        match self
            .inference
            .invoke(&self.config.sagemaker_endpoint, inference_payload(features))
            .await
        {
            Ok(response) => Prediction::from_response(&response),
            Err(e) => {
                error!("Error getting prediction: {:#}", e);
                Prediction::failed(&e)
            }
        }
    }

    /// Records the prediction for analytics. Failures are logged only.
    pub async fn store_prediction(&self, data: &Map<String, Value>, prediction: &Prediction) {
        match self
            .warehouse
            .execute(INSERT_PREDICTION_SQL, insert_params(data, prediction))
            .await
        {
            Ok(statement_id) => info!("Stored prediction in Redshift: {}", statement_id),
            Err(e) => error!("Error storing prediction: {:#}", e),
        }
    }

    pub async fn handle_request(
        &self,
        request: ApiGatewayProxyRequest,
        request_id: &str,
        now: DateTime<Utc>,
    ) -> ApiGatewayProxyResponse {
        if request.http_method == Method::OPTIONS {
            return self.respond(200, json!({}));
        }

        let data = match parse_body(&request).and_then(|data| validate(&data).map(|_| data)) {
            Ok(data) => data,
            Err(e) => {
                info!("Rejected inference request: {}", e);
                return self.respond(
                    400,
                    json!({ "error": e.to_string(), "message": "Invalid request" }),
                );
            }
        };

        let features = extract_features(&data);
        let prediction = self.predict(&features).await;
        self.store_prediction(&data, &prediction).await;

        self.respond(
            200,
            json!({
                "prediction": prediction,
                "features": features,
                "request_id": request_id,
                "timestamp": now.to_rfc3339(),
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(body: Option<&str>) -> ApiGatewayProxyRequest {
        let mut request = ApiGatewayProxyRequest::default();
        request.http_method = Method::POST;
        request.body = body.map(str::to_string);
        request
    }

    #[test]
    fn test_parse_body() {
        let data = parse_body(&request(Some(r#"{"user_id": "u1", "income": 5}"#))).unwrap();
        assert_eq!(data["user_id"], "u1");

        assert!(parse_body(&request(None)).unwrap().is_empty());
        assert_eq!(
            parse_body(&request(Some("{oops"))).unwrap_err(),
            RequestError::InvalidJson
        );
        assert_eq!(
            parse_body(&request(Some("[1, 2]"))).unwrap_err(),
            RequestError::NotAnObject
        );
    }

    #[test]
    fn test_parse_base64_body() {
        let mut req = request(Some(&STANDARD.encode(r#"{"user_id": "u2"}"#)));
        req.is_base64_encoded = true;
        assert_eq!(parse_body(&req).unwrap()["user_id"], "u2");
    }

    #[test]
    fn test_insert_params_are_bound_not_inlined() {
        assert!(!INSERT_PREDICTION_SQL.contains('\''));

        let Value::Object(data) = json!({"user_id": "o'brien", "income": 1}) else {
            unreachable!()
        };
        let prediction = Prediction {
            prediction: 1.0,
            confidence: 0.5,
            probability: 0.25,
            error: None,
        };
        let params = insert_params(&data, &prediction);

        for param in &params {
            assert!(INSERT_PREDICTION_SQL.contains(&format!(":{}", param.name)));
        }
        assert_eq!(params[0], SqlParam::new("user_id", "o'brien"));
        assert_eq!(params[3], SqlParam::new("probability", "0.25"));
        assert_eq!(
            serde_json::from_str::<Value>(&params[4].value).unwrap(),
            json!({"user_id": "o'brien", "income": 1})
        );
    }

    #[test]
    fn test_insert_params_default_user() {
        let params = insert_params(&Map::new(), &Prediction::default());
        assert_eq!(params[0].value, "unknown");
        assert_eq!(params[1].value, "0");
    }
}

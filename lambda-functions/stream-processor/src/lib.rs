mod aws;
pub mod event;

pub use aws::{AwsInference, RedshiftWarehouse, S3DataLake};
pub use event::{
    decode_record, fallback_prediction, ClickEvent, EventType, RecordError, UserSegment,
};

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_lambda_events::kinesis::{KinesisEvent, KinesisEventRecord};
use bon::Builder;
use chrono::{DateTime, Utc};
use ops_common::{optional_env, required_env, ConfigError, LambdaResponse};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

pub const INSERT_EVENT_SQL: &str = "INSERT INTO events (\
timestamp, user_id, event_type, value, session_duration, user_segment, ml_prediction, processed_at\
) VALUES (\
:timestamp, :user_id, :event_type, CAST(:value AS DOUBLE PRECISION), \
CAST(:session_duration AS INTEGER), :user_segment, :ml_prediction, :processed_at)";

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
pub trait Warehouse: Send + Sync {
    /// Runs one statement and returns its statement id.
    async fn execute(&self, sql: &str, params: Vec<SqlParam>) -> anyhow::Result<String>;
}

#[async_trait]
pub trait DataLake: Send + Sync {
    async fn put_json(&self, key: &str, body: String) -> anyhow::Result<()>;
}

#[async_trait]
pub trait Inference: Send + Sync {
    async fn invoke(&self, endpoint: &str, payload: String) -> anyhow::Result<Value>;
}

#[derive(Debug, Clone)]
pub struct Config {
    pub cluster_id: String,
    pub database: String,
    pub bucket: String,
    pub sagemaker_endpoint: Option<String>,
    pub db_user: Option<String>,
    pub secret_arn: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            cluster_id: required_env("REDSHIFT_CLUSTER_ID")?,
            database: required_env("REDSHIFT_DATABASE")?,
            bucket: required_env("S3_BUCKET")?,
            sagemaker_endpoint: optional_env("SAGEMAKER_ENDPOINT"),
            db_user: optional_env("REDSHIFT_DB_USER"),
            secret_arn: optional_env("REDSHIFT_SECRET_ARN"),
        })
    }
}

pub fn insert_params(event: &ClickEvent) -> Vec<SqlParam> {
    let raw_timestamp = event
        .data
        .get("timestamp")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| event.timestamp.to_rfc3339());
    let prediction = event.ml_prediction.clone().unwrap_or_else(|| json!({}));

    vec![
        SqlParam::new("timestamp", raw_timestamp),
        SqlParam::new("user_id", event.user_id.as_str()),
        SqlParam::new("event_type", event.event_type.to_string()),
        SqlParam::new("value", event.value.to_string()),
        SqlParam::new("session_duration", event.session_duration.to_string()),
        SqlParam::new("user_segment", event.user_segment.to_string()),
        SqlParam::new("ml_prediction", prediction.to_string()),
        SqlParam::new("processed_at", event.processed_at.as_str()),
    ]
}

#[derive(Builder, Serialize, Debug, Clone, PartialEq)]
pub struct ProcessingSummary {
    pub processed: usize,
    pub failed: usize,
    pub processed_records: Vec<String>,
    pub failed_records: Vec<String>,
}

pub struct StreamProcessorService<W, L, I> {
    warehouse: W,
    lake: L,
    inference: I,
    config: Config,
}

impl StreamProcessorService<RedshiftWarehouse, S3DataLake, AwsInference> {
    pub async fn from_env() -> Result<Self, lambda_runtime::Error> {
        let config = Config::from_env()?;
        let sdk_config = aws_config::defaults(BehaviorVersion::latest()).load().await;

        Ok(Self::new(
            RedshiftWarehouse::new(aws_sdk_redshiftdata::Client::new(&sdk_config), &config),
            S3DataLake::new(aws_sdk_s3::Client::new(&sdk_config), config.bucket.clone()),
            AwsInference::new(aws_sdk_sagemakerruntime::Client::new(&sdk_config)),
            config,
        ))
    }
}

impl<W: Warehouse, L: DataLake, I: Inference> StreamProcessorService<W, L, I> {
    pub fn new(warehouse: W, lake: L, inference: I, config: Config) -> Self {
        Self {
            warehouse,
            lake,
            inference,
            config,
        }
    }

    async fn predict(&self, event: &ClickEvent) -> Option<Value> {
        let endpoint = self.config.sagemaker_endpoint.as_deref()?;
        if !event.event_type.wants_prediction() {
            return None;
        }

        match self.inference.invoke(endpoint, event.inference_payload()).await {
            Ok(prediction) => Some(prediction),
            Err(e) => {
                error!("Error getting ML prediction: {:#}", e);
                Some(fallback_prediction())
            }
        }
    }

    /// Validates, enriches and stores one record in the warehouse and then
    /// the data lake.
    pub async fn process_record(
        &self,
        record: &KinesisEventRecord,
        now: DateTime<Utc>,
    ) -> anyhow::Result<ClickEvent> {
        let data = decode_record(&record.kinesis.data.0)?;
        let mut event = ClickEvent::from_data(data, now)?;
        event.ml_prediction = self.predict(&event).await;

        let statement_id = self
            .warehouse
            .execute(INSERT_EVENT_SQL, insert_params(&event))
            .await?;
        info!("Stored record in Redshift: {}", statement_id);

        let key = event.s3_key();
        self.lake
            .put_json(&key, event.to_json().to_string())
            .await?;
        info!("Stored record in S3: {}", key);

        Ok(event)
    }

    pub async fn process_batch(&self, batch: KinesisEvent, now: DateTime<Utc>) -> ProcessingSummary {
        info!("Processing {} records", batch.records.len());

        let mut processed_records = Vec::new();
        let mut failed_records = Vec::new();
        for record in batch.records {
            let sequence_number = record.kinesis.sequence_number.clone();
            match self.process_record(&record, now).await {
                Ok(_) => processed_records.push(sequence_number),
                Err(e) => {
                    error!("Error processing record {}: {:#}", sequence_number, e);
                    failed_records.push(sequence_number);
                }
            }
        }

        info!("Successfully processed {} records", processed_records.len());
        if !failed_records.is_empty() {
            warn!("Failed to process {} records", failed_records.len());
        }

        ProcessingSummary::builder()
            .processed(processed_records.len())
            .failed(failed_records.len())
            .processed_records(processed_records)
            .failed_records(failed_records)
            .build()
    }

    pub async fn handle_event(&self, payload: Value) -> LambdaResponse {
        let batch: KinesisEvent = match serde_json::from_value(payload) {
            Ok(batch) => batch,
            Err(e) => {
                error!("Error in stream processor: {}", e);
                return LambdaResponse::error(e);
            }
        };

        let summary = self.process_batch(batch, Utc::now()).await;
        match serde_json::to_value(summary) {
            Ok(body) => LambdaResponse::ok(body),
            Err(e) => LambdaResponse::error(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(value: Value) -> ClickEvent {
        let Value::Object(data) = value else {
            panic!("expected object");
        };
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 10, 5, 0).unwrap();
        ClickEvent::from_data(data, now).unwrap()
    }

    #[test]
    fn test_insert_sql_has_no_inline_values() {
        assert!(!INSERT_EVENT_SQL.contains('\''));
        for param in insert_params(&event(json!({
            "timestamp": "2024-01-15T10:00:00Z",
            "user_id": "u",
            "event_type": "view"
        }))) {
            assert!(INSERT_EVENT_SQL.contains(&format!(":{}", param.name)));
        }
    }

    #[test]
    fn test_insert_params() {
        let mut event = event(json!({
            "timestamp": "2024-01-15T10:00:00Z",
            "user_id": "o'brien",
            "event_type": "purchase",
            "value": 19.5
        }));
        event.ml_prediction = Some(json!({"prediction": 0.8}));

        let params = insert_params(&event);
        let get = |name: &str| {
            params
                .iter()
                .find(|p| p.name == name)
                .map(|p| p.value.clone())
                .unwrap()
        };

        assert_eq!(get("timestamp"), "2024-01-15T10:00:00Z");
        assert_eq!(get("user_id"), "o'brien");
        assert_eq!(get("value"), "19.5");
        assert_eq!(get("session_duration"), "0");
        assert_eq!(get("user_segment"), "high_value");
        assert_eq!(get("ml_prediction"), r#"{"prediction":0.8}"#);
        assert_eq!(get("processed_at"), "2024-01-15T10:05:00+00:00");
    }

    #[test]
    fn test_insert_params_without_prediction() {
        let event = event(json!({
            "timestamp": "2024-01-15T10:00:00Z",
            "user_id": "u",
            "event_type": "signup"
        }));
        let params = insert_params(&event);
        assert!(params
            .iter()
            .any(|p| p.name == "ml_prediction" && p.value == "{}"));
    }

    #[test]
    fn test_summary_serialization() {
        let summary = ProcessingSummary::builder()
            .processed(1)
            .failed(1)
            .processed_records(vec!["1".to_string()])
            .failed_records(vec!["2".to_string()])
            .build();

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["processed"], 1);
        assert_eq!(json["failed_records"], json!(["2"]));
    }
}

//! Lineage records: which system fed which, and how the data was changed
//! on the way.

use bon::Builder;
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

pub const LINEAGE_PREFIX: &str = "lineage/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineageSource {
    Kinesis,
    Lambda,
    S3,
}

impl LineageSource {
    pub fn from_source(source: &str) -> Option<Self> {
        match source {
            "aws.kinesis" => Some(Self::Kinesis),
            "aws.lambda" => Some(Self::Lambda),
            "aws.s3" => Some(Self::S3),
            _ => None,
        }
    }
}

/// One hop through the platform.
#[derive(Builder, Serialize, Debug, Clone, PartialEq)]
#[builder(on(String, into))]
pub struct Flow {
    pub source_system: String,
    pub source_table: String,
    pub source_column: String,
    pub target_system: String,
    pub target_table: String,
    pub target_column: String,
    pub transformation_type: String,
    pub transformation_logic: String,
    pub data_quality_rules: String,
    pub business_owner: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct LineageRecord {
    pub lineage_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: String,
    pub data_classification: String,
    pub retention_policy: String,
    /// Absent when the event names a component with no known flow.
    #[serde(flatten)]
    pub flow: Option<Flow>,
}

impl LineageRecord {
    pub fn new(lineage_id: String, now: DateTime<Utc>, flow: Option<Flow>) -> Self {
        Self {
            lineage_id,
            created_at: now,
            updated_at: now,
            created_by: "system".to_string(),
            data_classification: "internal".to_string(),
            retention_policy: "7_years".to_string(),
            flow,
        }
    }

    /// `[year, month, day, hour]` of `created_at`, zero padded.
    pub fn partition_values(&self) -> Vec<String> {
        let at = self.created_at;
        vec![
            at.year().to_string(),
            format!("{:02}", at.month()),
            format!("{:02}", at.day()),
            format!("{:02}", at.hour()),
        ]
    }

    pub fn partition_prefix(&self) -> String {
        let values = self.partition_values();
        format!(
            "{}year={}/month={}/day={}/hour={}/",
            LINEAGE_PREFIX, values[0], values[1], values[2], values[3]
        )
    }

    pub fn key(&self) -> String {
        format!("{}{}.json", self.partition_prefix(), self.lineage_id)
    }

    pub fn metadata(&self) -> BTreeMap<String, String> {
        let field = |pick: fn(&Flow) -> &str| {
            self.flow
                .as_ref()
                .map(pick)
                .unwrap_or("unknown")
                .to_string()
        };

        BTreeMap::from([
            ("lineage_id".to_string(), self.lineage_id.clone()),
            ("source_system".to_string(), field(|f| f.source_system.as_str())),
            ("target_system".to_string(), field(|f| f.target_system.as_str())),
            (
                "transformation_type".to_string(),
                field(|f| f.transformation_type.as_str()),
            ),
        ])
    }
}

fn detail_str<'a>(detail: &'a Value, pointer: &str) -> &'a str {
    detail
        .pointer(pointer)
        .and_then(Value::as_str)
        .unwrap_or("unknown")
}

pub fn kinesis_flow(detail: &Value) -> Option<Flow> {
    Some(
        Flow::builder()
            .source_system("kinesis")
            .source_table(detail_str(detail, "/streamName"))
            .source_column("data")
            .target_system("lambda")
            .target_table("data_processor")
            .target_column("processed_data")
            .transformation_type("stream_processing")
            .transformation_logic("Real-time data processing and enrichment")
            .data_quality_rules("Schema validation, data type checking, completeness validation")
            .business_owner("data_engineering_team")
            .build(),
    )
}

pub fn lambda_flow(detail: &Value) -> Option<Flow> {
    let function_name = detail_str(detail, "/functionName");

    if function_name.contains("data-processor") || function_name.contains("stream-processor") {
        Some(
            Flow::builder()
                .source_system("lambda")
                .source_table("data_processor")
                .source_column("processed_data")
                .target_system("redshift")
                .target_table("events")
                .target_column("all_columns")
                .transformation_type("data_enrichment")
                .transformation_logic("Feature engineering, ML inference, data validation")
                .data_quality_rules("Business rule validation, ML model validation")
                .business_owner("data_science_team")
                .build(),
        )
    } else if function_name.contains("ml-inference") {
        Some(
            Flow::builder()
                .source_system("lambda")
                .source_table("ml_inference")
                .source_column("prediction_data")
                .target_system("redshift")
                .target_table("ml_predictions")
                .target_column("prediction_results")
                .transformation_type("ml_inference")
                .transformation_logic("Real-time ML prediction and feature engineering")
                .data_quality_rules("Model validation, confidence threshold checking")
                .business_owner("ml_engineering_team")
                .build(),
        )
    } else if function_name.contains("data-quality") {
        Some(
            Flow::builder()
                .source_system("lambda")
                .source_table("data_quality_checker")
                .source_column("quality_metrics")
                .target_system("cloudwatch")
                .target_table("quality_alerts")
                .target_column("alert_data")
                .transformation_type("quality_monitoring")
                .transformation_logic("Data quality assessment and anomaly detection")
                .data_quality_rules("Completeness, consistency, freshness validation")
                .business_owner("data_governance_team")
                .build(),
        )
    } else {
        None
    }
}

pub fn s3_flow(detail: &Value) -> Option<Flow> {
    let object_key = detail_str(detail, "/object/key");

    if object_key.contains("events/") {
        Some(
            Flow::builder()
                .source_system("s3")
                .source_table("data_lake")
                .source_column("raw_events")
                .target_system("athena")
                .target_table("events_table")
                .target_column("partitioned_data")
                .transformation_type("data_partitioning")
                .transformation_logic("Time-based partitioning for query optimization")
                .data_quality_rules("Partition integrity, data format validation")
                .business_owner("data_engineering_team")
                .build(),
        )
    } else if object_key.contains(LINEAGE_PREFIX) {
        Some(
            Flow::builder()
                .source_system("s3")
                .source_table("lineage_storage")
                .source_column("lineage_metadata")
                .target_system("glue")
                .target_table("data_lineage")
                .target_column("lineage_records")
                .transformation_type("metadata_management")
                .transformation_logic("Data lineage tracking and metadata management")
                .data_quality_rules("Lineage completeness, metadata validation")
                .business_owner("data_governance_team")
                .build(),
        )
    } else {
        None
    }
}

/// The flow an event describes, or `None` when the component is unknown.
pub fn flow_for(source: LineageSource, detail: &Value) -> Option<Flow> {
    match source {
        LineageSource::Kinesis => kinesis_flow(detail),
        LineageSource::Lambda => lambda_flow(detail),
        LineageSource::S3 => s3_flow(detail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 7, 9, 30, 0).unwrap()
    }

    #[test]
    fn test_source_names() {
        assert_eq!(LineageSource::from_source("aws.s3"), Some(LineageSource::S3));
        assert_eq!(LineageSource::from_source("aws.glue"), None);
    }

    #[test]
    fn test_kinesis_flow_names_the_stream() {
        let flow = flow_for(LineageSource::Kinesis, &json!({"streamName": "clickstream"})).unwrap();
        assert_eq!(flow.source_table, "clickstream");
        assert_eq!(flow.transformation_type, "stream_processing");

        let unnamed = flow_for(LineageSource::Kinesis, &json!({})).unwrap();
        assert_eq!(unnamed.source_table, "unknown");
    }

    #[test]
    fn test_lambda_flows() {
        let flow = |name: &str| lambda_flow(&json!({"functionName": name}));

        assert_eq!(flow("prod-data-processor").unwrap().target_table, "events");
        assert_eq!(flow("stream-processor").unwrap().target_table, "events");
        assert_eq!(flow("ml-inference-api").unwrap().target_table, "ml_predictions");
        assert_eq!(flow("data-quality-checker").unwrap().target_system, "cloudwatch");
        assert_eq!(flow("cost-optimizer"), None);
    }

    #[test]
    fn test_s3_flows() {
        let flow = |key: &str| s3_flow(&json!({"bucket": {"name": "lake"}, "object": {"key": key}}));

        assert_eq!(
            flow("events/year=2024/part-0.json").unwrap().transformation_type,
            "data_partitioning"
        );
        assert_eq!(
            flow("lineage/year=2024/x.json").unwrap().transformation_type,
            "metadata_management"
        );
        assert_eq!(flow("backups/db.sql"), None);
    }

    #[test]
    fn test_record_layout() {
        let record = LineageRecord::new(
            "6f1c".to_string(),
            now(),
            kinesis_flow(&json!({"streamName": "clickstream"})),
        );

        assert_eq!(record.partition_values(), vec!["2024", "03", "07", "09"]);
        assert_eq!(
            record.key(),
            "lineage/year=2024/month=03/day=07/hour=09/6f1c.json"
        );

        let wire = serde_json::to_value(&record).unwrap();
        assert_eq!(wire["lineage_id"], "6f1c");
        assert_eq!(wire["created_by"], "system");
        assert_eq!(wire["retention_policy"], "7_years");
        assert_eq!(wire["source_system"], "kinesis");
        assert_eq!(wire["created_at"], wire["updated_at"]);
    }

    #[test]
    fn test_metadata_without_flow() {
        let record = LineageRecord::new("abc".to_string(), now(), None);
        let metadata = record.metadata();

        assert_eq!(metadata["lineage_id"], "abc");
        assert_eq!(metadata["source_system"], "unknown");
        assert_eq!(metadata["transformation_type"], "unknown");

        let wire = serde_json::to_value(&record).unwrap();
        assert!(wire.get("source_system").is_none());
    }
}

mod aws;
pub mod lineage;

pub use aws::{GlueLineageCatalog, S3LineageStore};
pub use lineage::{flow_for, Flow, LineageRecord, LineageSource, LINEAGE_PREFIX};

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_lambda_events::eventbridge::EventBridgeEvent;
use chrono::{DateTime, Utc};
use ops_common::{required_env, ConfigError, LambdaResponse};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{error, info, warn};
use uuid::Uuid;

pub type LineageEvent = EventBridgeEvent<Value>;

#[async_trait]
pub trait LineageStore: Send + Sync {
    async fn put_record(
        &self,
        key: &str,
        body: String,
        metadata: BTreeMap<String, String>,
    ) -> anyhow::Result<()>;
}

#[async_trait]
pub trait LineageCatalog: Send + Sync {
    /// Registers one `lineage` table partition stored at `location`.
    async fn add_partition(&self, values: Vec<String>, location: String) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bucket: String,
    pub glue_database: String,
    pub glue_table: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            bucket: required_env("S3_BUCKET")?,
            glue_database: required_env("GLUE_DATABASE")?,
            glue_table: required_env("GLUE_TABLE")?,
        })
    }
}

pub struct LineageService<S, C> {
    store: S,
    catalog: C,
    config: Config,
}

impl LineageService<S3LineageStore, GlueLineageCatalog> {
    pub async fn from_env() -> Result<Self, lambda_runtime::Error> {
        let config = Config::from_env()?;
        let sdk_config = aws_config::defaults(BehaviorVersion::latest()).load().await;

        Ok(Self::new(
            S3LineageStore::new(aws_sdk_s3::Client::new(&sdk_config), config.bucket.clone()),
            GlueLineageCatalog::new(aws_sdk_glue::Client::new(&sdk_config), &config),
            config,
        ))
    }
}

impl<S: LineageStore, C: LineageCatalog> LineageService<S, C> {
    pub fn new(store: S, catalog: C, config: Config) -> Self {
        Self {
            store,
            catalog,
            config,
        }
    }

    /// True for notifications about objects this tracker wrote itself.
    fn is_own_write(&self, event: &LineageEvent) -> bool {
        let bucket = event.detail.pointer("/bucket/name").and_then(Value::as_str);
        let key = event.detail.pointer("/object/key").and_then(Value::as_str);
        bucket == Some(self.config.bucket.as_str())
            && key.is_some_and(|key| key.starts_with(LINEAGE_PREFIX))
    }

    /// Builds the lineage record an event describes. Events from unknown
    /// sources, and the tracker's own writes, produce none.
    pub fn extract(&self, event: &LineageEvent, now: DateTime<Utc>) -> Option<LineageRecord> {
        let Some(source) = LineageSource::from_source(&event.source) else {
            warn!("Unknown event source: {}", event.source);
            return None;
        };
        if source == LineageSource::S3 && self.is_own_write(event) {
            info!("Skipping notification for a lineage record this tracker stored");
            return None;
        }

        Some(LineageRecord::new(
            Uuid::new_v4().to_string(),
            now,
            flow_for(source, &event.detail),
        ))
    }

    pub async fn store(&self, record: &LineageRecord) -> anyhow::Result<()> {
        let key = record.key();
        let body = serde_json::to_string_pretty(record)?;
        self.store.put_record(&key, body, record.metadata()).await?;
        info!("Stored lineage info in S3: {}", key);
        Ok(())
    }

    /// Adds the record's hourly partition to the catalog. Failures are
    /// logged only.
    pub async fn update_catalog(&self, record: &LineageRecord) {
        let values = record.partition_values();
        let location = format!("s3://{}/{}", self.config.bucket, record.partition_prefix());

        match self.catalog.add_partition(values.clone(), location).await {
            Ok(()) => info!("Updated lineage metadata in Glue: {:?}", values),
            Err(e) => error!("Error updating lineage metadata: {:#}", e),
        }
    }

    pub async fn track(&self, event: &LineageEvent, now: DateTime<Utc>) -> LambdaResponse {
        let record = self.extract(event, now);

        if let Some(record) = &record {
            if let Err(e) = self.store(record).await {
                error!("Error in data lineage tracker: {:#}", e);
                return failure(&e);
            }
            self.update_catalog(record).await;
        }

        LambdaResponse::ok(json!({
            "message": "Data lineage tracked successfully",
            "lineage_id": record.map(|r| r.lineage_id),
            "timestamp": now.to_rfc3339(),
        }))
    }

    pub async fn handle_event(&self, payload: Value) -> LambdaResponse {
        info!("Processing lineage event: {}", payload);

        match serde_json::from_value::<LineageEvent>(payload) {
            Ok(event) => self.track(&event, Utc::now()).await,
            Err(e) => {
                error!("Error in data lineage tracker: {}", e);
                failure(&e)
            }
        }
    }
}

fn failure(e: &dyn std::fmt::Display) -> LambdaResponse {
    LambdaResponse {
        status_code: 500,
        body: json!({
            "error": format!("{:#}", e),
            "message": "Failed to track data lineage",
        })
        .to_string(),
    }
}

mod aws;

pub use aws::AwsRdsSnapshots;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use chrono::{DateTime, Utc};
use ops_common::{
    days_before, days_env_or, optional_env, parse_env_or, required_env, ConfigError,
    LambdaResponse,
};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use tracing::{error, info, warn};

pub const SNAPSHOT_MARKER: &str = "-dr-";

#[derive(Debug, Clone, PartialEq)]
pub struct AwsRegion(String);

impl AwsRegion {
    pub fn new(region: impl Into<String>) -> Self {
        Self(region.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AwsRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotTag {
    pub key: String,
    pub value: String,
}

impl SnapshotTag {
    pub fn new(key: &str, value: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotSummary {
    pub snapshot_id: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// RDS snapshot calls against a single region.
#[async_trait]
pub trait RdsSnapshots: Send + Sync {
    async fn create_snapshot(
        &self,
        db_instance_id: &str,
        snapshot_id: &str,
        tags: Vec<SnapshotTag>,
    ) -> anyhow::Result<()>;

    /// Current status, `None` when the snapshot is not visible yet.
    async fn snapshot_status(&self, snapshot_id: &str) -> anyhow::Result<Option<String>>;

    async fn copy_snapshot(
        &self,
        source_arn: &str,
        target_snapshot_id: &str,
        kms_key_id: Option<String>,
        tags: Vec<SnapshotTag>,
    ) -> anyhow::Result<()>;

    async fn manual_snapshots(&self, db_instance_id: &str) -> anyhow::Result<Vec<SnapshotSummary>>;

    async fn delete_snapshot(&self, snapshot_id: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct Config {
    pub source_region: AwsRegion,
    pub target_region: AwsRegion,
    pub db_instance_id: String,
    pub retention_days: i64,
    pub poll_interval: std::time::Duration,
    pub max_attempts: u32,
    pub target_kms_key_id: Option<String>,
}

impl Config {
    pub fn new(source_region: &str, target_region: &str, db_instance_id: &str) -> Self {
        Self {
            source_region: AwsRegion::new(source_region),
            target_region: AwsRegion::new(target_region),
            db_instance_id: db_instance_id.to_string(),
            retention_days: 7,
            poll_interval: std::time::Duration::from_secs(60),
            max_attempts: 60,
            target_kms_key_id: None,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::new(
            &required_env("SOURCE_REGION")?,
            &required_env("TARGET_REGION")?,
            &required_env("DB_INSTANCE_IDENTIFIER")?,
        );

        Ok(Self {
            retention_days: days_env_or("RETENTION_DAYS", defaults.retention_days)?,
            poll_interval: std::time::Duration::from_secs(parse_env_or(
                "SNAPSHOT_POLL_SECONDS",
                defaults.poll_interval.as_secs(),
            )),
            max_attempts: parse_env_or("SNAPSHOT_MAX_ATTEMPTS", defaults.max_attempts),
            target_kms_key_id: optional_env("TARGET_KMS_KEY_ID"),
            ..defaults
        })
    }
}

pub fn snapshot_id(db_instance_id: &str, now: DateTime<Utc>) -> String {
    format!(
        "{}{}{}",
        db_instance_id,
        SNAPSHOT_MARKER,
        now.format("%Y%m%d-%H%M%S")
    )
}

/// Account id, the fifth field of `arn:aws:lambda:region:account:function:name`.
pub fn account_id(function_arn: &str) -> anyhow::Result<&str> {
    function_arn
        .split(':')
        .nth(4)
        .filter(|account| !account.is_empty())
        .ok_or_else(|| anyhow!("cannot read account id from function ARN {:?}", function_arn))
}

pub fn snapshot_arn(region: &AwsRegion, account_id: &str, snapshot_id: &str) -> String {
    format!("arn:aws:rds:{}:{}:snapshot:{}", region, account_id, snapshot_id)
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupOutcome {
    pub message: String,
    pub source_snapshot: String,
    pub target_snapshot: String,
    pub deleted_snapshots: Vec<String>,
}

pub struct CrossRegionBackupService<R> {
    source: R,
    target: R,
    config: Config,
}

impl CrossRegionBackupService<AwsRdsSnapshots> {
    pub async fn from_env() -> Result<Self, lambda_runtime::Error> {
        let config = Config::from_env()?;

        let source_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.source_region.as_str().to_string()))
            .load()
            .await;
        let target_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.target_region.as_str().to_string()))
            .load()
            .await;

        Ok(Self::new(
            AwsRdsSnapshots::new(aws_sdk_rds::Client::new(&source_config)),
            AwsRdsSnapshots::new(aws_sdk_rds::Client::new(&target_config)),
            config,
        ))
    }
}

impl<R: RdsSnapshots> CrossRegionBackupService<R> {
    pub fn new(source: R, target: R, config: Config) -> Self {
        Self {
            source,
            target,
            config,
        }
    }

    pub async fn wait_for_snapshot(&self, snapshot_id: &str) -> anyhow::Result<()> {
        for attempt in 1..=self.config.max_attempts {
            match self.source.snapshot_status(snapshot_id).await?.as_deref() {
                Some("available") => {
                    info!(
                        "Snapshot {} completed in {}",
                        snapshot_id, self.config.source_region
                    );
                    return Ok(());
                }
                Some(status @ ("failed" | "error")) => {
                    bail!("snapshot {} entered status {}", snapshot_id, status)
                }
                status => info!(
                    "Snapshot {} is {} (attempt {}/{})",
                    snapshot_id,
                    status.unwrap_or("not visible"),
                    attempt,
                    self.config.max_attempts
                ),
            }

            if attempt < self.config.max_attempts {
                tokio::time::sleep(self.config.poll_interval).await;
            }
        }

        bail!(
            "snapshot {} not available after {} attempts",
            snapshot_id,
            self.config.max_attempts
        )
    }

    /// Deletes marked manual snapshots older than the retention window in the
    /// target region. Failures are logged and skipped.
    pub async fn cleanup_old_snapshots(&self, now: DateTime<Utc>) -> Vec<String> {
        let cutoff = days_before(now, self.config.retention_days);

        let snapshots = match self.target.manual_snapshots(&self.config.db_instance_id).await {
            Ok(snapshots) => snapshots,
            Err(e) => {
                error!("Error cleaning up old snapshots: {}", e);
                return Vec::new();
            }
        };

        let mut deleted = Vec::new();
        for snapshot in snapshots {
            let expired = snapshot.created_at.is_some_and(|created| created < cutoff);
            if !expired || !snapshot.snapshot_id.contains(SNAPSHOT_MARKER) {
                continue;
            }

            info!("Deleting old snapshot: {}", snapshot.snapshot_id);
            match self.target.delete_snapshot(&snapshot.snapshot_id).await {
                Ok(()) => deleted.push(snapshot.snapshot_id),
                Err(e) => warn!("Failed to delete snapshot {}: {}", snapshot.snapshot_id, e),
            }
        }
        deleted
    }

    pub async fn run_backup(
        &self,
        account_id: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<BackupOutcome> {
        let config = &self.config;
        let source_snapshot = snapshot_id(&config.db_instance_id, now);

        info!(
            "Creating snapshot {} in {}",
            source_snapshot, config.source_region
        );
        self.source
            .create_snapshot(
                &config.db_instance_id,
                &source_snapshot,
                vec![
                    SnapshotTag::new("Purpose", "DisasterRecovery"),
                    SnapshotTag::new("CreatedBy", "Lambda"),
                ],
            )
            .await?;

        self.wait_for_snapshot(&source_snapshot).await?;

        let target_snapshot = format!("{}-{}", source_snapshot, config.target_region);
        info!("Copying snapshot to {}", config.target_region);
        self.target
            .copy_snapshot(
                &snapshot_arn(&config.source_region, account_id, &source_snapshot),
                &target_snapshot,
                config.target_kms_key_id.clone(),
                vec![
                    SnapshotTag::new("Purpose", "DisasterRecovery"),
                    SnapshotTag::new("SourceRegion", config.source_region.as_str()),
                ],
            )
            .await?;

        let deleted_snapshots = self.cleanup_old_snapshots(now).await;

        Ok(BackupOutcome {
            message: "Cross-region backup completed successfully".to_string(),
            source_snapshot,
            target_snapshot,
            deleted_snapshots,
        })
    }

    pub async fn handle_event(&self, payload: Value, function_arn: &str) -> LambdaResponse {
        info!("Received event: {}", payload);

        let result = match account_id(function_arn) {
            Ok(account) => self.run_backup(account, Utc::now()).await,
            Err(e) => Err(e),
        };

        match result.and_then(|outcome| Ok(serde_json::to_value(outcome)?)) {
            Ok(body) => LambdaResponse::ok(body),
            Err(e) => {
                error!("Error in cross-region backup: {:#}", e);
                LambdaResponse::error(e)
            }
        }
    }
}

mod aws;
pub mod checks;

pub use aws::{AwsQualityMetrics, RedshiftWarehouse};
pub use checks::{
    checker_error_message, CheckName, CheckResult, CheckStatus, OverallStatus, QualityResults,
    Row, Thresholds,
};

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_cloudwatch::types::StandardUnit;
use chrono::{DateTime, Utc};
use ops_common::{
    env_or, notify_best_effort, optional_env, parse_env_or, required_env, ConfigError,
    LambdaResponse, Notifier, SnsNotifier,
};
use serde_json::{json, Value};
use tracing::{error, info, warn};

pub const ERROR_SUBJECT: &str = "Data Quality Checker Error";

#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Runs one query to completion and returns its rows.
    async fn query(&self, sql: &str) -> anyhow::Result<Vec<Row>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct QualityMetric {
    pub name: &'static str,
    pub value: f64,
    pub unit: StandardUnit,
}

#[async_trait]
pub trait QualityMetrics: Send + Sync {
    async fn publish(&self, namespace: &str, metrics: Vec<QualityMetric>) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct Config {
    pub cluster_id: String,
    pub database: String,
    pub db_user: Option<String>,
    pub secret_arn: Option<String>,
    pub sns_topic_arn: Option<String>,
    pub metrics_namespace: String,
    pub thresholds: Thresholds,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Thresholds::default();
        Ok(Self {
            cluster_id: required_env("REDSHIFT_CLUSTER_ID")?,
            database: env_or("REDSHIFT_DATABASE", "analytics"),
            db_user: optional_env("REDSHIFT_DB_USER"),
            secret_arn: optional_env("REDSHIFT_SECRET_ARN"),
            sns_topic_arn: optional_env("SNS_TOPIC_ARN"),
            metrics_namespace: env_or("METRICS_NAMESPACE", "DataAnalytics/DataQuality"),
            thresholds: Thresholds {
                min_hourly_records: parse_env_or(
                    "MIN_HOURLY_RECORDS",
                    defaults.min_hourly_records,
                ),
                max_hourly_records: parse_env_or(
                    "MAX_HOURLY_RECORDS",
                    defaults.max_hourly_records,
                ),
                freshness_seconds: parse_env_or(
                    "FRESHNESS_THRESHOLD_SECONDS",
                    defaults.freshness_seconds,
                ),
                min_completeness_percent: parse_env_or(
                    "MIN_COMPLETENESS_PERCENT",
                    defaults.min_completeness_percent,
                ),
                max_duplicate_groups: parse_env_or(
                    "MAX_DUPLICATE_GROUPS",
                    defaults.max_duplicate_groups,
                ),
            },
        })
    }
}

pub fn quality_metrics(results: &QualityResults) -> Vec<QualityMetric> {
    let healthy = results.overall_status == OverallStatus::Healthy;
    vec![
        QualityMetric {
            name: "DataQualityOverallStatus",
            value: if healthy { 1.0 } else { 0.0 },
            unit: StandardUnit::Count,
        },
        QualityMetric {
            name: "DataQualityFailedChecks",
            value: results.failed_checks as f64,
            unit: StandardUnit::Count,
        },
        QualityMetric {
            name: "DataQualityErrorChecks",
            value: results.error_checks as f64,
            unit: StandardUnit::Count,
        },
    ]
}

pub struct DataQualityService<W, M, N> {
    warehouse: W,
    metrics: M,
    notifier: N,
    config: Config,
}

impl DataQualityService<RedshiftWarehouse, AwsQualityMetrics, SnsNotifier> {
    pub async fn from_env() -> Result<Self, lambda_runtime::Error> {
        let config = Config::from_env()?;
        let sdk_config = aws_config::defaults(BehaviorVersion::latest()).load().await;

        Ok(Self::new(
            RedshiftWarehouse::new(aws_sdk_redshiftdata::Client::new(&sdk_config), &config),
            AwsQualityMetrics::new(aws_sdk_cloudwatch::Client::new(&sdk_config)),
            SnsNotifier::from_conf(&sdk_config),
            config,
        ))
    }
}

impl<W: Warehouse, M: QualityMetrics, N: Notifier> DataQualityService<W, M, N> {
    pub fn new(warehouse: W, metrics: M, notifier: N, config: Config) -> Self {
        Self {
            warehouse,
            metrics,
            notifier,
            config,
        }
    }

    /// Runs one check. A query or parse failure becomes an ERROR result
    /// rather than aborting the run.
    pub async fn run_check(&self, check: CheckName, now: DateTime<Utc>) -> CheckResult {
        let evaluated = match self.warehouse.query(check.sql()).await {
            Ok(rows) => self.config.thresholds.evaluate(check, &rows, now),
            Err(e) => Err(e),
        };

        match evaluated {
            Ok(result) => {
                info!("{}: {:?}", check, result.status);
                result
            }
            Err(e) => {
                error!("Error in {}: {:#}", check, e);
                CheckResult::error(check, &e)
            }
        }
    }

    async fn publish_metrics(&self, results: &QualityResults) {
        if let Err(e) = self
            .metrics
            .publish(&self.config.metrics_namespace, quality_metrics(results))
            .await
        {
            error!("Error publishing quality metrics: {}", e);
        }
    }

    pub async fn run_checks(&self, now: DateTime<Utc>) -> LambdaResponse {
        info!("Starting data quality checks");

        let mut checks = Vec::with_capacity(CheckName::ALL.len());
        for check in CheckName::ALL {
            checks.push(self.run_check(check, now).await);
        }
        let results = QualityResults::analyze(checks);
        let timestamp = now.to_rfc3339();

        self.publish_metrics(&results).await;

        if results.all_errored() {
            let reason = "no data quality check could query the warehouse";
            error!("Data quality checker failed: {}", reason);
            notify_best_effort(
                &self.notifier,
                self.config.sns_topic_arn.as_deref(),
                ERROR_SUBJECT,
                &checker_error_message(reason, &timestamp),
            )
            .await;
            return LambdaResponse::error(reason);
        }

        if results.has_issues {
            warn!(
                "Data quality is {}: {} failed, {} errored",
                results.overall_status, results.failed_checks, results.error_checks
            );
            notify_best_effort(
                &self.notifier,
                self.config.sns_topic_arn.as_deref(),
                &results.alert_subject(),
                &results.alert_message(&timestamp),
            )
            .await;
        }

        info!(
            "Data quality checks completed. Issues found: {}",
            results.has_issues
        );
        LambdaResponse::ok(json!({
            "message": "Data quality checks completed",
            "results": results,
            "timestamp": timestamp,
        }))
    }

    pub async fn handle_event(&self, payload: Value) -> LambdaResponse {
        info!("Received event: {}", payload);
        self.run_checks(Utc::now()).await
    }
}

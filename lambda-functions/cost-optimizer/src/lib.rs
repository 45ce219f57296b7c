mod aws;
pub mod report;

pub use aws::{AwsCostExplorer, AwsFleetInventory, AwsUtilizationMetrics};
pub use report::{
    report_message, CostReport, Findings, Recommendations, ReservationRecommendation,
    RightsizingRecommendation,
};

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_cloudwatch::types::StandardUnit;
use bon::Builder;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use ops_common::{
    days_before, days_env_or, notify_best_effort, optional_env, parse_env_or, ConfigError,
    LambdaResponse, Notifier, SnsNotifier,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{error, info};

pub const REPORT_SUBJECT: &str = "Cost Optimization Report";

pub const RIGHTSIZING_MODIFY: &str = "Modify";

#[derive(Debug, Clone, PartialEq)]
pub struct InstanceSummary {
    pub instance_id: String,
    pub instance_type: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VolumeSummary {
    pub volume_id: String,
    pub size_gb: i32,
    pub volume_type: String,
    pub state: String,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElasticIp {
    pub allocation_id: String,
    pub public_ip: String,
    pub instance_id: Option<String>,
    pub association_id: Option<String>,
}

impl ElasticIp {
    pub fn is_unused(&self) -> bool {
        self.instance_id.is_none() && self.association_id.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtilizationMetric {
    Cpu,
    Memory,
}

impl UtilizationMetric {
    pub fn namespace(&self) -> &'static str {
        match self {
            Self::Cpu => "AWS/EC2",
            // Published by the CloudWatch agent.
            Self::Memory => "System/Linux",
        }
    }

    pub fn metric_name(&self) -> &'static str {
        match self {
            Self::Cpu => "CPUUtilization",
            Self::Memory => "MemoryUtilization",
        }
    }
}

impl fmt::Display for UtilizationMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace(), self.metric_name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportMetric {
    pub name: &'static str,
    pub value: f64,
    pub unit: StandardUnit,
}

#[async_trait]
pub trait FleetInventory: Send + Sync {
    async fn running_instances(&self) -> anyhow::Result<Vec<InstanceSummary>>;
    async fn available_volumes(&self) -> anyhow::Result<Vec<VolumeSummary>>;
    async fn elastic_ips(&self) -> anyhow::Result<Vec<ElasticIp>>;
}

#[async_trait]
pub trait UtilizationMetrics: Send + Sync {
    /// Hourly `Average` datapoints of `metric` for the instance.
    async fn hourly_averages(
        &self,
        metric: UtilizationMetric,
        instance_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<f64>>;

    async fn publish(&self, namespace: &str, metrics: Vec<ReportMetric>) -> anyhow::Result<()>;
}

#[async_trait]
pub trait CostExplorer: Send + Sync {
    /// Blended cost per service for `[start, end)`.
    async fn cost_by_service(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> anyhow::Result<BTreeMap<String, f64>>;

    /// EC2 rightsizing suggestions.
    async fn rightsizing_recommendations(&self) -> anyhow::Result<Vec<RightsizingRecommendation>>;

    /// EC2 reserved instance purchase suggestions based on the last 30 days.
    async fn reservation_recommendations(&self) -> anyhow::Result<Vec<ReservationRecommendation>>;
}

#[derive(Builder, Debug, Clone)]
pub struct Config {
    pub sns_topic_arn: Option<String>,
    #[builder(default = 7)]
    pub lookback_days: i64,
    #[builder(default = 5.0)]
    pub idle_cpu_threshold: f64,
    #[builder(default = 20.0)]
    pub oversized_cpu_threshold: f64,
    #[builder(default = 30.0)]
    pub oversized_memory_threshold: f64,
    #[builder(default = 7)]
    pub unused_volume_days: i64,
    #[builder(default = "CostOptimization".to_string())]
    pub metrics_namespace: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self::builder()
            .maybe_sns_topic_arn(optional_env("SNS_TOPIC_ARN"))
            .lookback_days(days_env_or("LOOKBACK_DAYS", defaults.lookback_days)?)
            .idle_cpu_threshold(parse_env_or("IDLE_CPU_THRESHOLD", defaults.idle_cpu_threshold))
            .oversized_cpu_threshold(parse_env_or(
                "OVERSIZED_CPU_THRESHOLD",
                defaults.oversized_cpu_threshold,
            ))
            .oversized_memory_threshold(parse_env_or(
                "OVERSIZED_MEMORY_THRESHOLD",
                defaults.oversized_memory_threshold,
            ))
            .unused_volume_days(days_env_or("UNUSED_VOLUME_DAYS", defaults.unused_volume_days)?)
            .metrics_namespace(
                optional_env("METRICS_NAMESPACE").unwrap_or(defaults.metrics_namespace),
            )
            .build())
    }
}

pub fn average(points: &[f64]) -> Option<f64> {
    if points.is_empty() {
        None
    } else {
        Some(points.iter().sum::<f64>() / points.len() as f64)
    }
}

/// First day of `today`'s month through `today`. Empty on the 1st.
pub fn month_to_date(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    (today.with_day(1).unwrap_or(today), today)
}

pub struct CostOptimizerService<F, M, C, N> {
    fleet: F,
    metrics: M,
    costs: C,
    notifier: N,
    config: Config,
}

impl CostOptimizerService<AwsFleetInventory, AwsUtilizationMetrics, AwsCostExplorer, SnsNotifier> {
    pub async fn from_env() -> Result<Self, lambda_runtime::Error> {
        let config = Config::from_env()?;
        let sdk_config = aws_config::defaults(BehaviorVersion::latest()).load().await;

        Ok(Self::new(
            AwsFleetInventory::new(aws_sdk_ec2::Client::new(&sdk_config)),
            AwsUtilizationMetrics::new(aws_sdk_cloudwatch::Client::new(&sdk_config)),
            AwsCostExplorer::new(aws_sdk_costexplorer::Client::new(&sdk_config)),
            SnsNotifier::from_conf(&sdk_config),
            config,
        ))
    }
}

impl<F, M, C, N> CostOptimizerService<F, M, C, N>
where
    F: FleetInventory,
    M: UtilizationMetrics,
    C: CostExplorer,
    N: Notifier,
{
    pub fn new(fleet: F, metrics: M, costs: C, notifier: N, config: Config) -> Self {
        Self {
            fleet,
            metrics,
            costs,
            notifier,
            config,
        }
    }

    fn window(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (days_before(now, self.config.lookback_days), now)
    }

    async fn average_utilization(
        &self,
        metric: UtilizationMetric,
        instance_id: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<f64>> {
        let (start, end) = self.window(now);
        let points = self
            .metrics
            .hourly_averages(metric, instance_id, start, end)
            .await?;
        Ok(average(&points))
    }

    pub async fn is_instance_idle(&self, instance_id: &str, now: DateTime<Utc>) -> bool {
        match self
            .average_utilization(UtilizationMetric::Cpu, instance_id, now)
            .await
        {
            Ok(Some(cpu)) => cpu < self.config.idle_cpu_threshold,
            Ok(None) => false,
            Err(e) => {
                error!(
                    "Failed to check CPU utilization for instance {}: {}",
                    instance_id, e
                );
                false
            }
        }
    }

    pub async fn is_instance_oversized(&self, instance_id: &str, now: DateTime<Utc>) -> bool {
        let cpu = match self
            .average_utilization(UtilizationMetric::Cpu, instance_id, now)
            .await
        {
            Ok(Some(cpu)) => cpu,
            Ok(None) => return false,
            Err(e) => {
                error!(
                    "Failed to check if instance {} is oversized: {}",
                    instance_id, e
                );
                return false;
            }
        };

        // Instances without the agent report no memory; treat as unused.
        let memory = self
            .average_utilization(UtilizationMetric::Memory, instance_id, now)
            .await
            .ok()
            .flatten()
            .unwrap_or(0.0);

        cpu < self.config.oversized_cpu_threshold && memory < self.config.oversized_memory_threshold
    }

    /// Idle and oversized instance ids, in that order.
    pub async fn check_instances(&self, now: DateTime<Utc>) -> (Vec<String>, Vec<String>) {
        info!("Checking for idle and oversized instances");

        let instances = match self.fleet.running_instances().await {
            Ok(instances) => instances,
            Err(e) => {
                error!("Failed to check instances: {}", e);
                return (Vec::new(), Vec::new());
            }
        };

        let mut idle = Vec::new();
        let mut oversized = Vec::new();
        for instance in &instances {
            if self.is_instance_idle(&instance.instance_id, now).await {
                info!(
                    "Instance {} ({}) appears to be idle",
                    instance.instance_id, instance.instance_type
                );
                idle.push(instance.instance_id.clone());
            }
            if self.is_instance_oversized(&instance.instance_id, now).await {
                info!(
                    "Instance {} ({}) appears to be oversized",
                    instance.instance_id, instance.instance_type
                );
                oversized.push(instance.instance_id.clone());
            }
        }

        (idle, oversized)
    }

    pub async fn check_unused_volumes(&self, now: DateTime<Utc>) -> Vec<String> {
        info!("Checking for unused EBS volumes");

        let volumes = match self.fleet.available_volumes().await {
            Ok(volumes) => volumes,
            Err(e) => {
                error!("Failed to check unused volumes: {}", e);
                return Vec::new();
            }
        };

        volumes
            .into_iter()
            .filter(|volume| volume.state == "available")
            .filter(|volume| {
                volume.created_at.is_some_and(|created| {
                    (now - created).num_days() > self.config.unused_volume_days
                })
            })
            .map(|volume| {
                info!(
                    "Volume {} ({}GB {}) appears to be unused",
                    volume.volume_id, volume.size_gb, volume.volume_type
                );
                volume.volume_id
            })
            .collect()
    }

    pub async fn check_unused_elastic_ips(&self) -> Vec<String> {
        info!("Checking for unused Elastic IPs");

        match self.fleet.elastic_ips().await {
            Ok(addresses) => addresses
                .into_iter()
                .filter(ElasticIp::is_unused)
                .map(|address| {
                    info!(
                        "Elastic IP {} ({}) is not associated with any instance",
                        address.public_ip, address.allocation_id
                    );
                    address.allocation_id
                })
                .collect(),
            Err(e) => {
                error!("Failed to check unused Elastic IPs: {}", e);
                Vec::new()
            }
        }
    }

    pub async fn cost_analysis(&self, today: NaiveDate) -> BTreeMap<String, f64> {
        info!("Getting cost analysis");

        let (start, end) = month_to_date(today);
        if start >= end {
            return BTreeMap::new();
        }

        self.costs
            .cost_by_service(start, end)
            .await
            .unwrap_or_else(|e| {
                error!("Failed to get cost analysis: {}", e);
                BTreeMap::new()
            })
    }

    /// Cost Explorer rightsizing (`Modify` only) and reservation advice.
    /// Each lookup that fails is logged and contributes nothing.
    pub async fn recommendations(&self) -> Recommendations {
        info!("Getting Cost Explorer recommendations");

        let rightsizing = match self.costs.rightsizing_recommendations().await {
            Ok(recommendations) => recommendations
                .into_iter()
                .filter(|r| r.rightsizing_type == RIGHTSIZING_MODIFY)
                .collect(),
            Err(e) => {
                error!("Error getting rightsizing recommendations: {}", e);
                Vec::new()
            }
        };

        let reservations = self
            .costs
            .reservation_recommendations()
            .await
            .unwrap_or_else(|e| {
                error!("Error getting reservation recommendations: {}", e);
                Vec::new()
            });

        Recommendations {
            rightsizing,
            reservations,
        }
    }

    pub async fn analyze(&self, now: DateTime<Utc>) -> (Findings, BTreeMap<String, f64>) {
        let (idle_instances, oversized_instances) = self.check_instances(now).await;
        let findings = Findings {
            idle_instances,
            oversized_instances,
            unused_volumes: self.check_unused_volumes(now).await,
            unused_elastic_ips: self.check_unused_elastic_ips().await,
        };
        let costs = self.cost_analysis(now.date_naive()).await;
        (findings, costs)
    }

    async fn publish_metrics(&self, findings: &Findings, costs: &BTreeMap<String, f64>) {
        let metrics = findings
            .metrics()
            .into_iter()
            .chain(std::iter::once(ReportMetric {
                name: "MonthToDateCost",
                value: costs.values().sum(),
                unit: StandardUnit::None,
            }))
            .collect::<Vec<_>>();

        info!("Publishing {} metrics to CloudWatch", metrics.len());
        if let Err(e) = self
            .metrics
            .publish(&self.config.metrics_namespace, metrics)
            .await
        {
            error!("Failed to publish metrics: {}", e);
        }
    }

    pub async fn handle_event(&self, payload: Value) -> LambdaResponse {
        info!("Received event: {}", payload);
        self.run_report(Utc::now()).await
    }

    /// Runs every check as of `now`, publishes metrics and sends the report.
    pub async fn run_report(&self, now: DateTime<Utc>) -> LambdaResponse {
        let (findings, costs) = self.analyze(now).await;
        let recommendations = self.recommendations().await;
        let optimizations = findings.summaries();

        self.publish_metrics(&findings, &costs).await;

        if !optimizations.is_empty() || !costs.is_empty() || !recommendations.is_empty() {
            let message =
                report_message(&optimizations, &costs, &recommendations, &now.to_rfc3339());
            if notify_best_effort(
                &self.notifier,
                self.config.sns_topic_arn.as_deref(),
                REPORT_SUBJECT,
                &message,
            )
            .await
            {
                info!("Cost optimization notification sent");
            }
        }

        let report = CostReport::builder()
            .message("Cost optimization analysis completed".to_string())
            .optimizations(optimizations)
            .cost_analysis(costs)
            .recommendations(recommendations)
            .build();

        match serde_json::to_value(&report) {
            Ok(body) => LambdaResponse::ok(body),
            Err(e) => {
                error!("Error in cost optimization: {}", e);
                LambdaResponse::error(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.lookback_days, 7);
        assert_eq!(config.idle_cpu_threshold, 5.0);
        assert_eq!(config.oversized_cpu_threshold, 20.0);
        assert_eq!(config.oversized_memory_threshold, 30.0);
        assert_eq!(config.unused_volume_days, 7);
        assert_eq!(config.metrics_namespace, "CostOptimization");
        assert!(config.sns_topic_arn.is_none());
    }

    #[test]
    fn test_config_rejects_unrepresentable_lookback() {
        std::env::set_var("LOOKBACK_DAYS", "9223372036854775807");
        let result = Config::from_env();
        std::env::remove_var("LOOKBACK_DAYS");

        assert!(matches!(
            result,
            Err(ConfigError::Invalid { ref key, .. }) if key == "LOOKBACK_DAYS"
        ));
    }

    #[test]
    fn test_average() {
        assert_eq!(average(&[]), None);
        assert_eq!(average(&[2.0, 4.0, 6.0]), Some(4.0));
    }

    #[test]
    fn test_month_to_date() {
        let today = NaiveDate::from_ymd_opt(2025, 3, 17).unwrap();
        let (start, end) = month_to_date(today);
        assert_eq!(start, NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
        assert_eq!(end, today);

        let first = NaiveDate::from_ymd_opt(2025, 4, 1).unwrap();
        assert_eq!(month_to_date(first), (first, first));
    }

    #[test]
    fn test_elastic_ip_unused() {
        let mut address = ElasticIp {
            allocation_id: "eipalloc-1".to_string(),
            public_ip: "203.0.113.10".to_string(),
            instance_id: None,
            association_id: None,
        };
        assert!(address.is_unused());

        address.association_id = Some("eipassoc-1".to_string());
        assert!(!address.is_unused());
    }

    #[test]
    fn test_utilization_metric_display() {
        assert_eq!(UtilizationMetric::Cpu.to_string(), "AWS/EC2/CPUUtilization");
        assert_eq!(
            UtilizationMetric::Memory.to_string(),
            "System/Linux/MemoryUtilization"
        );
    }
}

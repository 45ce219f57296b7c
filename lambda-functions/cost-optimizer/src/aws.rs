use crate::{
    CostExplorer, ElasticIp, FleetInventory, InstanceSummary, ReportMetric,
    ReservationRecommendation, RightsizingRecommendation, UtilizationMetric, UtilizationMetrics,
    VolumeSummary,
};
use async_trait::async_trait;
use aws_sdk_cloudwatch::primitives::DateTime as AwsDateTime;
use aws_sdk_cloudwatch::types::{Dimension, MetricDatum, Statistic};
use aws_sdk_cloudwatch::Client as CloudWatchClient;
use aws_sdk_costexplorer::types::{
    DateInterval, Granularity, GroupDefinition, GroupDefinitionType, LookbackPeriodInDays,
};
use aws_sdk_costexplorer::Client as CostExplorerClient;
use aws_sdk_ec2::types::Filter;
use aws_sdk_ec2::Client as Ec2Client;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;
use tracing::warn;

const BLENDED_COST: &str = "BlendedCost";
const RIGHTSIZING_SERVICE: &str = "AmazonEC2";
const RESERVATION_SERVICE: &str = "Amazon Elastic Compute Cloud - Compute";

/// Cost Explorer reports money as decimal strings.
fn amount(raw: Option<&str>) -> f64 {
    raw.and_then(|value| value.parse().ok()).unwrap_or_default()
}

pub struct AwsFleetInventory {
    ec2_client: Ec2Client,
}

impl AwsFleetInventory {
    pub fn new(ec2_client: Ec2Client) -> Self {
        Self { ec2_client }
    }
}

#[async_trait]
impl FleetInventory for AwsFleetInventory {
    async fn running_instances(&self) -> anyhow::Result<Vec<InstanceSummary>> {
        let mut pages = self
            .ec2_client
            .describe_instances()
            .filters(
                Filter::builder()
                    .name("instance-state-name")
                    .values("running")
                    .build(),
            )
            .into_paginator()
            .send();

        let mut instances = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page?;
            for instance in page
                .reservations()
                .iter()
                .flat_map(|reservation| reservation.instances())
            {
                let Some(instance_id) = instance.instance_id() else {
                    continue;
                };
                instances.push(InstanceSummary {
                    instance_id: instance_id.to_string(),
                    instance_type: instance
                        .instance_type()
                        .map(|t| t.as_str().to_string())
                        .unwrap_or_default(),
                });
            }
        }
        Ok(instances)
    }

    async fn available_volumes(&self) -> anyhow::Result<Vec<VolumeSummary>> {
        let mut pages = self
            .ec2_client
            .describe_volumes()
            .filters(Filter::builder().name("status").values("available").build())
            .into_paginator()
            .send();

        let mut volumes = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page?;
            for volume in page.volumes() {
                let Some(volume_id) = volume.volume_id() else {
                    continue;
                };
                volumes.push(VolumeSummary {
                    volume_id: volume_id.to_string(),
                    size_gb: volume.size().unwrap_or_default(),
                    volume_type: volume
                        .volume_type()
                        .map(|t| t.as_str().to_string())
                        .unwrap_or_default(),
                    state: volume
                        .state()
                        .map(|s| s.as_str().to_string())
                        .unwrap_or_default(),
                    created_at: volume
                        .create_time()
                        .and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos())),
                });
            }
        }
        Ok(volumes)
    }

    async fn elastic_ips(&self) -> anyhow::Result<Vec<ElasticIp>> {
        let output = self.ec2_client.describe_addresses().send().await?;

        Ok(output
            .addresses()
            .iter()
            .map(|address| ElasticIp {
                allocation_id: address.allocation_id().unwrap_or_default().to_string(),
                public_ip: address.public_ip().unwrap_or_default().to_string(),
                instance_id: address.instance_id().map(str::to_string),
                association_id: address.association_id().map(str::to_string),
            })
            .collect())
    }
}

pub struct AwsUtilizationMetrics {
    cloudwatch_client: CloudWatchClient,
}

impl AwsUtilizationMetrics {
    pub fn new(cloudwatch_client: CloudWatchClient) -> Self {
        Self { cloudwatch_client }
    }
}

#[async_trait]
impl UtilizationMetrics for AwsUtilizationMetrics {
    async fn hourly_averages(
        &self,
        metric: UtilizationMetric,
        instance_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<f64>> {
        let output = self
            .cloudwatch_client
            .get_metric_statistics()
            .namespace(metric.namespace())
            .metric_name(metric.metric_name())
            .dimensions(Dimension::builder().name("InstanceId").value(instance_id).build())
            .start_time(AwsDateTime::from_secs(start.timestamp()))
            .end_time(AwsDateTime::from_secs(end.timestamp()))
            .period(3600)
            .statistics(Statistic::Average)
            .send()
            .await?;

        Ok(output
            .datapoints()
            .iter()
            .filter_map(|point| point.average())
            .collect())
    }

    async fn publish(&self, namespace: &str, metrics: Vec<ReportMetric>) -> anyhow::Result<()> {
        let timestamp = AwsDateTime::from(std::time::SystemTime::now());

        let data = metrics
            .into_iter()
            .map(|metric| {
                MetricDatum::builder()
                    .metric_name(metric.name)
                    .value(metric.value)
                    .unit(metric.unit)
                    .timestamp(timestamp)
                    .build()
            })
            .collect::<Vec<_>>();

        self.cloudwatch_client
            .put_metric_data()
            .namespace(namespace)
            .set_metric_data(Some(data))
            .send()
            .await?;
        Ok(())
    }
}

pub struct AwsCostExplorer {
    ce_client: CostExplorerClient,
}

impl AwsCostExplorer {
    pub fn new(ce_client: CostExplorerClient) -> Self {
        Self { ce_client }
    }
}

#[async_trait]
impl CostExplorer for AwsCostExplorer {
    async fn cost_by_service(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> anyhow::Result<BTreeMap<String, f64>> {
        let period = DateInterval::builder()
            .start(start.format("%Y-%m-%d").to_string())
            .end(end.format("%Y-%m-%d").to_string())
            .build()?;

        let output = self
            .ce_client
            .get_cost_and_usage()
            .time_period(period)
            .granularity(Granularity::Monthly)
            .metrics(BLENDED_COST)
            .group_by(
                GroupDefinition::builder()
                    .r#type(GroupDefinitionType::Dimension)
                    .key("SERVICE")
                    .build(),
            )
            .send()
            .await?;

        let mut costs = BTreeMap::new();
        for group in output
            .results_by_time()
            .iter()
            .flat_map(|result| result.groups())
        {
            let Some(service) = group.keys().first() else {
                continue;
            };
            let amount = group
                .metrics()
                .and_then(|metrics| metrics.get(BLENDED_COST))
                .and_then(|value| value.amount());
            match amount.map(str::parse::<f64>) {
                Some(Ok(cost)) => {
                    *costs.entry(service.clone()).or_insert(0.0) += cost;
                }
                Some(Err(e)) => warn!("Unparsable cost for {}: {}", service, e),
                None => {}
            }
        }
        Ok(costs)
    }

    async fn rightsizing_recommendations(&self) -> anyhow::Result<Vec<RightsizingRecommendation>> {
        let output = self
            .ce_client
            .get_rightsizing_recommendation()
            .service(RIGHTSIZING_SERVICE)
            .send()
            .await?;

        Ok(output
            .rightsizing_recommendations()
            .iter()
            .map(|recommendation| {
                let current = recommendation.current_instance();
                let target = recommendation
                    .modify_recommendation_detail()
                    .and_then(|detail| detail.target_instances().first());

                RightsizingRecommendation {
                    resource_id: current
                        .and_then(|c| c.resource_id())
                        .unwrap_or_default()
                        .to_string(),
                    rightsizing_type: recommendation
                        .rightsizing_type()
                        .map(|t| t.as_str().to_string())
                        .unwrap_or_default(),
                    current_type: current
                        .and_then(|c| c.resource_details())
                        .and_then(|d| d.ec2_resource_details())
                        .and_then(|d| d.instance_type())
                        .unwrap_or_default()
                        .to_string(),
                    recommended_type: target
                        .and_then(|t| t.resource_details())
                        .and_then(|d| d.ec2_resource_details())
                        .and_then(|d| d.instance_type())
                        .unwrap_or_default()
                        .to_string(),
                    estimated_monthly_savings: amount(
                        target.and_then(|t| t.estimated_monthly_savings()),
                    ),
                }
            })
            .collect())
    }

    async fn reservation_recommendations(&self) -> anyhow::Result<Vec<ReservationRecommendation>> {
        let output = self
            .ce_client
            .get_reservation_purchase_recommendation()
            .service(RESERVATION_SERVICE)
            .lookback_period_in_days(LookbackPeriodInDays::ThirtyDays)
            .send()
            .await?;

        let mut recommendations = Vec::new();
        for recommendation in output.recommendations() {
            let term = recommendation
                .term_in_years()
                .map(|t| t.as_str())
                .unwrap_or_default();
            let payment_option = recommendation
                .payment_option()
                .map(|p| p.as_str())
                .unwrap_or_default();

            for detail in recommendation.recommendation_details() {
                let Some(instance_type) = detail
                    .instance_details()
                    .and_then(|d| d.ec2_instance_details())
                    .and_then(|d| d.instance_type())
                else {
                    continue;
                };
                recommendations.push(ReservationRecommendation {
                    instance_type: instance_type.to_string(),
                    term: term.to_string(),
                    payment_option: payment_option.to_string(),
                    estimated_monthly_savings: amount(detail.estimated_monthly_savings_amount()),
                });
            }
        }
        Ok(recommendations)
    }
}

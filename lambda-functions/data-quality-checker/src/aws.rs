use crate::{Config, QualityMetric, QualityMetrics, Row, Warehouse};
use anyhow::{anyhow, bail};
use async_trait::async_trait;
use aws_sdk_cloudwatch::primitives::DateTime as AwsDateTime;
use aws_sdk_cloudwatch::types::MetricDatum;
use aws_sdk_cloudwatch::Client as CloudWatchClient;
use aws_sdk_redshiftdata::types::{Field, StatusString};
use aws_sdk_redshiftdata::Client as RedshiftDataClient;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const MAX_POLLS: u32 = 120;

pub struct RedshiftWarehouse {
    client: RedshiftDataClient,
    cluster_id: String,
    database: String,
    db_user: Option<String>,
    secret_arn: Option<String>,
}

impl RedshiftWarehouse {
    pub fn new(client: RedshiftDataClient, config: &Config) -> Self {
        Self {
            client,
            cluster_id: config.cluster_id.clone(),
            database: config.database.clone(),
            db_user: config.db_user.clone(),
            secret_arn: config.secret_arn.clone(),
        }
    }

    async fn wait_for(&self, statement_id: &str) -> anyhow::Result<()> {
        for _ in 0..MAX_POLLS {
            let output = self
                .client
                .describe_statement()
                .id(statement_id)
                .send()
                .await?;

            match output.status() {
                Some(StatusString::Finished) => return Ok(()),
                Some(StatusString::Failed) => bail!(
                    "statement {} failed: {}",
                    statement_id,
                    output.error().unwrap_or("unknown error")
                ),
                Some(StatusString::Aborted) => bail!("statement {} was aborted", statement_id),
                _ => tokio::time::sleep(POLL_INTERVAL).await,
            }
        }
        Err(anyhow!("statement {} did not finish in time", statement_id))
    }
}

fn cell(field: &Field) -> Option<String> {
    match field {
        Field::StringValue(value) => Some(value.clone()),
        Field::LongValue(value) => Some(value.to_string()),
        Field::DoubleValue(value) => Some(value.to_string()),
        Field::BooleanValue(value) => Some(value.to_string()),
        _ => None,
    }
}

#[async_trait]
impl Warehouse for RedshiftWarehouse {
    async fn query(&self, sql: &str) -> anyhow::Result<Vec<Row>> {
        let output = self
            .client
            .execute_statement()
            .cluster_identifier(&self.cluster_id)
            .database(&self.database)
            .set_db_user(self.db_user.clone())
            .set_secret_arn(self.secret_arn.clone())
            .sql(sql)
            .send()
            .await?;
        let statement_id = output
            .id()
            .ok_or_else(|| anyhow!("execute_statement returned no id"))?
            .to_string();

        self.wait_for(&statement_id).await?;

        let mut rows = Vec::new();
        let mut next_token = None;
        loop {
            let page = self
                .client
                .get_statement_result()
                .id(&statement_id)
                .set_next_token(next_token)
                .send()
                .await?;
            rows.extend(
                page.records()
                    .iter()
                    .map(|record| record.iter().map(cell).collect::<Row>()),
            );

            next_token = page.next_token().map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }
        Ok(rows)
    }
}

pub struct AwsQualityMetrics {
    cloudwatch_client: CloudWatchClient,
}

impl AwsQualityMetrics {
    pub fn new(cloudwatch_client: CloudWatchClient) -> Self {
        Self { cloudwatch_client }
    }
}

#[async_trait]
impl QualityMetrics for AwsQualityMetrics {
    async fn publish(&self, namespace: &str, metrics: Vec<QualityMetric>) -> anyhow::Result<()> {
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

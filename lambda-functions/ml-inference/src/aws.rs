use crate::{Config, Inference, SqlParam, Warehouse};
use anyhow::Context;
use async_trait::async_trait;
use aws_sdk_redshiftdata::types::SqlParameter;
use aws_sdk_redshiftdata::Client as RedshiftDataClient;
use aws_sdk_sagemakerruntime::primitives::Blob;
use aws_sdk_sagemakerruntime::Client as SageMakerRuntimeClient;
use serde_json::Value;

pub struct SageMakerInference {
    client: SageMakerRuntimeClient,
}

impl SageMakerInference {
    pub fn new(client: SageMakerRuntimeClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Inference for SageMakerInference {
    async fn invoke(&self, endpoint: &str, payload: String) -> anyhow::Result<Value> {
        let output = self
            .client
            .invoke_endpoint()
            .endpoint_name(endpoint)
            .content_type("application/json")
            .body(Blob::new(payload))
            .send()
            .await?;

        let body = output
            .body()
            .with_context(|| format!("endpoint {} returned no body", endpoint))?;
        serde_json::from_slice(body.as_ref())
            .with_context(|| format!("endpoint {} returned a non-JSON body", endpoint))
    }
}

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
}

#[async_trait]
impl Warehouse for RedshiftWarehouse {
    async fn execute(&self, sql: &str, params: Vec<SqlParam>) -> anyhow::Result<String> {
        let parameters = params
            .into_iter()
            .map(|param| {
                SqlParameter::builder()
                    .name(param.name)
                    .value(param.value)
                    .build()
            })
            .collect::<Result<Vec<_>, _>>()?;

        let output = self
            .client
            .execute_statement()
            .cluster_identifier(&self.cluster_id)
            .database(&self.database)
            .set_db_user(self.db_user.clone())
            .set_secret_arn(self.secret_arn.clone())
            .sql(sql)
            .set_parameters(Some(parameters))
            .send()
            .await?;

        Ok(output.id().unwrap_or_default().to_string())
    }
}

use crate::{Config, LineageCatalog, LineageStore};
use anyhow::bail;
use async_trait::async_trait;
use aws_sdk_glue::types::{PartitionInput, SerDeInfo, StorageDescriptor};
use aws_sdk_glue::Client as GlueClient;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use std::collections::BTreeMap;
use tracing::info;

const PARQUET_INPUT_FORMAT: &str = "org.apache.hadoop.hive.ql.io.parquet.MapredParquetInputFormat";
const PARQUET_OUTPUT_FORMAT: &str =
    "org.apache.hadoop.hive.ql.io.parquet.MapredParquetOutputFormat";
const PARQUET_SERDE: &str = "org.apache.hadoop.hive.ql.io.parquet.serde.ParquetHiveSerDe";
const ALREADY_EXISTS: &str = "AlreadyExistsException";

pub struct S3LineageStore {
    client: S3Client,
    bucket: String,
}

impl S3LineageStore {
    pub fn new(client: S3Client, bucket: String) -> Self {
        Self { client, bucket }
    }
}

#[async_trait]
impl LineageStore for S3LineageStore {
    async fn put_record(
        &self,
        key: &str,
        body: String,
        metadata: BTreeMap<String, String>,
    ) -> anyhow::Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body.into_bytes()))
            .content_type("application/json")
            .set_metadata(Some(metadata.into_iter().collect()))
            .send()
            .await?;
        Ok(())
    }
}

pub struct GlueLineageCatalog {
    client: GlueClient,
    database: String,
    table: String,
}

impl GlueLineageCatalog {
    pub fn new(client: GlueClient, config: &Config) -> Self {
        Self {
            client,
            database: config.glue_database.clone(),
            table: config.glue_table.clone(),
        }
    }
}

#[async_trait]
impl LineageCatalog for GlueLineageCatalog {
    async fn add_partition(&self, values: Vec<String>, location: String) -> anyhow::Result<()> {
        let storage = StorageDescriptor::builder()
            .location(location)
            .input_format(PARQUET_INPUT_FORMAT)
            .output_format(PARQUET_OUTPUT_FORMAT)
            .serde_info(
                SerDeInfo::builder()
                    .serialization_library(PARQUET_SERDE)
                    .build(),
            )
            .build();
        let partition = PartitionInput::builder()
            .set_values(Some(values))
            .storage_descriptor(storage)
            .build();

        let output = self
            .client
            .batch_create_partition()
            .database_name(&self.database)
            .table_name(&self.table)
            .partition_input_list(partition)
            .send()
            .await?;

        for failure in output.errors() {
            let detail = failure.error_detail();
            let code = detail.and_then(|d| d.error_code()).unwrap_or_default();
            if code == ALREADY_EXISTS {
                info!("Partition {:?} already registered", failure.partition_values());
                continue;
            }
            bail!(
                "partition {:?} was rejected: {} {}",
                failure.partition_values(),
                code,
                detail.and_then(|d| d.error_message()).unwrap_or_default()
            );
        }
        Ok(())
    }
}

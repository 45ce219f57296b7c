use crate::{RdsSnapshots, SnapshotSummary, SnapshotTag};
use async_trait::async_trait;
use aws_sdk_rds::types::Tag;
use aws_sdk_rds::Client as RdsClient;
use chrono::DateTime;

pub struct AwsRdsSnapshots {
    rds_client: RdsClient,
}

impl AwsRdsSnapshots {
    pub fn new(rds_client: RdsClient) -> Self {
        Self { rds_client }
    }
}

fn sdk_tags(tags: Vec<SnapshotTag>) -> Vec<Tag> {
    tags.into_iter()
        .map(|tag| Tag::builder().key(tag.key).value(tag.value).build())
        .collect()
}

#[async_trait]
impl RdsSnapshots for AwsRdsSnapshots {
    async fn create_snapshot(
        &self,
        db_instance_id: &str,
        snapshot_id: &str,
        tags: Vec<SnapshotTag>,
    ) -> anyhow::Result<()> {
        self.rds_client
            .create_db_snapshot()
            .db_instance_identifier(db_instance_id)
            .db_snapshot_identifier(snapshot_id)
            .set_tags(Some(sdk_tags(tags)))
            .send()
            .await?;
        Ok(())
    }

    async fn snapshot_status(&self, snapshot_id: &str) -> anyhow::Result<Option<String>> {
        let output = match self
            .rds_client
            .describe_db_snapshots()
            .db_snapshot_identifier(snapshot_id)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_db_snapshot_not_found_fault()) =>
            {
                return Ok(None)
            }
            Err(e) => return Err(e.into()),
        };

        Ok(output
            .db_snapshots()
            .first()
            .and_then(|snapshot| snapshot.status())
            .map(str::to_string))
    }

    async fn copy_snapshot(
        &self,
        source_arn: &str,
        target_snapshot_id: &str,
        kms_key_id: Option<String>,
        tags: Vec<SnapshotTag>,
    ) -> anyhow::Result<()> {
        self.rds_client
            .copy_db_snapshot()
            .source_db_snapshot_identifier(source_arn)
            .target_db_snapshot_identifier(target_snapshot_id)
            .set_kms_key_id(kms_key_id)
            .set_tags(Some(sdk_tags(tags)))
            .send()
            .await?;
        Ok(())
    }

    async fn manual_snapshots(&self, db_instance_id: &str) -> anyhow::Result<Vec<SnapshotSummary>> {
        let mut pages = self
            .rds_client
            .describe_db_snapshots()
            .db_instance_identifier(db_instance_id)
            .snapshot_type("manual")
            .into_paginator()
            .send();

        let mut snapshots = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page?;
            snapshots.extend(page.db_snapshots().iter().filter_map(|snapshot| {
                Some(SnapshotSummary {
                    snapshot_id: snapshot.db_snapshot_identifier()?.to_string(),
                    created_at: snapshot
                        .snapshot_create_time()
                        .and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos())),
                })
            }));
        }
        Ok(snapshots)
    }

    async fn delete_snapshot(&self, snapshot_id: &str) -> anyhow::Result<()> {
        self.rds_client
            .delete_db_snapshot()
            .db_snapshot_identifier(snapshot_id)
            .send()
            .await?;
        Ok(())
    }
}

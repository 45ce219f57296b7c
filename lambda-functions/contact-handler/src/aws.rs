use crate::{Submission, SubmissionStore};
use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoClient;
use std::collections::HashMap;

pub struct DynamoSubmissionStore {
    dynamo_client: DynamoClient,
    table_name: String,
}

impl DynamoSubmissionStore {
    pub fn new(dynamo_client: DynamoClient, table_name: String) -> Self {
        Self {
            dynamo_client,
            table_name,
        }
    }
}

#[async_trait]
impl SubmissionStore for DynamoSubmissionStore {
    async fn put_submission(&self, submission: &Submission) -> anyhow::Result<()> {
        let item: HashMap<String, AttributeValue> = serde_dynamo::to_item(submission)?;

        self.dynamo_client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item))
            .send()
            .await?;
        Ok(())
    }
}

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use data_lineage_tracker::{Config, LineageCatalog, LineageEvent, LineageService, LineageStore};
use mockall::mock;
use serde_json::{json, Value};
use std::collections::BTreeMap;

mock! {
    pub Store {}

    #[async_trait]
    impl LineageStore for Store {
        async fn put_record(
            &self,
            key: &str,
            body: String,
            metadata: BTreeMap<String, String>,
        ) -> anyhow::Result<()>;
    }
}

mock! {
    pub Catalog {}

    #[async_trait]
    impl LineageCatalog for Catalog {
        async fn add_partition(&self, values: Vec<String>, location: String) -> anyhow::Result<()>;
    }
}

fn config() -> Config {
    Config {
        bucket: "analytics-lineage".to_string(),
        glue_database: "analytics".to_string(),
        glue_table: "data_lineage".to_string(),
    }
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 7, 9, 30, 0).unwrap()
}

fn event(source: &str, detail_type: &str, detail: Value) -> Value {
    json!({
        "version": "0",
        "id": "7bf73129-1428-4cd3-a780-95db273d1602",
        "detail-type": detail_type,
        "source": source,
        "account": "123456789012",
        "time": "2024-03-07T09:30:00Z",
        "region": "us-east-1",
        "resources": [],
        "detail": detail
    })
}

fn parsed(value: Value) -> LineageEvent {
    serde_json::from_value(value).unwrap()
}

#[tokio::test]
async fn test_kinesis_event_is_stored_and_cataloged() {
    let mut store = MockStore::new();
    store
        .expect_put_record()
        .times(1)
        .returning(|key, body, metadata| {
            assert!(key.starts_with("lineage/year=2024/month=03/day=07/hour=09/"));
            assert!(key.ends_with(".json"));

            let record: Value = serde_json::from_str(&body).unwrap();
            assert_eq!(record["source_system"], "kinesis");
            assert_eq!(record["source_table"], "clickstream");
            assert_eq!(record["business_owner"], "data_engineering_team");
            assert!(key.contains(record["lineage_id"].as_str().unwrap()));

            assert_eq!(metadata["source_system"], "kinesis");
            assert_eq!(metadata["target_system"], "lambda");
            assert_eq!(metadata["transformation_type"], "stream_processing");
            Ok(())
        });

    let mut catalog = MockCatalog::new();
    catalog
        .expect_add_partition()
        .times(1)
        .returning(|values, location| {
            assert_eq!(values, vec!["2024", "03", "07", "09"]);
            assert_eq!(
                location,
                "s3://analytics-lineage/lineage/year=2024/month=03/day=07/hour=09/"
            );
            Ok(())
        });

    let service = LineageService::new(store, catalog, config());
    let response = service
        .track(
            &parsed(event(
                "aws.kinesis",
                "Kinesis Stream Activity",
                json!({"streamName": "clickstream"}),
            )),
            now(),
        )
        .await;

    assert_eq!(response.status_code, 200);
    let body = response.body_json();
    assert_eq!(body["message"], "Data lineage tracked successfully");
    assert!(uuid::Uuid::parse_str(body["lineage_id"].as_str().unwrap()).is_ok());
    assert_eq!(body["timestamp"], "2024-03-07T09:30:00+00:00");
}

#[tokio::test]
async fn test_unknown_source_tracks_nothing() {
    let mut store = MockStore::new();
    store.expect_put_record().never();
    let mut catalog = MockCatalog::new();
    catalog.expect_add_partition().never();

    let service = LineageService::new(store, catalog, config());
    let response = service
        .handle_event(event("aws.glue", "Glue Job State Change", json!({})))
        .await;

    assert_eq!(response.status_code, 200);
    assert_eq!(response.body_json()["lineage_id"], Value::Null);
}

#[tokio::test]
async fn test_unmatched_lambda_still_records_base_lineage() {
    let mut store = MockStore::new();
    store
        .expect_put_record()
        .times(1)
        .returning(|_, body, metadata| {
            let record: Value = serde_json::from_str(&body).unwrap();
            assert_eq!(record["created_by"], "system");
            assert!(record.get("source_system").is_none());
            assert_eq!(metadata["source_system"], "unknown");
            Ok(())
        });
    let mut catalog = MockCatalog::new();
    catalog.expect_add_partition().times(1).returning(|_, _| Ok(()));

    let service = LineageService::new(store, catalog, config());
    let response = service
        .track(
            &parsed(event(
                "aws.lambda",
                "Lambda Function Invocation",
                json!({"functionName": "cost-optimizer"}),
            )),
            now(),
        )
        .await;

    assert_eq!(response.status_code, 200);
    assert!(response.body_json()["lineage_id"].is_string());
}

#[tokio::test]
async fn test_store_failure_fails_tracking() {
    let mut store = MockStore::new();
    store
        .expect_put_record()
        .times(1)
        .returning(|_, _, _| Err(anyhow::anyhow!("AccessDenied")));
    let mut catalog = MockCatalog::new();
    catalog.expect_add_partition().never();

    let service = LineageService::new(store, catalog, config());
    let response = service
        .track(
            &parsed(event(
                "aws.lambda",
                "Lambda Function Invocation",
                json!({"functionName": "ml-inference"}),
            )),
            now(),
        )
        .await;

    assert_eq!(response.status_code, 500);
    let body = response.body_json();
    assert_eq!(body["error"], "AccessDenied");
    assert_eq!(body["message"], "Failed to track data lineage");
}

#[tokio::test]
async fn test_catalog_failure_is_not_fatal() {
    let mut store = MockStore::new();
    store.expect_put_record().times(1).returning(|_, _, _| Ok(()));
    let mut catalog = MockCatalog::new();
    catalog
        .expect_add_partition()
        .times(1)
        .returning(|_, _| Err(anyhow::anyhow!("EntityNotFoundException")));

    let service = LineageService::new(store, catalog, config());
    let response = service
        .track(
            &parsed(event(
                "aws.s3",
                "Object Created",
                json!({"bucket": {"name": "data-lake"}, "object": {"key": "events/year=2024/part-0.json"}}),
            )),
            now(),
        )
        .await;

    assert_eq!(response.status_code, 200);
}

#[tokio::test]
async fn test_own_lineage_writes_are_ignored() {
    let mut store = MockStore::new();
    store.expect_put_record().never();

    let service = LineageService::new(store, MockCatalog::new(), config());
    let own_write = parsed(event(
        "aws.s3",
        "Object Created",
        json!({
            "bucket": {"name": "analytics-lineage"},
            "object": {"key": "lineage/year=2024/month=03/day=07/hour=09/abc.json"}
        }),
    ));

    assert!(service.extract(&own_write, now()).is_none());
    assert_eq!(
        service.track(&own_write, now()).await.body_json()["lineage_id"],
        Value::Null
    );
}

#[tokio::test]
async fn test_lineage_objects_in_other_buckets_are_tracked() {
    let service = LineageService::new(MockStore::new(), MockCatalog::new(), config());
    let record = service
        .extract(
            &parsed(event(
                "aws.s3",
                "Object Created",
                json!({"bucket": {"name": "archive"}, "object": {"key": "lineage/2023.json"}}),
            )),
            now(),
        )
        .unwrap();

    assert_eq!(record.flow.unwrap().transformation_type, "metadata_management");
}

#[tokio::test]
async fn test_event_without_envelope_returns_error() {
    let service = LineageService::new(MockStore::new(), MockCatalog::new(), config());
    let response = service
        .handle_event(json!({"detail": {"streamName": "clickstream"}}))
        .await;

    assert_eq!(response.status_code, 500);
    assert_eq!(response.body_json()["message"], "Failed to track data lineage");
}

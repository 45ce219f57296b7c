use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use data_quality_checker::checks::{
    ANOMALY_SQL, COMPLETENESS_SQL, CONSISTENCY_SQL, FRESHNESS_SQL, RECORD_COUNT_SQL,
};
use data_quality_checker::{
    CheckName, CheckStatus, Config, DataQualityService, QualityMetric, QualityMetrics, Row,
    Thresholds, Warehouse, ERROR_SUBJECT,
};
use mockall::mock;
use ops_common::Notifier;

mock! {
    pub Redshift {}

    #[async_trait]
    impl Warehouse for Redshift {
        async fn query(&self, sql: &str) -> anyhow::Result<Vec<Row>>;
    }
}

mock! {
    pub Metrics {}

    #[async_trait]
    impl QualityMetrics for Metrics {
        async fn publish(&self, namespace: &str, metrics: Vec<QualityMetric>) -> anyhow::Result<()>;
    }
}

mock! {
    pub Sns {}

    #[async_trait]
    impl Notifier for Sns {
        async fn publish(&self, topic_arn: &str, subject: &str, message: &str) -> anyhow::Result<()>;
    }
}

const TOPIC: &str = "arn:aws:sns:us-east-1:123456789012:data-quality";

fn config() -> Config {
    Config {
        cluster_id: "analytics-cluster".to_string(),
        database: "analytics".to_string(),
        db_user: None,
        secret_arn: None,
        sns_topic_arn: Some(TOPIC.to_string()),
        metrics_namespace: "DataAnalytics/DataQuality".to_string(),
        thresholds: Thresholds::default(),
    }
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 10, 5, 0).unwrap()
}

fn row(values: &[&str]) -> Row {
    values.iter().map(|v| Some(v.to_string())).collect()
}

/// Rows a healthy warehouse returns for each check.
fn healthy_rows(sql: &str) -> Vec<Row> {
    match sql {
        RECORD_COUNT_SQL => vec![row(&["1000"])],
        FRESHNESS_SQL => vec![row(&["2024-01-15 10:04:00"])],
        COMPLETENESS_SQL => vec![row(&["1000", "5", "2", "0"])],
        CONSISTENCY_SQL => vec![row(&["3"])],
        ANOMALY_SQL => vec![
            row(&["2024-01-15 10:00:00", "20"]),
            row(&["2024-01-15 10:01:00", "21"]),
        ],
        other => panic!("unexpected query: {}", other),
    }
}

fn quiet_metrics() -> MockMetrics {
    let mut metrics = MockMetrics::new();
    metrics.expect_publish().returning(|_, _| Ok(()));
    metrics
}

#[tokio::test]
async fn test_healthy_warehouse_sends_no_alert() {
    let mut warehouse = MockRedshift::new();
    warehouse
        .expect_query()
        .times(5)
        .returning(|sql| Ok(healthy_rows(sql)));

    let mut metrics = MockMetrics::new();
    metrics
        .expect_publish()
        .times(1)
        .returning(|namespace, metrics| {
            assert_eq!(namespace, "DataAnalytics/DataQuality");
            let names: Vec<_> = metrics.iter().map(|m| m.name).collect();
            assert_eq!(
                names,
                vec![
                    "DataQualityOverallStatus",
                    "DataQualityFailedChecks",
                    "DataQualityErrorChecks"
                ]
            );
            assert_eq!(metrics[0].value, 1.0);
            Ok(())
        });

    let mut sns = MockSns::new();
    sns.expect_publish().never();

    let service = DataQualityService::new(warehouse, metrics, sns, config());
    let response = service.run_checks(now()).await;

    assert_eq!(response.status_code, 200);
    let body = response.body_json();
    assert_eq!(body["message"], "Data quality checks completed");
    assert_eq!(body["results"]["overall_status"], "HEALTHY");
    assert_eq!(body["results"]["passed_checks"], 5);
    assert_eq!(body["results"]["has_issues"], false);
}

#[tokio::test]
async fn test_failed_check_sends_quality_alert() {
    let mut warehouse = MockRedshift::new();
    warehouse.expect_query().times(5).returning(|sql| match sql {
        CONSISTENCY_SQL => Ok(vec![row(&["12"])]),
        other => Ok(healthy_rows(other)),
    });

    let mut sns = MockSns::new();
    sns.expect_publish()
        .times(1)
        .returning(|topic, subject, message| {
            assert_eq!(topic, TOPIC);
            assert_eq!(subject, "Data Quality Alert - UNHEALTHY");
            assert!(message.contains("Overall Status: UNHEALTHY"));
            assert!(message.contains("Failed Checks: 1"));
            assert!(message.contains("data_consistency_check"));
            assert!(message.ends_with("Please investigate these data quality issues."));
            Ok(())
        });

    let service = DataQualityService::new(warehouse, quiet_metrics(), sns, config());
    let response = service.run_checks(now()).await;

    assert_eq!(response.status_code, 200);
    let results = &response.body_json()["results"];
    assert_eq!(results["overall_status"], "UNHEALTHY");
    assert_eq!(results["failed_checks"], 1);
    assert_eq!(
        results["failed_check_details"][0]["message"],
        "Duplicate records: 12 (threshold: 5)"
    );
}

#[tokio::test]
async fn test_query_failure_is_an_error_check() {
    let mut warehouse = MockRedshift::new();
    warehouse.expect_query().times(5).returning(|sql| match sql {
        ANOMALY_SQL => Err(anyhow::anyhow!("statement was aborted")),
        other => Ok(healthy_rows(other)),
    });

    let mut metrics = MockMetrics::new();
    metrics.expect_publish().times(1).returning(|_, metrics| {
        assert_eq!(metrics[0].value, 0.0);
        assert_eq!(metrics[2].value, 1.0);
        Ok(())
    });

    let mut sns = MockSns::new();
    sns.expect_publish().times(1).returning(|_, subject, _| {
        assert_eq!(subject, "Data Quality Alert - UNHEALTHY");
        Ok(())
    });

    let service = DataQualityService::new(warehouse, metrics, sns, config());
    let response = service.run_checks(now()).await;

    assert_eq!(response.status_code, 200);
    let results = &response.body_json()["results"];
    assert_eq!(results["error_checks"], 1);
    assert_eq!(results["error_check_details"][0]["check_name"], "anomaly_detection");
    assert_eq!(results["error_check_details"][0]["status"], "ERROR");
    assert_eq!(
        results["error_check_details"][0]["error"],
        "statement was aborted"
    );
}

#[tokio::test]
async fn test_unreachable_warehouse_sends_checker_error() {
    let mut warehouse = MockRedshift::new();
    warehouse
        .expect_query()
        .times(5)
        .returning(|_| Err(anyhow::anyhow!("cluster is paused")));

    let mut sns = MockSns::new();
    sns.expect_publish()
        .times(1)
        .returning(|_, subject, message| {
            assert_eq!(subject, ERROR_SUBJECT);
            assert!(message.contains("could not complete its checks"));
            Ok(())
        });

    let service = DataQualityService::new(warehouse, quiet_metrics(), sns, config());
    let response = service.run_checks(now()).await;

    assert_eq!(response.status_code, 500);
    assert!(response.body_json()["error"]
        .as_str()
        .unwrap()
        .contains("warehouse"));
}

#[tokio::test]
async fn test_metrics_failure_does_not_fail_the_run() {
    let mut warehouse = MockRedshift::new();
    warehouse
        .expect_query()
        .returning(|sql| Ok(healthy_rows(sql)));

    let mut metrics = MockMetrics::new();
    metrics
        .expect_publish()
        .times(1)
        .returning(|_, _| Err(anyhow::anyhow!("throttled")));

    let mut sns = MockSns::new();
    sns.expect_publish().never();

    let service = DataQualityService::new(warehouse, metrics, sns, config());
    assert_eq!(service.run_checks(now()).await.status_code, 200);
}

#[tokio::test]
async fn test_unparsable_result_is_an_error_check() {
    let mut warehouse = MockRedshift::new();
    warehouse
        .expect_query()
        .times(1)
        .returning(|_| Ok(vec![row(&["lots"])]));

    let service = DataQualityService::new(warehouse, quiet_metrics(), MockSns::new(), config());
    let result = service.run_check(CheckName::RecordCount, now()).await;

    assert_eq!(result.status, CheckStatus::Error);
    assert!(result.error.unwrap().contains("not a number"));
}

#[tokio::test]
async fn test_alert_without_topic_is_skipped() {
    let mut warehouse = MockRedshift::new();
    warehouse.expect_query().returning(|sql| match sql {
        RECORD_COUNT_SQL => Ok(vec![row(&["10"])]),
        other => Ok(healthy_rows(other)),
    });

    let mut sns = MockSns::new();
    sns.expect_publish().never();

    let config = Config {
        sns_topic_arn: None,
        ..config()
    };
    let service = DataQualityService::new(warehouse, quiet_metrics(), sns, config);
    let response = service.run_checks(now()).await;

    assert_eq!(response.status_code, 200);
    assert_eq!(response.body_json()["results"]["overall_status"], "UNHEALTHY");
}

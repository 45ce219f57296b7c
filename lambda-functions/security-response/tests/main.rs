use async_trait::async_trait;
use mockall::mock;
use ops_common::Notifier;
use security_response::{
    Config, FindingArchive, InstanceNetwork, IsolationOps, SecurityGroupRules,
    SecurityResponseService, ISOLATION_GROUP_DESCRIPTION,
};
use serde_json::{json, Value};

mock! {
    pub Isolation {}

    #[async_trait]
    impl IsolationOps for Isolation {
        async fn instance_network(&self, instance_id: &str) -> anyhow::Result<InstanceNetwork>;
        async fn find_security_group(
            &self,
            vpc_id: &str,
            group_name: &str,
        ) -> anyhow::Result<Option<SecurityGroupRules>>;
        async fn create_security_group(
            &self,
            vpc_id: &str,
            group_name: &str,
            description: &str,
        ) -> anyhow::Result<String>;
        async fn revoke_default_egress(&self, group_id: &str) -> anyhow::Result<()>;
        async fn replace_security_groups(
            &self,
            instance_id: &str,
            group_ids: Vec<String>,
        ) -> anyhow::Result<()>;
    }
}

mock! {
    pub Archive {}

    #[async_trait]
    impl FindingArchive for Archive {
        async fn first_detector_id(&self) -> anyhow::Result<Option<String>>;
        async fn archive_finding(&self, detector_id: &str, finding_id: &str) -> anyhow::Result<()>;
    }
}

mock! {
    pub Sns {}

    #[async_trait]
    impl Notifier for Sns {
        async fn publish(&self, topic_arn: &str, subject: &str, message: &str) -> anyhow::Result<()>;
    }
}

type TestService = SecurityResponseService<MockIsolation, MockArchive, MockSns>;

fn service(isolation: MockIsolation, archive: MockArchive, sns: MockSns) -> TestService {
    SecurityResponseService::new(isolation, archive, sns, Config::default())
}

fn guardduty_event(detail: Value) -> Value {
    json!({
        "source": "aws.guardduty",
        "detail-type": "GuardDuty Finding",
        "detail": detail
    })
}

fn instance_in_vpc(isolation: &mut MockIsolation, instance: &'static str) {
    isolation
        .expect_instance_network()
        .times(1)
        .returning(move |id| {
            assert_eq!(id, instance);
            Ok(InstanceNetwork {
                vpc_id: Some("vpc-123".to_string()),
                security_group_ids: vec!["sg-web".to_string()],
            })
        });
}

fn isolation_for(instance: &'static str) -> MockIsolation {
    let mut isolation = MockIsolation::new();
    instance_in_vpc(&mut isolation, instance);
    isolation
        .expect_find_security_group()
        .times(1)
        .returning(|vpc, name| {
            assert_eq!(vpc, "vpc-123");
            assert_eq!(name, "isolation-sg");
            Ok(None)
        });
    isolation
        .expect_create_security_group()
        .times(1)
        .returning(|vpc, name, description| {
            assert_eq!(vpc, "vpc-123");
            assert_eq!(name, "isolation-sg");
            assert_eq!(description, ISOLATION_GROUP_DESCRIPTION);
            Ok("sg-isolate".to_string())
        });
    isolation
        .expect_revoke_default_egress()
        .times(1)
        .returning(|group| {
            assert_eq!(group, "sg-isolate");
            Ok(())
        });
    isolation
        .expect_replace_security_groups()
        .times(1)
        .returning(move |id, groups| {
            assert_eq!(id, instance);
            assert_eq!(groups, vec!["sg-isolate".to_string()]);
            Ok(())
        });
    isolation
}

#[tokio::test]
async fn test_backdoor_finding_isolates_instance() {
    let service = service(isolation_for("i-0abc"), MockArchive::new(), MockSns::new());

    let response = service
        .handle_event(guardduty_event(json!({
            "id": "finding-1",
            "severity": 5.0,
            "type": "Backdoor:EC2/C&CActivity.B!DNS",
            "resource": {"instanceDetails": {"instanceId": "i-0abc"}}
        })))
        .await;

    assert_eq!(response.status_code, 200);
    let body = response.body_json();
    assert_eq!(body["message"], "Security response completed");
    assert_eq!(
        body["action"],
        "Isolated instance i-0abc: Backdoor activity detected"
    );
}

#[tokio::test]
async fn test_high_severity_trojan_is_isolated_and_archived() {
    let mut archive = MockArchive::new();
    archive
        .expect_first_detector_id()
        .times(1)
        .returning(|| Ok(Some("det-1".to_string())));
    archive
        .expect_archive_finding()
        .times(1)
        .returning(|detector, finding| {
            assert_eq!(detector, "det-1");
            assert_eq!(finding, "finding-2");
            Ok(())
        });

    let service = service(isolation_for("i-0def"), archive, MockSns::new());
    let action = service
        .handle_guardduty_finding(&json!({
            "id": "finding-2",
            "severity": 8.0,
            "type": "Trojan:EC2/BlackholeTraffic",
            "resource": {"instanceDetails": {"instanceId": "i-0def"}}
        }))
        .await;

    assert_eq!(
        action,
        "Isolated instance i-0def: Trojan activity detected; Archived high-severity finding: finding-2"
    );
}

#[tokio::test]
async fn test_isolation_failure_is_reported() {
    let mut isolation = MockIsolation::new();
    isolation
        .expect_instance_network()
        .returning(|_| Err(anyhow::anyhow!("instance i-0gone not found")));
    isolation.expect_replace_security_groups().never();

    let service = service(isolation, MockArchive::new(), MockSns::new());
    let action = service
        .isolate_instance("i-0gone", "Backdoor activity detected")
        .await;

    assert_eq!(
        action,
        "Failed to isolate instance i-0gone: instance i-0gone not found"
    );
}

#[tokio::test]
async fn test_recon_finding_blocks_remote_ip() {
    let service = service(MockIsolation::new(), MockArchive::new(), MockSns::new());
    let action = service
        .handle_guardduty_finding(&json!({
            "id": "finding-3",
            "severity": 2.0,
            "type": "Recon:EC2/PortProbeUnprotectedPort",
            "service": {
                "action": {
                    "networkConnectionAction": {
                        "remoteIpDetails": {"ipAddressV4": "198.51.100.7"}
                    }
                }
            }
        }))
        .await;

    assert_eq!(
        action,
        "Blocked suspicious IP 198.51.100.7: Reconnaissance activity detected"
    );
}

#[tokio::test]
async fn test_archive_skipped_without_detector() {
    let mut archive = MockArchive::new();
    archive.expect_first_detector_id().returning(|| Ok(None));
    archive.expect_archive_finding().never();

    let service = service(MockIsolation::new(), archive, MockSns::new());
    let action = service
        .handle_guardduty_finding(&json!({
            "id": "finding-4",
            "severity": 9.0,
            "type": "UnauthorizedAPICall:IAMUser/TorIPCaller",
            "service": {
                "action": {
                    "awsApiCallAction": {"serviceName": "s3.amazonaws.com", "api": "GetObject"}
                }
            }
        }))
        .await;

    assert_eq!(
        action,
        "Unauthorized API call detected: s3.amazonaws.com.GetObject"
    );
}

#[tokio::test]
async fn test_securityhub_findings_are_summarized() {
    let service = service(MockIsolation::new(), MockArchive::new(), MockSns::new());

    let response = service
        .handle_event(json!({
            "source": "aws.securityhub",
            "detail-type": "Security Hub Findings - Imported",
            "detail": {
                "findings": [
                    {
                        "Id": "hub-1",
                        "Severity": {"Label": "HIGH"},
                        "ProductFields": {"aws/securityhub/ProductName": "GuardDuty"}
                    },
                    {
                        "Id": "hub-2",
                        "ProductFields": {
                            "aws/securityhub/ProductName": "Config",
                            "aws/config/ConfigRuleName": "restricted-ssh"
                        },
                        "Compliance": {"Status": "FAILED"}
                    },
                    {
                        "Id": "hub-3",
                        "ProductFields": {"aws/securityhub/ProductName": "Inspector"}
                    }
                ]
            }
        }))
        .await;

    assert_eq!(
        response.body_json()["action"],
        "GuardDuty finding hub-1 forwarded from Security Hub; \
         Compliance violation detected: restricted-ssh; \
         Generic Security Hub finding processed"
    );
}

#[tokio::test]
async fn test_unknown_source_notifies_with_subject() {
    let mut sns = MockSns::new();
    sns.expect_publish()
        .times(1)
        .returning(|topic, subject, message| {
            assert_eq!(topic, "arn:aws:sns:us-east-1:123456789012:security");
            assert_eq!(subject, "Security Alert: custom.scanner");
            assert!(message.contains("Action Taken: Generic security event processed"));
            Ok(())
        });

    let config = Config {
        sns_topic_arn: Some("arn:aws:sns:us-east-1:123456789012:security".to_string()),
        ..Config::default()
    };
    let service = SecurityResponseService::new(MockIsolation::new(), MockArchive::new(), sns, config);

    let response = service
        .handle_event(json!({
            "source": "custom.scanner",
            "detail-type": "Scan Result",
            "detail": {}
        }))
        .await;

    assert_eq!(response.status_code, 200);
    assert_eq!(
        response.body_json()["action"],
        "Generic security event processed"
    );
}

#[tokio::test]
async fn test_non_object_event_returns_error() {
    let service = service(MockIsolation::new(), MockArchive::new(), MockSns::new());
    let response = service.handle_event(json!("not an event")).await;
    assert_eq!(response.status_code, 500);
}

#[tokio::test]
async fn test_event_without_source_returns_error() {
    let service = service(MockIsolation::new(), MockArchive::new(), MockSns::new());
    let response = service
        .handle_event(json!({"detail-type": "GuardDuty Finding", "detail": {}}))
        .await;

    assert_eq!(response.status_code, 500);
    assert!(response.body_json()["error"]
        .as_str()
        .unwrap()
        .contains("source"));
}

#[tokio::test]
async fn test_securityhub_config_finding_that_passed() {
    let service = service(MockIsolation::new(), MockArchive::new(), MockSns::new());

    let action = service.handle_securityhub_findings(&json!({
        "findings": [{
            "Id": "hub-4",
            "ProductFields": {
                "aws/securityhub/ProductName": "Config",
                "aws/config/ConfigRuleName": "encrypted-volumes"
            },
            "Compliance": {"Status": "PASSED"}
        }]
    }));
    assert_eq!(action, "Config finding processed: encrypted-volumes");

    assert_eq!(service.handle_securityhub_findings(&json!({"findings": []})), "");
    assert_eq!(service.handle_securityhub_findings(&json!({})), "");
}

#[tokio::test]
async fn test_existing_empty_group_is_reused() {
    let mut isolation = MockIsolation::new();
    instance_in_vpc(&mut isolation, "i-0abc");
    isolation
        .expect_find_security_group()
        .times(1)
        .returning(|_, _| {
            Ok(Some(SecurityGroupRules {
                group_id: "sg-existing".to_string(),
                ingress_rules: 0,
                egress_rules: 0,
            }))
        });
    isolation.expect_create_security_group().never();
    isolation.expect_revoke_default_egress().never();
    isolation
        .expect_replace_security_groups()
        .times(1)
        .returning(|_, groups| {
            assert_eq!(groups, vec!["sg-existing".to_string()]);
            Ok(())
        });

    let service = service(isolation, MockArchive::new(), MockSns::new());
    let action = service
        .isolate_instance("i-0abc", "Backdoor activity detected")
        .await;

    assert_eq!(action, "Isolated instance i-0abc: Backdoor activity detected");
}

#[tokio::test]
async fn test_existing_group_with_rules_is_not_used() {
    let mut isolation = MockIsolation::new();
    instance_in_vpc(&mut isolation, "i-0abc");
    isolation
        .expect_find_security_group()
        .times(1)
        .returning(|_, _| {
            Ok(Some(SecurityGroupRules {
                group_id: "sg-open".to_string(),
                ingress_rules: 0,
                egress_rules: 1,
            }))
        });
    isolation.expect_create_security_group().never();
    isolation.expect_replace_security_groups().never();

    let service = service(isolation, MockArchive::new(), MockSns::new());
    let action = service
        .isolate_instance("i-0abc", "Backdoor activity detected")
        .await;

    assert!(action.starts_with("Failed to isolate instance i-0abc: "));
    assert!(action.contains("sg-open"));
}

#[tokio::test]
async fn test_egress_revoke_failure_fails_isolation() {
    let mut isolation = MockIsolation::new();
    instance_in_vpc(&mut isolation, "i-0abc");
    isolation
        .expect_find_security_group()
        .times(1)
        .returning(|_, _| Ok(None));
    isolation
        .expect_create_security_group()
        .times(1)
        .returning(|_, _, _| Ok("sg-new".to_string()));
    isolation
        .expect_revoke_default_egress()
        .times(1)
        .returning(|_| Err(anyhow::anyhow!("UnauthorizedOperation")));
    isolation.expect_replace_security_groups().never();

    let service = service(isolation, MockArchive::new(), MockSns::new());
    let action = service
        .isolate_instance("i-0abc", "Trojan activity detected")
        .await;

    assert_eq!(
        action,
        "Failed to isolate instance i-0abc: UnauthorizedOperation"
    );
}

#[tokio::test]
async fn test_backdoor_finding_with_null_fields_still_isolates() {
    let service = service(isolation_for("i-0abc"), MockArchive::new(), MockSns::new());

    let response = service
        .handle_event(guardduty_event(json!({
            "id": null,
            "severity": null,
            "type": "Backdoor:EC2/C&CActivity.B!DNS",
            "resource": {"instanceDetails": {"instanceId": "i-0abc"}}
        })))
        .await;

    assert_eq!(
        response.body_json()["action"],
        "Isolated instance i-0abc: Backdoor activity detected"
    );
}

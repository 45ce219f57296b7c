mod aws;
pub mod policy;

pub use aws::{AwsBucketEncryption, AwsIamInspector, AwsNetworkCompliance};

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_lambda_events::eventbridge::EventBridgeEvent;
use chrono::Utc;
use ops_common::{notify_best_effort, optional_env, LambdaResponse, Notifier, SnsNotifier};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use tracing::{error, info};

pub const NON_COMPLIANT: &str = "NON_COMPLIANT";

/// EventBridge "Config Rules Compliance Change" event.
pub type ComplianceEvent = EventBridgeEvent<ComplianceDetail>;

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceDetail {
    pub config_rule_name: String,
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub new_evaluation_result: EvaluationResult,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    #[serde(default)]
    pub compliance_type: String,
    #[serde(default)]
    pub annotation: Option<String>,
    #[serde(default)]
    pub evaluation_result_identifier: EvaluationResultIdentifier,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResultIdentifier {
    #[serde(default)]
    pub evaluation_result_qualifier: EvaluationResultQualifier,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResultQualifier {
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub resource_id: Option<String>,
}

impl ComplianceDetail {
    fn qualifier(&self) -> &EvaluationResultQualifier {
        &self
            .new_evaluation_result
            .evaluation_result_identifier
            .evaluation_result_qualifier
    }

    /// Resource id from the evaluation qualifier, falling back to the
    /// top-level field Config also sets.
    pub fn resource_id(&self) -> Option<&str> {
        self.qualifier()
            .resource_id
            .as_deref()
            .or(self.resource_id.as_deref())
            .filter(|id| !id.is_empty())
    }

    pub fn resource_type(&self) -> Option<&str> {
        self.qualifier()
            .resource_type
            .as_deref()
            .or(self.resource_type.as_deref())
    }

    pub fn compliance_type(&self) -> &str {
        &self.new_evaluation_result.compliance_type
    }

    pub fn is_non_compliant(&self) -> bool {
        self.compliance_type() == NON_COMPLIANT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    SecurityGroup,
    Ebs,
    S3,
    Iam,
    Generic,
}

impl ViolationKind {
    pub fn classify(rule_name: &str) -> Self {
        let rule = rule_name.to_lowercase();
        if rule.contains("security-group") {
            Self::SecurityGroup
        } else if rule.contains("ebs") {
            Self::Ebs
        } else if rule.contains("s3") {
            Self::S3
        } else if rule.contains("iam") {
            Self::Iam
        } else {
            Self::Generic
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IamResource {
    User(String),
    Role(String),
    Policy(String),
    Unknown(String),
}

impl IamResource {
    /// `user/NAME`, `role/NAME`, `policy/NAME` or a full policy ARN. Bare
    /// policy names are expanded to a customer-managed ARN in `account`.
    pub fn parse(resource_id: &str, account: &str) -> Self {
        if let Some(user) = resource_id.strip_prefix("user/") {
            Self::User(user.to_string())
        } else if let Some(role) = resource_id.strip_prefix("role/") {
            Self::Role(role.to_string())
        } else if resource_id.starts_with("arn:aws:iam::") && resource_id.contains(":policy/") {
            Self::Policy(resource_id.to_string())
        } else if let Some(policy) = resource_id.strip_prefix("policy/") {
            Self::Policy(format!("arn:aws:iam::{}:policy/{}", account, policy))
        } else {
            Self::Unknown(resource_id.to_string())
        }
    }
}

/// One open ingress range of a security group permission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressRule {
    pub protocol: String,
    pub from_port: Option<i32>,
    pub to_port: Option<i32>,
    pub cidr: String,
}

impl IngressRule {
    pub fn is_ipv6(&self) -> bool {
        self.cidr.contains(':')
    }
}

impl fmt::Display for IngressRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let protocol = if self.protocol == "-1" {
            "all"
        } else {
            self.protocol.as_str()
        };
        match (self.from_port, self.to_port) {
            (Some(from), Some(to)) if from == to => {
                write!(f, "{} {}/{}", self.cidr, protocol, from)
            }
            (Some(from), Some(to)) => write!(f, "{} {}/{}-{}", self.cidr, protocol, from, to),
            _ => write!(f, "{} {}", self.cidr, protocol),
        }
    }
}

pub fn is_open_cidr(cidr: &str) -> bool {
    matches!(cidr, "0.0.0.0/0" | "::/0")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionStatus {
    Enabled,
    Missing,
}

#[async_trait]
pub trait NetworkCompliance: Send + Sync {
    /// Ingress ranges of the group open to the world.
    async fn open_ingress_rules(&self, group_id: &str) -> anyhow::Result<Vec<IngressRule>>;
    async fn revoke_ingress(&self, group_id: &str, rule: &IngressRule) -> anyhow::Result<()>;
    async fn volume_encrypted(&self, volume_id: &str) -> anyhow::Result<bool>;
}

#[async_trait]
pub trait BucketEncryption: Send + Sync {
    async fn encryption_status(&self, bucket: &str) -> anyhow::Result<EncryptionStatus>;
    async fn enable_default_encryption(&self, bucket: &str) -> anyhow::Result<()>;
}

#[async_trait]
pub trait IamInspector: Send + Sync {
    async fn mfa_device_count(&self, user_name: &str) -> anyhow::Result<usize>;
    /// Decoded assume-role policy document.
    async fn role_trust_policy(&self, role_name: &str) -> anyhow::Result<Value>;
    /// Decoded document of the policy's default version.
    async fn policy_document(&self, policy_arn: &str) -> anyhow::Result<Value>;
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub sns_topic_arn: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            sns_topic_arn: optional_env("COMPLIANCE_SNS_TOPIC_ARN"),
        }
    }
}

#[derive(Serialize, Debug)]
struct ViolationDetails<'a> {
    rule_name: &'a str,
    resource_type: Option<&'a str>,
    resource_id: &'a str,
    compliance_type: &'a str,
    annotation: &'a str,
}

pub fn notification_message(
    rule_name: &str,
    compliance_type: &str,
    action_taken: &str,
    timestamp: &str,
) -> String {
    format!(
        "Compliance Alert\n\n\
         Rule: {rule_name}\n\
         Compliance Status: {compliance_type}\n\
         Action Taken: {action_taken}\n\
         Timestamp: {timestamp}\n\n\
         This is an automated response to a compliance violation."
    )
}

pub struct ComplianceMonitorService<E, S, I, N> {
    network: E,
    buckets: S,
    iam: I,
    notifier: N,
    config: Config,
}

impl ComplianceMonitorService<AwsNetworkCompliance, AwsBucketEncryption, AwsIamInspector, SnsNotifier> {
    pub async fn from_env() -> Self {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest()).load().await;

        Self::new(
            AwsNetworkCompliance::new(aws_sdk_ec2::Client::new(&sdk_config)),
            AwsBucketEncryption::new(aws_sdk_s3::Client::new(&sdk_config)),
            AwsIamInspector::new(aws_sdk_iam::Client::new(&sdk_config)),
            SnsNotifier::from_conf(&sdk_config),
            Config::from_env(),
        )
    }
}

impl<E, S, I, N> ComplianceMonitorService<E, S, I, N>
where
    E: NetworkCompliance,
    S: BucketEncryption,
    I: IamInspector,
    N: Notifier,
{
    pub fn new(network: E, buckets: S, iam: I, notifier: N, config: Config) -> Self {
        Self {
            network,
            buckets,
            iam,
            notifier,
            config,
        }
    }

    pub async fn handle_violation(&self, detail: &ComplianceDetail, account: &str) -> String {
        let rule_name = detail.config_rule_name.as_str();
        info!("Handling compliance violation for rule: {}", rule_name);

        let Some(resource_id) = detail.resource_id() else {
            return format!(
                "No resource id in evaluation for {} - manual review required",
                rule_name
            );
        };

        info!(
            "Non-compliant resource: {} - {}",
            detail.resource_type().unwrap_or("unknown"),
            resource_id
        );

        match ViolationKind::classify(rule_name) {
            ViolationKind::SecurityGroup => self.remediate_security_group(resource_id).await,
            ViolationKind::Ebs => self.check_volume(resource_id).await,
            ViolationKind::S3 => self.remediate_bucket(resource_id).await,
            ViolationKind::Iam => {
                self.check_iam_resource(IamResource::parse(resource_id, account))
                    .await
            }
            ViolationKind::Generic => {
                let details = ViolationDetails {
                    rule_name,
                    resource_type: detail.resource_type(),
                    resource_id,
                    compliance_type: detail.compliance_type(),
                    annotation: detail
                        .new_evaluation_result
                        .annotation
                        .as_deref()
                        .unwrap_or("No annotation provided"),
                };
                info!(
                    "Compliance violation details: {}",
                    serde_json::to_string(&details).unwrap_or_default()
                );
                format!(
                    "Generic compliance violation for {} - {} logged for manual review",
                    rule_name, resource_id
                )
            }
        }
    }

    pub async fn remediate_security_group(&self, group_id: &str) -> String {
        let rules = match self.network.open_ingress_rules(group_id).await {
            Ok(rules) => rules,
            Err(e) => {
                error!("Failed to handle security group violation: {}", e);
                return format!("Failed to remediate security group {}: {}", group_id, e);
            }
        };

        let mut removed = Vec::new();
        for rule in &rules {
            match self.network.revoke_ingress(group_id, rule).await {
                Ok(()) => removed.push(format!("Removed overly permissive rule: {}", rule)),
                Err(e) => error!("Failed to remove rule {}: {}", rule, e),
            }
        }

        if removed.is_empty() {
            format!(
                "Security group {} violation analyzed - manual review required",
                group_id
            )
        } else {
            format!(
                "Security group {} remediated: {}",
                group_id,
                removed.join("; ")
            )
        }
    }

    pub async fn check_volume(&self, volume_id: &str) -> String {
        match self.network.volume_encrypted(volume_id).await {
            Ok(true) => format!("EBS volume {} is already encrypted", volume_id),
            Ok(false) => format!(
                "EBS volume {} is not encrypted - manual remediation required",
                volume_id
            ),
            Err(e) => {
                error!("Failed to handle EBS violation: {}", e);
                format!("Failed to check EBS volume {}: {}", volume_id, e)
            }
        }
    }

    pub async fn remediate_bucket(&self, bucket: &str) -> String {
        let result = match self.buckets.encryption_status(bucket).await {
            Ok(EncryptionStatus::Enabled) => Ok(format!("S3 bucket {} is encrypted", bucket)),
            Ok(EncryptionStatus::Missing) => self
                .buckets
                .enable_default_encryption(bucket)
                .await
                .map(|()| format!("Enabled encryption for S3 bucket {}", bucket)),
            Err(e) => Err(e),
        };

        result.unwrap_or_else(|e| {
            error!("Failed to handle S3 violation: {}", e);
            format!("Failed to remediate S3 bucket {}: {}", bucket, e)
        })
    }

    pub async fn check_iam_resource(&self, resource: IamResource) -> String {
        match resource {
            IamResource::User(user) => match self.iam.mfa_device_count(&user).await {
                Ok(0) => format!(
                    "IAM user {} does not have MFA enabled - manual remediation required",
                    user
                ),
                Ok(_) => format!("IAM user {} has MFA enabled", user),
                Err(e) => {
                    error!("Failed to check IAM user MFA: {}", e);
                    format!("Failed to check IAM user {}: {}", user, e)
                }
            },
            IamResource::Role(role) => match self.iam.role_trust_policy(&role).await {
                Ok(document) if policy::trust_policy_is_overly_permissive(&document) => format!(
                    "IAM role {} has overly permissive trust policy - manual remediation required",
                    role
                ),
                Ok(_) => format!("IAM role {} trust policy is compliant", role),
                Err(e) => {
                    error!("Failed to check IAM role: {}", e);
                    format!("Failed to check IAM role {}: {}", role, e)
                }
            },
            IamResource::Policy(arn) => match self.iam.policy_document(&arn).await {
                Ok(document) if policy::policy_is_overly_permissive(&document) => format!(
                    "IAM policy {} is overly permissive - manual remediation required",
                    arn
                ),
                Ok(_) => format!("IAM policy {} is compliant", arn),
                Err(e) => {
                    error!("Failed to check IAM policy: {}", e);
                    format!("Failed to check IAM policy {}: {}", arn, e)
                }
            },
            IamResource::Unknown(id) => format!(
                "IAM resource {} violation analyzed - manual review required",
                id
            ),
        }
    }

    pub async fn handle_event(&self, payload: Value) -> LambdaResponse {
        info!("Received event: {}", payload);

        let event: ComplianceEvent = match serde_json::from_value(payload) {
            Ok(event) => event,
            Err(e) => {
                error!("Error in compliance monitoring: {}", e);
                return LambdaResponse::error(e);
            }
        };

        let detail = &event.detail;
        let rule_name = detail.config_rule_name.as_str();
        info!(
            "Config rule: {}, Compliance: {}",
            rule_name,
            detail.compliance_type()
        );

        let action = if detail.is_non_compliant() {
            let account = event.account.as_deref().unwrap_or_default();
            self.handle_violation(detail, account).await
        } else {
            format!("Compliance check passed for rule: {}", rule_name)
        };

        let message = notification_message(
            rule_name,
            detail.compliance_type(),
            &action,
            &Utc::now().to_rfc3339(),
        );
        notify_best_effort(
            &self.notifier,
            self.config.sns_topic_arn.as_deref(),
            &format!("Compliance Alert: {}", rule_name),
            &message,
        )
        .await;

        LambdaResponse::ok(json!({
            "message": "Compliance monitoring completed",
            "rule": rule_name,
            "compliance": detail.compliance_type(),
            "action": action,
        }))
    }
}

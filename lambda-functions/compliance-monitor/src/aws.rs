use crate::policy::decode_policy_document;
use crate::{is_open_cidr, BucketEncryption, EncryptionStatus, IamInspector, IngressRule, NetworkCompliance};
use anyhow::anyhow;
use async_trait::async_trait;
use aws_sdk_ec2::types::{IpPermission, IpRange, Ipv6Range};
use aws_sdk_ec2::Client as Ec2Client;
use aws_sdk_iam::Client as IamClient;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::types::{
    ServerSideEncryption, ServerSideEncryptionByDefault, ServerSideEncryptionConfiguration,
    ServerSideEncryptionRule,
};
use aws_sdk_s3::Client as S3Client;
use serde_json::Value;

const NO_ENCRYPTION_CONFIG: &str = "ServerSideEncryptionConfigurationNotFoundError";

pub struct AwsNetworkCompliance {
    ec2_client: Ec2Client,
}

impl AwsNetworkCompliance {
    pub fn new(ec2_client: Ec2Client) -> Self {
        Self { ec2_client }
    }
}

fn open_ranges(permission: &IpPermission) -> Vec<IngressRule> {
    let rule = |cidr: &str| IngressRule {
        protocol: permission.ip_protocol().unwrap_or("-1").to_string(),
        from_port: permission.from_port(),
        to_port: permission.to_port(),
        cidr: cidr.to_string(),
    };

    let v4 = permission
        .ip_ranges()
        .iter()
        .filter_map(|range| range.cidr_ip())
        .filter(|cidr| is_open_cidr(cidr))
        .map(rule);
    let v6 = permission
        .ipv6_ranges()
        .iter()
        .filter_map(|range| range.cidr_ipv6())
        .filter(|cidr| is_open_cidr(cidr))
        .map(rule);

    v4.chain(v6).collect()
}

#[async_trait]
impl NetworkCompliance for AwsNetworkCompliance {
    async fn open_ingress_rules(&self, group_id: &str) -> anyhow::Result<Vec<IngressRule>> {
        let output = self
            .ec2_client
            .describe_security_groups()
            .group_ids(group_id)
            .send()
            .await?;

        let group = output
            .security_groups()
            .first()
            .ok_or_else(|| anyhow!("security group {} not found", group_id))?;

        Ok(group.ip_permissions().iter().flat_map(open_ranges).collect())
    }

    async fn revoke_ingress(&self, group_id: &str, rule: &IngressRule) -> anyhow::Result<()> {
        let mut permission = IpPermission::builder()
            .ip_protocol(&rule.protocol)
            .set_from_port(rule.from_port)
            .set_to_port(rule.to_port);

        permission = if rule.is_ipv6() {
            permission.ipv6_ranges(Ipv6Range::builder().cidr_ipv6(&rule.cidr).build())
        } else {
            permission.ip_ranges(IpRange::builder().cidr_ip(&rule.cidr).build())
        };

        self.ec2_client
            .revoke_security_group_ingress()
            .group_id(group_id)
            .ip_permissions(permission.build())
            .send()
            .await?;
        Ok(())
    }

    async fn volume_encrypted(&self, volume_id: &str) -> anyhow::Result<bool> {
        let output = self
            .ec2_client
            .describe_volumes()
            .volume_ids(volume_id)
            .send()
            .await?;

        let volume = output
            .volumes()
            .first()
            .ok_or_else(|| anyhow!("volume {} not found", volume_id))?;

        Ok(volume.encrypted().unwrap_or(false))
    }
}

pub struct AwsBucketEncryption {
    s3_client: S3Client,
}

impl AwsBucketEncryption {
    pub fn new(s3_client: S3Client) -> Self {
        Self { s3_client }
    }
}

#[async_trait]
impl BucketEncryption for AwsBucketEncryption {
    async fn encryption_status(&self, bucket: &str) -> anyhow::Result<EncryptionStatus> {
        match self
            .s3_client
            .get_bucket_encryption()
            .bucket(bucket)
            .send()
            .await
        {
            Ok(_) => Ok(EncryptionStatus::Enabled),
            Err(e)
                if e.as_service_error().and_then(|se| se.code()) == Some(NO_ENCRYPTION_CONFIG) =>
            {
                Ok(EncryptionStatus::Missing)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn enable_default_encryption(&self, bucket: &str) -> anyhow::Result<()> {
        let by_default = ServerSideEncryptionByDefault::builder()
            .sse_algorithm(ServerSideEncryption::Aes256)
            .build()?;
        let configuration = ServerSideEncryptionConfiguration::builder()
            .rules(
                ServerSideEncryptionRule::builder()
                    .apply_server_side_encryption_by_default(by_default)
                    .build(),
            )
            .build()?;

        self.s3_client
            .put_bucket_encryption()
            .bucket(bucket)
            .server_side_encryption_configuration(configuration)
            .send()
            .await?;
        Ok(())
    }
}

pub struct AwsIamInspector {
    iam_client: IamClient,
}

impl AwsIamInspector {
    pub fn new(iam_client: IamClient) -> Self {
        Self { iam_client }
    }
}

#[async_trait]
impl IamInspector for AwsIamInspector {
    async fn mfa_device_count(&self, user_name: &str) -> anyhow::Result<usize> {
        let output = self
            .iam_client
            .list_mfa_devices()
            .user_name(user_name)
            .send()
            .await?;
        Ok(output.mfa_devices().len())
    }

    async fn role_trust_policy(&self, role_name: &str) -> anyhow::Result<Value> {
        let output = self.iam_client.get_role().role_name(role_name).send().await?;
        let document = output
            .role()
            .and_then(|role| role.assume_role_policy_document())
            .ok_or_else(|| anyhow!("role {} has no trust policy", role_name))?;
        decode_policy_document(document)
    }

    async fn policy_document(&self, policy_arn: &str) -> anyhow::Result<Value> {
        let policy = self
            .iam_client
            .get_policy()
            .policy_arn(policy_arn)
            .send()
            .await?;
        let version_id = policy
            .policy()
            .and_then(|policy| policy.default_version_id())
            .ok_or_else(|| anyhow!("policy {} has no default version", policy_arn))?;

        let version = self
            .iam_client
            .get_policy_version()
            .policy_arn(policy_arn)
            .version_id(version_id)
            .send()
            .await?;
        let document = version
            .policy_version()
            .and_then(|version| version.document())
            .ok_or_else(|| anyhow!("policy version {} has no document", version_id))?;
        decode_policy_document(document)
    }
}

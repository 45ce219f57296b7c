use crate::{FindingArchive, InstanceNetwork, IsolationOps, SecurityGroupRules};
use anyhow::anyhow;
use async_trait::async_trait;
use aws_sdk_ec2::types::{Filter, IpPermission, IpRange};
use aws_sdk_ec2::Client as Ec2Client;
use aws_sdk_guardduty::Client as GuardDutyClient;

pub struct AwsIsolation {
    ec2_client: Ec2Client,
}

impl AwsIsolation {
    pub fn new(ec2_client: Ec2Client) -> Self {
        Self { ec2_client }
    }
}

#[async_trait]
impl IsolationOps for AwsIsolation {
    async fn instance_network(&self, instance_id: &str) -> anyhow::Result<InstanceNetwork> {
        let output = self
            .ec2_client
            .describe_instances()
            .instance_ids(instance_id)
            .send()
            .await?;

        let instance = output
            .reservations()
            .iter()
            .flat_map(|reservation| reservation.instances())
            .next()
            .ok_or_else(|| anyhow!("instance {} not found", instance_id))?;

        Ok(InstanceNetwork {
            vpc_id: instance.vpc_id().map(str::to_string),
            security_group_ids: instance
                .security_groups()
                .iter()
                .filter_map(|group| group.group_id().map(str::to_string))
                .collect(),
        })
    }

    async fn find_security_group(
        &self,
        vpc_id: &str,
        group_name: &str,
    ) -> anyhow::Result<Option<SecurityGroupRules>> {
        let output = self
            .ec2_client
            .describe_security_groups()
            .filters(Filter::builder().name("vpc-id").values(vpc_id).build())
            .filters(Filter::builder().name("group-name").values(group_name).build())
            .send()
            .await?;

        Ok(output.security_groups().iter().find_map(|group| {
            group.group_id().map(|group_id| SecurityGroupRules {
                group_id: group_id.to_string(),
                ingress_rules: group.ip_permissions().len(),
                egress_rules: group.ip_permissions_egress().len(),
            })
        }))
    }

    async fn create_security_group(
        &self,
        vpc_id: &str,
        group_name: &str,
        description: &str,
    ) -> anyhow::Result<String> {
        let output = self
            .ec2_client
            .create_security_group()
            .group_name(group_name)
            .description(description)
            .vpc_id(vpc_id)
            .send()
            .await?;

        output
            .group_id()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("CreateSecurityGroup returned no group id"))
    }

    async fn revoke_default_egress(&self, group_id: &str) -> anyhow::Result<()> {
        let allow_all = IpPermission::builder()
            .ip_protocol("-1")
            .ip_ranges(IpRange::builder().cidr_ip("0.0.0.0/0").build())
            .build();

        self.ec2_client
            .revoke_security_group_egress()
            .group_id(group_id)
            .ip_permissions(allow_all)
            .send()
            .await?;
        Ok(())
    }

    async fn replace_security_groups(
        &self,
        instance_id: &str,
        group_ids: Vec<String>,
    ) -> anyhow::Result<()> {
        self.ec2_client
            .modify_instance_attribute()
            .instance_id(instance_id)
            .set_groups(Some(group_ids))
            .send()
            .await?;
        Ok(())
    }
}

pub struct AwsFindingArchive {
    guardduty_client: GuardDutyClient,
}

impl AwsFindingArchive {
    pub fn new(guardduty_client: GuardDutyClient) -> Self {
        Self { guardduty_client }
    }
}

#[async_trait]
impl FindingArchive for AwsFindingArchive {
    async fn first_detector_id(&self) -> anyhow::Result<Option<String>> {
        let output = self.guardduty_client.list_detectors().send().await?;
        Ok(output.detector_ids().first().cloned())
    }

    async fn archive_finding(&self, detector_id: &str, finding_id: &str) -> anyhow::Result<()> {
        self.guardduty_client
            .archive_findings()
            .detector_id(detector_id)
            .finding_ids(finding_id)
            .send()
            .await?;
        Ok(())
    }
}

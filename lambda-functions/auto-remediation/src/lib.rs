use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_lambda_events::eventbridge::EventBridgeEvent;
use aws_sdk_ec2::Client as Ec2Client;
use aws_sdk_ssm::Client as SsmClient;
use chrono::Utc;
use ops_common::{notify_best_effort, optional_env, LambdaResponse, Notifier, SnsNotifier};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::LazyLock;
use tracing::{error, info, warn};

pub const RUN_SHELL_DOCUMENT: &str = "AWS-RunShellScript";

static INSTANCE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"i-[a-f0-9]+").expect("instance id pattern is valid"));

/// EventBridge "CloudWatch Alarm State Change" event.
pub type AlarmEvent = EventBridgeEvent<AlarmDetail>;

/// The part of the alarm detail we read.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AlarmDetail {
    pub alarm_name: String,
    pub state: AlarmState,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct AlarmState {
    pub value: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlarmKind {
    HighCpu,
    HighMemory,
    DiskSpace,
    InstanceStatus,
    Generic,
}

impl AlarmKind {
    /// Matches on the alarm name, first hit wins.
    pub fn classify(alarm_name: &str) -> Self {
        let name = alarm_name.to_lowercase();
        if name.contains("high-cpu") {
            Self::HighCpu
        } else if name.contains("high-memory") {
            Self::HighMemory
        } else if name.contains("disk-space") {
            Self::DiskSpace
        } else if name.contains("instance-status") {
            Self::InstanceStatus
        } else {
            Self::Generic
        }
    }

    pub fn manual_intervention_message(&self) -> String {
        format!("{} alarm processed - manual intervention may be required", self)
    }

    /// Shell commands sent through SSM, or `None` for kinds remediated
    /// without Run Command.
    pub fn shell_commands(&self) -> Option<Vec<String>> {
        let commands: &[&str] = match self {
            Self::HighCpu => &["sudo systemctl restart httpd", "sudo systemctl status httpd"],
            Self::HighMemory => &[
                "sudo sync",
                "sudo sh -c 'echo 3 > /proc/sys/vm/drop_caches'",
                "free -h",
            ],
            Self::DiskSpace => &[
                "sudo find /var/log -name \"*.log\" -type f -mtime +7 -delete",
                "sudo find /tmp -type f -mtime +1 -delete",
                "sudo yum clean all",
                "df -h",
            ],
            Self::InstanceStatus | Self::Generic => return None,
        };
        Some(commands.iter().map(|c| c.to_string()).collect())
    }

    /// Summary prefix on success and the verb used in failure messages.
    pub fn command_outcome(&self) -> Option<(&'static str, &'static str)> {
        match self {
            Self::HighCpu => Some(("Restarted Apache service", "restart service")),
            Self::HighMemory => Some(("Cleared system cache", "clear cache")),
            Self::DiskSpace => Some(("Cleaned up disk space", "clean disk")),
            Self::InstanceStatus | Self::Generic => None,
        }
    }
}

impl fmt::Display for AlarmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HighCpu => write!(f, "High CPU"),
            Self::HighMemory => write!(f, "High memory"),
            Self::DiskSpace => write!(f, "Disk space"),
            Self::InstanceStatus => write!(f, "Instance status"),
            Self::Generic => write!(f, "Generic"),
        }
    }
}

/// Finds an EC2 instance id in the alarm name, then in the state reason.
pub fn extract_instance_id(alarm_name: &str, alarm_reason: &str) -> Option<String> {
    INSTANCE_ID
        .find(alarm_name)
        .or_else(|| INSTANCE_ID.find(alarm_reason))
        .map(|m| m.as_str().to_string())
}

pub fn notification_message(
    alarm_name: &str,
    alarm_state: &str,
    action_taken: &str,
    timestamp: &str,
) -> String {
    format!(
        "Auto-Remediation Alert\n\n\
         Alarm: {alarm_name}\n\
         State: {alarm_state}\n\
         Action Taken: {action_taken}\n\
         Timestamp: {timestamp}\n\n\
         This is an automated response to a CloudWatch alarm."
    )
}

#[async_trait]
pub trait InstanceOps: Send + Sync {
    /// Current state name (`running`, `stopped`, ...) or `None` if the
    /// instance was not returned.
    async fn instance_state(&self, instance_id: &str) -> anyhow::Result<Option<String>>;

    /// Runs the commands through SSM Run Command and returns the command id.
    async fn run_shell_commands(
        &self,
        instance_id: &str,
        commands: Vec<String>,
    ) -> anyhow::Result<String>;

    async fn reboot_instance(&self, instance_id: &str) -> anyhow::Result<()>;
}

pub struct AwsInstanceOps {
    ec2_client: Ec2Client,
    ssm_client: SsmClient,
}

impl AwsInstanceOps {
    pub fn new(ec2_client: Ec2Client, ssm_client: SsmClient) -> Self {
        Self {
            ec2_client,
            ssm_client,
        }
    }
}

#[async_trait]
impl InstanceOps for AwsInstanceOps {
    async fn instance_state(&self, instance_id: &str) -> anyhow::Result<Option<String>> {
        let output = self
            .ec2_client
            .describe_instances()
            .instance_ids(instance_id)
            .send()
            .await?;

        Ok(output
            .reservations()
            .iter()
            .flat_map(|reservation| reservation.instances())
            .find_map(|instance| {
                instance
                    .state()
                    .and_then(|state| state.name())
                    .map(|name| name.as_str().to_string())
            }))
    }

    async fn run_shell_commands(
        &self,
        instance_id: &str,
        commands: Vec<String>,
    ) -> anyhow::Result<String> {
        let output = self
            .ssm_client
            .send_command()
            .instance_ids(instance_id)
            .document_name(RUN_SHELL_DOCUMENT)
            .parameters("commands", commands)
            .send()
            .await?;

        Ok(output
            .command()
            .and_then(|command| command.command_id())
            .unwrap_or_default()
            .to_string())
    }

    async fn reboot_instance(&self, instance_id: &str) -> anyhow::Result<()> {
        self.ec2_client
            .reboot_instances()
            .instance_ids(instance_id)
            .send()
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub sns_topic_arn: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            sns_topic_arn: optional_env("SNS_TOPIC_ARN"),
        }
    }
}

pub struct AutoRemediationService<I, N> {
    instances: I,
    notifier: N,
    config: Config,
}

impl AutoRemediationService<AwsInstanceOps, SnsNotifier> {
    pub async fn from_env() -> Self {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest()).load().await;

        Self::new(
            AwsInstanceOps::new(Ec2Client::new(&sdk_config), SsmClient::new(&sdk_config)),
            SnsNotifier::from_conf(&sdk_config),
            Config::from_env(),
        )
    }
}

impl<I: InstanceOps, N: Notifier> AutoRemediationService<I, N> {
    pub fn new(instances: I, notifier: N, config: Config) -> Self {
        Self {
            instances,
            notifier,
            config,
        }
    }

    pub async fn remediate(&self, kind: AlarmKind, alarm_name: &str, alarm_reason: &str) -> String {
        info!("Handling {} alarm", kind);

        if kind == AlarmKind::Generic {
            return format!("Generic alarm processed: {}", alarm_name);
        }

        let Some(instance_id) = extract_instance_id(alarm_name, alarm_reason) else {
            warn!("No instance id found in alarm {}", alarm_name);
            return kind.manual_intervention_message();
        };

        match kind {
            AlarmKind::HighCpu => self.restart_web_service(&instance_id).await,
            AlarmKind::InstanceStatus => match self.instances.reboot_instance(&instance_id).await {
                Ok(()) => format!("Rebooted instance {}", instance_id),
                Err(e) => {
                    error!("Failed to reboot instance: {}", e);
                    format!("Failed to reboot instance {}: {}", instance_id, e)
                }
            },
            _ => self.run_commands(kind, &instance_id).await,
        }
    }

    async fn restart_web_service(&self, instance_id: &str) -> String {
        match self.instances.instance_state(instance_id).await {
            Ok(Some(state)) if state == "running" => {
                self.run_commands(AlarmKind::HighCpu, instance_id).await
            }
            Ok(state) => {
                info!(
                    "Instance {} is {}, skipping service restart",
                    instance_id,
                    state.as_deref().unwrap_or("not found")
                );
                AlarmKind::HighCpu.manual_intervention_message()
            }
            Err(e) => {
                error!("Failed to describe instance {}: {}", instance_id, e);
                format!("Failed to check state of instance {}: {}", instance_id, e)
            }
        }
    }

    async fn run_commands(&self, kind: AlarmKind, instance_id: &str) -> String {
        let (Some(commands), Some((done, verb))) = (kind.shell_commands(), kind.command_outcome())
        else {
            return kind.manual_intervention_message();
        };

        match self.instances.run_shell_commands(instance_id, commands).await {
            Ok(command_id) => {
                info!("Sent command {} to instance {}", command_id, instance_id);
                format!("{} on instance {}", done, instance_id)
            }
            Err(e) => {
                error!("Failed to {}: {}", verb, e);
                format!("Failed to {} on instance {}: {}", verb, instance_id, e)
            }
        }
    }

    pub async fn send_notification(&self, alarm_name: &str, alarm_state: &str, action: &str) {
        let message =
            notification_message(alarm_name, alarm_state, action, &Utc::now().to_rfc3339());

        if notify_best_effort(
            &self.notifier,
            self.config.sns_topic_arn.as_deref(),
            &format!("Auto-Remediation: {}", alarm_name),
            &message,
        )
        .await
        {
            info!("Notification sent for alarm: {}", alarm_name);
        }
    }

    pub async fn handle_event(&self, payload: Value) -> LambdaResponse {
        info!("Received event: {}", payload);

        let event: AlarmEvent = match serde_json::from_value(payload) {
            Ok(event) => event,
            Err(e) => {
                error!("Error in auto-remediation: {}", e);
                return LambdaResponse::error(e);
            }
        };

        let detail = event.detail;
        info!(
            "Processing alarm: {}, State: {}",
            detail.alarm_name, detail.state.value
        );

        let kind = AlarmKind::classify(&detail.alarm_name);
        let action = self
            .remediate(kind, &detail.alarm_name, &detail.state.reason)
            .await;

        self.send_notification(&detail.alarm_name, &detail.state.value, &action)
            .await;

        LambdaResponse::ok(json!({
            "message": "Auto-remediation completed",
            "alarm": detail.alarm_name,
            "action": action,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_alarm() {
        assert_eq!(AlarmKind::classify("web-HIGH-CPU-i-0abc"), AlarmKind::HighCpu);
        assert_eq!(AlarmKind::classify("app-high-memory"), AlarmKind::HighMemory);
        assert_eq!(AlarmKind::classify("root-disk-space-low"), AlarmKind::DiskSpace);
        assert_eq!(
            AlarmKind::classify("instance-status-check-failed"),
            AlarmKind::InstanceStatus
        );
        assert_eq!(AlarmKind::classify("billing"), AlarmKind::Generic);
    }

    #[test]
    fn test_classify_order() {
        // Names carrying several markers resolve to the first one checked.
        assert_eq!(
            AlarmKind::classify("high-memory-and-high-cpu"),
            AlarmKind::HighCpu
        );
    }

    #[test]
    fn test_extract_instance_id() {
        assert_eq!(
            extract_instance_id("high-cpu-i-0123abcd", ""),
            Some("i-0123abcd".to_string())
        );
        assert_eq!(
            extract_instance_id(
                "high-cpu",
                "Threshold Crossed: InstanceId i-0fedcba987 above 80"
            ),
            Some("i-0fedcba987".to_string())
        );
        assert_eq!(
            extract_instance_id("high-cpu-i-aaa", "reason i-bbb"),
            Some("i-aaa".to_string())
        );
        assert_eq!(extract_instance_id("high-cpu", "no instance here"), None);
    }

    #[test]
    fn test_shell_commands() {
        let cpu = AlarmKind::HighCpu.shell_commands().unwrap();
        assert_eq!(cpu[0], "sudo systemctl restart httpd");

        let disk = AlarmKind::DiskSpace.shell_commands().unwrap();
        assert_eq!(disk.len(), 4);
        assert_eq!(disk.last().unwrap(), "df -h");

        assert!(AlarmKind::InstanceStatus.shell_commands().is_none());
        assert!(AlarmKind::Generic.shell_commands().is_none());
    }

    #[test]
    fn test_manual_intervention_message() {
        assert_eq!(
            AlarmKind::HighCpu.manual_intervention_message(),
            "High CPU alarm processed - manual intervention may be required"
        );
    }

    #[test]
    fn test_notification_message() {
        let message = notification_message(
            "high-cpu-i-1",
            "ALARM",
            "Restarted Apache service on instance i-1",
            "2025-01-06T12:00:00Z",
        );

        assert!(message.starts_with("Auto-Remediation Alert"));
        assert!(message.contains("Alarm: high-cpu-i-1\n"));
        assert!(message.contains("State: ALARM\n"));
        assert!(message.contains("Action Taken: Restarted Apache service on instance i-1\n"));
        assert!(message.contains("Timestamp: 2025-01-06T12:00:00Z"));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{
            "source": "aws.cloudwatch",
            "detail-type": "CloudWatch Alarm State Change",
            "detail": {
                "alarmName": "high-cpu-i-0abc",
                "state": {"value": "ALARM", "reason": "Threshold Crossed"}
            }
        }"#;
        let event: AlarmEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.source, "aws.cloudwatch");
        assert_eq!(event.detail.alarm_name, "high-cpu-i-0abc");
        assert_eq!(event.detail.state.value, "ALARM");
        assert_eq!(event.detail.state.reason, "Threshold Crossed");
    }
}

use async_trait::async_trait;
use aws_sdk_sns::Client as SnsClient;
use tracing::{error, info};

/// SNS rejects subjects of 100 characters or more.
pub const MAX_SUBJECT_LEN: usize = 99;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, topic_arn: &str, subject: &str, message: &str) -> anyhow::Result<()>;
}

pub struct SnsNotifier {
    client: SnsClient,
}

impl SnsNotifier {
    pub fn new(client: SnsClient) -> Self {
        Self { client }
    }

    pub fn from_conf(config: &aws_config::SdkConfig) -> Self {
        Self::new(SnsClient::new(config))
    }
}

#[async_trait]
impl Notifier for SnsNotifier {
    async fn publish(&self, topic_arn: &str, subject: &str, message: &str) -> anyhow::Result<()> {
        let output = self
            .client
            .publish()
            .topic_arn(topic_arn)
            .subject(truncate_subject(subject))
            .message(message)
            .send()
            .await?;

        info!(
            "Published notification {} to {}",
            output.message_id().unwrap_or("<none>"),
            topic_arn
        );
        Ok(())
    }
}

/// Cuts `subject` to what SNS accepts: printable ASCII only, under 100
/// characters. Whitespace controls become spaces and any other character
/// outside printable ASCII becomes `?`.
pub fn truncate_subject(subject: &str) -> String {
    subject
        .chars()
        .map(|c| match c {
            ' '..='~' => c,
            c if c.is_whitespace() => ' ',
            _ => '?',
        })
        .take(MAX_SUBJECT_LEN)
        .collect()
}

/// Publishes when a topic is configured. Failures are logged and swallowed
/// so a notification problem never fails the invocation.
pub async fn notify_best_effort<N: Notifier + ?Sized>(
    notifier: &N,
    topic_arn: Option<&str>,
    subject: &str,
    message: &str,
) -> bool {
    let Some(topic_arn) = topic_arn else {
        info!("No notification topic configured, skipping \"{}\"", subject);
        return false;
    };

    match notifier.publish(topic_arn, subject, message).await {
        Ok(()) => true,
        Err(e) => {
            error!("Failed to send notification \"{}\": {}", subject, e);
            false
        }
    }
}

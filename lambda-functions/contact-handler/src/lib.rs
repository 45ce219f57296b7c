mod aws;
pub mod form;

pub use aws::DynamoSubmissionStore;
pub use form::{validate, ContactForm, Submission};

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_lambda_events::apigw::{ApiGatewayProxyRequest, ApiGatewayProxyResponse};
use aws_lambda_events::encodings::Body;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    CONTENT_TYPE,
};
use http::{HeaderMap, HeaderValue, Method};
use ops_common::{env_or, notify_best_effort, optional_env, Notifier, SnsNotifier};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

const ALLOW_METHODS: &str = "POST, OPTIONS";
const ALLOW_HEADERS: &str =
    "Content-Type, X-Amz-Date, Authorization, X-Api-Key, X-Amz-Security-Token";

#[derive(Debug, Error)]
pub enum ContactError {
    #[error("Invalid JSON body")]
    InvalidJson(anyhow::Error),

    #[error("Validation failed")]
    Validation(Vec<String>),

    #[error("Failed to store contact submission: {0}")]
    Store(anyhow::Error),
}

impl ContactError {
    pub fn status_code(&self) -> i64 {
        match self {
            Self::InvalidJson(_) | Self::Validation(_) => 400,
            Self::Store(_) => 500,
        }
    }

    pub fn body(&self) -> Value {
        match self {
            Self::InvalidJson(_) => json!({ "error": self.to_string() }),
            Self::Validation(details) => json!({
                "error": self.to_string(),
                "details": details,
            }),
            Self::Store(_) => json!({
                "error": "Internal server error",
                "message": "An error occurred while processing your request",
            }),
        }
    }
}

#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn put_submission(&self, submission: &Submission) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct Config {
    pub table_name: String,
    pub sns_topic_arn: Option<String>,
    pub allowed_origin: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            table_name: "contact-submissions".to_string(),
            sns_topic_arn: None,
            allowed_origin: "*".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            table_name: env_or("CONTACT_TABLE", &defaults.table_name),
            sns_topic_arn: optional_env("SNS_TOPIC_ARN"),
            allowed_origin: env_or("ALLOWED_ORIGIN", &defaults.allowed_origin),
        }
    }
}

/// Decodes the request body into a form. A missing body is an empty form.
pub fn parse_form(request: &ApiGatewayProxyRequest) -> Result<ContactForm, ContactError> {
    let Some(raw) = request.body.as_deref() else {
        return Ok(ContactForm::default());
    };

    let text = if request.is_base64_encoded {
        let bytes = STANDARD
            .decode(raw)
            .map_err(|e| ContactError::InvalidJson(e.into()))?;
        String::from_utf8(bytes).map_err(|e| ContactError::InvalidJson(e.into()))?
    } else {
        raw.to_string()
    };

    if text.trim().is_empty() {
        return Ok(ContactForm::default());
    }

    serde_json::from_str(&text).map_err(|e| ContactError::InvalidJson(e.into()))
}

pub struct ContactService<S, N> {
    store: S,
    notifier: N,
    config: Config,
}

impl ContactService<DynamoSubmissionStore, SnsNotifier> {
    pub async fn from_env() -> Self {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        let config = Config::from_env();

        Self::new(
            DynamoSubmissionStore::new(
                aws_sdk_dynamodb::Client::new(&sdk_config),
                config.table_name.clone(),
            ),
            SnsNotifier::from_conf(&sdk_config),
            config,
        )
    }
}

impl<S: SubmissionStore, N: Notifier> ContactService<S, N> {
    pub fn new(store: S, notifier: N, config: Config) -> Self {
        Self {
            store,
            notifier,
            config,
        }
    }

    fn headers(&self) -> HeaderMap {
        let origin = HeaderValue::from_str(&self.config.allowed_origin)
            .unwrap_or_else(|_| HeaderValue::from_static("*"));

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        headers.insert(
            ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOW_METHODS),
        );
        headers.insert(
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOW_HEADERS),
        );
        headers
    }

    pub fn respond(&self, status_code: i64, body: Value) -> ApiGatewayProxyResponse {
        let mut response = ApiGatewayProxyResponse::default();
        response.status_code = status_code;
        response.headers = self.headers();
        response.body = Some(Body::Text(body.to_string()));
        response
    }

    /// Validates, stores and announces one submission.
    pub async fn submit(&self, form: &ContactForm) -> Result<Submission, ContactError> {
        let errors = validate(form);
        if !errors.is_empty() {
            info!("Rejected contact form: {:?}", errors);
            return Err(ContactError::Validation(errors));
        }

        let submission = Submission::from_form(
            form,
            Uuid::new_v4().to_string(),
            &Utc::now().to_rfc3339(),
        );

        info!(
            "Storing submission {} in {}",
            submission.submission_id, self.config.table_name
        );
        self.store
            .put_submission(&submission)
            .await
            .map_err(ContactError::Store)?;
        info!("Successfully stored submission {}", submission.submission_id);

        notify_best_effort(
            &self.notifier,
            self.config.sns_topic_arn.as_deref(),
            &submission.notification_subject(),
            &submission.notification_message(),
        )
        .await;

        Ok(submission)
    }

    pub async fn handle_request(&self, request: ApiGatewayProxyRequest) -> ApiGatewayProxyResponse {
        info!(
            "Received {} request for {}",
            request.http_method,
            request.path.as_deref().unwrap_or("/")
        );

        if request.http_method == Method::OPTIONS {
            return self.respond(200, json!({}));
        }

        let result = match parse_form(&request) {
            Ok(form) => self.submit(&form).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(submission) => self.respond(
                200,
                json!({
                    "message": "Contact form submitted successfully",
                    "submission_id": submission.submission_id,
                    "timestamp": submission.created_at,
                }),
            ),
            Err(e) => {
                match &e {
                    ContactError::Store(_) => error!("Error processing contact form: {}", e),
                    _ => info!("Rejected contact form request: {}", e),
                }
                self.respond(e.status_code(), e.body())
            }
        }
    }
}

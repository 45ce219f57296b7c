//! Pieces shared by every ops Lambda: the EventBridge response envelope,
//! SNS notifications, environment configuration and log setup.

pub mod config;
pub mod logging;
pub mod notify;
pub mod response;

pub use config::{
    days_before, days_env_or, env_or, optional_env, parse_env_or, required_env, ConfigError,
};
pub use logging::init_tracing;
pub use notify::{notify_best_effort, Notifier, SnsNotifier, MAX_SUBJECT_LEN};
pub use response::LambdaResponse;

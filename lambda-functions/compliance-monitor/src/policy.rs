//! Checks over IAM policy documents.
//!
//! IAM hands documents back URL-encoded, and the grammar lets `Statement`,
//! `Action`, `Resource` and principals be either a single value or a list.

use anyhow::Context;
use serde_json::Value;

pub fn decode_policy_document(raw: &str) -> anyhow::Result<Value> {
    let trimmed = raw.trim();
    let json = if trimmed.starts_with('{') {
        trimmed.to_string()
    } else {
        urlencoding::decode(trimmed)
            .context("policy document is not valid URL encoding")?
            .into_owned()
    };

    serde_json::from_str(&json).context("policy document is not valid JSON")
}

pub fn statements(document: &Value) -> Vec<&Value> {
    match document.get("Statement") {
        Some(Value::Array(statements)) => statements.iter().collect(),
        Some(statement @ Value::Object(_)) => vec![statement],
        _ => Vec::new(),
    }
}

fn is_allow(statement: &Value) -> bool {
    statement.get("Effect").and_then(Value::as_str) == Some("Allow")
}

fn contains_wildcard(value: Option<&Value>) -> bool {
    match value {
        Some(Value::String(s)) => s == "*",
        Some(Value::Array(items)) => items.iter().any(|item| item.as_str() == Some("*")),
        _ => false,
    }
}

/// A trust policy letting any AWS principal assume the role.
pub fn trust_policy_is_overly_permissive(document: &Value) -> bool {
    statements(document).into_iter().filter(|s| is_allow(s)).any(|statement| {
        match statement.get("Principal") {
            Some(Value::String(principal)) => principal == "*",
            Some(principal @ Value::Object(_)) => contains_wildcard(principal.get("AWS")),
            _ => false,
        }
    })
}

/// An identity policy granting every action on every resource.
pub fn policy_is_overly_permissive(document: &Value) -> bool {
    statements(document)
        .into_iter()
        .filter(|s| is_allow(s))
        .any(|statement| {
            contains_wildcard(statement.get("Action"))
                && contains_wildcard(statement.get("Resource"))
        })
}

//! Shapes of the GuardDuty and Security Hub events we react to.
//!
//! Only the fields the responder reads are typed; the rest of the finding
//! stays as raw JSON and is navigated with pointers, since both services
//! nest the interesting parts several levels deep.

use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    GuardDuty,
    SecurityHub,
    Other,
}

impl EventSource {
    /// Routes on the EventBridge `source`, e.g. `aws.guardduty`.
    pub fn from_source(source: &str) -> Self {
        let source = source.to_lowercase();
        if source.contains("guardduty") {
            Self::GuardDuty
        } else if source.contains("securityhub") {
            Self::SecurityHub
        } else {
            Self::Other
        }
    }
}

/// Reads a field as `T`, treating a value of the wrong shape like a missing
/// one so a single odd field never discards the rest of the finding.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct GuardDutyFinding {
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub severity: Option<f64>,
    #[serde(rename = "type", default, deserialize_with = "lenient")]
    pub finding_type: Option<String>,
    #[serde(default)]
    pub resource: Value,
    #[serde(default)]
    pub service: Value,
    // Some producers flatten `service.action` onto the finding itself.
    #[serde(default)]
    pub action: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreatKind {
    Reconnaissance,
    Backdoor,
    Trojan,
    UnauthorizedApiCall,
    Other,
}

impl fmt::Display for ThreatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reconnaissance => write!(f, "Reconnaissance"),
            Self::Backdoor => write!(f, "Backdoor"),
            Self::Trojan => write!(f, "Trojan"),
            Self::UnauthorizedApiCall => write!(f, "Unauthorized API call"),
            Self::Other => write!(f, "Generic GuardDuty"),
        }
    }
}

impl GuardDutyFinding {
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or_default()
    }

    pub fn severity(&self) -> f64 {
        self.severity.unwrap_or_default()
    }

    pub fn finding_type(&self) -> &str {
        self.finding_type.as_deref().unwrap_or_default()
    }

    /// Finding types look like `Recon:EC2/PortProbeUnprotectedPort`.
    pub fn threat_kind(&self) -> ThreatKind {
        let finding_type = self.finding_type();
        if finding_type.contains("Recon") {
            ThreatKind::Reconnaissance
        } else if finding_type.contains("Backdoor") {
            ThreatKind::Backdoor
        } else if finding_type.contains("Trojan") {
            ThreatKind::Trojan
        } else if finding_type.contains("UnauthorizedAPICall") {
            ThreatKind::UnauthorizedApiCall
        } else {
            ThreatKind::Other
        }
    }

    fn action_field(&self, pointer: &str) -> Option<&str> {
        self.service
            .pointer(&format!("/action{}", pointer))
            .or_else(|| self.action.pointer(pointer))
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn remote_ip(&self) -> Option<&str> {
        self.action_field("/networkConnectionAction/remoteIpDetails/ipAddressV4")
            .or_else(|| self.action_field("/portProbeAction/portProbeDetails/0/remoteIpDetails/ipAddressV4"))
    }

    pub fn instance_id(&self) -> Option<&str> {
        self.resource
            .pointer("/instanceDetails/instanceId")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }

    /// `(serviceName, api)` of the offending call.
    pub fn api_call(&self) -> Option<(&str, &str)> {
        let service = self.action_field("/awsApiCallAction/serviceName")?;
        let api = self.action_field("/awsApiCallAction/api")?;
        Some((service, api))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubProduct {
    GuardDuty,
    Config,
    Other,
}

/// One entry of `detail.findings` in a Security Hub event (ASFF).
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "PascalCase")]
pub struct HubFinding {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub severity: Value,
    #[serde(default)]
    pub product_fields: Value,
    #[serde(default)]
    pub compliance: Value,
}

impl HubFinding {
    fn product_field(&self, key: &str) -> Option<&str> {
        self.product_fields.get(key).and_then(Value::as_str)
    }

    pub fn product(&self) -> HubProduct {
        let name = self
            .product_field("aws/securityhub/ProductName")
            .unwrap_or_default();
        if name.contains("GuardDuty") {
            HubProduct::GuardDuty
        } else if name.contains("Config") {
            HubProduct::Config
        } else {
            HubProduct::Other
        }
    }

    pub fn severity_label(&self) -> &str {
        self.severity
            .get("Label")
            .and_then(Value::as_str)
            .unwrap_or("UNKNOWN")
    }

    pub fn config_rule_name(&self) -> &str {
        self.product_field("aws/config/ConfigRuleName")
            .unwrap_or("unknown rule")
    }

    pub fn compliance_failed(&self) -> bool {
        self.compliance.get("Status").and_then(Value::as_str) == Some("FAILED")
    }
}

/// Parses `detail.findings`, skipping entries that are not objects.
pub fn hub_findings(detail: &Value) -> Vec<HubFinding> {
    detail
        .get("findings")
        .and_then(Value::as_array)
        .map(|findings| {
            findings
                .iter()
                .filter_map(|finding| serde_json::from_value(finding.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

//! Settings Document Types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Settings consumed by the API server.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiSettings {
    #[serde(default)]
    pub routing_rules: Vec<RoutingRule>,
}

/// A single match-and-route entry. Rules are evaluated in file order.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingRule {
    /// Label used in logs and route lookups. Optional in the file.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub equals: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub has_prefix: Vec<String>,
    #[serde(default)]
    pub match_all: bool,
    pub channel: String,
}

impl RoutingRule {
    /// A catch-all rule sending every route key to `channel`.
    pub fn match_all(name: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            match_all: true,
            channel: channel.into(),
            ..Default::default()
        }
    }
}

/// Settings consumed by the alert manager.
///
/// Only the admin lists and presentation fields are interpreted by the host;
/// every other key is carried along untouched.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerSettings {
    #[serde(default = "default_app_friendly_name")]
    pub app_friendly_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docs_url: Option<String>,
    #[serde(default)]
    pub admin_users: Vec<String>,
    #[serde(default)]
    pub admin_groups: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

fn default_app_friendly_name() -> String {
    "Alert Host".to_string()
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            app_friendly_name: default_app_friendly_name(),
            docs_url: None,
            admin_users: Vec::new(),
            admin_groups: Vec::new(),
            extra: BTreeMap::new(),
        }
    }
}

impl ManagerSettings {
    pub fn is_admin(&self, user: &str) -> bool {
        self.admin_users.iter().any(|admin| admin == user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_settings_yaml_shape() {
        let yaml = r#"
routingRules:
  - name: prefix
    description: alerts from the a- services
    hasPrefix: ["a-"]
    channel: CXXXXXXXXXXX
  - name: exact
    equals: ["billing", "payments"]
    channel: CYYYYYYYYYYY
  - name: fallback
    matchAll: true
    channel: CZZZZZZZZZZZ
"#;
        let settings: ApiSettings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.routing_rules.len(), 3);
        assert_eq!(settings.routing_rules[0].has_prefix, vec!["a-"]);
        assert_eq!(
            settings.routing_rules[0].description.as_deref(),
            Some("alerts from the a- services")
        );
        assert_eq!(settings.routing_rules[1].equals, vec!["billing", "payments"]);
        assert!(!settings.routing_rules[1].match_all);
        assert!(settings.routing_rules[2].match_all);
        assert_eq!(settings.routing_rules[2].channel, "CZZZZZZZZZZZ");
    }

    #[test]
    fn test_manager_settings_keeps_unknown_keys() {
        let yaml = r#"
appFriendlyName: Ops Alerts
adminUsers: [U01, U02]
issueReactions:
  terminate: firecracker
"#;
        let settings: ManagerSettings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.app_friendly_name, "Ops Alerts");
        assert!(settings.is_admin("U02"));
        assert!(!settings.is_admin("U03"));
        assert!(settings.extra.contains_key("issueReactions"));
    }

    #[test]
    fn test_manager_settings_defaults() {
        let settings: ManagerSettings = serde_yaml::from_str("{}").unwrap();
        assert_eq!(settings, ManagerSettings::default());
    }
}

//! Routing Rules Engine
//!
//! Evaluates route keys against the ordered rule list from the API settings.
//! Rules are checked in file order and the first match decides the channel.

use crate::error::ServiceError;
use crate::settings::{ApiSettings, RoutingRule};
use tracing::debug;

/// Compiled matcher for a single rule. Patterns are lowercased once at build time.
#[derive(Debug, Clone)]
struct CompiledRule {
    equals: Vec<String>,
    has_prefix: Vec<String>,
    match_all: bool,
}

impl CompiledRule {
    fn compile(rule: &RoutingRule) -> Self {
        Self {
            equals: rule.equals.iter().map(|e| e.to_lowercase()).collect(),
            has_prefix: rule.has_prefix.iter().map(|p| p.to_lowercase()).collect(),
            match_all: rule.match_all,
        }
    }

    fn matches(&self, route_key: &str) -> bool {
        self.match_all
            || self.equals.iter().any(|e| e == route_key)
            || self.has_prefix.iter().any(|p| route_key.starts_with(p.as_str()))
    }
}

/// Immutable, validated rule set. Replaced wholesale on settings change.
#[derive(Debug, Clone, Default)]
pub struct RoutingRules {
    rules: Vec<RoutingRule>,
    compiled: Vec<CompiledRule>,
}

impl RoutingRules {
    /// Validate and compile an ordered rule list. Unnamed rules are labelled
    /// by position (`rule #1`, `rule #2`, ...).
    pub fn new(mut rules: Vec<RoutingRule>) -> Result<Self, ServiceError> {
        for (index, rule) in rules.iter_mut().enumerate() {
            validate_rule(rule)
                .map_err(|reason| ServiceError::InvalidSettings(format!("routing rule #{}: {}", index + 1, reason)))?;
            if rule.name.trim().is_empty() {
                rule.name = positional_label(index);
            }
        }

        let compiled = rules.iter().map(CompiledRule::compile).collect();
        Ok(Self { rules, compiled })
    }

    pub fn from_settings(settings: &ApiSettings) -> Result<Self, ServiceError> {
        Self::new(settings.routing_rules.clone())
    }

    /// Find the first rule matching `route_key`, compared case-insensitively.
    pub fn resolve(&self, route_key: &str) -> Option<&RoutingRule> {
        let key = route_key.trim().to_lowercase();
        if key.is_empty() {
            return None;
        }

        let found = self
            .compiled
            .iter()
            .position(|rule| rule.matches(&key))
            .map(|index| &self.rules[index]);

        match found {
            Some(rule) => debug!(route_key = %route_key, rule = %rule.name, channel = %rule.channel, "Route key matched"),
            None => debug!(route_key = %route_key, "No routing rule matched"),
        }

        found
    }

    /// Channel for `route_key`, if any rule matches.
    pub fn channel_for(&self, route_key: &str) -> Option<&str> {
        self.resolve(route_key).map(|rule| rule.channel.as_str())
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn positional_label(index: usize) -> String {
    format!("rule #{}", index + 1)
}

/// Check that a rule is usable. The name is only a label and may be empty.
pub fn validate_rule(rule: &RoutingRule) -> Result<(), String> {
    if rule.channel.trim().is_empty() {
        return Err("no channel".to_string());
    }

    if !rule.match_all && rule.equals.is_empty() && rule.has_prefix.is_empty() {
        return Err("needs at least one of equals, hasPrefix or matchAll".to_string());
    }

    if rule.equals.iter().chain(rule.has_prefix.iter()).any(|p| p.trim().is_empty()) {
        return Err("contains an empty pattern".to_string());
    }

    Ok(())
}

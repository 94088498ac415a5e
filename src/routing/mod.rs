//! Routing Module
//!
//! Maps alert route keys to destination channels.

pub mod rules;

pub use rules::{validate_rule, RoutingRules};

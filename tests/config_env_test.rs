//! Environment Configuration Integration Tests

use alert_host::bootstrap;
use alert_host::error::{BackendError, ConfigError};
use alert_host::{ConfigManager, Error, StartupConfig};
use std::collections::HashMap;
use std::fs;
use tempfile::TempDir;

fn load(vars: &[(&str, String)]) -> Result<StartupConfig, ConfigError> {
    let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
    ConfigManager::load_from_lookup(|key| vars.get(key).cloned())
}

fn settings_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("manager.yaml"), "adminUsers: [U1]\nreminderInterval: 1h\n").unwrap();
    fs::write(
        dir.path().join("api.yaml"),
        "routingRules:\n  - name: all\n    matchAll: true\n    channel: C1\n",
    )
    .unwrap();
    dir
}

fn path_var(dir: &TempDir, file: &str) -> String {
    dir.path().join(file).to_string_lossy().into_owned()
}

#[test]
fn test_environment_drives_validation() {
    let dir = settings_dir();
    let config = load(&[
        ("QUEUE_MODE", "in-memory".to_string()),
        ("DATABASE_MODE", "in-memory".to_string()),
        ("MANAGER_SETTINGS_FILENAME", path_var(&dir, "manager.yaml")),
        ("API_SETTINGS_FILENAME", path_var(&dir, "api.yaml")),
    ])
    .unwrap();

    let settings = bootstrap::check(&config).unwrap();
    assert!(settings.manager.is_admin("U1"));
    assert!(settings.manager.extra.contains_key("reminderInterval"));
    assert_eq!(settings.api.routing_rules[0].channel, "C1");
}

#[test]
fn test_unset_mode_is_rejected() {
    let dir = settings_dir();
    let config = load(&[
        ("QUEUE_MODE", String::new()),
        ("MANAGER_SETTINGS_FILENAME", path_var(&dir, "manager.yaml")),
        ("API_SETTINGS_FILENAME", path_var(&dir, "api.yaml")),
    ])
    .unwrap();

    let err = bootstrap::check(&config).err().unwrap();
    assert!(matches!(
        err,
        Error::Backend(BackendError::UnknownBackendKind { kind: "queue", .. })
    ));
}

#[test]
fn test_malformed_value_is_configuration_error() {
    let err = load(&[("ENABLE_METRICS", "sometimes".to_string())]).unwrap_err();
    match err {
        ConfigError::InvalidConfiguration { key, value, .. } => {
            assert_eq!(key, "ENABLE_METRICS");
            assert_eq!(value, "sometimes");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_metrics_port_must_differ_from_rest_port() {
    let err = load(&[("REST_PORT", "9090".to_string())]).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidConfiguration { ref key, .. } if key == "METRICS_PORT"));

    let config = load(&[("REST_PORT", "9090".to_string()), ("ENABLE_METRICS", "false".to_string())]).unwrap();
    assert!(!config.enable_metrics);
}

//! Settings file reader
//!
//! Reads a whole settings file, fingerprints the raw bytes and parses them.

use crate::error::SettingsError;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

/// SHA-256 digest of a settings file's raw bytes. Used only for change detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(content: &[u8]) -> Self {
        Self(Sha256::digest(content).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Read, fingerprint and parse a settings document.
pub fn read_settings<T>(path: &Path) -> Result<(T, Fingerprint), SettingsError>
where
    T: DeserializeOwned,
{
    let content = std::fs::read(path).map_err(|source| SettingsError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let fingerprint = Fingerprint::of(&content);
    let document = parse_settings(path, &content)?;

    Ok((document, fingerprint))
}

fn parse_settings<T: DeserializeOwned>(path: &Path, content: &[u8]) -> Result<T, SettingsError> {
    serde_yaml::from_slice(content).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{ApiSettings, ManagerSettings};
    use std::fs;
    use tempfile::TempDir;

    const API_SETTINGS: &str = r#"
routingRules:
  - name: fallback
    matchAll: true
    channel: CZZZZZZZZZZZ
"#;

    #[test]
    fn test_fingerprint_is_stable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("api-settings.yaml");
        fs::write(&path, API_SETTINGS).unwrap();

        let (first, fp1) = read_settings::<ApiSettings>(&path).unwrap();
        let (second, fp2) = read_settings::<ApiSettings>(&path).unwrap();

        assert_eq!(fp1, fp2);
        assert_eq!(first, second);
        assert_eq!(first.routing_rules[0].channel, "CZZZZZZZZZZZ");
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("api-settings.yaml");
        fs::write(&path, API_SETTINGS).unwrap();
        let (_, before) = read_settings::<ApiSettings>(&path).unwrap();

        // Whitespace-only edits are still edits.
        fs::write(&path, format!("{API_SETTINGS}\n")).unwrap();
        let (_, after) = read_settings::<ApiSettings>(&path).unwrap();

        assert_ne!(before, after);
    }

    #[test]
    fn test_fingerprint_display_is_hex_sha256() {
        // sha256("") is a well-known constant.
        assert_eq!(
            Fingerprint::of(b"").to_string(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let dir = TempDir::new().unwrap();
        let result = read_settings::<ManagerSettings>(&dir.path().join("missing.yaml"));
        assert!(matches!(result, Err(SettingsError::Read { .. })));
    }

    #[test]
    fn test_malformed_yaml_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("api-settings.yaml");
        fs::write(&path, "routingRules: [[[").unwrap();

        let result = read_settings::<ApiSettings>(&path);
        assert!(matches!(result, Err(SettingsError::Parse { .. })));
    }

    #[test]
    fn test_schema_mismatch_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("api-settings.yaml");
        // A rule without a channel does not conform to the schema.
        fs::write(&path, "routingRules:\n  - name: broken\n    matchAll: true\n").unwrap();

        let result = read_settings::<ApiSettings>(&path);
        assert!(matches!(result, Err(SettingsError::Parse { .. })));
    }
}

//! License table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tokio::fs;
use tracing::info;

use crate::error::{Error, Result};

/// A license: key, validity window and granted capabilities.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct License {
    pub key: String,
    #[serde(default)]
    pub not_before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub capabilities: HashSet<String>,
}

impl License {
    pub fn new(key: impl Into<String>, capabilities: &[&str]) -> Self {
        Self {
            key: key.into(),
            not_before: None,
            expires_at: None,
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn with_window(mut self, not_before: Option<DateTime<Utc>>, expires_at: Option<DateTime<Utc>>) -> Self {
        self.not_before = not_before;
        self.expires_at = expires_at;
        self
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.not_before.is_none_or(|start| now >= start)
            && self.expires_at.is_none_or(|end| now < end)
    }

    pub fn grants(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }
}

/// Read-only license lookup.
#[derive(Debug, Clone, Default)]
pub struct LicenseStore {
    licenses: HashMap<String, License>,
}

impl LicenseStore {
    pub fn new(licenses: impl IntoIterator<Item = License>) -> Self {
        Self {
            licenses: licenses.into_iter().map(|l| (l.key.clone(), l)).collect(),
        }
    }

    /// Load a JSON array of licenses.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let licenses: Vec<License> = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("invalid license file {}: {}", path.display(), e)))?;
        info!("Loaded {} license(s) from {}", licenses.len(), path.display());
        Ok(Self::new(licenses))
    }

    /// Check that `key` exists, is inside its window and grants `capability`.
    ///
    /// All failures share one message so callers cannot probe for valid keys.
    pub fn authorize(&self, key: &str, capability: &str, now: DateTime<Utc>) -> Result<&License> {
        self.licenses
            .get(key)
            .filter(|l| l.is_valid_at(now) && l.grants(capability))
            .ok_or_else(|| {
                Error::Unauthorized(format!(
                    "license is unknown, outside its validity window, or lacks '{}'",
                    capability
                ))
            })
    }

    pub fn len(&self) -> usize {
        self.licenses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.licenses.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_authorize() {
        let now = Utc::now();
        let store = LicenseStore::new([
            License::new("good", &["secret:read"]),
            License::new("no-cap", &["other"]),
            License::new("expired", &["secret:read"]).with_window(None, Some(now - Duration::days(1))),
            License::new("future", &["secret:read"]).with_window(Some(now + Duration::days(1)), None),
        ]);

        assert!(store.authorize("good", "secret:read", now).is_ok());
        for key in ["no-cap", "expired", "future", "missing"] {
            assert!(
                matches!(store.authorize(key, "secret:read", now), Err(Error::Unauthorized(_))),
                "{} should be rejected",
                key
            );
        }
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("licenses.json");
        std::fs::write(
            &path,
            r#"[
                {"key": "LIC-1", "capabilities": ["secret:read"]},
                {"key": "LIC-2", "expiresAt": "2001-01-01T00:00:00Z", "capabilities": []}
            ]"#,
        )
        .unwrap();

        let store = LicenseStore::load(&path).await.unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.authorize("LIC-1", "secret:read", Utc::now()).is_ok());
        assert!(store.authorize("LIC-2", "secret:read", Utc::now()).is_err());
    }

    #[tokio::test]
    async fn test_load_invalid_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("licenses.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(LicenseStore::load(&path).await, Err(Error::Config(_))));
    }
}

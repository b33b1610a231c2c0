//! Secret references
//!
//! A secret is looked up once while the stack is assembled so that a missing
//! credential fails synthesis early. The plaintext is never carried into the
//! template: a resolved secret renders as a Secrets Manager dynamic reference.

use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Result, SynthError};

/// Source of secret documents keyed by secret name
pub trait SecretStore: Send + Sync {
    /// Looks up a secret's JSON document
    ///
    /// Returns `Ok(None)` when the secret does not exist and `Err` only when
    /// the store itself cannot be read.
    fn lookup(&self, name: &str) -> Result<Option<JsonValue>>;
}

/// Reference to one JSON field of a named secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretReference {
    pub name: String,
    pub json_field: String,
}

impl SecretReference {
    pub fn new(name: impl Into<String>, json_field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            json_field: json_field.into(),
        }
    }

    /// Resolves the reference against a store
    ///
    /// # Errors
    /// - `SecretNotFound` if the store has no secret with this name
    /// - `SecretFieldMissing` if the field is absent or not a string
    pub fn resolve(&self, store: &dyn SecretStore) -> Result<SecretValue> {
        let document = store
            .lookup(&self.name)?
            .ok_or_else(|| SynthError::SecretNotFound {
                name: self.name.clone(),
            })?;

        match document.get(&self.json_field) {
            Some(JsonValue::String(_)) => {
                debug!("Resolved secret {}:{}", self.name, self.json_field);
                Ok(SecretValue {
                    name: self.name.clone(),
                    json_field: self.json_field.clone(),
                })
            }
            _ => Err(SynthError::SecretFieldMissing {
                name: self.name.clone(),
                field: self.json_field.clone(),
            }),
        }
    }
}

/// A secret known to exist, rendered only as a dynamic reference
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue {
    name: String,
    json_field: String,
}

impl SecretValue {
    /// The token the deploy engine substitutes at deploy time
    pub fn dynamic_reference(&self) -> String {
        format!(
            "{{{{resolve:secretsmanager:{}:SecretString:{}::}}}}",
            self.name, self.json_field
        )
    }

    pub fn secret_name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretValue({}:{}, <redacted>)", self.name, self.json_field)
    }
}

/// Reads secrets from environment variables named after the secret
///
/// The variable's value must be a JSON object, e.g.
/// `GITHUB_TOKEN='{"GITHUB_TOKEN":"ghp_..."}'`.
#[derive(Debug, Default, Clone)]
pub struct EnvSecretStore;

impl SecretStore for EnvSecretStore {
    fn lookup(&self, name: &str) -> Result<Option<JsonValue>> {
        match std::env::var(name) {
            Ok(raw) => serde_json::from_str(&raw).map(Some).map_err(|e| {
                SynthError::SecretStore(format!("Secret '{}' is not valid JSON: {}", name, e))
            }),
            Err(_) => Ok(None),
        }
    }
}

/// Reads secrets from a JSON file mapping secret names to documents
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    path: PathBuf,
}

impl FileSecretStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl SecretStore for FileSecretStore {
    fn lookup(&self, name: &str) -> Result<Option<JsonValue>> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            SynthError::SecretStore(format!("Failed to read {}: {}", self.path.display(), e))
        })?;
        let secrets: BTreeMap<String, JsonValue> = serde_json::from_str(&content).map_err(|e| {
            SynthError::SecretStore(format!("Failed to parse {}: {}", self.path.display(), e))
        })?;
        Ok(secrets.get(name).cloned())
    }
}

/// In-memory secret store
#[derive(Debug, Default, Clone)]
pub struct StaticSecretStore {
    secrets: BTreeMap<String, JsonValue>,
}

impl StaticSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, name: impl Into<String>, document: JsonValue) -> Self {
        self.secrets.insert(name.into(), document);
        self
    }
}

impl SecretStore for StaticSecretStore {
    fn lookup(&self, name: &str) -> Result<Option<JsonValue>> {
        Ok(self.secrets.get(name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn token_ref() -> SecretReference {
        SecretReference::new("GITHUB_TOKEN", "GITHUB_TOKEN")
    }

    #[test]
    fn test_resolve_renders_dynamic_reference() {
        let store = StaticSecretStore::new()
            .with_secret("GITHUB_TOKEN", json!({"GITHUB_TOKEN": "ghp_secret"}));

        let value = token_ref().resolve(&store).unwrap();
        assert_eq!(
            value.dynamic_reference(),
            "{{resolve:secretsmanager:GITHUB_TOKEN:SecretString:GITHUB_TOKEN::}}"
        );
        assert!(!format!("{:?}", value).contains("ghp_secret"));
    }

    #[test]
    fn test_missing_secret() {
        let err = token_ref().resolve(&StaticSecretStore::new()).unwrap_err();
        assert!(matches!(err, SynthError::SecretNotFound { .. }));
        assert!(err.is_secret_error());
    }

    #[test]
    fn test_missing_field() {
        let store = StaticSecretStore::new().with_secret("GITHUB_TOKEN", json!({"token": "x"}));
        let err = token_ref().resolve(&store).unwrap_err();
        assert!(matches!(err, SynthError::SecretFieldMissing { .. }));
    }

    #[test]
    fn test_non_string_field() {
        let store = StaticSecretStore::new().with_secret("GITHUB_TOKEN", json!({"GITHUB_TOKEN": 42}));
        assert!(token_ref().resolve(&store).is_err());
    }

    #[test]
    fn test_file_store() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"GITHUB_TOKEN": {{"GITHUB_TOKEN": "abc"}}}}"#).unwrap();

        let store = FileSecretStore::new(file.path());
        assert!(token_ref().resolve(&store).is_ok());
        assert!(store.lookup("OTHER").unwrap().is_none());
    }

    #[test]
    fn test_file_store_unreadable() {
        let store = FileSecretStore::new("/nonexistent/secrets.json");
        let err = token_ref().resolve(&store).unwrap_err();
        assert!(matches!(err, SynthError::SecretStore(_)));
    }
}

//! Long-lived client configuration (`secrets.toml`).
//!
//! Holds the OAuth client registration and, once the user has authorized the
//! client, the refresh token. The refresh token is written back with a
//! structured upsert so repeated authorizations never pile up duplicate keys.

use crate::auth::error::{AuthError, StoreError};
use crate::config::{ConfigError, EnvLookup};
use crate::persist::write_atomic;
use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use toml_edit::DocumentMut;

const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// OAuth client registration plus the optional refresh token.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NestCredentials {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub redirect_uri: String,
    /// Device Access project id
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl std::fmt::Debug for NestCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NestCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .field("project_id", &self.project_id)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl NestCredentials {
    /// Fields needed for any token exchange.
    pub fn require_client(&self) -> Result<(), AuthError> {
        if self.client_id.is_empty() {
            return Err(AuthError::ConfigMissing("client_id"));
        }
        if self.client_secret.is_empty() {
            return Err(AuthError::ConfigMissing("client_secret"));
        }
        Ok(())
    }

    /// Fields needed for the interactive authorization-code flow.
    pub fn require_authorization(&self) -> Result<(), AuthError> {
        self.require_client()?;
        if self.redirect_uri.is_empty() {
            return Err(AuthError::ConfigMissing("redirect_uri"));
        }
        if self.project_id.is_empty() {
            return Err(AuthError::ConfigMissing("project_id"));
        }
        Ok(())
    }

    fn apply_env(&mut self, env: EnvLookup<'_>) {
        let get = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        if let Some(v) = get("NEST_CLIENT_ID") {
            self.client_id = v;
        }
        if let Some(v) = get("NEST_CLIENT_SECRET") {
            self.client_secret = v;
        }
        if let Some(v) = get("NEST_REDIRECT_URI") {
            self.redirect_uri = v;
        }
        if let Some(v) = get("NEST_PROJECT_ID") {
            self.project_id = v;
        }
        if let Some(v) = get("NEST_REFRESH_TOKEN") {
            self.refresh_token = Some(v);
        }
    }
}

/// The `secrets.toml` file.
#[derive(Debug, Clone)]
pub struct SecretsFile {
    path: PathBuf,
}

impl SecretsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the client configuration with environment overrides applied.
    ///
    /// A missing file yields empty fields (the environment may supply them).
    /// An unparseable file is an error: the user has to fix it.
    pub fn load(&self, env: EnvLookup<'_>) -> Result<NestCredentials, ConfigError> {
        let mut creds = match fs::read_to_string(&self.path) {
            Ok(content) => toml::from_str::<NestCredentials>(&content).map_err(|source| {
                ConfigError::Parse {
                    path: self.path.clone(),
                    source,
                }
            })?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!("No secrets file at {:?}", self.path);
                NestCredentials::default()
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        creds.refresh_token = creds.refresh_token.filter(|t| !t.is_empty());
        creds.apply_env(env);
        Ok(creds)
    }

    /// Replace or insert the `refresh_token` key.
    ///
    /// Edits the document in place, so other keys keep their order and the
    /// user's comments survive.
    pub fn upsert_refresh_token(&self, refresh_token: &str) -> Result<(), StoreError> {
        let mut doc = self.read_document()?;
        doc[REFRESH_TOKEN_KEY] = toml_edit::value(refresh_token);
        self.write_document(&doc)?;
        tracing::info!("Stored refresh token in {:?}", self.path);
        Ok(())
    }

    /// Drop the `refresh_token` key if present.
    pub fn remove_refresh_token(&self) -> Result<bool, StoreError> {
        let mut doc = self.read_document()?;
        if doc.remove(REFRESH_TOKEN_KEY).is_none() {
            return Ok(false);
        }
        self.write_document(&doc)?;
        tracing::info!("Removed refresh token from {:?}", self.path);
        Ok(true)
    }

    fn read_document(&self) -> Result<DocumentMut, StoreError> {
        match fs::read_to_string(&self.path) {
            // Refuse to rewrite a file we cannot parse; that would drop the
            // client registration.
            Ok(content) => content
                .parse::<DocumentMut>()
                .map_err(|e| StoreError::Corrupt {
                    path: self.path.clone(),
                    reason: e.to_string(),
                }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(DocumentMut::new()),
            Err(e) => Err(StoreError::io(&self.path, e)),
        }
    }

    fn write_document(&self, doc: &DocumentMut) -> Result<(), StoreError> {
        write_atomic(&self.path, doc.to_string().as_bytes())
            .map_err(|e| StoreError::io(&self.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    const SECRETS: &str = r#"
client_id = "cid"
client_secret = "secret"
redirect_uri = "https://www.google.com"
project_id = "proj"
"#;

    #[test]
    fn test_load_missing_file_yields_empty_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let creds = SecretsFile::new(dir.path().join("secrets.toml"))
            .load(&no_env)
            .unwrap();
        assert_eq!(creds, NestCredentials::default());
        assert!(matches!(
            creds.require_client(),
            Err(AuthError::ConfigMissing("client_id"))
        ));
    }

    #[test]
    fn test_load_applies_environment_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.toml");
        fs::write(&path, SECRETS).unwrap();

        let env = |k: &str| match k {
            "NEST_PROJECT_ID" => Some("env-proj".to_string()),
            "NEST_REFRESH_TOKEN" => Some("env-rt".to_string()),
            _ => None,
        };
        let creds = SecretsFile::new(&path).load(&env).unwrap();

        assert_eq!(creds.client_id, "cid");
        assert_eq!(creds.project_id, "env-proj");
        assert_eq!(creds.refresh_token.as_deref(), Some("env-rt"));
        assert!(creds.require_authorization().is_ok());
    }

    #[test]
    fn test_load_unparseable_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.toml");
        fs::write(&path, "client_id = ").unwrap();

        assert!(matches!(
            SecretsFile::new(&path).load(&no_env),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_upsert_refresh_token_never_duplicates_the_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.toml");
        fs::write(&path, SECRETS).unwrap();
        let secrets = SecretsFile::new(&path);

        secrets.upsert_refresh_token("rt1").unwrap();
        secrets.upsert_refresh_token("rt2").unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.matches("refresh_token").count(), 1);
        let creds = secrets.load(&no_env).unwrap();
        assert_eq!(creds.refresh_token.as_deref(), Some("rt2"));
        assert_eq!(creds.client_secret, "secret");
        assert_eq!(creds.project_id, "proj");
    }

    #[test]
    fn test_upsert_keeps_comments_and_key_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.toml");
        fs::write(
            &path,
            "# my client\nclient_id = \"cid\"\nproject_id = \"proj\" # device access\n\
             # refresh_token is written here after the first authorization\n",
        )
        .unwrap();
        let secrets = SecretsFile::new(&path);

        secrets.upsert_refresh_token("rt1").unwrap();
        secrets.upsert_refresh_token("rt2").unwrap();

        let after = fs::read_to_string(&path).unwrap();
        assert!(after.starts_with("# my client\nclient_id = \"cid\"\n"));
        assert!(after.contains("project_id = \"proj\" # device access"));
        assert!(after.contains("# refresh_token is written here"));
        assert_eq!(after.matches("refresh_token =").count(), 1);
        assert_eq!(
            secrets.load(&no_env).unwrap().refresh_token.as_deref(),
            Some("rt2")
        );

        assert!(secrets.remove_refresh_token().unwrap());
        let removed = fs::read_to_string(&path).unwrap();
        assert!(removed.contains("# my client"));
        assert!(!removed.contains("rt2"));
    }

    #[test]
    fn test_upsert_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let secrets = SecretsFile::new(dir.path().join("sub").join("secrets.toml"));

        secrets.upsert_refresh_token("rt").unwrap();
        assert_eq!(
            secrets.load(&no_env).unwrap().refresh_token.as_deref(),
            Some("rt")
        );
    }

    #[test]
    fn test_upsert_refuses_to_overwrite_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.toml");
        fs::write(&path, "client_id = \"cid\"\nbroken").unwrap();

        let err = SecretsFile::new(&path).upsert_refresh_token("rt").unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), "client_id = \"cid\"\nbroken");
    }

    #[test]
    fn test_remove_refresh_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.toml");
        fs::write(&path, SECRETS).unwrap();
        let secrets = SecretsFile::new(&path);

        assert!(!secrets.remove_refresh_token().unwrap());
        secrets.upsert_refresh_token("rt").unwrap();
        assert!(secrets.remove_refresh_token().unwrap());
        assert_eq!(secrets.load(&no_env).unwrap().refresh_token, None);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let creds = NestCredentials {
            client_secret: "very-secret".to_string(),
            refresh_token: Some("rt-secret".to_string()),
            ..Default::default()
        };
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("very-secret"));
        assert!(!debug.contains("rt-secret"));
    }
}

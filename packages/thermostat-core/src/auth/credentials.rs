//! Cached access token storage.
//!
//! The latest issued token set lives in a single JSON file
//! (`access_token.json`). It is the only state shared between invocations:
//! every successful exchange replaces it wholesale.

use crate::auth::error::StoreError;
use crate::persist::write_atomic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Safety margin subtracted from a token's declared lifetime.
pub const EXPIRY_SKEW_SECS: i64 = 10;

/// A cached access token together with the refresh token it was issued with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenRecord {
    pub access_token: String,
    pub refresh_token: String,
    /// When the token was obtained, always UTC.
    #[serde(rename = "access_token_obtained_at")]
    pub obtained_at: DateTime<Utc>,
    /// Lifetime declared by the provider, in seconds.
    pub expires_in: u64,
}

impl AccessTokenRecord {
    /// Whether the token may still be used at `now`.
    ///
    /// Valid while `now - obtained_at < expires_in - EXPIRY_SKEW_SECS`. A record
    /// stamped in the future (clock moved backwards) is treated as expired.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        let elapsed_ms = i128::from(now.signed_duration_since(self.obtained_at).num_milliseconds());
        let lifetime_ms = (i128::from(self.expires_in) - i128::from(EXPIRY_SKEW_SECS)) * 1000;
        elapsed_ms >= 0 && elapsed_ms < lifetime_ms
    }

    /// The instant at which the provider considers the token expired.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let secs = i64::try_from(self.expires_in).ok()?;
        self.obtained_at
            .checked_add_signed(chrono::TimeDelta::try_seconds(secs)?)
    }

    fn check(&self) -> Result<(), &'static str> {
        if self.access_token.is_empty() {
            return Err("empty access_token");
        }
        if self.refresh_token.is_empty() {
            return Err("empty refresh_token");
        }
        Ok(())
    }
}

/// File-backed store holding exactly one [`AccessTokenRecord`].
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the cached record.
    ///
    /// Never fails: a missing file means nothing is cached, and an unreadable
    /// or corrupt one is reported and treated the same way so the caller falls
    /// back to re-authenticating.
    pub fn load(&self) -> Option<AccessTokenRecord> {
        match self.read() {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("Discarding cached access token, re-authentication required: {}", e);
                None
            }
        }
    }

    fn read(&self) -> Result<Option<AccessTokenRecord>, StoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!("No cached access token at {:?}", self.path);
                return Ok(None);
            }
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };

        let record: AccessTokenRecord =
            serde_json::from_str(&content).map_err(|e| StoreError::Corrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        record.check().map_err(|reason| StoreError::Corrupt {
            path: self.path.clone(),
            reason: reason.to_string(),
        })?;

        tracing::debug!("Cached access token loaded from {:?}", self.path);
        Ok(Some(record))
    }

    /// Atomically replace the cached record.
    ///
    /// Callers guarantee `record.refresh_token` is non-empty.
    pub fn save(&self, record: &AccessTokenRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(record).map_err(|e| StoreError::Serialize {
            what: "access token record",
            message: e.to_string(),
        })?;
        write_atomic(&self.path, json.as_bytes()).map_err(|e| StoreError::io(&self.path, e))?;
        tracing::debug!("Access token saved to {:?}", self.path);
        Ok(())
    }

    /// Remove the cached record. A missing file is not an error.
    pub fn delete(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!("Deleted cached access token {:?}", self.path);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(&self.path, e)),
        }
    }
}

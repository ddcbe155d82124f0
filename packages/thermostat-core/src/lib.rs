//! Nest Thermostat Core Library
//!
//! This crate provides the core functionality for the `nest-thermostat` CLI:
//! - OAuth token lifecycle (cached access token, refresh, interactive consent)
//! - Smart Device Management API client (devices, traits, commands)
//! - Local readings history in SQLite
//!
//! # Features
//!
//! - `browser` (default): Open the Google consent page automatically during
//!   interactive authorization
//!
//! # Example
//!
//! ```no_run
//! use thermostat_core::auth::{
//!     Authenticator, AuthorizationPrompt, CredentialStore, SecretsFile, TokenClient,
//! };
//! use thermostat_core::config::{load_config, process_env};
//! use thermostat_core::nest::{select_thermostat, NestClient, ThermostatStats};
//!
//! struct Paste;
//!
//! impl AuthorizationPrompt for Paste {
//!     fn authorization_code(&self, consent_url: &str) -> std::io::Result<String> {
//!         println!("Visit {consent_url} and paste the code:");
//!         let mut line = String::new();
//!         std::io::stdin().read_line(&mut line)?;
//!         Ok(line)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config(&process_env)?;
//!     let credentials = SecretsFile::new(config.paths.secrets_file()).load(&process_env)?;
//!
//!     let mut auth = Authenticator::new(
//!         credentials.clone(),
//!         CredentialStore::new(config.paths.token_file()),
//!         SecretsFile::new(config.paths.secrets_file()),
//!         TokenClient::new(&config.token_url, config.timeout)?,
//!         Paste,
//!     );
//!     let token = auth.ensure_valid_token().await?;
//!
//!     let nest = NestClient::new(&config.api_url, &credentials.project_id, config.timeout)?;
//!     let devices = nest.list_devices(&token).await?;
//!     let stats = ThermostatStats::from_device(select_thermostat(&devices, None)?);
//!     println!("{:?}", stats.ambient_temperature_celsius);
//!
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod nest;
pub mod readings;

mod persist;

// Re-export commonly used types
pub use auth::{AuthError, Authenticator, AuthorizationPrompt, TokenState};
pub use config::{AppConfig, ConfigSource, Paths};
pub use nest::{NestClient, NestError, ThermostatStats};
pub use readings::{ReadingsDb, ReadingsError, StoredReading};

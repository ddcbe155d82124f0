//! Wiring of configuration, token lifecycle and API client for one command.

use crate::prompt::StdinPrompt;
use anyhow::{Context, Result};
use thermostat_core::auth::{AuthError, Authenticator, CredentialStore, SecretsFile, TokenClient};
use thermostat_core::config::{load_config, process_env, AppConfig};
use thermostat_core::nest::{select_thermostat, Device, NestClient};
use thermostat_core::readings::ReadingsDb;

pub struct Session {
    pub config: AppConfig,
    pub auth: Authenticator<StdinPrompt>,
    pub nest: NestClient,
}

impl Session {
    pub fn open() -> Result<Self> {
        let config = load_config(&process_env).context("Failed to load configuration")?;

        let secrets = SecretsFile::new(config.paths.secrets_file());
        let credentials = secrets
            .load(&process_env)
            .context("Failed to load client credentials")?;

        let exchange = TokenClient::new(&config.token_url, config.timeout)?;
        let nest = NestClient::new(&config.api_url, &credentials.project_id, config.timeout)?;
        let auth = Authenticator::new(
            credentials,
            CredentialStore::new(config.paths.token_file()),
            secrets,
            exchange,
            StdinPrompt,
        )
        .with_consent_url(&config.consent_url);

        Ok(Self { config, auth, nest })
    }

    /// A valid access token, running refresh or the interactive flow as needed.
    pub async fn token(&mut self) -> Result<String> {
        self.auth
            .ensure_valid_token()
            .await
            .map_err(with_login_hint)
    }

    /// The thermostat picked by `selector`, falling back to `default_device`.
    pub async fn thermostat(&mut self, selector: Option<&str>) -> Result<Device> {
        let token = self.token().await?;
        let devices = self.nest.list_devices(&token).await?;
        let selector = selector.or(self.config.default_device.as_deref());
        Ok(select_thermostat(&devices, selector)?.clone())
    }

    pub async fn readings(&self) -> Result<ReadingsDb> {
        ReadingsDb::connect(&self.config.database_url)
            .await
            .with_context(|| format!("Failed to open readings database ({})", self.config.database_source))
    }
}

/// Point the user at `login --force` when only a new consent can help.
pub fn with_login_hint(err: AuthError) -> anyhow::Error {
    if err.suggests_reauthorization() {
        anyhow::Error::new(err)
            .context("Authentication failed. Run 'nest-thermostat login --force' to authorize again")
    } else {
        anyhow::Error::new(err)
    }
}

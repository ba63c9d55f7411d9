//! Resolves the B2 credential from the secret store.
//!
//! This is the only place that reads credential fields. Everything downstream
//! receives an opaque [`Credential`].

use std::fmt;

use serde::Deserialize;
use tracing::{error, info};

use crate::config::Environment;
use crate::contract::SecretStore;
use crate::error::CredentialError;
use crate::vault::{VaultClient, VaultSettings};

/// How the secret store is located.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryMode {
    /// Use the configured address (`VAULT_ADDR`).
    Fixed,
    /// Look the address up through DNS SRV records.
    AutoDiscover,
}

impl DiscoveryMode {
    pub fn from_no_discover_flag(no_discover: bool) -> Self {
        if no_discover {
            DiscoveryMode::Fixed
        } else {
            DiscoveryMode::AutoDiscover
        }
    }
}

/// B2 application key pair.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Credential {
    #[serde(rename = "id")]
    account_id: String,
    key: String,
}

impl Credential {
    pub fn new(account_id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            key: key.into(),
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("account_id", &"<redacted>")
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Builds a Vault client, discovering its address first when asked to.
pub async fn connect_secret_store(
    mode: DiscoveryMode,
    env: &Environment,
) -> Result<VaultClient, CredentialError> {
    let settings = VaultSettings::from_env(env);
    let client = match mode {
        DiscoveryMode::Fixed => VaultClient::new(settings),
        DiscoveryMode::AutoDiscover => VaultClient::discover(settings).await,
    };
    match &client {
        Ok(c) => info!(mode = ?mode, address = %c.address(), "Connected secret store client"),
        Err(e) => error!(mode = ?mode, error = %e, "Failed to set up secret store client"),
    }
    client
}

/// Authenticates to `store` and decodes the credential stored at `path`.
pub async fn resolve_credential<S>(store: &mut S, path: &str) -> Result<Credential, CredentialError>
where
    S: SecretStore + ?Sized,
{
    store.authenticate().await.map_err(|e| {
        error!(error = %e, "Secret store authentication failed");
        e
    })?;
    info!("Authenticated to secret store");

    let secret = store.fetch(path).await.map_err(|e| {
        error!(path, error = %e, "Failed to fetch credential secret");
        e
    })?;

    let credential: Credential =
        serde_json::from_value(secret).map_err(|e| CredentialError::Decode {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
    if credential.account_id.is_empty() || credential.key.is_empty() {
        return Err(CredentialError::Decode {
            path: path.to_string(),
            reason: "fields `id` and `key` must not be empty".to_string(),
        });
    }

    info!(path, "Resolved B2 credential");
    Ok(credential)
}

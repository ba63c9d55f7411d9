//! HashiCorp Vault client over the HTTP API, implementing [`SecretStore`].
//!
//! The address comes either from `VAULT_ADDR` or from a DNS SRV lookup of
//! `_vault._tcp`. Authentication uses AppRole when `VAULT_ROLE_ID` and
//! `VAULT_SECRET_ID` are set, and otherwise a token from `VAULT_TOKEN` or
//! `~/.vault-token`. Both KV v1 and KV v2 mounts are readable.

use std::cmp::Reverse;
use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use hickory_resolver::TokioResolver;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::Environment;
use crate::contract::SecretStore;
use crate::error::CredentialError;

pub const DEFAULT_VAULT_ADDR: &str = "https://127.0.0.1:8200";
const SRV_SERVICE: &str = "_vault._tcp";

/// Connection and authentication settings for [`VaultClient`].
#[derive(Clone, Default)]
pub struct VaultSettings {
    pub address: Option<String>,
    pub token: Option<String>,
    pub token_file: Option<PathBuf>,
    pub role_id: Option<String>,
    pub secret_id: Option<String>,
    pub namespace: Option<String>,
    pub discovery_domain: Option<String>,
}

impl VaultSettings {
    pub fn from_env(env: &Environment) -> Self {
        let owned = |key: &str| env.get_non_empty(key).map(str::to_string);
        Self {
            address: owned("VAULT_ADDR"),
            token: owned("VAULT_TOKEN"),
            token_file: env
                .get_non_empty("HOME")
                .map(|home| PathBuf::from(home).join(".vault-token")),
            role_id: owned("VAULT_ROLE_ID"),
            secret_id: owned("VAULT_SECRET_ID"),
            namespace: owned("VAULT_NAMESPACE"),
            discovery_domain: owned("VAULT_DISCOVERY_DOMAIN"),
        }
    }
}

impl fmt::Debug for VaultSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultSettings")
            .field("address", &self.address)
            .field("token_set", &self.token.is_some())
            .field("token_file", &self.token_file)
            .field("approle", &(self.role_id.is_some() && self.secret_id.is_some()))
            .field("namespace", &self.namespace)
            .field("discovery_domain", &self.discovery_domain)
            .finish()
    }
}

/// One SRV answer, reduced to what target selection needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrvTarget {
    pub priority: u16,
    pub weight: u16,
    pub host: String,
    pub port: u16,
}

/// Picks the lowest-priority record, breaking ties by the highest weight.
pub fn select_srv_target(targets: &[SrvTarget]) -> Option<&SrvTarget> {
    targets
        .iter()
        .min_by_key(|t| (t.priority, Reverse(t.weight)))
}

pub struct VaultClient {
    http: Client,
    address: Url,
    settings: VaultSettings,
    token: Option<String>,
}

impl fmt::Debug for VaultClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultClient")
            .field("address", &self.address.as_str())
            .field("authenticated", &self.token.is_some())
            .finish()
    }
}

#[derive(Deserialize)]
struct LoginResponse {
    auth: Option<LoginAuth>,
}

#[derive(Deserialize)]
struct LoginAuth {
    client_token: String,
}

#[derive(Deserialize)]
struct SecretResponse {
    data: Option<Value>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    errors: Vec<String>,
}

impl VaultClient {
    /// Client for the configured address, or [`DEFAULT_VAULT_ADDR`].
    pub fn new(settings: VaultSettings) -> Result<Self, CredentialError> {
        let raw = settings
            .address
            .clone()
            .unwrap_or_else(|| DEFAULT_VAULT_ADDR.to_string());
        let address = Url::parse(&raw).map_err(|_| CredentialError::InvalidAddress(raw))?;
        Self::with_address(address, settings)
    }

    /// Client for the address advertised through DNS SRV records.
    pub async fn discover(settings: VaultSettings) -> Result<Self, CredentialError> {
        let name = match settings.discovery_domain.as_deref() {
            Some(domain) => format!("{SRV_SERVICE}.{}.", domain.trim_end_matches('.')),
            None => SRV_SERVICE.to_string(),
        };
        debug!(name = %name, "Looking up secret store SRV records");

        let resolver = TokioResolver::builder_tokio()
            .map_err(|e| CredentialError::Discovery(e.to_string()))?
            .build();
        let lookup = resolver
            .srv_lookup(name.as_str())
            .await
            .map_err(|e| CredentialError::Discovery(format!("{name}: {e}")))?;
        let targets: Vec<SrvTarget> = lookup
            .iter()
            .map(|srv| SrvTarget {
                priority: srv.priority(),
                weight: srv.weight(),
                host: srv.target().to_utf8(),
                port: srv.port(),
            })
            .collect();

        let target = select_srv_target(&targets)
            .ok_or_else(|| CredentialError::Discovery(format!("{name}: no SRV records")))?;
        let raw = format!(
            "https://{}:{}",
            target.host.trim_end_matches('.'),
            target.port
        );
        info!(address = %raw, candidates = targets.len(), "Discovered secret store");
        let address = Url::parse(&raw).map_err(|_| CredentialError::InvalidAddress(raw))?;
        Self::with_address(address, settings)
    }

    fn with_address(address: Url, settings: VaultSettings) -> Result<Self, CredentialError> {
        if !matches!(address.scheme(), "http" | "https") {
            return Err(CredentialError::InvalidAddress(address.to_string()));
        }
        let http = Client::builder()
            .build()
            .map_err(|e| CredentialError::Request {
                path: address.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            http,
            address,
            settings,
            token: None,
        })
    }

    pub fn address(&self) -> &Url {
        &self.address
    }

    /// API URL for `path`, appended below any path prefix of the address.
    fn endpoint(&self, path: &str) -> Result<Url, CredentialError> {
        let mut url = self.address.clone();
        url.path_segments_mut()
            .map_err(|_| CredentialError::InvalidAddress(self.address.to_string()))?
            .pop_if_empty()
            .push("v1")
            .extend(path.split('/').filter(|segment| !segment.is_empty()));
        Ok(url)
    }

    fn with_headers(&self, request: RequestBuilder, token: Option<&str>) -> RequestBuilder {
        let request = match token {
            Some(token) => request.header("X-Vault-Token", token),
            None => request,
        };
        match self.settings.namespace.as_deref() {
            Some(ns) => request.header("X-Vault-Namespace", ns),
            None => request,
        }
    }

    async fn token_from_settings(&self) -> Option<String> {
        if let Some(token) = &self.settings.token {
            return Some(token.clone());
        }
        let path = self.settings.token_file.as_ref()?;
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => Some(raw.trim().to_string()).filter(|t| !t.is_empty()),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "No readable token file");
                None
            }
        }
    }

    async fn login_approle(&self, role_id: &str, secret_id: &str) -> Result<String, CredentialError> {
        let url = self.endpoint("auth/approle/login")?;
        let body = serde_json::json!({ "role_id": role_id, "secret_id": secret_id });
        let response = self
            .with_headers(self.http.post(url), None)
            .json(&body)
            .send()
            .await
            .map_err(|e| CredentialError::Authentication(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let reason = error_message(response).await;
            return Err(CredentialError::Authentication(format!(
                "approle login returned {status}: {reason}"
            )));
        }
        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::Authentication(e.to_string()))?;
        login
            .auth
            .map(|a| a.client_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                CredentialError::Authentication("approle login returned no client token".into())
            })
    }

    async fn verify_token(&self, token: &str) -> Result<(), CredentialError> {
        let url = self.endpoint("auth/token/lookup-self")?;
        let response = self
            .with_headers(self.http.get(url), Some(token))
            .send()
            .await
            .map_err(|e| CredentialError::Authentication(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let reason = error_message(response).await;
            Err(CredentialError::Authentication(format!(
                "token lookup returned {status}: {reason}"
            )))
        }
    }
}

async fn error_message(response: reqwest::Response) -> String {
    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorResponse>(&text) {
        Ok(parsed) if !parsed.errors.is_empty() => parsed.errors.join("; "),
        _ => text,
    }
}

/// Unwraps a KV v2 payload (`data.data`) and leaves KV v1 payloads untouched.
pub fn unwrap_kv_payload(data: Value) -> Value {
    match data {
        Value::Object(mut outer) if outer.contains_key("metadata") => match outer.remove("data") {
            Some(inner @ Value::Object(_)) => inner,
            Some(other) => {
                outer.insert("data".to_string(), other);
                Value::Object(outer)
            }
            None => Value::Object(outer),
        },
        other => other,
    }
}

#[async_trait]
impl SecretStore for VaultClient {
    async fn authenticate(&mut self) -> Result<(), CredentialError> {
        let approle = self
            .settings
            .role_id
            .as_deref()
            .zip(self.settings.secret_id.as_deref());

        let token = if let Some((role_id, secret_id)) = approle {
            info!(address = %self.address, "Authenticating to Vault with AppRole");
            self.login_approle(role_id, secret_id).await?
        } else if let Some(token) = self.token_from_settings().await {
            info!(address = %self.address, "Authenticating to Vault with token");
            self.verify_token(&token).await?;
            token
        } else {
            error!("No Vault authentication method configured");
            return Err(CredentialError::NoAuthMethod);
        };

        self.token = Some(token);
        Ok(())
    }

    async fn fetch(&self, path: &str) -> Result<Value, CredentialError> {
        let token = self.token.as_deref().ok_or_else(|| {
            CredentialError::Authentication("fetch attempted before authentication".into())
        })?;
        let url = self.endpoint(path)?;
        debug!(path, "Reading secret from Vault");

        let response = self
            .with_headers(self.http.get(url), Some(token))
            .send()
            .await
            .map_err(|e| CredentialError::Request {
                path: path.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            warn!(path, "Secret not found");
            return Err(CredentialError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            let reason = error_message(response).await;
            return Err(CredentialError::Request {
                path: path.to_string(),
                reason: format!("{status}: {reason}"),
            });
        }

        let body: SecretResponse = response.json().await.map_err(|e| CredentialError::Decode {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        let data = body.data.ok_or_else(|| CredentialError::Decode {
            path: path.to_string(),
            reason: "response has no data".to_string(),
        })?;
        Ok(unwrap_kv_payload(data))
    }
}

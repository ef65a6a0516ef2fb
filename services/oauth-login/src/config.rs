//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The client secret comes from OAUTH_CLIENT_SECRET or the provider's
//! secrets file, never from the TOML directly.

use loopback_auth::ClientConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::secrets::ClientSecrets;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub client: ClientSection,
    #[serde(default)]
    pub token: TokenSection,
    #[serde(default)]
    pub flow: FlowSection,
    #[serde(default)]
    pub probe: Option<ProbeSection>,
}

/// OAuth client identity
#[derive(Debug, Deserialize)]
pub struct ClientSection {
    /// Provider client-secrets JSON (`installed` or `web` format)
    #[serde(default)]
    pub secrets_file: Option<PathBuf>,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Overrides the redirect URI from the secrets file
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(skip)]
    pub resolved: Option<ClientSecrets>,
}

/// Token cache location
#[derive(Debug, Deserialize)]
pub struct TokenSection {
    #[serde(default = "default_token_path")]
    pub path: PathBuf,
}

impl Default for TokenSection {
    fn default() -> Self {
        Self {
            path: default_token_path(),
        }
    }
}

/// Interactive flow settings
#[derive(Debug, Deserialize)]
pub struct FlowSection {
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_pkce")]
    pub pkce: bool,
}

impl Default for FlowSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            pkce: default_pkce(),
        }
    }
}

/// One authenticated GET made after login
#[derive(Debug, Deserialize)]
pub struct ProbeSection {
    pub url: String,
}

fn default_token_path() -> PathBuf {
    PathBuf::from("token.json")
}

fn default_timeout() -> u64 {
    loopback_auth::CODE_WAIT_TIMEOUT.as_secs()
}

fn default_pkce() -> bool {
    true
}

impl Config {
    /// Load configuration from a TOML file, then resolve client credentials.
    ///
    /// Client id/secret resolution order:
    /// 1. OAUTH_CLIENT_ID / OAUTH_CLIENT_SECRET env vars
    /// 2. `secrets_file` from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if config.flow.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if config.token.path.as_os_str().is_empty() {
            return Err(common::Error::Config("token path must not be empty".into()));
        }

        if let Some(ref probe) = config.probe
            && !probe.url.starts_with("http://")
            && !probe.url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "probe url must start with http:// or https://, got: {}",
                probe.url
            )));
        }

        let mut secrets = match config.client.secrets_file {
            Some(ref file) => Some(ClientSecrets::load(file)?),
            None => None,
        };

        let env_id = non_empty_env("OAUTH_CLIENT_ID");
        let env_secret = non_empty_env("OAUTH_CLIENT_SECRET");
        match (secrets.as_mut(), env_id, env_secret) {
            (Some(s), id, secret) => {
                if let Some(id) = id {
                    s.client_id = id;
                }
                if let Some(secret) = secret {
                    s.client_secret = secret.into();
                }
            }
            (None, Some(client_id), Some(secret)) => {
                secrets = Some(ClientSecrets {
                    client_id,
                    client_secret: secret.into(),
                    auth_uri: None,
                    token_uri: None,
                    redirect_uris: Vec::new(),
                });
            }
            (None, _, _) => {
                return Err(common::Error::Config(
                    "no client credentials: set secrets_file or OAUTH_CLIENT_ID and OAUTH_CLIENT_SECRET"
                        .into(),
                ));
            }
        }

        if let Some(ref s) = secrets
            && s.client_id.trim().is_empty()
        {
            return Err(common::Error::Config("client_id must not be empty".into()));
        }

        config.client.resolved = secrets;
        Ok(config)
    }

    /// Build the library's client description from the resolved config.
    pub fn client_config(&self) -> common::Result<ClientConfig> {
        let secrets = self
            .client
            .resolved
            .as_ref()
            .ok_or_else(|| common::Error::Config("client credentials not resolved".into()))?;

        let mut client = ClientConfig::new(
            secrets.client_id.clone(),
            secrets.client_secret.expose().clone(),
        )
        .with_scopes(self.client.scopes.iter().cloned())
        .with_pkce(self.flow.pkce);

        if let Some(ref auth_uri) = secrets.auth_uri {
            client.auth_endpoint = auth_uri.clone();
        }
        if let Some(ref token_uri) = secrets.token_uri {
            client.token_endpoint = token_uri.clone();
        }

        let redirect = self
            .client
            .redirect_uri
            .clone()
            .or_else(|| secrets.loopback_redirect());
        if let Some(uri) = redirect {
            client = client.with_redirect_uri(uri);
        }

        client
            .validate()
            .map_err(|e| common::Error::Config(e.to_string()))?;
        Ok(client)
    }

    pub fn flow_timeout(&self) -> Duration {
        Duration::from_secs(self.flow.timeout_secs)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("oauth-login.toml")
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

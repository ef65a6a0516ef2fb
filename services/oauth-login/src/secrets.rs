//! Provider client-secrets file
//!
//! The JSON downloaded from the provider's developer console, wrapped in
//! either an `installed` (desktop app) or `web` object:
//!
//! ```json
//! {"installed": {"client_id": "...", "client_secret": "...",
//!                "auth_uri": "...", "token_uri": "...",
//!                "redirect_uris": ["http://localhost"]}}
//! ```

use common::Secret;
use loopback_auth::DEFAULT_REDIRECT_PORT;
use reqwest::Url;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: Secret<String>,
    #[serde(default)]
    pub auth_uri: Option<String>,
    #[serde(default)]
    pub token_uri: Option<String>,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

#[derive(Deserialize)]
struct SecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            common::Error::Config(format!(
                "failed to read secrets_file {}: {e}",
                path.display()
            ))
        })?;
        Self::parse(&contents)
    }

    pub fn parse(json: &str) -> common::Result<Self> {
        let file: SecretsFile = serde_json::from_str(json)?;
        file.installed.or(file.web).ok_or_else(|| {
            common::Error::Config(
                "client secrets must contain an \"installed\" or \"web\" object".into(),
            )
        })
    }

    /// First redirect URI that points at a loopback host, if any.
    ///
    /// Desktop secrets list a bare `http://localhost`; a URI without a port
    /// gets `DEFAULT_REDIRECT_PORT` instead of binding :80.
    pub fn loopback_redirect(&self) -> Option<String> {
        self.redirect_uris
            .iter()
            .find(|uri| {
                uri.starts_with("http://localhost")
                    || uri.starts_with("http://127.0.0.1")
                    || uri.starts_with("http://[::1]")
            })
            .map(|uri| with_default_port(uri))
    }
}

/// `uri` with `DEFAULT_REDIRECT_PORT` filled in when it names no port.
/// Unparseable URIs pass through for `ClientConfig::validate` to reject.
fn with_default_port(uri: &str) -> String {
    let Ok(mut url) = Url::parse(uri) else {
        return uri.to_string();
    };
    if url.port().is_some() {
        return uri.to_string();
    }
    match url.set_port(Some(DEFAULT_REDIRECT_PORT)) {
        Ok(()) => url.to_string(),
        Err(()) => uri.to_string(),
    }
}

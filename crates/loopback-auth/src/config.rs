//! OAuth client configuration
//!
//! The binary assembles this from the provider's client-secrets file; the
//! library only validates it and derives the loopback address from the
//! redirect URI.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use common::Secret;
use reqwest::Url;

use crate::constants::{AUTHORIZE_ENDPOINT, DEFAULT_REDIRECT_URI, TOKEN_ENDPOINT};
use crate::error::{Error, Result};

/// Static description of the OAuth client this process acts as.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub auth_endpoint: String,
    pub token_endpoint: String,
    /// Must point at a loopback host over plain http.
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    /// Send an S256 PKCE challenge with the authorization request.
    pub pkce: bool,
}

impl ClientConfig {
    /// Client with Google endpoints, the default loopback redirect, PKCE on
    /// and no scopes.
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: Secret::new(client_secret.into()),
            auth_endpoint: AUTHORIZE_ENDPOINT.to_string(),
            token_endpoint: TOKEN_ENDPOINT.to_string(),
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            scopes: Vec::new(),
            pkce: true,
        }
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = redirect_uri.into();
        self
    }

    pub fn with_endpoints(
        mut self,
        auth_endpoint: impl Into<String>,
        token_endpoint: impl Into<String>,
    ) -> Self {
        self.auth_endpoint = auth_endpoint.into();
        self.token_endpoint = token_endpoint.into();
        self
    }

    pub fn with_pkce(mut self, enabled: bool) -> Self {
        self.pkce = enabled;
        self
    }

    /// Check everything the flow relies on before any socket is opened.
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(Error::Config("client_id must not be empty".into()));
        }

        for (name, endpoint) in [
            ("auth_endpoint", &self.auth_endpoint),
            ("token_endpoint", &self.token_endpoint),
        ] {
            let url = Url::parse(endpoint)
                .map_err(|e| Error::Config(format!("{name} is not a valid URL: {e}")))?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(Error::Config(format!(
                    "{name} must use http or https, got: {endpoint}"
                )));
            }
        }

        self.loopback_addr().map(|_| ())
    }

    pub fn redirect_url(&self) -> Result<Url> {
        let url = Url::parse(&self.redirect_uri)
            .map_err(|e| Error::Config(format!("redirect_uri is not a valid URL: {e}")))?;
        if url.scheme() != "http" {
            return Err(Error::Config(format!(
                "redirect_uri must use http on a loopback host, got: {}",
                self.redirect_uri
            )));
        }
        Ok(url)
    }

    /// Socket address the loopback receiver binds for this redirect URI.
    ///
    /// `localhost` maps to 127.0.0.1; literal IPs must be loopback addresses.
    pub fn loopback_addr(&self) -> Result<SocketAddr> {
        let url = self.redirect_url()?;
        let host = url
            .host_str()
            .ok_or_else(|| Error::Config("redirect_uri has no host".into()))?;

        let ip = if host.eq_ignore_ascii_case("localhost") {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            let literal = host.trim_start_matches('[').trim_end_matches(']');
            let ip: IpAddr = literal.parse().map_err(|_| {
                Error::Config(format!(
                    "redirect_uri host must be localhost or a loopback IP, got: {host}"
                ))
            })?;
            if !ip.is_loopback() {
                return Err(Error::Config(format!(
                    "redirect_uri host must be a loopback address, got: {host}"
                )));
            }
            ip
        };

        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::Config("redirect_uri has no port".into()))?;

        Ok(SocketAddr::new(ip, port))
    }

    /// Path component of the redirect URI; the receiver answers only there.
    pub fn redirect_path(&self) -> Result<String> {
        Ok(self.redirect_url()?.path().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ClientConfig {
        ClientConfig::new("client-123.apps.googleusercontent.com", "GOCSPX-secret")
    }

    #[test]
    fn defaults_target_google_and_port_8080() {
        let config = client();
        assert_eq!(config.auth_endpoint, AUTHORIZE_ENDPOINT);
        assert_eq!(config.token_endpoint, TOKEN_ENDPOINT);
        assert!(config.pkce);
        assert!(config.validate().is_ok());
        assert_eq!(
            config.loopback_addr().unwrap(),
            "127.0.0.1:8080".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(config.redirect_path().unwrap(), "/");
    }

    #[test]
    fn ipv6_loopback_redirect_is_accepted() {
        let config = client().with_redirect_uri("http://[::1]:9004/callback");
        assert_eq!(
            config.loopback_addr().unwrap(),
            "[::1]:9004".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(config.redirect_path().unwrap(), "/callback");
    }

    #[test]
    fn non_loopback_redirect_is_rejected() {
        let config = client().with_redirect_uri("http://192.168.1.10:8080/");
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::Config(_)), "got: {err:?}");

        let config = client().with_redirect_uri("http://example.com:8080/");
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn https_redirect_is_rejected() {
        let config = client().with_redirect_uri("https://localhost:8443/");
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn empty_client_id_is_rejected() {
        let config = ClientConfig::new("  ", "secret");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("client_id"), "got: {err}");
    }

    #[test]
    fn endpoint_without_scheme_is_rejected() {
        let config = client().with_endpoints("accounts.google.com/o/oauth2/auth", TOKEN_ENDPOINT);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("auth_endpoint"), "got: {err}");
    }

    #[test]
    fn redirect_without_explicit_port_uses_http_default() {
        let config = client().with_redirect_uri("http://127.0.0.1/");
        assert_eq!(config.loopback_addr().unwrap().port(), 80);
    }
}

//! OAuth login
//!
//! Command-line front end for the loopback authorization flow:
//! 1. Reuses the cached token file when it still holds a usable credential
//! 2. Otherwise prints the consent URL and waits for the browser redirect
//! 3. Persists the exchanged token next to the config
//! 4. Optionally makes one authenticated GET to prove the token works
//!
//! Logs go to stderr as JSON; stdout carries only the consent URL.

mod config;
mod secrets;

use anyhow::{Context, Result};
use loopback_auth::{AuthorizationFlow, CredentialClient, TokenStore};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

/// Parsed command-line flags
#[derive(Debug, Default, PartialEq)]
struct CliArgs {
    config: Option<String>,
    /// Discard the cached token and run the consent flow again
    reauth: bool,
}

fn parse_args(args: &[String]) -> CliArgs {
    CliArgs {
        config: args
            .iter()
            .position(|a| a == "--config")
            .and_then(|i| args.get(i + 1))
            .cloned(),
        reauth: args.iter().any(|a| a == "--reauth"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs with LOG_LEVEL / RUST_LOG support, kept off stdout
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let cli = parse_args(&args);

    let config_path = Config::resolve_path(cli.config.as_deref());
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    let client = config
        .client_config()
        .context("invalid OAuth client configuration")?;

    info!(
        client_id = %client.client_id,
        redirect_uri = %client.redirect_uri,
        scopes = client.scopes.len(),
        token_path = %config.token.path.display(),
        pkce = client.pkce,
        "configuration loaded"
    );

    let store = TokenStore::new(&config.token.path);
    if cli.reauth {
        store
            .clear()
            .await
            .context("failed to remove cached token")?;
    }

    let flow = AuthorizationFlow::new(client.clone(), store.clone())
        .with_timeout(config.flow_timeout());

    let credential = flow
        .obtain_credential_with_cancel(shutdown_signal())
        .await
        .context("failed to obtain OAuth credential")?;

    info!(
        token_type = %credential.token_type,
        has_refresh_token = credential.can_refresh(),
        expiry = credential.expiry,
        "credential ready"
    );

    let api = CredentialClient::new(flow.http_client().clone(), client, store, credential);

    if let Some(probe) = config.probe {
        let response = api
            .get(probe.url.as_str())
            .await
            .with_context(|| format!("probe request to {} failed", probe.url))?;
        let status = response.status();
        if status.is_success() {
            info!(url = %probe.url, status = status.as_u16(), "probe request succeeded");
        } else {
            warn!(url = %probe.url, status = status.as_u16(), "probe request returned non-success status");
        }
    }

    Ok(())
}

/// Resolve on SIGINT or SIGTERM so a pending login can unwind.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, cancelling login"),
        _ = terminate => info!("received SIGTERM, cancelling login"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_flags_uses_defaults() {
        assert_eq!(parse_args(&args(&["oauth-login"])), CliArgs::default());
    }

    #[test]
    fn config_flag_takes_next_argument() {
        let cli = parse_args(&args(&["oauth-login", "--config", "/etc/oauth-login.toml"]));
        assert_eq!(cli.config.as_deref(), Some("/etc/oauth-login.toml"));
        assert!(!cli.reauth);
    }

    #[test]
    fn dangling_config_flag_is_ignored() {
        let cli = parse_args(&args(&["oauth-login", "--reauth", "--config"]));
        assert!(cli.config.is_none());
        assert!(cli.reauth);
    }
}

//! Interactive authorization-code flow
//!
//! 1. Cached credential usable? Return it. No listener, no network.
//! 2. Build the consent URL (state + optional PKCE challenge)
//! 3. Start the loopback receiver on the redirect URI's port
//! 4. Show the URL to the user and wait for the redirect, bounded by a timeout
//! 5. Exchange the code, persist the result, return it
//!
//! A failed save is logged and the credential is still returned; every other
//! failure ends the flow.

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::Secret;
use reqwest::Url;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::constants::CODE_WAIT_TIMEOUT;
use crate::credential::{Credential, now_millis};
use crate::error::{Error, Result};
use crate::metrics;
use crate::pkce::{self, PkcePair};
use crate::receiver::{AuthorizationCode, LoopbackReceiver};
use crate::store::TokenStore;
use crate::token;

/// Everything the consent URL carries for one flow run.
#[derive(Clone)]
pub struct AuthorizationRequest {
    pub client_id: String,
    /// Carried for the exchange step; never placed in the URL.
    pub client_secret: Secret<String>,
    pub auth_endpoint: String,
    pub scopes: BTreeSet<String>,
    pub redirect_uri: String,
    pub state: String,
}

impl AuthorizationRequest {
    /// Request for `client` with a fresh random `state`.
    pub fn new(client: &ClientConfig) -> Self {
        Self {
            client_id: client.client_id.clone(),
            client_secret: client.client_secret.clone(),
            auth_endpoint: client.auth_endpoint.clone(),
            scopes: client.scopes.iter().cloned().collect(),
            redirect_uri: client.redirect_uri.clone(),
            state: pkce::generate_state(),
        }
    }

    /// The URL the user opens to grant consent.
    pub fn authorization_url(&self, code_challenge: Option<&str>) -> Result<Url> {
        let mut url = Url::parse(&self.auth_endpoint)
            .map_err(|e| Error::Config(format!("auth_endpoint is not a valid URL: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.client_id)
                .append_pair("redirect_uri", &self.redirect_uri)
                .append_pair("response_type", "code")
                .append_pair("scope", &self.scope())
                .append_pair("state", &self.state)
                .append_pair("access_type", "offline");
            if let Some(challenge) = code_challenge {
                query
                    .append_pair("code_challenge", challenge)
                    .append_pair("code_challenge_method", "S256");
            }
        }
        Ok(url)
    }

    fn scope(&self) -> String {
        self.scopes.iter().map(String::as_str).collect::<Vec<_>>().join(" ")
    }
}

impl fmt::Debug for AuthorizationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationRequest")
            .field("client_id", &self.client_id)
            .field("scopes", &self.scopes)
            .field("redirect_uri", &self.redirect_uri)
            .field("state", &"[REDACTED]")
            .finish()
    }
}

/// A code waiting to be exchanged.
#[derive(Debug)]
pub struct PendingExchange {
    pub authorization_code: AuthorizationCode,
    pub received_at: Instant,
}

type Presenter = Arc<dyn Fn(&Url) + Send + Sync>;

/// Drives one client's authorization against its token store.
#[derive(Clone)]
pub struct AuthorizationFlow {
    client: ClientConfig,
    store: TokenStore,
    http: reqwest::Client,
    timeout: Duration,
    presenter: Presenter,
}

impl AuthorizationFlow {
    pub fn new(client: ClientConfig, store: TokenStore) -> Self {
        Self {
            client,
            store,
            http: reqwest::Client::new(),
            timeout: CODE_WAIT_TIMEOUT,
            presenter: Arc::new(print_url),
        }
    }

    /// Upper bound on waiting for the redirect.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replace how the consent URL is shown to the user.
    pub fn with_presenter<F>(mut self, presenter: F) -> Self
    where
        F: Fn(&Url) + Send + Sync + 'static,
    {
        self.presenter = Arc::new(presenter);
        self
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn client(&self) -> &ClientConfig {
        &self.client
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.http
    }

    /// Cached credential if usable, otherwise run the interactive flow.
    pub async fn obtain_credential(&self) -> Result<Credential> {
        self.obtain_credential_with_cancel(std::future::pending::<()>())
            .await
    }

    /// Like `obtain_credential`; `cancel` completing aborts the wait for
    /// the redirect with `Error::Cancelled`.
    pub async fn obtain_credential_with_cancel<F>(&self, cancel: F) -> Result<Credential>
    where
        F: Future<Output = ()>,
    {
        if let Some(credential) = self.store.load().await {
            if credential.is_usable(now_millis()) {
                metrics::record_cache(true);
                info!(path = %self.store.path().display(), "using cached credential");
                return Ok(credential);
            }
            debug!("cached credential expired and cannot be refreshed");
        }
        metrics::record_cache(false);

        let result = self.run_interactive(cancel).await;
        metrics::record_flow(flow_outcome(&result));
        result
    }

    async fn run_interactive<F>(&self, cancel: F) -> Result<Credential>
    where
        F: Future<Output = ()>,
    {
        self.client.validate()?;

        let request = AuthorizationRequest::new(&self.client);
        let pkce = self.client.pkce.then(PkcePair::generate);
        let url = request.authorization_url(pkce.as_ref().map(|p| p.challenge.as_str()))?;

        let receiver = LoopbackReceiver::for_client(&self.client, &request.state)?
            .start()
            .await?;
        info!(
            addr = %receiver.local_addr(),
            timeout_secs = self.timeout.as_secs(),
            "waiting for authorization redirect"
        );

        (self.presenter)(&url);

        let code = receiver.wait_for_code_or_cancel(self.timeout, cancel).await?;
        let pending = PendingExchange {
            authorization_code: code,
            received_at: Instant::now(),
        };

        self.exchange(pending, pkce.as_ref().map(|p| p.verifier.as_str()))
            .await
    }

    async fn exchange(&self, pending: PendingExchange, verifier: Option<&str>) -> Result<Credential> {
        let response = token::exchange_code(
            &self.http,
            &self.client,
            pending.authorization_code.as_str(),
            verifier,
        )
        .await?;
        let credential = Credential::from_token_response(response, now_millis(), None);
        info!(
            elapsed_ms = pending.received_at.elapsed().as_millis() as u64,
            has_refresh_token = credential.can_refresh(),
            "authorization code exchanged"
        );

        if let Err(e) = self.store.save(&credential).await {
            warn!(error = %e, path = %self.store.path().display(), "failed to persist token, continuing with in-memory credential");
        }

        Ok(credential)
    }
}

impl fmt::Debug for AuthorizationFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationFlow")
            .field("client", &self.client)
            .field("store", &self.store)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

fn print_url(url: &Url) {
    println!("Go to the following link in your browser to authorize access:\n\n{url}\n");
}

fn flow_outcome(result: &Result<Credential>) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(Error::Timeout(_)) => "timeout",
        Err(Error::Cancelled) => "cancelled",
        Err(Error::Bind(_)) => "bind_error",
        Err(Error::Config(_)) => "config_error",
        Err(_) => "exchange_error",
    }
}

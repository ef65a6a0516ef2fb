//! Authorized HTTP client for downstream callers
//!
//! Wraps a `Credential` and attaches it to outgoing requests. A token that
//! expires within `REFRESH_THRESHOLD` is refreshed inline before use; the
//! replacement is written back to the token store. Refreshes are serialized
//! so concurrent requests never spend the same refresh token twice.

use reqwest::header::{AUTHORIZATION, HeaderValue};
use reqwest::{IntoUrl, Request, Response};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::constants::REFRESH_THRESHOLD;
use crate::credential::{Credential, now_millis};
use crate::error::{Error, Result};
use crate::metrics;
use crate::store::TokenStore;
use crate::token;

pub struct CredentialClient {
    http: reqwest::Client,
    client: ClientConfig,
    store: TokenStore,
    credential: Mutex<Credential>,
}

impl CredentialClient {
    pub fn new(
        http: reqwest::Client,
        client: ClientConfig,
        store: TokenStore,
        credential: Credential,
    ) -> Self {
        Self {
            http,
            client,
            store,
            credential: Mutex::new(credential),
        }
    }

    /// Snapshot of the credential currently in use.
    pub async fn credential(&self) -> Credential {
        self.credential.lock().await.clone()
    }

    /// Attach `Authorization` to `request`, refreshing the token first if it
    /// is about to expire.
    pub async fn authorize(&self, mut request: Request) -> Result<Request> {
        let credential = self.fresh_credential().await?;

        let mut value = HeaderValue::from_str(&credential.authorization_header())
            .map_err(|_| Error::InvalidCredentials("access token is not a valid header value".into()))?;
        value.set_sensitive(true);
        request.headers_mut().insert(AUTHORIZATION, value);
        Ok(request)
    }

    /// Authorize and send `request`.
    pub async fn execute(&self, request: Request) -> Result<Response> {
        let request = self.authorize(request).await?;
        let url = request.url().clone();
        self.http
            .execute(request)
            .await
            .map_err(|e| Error::Http(format!("request to {url} failed: {e}")))
    }

    /// Authorized GET.
    pub async fn get(&self, url: impl IntoUrl) -> Result<Response> {
        let request = self
            .http
            .get(url)
            .build()
            .map_err(|e| Error::Http(format!("building request: {e}")))?;
        self.execute(request).await
    }

    async fn fresh_credential(&self) -> Result<Credential> {
        let mut current = self.credential.lock().await;
        let now = now_millis();

        if !current.expires_within(REFRESH_THRESHOLD, now) {
            return Ok(current.clone());
        }

        let Some(refresh) = current.refresh_token.clone().filter(|t| !t.trim().is_empty()) else {
            return Err(Error::InvalidCredentials(
                "access token expired and no refresh token is available".into(),
            ));
        };

        debug!(expiry = current.expiry, "access token expiring soon, refreshing");

        let response = match token::refresh_token(&self.http, &self.client, &refresh).await {
            Ok(response) => response,
            Err(e) => {
                metrics::record_refresh("failure");
                warn!(error = %e, "token refresh failed");
                return Err(e);
            }
        };

        let replacement = Credential::from_token_response(response, now_millis(), Some(refresh));
        *current = replacement.clone();
        metrics::record_refresh("success");
        info!(expiry = replacement.expiry, "access token refreshed");

        if let Err(e) = self.store.save(&replacement).await {
            warn!(error = %e, path = %self.store.path().display(), "failed to persist refreshed token");
        }

        Ok(replacement)
    }
}

impl std::fmt::Debug for CredentialClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialClient")
            .field("client_id", &self.client.client_id)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex as StdMutex};

    use axum::Form;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use tokio::net::TcpListener;

    type Seen = Arc<StdMutex<Vec<String>>>;

    /// Mock provider: `/token` answers refresh grants, `/api` echoes back the
    /// Authorization header it saw.
    async fn start_provider(token_status: StatusCode, token_body: &'static str) -> (String, Arc<AtomicUsize>, Seen) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let refreshes = Arc::new(AtomicUsize::new(0));
        let seen: Seen = Arc::new(StdMutex::new(Vec::new()));

        let counter = refreshes.clone();
        let recorded = seen.clone();
        let app = axum::Router::new()
            .route(
                "/token",
                axum::routing::post(move |Form(form): Form<HashMap<String, String>>| {
                    let counter = counter.clone();
                    async move {
                        assert_eq!(form["grant_type"], "refresh_token");
                        counter.fetch_add(1, Ordering::SeqCst);
                        (token_status, [("content-type", "application/json")], token_body).into_response()
                    }
                }),
            )
            .route(
                "/api",
                axum::routing::get(move |headers: HeaderMap| {
                    let recorded = recorded.clone();
                    async move {
                        let auth = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("")
                            .to_string();
                        recorded.lock().unwrap().push(auth);
                        StatusCode::NO_CONTENT
                    }
                }),
            );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}"), refreshes, seen)
    }

    fn config(base: &str) -> ClientConfig {
        ClientConfig::new("client-abc", "secret-xyz")
            .with_endpoints(format!("{base}/auth"), format!("{base}/token"))
    }

    fn credential(expiry: u64, refresh: Option<&str>) -> Credential {
        Credential {
            access_token: "ya29.current".into(),
            token_type: "Bearer".into(),
            refresh_token: refresh.map(String::from),
            expiry,
        }
    }

    #[tokio::test]
    async fn fresh_token_is_attached_without_refresh() {
        let (base, refreshes, seen) = start_provider(StatusCode::OK, "{}").await;
        let dir = tempfile::tempdir().unwrap();
        let client = CredentialClient::new(
            reqwest::Client::new(),
            config(&base),
            TokenStore::new(dir.path().join("token.json")),
            credential(now_millis() + 3_600_000, Some("1//rt")),
        );

        let response = client.get(format!("{base}/api")).await.unwrap();
        assert_eq!(response.status().as_u16(), 204);
        assert_eq!(seen.lock().unwrap()[0], "Bearer ya29.current");
        assert_eq!(refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn non_expiring_token_is_never_refreshed() {
        let (base, refreshes, _) = start_provider(StatusCode::OK, "{}").await;
        let dir = tempfile::tempdir().unwrap();
        let client = CredentialClient::new(
            reqwest::Client::new(),
            config(&base),
            TokenStore::new(dir.path().join("token.json")),
            credential(0, None),
        );

        let request = reqwest::Client::new().get(format!("{base}/api")).build().unwrap();
        let request = client.authorize(request).await.unwrap();
        assert_eq!(request.headers()[AUTHORIZATION], "Bearer ya29.current");
        assert_eq!(refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expiring_token_is_refreshed_and_persisted() {
        let (base, refreshes, seen) = start_provider(
            StatusCode::OK,
            r#"{"access_token":"ya29.refreshed","expires_in":3600,"token_type":"Bearer"}"#,
        )
        .await;
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("token.json"));
        let client = CredentialClient::new(
            reqwest::Client::new(),
            config(&base),
            store.clone(),
            // Inside the refresh window but not yet expired
            credential(now_millis() + 30_000, Some("1//keep")),
        );

        client.get(format!("{base}/api")).await.unwrap();
        client.get(format!("{base}/api")).await.unwrap();

        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["Bearer ya29.refreshed".to_string(), "Bearer ya29.refreshed".to_string()]
        );

        let current = client.credential().await;
        assert_eq!(current.refresh_token.as_deref(), Some("1//keep"));

        let persisted = store.load().await.unwrap();
        assert_eq!(persisted, current);
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_refresh() {
        let (base, refreshes, _) = start_provider(
            StatusCode::OK,
            r#"{"access_token":"ya29.refreshed","expires_in":3600}"#,
        )
        .await;
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(CredentialClient::new(
            reqwest::Client::new(),
            config(&base),
            TokenStore::new(dir.path().join("token.json")),
            credential(1, Some("1//rt")),
        ));

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let client = client.clone();
            let url = format!("{base}/api");
            tasks.push(tokio::spawn(async move { client.get(url).await.map(|r| r.status()) }));
        }
        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_without_refresh_token_is_invalid_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let client = CredentialClient::new(
            reqwest::Client::new(),
            config("http://127.0.0.1:1"),
            TokenStore::new(dir.path().join("token.json")),
            credential(1, None),
        );

        let err = client.get("http://127.0.0.1:1/api").await.unwrap_err();
        assert!(matches!(err, Error::InvalidCredentials(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn rejected_refresh_keeps_old_credential() {
        let (base, refreshes, seen) = start_provider(StatusCode::UNAUTHORIZED, r#"{"error":"unauthorized_client"}"#).await;
        let dir = tempfile::tempdir().unwrap();
        let client = CredentialClient::new(
            reqwest::Client::new(),
            config(&base),
            TokenStore::new(dir.path().join("token.json")),
            credential(1, Some("1//revoked")),
        );

        let err = client.get(format!("{base}/api")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidCredentials(_)), "got: {err:?}");
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
        assert!(seen.lock().unwrap().is_empty(), "no API call after failed refresh");
        assert_eq!(client.credential().await.access_token, "ya29.current");
    }

    #[tokio::test]
    async fn refresh_succeeds_even_if_store_is_unwritable() {
        let (base, _, _) = start_provider(
            StatusCode::OK,
            r#"{"access_token":"ya29.refreshed","expires_in":3600}"#,
        )
        .await;
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        tokio::fs::write(&blocker, "x").await.unwrap();

        let client = CredentialClient::new(
            reqwest::Client::new(),
            config(&base),
            TokenStore::new(blocker.join("token.json")),
            credential(1, Some("1//rt")),
        );

        let response = client.get(format!("{base}/api")).await.unwrap();
        assert_eq!(response.status().as_u16(), 204);
        assert_eq!(client.credential().await.access_token, "ya29.refreshed");
    }

    #[test]
    fn debug_does_not_leak_tokens() {
        let client = CredentialClient::new(
            reqwest::Client::new(),
            ClientConfig::new("client-abc", "secret-xyz"),
            TokenStore::new("token.json"),
            credential(0, Some("1//rt")),
        );
        let debug = format!("{client:?}");
        assert!(!debug.contains("ya29"));
        assert!(!debug.contains("secret-xyz"));
    }
}

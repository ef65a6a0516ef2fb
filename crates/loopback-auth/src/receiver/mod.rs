//! One-shot loopback listener for the OAuth redirect
//!
//! Each receiver owns its own router and listener; nothing is registered
//! globally. The axum server runs on a spawned task while the caller blocks
//! in `wait_for_code`. The first request carrying a usable `code` (and the
//! expected `state`, when one is set) is handed over through a oneshot
//! channel; everything else gets an error response and leaves the receiver
//! listening.
//!
//! Shutdown is graceful for up to the configured grace period, after which
//! the server task is aborted so the port is always released.

mod state;

pub use state::{ReceiverAction, ReceiverEvent, ReceiverState, handle_event};

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::constants::SHUTDOWN_GRACE;
use crate::error::{Error, Result};

const SUCCESS_BODY: &str = "Authorization received. You can close this window.";
const MISSING_CODE_BODY: &str = "Authorization code not found in request.";
const STATE_MISMATCH_BODY: &str = "State parameter does not match this login attempt.";
const DUPLICATE_BODY: &str = "Authorization was already received. You can close this window.";
const EXPIRED_BODY: &str = "This login attempt has ended. Run the command again to retry.";
const NOT_FOUND_BODY: &str = "Not found.";

/// Authorization code captured from the redirect.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthorizationCode(String);

impl AuthorizationCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for AuthorizationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthorizationCode([REDACTED])")
    }
}

/// Not-yet-started receiver: where to listen and what to accept.
#[derive(Debug, Clone)]
pub struct LoopbackReceiver {
    addr: SocketAddr,
    path: String,
    expected_state: Option<String>,
    shutdown_grace: Duration,
}

impl LoopbackReceiver {
    /// Receiver answering on `/` at `addr`, accepting any `state`.
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            path: "/".to_string(),
            expected_state: None,
            shutdown_grace: SHUTDOWN_GRACE,
        }
    }

    /// Receiver for a client's redirect URI that only accepts `state`.
    pub fn for_client(client: &ClientConfig, state: &str) -> Result<Self> {
        Ok(Self::new(client.loopback_addr()?)
            .with_path(client.redirect_path()?)
            .expecting_state(state))
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };
        self
    }

    /// Reject redirects whose `state` differs from `state`.
    pub fn expecting_state(mut self, state: impl Into<String>) -> Self {
        self.expected_state = Some(state.into());
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Bind the port and start serving on a background task.
    ///
    /// A port already in use is reported as `Error::Bind` right away.
    pub async fn start(self) -> Result<ReceiverHandle> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| Error::Bind(format!("{}: {e}", self.addr)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| Error::Bind(format!("{}: {e}", self.addr)))?;

        let (code_tx, code_rx) = oneshot::channel();
        let shared = Arc::new(Mutex::new(Shared {
            state: ReceiverState::Idle,
            sender: Some(code_tx),
        }));
        // Must be Listening before the first request can be accepted
        transition(&shared, ReceiverEvent::Bound);

        let router = build_router(
            &self.path,
            ReceiverContext {
                shared: shared.clone(),
                expected_state: self.expected_state.map(Arc::from),
            },
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        info!(addr = %local_addr, path = %self.path, "loopback receiver listening");

        Ok(ReceiverHandle {
            local_addr,
            shared,
            code_rx,
            guard: ServerGuard {
                shutdown_tx: Some(shutdown_tx),
                server: Some(server),
                grace: self.shutdown_grace,
            },
        })
    }
}

/// A running receiver. Consumed by `wait_for_code`; dropping it without
/// waiting aborts the server.
pub struct ReceiverHandle {
    local_addr: SocketAddr,
    shared: Arc<Mutex<Shared>>,
    code_rx: oneshot::Receiver<AuthorizationCode>,
    guard: ServerGuard,
}

enum WaitOutcome {
    Received(std::result::Result<AuthorizationCode, oneshot::error::RecvError>),
    TimedOut,
    Cancelled,
}

impl ReceiverHandle {
    /// Address actually bound (useful when started on port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> ReceiverState {
        lock_shared(&self.shared).state
    }

    /// Block until a code arrives or `timeout` elapses, then shut down.
    pub async fn wait_for_code(self, timeout: Duration) -> Result<AuthorizationCode> {
        self.wait_for_code_or_cancel(timeout, std::future::pending::<()>())
            .await
    }

    /// Like `wait_for_code`, but also unwinds when `cancel` completes.
    pub async fn wait_for_code_or_cancel<F>(
        self,
        timeout: Duration,
        cancel: F,
    ) -> Result<AuthorizationCode>
    where
        F: Future<Output = ()>,
    {
        let ReceiverHandle {
            local_addr,
            shared,
            mut code_rx,
            mut guard,
        } = self;

        let outcome = tokio::select! {
            received = &mut code_rx => WaitOutcome::Received(received),
            _ = tokio::time::sleep(timeout) => WaitOutcome::TimedOut,
            _ = cancel => WaitOutcome::Cancelled,
        };

        let (result, action) = settle(&shared, &mut code_rx, outcome, timeout);

        match &result {
            Ok(_) => debug!(addr = %local_addr, "authorization code handed to waiter"),
            Err(Error::Timeout(_)) => {
                warn!(addr = %local_addr, timeout_secs = timeout.as_secs(), "no authorization code before deadline");
            }
            Err(e) => {
                warn!(addr = %local_addr, error = %e, "stopped waiting for authorization code");
            }
        }

        if action == ReceiverAction::Shutdown {
            guard.shutdown().await;
            let (closed, _) = transition(&shared, ReceiverEvent::ShutdownComplete);
            debug!(addr = %local_addr, state = closed.label(), "loopback receiver released port");
        }
        // Any other action leaves the server to ServerGuard::drop, which aborts it

        result
    }
}

/// Feed the end of the wait into the state machine.
///
/// Returns the caller's result and the action the machine asks the driver
/// to take. A deadline that loses the race to the handler (state already
/// `CodeReceived`) still yields the code sitting in the channel.
fn settle(
    shared: &Mutex<Shared>,
    code_rx: &mut oneshot::Receiver<AuthorizationCode>,
    outcome: WaitOutcome,
    timeout: Duration,
) -> (Result<AuthorizationCode>, ReceiverAction) {
    let (event, deadline_error) = match outcome {
        WaitOutcome::Received(Ok(code)) => {
            let (_, action) = transition(shared, ReceiverEvent::ShutdownStarted);
            return (Ok(code), action);
        }
        WaitOutcome::Received(Err(_)) => {
            let (_, action) = transition(shared, ReceiverEvent::WaitCancelled);
            return (
                Err(Error::Http(
                    "loopback receiver closed without delivering a code".into(),
                )),
                action,
            );
        }
        WaitOutcome::TimedOut => (ReceiverEvent::WaitTimedOut, Error::Timeout(timeout)),
        WaitOutcome::Cancelled => (ReceiverEvent::WaitCancelled, Error::Cancelled),
    };

    let (state, action) = transition(shared, event);
    if action == ReceiverAction::Shutdown {
        return (Err(deadline_error), action);
    }

    match (state, code_rx.try_recv()) {
        (ReceiverState::CodeReceived, Ok(code)) => {
            let (_, action) = transition(shared, ReceiverEvent::ShutdownStarted);
            (Ok(code), action)
        }
        _ => (Err(deadline_error), action),
    }
}

/// Owns the server task; shuts it down explicitly or on drop.
struct ServerGuard {
    shutdown_tx: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<std::io::Result<()>>>,
    grace: Duration,
}

impl ServerGuard {
    async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let Some(mut server) = self.server.take() else {
            return;
        };

        match tokio::time::timeout(self.grace, &mut server).await {
            Ok(Ok(Ok(()))) => debug!("loopback receiver drained"),
            Ok(Ok(Err(e))) => warn!(error = %e, "loopback receiver exited with error"),
            Ok(Err(e)) => warn!(error = %e, "loopback receiver task failed"),
            Err(_) => {
                warn!(
                    grace_secs = self.grace.as_secs(),
                    "loopback receiver did not drain in time, aborting"
                );
                server.abort();
                let _ = server.await;
            }
        }
    }
}

impl Drop for ServerGuard {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(server) = self.server.take() {
            server.abort();
        }
    }
}

struct Shared {
    state: ReceiverState,
    sender: Option<oneshot::Sender<AuthorizationCode>>,
}

#[derive(Clone)]
struct ReceiverContext {
    shared: Arc<Mutex<Shared>>,
    expected_state: Option<Arc<str>>,
}

/// Lock the shared state, recovering from poisoning.
fn lock_shared(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| {
        tracing::error!("receiver state mutex poisoned, recovering");
        poisoned.into_inner()
    })
}

/// Apply `event`; returns the new state and the action to perform.
fn transition(shared: &Mutex<Shared>, event: ReceiverEvent) -> (ReceiverState, ReceiverAction) {
    let mut guard = lock_shared(shared);
    let (next, action) = handle_event(guard.state, event);
    guard.state = next;
    (next, action)
}

fn build_router(path: &str, ctx: ReceiverContext) -> Router {
    Router::new()
        .route(path, get(redirect_handler))
        .fallback(not_found)
        .with_state(ctx)
}

/// Query parameters the provider appends to the redirect URI.
#[derive(Debug, Deserialize)]
struct RedirectParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// GET <redirect path>: capture the authorization code.
async fn redirect_handler(
    State(ctx): State<ReceiverContext>,
    Query(params): Query<RedirectParams>,
) -> Response {
    if let Some(error) = params.error {
        warn!(
            error = %error,
            description = params.error_description.as_deref().unwrap_or(""),
            "provider redirected with an authorization error"
        );
        return plain(
            StatusCode::BAD_REQUEST,
            format!("Authorization failed: {error}. Close this window and try again."),
        );
    }

    let Some(code) = params.code.filter(|c| !c.is_empty()) else {
        debug!("redirect request without code");
        return plain(StatusCode::BAD_REQUEST, MISSING_CODE_BODY);
    };

    if let Some(expected) = ctx.expected_state.as_deref()
        && params.state.as_deref() != Some(expected)
    {
        warn!("redirect state mismatch, ignoring request");
        return plain(StatusCode::BAD_REQUEST, STATE_MISMATCH_BODY);
    }

    let mut shared = lock_shared(&ctx.shared);
    let (next, action) = handle_event(shared.state, ReceiverEvent::CodeArrived);
    shared.state = next;

    match action {
        ReceiverAction::DeliverCode => {
            if let Some(tx) = shared.sender.take()
                && tx.send(AuthorizationCode(code)).is_err()
            {
                warn!("waiter dropped before the code was delivered");
            }
            info!("authorization code received");
            plain(StatusCode::OK, SUCCESS_BODY)
        }
        ReceiverAction::RejectDuplicate | ReceiverAction::Shutdown | ReceiverAction::None => {
            match next {
                ReceiverState::CodeReceived | ReceiverState::ShuttingDown => {
                    debug!(state = next.label(), "duplicate redirect rejected");
                    plain(StatusCode::CONFLICT, DUPLICATE_BODY)
                }
                _ => {
                    debug!(state = next.label(), "redirect arrived after the login attempt ended");
                    plain(StatusCode::GONE, EXPIRED_BODY)
                }
            }
        }
    }
}

async fn not_found() -> Response {
    plain(StatusCode::NOT_FOUND, NOT_FOUND_BODY)
}

fn plain(status: StatusCode, body: impl Into<String>) -> Response {
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body.into(),
    )
        .into_response()
}

//! Loopback OAuth2 authorization-code flow
//!
//! Obtains an OAuth credential for a command-line program: reuse the token
//! cached on disk when it is still usable, otherwise send the user to the
//! provider's consent page and catch the redirect on a short-lived local
//! HTTP listener. This crate has no dependency on the binary and never exits
//! the process; every failure comes back as an `Error`.
//!
//! Credential flow:
//! 1. `TokenStore::load()` reads the cached credential (any defect is a miss)
//! 2. `AuthorizationRequest::authorization_url()` builds the consent URL
//! 3. `LoopbackReceiver::start()` listens on the redirect URI's port
//! 4. `ReceiverHandle::wait_for_code()` yields the code or times out
//! 5. `token::exchange_code()` trades the code for tokens
//! 6. `TokenStore::save()` writes them back atomically
//! 7. `CredentialClient` attaches the token to requests, refreshing inline
//!
//! `AuthorizationFlow::obtain_credential()` runs steps 1-6.

pub mod client;
pub mod config;
pub mod constants;
pub mod credential;
pub mod error;
pub mod flow;
pub mod metrics;
pub mod pkce;
pub mod receiver;
pub mod store;
pub mod token;

pub use client::CredentialClient;
pub use config::ClientConfig;
pub use constants::*;
pub use credential::Credential;
pub use error::{Error, Result};
pub use flow::{AuthorizationFlow, AuthorizationRequest, PendingExchange};
pub use receiver::{AuthorizationCode, LoopbackReceiver, ReceiverHandle, ReceiverState};
pub use store::TokenStore;
pub use token::{TokenResponse, exchange_code, refresh_token};

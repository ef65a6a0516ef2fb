//! The cached OAuth credential
//!
//! `expiry` is a unix timestamp in milliseconds (absolute, not a delta),
//! computed at exchange time from `TokenResponse.expires_in` plus the current
//! time. Zero means the provider reported no lifetime.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::token::TokenResponse;

/// Access/refresh token pair as persisted in the token file.
///
/// Never mutated in place: a refresh builds a replacement value.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expiry: u64,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl Credential {
    /// Build a credential from a token endpoint response.
    ///
    /// Refresh responses usually omit `refresh_token`; `previous_refresh`
    /// carries the old one forward in that case.
    pub fn from_token_response(
        response: TokenResponse,
        now_millis: u64,
        previous_refresh: Option<String>,
    ) -> Self {
        let refresh_token = response
            .refresh_token
            .filter(|t| !t.is_empty())
            .or(previous_refresh);
        let expiry = match response.expires_in {
            Some(secs) if secs > 0 => now_millis.saturating_add(secs.saturating_mul(1000)),
            _ => 0,
        };
        let token_type = response
            .token_type
            .filter(|t| !t.is_empty())
            .unwrap_or_else(default_token_type);

        Self {
            access_token: response.access_token,
            token_type,
            refresh_token,
            expiry,
        }
    }

    /// An access token is present.
    pub fn is_valid(&self) -> bool {
        !self.access_token.trim().is_empty()
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty())
    }

    /// True if the access token expires within `window` of `now_millis`.
    pub fn expires_within(&self, window: Duration, now_millis: u64) -> bool {
        self.expiry != 0 && self.expiry <= now_millis.saturating_add(window.as_millis() as u64)
    }

    pub fn is_expired(&self, now_millis: u64) -> bool {
        self.expires_within(Duration::ZERO, now_millis)
    }

    /// Usable without user interaction: valid now, or refreshable.
    pub fn is_usable(&self, now_millis: u64) -> bool {
        self.is_valid() && (!self.is_expired(now_millis) || self.can_refresh())
    }

    /// Value for the `Authorization` header, e.g. `Bearer ya29...`.
    pub fn authorization_header(&self) -> String {
        let scheme = match self.token_type.trim() {
            t if t.is_empty() || t.eq_ignore_ascii_case("bearer") => "Bearer",
            t if t.eq_ignore_ascii_case("mac") => "MAC",
            t if t.eq_ignore_ascii_case("basic") => "Basic",
            t => t,
        };
        format!("{scheme} {}", self.access_token)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expiry", &self.expiry)
            .finish()
    }
}

/// Current wall-clock time as unix milliseconds.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

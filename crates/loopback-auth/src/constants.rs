//! Provider endpoints and flow timing
//!
//! Defaults target Google's installed-application OAuth client. Every endpoint
//! can be overridden through `ClientConfig`, so any provider that speaks the
//! standard authorization-code grant works.

use std::time::Duration;

/// Google's authorization endpoint (user consent page)
pub const AUTHORIZE_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/auth";

/// Google's token endpoint for code exchange and refresh
pub const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

/// Loopback redirect used when the client configuration doesn't name one.
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:8080/";

/// Port given to a loopback redirect URI that doesn't carry one.
pub const DEFAULT_REDIRECT_PORT: u16 = 8080;

/// Upper bound on waiting for the user to finish consent in the browser.
pub const CODE_WAIT_TIMEOUT: Duration = Duration::from_secs(120);

/// How long the loopback listener gets to drain before it is aborted.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Access tokens expiring within this window are refreshed before use.
pub const REFRESH_THRESHOLD: Duration = Duration::from_secs(60);

//! Flow counters
//!
//! Recorded through the `metrics` facade; the embedding process decides
//! whether a recorder is installed. Without one these are no-ops.
//!
//! - `oauth_credential_cache_total` (counter): label `result` (`hit`, `miss`)
//! - `oauth_flow_total` (counter): label `outcome`
//! - `oauth_token_refresh_total` (counter): label `outcome`

/// Record whether the token file satisfied the request.
pub fn record_cache(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    metrics::counter!("oauth_credential_cache_total", "result" => result).increment(1);
}

/// Record how an interactive flow ended (`success`, `timeout`, ...).
pub fn record_flow(outcome: &'static str) {
    metrics::counter!("oauth_flow_total", "outcome" => outcome).increment(1);
}

/// Record the result of a refresh-token grant.
pub fn record_refresh(outcome: &'static str) {
    metrics::counter!("oauth_token_refresh_total", "outcome" => outcome).increment(1);
}

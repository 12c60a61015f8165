//! Shared HTTP client for outbound requests to remote model APIs.
//!
//! Connection pooling is per-client in reqwest, so all adapters share one
//! process-wide client instead of building their own.

use std::time::Duration;

use once_cell::sync::Lazy;
use reqwest::Client;

/// Per-request timeout applied to every remote API call.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .connect_timeout(Duration::from_secs(10))
        .pool_idle_timeout(Duration::from_secs(90))
        .build()
        .expect("failed to build shared HTTP client")
});

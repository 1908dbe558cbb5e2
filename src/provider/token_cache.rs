//! Short-lived bearer token cache
//!
//! MoMo issues access tokens per product (collection, disbursement) that expire
//! after `expires_in` seconds. One `TokenCache` holds the token of one product.
//! The slot mutex is held across a refresh so that concurrent callers wait for a
//! single token request instead of stampeding the token endpoint.

use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use super::ProviderError;

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Cache for one product's bearer token
#[derive(Debug)]
pub(crate) struct TokenCache {
    product: &'static str,
    /// Tokens are treated as expired this long before their real expiry
    margin: Duration,
    slot: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub(crate) fn new(product: &'static str, margin: Duration) -> Self {
        Self {
            product,
            margin,
            slot: Mutex::new(None),
        }
    }

    /// Return the cached token, or run `fetch` to acquire a new one
    ///
    /// `fetch` resolves to the token value and its lifetime.
    pub(crate) async fn get_or_fetch<F, Fut>(&self, fetch: F) -> Result<String, ProviderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(String, Duration), ProviderError>>,
    {
        let mut slot = self.slot.lock().await;

        if let Some(token) = slot.as_ref() {
            if Instant::now() + self.margin < token.expires_at {
                return Ok(token.value.clone());
            }
            debug!(product = self.product, "access token expired, re-acquiring");
        }

        let (value, ttl) = fetch().await?;
        *slot = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + ttl,
        });
        debug!(product = self.product, ttl_secs = ttl.as_secs(), "access token acquired");

        Ok(value)
    }

    /// Drop the cached token if it is still `stale`
    ///
    /// A token refreshed by another task in the meantime is left alone.
    pub(crate) async fn invalidate(&self, stale: &str) {
        let mut slot = self.slot.lock().await;
        if slot.as_ref().is_some_and(|token| token.value == stale) {
            *slot = None;
        }
    }
}

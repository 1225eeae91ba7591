use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Tokens are dropped this long before the provider says they expire.
pub const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct CachedToken {
    pub token: String,
    expires_at: Instant,
}

impl CachedToken {
    /// Returns `None` when the declared lifetime is missing or too short to be
    /// worth caching; such tokens are used once.
    pub fn new(token: String, expires_in_secs: Option<u64>, now: Instant) -> Option<Self> {
        let lifetime = Duration::from_secs(expires_in_secs?);
        let usable = lifetime.checked_sub(EXPIRY_MARGIN)?;
        if usable.is_zero() {
            return None;
        }
        Some(Self {
            token,
            expires_at: now + usable,
        })
    }

    pub fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Single-slot access token cache. Disabled caches never hold a token.
#[derive(Debug)]
pub struct TokenCache {
    enabled: bool,
    slot: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            slot: Mutex::new(None),
        }
    }

    pub async fn get(&self, now: Instant) -> Option<String> {
        let mut slot = self.slot.lock().await;
        match slot.as_ref() {
            Some(cached) if cached.is_fresh(now) => Some(cached.token.clone()),
            Some(_) => {
                *slot = None;
                None
            }
            None => None,
        }
    }

    pub async fn store(&self, token: &str, expires_in_secs: Option<u64>, now: Instant) {
        if !self.enabled {
            return;
        }
        let cached = CachedToken::new(token.to_string(), expires_in_secs, now);
        if cached.is_none() {
            log::debug!(
                "Access token not cached: untrusted lifetime expires_in={:?}",
                expires_in_secs
            );
        }
        *self.slot.lock().await = cached;
    }

    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }
}

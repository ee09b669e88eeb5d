use crate::domain::device::DeviceIdentity;
use crate::domain::ports::{ConnectionTokenProvider, CoordinationBackend};
use crate::domain::token::ConnectionToken;
use crate::error::TokenError;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

#[derive(Default)]
struct CachedToken {
    secret: Option<String>,
    location_id: Option<String>,
}

/// Caches one single-use connection token and the reader location id that
/// came with it.
///
/// A cached secret is handed out at most once. The location id outlives the
/// token and is only replaced by a newer non-empty one.
pub struct ConnectionTokenCache {
    device: DeviceIdentity,
    backend: Arc<dyn CoordinationBackend>,
    state: Mutex<CachedToken>,
    // Held for the whole backend round trip so fetches never run concurrently.
    fetch: tokio::sync::Mutex<()>,
}

impl ConnectionTokenCache {
    pub fn new(device: DeviceIdentity, backend: Arc<dyn CoordinationBackend>) -> Self {
        Self {
            device,
            backend,
            state: Mutex::new(CachedToken::default()),
            fetch: tokio::sync::Mutex::new(()),
        }
    }

    pub fn location_id(&self) -> Option<String> {
        self.lock().location_id.clone()
    }

    pub fn has_cached_token(&self) -> bool {
        self.lock().secret.is_some()
    }

    /// Fetches a token ahead of time so the location id becomes known.
    ///
    /// Does nothing if a token is already cached and the location is known.
    pub async fn prime(&self) -> Result<(), TokenError> {
        let _fetching = self.fetch.lock().await;
        if self.has_cached_token() && self.location_id().is_some() {
            return Ok(());
        }
        let token = self.fetch_fresh().await?;
        let mut state = self.lock();
        remember_location(&mut state, &token);
        state.secret = Some(token.secret);
        Ok(())
    }

    /// Returns the cached token, clearing it, or fetches a fresh one.
    pub async fn request_token(&self) -> Result<String, TokenError> {
        if let Some(secret) = self.take_cached() {
            debug!("handing out cached connection token");
            return Ok(secret);
        }
        let _fetching = self.fetch.lock().await;
        // A prime may have completed while we waited.
        if let Some(secret) = self.take_cached() {
            return Ok(secret);
        }
        let token = self.fetch_fresh().await?;
        remember_location(&mut self.lock(), &token);
        Ok(token.secret)
    }

    fn take_cached(&self) -> Option<String> {
        self.lock().secret.take()
    }

    async fn fetch_fresh(&self) -> Result<ConnectionToken, TokenError> {
        let token = self
            .backend
            .issue_connection_token(&self.device)
            .await
            .map_err(|e| {
                warn!(error = %e, "connection token request failed");
                TokenError::Unavailable(e.to_string())
            })?;
        if token.secret.is_empty() {
            return Err(TokenError::Unavailable("token missing".to_string()));
        }
        info!(has_location = token.location().is_some(), "connection token received");
        Ok(token)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CachedToken> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn remember_location(state: &mut CachedToken, token: &ConnectionToken) {
    match token.location() {
        Some(location) => state.location_id = Some(location.to_owned()),
        None if state.location_id.is_none() => {
            warn!("reader location id missing from token response")
        }
        None => {}
    }
}

#[async_trait]
impl ConnectionTokenProvider for ConnectionTokenCache {
    async fn fetch_connection_token(&self) -> Result<String, TokenError> {
        self.request_token().await
    }
}

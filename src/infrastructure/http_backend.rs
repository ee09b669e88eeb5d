use crate::config::BackendSettings;
use crate::domain::device::DeviceIdentity;
use crate::domain::ports::{CoordinationBackend, HostContextRef};
use crate::domain::session::{NewSession, PaymentSession, PendingSession, SessionUpdate};
use crate::domain::token::ConnectionToken;
use crate::error::BackendError;
use async_trait::async_trait;
use reqwest::header::COOKIE;
use reqwest::{Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequest<'a> {
    device_id: &'a str,
}

#[derive(Deserialize)]
struct SessionEnvelope<T> {
    session: Option<T>,
}

/// Where the next request goes and what it authenticates with.
struct Target {
    base: Url,
    cookie: String,
}

impl Target {
    /// Appends `segments` below the base, percent-encoding each one.
    fn url(&self, segments: &[&str]) -> Result<Url, BackendError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| {
                BackendError::NotReady(format!("origin cannot carry a path: {}", self.base))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

/// `CoordinationBackend` over JSON/HTTP.
///
/// The origin and the `Cookie` credential are resolved from the host on every
/// call, so signing in or switching servers takes effect on the next request.
/// Until both resolve, calls fail with `BackendError::NotReady`.
pub struct HttpBackend {
    client: reqwest::Client,
    host: HostContextRef,
    api_prefix: String,
    origin_timeout: Duration,
}

impl HttpBackend {
    /// # Arguments
    ///
    /// * `settings` - Timeouts and the API path prefix.
    /// * `host` - Supplies the origin and the credential.
    /// * `origin_timeout` - Upper bound on waiting for the host to resolve the origin.
    pub fn new(
        settings: &BackendSettings,
        host: HostContextRef,
        origin_timeout: Duration,
    ) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout())
            .timeout(settings.request_timeout())
            .build()?;
        Ok(Self {
            client,
            host,
            api_prefix: normalize_prefix(&settings.api_prefix),
            origin_timeout,
        })
    }

    async fn target(&self) -> Result<Target, BackendError> {
        let origin = tokio::time::timeout(self.origin_timeout, self.host.resolve_origin())
            .await
            .ok()
            .flatten()
            .map(|origin| origin.trim().trim_end_matches('/').to_owned())
            .filter(|origin| !origin.is_empty())
            .ok_or_else(|| BackendError::NotReady("backend origin unknown".into()))?;
        let cookie = self
            .host
            .credential_for(&origin)
            .filter(|cookie| !cookie.is_empty())
            .ok_or_else(|| BackendError::NotReady(format!("no credential for {origin}")))?;
        let base = Url::parse(&format!("{origin}{}/terminal", self.api_prefix))
            .map_err(|e| BackendError::NotReady(format!("invalid origin {origin}: {e}")))?;
        Ok(Target { base, cookie })
    }
}

#[async_trait]
impl CoordinationBackend for HttpBackend {
    async fn issue_connection_token(
        &self,
        device: &DeviceIdentity,
    ) -> Result<ConnectionToken, BackendError> {
        let target = self.target().await?;
        let response = self
            .client
            .post(target.url(&["token"])?)
            .header(COOKIE, &target.cookie)
            .json(&TokenRequest {
                device_id: device.as_str(),
            })
            .send()
            .await?;
        let body = success_body(response).await?;
        parse(&body)
    }

    async fn claim_next_session(
        &self,
        device: &DeviceIdentity,
    ) -> Result<Option<PaymentSession>, BackendError> {
        let target = self.target().await?;
        let response = self
            .client
            .get(target.url(&["session", "next"])?)
            .query(&[("deviceId", device.as_str())])
            .header(COOKIE, &target.cookie)
            .send()
            .await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let body = success_body(response).await?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        let envelope: SessionEnvelope<PaymentSession> = parse(&body)?;
        Ok(envelope.session)
    }

    async fn update_session(
        &self,
        session_id: &str,
        update: &SessionUpdate,
    ) -> Result<(), BackendError> {
        let target = self.target().await?;
        debug!(session_id = %session_id, status = ?update.status, "patching session");
        let response = self
            .client
            .patch(target.url(&["session", session_id])?)
            .header(COOKIE, &target.cookie)
            .json(update)
            .send()
            .await?;
        success_body(response).await.map(|_| ())
    }

    async fn create_session(&self, request: &NewSession) -> Result<PendingSession, BackendError> {
        let target = self.target().await?;
        let response = self
            .client
            .post(target.url(&["session"])?)
            .header(COOKIE, &target.cookie)
            .json(request)
            .send()
            .await?;
        let body = success_body(response).await?;
        let envelope: SessionEnvelope<PendingSession> = parse(&body)?;
        envelope
            .session
            .ok_or_else(|| BackendError::InvalidPayload("response carries no session".into()))
    }
}

async fn success_body(response: Response) -> Result<String, BackendError> {
    let status = response.status();
    if !status.is_success() {
        return Err(BackendError::Status(status.as_u16()));
    }
    Ok(response.text().await?)
}

fn parse<T: DeserializeOwned>(body: &str) -> Result<T, BackendError> {
    serde_json::from_str(body).map_err(|e| BackendError::InvalidPayload(e.to_string()))
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

use super::device::DeviceIdentity;
use super::events::TerminalEvent;
use super::reader::{ConnectionConfig, DiscoveryConfig, Reader, ReaderEvent};
use super::session::{NewSession, PaymentIntent, PaymentSession, PendingSession, SessionUpdate};
use super::token::ConnectionToken;
use crate::error::{BackendError, SdkError, TokenError};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// The remote coordination service sessions are claimed from and reported to.
#[async_trait]
pub trait CoordinationBackend: Send + Sync {
    async fn issue_connection_token(
        &self,
        device: &DeviceIdentity,
    ) -> Result<ConnectionToken, BackendError>;

    /// Claims the next pending session assigned to `device`, if any.
    async fn claim_next_session(
        &self,
        device: &DeviceIdentity,
    ) -> Result<Option<PaymentSession>, BackendError>;

    async fn update_session(
        &self,
        session_id: &str,
        update: &SessionUpdate,
    ) -> Result<(), BackendError>;

    async fn create_session(&self, request: &NewSession) -> Result<PendingSession, BackendError>;
}

/// Supplies connection tokens to the reader SDK on request.
#[async_trait]
pub trait ConnectionTokenProvider: Send + Sync {
    async fn fetch_connection_token(&self) -> Result<String, TokenError>;
}

/// The card-present reader SDK.
///
/// Every asynchronous operation resolves to a single `Result`. Operations that
/// take a `CancellationToken` must resolve to `SdkError::Canceled` once it fires.
#[async_trait]
pub trait ReaderSdk: Send + Sync {
    fn connected_reader(&self) -> Option<Reader>;

    /// Runs discovery, pushing every reader list update to `updates`, until it
    /// completes or `cancel` fires.
    async fn discover_readers(
        &self,
        config: DiscoveryConfig,
        updates: mpsc::UnboundedSender<Vec<Reader>>,
        cancel: CancellationToken,
    ) -> Result<(), SdkError>;

    /// Connects `reader`. Unsolicited disconnect and auto-reconnect
    /// notifications for the connection are delivered to `listener`.
    async fn connect_reader(
        &self,
        reader: Reader,
        config: ConnectionConfig,
        listener: mpsc::UnboundedSender<ReaderEvent>,
    ) -> Result<Reader, SdkError>;

    async fn retrieve_payment_intent(&self, client_secret: &str)
    -> Result<PaymentIntent, SdkError>;

    async fn collect_payment_method(
        &self,
        intent: PaymentIntent,
        cancel: CancellationToken,
    ) -> Result<PaymentIntent, SdkError>;

    async fn confirm_payment_intent(
        &self,
        intent: PaymentIntent,
        cancel: CancellationToken,
    ) -> Result<PaymentIntent, SdkError>;
}

/// Receives reader-status and session events for the UI layer.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: TerminalEvent);
}

/// The hosting application: knows where the backend lives and holds the
/// authenticated credential for it.
#[async_trait]
pub trait HostContext: Send + Sync {
    /// The current backend origin (`scheme://host[:port]`), if one is known.
    async fn resolve_origin(&self) -> Option<String>;

    /// The `Cookie` header value for `origin`, if the user is signed in.
    fn credential_for(&self, origin: &str) -> Option<String>;
}

pub type BackendBox = Box<dyn CoordinationBackend>;
pub type ReaderSdkRef = Arc<dyn ReaderSdk>;
pub type EventSinkRef = Arc<dyn EventSink>;
pub type HostContextRef = Arc<dyn HostContext>;
pub type TokenProviderRef = Arc<dyn ConnectionTokenProvider>;

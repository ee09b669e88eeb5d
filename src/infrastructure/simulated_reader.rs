use crate::config::SimulatorSettings;
use crate::domain::ports::{ReaderSdk, TokenProviderRef};
use crate::domain::reader::{ConnectionConfig, DiscoveryConfig, Reader, ReaderEvent};
use crate::domain::session::{PaymentIntent, PaymentIntentStatus};
use crate::error::SdkError;
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const SIMULATED_SERIAL: &str = "SIMULATOR-0001";
const SIMULATED_LABEL: &str = "Simulated reader";

struct Connection {
    reader: Reader,
    listener: mpsc::UnboundedSender<ReaderEvent>,
}

/// In-process reader that behaves like the vendor SDK in simulated mode.
///
/// Discovery always finds one reader. Connecting consumes a connection token
/// from the provider. Collecting waits for a simulated card tap.
pub struct SimulatedReader {
    tokens: TokenProviderRef,
    discovery_delay: Duration,
    collect_delay: Duration,
    connection: Mutex<Option<Connection>>,
}

impl SimulatedReader {
    pub fn new(tokens: TokenProviderRef, settings: &SimulatorSettings) -> Self {
        Self {
            tokens,
            discovery_delay: Duration::from_millis(settings.discovery_delay_ms),
            collect_delay: Duration::from_millis(settings.collect_delay_ms),
            connection: Mutex::new(None),
        }
    }

    /// Drops the connection as if the reader went out of range, notifying
    /// the connection's listener.
    pub fn simulate_disconnect(&self, reason: &str) {
        if let Some(connection) = self.connection().take() {
            info!(reason, "simulated reader disconnected");
            let _ = connection.listener.send(ReaderEvent::Disconnected {
                reason: reason.to_owned(),
            });
        }
    }

    /// Runs one auto-reconnect cycle. On failure the connection is dropped.
    pub fn simulate_reconnect(&self, reason: &str, succeeds: bool) {
        let mut guard = self.connection();
        let Some(connection) = guard.as_ref() else {
            return;
        };
        let reader = connection.reader.clone();
        let listener = connection.listener.clone();
        let _ = listener.send(ReaderEvent::ReconnectStarted {
            reader: reader.clone(),
            reason: reason.to_owned(),
        });
        if succeeds {
            let _ = listener.send(ReaderEvent::ReconnectSucceeded { reader });
        } else {
            guard.take();
            let _ = listener.send(ReaderEvent::ReconnectFailed { reader });
        }
    }

    fn connection(&self) -> MutexGuard<'_, Option<Connection>> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn require_connected(&self) -> Result<(), SdkError> {
        if self.connection().is_some() {
            Ok(())
        } else {
            Err(SdkError::NotConnected)
        }
    }
}

/// `pi_123_secret_abc` -> `pi_123`.
fn intent_id_from_secret(client_secret: &str) -> Option<&str> {
    client_secret
        .split_once("_secret_")
        .map(|(id, _)| id)
        .filter(|id| id.starts_with("pi_"))
}

#[async_trait]
impl ReaderSdk for SimulatedReader {
    fn connected_reader(&self) -> Option<Reader> {
        self.connection()
            .as_ref()
            .map(|connection| connection.reader.clone())
    }

    async fn discover_readers(
        &self,
        config: DiscoveryConfig,
        updates: mpsc::UnboundedSender<Vec<Reader>>,
        cancel: CancellationToken,
    ) -> Result<(), SdkError> {
        if !config.simulated {
            return Err(SdkError::failed(
                "only simulated discovery is supported",
            ));
        }
        tokio::select! {
            _ = cancel.cancelled() => return Err(SdkError::Canceled),
            _ = tokio::time::sleep(self.discovery_delay) => {}
        }
        let reader = Reader::new(SIMULATED_SERIAL).with_label(SIMULATED_LABEL);
        let _ = updates.send(vec![reader]);
        Ok(())
    }

    async fn connect_reader(
        &self,
        reader: Reader,
        config: ConnectionConfig,
        listener: mpsc::UnboundedSender<ReaderEvent>,
    ) -> Result<Reader, SdkError> {
        if config.location_id.is_empty() {
            return Err(SdkError::failed("connection requires a location id"));
        }
        self.tokens
            .fetch_connection_token()
            .await
            .map_err(|e| SdkError::failed(e.to_string()))?;
        debug!(
            reader = reader.display_name(),
            location_id = %config.location_id,
            "simulated reader connected"
        );
        *self.connection() = Some(Connection {
            reader: reader.clone(),
            listener,
        });
        Ok(reader)
    }

    async fn retrieve_payment_intent(
        &self,
        client_secret: &str,
    ) -> Result<PaymentIntent, SdkError> {
        self.require_connected()?;
        let id = intent_id_from_secret(client_secret)
            .ok_or_else(|| SdkError::failed("invalid client secret"))?;
        Ok(PaymentIntent {
            id: id.to_owned(),
            status: PaymentIntentStatus::RequiresPaymentMethod,
        })
    }

    async fn collect_payment_method(
        &self,
        intent: PaymentIntent,
        cancel: CancellationToken,
    ) -> Result<PaymentIntent, SdkError> {
        self.require_connected()?;
        if intent.status != PaymentIntentStatus::RequiresPaymentMethod {
            return Err(SdkError::failed("payment intent does not accept a payment method"));
        }
        tokio::select! {
            _ = cancel.cancelled() => return Err(SdkError::Canceled),
            _ = tokio::time::sleep(self.collect_delay) => {}
        }
        self.require_connected()?;
        Ok(PaymentIntent {
            status: PaymentIntentStatus::RequiresConfirmation,
            ..intent
        })
    }

    async fn confirm_payment_intent(
        &self,
        intent: PaymentIntent,
        cancel: CancellationToken,
    ) -> Result<PaymentIntent, SdkError> {
        self.require_connected()?;
        if cancel.is_cancelled() {
            return Err(SdkError::Canceled);
        }
        if intent.status != PaymentIntentStatus::RequiresConfirmation {
            return Err(SdkError::failed("payment intent is not ready for confirmation"));
        }
        Ok(PaymentIntent {
            status: PaymentIntentStatus::Succeeded,
            ..intent
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::ConnectionTokenProvider;
    use crate::error::TokenError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingTokens(AtomicUsize);

    #[async_trait]
    impl ConnectionTokenProvider for CountingTokens {
        async fn fetch_connection_token(&self) -> Result<String, TokenError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok("pst_test".into())
        }
    }

    fn settings() -> SimulatorSettings {
        SimulatorSettings {
            discovery_delay_ms: 500,
            collect_delay_ms: 2_000,
        }
    }

    fn location() -> ConnectionConfig {
        ConnectionConfig {
            location_id: "tml_1".into(),
            auto_reconnect_on_unexpected_disconnect: true,
        }
    }

    async fn connected() -> (
        SimulatedReader,
        Arc<CountingTokens>,
        mpsc::UnboundedReceiver<ReaderEvent>,
    ) {
        let tokens = Arc::new(CountingTokens::default());
        let sdk = SimulatedReader::new(tokens.clone(), &settings());
        let (listener, events) = mpsc::unbounded_channel();
        sdk.connect_reader(Reader::new("r1"), location(), listener)
            .await
            .unwrap();
        (sdk, tokens, events)
    }

    #[test]
    fn test_intent_id_from_secret() {
        assert_eq!(intent_id_from_secret("pi_123_secret_abc"), Some("pi_123"));
        assert_eq!(intent_id_from_secret("pi_123"), None);
        assert_eq!(intent_id_from_secret("seti_1_secret_x"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_yields_one_reader_after_delay() {
        let sdk = SimulatedReader::new(Arc::new(CountingTokens::default()), &settings());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let start = tokio::time::Instant::now();

        sdk.discover_readers(DiscoveryConfig { simulated: true }, tx, CancellationToken::new())
            .await
            .unwrap();

        assert!(start.elapsed() >= Duration::from_millis(500));
        let readers = rx.recv().await.unwrap();
        assert_eq!(readers.len(), 1);
        assert_eq!(readers[0].display_name(), SIMULATED_LABEL);
    }

    #[tokio::test]
    async fn test_discovery_honours_cancel_and_mode() {
        let sdk = SimulatedReader::new(Arc::new(CountingTokens::default()), &settings());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = sdk
            .discover_readers(DiscoveryConfig { simulated: true }, tx.clone(), cancel)
            .await
            .unwrap_err();
        assert_eq!(err, SdkError::Canceled);

        let err = sdk
            .discover_readers(DiscoveryConfig { simulated: false }, tx, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SdkError::Failed { .. }));
    }

    #[tokio::test]
    async fn test_connect_consumes_token_and_requires_location() {
        let (sdk, tokens, _events) = connected().await;
        assert_eq!(tokens.0.load(Ordering::SeqCst), 1);
        assert_eq!(sdk.connected_reader(), Some(Reader::new("r1")));

        let other = SimulatedReader::new(tokens.clone(), &settings());
        let (listener, _rx) = mpsc::unbounded_channel();
        let config = ConnectionConfig {
            location_id: String::new(),
            auto_reconnect_on_unexpected_disconnect: true,
        };
        assert!(other.connect_reader(Reader::new("r2"), config, listener).await.is_err());
        assert!(other.connected_reader().is_none());
    }

    #[tokio::test]
    async fn test_payment_operations_fail_fast_without_reader() {
        let sdk = SimulatedReader::new(Arc::new(CountingTokens::default()), &settings());
        let err = sdk
            .retrieve_payment_intent("pi_1_secret_x")
            .await
            .unwrap_err();
        assert_eq!(err, SdkError::NotConnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_payment_path() {
        let (sdk, _tokens, _events) = connected().await;
        let cancel = CancellationToken::new();

        let intent = sdk.retrieve_payment_intent("pi_9_secret_z").await.unwrap();
        assert_eq!(intent.id, "pi_9");
        let intent = sdk
            .collect_payment_method(intent, cancel.clone())
            .await
            .unwrap();
        assert_eq!(intent.status, PaymentIntentStatus::RequiresConfirmation);
        let intent = sdk.confirm_payment_intent(intent, cancel).await.unwrap();
        assert_eq!(intent.status, PaymentIntentStatus::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_collect_is_cancelable() {
        let (sdk, _tokens, _events) = connected().await;
        let sdk = Arc::new(sdk);
        let intent = sdk.retrieve_payment_intent("pi_2_secret_z").await.unwrap();
        let cancel = CancellationToken::new();

        let task = {
            let sdk = sdk.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { sdk.collect_payment_method(intent, cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        assert_eq!(task.await.unwrap().unwrap_err(), SdkError::Canceled);
    }

    #[tokio::test]
    async fn test_disconnect_and_reconnect_notify_listener() {
        let (sdk, _tokens, mut events) = connected().await;

        sdk.simulate_reconnect("bluetooth", true);
        assert!(matches!(events.recv().await, Some(ReaderEvent::ReconnectStarted { reason, .. }) if reason == "bluetooth"));
        assert!(matches!(events.recv().await, Some(ReaderEvent::ReconnectSucceeded { .. })));
        assert!(sdk.connected_reader().is_some());

        sdk.simulate_disconnect("out of range");
        assert_eq!(
            events.recv().await,
            Some(ReaderEvent::Disconnected {
                reason: "out of range".into()
            })
        );
        assert!(sdk.connected_reader().is_none());
    }
}

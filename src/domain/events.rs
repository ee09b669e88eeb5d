use super::reader::ReaderConnectionState;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Events published to the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TerminalEvent {
    ReaderStatus(ReaderStatusEvent),
    Session(SessionEvent),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReaderStatusEvent {
    pub state: ReaderConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl ReaderStatusEvent {
    pub fn now(state: ReaderConnectionState, message: Option<String>) -> Self {
        Self {
            state,
            message,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionEventStatus {
    Claimed,
    Processing,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEvent {
    pub session_id: String,
    pub status: SessionEventStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl SessionEvent {
    pub fn new(session_id: &str, status: SessionEventStatus) -> Self {
        Self {
            session_id: session_id.to_owned(),
            status,
            message: None,
            intent_id: None,
            amount: None,
            currency: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_intent(mut self, intent_id: impl Into<String>) -> Self {
        self.intent_id = Some(intent_id.into());
        self
    }

    pub fn with_amount(mut self, amount: Option<i64>, currency: Option<String>) -> Self {
        self.amount = amount;
        self.currency = currency;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_status_wire_shape() {
        let event = TerminalEvent::ReaderStatus(ReaderStatusEvent::now(
            ReaderConnectionState::Connected,
            Some("Simulated reader".into()),
        ));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "reader-status");
        assert_eq!(json["state"], "connected");
        assert_eq!(json["message"], "Simulated reader");
        assert!(json["timestamp"].is_i64());
    }

    #[test]
    fn test_session_event_wire_shape() {
        let event = TerminalEvent::Session(
            SessionEvent::new("ps_1", SessionEventStatus::Claimed)
                .with_amount(Some(1250), Some("EUR".into())),
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "session");
        assert_eq!(json["sessionId"], "ps_1");
        assert_eq!(json["status"], "claimed");
        assert_eq!(json["amount"], 1250);
        assert!(json.get("intentId").is_none());
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;

/// A pending payment session claimed from the coordination backend.
///
/// Owned by the active payment flow and dropped once it reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSession {
    pub id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Amount in minor currency units.
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl PaymentSession {
    pub fn client_secret(&self) -> Option<&str> {
        self.client_secret.as_deref().filter(|s| !s.is_empty())
    }
}

/// A session as returned right after creation, before any device claimed it.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSession {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub target_device_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSession {
    pub booking_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_cents: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_device_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    pub id: String,
    pub status: PaymentIntentStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentIntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    Succeeded,
}

/// Status values the backend accepts on a session PATCH.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Processing,
    Succeeded,
    Failed,
}

/// Body of `PATCH /terminal/session/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUpdate {
    pub status: SessionStatus,
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SessionUpdate {
    pub fn processing(device_id: &str) -> Self {
        Self {
            status: SessionStatus::Processing,
            device_id: device_id.to_owned(),
            intent_id: None,
            message: None,
        }
    }

    pub fn succeeded(device_id: &str, intent_id: &str) -> Self {
        Self {
            status: SessionStatus::Succeeded,
            device_id: device_id.to_owned(),
            intent_id: Some(intent_id.to_owned()),
            message: None,
        }
    }

    pub fn failed(device_id: &str, message: &str) -> Self {
        Self {
            status: SessionStatus::Failed,
            device_id: device_id.to_owned(),
            intent_id: None,
            message: Some(message.to_owned()),
        }
    }
}

/// States of one payment flow. `Succeeded` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlowState {
    Claimed,
    NotifiedProcessing,
    Collecting,
    Confirming,
    Succeeded,
    Failed,
}

impl FlowState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

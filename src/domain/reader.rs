use serde::Serialize;
use std::fmt;

/// Connection state of the single tracked reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReaderConnectionState {
    #[default]
    Idle,
    Discovering,
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl ReaderConnectionState {
    /// A discovery or connect attempt is outstanding.
    pub fn is_attempting(self) -> bool {
        matches!(self, Self::Discovering | Self::Connecting)
    }
}

impl fmt::Display for ReaderConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Discovering => "discovering",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reader {
    pub serial_number: String,
    pub label: Option<String>,
}

impl Reader {
    pub fn new(serial_number: impl Into<String>) -> Self {
        Self {
            serial_number: serial_number.into(),
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Human readable name, preferring the label.
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.serial_number)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    pub simulated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub location_id: String,
    pub auto_reconnect_on_unexpected_disconnect: bool,
}

/// Unsolicited notifications the SDK delivers for a connected reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderEvent {
    ReconnectStarted { reader: Reader, reason: String },
    ReconnectSucceeded { reader: Reader },
    ReconnectFailed { reader: Reader },
    Disconnected { reason: String },
}

use serde::Deserialize;

/// Single-use credential the reader SDK authenticates with, plus the reader
/// network location the backend associates with it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionToken {
    pub secret: String,
    #[serde(default)]
    pub location_id: Option<String>,
}

impl ConnectionToken {
    /// The location id, if the backend sent a non-empty one.
    pub fn location(&self) -> Option<&str> {
        self.location_id.as_deref().filter(|id| !id.is_empty())
    }
}

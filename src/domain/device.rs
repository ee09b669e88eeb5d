use serde::Serialize;
use std::fmt;
use std::path::Path;

const DEVICE_PREFIX: &str = "tap2pay-";
const MACHINE_ID_PATH: &str = "/etc/machine-id";

/// Stable identifier of this device towards the coordination backend.
///
/// Derived once at startup and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    /// Derives the identity from an explicit override, falling back to the
    /// host's machine id, then to `unknown`.
    pub fn derive(override_id: Option<&str>) -> Self {
        Self::derive_from(override_id, Path::new(MACHINE_ID_PATH))
    }

    fn derive_from(override_id: Option<&str>, machine_id_path: &Path) -> Self {
        let raw = override_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_owned)
            .or_else(|| {
                std::fs::read_to_string(machine_id_path)
                    .ok()
                    .map(|id| id.trim().to_owned())
                    .filter(|id| !id.is_empty())
            })
            .unwrap_or_else(|| "unknown".to_owned());
        Self::from_raw(&raw)
    }

    fn from_raw(raw: &str) -> Self {
        if raw.starts_with(DEVICE_PREFIX) {
            Self(raw.to_owned())
        } else {
            Self(format!("{DEVICE_PREFIX}{raw}"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_override_is_prefixed_once() {
        assert_eq!(
            DeviceIdentity::derive(Some("abc123")).as_str(),
            "tap2pay-abc123"
        );
        assert_eq!(
            DeviceIdentity::derive(Some("tap2pay-abc123")).as_str(),
            "tap2pay-abc123"
        );
    }

    #[test]
    fn test_falls_back_to_machine_id_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "  feedface  ").unwrap();

        let identity = DeviceIdentity::derive_from(Some("   "), file.path());
        assert_eq!(identity.as_str(), "tap2pay-feedface");
    }

    #[test]
    fn test_unknown_when_nothing_resolves() {
        let identity = DeviceIdentity::derive_from(None, Path::new("/nonexistent/machine-id"));
        assert_eq!(identity.to_string(), "tap2pay-unknown");
    }
}

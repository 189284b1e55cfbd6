use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A monotonic-enough timestamp, measured in milliseconds since the UNIX epoch.
///
/// Exists because `std::time::Instant` has no meaningful representation in
/// wasm32-unknown-unknown outside of `web_sys::Performance`, and because the
/// store façade persists `updatedAt` as a plain millisecond integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Instant(#[serde(with = "millis")] pub(crate) Duration);

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

impl Instant {
    pub fn now() -> Self {
        cfg_if::cfg_if! {
            if #[cfg(all(target_arch = "wasm32", any(feature = "hydrate", feature = "csr")))] {
                let millis = js_sys::Date::now();
                Instant(Duration::from_millis(millis as u64))
            } else {
                let millis = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default();
                Instant(millis)
            }
        }
    }

    pub fn from_millis(millis: u64) -> Self {
        Instant(Duration::from_millis(millis))
    }

    pub fn as_millis(&self) -> u64 {
        self.0.as_millis() as u64
    }

    pub fn elapsed(&self) -> Duration {
        Instant::now().0.saturating_sub(self.0)
    }
}

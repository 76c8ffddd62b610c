use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of one scanner invocation.
///
/// Live scans get a v4 UUID at submission; scans reconstructed from report
/// files reuse the run identifier embedded in the report file name, which is
/// why this wraps a string rather than a `Uuid`.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ScanId(String);

impl ScanId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl Default for ScanId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ScanId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ScanId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<Uuid> for ScanId {
    fn from(value: Uuid) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<str> for ScanId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique_uuids() {
        let a = ScanId::new();
        let b = ScanId::new();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(a.as_str()).is_ok());
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = ScanId::from("20240101_120000");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"20240101_120000\"");
    }
}

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one pipeline run; doubles as the run directory name.
///
/// Generated ids are `<unix-seconds>-<8 hex>` so run dirs list in creation
/// order.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new() -> Self {
        let secs = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("{secs:010}-{}", &suffix[..8]))
    }

    pub fn from_str(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique_and_time_prefixed() {
        let a = RunId::new();
        assert_ne!(a, RunId::new());
        let (secs, suffix) = a.as_str().split_once('-').unwrap();
        assert_eq!(secs.len(), 10);
        assert!(secs.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(suffix.len(), 8);
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = RunId::from_str("run-7");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"run-7\"");
    }
}

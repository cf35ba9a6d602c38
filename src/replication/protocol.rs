use crate::core::KvError;
use crate::storage::{AckOutcome, PendingEntry};
use serde::{Deserialize, Serialize};

pub const NEXT_REPLICATION_KEY_PATH: &str = "/next-replication-key";
pub const DELETE_REPLICATION_KEY_PATH: &str = "/delete-replication-key";

/// Body of `/next-replication-key`. An empty `key` means the queue is empty.
///
/// The JSON body carries text, so only UTF-8 keys and values replicate over HTTP.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct NextKeyValue {
    pub key: String,
    pub value: String,
    /// Set when the leader failed to read its queue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NextKeyValue {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_empty()
    }

    pub fn into_entry(self) -> Option<PendingEntry> {
        if self.is_empty() {
            return None;
        }
        Some(PendingEntry {
            key: self.key.into_bytes(),
            value: self.value.into_bytes(),
        })
    }
}

impl TryFrom<Option<PendingEntry>> for NextKeyValue {
    type Error = KvError;

    fn try_from(entry: Option<PendingEntry>) -> Result<Self, KvError> {
        let Some(entry) = entry else {
            return Ok(Self::empty());
        };
        let key = String::from_utf8(entry.key).map_err(|e| {
            KvError::Serialization(format!(
                "pending key {} is not UTF-8",
                String::from_utf8_lossy(e.as_bytes())
            ))
        })?;
        let value = String::from_utf8(entry.value).map_err(|_| {
            KvError::Serialization(format!("pending value for key {} is not UTF-8", key))
        })?;
        Ok(Self {
            key,
            value,
            error: None,
        })
    }
}

/// What the leader said about an acknowledge request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckStatus {
    /// The pending entry matched and is gone.
    Acknowledged,
    /// The key was rewritten since the fetch; the entry stays queued.
    Mismatch { detail: String },
    /// No pending entry exists any more (acknowledged earlier).
    Missing,
}

impl AckStatus {
    pub(crate) fn from_outcome(outcome: AckOutcome, key: &[u8], expected: &[u8]) -> Self {
        match outcome.into_mismatch_error(key, expected) {
            None => AckStatus::Acknowledged,
            Some(err) => AckStatus::Mismatch {
                detail: err.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_queue_wire_format() {
        let body = serde_json::to_string(&NextKeyValue::empty()).unwrap();
        assert_eq!(body, r#"{"key":"","value":""}"#);

        let parsed: NextKeyValue = serde_json::from_str(&body).unwrap();
        assert!(parsed.into_entry().is_none());
    }

    #[test]
    fn test_entry_without_error_field_parses() {
        let parsed: NextKeyValue = serde_json::from_str(r#"{"key":"foo","value":"bar"}"#).unwrap();
        assert_eq!(
            parsed.into_entry(),
            Some(PendingEntry {
                key: b"foo".to_vec(),
                value: b"bar".to_vec(),
            })
        );
    }

    #[test]
    fn test_non_utf8_entry_is_refused_not_mangled() {
        let entry = PendingEntry {
            key: b"k".to_vec(),
            value: vec![0xff, 0xfe],
        };
        let err = NextKeyValue::try_from(Some(entry)).unwrap_err();
        assert!(matches!(err, KvError::Serialization(msg) if msg.contains("key k")));

        let text = PendingEntry {
            key: b"k".to_vec(),
            value: "v\u{e9}".as_bytes().to_vec(),
        };
        let body = NextKeyValue::try_from(Some(text)).unwrap();
        assert_eq!(body.value, "v\u{e9}");
        assert_eq!(NextKeyValue::try_from(None).unwrap(), NextKeyValue::empty());
    }

    #[test]
    fn test_mismatch_status_names_both_values() {
        let status = AckStatus::from_outcome(
            AckOutcome::Mismatch {
                current: b"new".to_vec(),
            },
            b"k",
            b"old",
        );
        assert_eq!(
            status,
            AckStatus::Mismatch {
                detail: "value mismatch for key k: expected old, got new".to_string()
            }
        );
    }
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum KvError {
    #[error("read-only mode: writes are not accepted on this node")]
    ReadOnly,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("value mismatch for key {key}: expected {expected}, got {actual}")]
    ReplicationMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("routing error: {0}")]
    Routing(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupted store: {0}")]
    Corruption(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

impl KvError {
    /// Errors worth retrying later: the remote side may recover on its own.
    pub fn is_transient(&self) -> bool {
        matches!(self, KvError::Transport(_) | KvError::Routing(_))
    }

    pub(crate) fn not_found_key(key: &[u8]) -> Self {
        KvError::NotFound(format!("key {}", String::from_utf8_lossy(key)))
    }
}

pub type Result<T> = std::result::Result<T, KvError>;

impl<T> From<std::sync::PoisonError<T>> for KvError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<std::io::Error> for KvError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<reqwest::Error> for KvError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Transport(format!("malformed response: {}", err))
        } else {
            Self::Transport(err.to_string())
        }
    }
}

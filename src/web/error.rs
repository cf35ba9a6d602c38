use crate::core::KvError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

pub type WebResult<T> = std::result::Result<T, WebError>;

/// Handler error. Bodies are plain text.
#[derive(Debug)]
pub enum WebError {
    Store(KvError),
    Input(String),
}

impl WebError {
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            WebError::Input(_) => StatusCode::BAD_REQUEST,
            WebError::Store(err) => match err {
                KvError::ReadOnly => StatusCode::FORBIDDEN,
                KvError::NotFound(_) => StatusCode::NOT_FOUND,
                KvError::ReplicationMismatch { .. } => StatusCode::CONFLICT,
                KvError::Routing(_) | KvError::Transport(_) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl From<KvError> for WebError {
    fn from(err: KvError) -> Self {
        WebError::Store(err)
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            WebError::Input(msg) => msg,
            WebError::Store(err) => err.to_string(),
        };
        if status.is_server_error() {
            tracing::error!(%status, error = %message, "request failed");
        }
        (status, message).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = vec![
            (WebError::input("Missing key"), StatusCode::BAD_REQUEST),
            (WebError::from(KvError::ReadOnly), StatusCode::FORBIDDEN),
            (
                WebError::from(KvError::NotFound("key x".to_string())),
                StatusCode::NOT_FOUND,
            ),
            (
                WebError::from(KvError::ReplicationMismatch {
                    key: "k".to_string(),
                    expected: "a".to_string(),
                    actual: "b".to_string(),
                }),
                StatusCode::CONFLICT,
            ),
            (
                WebError::from(KvError::Routing("down".to_string())),
                StatusCode::BAD_GATEWAY,
            ),
            (
                WebError::from(KvError::Transport("timeout".to_string())),
                StatusCode::BAD_GATEWAY,
            ),
            (
                WebError::from(KvError::Io("disk full".to_string())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.status(), expected);
        }
    }
}

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Error taxonomy for the fingerprint pipeline and the HTTP surface.
///
/// `ParseFailure` never escapes the extractor: a file that cannot be parsed
/// as ELF is still fingerprinted, with `parsing_successful` flipped off.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    #[error("upload is missing an original filename")]
    MissingFilename,

    #[error("ELF parse failure: {0}")]
    ParseFailure(String),

    #[error("external tool failure: {0}")]
    ExternalToolFailure(String),

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("missing representation: {0}")]
    NotFound(String),

    #[error("request deadline exceeded")]
    DeadlineExceeded,

    #[error("archive failure: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("database failure: {0}")]
    Database(#[from] sqlx::Error),
}

impl AnalysisError {
    /// Processing failures surface as 400 with the message as body;
    /// storage failures are not the client's fault and map to 500.
    fn status(&self) -> StatusCode {
        match self {
            AnalysisError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for AnalysisError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("request failed: {}", self);
        } else {
            tracing::warn!("request rejected: {}", self);
        }
        (status, self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processing_failures_map_to_bad_request() {
        let err = AnalysisError::InvalidEncoding("truncated blob".into());
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(AnalysisError::MissingFilename.status(), StatusCode::BAD_REQUEST);
        assert_eq!(AnalysisError::DeadlineExceeded.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn storage_failures_map_to_server_error() {
        let err = AnalysisError::Database(sqlx::Error::PoolClosed);
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

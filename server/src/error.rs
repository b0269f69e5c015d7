//! Errors of the paste access protocol and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use burnbin_common::{ErrorBody, ErrorCode};
use tracing::{debug, error};

use crate::password;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum PasteError {
    #[error("Content is required")]
    ContentRequired,
    #[error("Content exceeds maximum length of {max} characters")]
    ContentTooLarge { max: usize },
    #[error("Paste not found")]
    NotFound,
    #[error("Password required")]
    PasswordRequired,
    #[error("Incorrect password")]
    IncorrectPassword,
    #[error("Rate limit exceeded. Please try again tomorrow.")]
    RateLimited,
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] StoreError),
    #[error("Internal error: {0}")]
    Internal(#[from] password::Error),
}

impl PasteError {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::ContentRequired => ErrorCode::ContentRequired,
            Self::ContentTooLarge { .. } => ErrorCode::ContentTooLarge,
            Self::NotFound => ErrorCode::NotFound,
            Self::PasswordRequired => ErrorCode::PasswordRequired,
            Self::IncorrectPassword => ErrorCode::IncorrectPassword,
            Self::RateLimited => ErrorCode::RateLimited,
            Self::StorageUnavailable(_) => ErrorCode::StorageUnavailable,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    pub const fn status(&self) -> StatusCode {
        match self {
            Self::ContentRequired | Self::ContentTooLarge { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::PasswordRequired | Self::IncorrectPassword => StatusCode::UNAUTHORIZED,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::StorageUnavailable(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for PasteError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            error!("{}", self);
            // Don't leak storage details to clients.
            if matches!(self, Self::StorageUnavailable(_)) {
                "Storage is temporarily unavailable".to_string()
            } else {
                "Internal server error".to_string()
            }
        } else {
            debug!("Rejected request: {}", self);
            self.to_string()
        };

        (status, Json(ErrorBody::new(self.code(), message))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use burnbin_common::ErrorCategory;

    use super::*;

    #[test]
    fn statuses_follow_the_contract() {
        assert_eq!(PasteError::ContentRequired.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            PasteError::ContentTooLarge { max: 10 }.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(PasteError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(PasteError::PasswordRequired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(PasteError::IncorrectPassword.status(), StatusCode::UNAUTHORIZED);

        let timeout = PasteError::from(StoreError::Timeout(Duration::from_secs(1)));
        assert_eq!(timeout.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(timeout.code().category(), ErrorCategory::Unavailable);
    }

    #[test]
    fn password_failures_are_told_apart_from_missing_pastes() {
        let codes = [
            PasteError::NotFound.code(),
            PasteError::PasswordRequired.code(),
            PasteError::IncorrectPassword.code(),
        ];
        assert!(codes
            .iter()
            .all(|code| code.category() == ErrorCategory::AccessDenied));
        assert_ne!(codes[1], codes[2]);
        assert_ne!(
            PasteError::NotFound.to_string(),
            PasteError::IncorrectPassword.to_string()
        );
    }
}

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::auth::AuthError;
use crate::tmdb::TmdbError;

/// Failures surfaced to HTTP clients as `{"status":"error","message":...}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("API key is missing.")]
    MissingApiKey,
    #[error("Invalid API key.")]
    InvalidApiKey,
    #[error("{0}")]
    NotFound(String),
    #[error("Failed to fetch movies data. Please try again later.")]
    CatalogueUnavailable,
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("{0}")]
    BadRequest(String),
    /// A request axum could not extract, with the status axum chose for it.
    #[error("{message}")]
    Rejected { status: StatusCode, message: String },
    #[error("Too many requests")]
    TooManyRequests,
    #[error("Internal server error")]
    Internal(anyhow::Error),
}

impl ApiError {
    /// Maps a failed catalogue lookup. Unrecognised failures become `CatalogueUnavailable`.
    pub fn catalogue(err: anyhow::Error) -> Self {
        match err.downcast_ref::<TmdbError>() {
            Some(TmdbError::MissingApiKey) => ApiError::MissingApiKey,
            Some(TmdbError::InvalidApiKey) => ApiError::InvalidApiKey,
            Some(TmdbError::NotFound) => ApiError::NotFound(TmdbError::NotFound.to_string()),
            _ => {
                error!("Catalogue request failed: {:#}", err);
                ApiError::CatalogueUnavailable
            }
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingApiKey => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::InvalidApiKey | ApiError::CatalogueUnavailable => StatusCode::BAD_GATEWAY,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Rejected { status, .. } => *status,
            ApiError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Auth(e) => match e {
                AuthError::MissingFields => StatusCode::BAD_REQUEST,
                AuthError::EmailTaken => StatusCode::CONFLICT,
                AuthError::UnknownUser => StatusCode::NOT_FOUND,
                AuthError::WrongPassword | AuthError::NotSignedIn | AuthError::InvalidToken => {
                    StatusCode::UNAUTHORIZED
                }
            },
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<AuthError>() {
            Ok(auth) => ApiError::Auth(auth),
            Err(err) => {
                error!("Request failed: {:#}", err);
                ApiError::Internal(err)
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Rejected {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::Rejected {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Rejected {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "status": "error",
            "message": self.to_string()
        }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

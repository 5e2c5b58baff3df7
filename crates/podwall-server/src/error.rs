//! HTTP-facing error type for handlers.

use actix_web::HttpResponse;

use crate::sources::SourceError;

#[derive(Debug)]
pub(crate) enum ApiError {
    /// The request is malformed (for example a non-numeric id).
    BadRequest(String),
    /// The identifier does not resolve to stored audio.
    NotFound(String),
    /// An unexpected internal error.
    Internal(String),
}

impl ApiError {
    /// Convert an API error into an HTTP response.
    pub(crate) fn into_response(self) -> HttpResponse {
        match self {
            ApiError::BadRequest(msg) => HttpResponse::BadRequest().body(msg),
            ApiError::NotFound(msg) => HttpResponse::NotFound().body(msg),
            ApiError::Internal(msg) => HttpResponse::InternalServerError().body(msg),
        }
    }
}

impl From<SourceError> for ApiError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::NotFound(_) => ApiError::NotFound(err.to_string()),
            SourceError::UnknownOrigin(_) | SourceError::Io(_) => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

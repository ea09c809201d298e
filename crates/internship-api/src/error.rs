//! Defines the `ApiError` type that can be returned from an API handler, which
//! specifies an HTTP status code and wraps an `anyhow::Error`. It implements
//! `IntoResponse`, allowing handlers to return a `Result<Json<T>, ApiError>`.
//! `From` impls exist for `anyhow::Error`, `Rejection`, and `sqlx::Error` with
//! reasonable default status codes. The http status code can be customized
//! using `ApiErrorExt::with_status` if you need to return a specific response
//! status for a given error.
use super::Rejection;
use axum::http::StatusCode;

pub trait ApiErrorExt {
    /// Sets the given http response status to use when responding with this error.
    fn with_status(self, status: StatusCode) -> ApiError;
}

impl<E: Into<ApiError> + Sized> ApiErrorExt for E {
    fn with_status(self, status: StatusCode) -> ApiError {
        let mut err: ApiError = self.into();
        err.status = status;
        err
    }
}

/// An error response
#[derive(Debug, thiserror::Error, serde::Serialize)]
#[error("status: {status}, error: {error}")]
pub struct ApiError {
    /// The HTTP status code
    #[serde(serialize_with = "serialize_status")]
    pub status: StatusCode,

    /// The error message
    #[serde(serialize_with = "serialize_error")]
    #[source]
    pub error: anyhow::Error,
}

fn serialize_status<S: serde::Serializer>(status: &StatusCode, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u16(status.as_u16())
}

fn serialize_error<S: serde::Serializer>(error: &anyhow::Error, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format!("{error:#}")) // alternate renders nested causes
}

impl ApiError {
    pub fn new(status: StatusCode, error: anyhow::Error) -> ApiError {
        ApiError { status, error }
    }

    pub fn not_found(what: &str) -> ApiError {
        ApiError::new(StatusCode::NOT_FOUND, anyhow::anyhow!("{what} not found"))
    }

    pub fn forbidden(action: &str) -> ApiError {
        ApiError::new(
            StatusCode::FORBIDDEN,
            anyhow::anyhow!("user is not authorized to {action}"),
        )
    }

    fn status_for(err: &anyhow::Error) -> StatusCode {
        // A Rejection or ApiError may have been converted into an anyhow::Error
        // by a `?` before reaching the handler's return.
        if let Some(_rejection) = err.downcast_ref::<Rejection>() {
            return StatusCode::BAD_REQUEST;
        }
        if let Some(api_error) = err.downcast_ref::<ApiError>() {
            return api_error.status;
        }
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(error: sqlx::Error) -> ApiError {
        tracing::error!(?error, "API responding with database error");
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: anyhow::anyhow!("database error, please retry the request"),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        let status = Self::status_for(&error);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(?error, "API responding with internal error");
        }
        ApiError { status, error }
    }
}

impl From<Rejection> for ApiError {
    fn from(value: Rejection) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            error: anyhow::Error::from(value).context("Input validation error"),
        }
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status;
        (status, axum::Json(self)).into_response()
    }
}

/// Whether `err` is a violation of a unique constraint.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

use rocket::http::{ContentType, Status};
use rocket::request::Request;
use rocket::response::{self, Responder, Response};
use rocket::serde::json::{Json, json};
use std::io::Cursor;
use thiserror::Error;

/// Unified error taxonomy for the whole API surface. Every route returns
/// `Result<T, ApiError>` instead of hand-rolled `(Status, Json<Value>)` tuples.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Auth(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("payload too large: {0}")]
    TooLarge(String),
    #[error("insufficient storage: {0}")]
    OutOfStorage(String),
    #[error("temporarily unavailable: {0}")]
    Transient(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> Status {
        match self {
            ApiError::Auth(_) => Status::Unauthorized,
            ApiError::Forbidden(_) => Status::Forbidden,
            ApiError::NotFound(_) => Status::NotFound,
            ApiError::Validation(_) => Status::BadRequest,
            ApiError::Conflict(_) => Status::Conflict,
            ApiError::TooLarge(_) => Status::PayloadTooLarge,
            ApiError::OutOfStorage(_) => Status::InsufficientStorage,
            ApiError::Transient(_) => Status::ServiceUnavailable,
            ApiError::Internal(_) => Status::InternalServerError,
        }
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        let status = self.status();
        if status >= Status::InternalServerError {
            tracing::error!(error = %self, status = status.code, "request failed");
        } else {
            tracing::debug!(error = %self, status = status.code, "request rejected");
        }
        let body = json!({ "error": self.to_string() }).to_string();
        Response::build_from(Json(()).respond_to(req)?)
            .status(status)
            .header(ContentType::JSON)
            .sized_body(body.len(), Cursor::new(body))
            .ok()
    }
}

/// Maps rusqlite errors arising from writes into the taxonomy above. Constraint
/// violations that the call site can't disambiguate default to `Internal`; callers
/// that know the SQL context (e.g. a unique-name insert) should catch
/// `rusqlite::Error` directly and map to `Conflict` themselves instead of relying
/// on this blanket conversion.
impl From<rusqlite::Error> for ApiError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::Error as E;
        use rusqlite::ErrorCode;
        if let E::SqliteFailure(ref sqlite_err, _) = err {
            if sqlite_err.code == ErrorCode::ConstraintViolation {
                return ApiError::Conflict(err.to_string());
            }
            if sqlite_err.code == ErrorCode::DatabaseBusy {
                return ApiError::Transient(err.to_string());
            }
        }
        ApiError::Internal(err.to_string())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

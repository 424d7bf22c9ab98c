use mongodb::error::Error as DbError;
use reqwest::Error as HttpError;
use rocket::{http::Status, response::Responder, serde::json::Json};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Not eligible: {0}")]
    Ineligible(String),
    #[error("You have already voted from this device/network")]
    OriginAlreadyUsed,
    #[error("Busy: {0}")]
    Busy(String),
    #[error("Document verification failed: {0}")]
    Unreadable(String),
    #[error("Unavailable: {0}")]
    Unavailable(String),
}

/// Coarse classification of a failure, independent of transport.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or malformed input. Nothing was mutated; retrying won't help.
    Validation,
    /// The request was well-formed but the caller may not do this now.
    Eligibility,
    /// Someone else holds the resource; retry later.
    Contention,
    /// Store or remote service failure.
    Infrastructure,
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BadRequest(_) | Self::Unreadable(_) => ErrorKind::Validation,
            Self::NotFound(_) | Self::Ineligible(_) | Self::OriginAlreadyUsed => {
                ErrorKind::Eligibility
            }
            Self::Busy(_) => ErrorKind::Contention,
            Self::Db(_) | Self::Http(_) | Self::Io(_) | Self::Unavailable(_) => {
                ErrorKind::Infrastructure
            }
        }
    }

    pub fn status(&self) -> Status {
        match self {
            Self::BadRequest(_) | Self::Unreadable(_) => Status::BadRequest,
            Self::NotFound(_) => Status::NotFound,
            Self::Ineligible(_) | Self::OriginAlreadyUsed => Status::Forbidden,
            Self::Busy(_) => Status::TooManyRequests,
            Self::Unavailable(_) => Status::ServiceUnavailable,
            Self::Db(_) | Self::Http(_) | Self::Io(_) => Status::InternalServerError,
        }
    }

    /// Stable machine-readable code for API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Db(_) => "DATABASE_ERROR",
            Self::Http(_) => "UPSTREAM_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Ineligible(_) => "NOT_ELIGIBLE",
            Self::OriginAlreadyUsed => "ORIGIN_ALREADY_USED",
            Self::Busy(_) => "LOCK_BUSY",
            Self::Unreadable(_) => "DOCUMENT_UNREADABLE",
            Self::Unavailable(_) => "UNAVAILABLE",
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
    code: &'static str,
    kind: ErrorKind,
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r rocket::Request<'_>) -> rocket::response::Result<'o> {
        let status = self.status();
        if self.kind() == ErrorKind::Infrastructure {
            error!("{self}");
        }
        // Don't leak driver internals to clients.
        let message = match self.kind() {
            ErrorKind::Infrastructure => "Internal server error".to_string(),
            _ => self.to_string(),
        };
        let body = ErrorBody {
            message,
            code: self.code(),
            kind: self.kind(),
        };
        (status, Json(body)).respond_to(req)
    }
}

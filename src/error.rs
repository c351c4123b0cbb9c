use log::{error, warn};
use mongodb::error::Error as DbError;
use rocket::{http::Status, response::Responder, serde::json::Json, Request};
use thiserror::Error;

use crate::model::{api::otp::Failure, otp::ParseError, subject::SubjectError};
use crate::notify::NotifyError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("No verification code has been requested for this address")]
    NotFound,
    #[error("Too many codes requested, please restart registration")]
    RateLimited,
    #[error("The code is invalid or has expired")]
    InvalidOrExpired,
    #[error("Failed to deliver verification code: {0}")]
    DeliveryFailed(String),
    #[error("Verification store unavailable: {0}")]
    StoreUnavailable(String),
}

impl Error {
    pub fn status(&self) -> Status {
        match self {
            Self::InvalidInput(_) => Status::BadRequest,
            Self::NotFound => Status::NotFound,
            Self::RateLimited => Status::TooManyRequests,
            Self::InvalidOrExpired => Status::Unauthorized,
            Self::DeliveryFailed(_) => Status::BadGateway,
            Self::StoreUnavailable(_) => Status::ServiceUnavailable,
        }
    }

    /// The message shown to the user. Infrastructure details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::DeliveryFailed(_) => {
                "We could not send your verification code, please try again".to_string()
            }
            Self::StoreUnavailable(_) => {
                "The service is temporarily unavailable, please try again".to_string()
            }
            _ => self.to_string(),
        }
    }
}

impl From<DbError> for Error {
    fn from(err: DbError) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}

impl From<NotifyError> for Error {
    fn from(err: NotifyError) -> Self {
        Self::DeliveryFailed(err.to_string())
    }
}

impl From<SubjectError> for Error {
    fn from(err: SubjectError) -> Self {
        Self::InvalidInput(err.to_string())
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Self {
        Self::InvalidInput(err.to_string())
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> rocket::response::Result<'o> {
        let status = self.status();
        match &self {
            Self::DeliveryFailed(_) | Self::StoreUnavailable(_) => error!("{self}"),
            Self::RateLimited => warn!("{self}"),
            _ => {}
        }
        (status, Json(Failure::new(self.public_message()))).respond_to(req)
    }
}

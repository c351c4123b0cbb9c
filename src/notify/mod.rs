//! Out-of-band delivery of verification codes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{otp::Code, subject::Subject};

pub use self::email::SmtpNotifier;
pub use self::outbox::Outbox;
pub use self::sms::SnsNotifier;

mod email;
mod outbox;
mod sms;

/// Shared handle to whichever notifier the server was built with.
pub type SharedNotifier = Arc<dyn Notifier>;

/// A code on its way to a subject.
#[derive(Debug, Clone)]
pub struct Message {
    pub to: Subject,
    pub code: Code,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Message {
    /// The text sent to the subject.
    pub fn body(&self) -> String {
        let minutes = (self.expires_at - self.issued_at).num_minutes();
        format!(
            "Your OurWill verification code is {}. Requested on {}, it is valid for {} minutes.",
            self.code,
            self.issued_at.format("%d %b %Y at %H:%M UTC"),
            minutes,
        )
    }
}

#[rocket::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &Message) -> Result<(), NotifyError>;
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("no {0} delivery channel is configured")]
    Unsupported(&'static str),
    #[error("SMS delivery failed: {0}")]
    Sms(String),
    #[error(transparent)]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error(transparent)]
    Email(#[from] lettre::error::Error),
    #[error("delivery rejected: {0}")]
    Rejected(String),
    #[error("delivery timed out")]
    Timeout,
}

/// Dispatches each message to the channel matching its subject.
#[derive(Clone, Default)]
pub struct ChannelRouter {
    sms: Option<SnsNotifier>,
    email: Option<SmtpNotifier>,
}

impl ChannelRouter {
    pub fn new(sms: Option<SnsNotifier>, email: Option<SmtpNotifier>) -> Self {
        Self { sms, email }
    }

    pub fn is_empty(&self) -> bool {
        self.sms.is_none() && self.email.is_none()
    }
}

#[rocket::async_trait]
impl Notifier for ChannelRouter {
    async fn send(&self, message: &Message) -> Result<(), NotifyError> {
        match &message.to {
            Subject::Sms(_) => match &self.sms {
                Some(sms) => sms.send(message).await,
                None => Err(NotifyError::Unsupported("SMS")),
            },
            Subject::Email(_) => match &self.email {
                Some(email) => email.send(message).await,
                None => Err(NotifyError::Unsupported("email")),
            },
        }
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::subject::Subject;
use crate::service::Issued;

/// Body of an issue or resend request.
///
/// The subject is kept as a string so that a malformed value is reported
/// with a readable message rather than a generic deserialization failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectRequest {
    pub subject: String,
}

/// Body of a verify request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub subject: String,
    pub code: String,
}

/// Response to a successful issue or resend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueResponse {
    pub success: bool,
    pub subject: Subject,
    pub expires_at: DateTime<Utc>,
    /// Only present when the server is configured to expose codes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl IssueResponse {
    pub fn new(issued: Issued, expose_code: bool) -> Self {
        Self {
            success: true,
            code: expose_code.then(|| issued.code.to_string()),
            subject: issued.subject,
            expires_at: issued.expires_at,
        }
    }
}

/// Response to a successful verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub success: bool,
    pub subject: Subject,
}

impl VerifyResponse {
    pub fn new(subject: Subject) -> Self {
        Self {
            success: true,
            subject,
        }
    }
}

/// Response to any failed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub success: bool,
    pub error: String,
}

impl Failure {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    impl SubjectRequest {
        pub fn example() -> Self {
            Self {
                subject: Subject::example().to_string(),
            }
        }
    }

    impl VerifyRequest {
        pub fn example(code: impl ToString) -> Self {
            Self {
                subject: Subject::example().to_string(),
                code: code.to_string(),
            }
        }
    }
}

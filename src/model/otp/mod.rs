use chrono::{DateTime, Duration, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::{mongodb::Id, subject::Subject};

pub use self::code::{Code, HmacSha256, ParseError, LENGTH as CODE_LENGTH};

pub mod code;

/// A one-time code issued to a subject, as stored in the database.
/// Only the HMAC of the code is kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpRecord {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<Id>,
    pub subject: Subject,
    #[serde(with = "serde_bytes")]
    pub code_hmac: Vec<u8>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub resend_count: u32,
}

impl OtpRecord {
    /// A fresh, unsaved record for `code` that stays valid for `ttl`.
    pub fn new(subject: Subject, code_hmac: Vec<u8>, ttl: Duration) -> Self {
        let created_at = Utc::now();
        Self {
            id: None,
            subject,
            code_hmac,
            created_at,
            expires_at: created_at + ttl,
            used: false,
            resend_count: 0,
        }
    }

    /// Whether the record could still be redeemed at `now`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.used && self.expires_at >= now
    }
}

/// The fields overwritten when a code is reissued.
#[derive(Debug, Clone)]
pub struct Reissue {
    pub code_hmac: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Reissue {
    pub fn new(code_hmac: Vec<u8>, ttl: Duration) -> Self {
        let created_at = Utc::now();
        Self {
            code_hmac,
            created_at,
            expires_at: created_at + ttl,
        }
    }

    /// Apply to a record in place. Callers are responsible for the resend cap.
    pub fn apply(self, record: &mut OtpRecord) {
        record.code_hmac = self.code_hmac;
        record.created_at = self.created_at;
        record.expires_at = self.expires_at;
        record.used = false;
        record.resend_count += 1;
    }
}

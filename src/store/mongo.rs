use chrono::{DateTime, Duration, Utc};
use mongodb::{
    bson::{doc, spec::BinarySubtype, Binary, Bson, Document},
    options::{FindOneAndUpdateOptions, FindOneOptions, ReturnDocument},
    Database,
};

use crate::error::{Error, Result};
use crate::model::{
    mongodb::{Coll, Id},
    otp::{OtpRecord, Reissue},
    subject::Subject,
};

use super::OtpStore;

/// OTP records kept in the `otps` MongoDB collection.
#[derive(Clone)]
pub struct MongoOtpStore {
    otps: Coll<OtpRecord>,
}

impl MongoOtpStore {
    pub fn new(db: &Database) -> Self {
        Self {
            otps: Coll::from_db(db),
        }
    }
}

/// Digests are stored as generic binary, matching `OtpRecord::code_hmac`.
fn hmac_bson(code_hmac: &[u8]) -> Bson {
    Bson::Binary(Binary {
        subtype: BinarySubtype::Generic,
        bytes: code_hmac.to_vec(),
    })
}

fn newest_first() -> Document {
    doc! { "created_at": -1 }
}

#[rocket::async_trait]
impl OtpStore for MongoOtpStore {
    async fn insert(&self, mut record: OtpRecord) -> Result<OtpRecord> {
        let id = self
            .otps
            .insert_one(&record, None)
            .await?
            .inserted_id
            .as_object_id()
            .ok_or_else(|| {
                Error::StoreUnavailable("inserted OTP was not given an object ID".to_string())
            })?;
        record.id = Some(id.into());
        Ok(record)
    }

    async fn latest(&self, subject: &Subject) -> Result<Option<OtpRecord>> {
        let options = FindOneOptions::builder().sort(newest_first()).build();
        let record = self
            .otps
            .find_one(doc! { "subject": subject }, options)
            .await?;
        Ok(record)
    }

    async fn expire_outstanding(&self, subject: &Subject, now: DateTime<Utc>) -> Result<u64> {
        let outstanding = doc! {
            "subject": subject,
            "used": false,
            "expires_at": { "$gte": now },
        };
        let expired_at = now - Duration::milliseconds(1);
        let update = doc! {
            "$set": { "expires_at": expired_at }
        };
        let result = self.otps.update_many(outstanding, update, None).await?;
        Ok(result.modified_count)
    }

    async fn reissue(
        &self,
        id: Id,
        max_resends: u32,
        reissue: Reissue,
    ) -> Result<Option<OtpRecord>> {
        let mut below_cap = id.as_doc();
        below_cap.insert("resend_count", doc! { "$lt": i64::from(max_resends) });
        let update = doc! {
            "$set": {
                "code_hmac": hmac_bson(&reissue.code_hmac),
                "created_at": reissue.created_at,
                "expires_at": reissue.expires_at,
                "used": false,
            },
            "$inc": { "resend_count": 1 },
        };
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        let record = self
            .otps
            .find_one_and_update(below_cap, update, options)
            .await?;
        Ok(record)
    }

    async fn redeem(
        &self,
        subject: &Subject,
        code_hmac: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<OtpRecord>> {
        let live = doc! {
            "subject": subject,
            "code_hmac": hmac_bson(code_hmac),
            "used": false,
            "expires_at": { "$gte": now },
        };
        let update = doc! {
            "$set": { "used": true }
        };
        let options = FindOneAndUpdateOptions::builder()
            .sort(newest_first())
            .return_document(ReturnDocument::After)
            .build();
        let record = self.otps.find_one_and_update(live, update, options).await?;
        Ok(record)
    }
}

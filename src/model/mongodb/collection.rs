use std::ops::Deref;
use std::time::Duration;

use log::debug;
use mongodb::{
    bson::doc, error::Error as DbError, options::IndexOptions, Collection, Database, IndexModel,
};

use crate::model::otp::OtpRecord;

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `Derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// OTP collection
const OTPS: &str = "otps";
impl MongoCollection for OtpRecord {
    const NAME: &'static str = OTPS;
}

/// Ensure that all the required indexes exist on the given database.
/// Expired OTP records are removed by the server `retention` after they expire.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database, retention: Duration) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let otps = Coll::<OtpRecord>::from_db(db);

    // Most-recent-first lookups by subject.
    let recency_index = IndexModel::builder()
        .keys(doc! {"subject": 1, "created_at": -1})
        .build();
    otps.create_index(recency_index, None).await?;

    // Retention sweep.
    let ttl = IndexOptions::builder().expire_after(retention).build();
    let expiry_index = IndexModel::builder()
        .keys(doc! {"expires_at": 1})
        .options(ttl)
        .build();
    otps.create_index(expiry_index, None).await?;

    Ok(())
}

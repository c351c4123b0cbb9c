//! Persistence for OTP records.
//!
//! Every mutation that guards an invariant (the resend cap, single redemption)
//! is a single conditional update, so implementations must apply the filter and
//! the update atomically.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{
    mongodb::Id,
    otp::{OtpRecord, Reissue},
    subject::Subject,
};

pub use self::memory::MemoryOtpStore;
pub use self::mongo::MongoOtpStore;

mod memory;
mod mongo;

/// Shared handle to whichever store the server was built with.
pub type SharedStore = Arc<dyn OtpStore>;

#[rocket::async_trait]
pub trait OtpStore: Send + Sync {
    /// Persist a new record, returning it with its assigned ID.
    async fn insert(&self, record: OtpRecord) -> Result<OtpRecord>;

    /// The most recently created record for the subject, if any.
    async fn latest(&self, subject: &Subject) -> Result<Option<OtpRecord>>;

    /// Expire every record of the subject that is still redeemable at `now`,
    /// so that none of them is redeemable from `now` on.
    /// Returns how many were expired.
    async fn expire_outstanding(&self, subject: &Subject, now: DateTime<Utc>) -> Result<u64>;

    /// Overwrite the record's code iff its resend count is below `max_resends`.
    /// Returns the updated record, or `None` if the cap was already reached.
    async fn reissue(&self, id: Id, max_resends: u32, reissue: Reissue)
        -> Result<Option<OtpRecord>>;

    /// Mark the most recent live record with the given code digest as used.
    /// Returns the redeemed record, or `None` if nothing matched.
    async fn redeem(
        &self,
        subject: &Subject,
        code_hmac: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<OtpRecord>>;
}

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};

use crate::error::{Error, Result};
use crate::model::{
    mongodb::Id,
    otp::{OtpRecord, Reissue},
    subject::Subject,
};

use super::OtpStore;

/// An in-process store. Each operation holds the lock for its whole
/// read-modify-write, which gives it the same atomicity as a conditional
/// database update.
///
/// Clones share the same records.
#[derive(Debug, Clone, Default)]
pub struct MemoryOtpStore {
    records: Arc<Mutex<Vec<OtpRecord>>>,
    operations: Arc<AtomicUsize>,
}

impl MemoryOtpStore {
    /// Number of store operations performed so far.
    pub fn operations(&self) -> usize {
        self.operations.load(Ordering::SeqCst)
    }

    /// A snapshot of every record, oldest first.
    pub fn records(&self) -> Vec<OtpRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<OtpRecord>>> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        self.records
            .lock()
            .map_err(|_| Error::StoreUnavailable("in-memory store lock poisoned".to_string()))
    }
}

/// The most recent record of `subject` satisfying `filter`.
fn newest<'a>(
    records: &'a mut [OtpRecord],
    subject: &Subject,
    filter: impl Fn(&OtpRecord) -> bool,
) -> Option<&'a mut OtpRecord> {
    records
        .iter_mut()
        .filter(|record| &record.subject == subject && filter(record))
        .max_by_key(|record| record.created_at)
}

#[rocket::async_trait]
impl OtpStore for MemoryOtpStore {
    async fn insert(&self, mut record: OtpRecord) -> Result<OtpRecord> {
        let mut records = self.lock()?;
        record.id = Some(Id::new());
        records.push(record.clone());
        Ok(record)
    }

    async fn latest(&self, subject: &Subject) -> Result<Option<OtpRecord>> {
        let mut records = self.lock()?;
        Ok(newest(&mut records, subject, |_| true).map(|record| record.clone()))
    }

    async fn expire_outstanding(&self, subject: &Subject, now: DateTime<Utc>) -> Result<u64> {
        let mut records = self.lock()?;
        let expired_at = now - Duration::milliseconds(1);
        let mut expired = 0;
        for record in records
            .iter_mut()
            .filter(|record| &record.subject == subject && record.is_live(now))
        {
            record.expires_at = expired_at;
            expired += 1;
        }
        Ok(expired)
    }

    async fn reissue(
        &self,
        id: Id,
        max_resends: u32,
        reissue: Reissue,
    ) -> Result<Option<OtpRecord>> {
        let mut records = self.lock()?;
        let record = records
            .iter_mut()
            .find(|record| record.id == Some(id) && record.resend_count < max_resends);
        Ok(record.map(|record| {
            reissue.apply(record);
            record.clone()
        }))
    }

    async fn redeem(
        &self,
        subject: &Subject,
        code_hmac: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<OtpRecord>> {
        let mut records = self.lock()?;
        let record = newest(&mut records, subject, |record| {
            record.code_hmac == code_hmac && record.is_live(now)
        });
        Ok(record.map(|record| {
            record.used = true;
            record.clone()
        }))
    }
}

/// Test helpers.
#[cfg(test)]
mod examples {
    use super::*;

    impl MemoryOtpStore {
        /// Move every record of the subject `by` into the past.
        pub fn backdate(&self, subject: &Subject, by: Duration) {
            let mut records = self.records.lock().unwrap();
            for record in records.iter_mut().filter(|r| &r.subject == subject) {
                record.created_at = record.created_at - by;
                record.expires_at = record.expires_at - by;
            }
        }

        /// Force the resend count of the subject's latest record.
        pub fn set_resend_count(&self, subject: &Subject, count: u32) {
            let mut records = self.records.lock().unwrap();
            if let Some(record) = newest(&mut records, subject, |_| true) {
                record.resend_count = count;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(subject: Subject, hmac: u8) -> OtpRecord {
        OtpRecord::new(subject, vec![hmac], Duration::minutes(15))
    }

    #[rocket::async_test]
    async fn latest_is_most_recent() {
        let store = MemoryOtpStore::default();
        assert!(store.latest(&Subject::example()).await.unwrap().is_none());

        let first = store.insert(record(Subject::example(), 1)).await.unwrap();
        let mut second = record(Subject::example(), 2);
        second.created_at = first.created_at + Duration::seconds(1);
        let second = store.insert(second).await.unwrap();
        store.insert(record(Subject::example2(), 3)).await.unwrap();

        let latest = store.latest(&Subject::example()).await.unwrap().unwrap();
        assert_eq!(latest.id, second.id);
    }

    #[rocket::async_test]
    async fn redeem_only_once() {
        let store = MemoryOtpStore::default();
        store.insert(record(Subject::example(), 7)).await.unwrap();
        let now = Utc::now();

        assert!(store
            .redeem(&Subject::example(), &[8], now)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .redeem(&Subject::example2(), &[7], now)
            .await
            .unwrap()
            .is_none());

        let redeemed = store.redeem(&Subject::example(), &[7], now).await.unwrap();
        assert!(redeemed.unwrap().used);
        assert!(store
            .redeem(&Subject::example(), &[7], now)
            .await
            .unwrap()
            .is_none());
    }

    #[rocket::async_test]
    async fn reissue_respects_cap() {
        let store = MemoryOtpStore::default();
        let id = store
            .insert(record(Subject::example(), 1))
            .await
            .unwrap()
            .id
            .unwrap();

        for expected in 1..=2 {
            let reissue = Reissue::new(vec![expected as u8 + 1], Duration::minutes(15));
            let record = store.reissue(id, 2, reissue).await.unwrap().unwrap();
            assert_eq!(record.resend_count, expected);
        }

        let reissue = Reissue::new(vec![9], Duration::minutes(15));
        assert!(store.reissue(id, 2, reissue).await.unwrap().is_none());
        let reissue = Reissue::new(vec![9], Duration::minutes(15));
        assert!(store.reissue(Id::new(), 2, reissue).await.unwrap().is_none());
    }

    #[rocket::async_test]
    async fn expire_outstanding_only_touches_live_records() {
        let store = MemoryOtpStore::default();
        store.insert(record(Subject::example(), 1)).await.unwrap();
        store.insert(record(Subject::example(), 2)).await.unwrap();
        store.insert(record(Subject::example2(), 3)).await.unwrap();
        let now = Utc::now();
        store.redeem(&Subject::example(), &[1], now).await.unwrap();

        let expired = store
            .expire_outstanding(&Subject::example(), now)
            .await
            .unwrap();
        assert_eq!(expired, 1);

        assert!(store
            .redeem(&Subject::example(), &[2], now)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .redeem(&Subject::example2(), &[3], now)
            .await
            .unwrap()
            .is_some());
    }
}

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info, warn};
use rocket::{
    fairing::{Fairing, Info, Kind},
    tokio::time::timeout,
    Build, Rocket,
};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{
    otp::{Code, OtpRecord, Reissue},
    subject::Subject,
};
use crate::notify::{
    ChannelRouter, Message, NotifyError, SharedNotifier, SmtpNotifier, SnsNotifier,
};
use crate::store::SharedStore;

/// Limits applied to every code.
#[derive(Debug, Clone)]
pub struct OtpPolicy {
    pub ttl: Duration,
    pub max_resends: u32,
    pub delivery_timeout: std::time::Duration,
}

impl From<&Config> for OtpPolicy {
    fn from(config: &Config) -> Self {
        Self {
            ttl: config.otp_ttl(),
            max_resends: config.max_resends(),
            delivery_timeout: config.delivery_timeout(),
        }
    }
}

/// A code that has been stored and delivered.
#[derive(Debug, Clone)]
pub struct Issued {
    pub subject: Subject,
    pub code: Code,
    pub expires_at: DateTime<Utc>,
}

/// Issues, reissues and verifies one-time codes.
///
/// The store and the delivery channel are injected, so the same logic runs
/// against MongoDB and SNS/SMTP in production and in-memory fakes in tests.
pub struct OtpService {
    store: SharedStore,
    notifier: SharedNotifier,
    policy: OtpPolicy,
    hmac_secret: Vec<u8>,
}

impl OtpService {
    pub fn new(
        store: SharedStore,
        notifier: SharedNotifier,
        policy: OtpPolicy,
        hmac_secret: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            store,
            notifier,
            policy,
            hmac_secret: hmac_secret.into(),
        }
    }

    /// Issue a fresh code to the subject, expiring any code it still holds.
    pub async fn issue(&self, subject: &Subject) -> Result<Issued> {
        let code = Code::random();
        let record = OtpRecord::new(
            subject.clone(),
            code.hmac(subject, &self.hmac_secret),
            self.policy.ttl,
        );

        let superseded = self
            .store
            .expire_outstanding(subject, record.created_at)
            .await?;
        if superseded > 0 {
            debug!("Expired {superseded} outstanding code(s) before issuing a new one");
        }
        let record = self.store.insert(record).await?;
        info!("Issued OTP {}", display_id(&record));

        self.deliver(&record, code).await?;
        Ok(Issued {
            subject: record.subject,
            code,
            expires_at: record.expires_at,
        })
    }

    /// Replace the subject's latest code with a new one, up to the resend cap.
    pub async fn resend(&self, subject: &Subject) -> Result<Issued> {
        let latest = self.store.latest(subject).await?.ok_or(Error::NotFound)?;
        let id = latest.id.ok_or_else(|| {
            Error::StoreUnavailable("stored OTP record has no ID".to_string())
        })?;
        if latest.resend_count >= self.policy.max_resends {
            return Err(Error::RateLimited);
        }

        let code = Code::random();
        let reissue = Reissue::new(code.hmac(subject, &self.hmac_secret), self.policy.ttl);
        // The cap is enforced again by the conditional update, in case another
        // resend got there first.
        let record = self
            .store
            .reissue(id, self.policy.max_resends, reissue)
            .await?
            .ok_or(Error::RateLimited)?;
        info!(
            "Reissued OTP {id} ({}/{})",
            record.resend_count, self.policy.max_resends
        );

        self.deliver(&record, code).await?;
        Ok(Issued {
            subject: record.subject,
            code,
            expires_at: record.expires_at,
        })
    }

    /// Redeem `candidate` for the subject. Succeeds at most once per code.
    ///
    /// Wrong, expired and already used codes all fail with
    /// [`Error::InvalidOrExpired`]; the actual reason is only logged.
    pub async fn verify(&self, subject: &Subject, candidate: &str) -> Result<Subject> {
        let code: Code = candidate.parse()?;
        let now = Utc::now();

        let digest = code.hmac(subject, &self.hmac_secret);
        match self.store.redeem(subject, &digest, now).await? {
            Some(record) => {
                info!("Verified OTP {}", display_id(&record));
                Ok(record.subject)
            }
            None => {
                self.log_rejection(subject, &digest, now).await;
                Err(Error::InvalidOrExpired)
            }
        }
    }

    async fn deliver(&self, record: &OtpRecord, code: Code) -> Result<()> {
        let message = Message {
            to: record.subject.clone(),
            code,
            issued_at: record.created_at,
            expires_at: record.expires_at,
        };
        let sent = match timeout(self.policy.delivery_timeout, self.notifier.send(&message)).await
        {
            Ok(sent) => sent,
            Err(_) => Err(NotifyError::Timeout),
        };
        if let Err(ref e) = sent {
            error!("Delivery of OTP {} failed: {e}", display_id(record));
        }
        sent.map_err(Into::into)
    }

    /// Work out why a verification failed, for the logs only.
    async fn log_rejection(&self, subject: &Subject, digest: &[u8], now: DateTime<Utc>) {
        let reason = match self.store.latest(subject).await {
            Ok(None) => "no code issued",
            Ok(Some(latest)) if latest.code_hmac != digest => "wrong code",
            Ok(Some(latest)) if latest.used => "already used",
            Ok(Some(latest)) if latest.expires_at < now => "expired",
            Ok(Some(_)) => "lost a race with another verification",
            Err(e) => {
                warn!("Could not inspect rejected verification: {e}");
                return;
            }
        };
        debug!("Rejected OTP verification: {reason}");
    }
}

fn display_id(record: &OtpRecord) -> String {
    record
        .id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "<unsaved>".to_string())
}

/// A fairing that assembles the `OtpService` from the managed config, store
/// and notifiers, and places it into managed state.
///
/// A `SharedNotifier` already in managed state takes precedence; otherwise
/// the configured SNS and SMTP notifiers are combined by subject kind.
/// This fairing must be attached after those that provide its dependencies.
pub struct OtpServiceFairing;

#[rocket::async_trait]
impl Fairing for OtpServiceFairing {
    fn info(&self) -> Info {
        Info {
            name: "OTP Service",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let config = match rocket.state::<Config>() {
            Some(config) => config,
            None => {
                error!("Application config was not available when building the OTP service");
                return Err(rocket);
            }
        };
        let store = match rocket.state::<SharedStore>() {
            Some(store) => store.clone(),
            None => {
                error!("No OTP store was available when building the OTP service");
                return Err(rocket);
            }
        };
        let notifier = match rocket.state::<SharedNotifier>() {
            Some(notifier) => notifier.clone(),
            None => {
                let router = ChannelRouter::new(
                    rocket.state::<SnsNotifier>().cloned(),
                    rocket.state::<SmtpNotifier>().cloned(),
                );
                if router.is_empty() {
                    warn!("No delivery channel is configured, every issue will fail");
                }
                Arc::new(router)
            }
        };

        let service = OtpService::new(
            store,
            notifier,
            OtpPolicy::from(config),
            config.hmac_secret(),
        );
        Ok(rocket.manage(service))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use rocket::tokio;

    use crate::notify::Outbox;
    use crate::store::{MemoryOtpStore, OtpStore};

    use super::*;

    fn policy() -> OtpPolicy {
        OtpPolicy {
            ttl: Duration::minutes(15),
            max_resends: 3,
            delivery_timeout: std::time::Duration::from_millis(200),
        }
    }

    fn service() -> (OtpService, MemoryOtpStore, Outbox) {
        let store = MemoryOtpStore::default();
        let outbox = Outbox::default();
        let service = OtpService::new(
            Arc::new(store.clone()),
            Arc::new(outbox.clone()),
            policy(),
            "test secret",
        );
        (service, store, outbox)
    }

    #[rocket::async_test]
    async fn issue_then_verify_once() {
        let (service, store, outbox) = service();
        let alice = Subject::example();

        let issued = service.issue(&alice).await.unwrap();
        let code = issued.code.to_string();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(outbox.last_for(&alice).unwrap().code, issued.code);

        // Only the digest is stored.
        let record = store.latest(&alice).await.unwrap().unwrap();
        assert!(!record.used);
        assert_eq!(record.resend_count, 0);
        assert_ne!(record.code_hmac, code.as_bytes());

        assert_eq!(service.verify(&alice, &code).await.unwrap(), alice);
        assert!(matches!(
            service.verify(&alice, &code).await,
            Err(Error::InvalidOrExpired)
        ));
    }

    #[rocket::async_test]
    async fn wrong_code_and_wrong_subject_fail() {
        let (service, _, _) = service();
        let issued = service.issue(&Subject::example()).await.unwrap();
        let wrong = if issued.code.to_string() == "000000" {
            "000001"
        } else {
            "000000"
        };

        assert!(matches!(
            service.verify(&Subject::example(), wrong).await,
            Err(Error::InvalidOrExpired)
        ));
        assert!(matches!(
            service
                .verify(&Subject::example2(), &issued.code.to_string())
                .await,
            Err(Error::InvalidOrExpired)
        ));
        // The right code still works afterwards.
        assert!(service
            .verify(&Subject::example(), &issued.code.to_string())
            .await
            .is_ok());
    }

    #[rocket::async_test]
    async fn malformed_code_is_rejected_before_lookup() {
        let (service, store, _) = service();
        let issued = service.issue(&Subject::example()).await.unwrap();
        let operations = store.operations();

        let padded = format!(" {}", issued.code);
        let newline = format!("{}\n", issued.code);
        for candidate in ["1234", "1234567", "12345a", "", "  123456", "123456\n"] {
            assert!(matches!(
                service.verify(&Subject::example(), candidate).await,
                Err(Error::InvalidInput(_))
            ));
        }
        // Padding is not stripped, even around the right code.
        for candidate in [padded, newline] {
            assert!(matches!(
                service.verify(&Subject::example(), &candidate).await,
                Err(Error::InvalidInput(_))
            ));
        }
        assert_eq!(store.operations(), operations);
    }

    #[rocket::async_test]
    async fn expired_code_fails() {
        let (service, store, _) = service();
        let alice = Subject::example();
        let issued = service.issue(&alice).await.unwrap();

        store.backdate(&alice, Duration::minutes(16));

        assert!(matches!(
            service.verify(&alice, &issued.code.to_string()).await,
            Err(Error::InvalidOrExpired)
        ));
    }

    #[rocket::async_test]
    async fn resend_without_issue_is_not_found() {
        let (service, _, outbox) = service();
        assert!(matches!(
            service.resend(&Subject::example2()).await,
            Err(Error::NotFound)
        ));
        assert!(outbox.messages().is_empty());
    }

    #[rocket::async_test]
    async fn fourth_resend_is_rate_limited() {
        let (service, store, outbox) = service();
        let bob = Subject::example2();
        service.issue(&bob).await.unwrap();

        for count in 1..=3 {
            service.resend(&bob).await.unwrap();
            assert_eq!(
                store.latest(&bob).await.unwrap().unwrap().resend_count,
                count
            );
        }
        assert!(matches!(service.resend(&bob).await, Err(Error::RateLimited)));

        // One issue plus three resends were delivered.
        assert_eq!(outbox.messages().len(), 4);
        // Resends overwrite the single record.
        assert_eq!(store.records().len(), 1);
    }

    #[rocket::async_test]
    async fn resend_replaces_previous_code() {
        let (service, _, _) = service();
        let alice = Subject::example();
        let first = service.issue(&alice).await.unwrap();
        let mut second = service.resend(&alice).await.unwrap();
        // Codes are random; make sure they differ for the check below.
        while second.code == first.code {
            second = service.resend(&alice).await.unwrap();
        }

        assert!(matches!(
            service.verify(&alice, &first.code.to_string()).await,
            Err(Error::InvalidOrExpired)
        ));
        assert!(service
            .verify(&alice, &second.code.to_string())
            .await
            .is_ok());
    }

    #[rocket::async_test]
    async fn reissue_supersedes_earlier_codes() {
        let (service, store, _) = service();
        let alice = Subject::example();
        let first = service.issue(&alice).await.unwrap();
        let second = service.issue(&alice).await.unwrap();

        assert_eq!(store.records().len(), 2);
        if first.code != second.code {
            assert!(matches!(
                service.verify(&alice, &first.code.to_string()).await,
                Err(Error::InvalidOrExpired)
            ));
        }
        assert!(service
            .verify(&alice, &second.code.to_string())
            .await
            .is_ok());
    }

    #[test]
    fn concurrent_resends_at_cap_minus_one() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            for _ in 0..20 {
                let (service, store, _) = service();
                let service = Arc::new(service);
                let bob = Subject::example2();
                service.issue(&bob).await.unwrap();
                store.set_resend_count(&bob, 2);

                let handles: Vec<_> = (0..2)
                    .map(|_| {
                        let service = service.clone();
                        let bob = bob.clone();
                        tokio::spawn(async move { service.resend(&bob).await })
                    })
                    .collect();
                let mut results = Vec::new();
                for handle in handles {
                    results.push(handle.await.unwrap());
                }

                assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
                assert_eq!(
                    results
                        .iter()
                        .filter(|r| matches!(r, Err(Error::RateLimited)))
                        .count(),
                    1
                );
                assert_eq!(store.latest(&bob).await.unwrap().unwrap().resend_count, 3);
            }
        });
    }

    #[test]
    fn concurrent_verifies_redeem_once() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let (service, _, _) = service();
            let service = Arc::new(service);
            let alice = Subject::example();
            let code = service.issue(&alice).await.unwrap().code.to_string();

            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let service = service.clone();
                    let alice = alice.clone();
                    let code = code.clone();
                    tokio::spawn(async move { service.verify(&alice, &code).await })
                })
                .collect();
            let mut successes = 0;
            for handle in handles {
                if handle.await.unwrap().is_ok() {
                    successes += 1;
                }
            }
            assert_eq!(successes, 1);
        });
    }

    #[rocket::async_test]
    async fn failed_delivery_keeps_record() {
        let (service, store, outbox) = service();
        outbox.fail();

        assert!(matches!(
            service.issue(&Subject::example()).await,
            Err(Error::DeliveryFailed(_))
        ));
        assert_eq!(store.records().len(), 1);

        // The user can recover by asking for a resend.
        outbox.deliver();
        let issued = service.resend(&Subject::example()).await.unwrap();
        assert!(service
            .verify(&Subject::example(), &issued.code.to_string())
            .await
            .is_ok());
    }

    #[rocket::async_test]
    async fn slow_delivery_times_out() {
        let (service, _, outbox) = service();
        outbox.stall(std::time::Duration::from_secs(5));

        assert!(matches!(
            service.issue(&Subject::example()).await,
            Err(Error::DeliveryFailed(_))
        ));
        assert!(outbox.messages().is_empty());
    }

    #[rocket::async_test]
    async fn sms_subjects_work_too() {
        let (service, _, outbox) = service();
        let subject = Subject::example_sms();
        let issued = service.issue(&subject).await.unwrap();
        assert!(outbox.last_for(&subject).is_some());

        let local: Subject = "0712345678".parse().unwrap();
        assert_eq!(
            service
                .verify(&local, &issued.code.to_string())
                .await
                .unwrap(),
            subject
        );
    }
}

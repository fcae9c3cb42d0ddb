//! Per-key workflow: mailbox, browser login, key creation, persistence.
//!
//! Each key gets a fresh address and a fresh browser session. The first
//! failure ends the run; keys produced before it stay persisted.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use uuid::Uuid;

use crate::browser::{AutomationBackend, AutomationSession, KeyCreationFlow, LoginFlow};
use crate::config::AppConfig;
use crate::domain::{GeneratedKey, KeyRecord, QuotaOutcome, random_key_name, redact_key};
use crate::error::WorkflowResult;
use crate::mail::{MailAddress, Mailbox, OtpPolicy};
use crate::storage::KeyStore;
use crate::sync::SyncHandle;

const MIN_PAUSE_MS: u64 = 500;

/// Tunables taken from configuration.
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    /// OTP polling bounds.
    pub otp: OtpPolicy,
    /// Submit the quota form after each key.
    pub apply_quota: bool,
    /// Industry for the quota form.
    pub quota_industry: String,
    /// Usage scenario for the quota form.
    pub quota_scenario: String,
    /// Upper bound of the random pause between keys.
    pub pause_between_keys: Duration,
}

impl WorkflowSettings {
    /// Settings from the loaded configuration.
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            otp: OtpPolicy::from(&config.verification),
            apply_quota: config.longcat.apply_quota,
            quota_industry: config.longcat.quota_industry.clone(),
            quota_scenario: config.longcat.quota_scenario.clone(),
            pause_between_keys: Duration::from_millis(config.longcat.pause_between_keys_ms),
        }
    }
}

/// Produces keys one at a time.
pub struct KeyWorkflow {
    backend: Arc<dyn AutomationBackend>,
    mailbox: Arc<dyn Mailbox>,
    store: Arc<dyn KeyStore>,
    sync: Option<SyncHandle>,
    settings: WorkflowSettings,
}

impl KeyWorkflow {
    /// Wire a workflow. `sync` is `None` when gpt-load sync is inactive.
    #[must_use]
    pub fn new(
        backend: Arc<dyn AutomationBackend>,
        mailbox: Arc<dyn Mailbox>,
        store: Arc<dyn KeyStore>,
        sync: Option<SyncHandle>,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            backend,
            mailbox,
            store,
            sync,
            settings,
        }
    }

    /// Produce `count` keys, reporting the running total through `progress`.
    ///
    /// # Errors
    ///
    /// Returns the first [`WorkflowError`](crate::error::WorkflowError); keys
    /// produced before it are already persisted.
    pub async fn run<F>(&self, run_id: Uuid, count: u32, progress: F) -> WorkflowResult<u32>
    where
        F: Fn(u32) + Send + Sync,
    {
        let mut produced = 0;
        for index in 1..=count {
            if index > 1 {
                self.pause().await;
            }
            tracing::info!(%run_id, index, count, "Generating key");

            let record = self.generate_one(run_id).await?;
            produced += 1;
            progress(produced);
            tracing::info!(
                %run_id,
                index,
                name = %record.key.name,
                key = %redact_key(&record.key.token),
                quota_applied = ?record.quota.applied,
                "Key stored"
            );
        }
        Ok(produced)
    }

    async fn generate_one(&self, run_id: Uuid) -> WorkflowResult<KeyRecord> {
        let address = self.mailbox.create_address().await?;
        let mut session = self.backend.open_session().await?;
        let result = self.drive(session.as_mut(), &address, run_id).await;
        session.close().await;
        let record = result?;

        self.store.append(&record).await?;
        if let Some(sync) = &self.sync {
            sync.submit(run_id, vec![record.key.token.clone()]);
        }
        Ok(record)
    }

    async fn drive(
        &self,
        session: &mut dyn AutomationSession,
        address: &MailAddress,
        run_id: Uuid,
    ) -> WorkflowResult<KeyRecord> {
        session
            .login(address, self.mailbox.as_ref(), self.settings.otp)
            .await?;

        let name = random_key_name();
        let token = session.create_key(&name).await?;
        let key = GeneratedKey {
            token,
            name,
            email: address.email.clone(),
            created_at: Utc::now(),
            run_id,
        };

        let quota = if self.settings.apply_quota {
            session
                .apply_quota(
                    &key.name,
                    &self.settings.quota_industry,
                    &self.settings.quota_scenario,
                )
                .await
        } else {
            QuotaOutcome::default()
        };

        Ok(KeyRecord { key, quota })
    }

    async fn pause(&self) {
        let max = u64::try_from(self.settings.pause_between_keys.as_millis()).unwrap_or(u64::MAX);
        if max == 0 {
            return;
        }
        let ms = rand::rng().random_range(max.min(MIN_PAUSE_MS)..=max);
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use tempfile::TempDir;

    use super::testing::*;
    use super::*;
    use crate::error::WorkflowError;
    use crate::storage::FileKeyStore;

    #[tokio::test]
    async fn test_two_keys_two_lines_no_sync() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(FileKeyStore::new(
            temp.path().join("keys.txt"),
            temp.path().join("keys.csv"),
        ));
        let backend = Arc::new(FakeBackend::default());
        let workflow = KeyWorkflow::new(
            Arc::clone(&backend) as Arc<dyn AutomationBackend>,
            Arc::new(FakeMailbox::default()),
            Arc::clone(&store) as Arc<dyn KeyStore>,
            None,
            fast_settings(false),
        );

        let seen = AtomicU32::new(0);
        let produced = workflow
            .run(Uuid::new_v4(), 2, |n| seen.store(n, Ordering::SeqCst))
            .await
            .unwrap();

        assert_eq!(produced, 2);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(store.read_keys().await.unwrap().len(), 2);
        assert_eq!(backend.sessions.load(Ordering::SeqCst), 2);
        assert_eq!(backend.closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_keeps_earlier_keys_and_closes_session() {
        let store = Arc::new(MemoryStore::default());
        let backend = Arc::new(FakeBackend {
            fail_at: Some(2),
            ..FakeBackend::default()
        });
        let workflow = KeyWorkflow::new(
            Arc::clone(&backend) as Arc<dyn AutomationBackend>,
            Arc::new(FakeMailbox::default()),
            Arc::clone(&store) as Arc<dyn KeyStore>,
            None,
            fast_settings(false),
        );

        let err = workflow.run(Uuid::new_v4(), 3, |_| {}).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Automation(_)));
        assert_eq!(err.exit_code(), 3);
        assert_eq!(store.records.lock().len(), 1);
        assert_eq!(backend.sessions.load(Ordering::SeqCst), 2);
        assert_eq!(backend.closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_otp_ends_with_expired_wait() {
        let store = Arc::new(MemoryStore::default());
        let workflow = KeyWorkflow::new(
            Arc::new(FakeBackend::default()),
            Arc::new(FakeMailbox {
                fail_codes: true,
                ..FakeMailbox::default()
            }),
            Arc::clone(&store) as Arc<dyn KeyStore>,
            None,
            fast_settings(false),
        );

        let err = workflow.run(Uuid::new_v4(), 1, |_| {}).await.unwrap_err();
        assert!(matches!(err, WorkflowError::ExpiredWait(_)));
        assert_eq!(err.exit_code(), 4);
        assert!(store.records.lock().is_empty());
    }

    #[tokio::test]
    async fn test_quota_outcome_recorded_not_fatal() {
        let store = Arc::new(MemoryStore::default());
        let workflow = KeyWorkflow::new(
            Arc::new(FakeBackend::default()),
            Arc::new(FakeMailbox::default()),
            Arc::clone(&store) as Arc<dyn KeyStore>,
            None,
            fast_settings(true),
        );

        workflow.run(Uuid::new_v4(), 1, |_| {}).await.unwrap();
        let records = store.records.lock();
        assert_eq!(records[0].quota.applied, Some(false));
        assert_eq!(records[0].quota.error.as_deref(), Some("no quota button"));
        assert_eq!(records[0].key.email, "user0@mail.test");
    }
}

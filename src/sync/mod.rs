//! Best-effort key sync into gpt-load.
//!
//! ```text
//! workflow ──keys──▶ SyncHandle ──mpsc──▶ SyncWorker ──▶ KeySync (gpt-load)
//!                                              │
//!                                              └──outcomes──▶ runner
//! ```
//!
//! Sync never fails a run: every error ends up as a warning and a count in the
//! run's sync summary.

pub mod client;
pub mod ledger;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use uuid::Uuid;

use crate::config::GptLoadConfig;
use crate::domain::SyncSummary;
use crate::error::SyncResult;

pub use client::{GptLoadClient, Group, TaskStatus};
pub use ledger::{SyncLedger, key_hash};

/// What one sync call did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Keys sent to gpt-load.
    pub sent: usize,
    /// Keys skipped because the ledger already had them.
    pub skipped: usize,
    /// Resolved group id, when a request was made.
    pub group_id: Option<i64>,
    /// Import confirmed finished without task error (or polling disabled).
    pub confirmed: bool,
    /// Keys added, as reported by the finished task.
    pub added: Option<u64>,
    /// Keys ignored as duplicates, as reported by the finished task.
    pub ignored: Option<u64>,
    /// Task error or `poll_timeout`.
    pub error: Option<String>,
}

/// Imports keys somewhere. Implemented by [`KeySyncer`]; faked in tests.
#[async_trait]
pub trait KeySync: Send + Sync {
    /// Import `keys`, skipping ones already known.
    async fn sync_keys(&self, keys: &[String]) -> SyncResult<SyncReport>;
}

/// gpt-load importer with ledger-based dedup and optional task polling.
#[derive(Debug, Clone)]
pub struct KeySyncer {
    client: GptLoadClient,
    config: GptLoadConfig,
    ledger: SyncLedger,
}

impl KeySyncer {
    /// Create a syncer for the configured group.
    #[must_use]
    pub fn new(client: GptLoadClient, config: GptLoadConfig) -> Self {
        let ledger = SyncLedger::for_group(&config.group_name, config.state_file.as_deref());
        Self {
            client,
            config,
            ledger,
        }
    }

    /// Syncer from configuration, or `None` when sync is inactive.
    #[must_use]
    pub fn from_config(config: &GptLoadConfig, http: reqwest::Client) -> Option<Self> {
        config.is_active().then(|| {
            let client = GptLoadClient::new(http, &config.base_url, &config.auth_key);
            Self::new(client, config.clone())
        })
    }

    /// Ledger used for dedup.
    #[must_use]
    pub const fn ledger(&self) -> &SyncLedger {
        &self.ledger
    }

    async fn wait_for_task(&self) -> SyncResult<Option<TaskStatus>> {
        let deadline = Instant::now() + self.config.poll_timeout();
        while Instant::now() < deadline {
            let status = self.client.task_status().await?;
            if !status.is_running {
                return Ok(Some(status));
            }
            tracing::debug!(
                processed = status.processed,
                total = status.total,
                "gpt-load import still running"
            );
            sleep(self.config.poll_interval()).await;
        }
        Ok(None)
    }
}

#[async_trait]
impl KeySync for KeySyncer {
    async fn sync_keys(&self, keys: &[String]) -> SyncResult<SyncReport> {
        let mut seen = HashSet::new();
        let keys: Vec<&str> = keys
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty() && seen.insert(*k))
            .collect();
        if keys.is_empty() {
            return Ok(SyncReport::default());
        }

        let known = if self.config.force {
            HashSet::new()
        } else {
            self.ledger.load().await
        };
        let (fresh, hashes): (Vec<&str>, Vec<String>) = keys
            .iter()
            .map(|k| (*k, key_hash(k)))
            .filter(|(_, h)| !known.contains(h))
            .unzip();

        let mut report = SyncReport {
            sent: fresh.len(),
            skipped: keys.len() - fresh.len(),
            ..SyncReport::default()
        };
        if fresh.is_empty() {
            tracing::info!(skipped = report.skipped, "gpt-load sync: keys already synced");
            report.confirmed = true;
            return Ok(report);
        }

        let group_id = self.client.resolve_group_id(&self.config.group_name).await?;
        report.group_id = Some(group_id);
        tracing::info!(
            count = fresh.len(),
            group = %self.config.group_name,
            group_id,
            "gpt-load sync: importing keys"
        );

        self.client.add_keys_async(group_id, &fresh.join("\n")).await?;

        if self.config.poll {
            match self.wait_for_task().await? {
                Some(status) if status.error.is_empty() => {
                    report.confirmed = true;
                    report.added = status.added_count();
                    report.ignored = status.ignored_count();
                }
                Some(status) => report.error = Some(status.error),
                None => report.error = Some("poll_timeout".to_string()),
            }
        } else {
            report.confirmed = true;
        }

        if report.confirmed {
            self.ledger.append(&hashes).await?;
        }

        match &report.error {
            Some(error) => tracing::warn!(error = %error, "gpt-load import not confirmed"),
            None => tracing::info!(
                added = report.added,
                ignored = report.ignored,
                "gpt-load import done"
            ),
        }

        Ok(report)
    }
}

/// Keys handed to the sync worker.
#[derive(Debug, Clone)]
pub struct SyncJob {
    /// Run the keys belong to.
    pub run_id: Uuid,
    /// Keys to import.
    pub keys: Vec<String>,
}

/// Result of one [`SyncJob`].
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    /// Run the keys belong to.
    pub run_id: Uuid,
    /// Keys in the job.
    pub keys: usize,
    /// Report, or the error rendered as text.
    pub result: Result<SyncReport, String>,
}

impl SyncOutcome {
    /// Fold this outcome into a run's summary.
    pub fn apply_to(&self, summary: &mut SyncSummary) {
        match &self.result {
            Ok(report) => {
                summary.skipped += report.skipped;
                if report.confirmed {
                    summary.submitted += report.sent;
                } else {
                    summary.failed += report.sent;
                }
            }
            Err(_) => summary.failed += self.keys,
        }
    }
}

/// Sender side of the sync worker. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SyncHandle {
    tx: mpsc::UnboundedSender<SyncJob>,
}

impl SyncHandle {
    /// Queue keys for import without waiting.
    pub fn submit(&self, run_id: Uuid, keys: Vec<String>) {
        if self.tx.send(SyncJob { run_id, keys }).is_err() {
            tracing::warn!(%run_id, "Sync worker stopped; keys not submitted");
        }
    }
}

/// Background task draining [`SyncJob`]s one at a time.
pub struct SyncWorker;

impl SyncWorker {
    /// Spawn the worker. Outcomes are reported on the returned receiver.
    pub fn spawn(
        syncer: Arc<dyn KeySync>,
    ) -> (SyncHandle, mpsc::UnboundedReceiver<SyncOutcome>, JoinHandle<()>) {
        let (tx, mut jobs) = mpsc::unbounded_channel::<SyncJob>();
        let (outcome_tx, outcomes) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            while let Some(job) = jobs.recv().await {
                let result = syncer.sync_keys(&job.keys).await.map_err(|e| {
                    tracing::warn!(run_id = %job.run_id, error = %e, "gpt-load sync failed");
                    e.to_string()
                });
                let outcome = SyncOutcome {
                    run_id: job.run_id,
                    keys: job.keys.len(),
                    result,
                };
                // Nobody listening is fine; the warning above is the report.
                let _ = outcome_tx.send(outcome);
            }
        });

        (SyncHandle { tx }, outcomes, task)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use httpmock::prelude::*;
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::error::SyncError;

    fn syncer_for(server: &MockServer, temp: &TempDir, poll: bool, force: bool) -> KeySyncer {
        let config = GptLoadConfig {
            base_url: server.base_url(),
            group_name: "#pool".to_string(),
            auth_key: "admin".to_string(),
            force,
            poll,
            poll_timeout_s: 2.0,
            poll_interval_s: 0.05,
            state_file: Some(temp.path().join("ledger.sha256")),
            ..GptLoadConfig::default()
        };
        let client = GptLoadClient::new(reqwest::Client::new(), &config.base_url, &config.auth_key)
            .with_backoff(Duration::from_millis(5));
        KeySyncer::new(client, config)
    }

    async fn mock_groups(server: &MockServer) -> httpmock::Mock<'_> {
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/groups");
                then.status(200).json_body(json!({
                    "code": 0, "message": "ok",
                    "data": [{"id": 9, "name": "pool", "display_name": "Pool"}]
                }));
            })
            .await
    }

    async fn mock_add(server: &MockServer) -> httpmock::Mock<'_> {
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/keys/add-async");
                then.status(200).json_body(json!({
                    "code": 0, "message": "ok",
                    "data": {"task_type": "KEY_IMPORT", "is_running": true}
                }));
            })
            .await
    }

    #[tokio::test]
    async fn test_sync_imports_and_records_ledger() {
        let server = MockServer::start_async().await;
        let temp = TempDir::new().unwrap();
        mock_groups(&server).await;
        let add = mock_add(&server).await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/tasks/status");
                then.status(200).json_body(json!({
                    "code": 0, "message": "ok",
                    "data": {"is_running": false, "result": {"added_count": 2, "ignored_count": 0}}
                }));
            })
            .await;

        let syncer = syncer_for(&server, &temp, true, false);
        let keys = vec!["k1".to_string(), "k2".to_string(), "k1".to_string()];
        let report = syncer.sync_keys(&keys).await.unwrap();

        assert_eq!(report.sent, 2);
        assert_eq!(report.group_id, Some(9));
        assert!(report.confirmed);
        assert_eq!(report.added, Some(2));
        add.assert_hits_async(1).await;
        assert_eq!(syncer.ledger().load().await.len(), 2);
    }

    #[tokio::test]
    async fn test_known_keys_skip_all_requests() {
        let server = MockServer::start_async().await;
        let temp = TempDir::new().unwrap();
        let groups = mock_groups(&server).await;
        let add = mock_add(&server).await;

        let syncer = syncer_for(&server, &temp, false, false);
        syncer.ledger().append(&[key_hash("k1")]).await.unwrap();

        let report = syncer.sync_keys(&["k1".to_string()]).await.unwrap();
        assert_eq!(report.sent, 0);
        assert_eq!(report.skipped, 1);
        assert!(report.confirmed);
        groups.assert_hits_async(0).await;
        add.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn test_force_resubmits_known_keys() {
        let server = MockServer::start_async().await;
        let temp = TempDir::new().unwrap();
        mock_groups(&server).await;
        let add = mock_add(&server).await;

        let syncer = syncer_for(&server, &temp, false, true);
        syncer.ledger().append(&[key_hash("k1")]).await.unwrap();

        let report = syncer.sync_keys(&["k1".to_string()]).await.unwrap();
        assert_eq!(report.sent, 1);
        add.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn test_task_error_leaves_ledger_untouched() {
        let server = MockServer::start_async().await;
        let temp = TempDir::new().unwrap();
        mock_groups(&server).await;
        mock_add(&server).await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/tasks/status");
                then.status(200).json_body(json!({
                    "code": 0, "message": "ok",
                    "data": {"is_running": false, "error": "invalid key format"}
                }));
            })
            .await;

        let syncer = syncer_for(&server, &temp, true, false);
        let report = syncer.sync_keys(&["k1".to_string()]).await.unwrap();
        assert!(!report.confirmed);
        assert_eq!(report.error.as_deref(), Some("invalid key format"));
        assert!(syncer.ledger().load().await.is_empty());
    }

    #[tokio::test]
    async fn test_poll_timeout_is_reported() {
        let server = MockServer::start_async().await;
        let temp = TempDir::new().unwrap();
        mock_groups(&server).await;
        mock_add(&server).await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/tasks/status");
                then.status(200).json_body(json!({
                    "code": 0, "message": "ok", "data": {"is_running": true}
                }));
            })
            .await;

        let mut syncer = syncer_for(&server, &temp, true, false);
        syncer.config.poll_timeout_s = 0.2;
        let report = syncer.sync_keys(&["k1".to_string()]).await.unwrap();
        assert_eq!(report.error.as_deref(), Some("poll_timeout"));
        assert!(syncer.ledger().load().await.is_empty());
    }

    struct FailingSync;

    #[async_trait]
    impl KeySync for FailingSync {
        async fn sync_keys(&self, _keys: &[String]) -> SyncResult<SyncReport> {
            Err(SyncError::Transport("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_worker_reports_failures_as_outcomes() {
        let (handle, mut outcomes, _task) = SyncWorker::spawn(Arc::new(FailingSync));
        let run_id = Uuid::new_v4();
        handle.submit(run_id, vec!["k1".to_string(), "k2".to_string()]);

        let outcome = outcomes.recv().await.unwrap();
        assert_eq!(outcome.run_id, run_id);
        assert!(outcome.result.is_err());

        let mut summary = SyncSummary::default();
        outcome.apply_to(&mut summary);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.submitted, 0);
    }

    #[test]
    fn test_inactive_config_builds_no_syncer() {
        let config = GptLoadConfig::default();
        assert!(KeySyncer::from_config(&config, reqwest::Client::new()).is_none());
    }
}

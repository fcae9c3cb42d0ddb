//! Integration tests for the LongCat Keygen HTTP API.
//!
//! These tests spin up a real server instance backed by fake browser and
//! mailbox implementations and make HTTP requests to verify the complete
//! request/response cycle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use tempfile::TempDir;
use tokio::net::TcpListener;

use longcat_keygen::api::{AppState, create_router};
use longcat_keygen::browser::{AutomationBackend, AutomationSession, KeyCreationFlow, LoginFlow};
use longcat_keygen::config::{EmailProvider, SidecarConfig};
use longcat_keygen::domain::QuotaOutcome;
use longcat_keygen::error::WorkflowResult;
use longcat_keygen::mail::{InboxScan, MailAddress, Mailbox, OtpPolicy};
use longcat_keygen::service::{JobRunner, KeyWorkflow, LogTail, Sidecar, WorkflowSettings};
use longcat_keygen::storage::{FileKeyStore, read_key_lines};

// ============================================================================
// Fakes
// ============================================================================

struct StaticMailbox;

#[async_trait]
impl Mailbox for StaticMailbox {
    fn provider(&self) -> EmailProvider {
        EmailProvider::DuckMail
    }

    async fn create_address(&self) -> WorkflowResult<MailAddress> {
        Ok(MailAddress::new("box@mail.test"))
    }

    async fn check_inbox(&self, _address: &MailAddress) -> WorkflowResult<InboxScan> {
        Ok(InboxScan {
            message_count: 1,
            newest_subject: Some("Your code".to_string()),
            code: Some("654321".to_string()),
        })
    }
}

struct SlowBackend {
    sessions: Arc<AtomicU32>,
    delay: Duration,
}

struct SlowSession {
    number: u32,
    delay: Duration,
}

#[async_trait]
impl LoginFlow for SlowSession {
    async fn login(
        &mut self,
        address: &MailAddress,
        mailbox: &dyn Mailbox,
        otp: OtpPolicy,
    ) -> WorkflowResult<()> {
        tokio::time::sleep(self.delay).await;
        mailbox.wait_for_code(address, otp).await.map(|_| ())
    }
}

#[async_trait]
impl KeyCreationFlow for SlowSession {
    async fn create_key(&mut self, name: &str) -> WorkflowResult<String> {
        Ok(format!("ak_{name}_{}", self.number))
    }

    async fn apply_quota(&mut self, _name: &str, _industry: &str, _scenario: &str) -> QuotaOutcome {
        QuotaOutcome::applied()
    }
}

#[async_trait]
impl AutomationSession for SlowSession {
    async fn close(&mut self) {}
}

#[async_trait]
impl AutomationBackend for SlowBackend {
    async fn open_session(&self) -> WorkflowResult<Box<dyn AutomationSession>> {
        let number = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(SlowSession {
            number,
            delay: self.delay,
        }))
    }
}

// ============================================================================
// Test Harness
// ============================================================================

/// Test server instance.
struct TestServer {
    addr: SocketAddr,
    client: Client,
    sessions: Arc<AtomicU32>,
    log_tail: LogTail,
    temp_dir: TempDir,
}

impl TestServer {
    async fn new(keys_per_run: u32, session_delay: Duration) -> Self {
        Self::start(keys_per_run, session_delay, None).await
    }

    async fn start(
        keys_per_run: u32,
        session_delay: Duration,
        sidecar: Option<Arc<Sidecar>>,
    ) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let sessions = Arc::new(AtomicU32::new(0));

        let store = FileKeyStore::new(
            temp_dir.path().join("keys.txt"),
            temp_dir.path().join("keys.csv"),
        );
        let settings = WorkflowSettings {
            otp: OtpPolicy {
                timeout: Duration::from_secs(1),
                interval: Duration::from_millis(20),
            },
            apply_quota: true,
            quota_industry: "Internet".to_string(),
            quota_scenario: "Chatbot".to_string(),
            pause_between_keys: Duration::ZERO,
        };
        let workflow = KeyWorkflow::new(
            Arc::new(SlowBackend {
                sessions: Arc::clone(&sessions),
                delay: session_delay,
            }),
            Arc::new(StaticMailbox),
            Arc::new(store),
            None,
            settings,
        );
        let log_tail = LogTail::new(4096, 1024);
        log_tail.push("boot line\n");
        let runner = Arc::new(
            JobRunner::new(Arc::new(workflow), keys_per_run).with_log_tail(log_tail.clone()),
        );
        let app = create_router(AppState::new(runner, log_tail.clone()).with_sidecar(sidecar));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("Server failed");
        });

        tokio::time::sleep(Duration::from_millis(100)).await;

        Self {
            addr,
            client: Client::new(),
            sessions,
            log_tail,
            temp_dir,
        }
    }

    fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    async fn get(&self, path: &str) -> Response {
        self.client
            .get(format!("{}{}", self.base_url(), path))
            .send()
            .await
            .expect("Request failed")
    }

    async fn post(&self, path: &str) -> Response {
        self.client
            .post(format!("{}{}", self.base_url(), path))
            .send()
            .await
            .expect("Request failed")
    }

    async fn status(&self) -> Value {
        self.get("/status").await.json().await.expect("Invalid status body")
    }

    /// Poll `/status` until the latest run is no longer running.
    async fn wait_idle(&self) -> Value {
        for _ in 0..100 {
            let status = self.status().await;
            if status["running"] == false && !status["phase"].is_null() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("run did not finish in time");
    }
}

// ============================================================================
// Health & Pages
// ============================================================================

#[tokio::test]
async fn test_health() {
    let server = TestServer::new(1, Duration::ZERO).await;

    let resp = server.get("/health").await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], 0);
    assert_eq!(body["data"]["status"], "healthy");
    assert_eq!(body["data"]["running"], false);
}

#[tokio::test]
async fn test_index_and_log_pages() {
    let server = TestServer::new(1, Duration::ZERO).await;

    let resp = server.get("/").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let html = resp.text().await.unwrap();
    assert!(html.contains("Run Job"));
    assert!(html.contains("/status"));

    server.log_tail.push("<script>x</script>\n");
    let html = server.get("/log").await.text().await.unwrap();
    assert!(html.contains("boot line"));
    assert!(html.contains("&lt;script&gt;x&lt;/script&gt;"));
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let server = TestServer::new(1, Duration::ZERO).await;

    let resp = server.get("/v1/nope").await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], 4001);
}

// ============================================================================
// Runs
// ============================================================================

#[tokio::test]
async fn test_status_before_any_run() {
    let server = TestServer::new(1, Duration::ZERO).await;

    let status = server.status().await;
    assert_eq!(status["running"], false);
    assert!(status["run_id"].is_null());
    assert!(status["last_exit_code"].is_null());
    assert!(status["log_tail"].as_str().unwrap().contains("boot line"));
}

#[tokio::test]
async fn test_status_reports_sidecar() {
    let sidecar = Arc::new(Sidecar::new(
        SidecarConfig {
            enabled: true,
            command: "/nonexistent/gpt-load".to_string(),
            port: 3999,
            ..SidecarConfig::default()
        },
        "admin",
        Client::new(),
    ));
    assert!(sidecar.start().is_err());
    let server = TestServer::start(1, Duration::ZERO, Some(sidecar)).await;

    let status = server.status().await;
    let gpt_load = &status["gpt_load"];
    assert_eq!(gpt_load["running"], false);
    assert!(gpt_load["pid"].is_null());
    assert_eq!(gpt_load["base_url"], "http://127.0.0.1:3999");
    assert_eq!(gpt_load["restart_count"], 0);
    assert_eq!(gpt_load["database_mode"], "sqlite");
    assert!(gpt_load["last_start_error"].is_string());
}

#[tokio::test]
async fn test_run_produces_keys() {
    let server = TestServer::new(2, Duration::ZERO).await;

    let resp = server.post("/run").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["started"], true);
    let run_id = body["data"]["run_id"].as_str().unwrap().to_string();

    let status = server.wait_idle().await;
    assert_eq!(status["run_id"], run_id.as_str());
    assert_eq!(status["phase"], "succeeded");
    assert_eq!(status["last_exit_code"], 0);
    assert_eq!(status["keys_produced"], 2);
    assert!(status.get("gpt_load").is_none());

    // Output from before the run is not part of its record.
    server.log_tail.push("after the run\n");
    let status = server.status().await;
    assert!(!status["log_tail"].as_str().unwrap().contains("boot line"));
    assert!(!status["log_tail"].as_str().unwrap().contains("after the run"));

    let keys = read_key_lines(&server.temp_dir.path().join("keys.txt"))
        .await
        .unwrap();
    assert_eq!(keys.len(), 2);
    assert!(keys.iter().all(|k| k.starts_with("ak_")));
}

#[tokio::test]
async fn test_trigger_while_running_is_rejected() {
    let server = TestServer::new(1, Duration::from_millis(500)).await;

    let first = server.post("/run").await;
    assert_eq!(first.status(), StatusCode::OK);

    let second = server.post("/run").await;
    assert_eq!(second.status(), StatusCode::CONFLICT);
    let body: Value = second.json().await.unwrap();
    assert_eq!(body["started"], false);
    assert_eq!(body["reason"], "already_running");
    assert_eq!(body["code"], 4002);

    let status = server.status().await;
    assert_eq!(status["running"], true);

    let status = server.wait_idle().await;
    assert_eq!(status["last_exit_code"], 0);
    assert_eq!(server.sessions.load(Ordering::SeqCst), 1);

    // The slot is free again once the run finished.
    let third = server.post("/run").await;
    assert_eq!(third.status(), StatusCode::OK);
}

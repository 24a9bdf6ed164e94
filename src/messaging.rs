//! Request/response envelope between the page, the popup and the background
//! worker, plus the dispatcher that executes requests.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use crate::ai::{create_provider, AnalysisProvider};
use crate::db::KeyValueStore;
use crate::error::{MatchaError, Result};
use crate::extract::extract_from_html;
use crate::models::{JobStatus, JobUpdate};
use crate::pipeline::{already_tracked_message, analyze_page, quick_save_page};
use crate::settings::Profile;
use crate::tracker::Tracker;

pub const RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Request {
    ExtractPageContent {
        html: String,
        url: String,
    },
    AnalyzeCurrentPage {
        html: String,
        url: String,
    },
    /// Quick-save the page to the Inbox.
    SaveToTracker {
        html: String,
        url: String,
    },
    UpdateJobEntry {
        id: String,
        updates: JobUpdate,
    },
    DeleteJobEntry {
        id: String,
    },
    GetTracker {
        #[serde(default)]
        status: Option<JobStatus>,
    },
}

impl Request {
    pub fn action(&self) -> &'static str {
        match self {
            Request::ExtractPageContent { .. } => "extractPageContent",
            Request::AnalyzeCurrentPage { .. } => "analyzeCurrentPage",
            Request::SaveToTracker { .. } => "saveToTracker",
            Request::UpdateJobEntry { .. } => "updateJobEntry",
            Request::DeleteJobEntry { .. } => "deleteJobEntry",
            Request::GetTracker { .. } => "getTracker",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

impl Response {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            error_kind: None,
        }
    }

    pub fn failure(err: &MatchaError) -> Self {
        // Duplicates are informational; they get a friendly message.
        let message = if err.is_duplicate() {
            already_tracked_message().to_string()
        } else {
            err.to_string()
        };
        Self {
            success: false,
            data: None,
            error: Some(message),
            error_kind: Some(err.kind().to_string()),
        }
    }
}

/// Executes requests against storage and the analysis provider.
pub struct Dispatcher<'a> {
    store: &'a dyn KeyValueStore,
    provider: Option<&'a dyn AnalysisProvider>,
}

impl<'a> Dispatcher<'a> {
    /// Without an explicit provider one is built from stored settings when
    /// an analysis is requested.
    pub fn new(store: &'a dyn KeyValueStore) -> Self {
        Self {
            store,
            provider: None,
        }
    }

    pub fn with_provider(mut self, provider: &'a dyn AnalysisProvider) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn handle(&self, request: Request) -> Response {
        let action = request.action();
        match self.execute(request) {
            Ok(data) => Response::ok(data),
            Err(err) => {
                debug!(action, kind = err.kind(), error = %err, "request failed");
                Response::failure(&err)
            }
        }
    }

    fn execute(&self, request: Request) -> Result<Value> {
        match request {
            Request::ExtractPageContent { html, url } => {
                Ok(serde_json::to_value(extract_from_html(&html, &url)?)?)
            }
            Request::AnalyzeCurrentPage { html, url } => {
                let page = extract_from_html(&html, &url)?;
                let outcome = match self.provider {
                    Some(provider) => analyze_page(self.store, provider, &page)?,
                    None => {
                        let settings = Profile::new(self.store).settings()?.with_env_overrides();
                        let provider = create_provider(&settings)?;
                        analyze_page(self.store, provider.as_ref(), &page)?
                    }
                };
                Ok(serde_json::to_value(outcome.analysis)?)
            }
            Request::SaveToTracker { html, url } => {
                let page = extract_from_html(&html, &url)?;
                Ok(serde_json::to_value(quick_save_page(self.store, &page)?)?)
            }
            Request::UpdateJobEntry { id, updates } => {
                let updated = Tracker::new(self.store).update_job_entry(&id, updates)?;
                Ok(serde_json::to_value(updated)?)
            }
            Request::DeleteJobEntry { id } => {
                Tracker::new(self.store).delete_job_entry(&id)?;
                Ok(Value::Null)
            }
            Request::GetTracker { status } => {
                let entries = Tracker::new(self.store).entries_by_status(status)?;
                Ok(serde_json::to_value(entries)?)
            }
        }
    }
}

/// Transport to whatever executes requests. `Err` means the request never
/// got an answer; handler failures come back as an unsuccessful `Response`.
pub trait Channel {
    fn send(&self, request: &Request) -> Result<Response>;
}

/// Channel that runs requests on a dispatcher in the same process.
pub struct InProcessChannel<'a> {
    dispatcher: Dispatcher<'a>,
}

impl<'a> InProcessChannel<'a> {
    pub fn new(dispatcher: Dispatcher<'a>) -> Self {
        Self { dispatcher }
    }
}

impl Channel for InProcessChannel<'_> {
    fn send(&self, request: &Request) -> Result<Response> {
        Ok(self.dispatcher.handle(request.clone()))
    }
}

/// Send once, and once more after `RETRY_DELAY` if the transport failed.
pub fn send_with_retry(channel: &dyn Channel, request: &Request) -> Result<Response> {
    send_with_retry_after(channel, request, RETRY_DELAY)
}

pub(crate) fn send_with_retry_after(
    channel: &dyn Channel,
    request: &Request,
    delay: Duration,
) -> Result<Response> {
    match channel.send(request) {
        Ok(response) => Ok(response),
        Err(first) => {
            warn!(action = request.action(), error = %first, "send failed, retrying once");
            thread::sleep(delay);
            channel.send(request).map_err(|second| {
                MatchaError::messaging(format!(
                    "could not reach the page after a retry ({}). Try refreshing it",
                    second
                ))
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::JobRecord;
    use crate::pipeline::tests::ScriptedProvider;
    use std::cell::Cell;

    const JOB_HTML: &str = r#"<html><head><title>Senior Backend Engineer | Acme Corp</title></head>
        <body><nav>Home Jobs About</nav><main>
        <h1>Senior Backend Engineer</h1>
        <p>Acme Corp is hiring a senior backend engineer to own our storage layer and build reliable
        services in Rust. You will design APIs, operate databases and mentor the team while shipping
        features customers love. Experience with distributed systems is a plus.</p>
        </main></body></html>"#;

    /// Fails the first `failures` sends at the transport level.
    struct FlakyChannel<'a> {
        inner: InProcessChannel<'a>,
        failures: Cell<usize>,
        attempts: Cell<usize>,
    }

    impl Channel for FlakyChannel<'_> {
        fn send(&self, request: &Request) -> Result<Response> {
            self.attempts.set(self.attempts.get() + 1);
            if self.failures.get() > 0 {
                self.failures.set(self.failures.get() - 1);
                return Err(MatchaError::messaging("receiving end does not exist"));
            }
            self.inner.send(request)
        }
    }

    fn flaky(store: &MemoryStore, failures: usize) -> FlakyChannel<'_> {
        FlakyChannel {
            inner: InProcessChannel::new(Dispatcher::new(store)),
            failures: Cell::new(failures),
            attempts: Cell::new(0),
        }
    }

    fn save_request(url: &str) -> Request {
        Request::SaveToTracker {
            html: JOB_HTML.into(),
            url: url.into(),
        }
    }

    #[test]
    fn test_request_wire_format() {
        let json = r#"{"action": "updateJobEntry", "id": "abc-1", "updates": {"status": "Applied"}}"#;
        let request: Request = serde_json::from_str(json).unwrap();
        assert_eq!(
            request,
            Request::UpdateJobEntry {
                id: "abc-1".into(),
                updates: JobUpdate {
                    status: Some(JobStatus::Applied),
                    ..JobUpdate::default()
                },
            }
        );

        let request: Request = serde_json::from_str(r#"{"action": "getTracker"}"#).unwrap();
        assert_eq!(request, Request::GetTracker { status: None });
    }

    #[test]
    fn test_retry_recovers_from_one_transport_failure() {
        let store = MemoryStore::new();
        let channel = flaky(&store, 1);
        let response =
            send_with_retry_after(&channel, &save_request("https://acme.example/1"), Duration::ZERO).unwrap();
        assert!(response.success);
        assert_eq!(channel.attempts.get(), 2);
    }

    #[test]
    fn test_retry_gives_up_after_second_failure() {
        let store = MemoryStore::new();
        let channel = flaky(&store, 5);
        let err =
            send_with_retry_after(&channel, &save_request("https://acme.example/1"), Duration::ZERO).unwrap_err();
        assert!(matches!(err, MatchaError::Messaging(_)));
        assert_eq!(channel.attempts.get(), 2);
    }

    #[test]
    fn test_handler_errors_are_not_retried() {
        let store = MemoryStore::new();
        let channel = flaky(&store, 0);
        let request = Request::UpdateJobEntry {
            id: "missing".into(),
            updates: JobUpdate::default(),
        };
        let response = send_with_retry_after(&channel, &request, Duration::ZERO).unwrap();
        assert!(!response.success);
        assert_eq!(response.error_kind.as_deref(), Some("notFound"));
        assert_eq!(channel.attempts.get(), 1);
    }

    #[test]
    fn test_duplicate_save_is_flagged_for_friendly_display() {
        let store = MemoryStore::new();
        let dispatcher = Dispatcher::new(&store);

        assert!(dispatcher.handle(save_request("https://acme.example/1")).success);
        let response = dispatcher.handle(save_request("https://acme.example/1"));
        assert!(!response.success);
        assert_eq!(response.error_kind.as_deref(), Some("duplicate"));
        assert!(!response.error.unwrap_or_default().is_empty());
    }

    #[test]
    fn test_extract_rejects_restricted_pages() {
        let store = MemoryStore::new();
        let response = Dispatcher::new(&store).handle(Request::ExtractPageContent {
            html: JOB_HTML.into(),
            url: "chrome://extensions".into(),
        });
        assert!(!response.success);
        assert_eq!(response.error_kind.as_deref(), Some("extraction"));
    }

    #[test]
    fn test_analyze_and_list_tracker() {
        let store = MemoryStore::new();
        Profile::new(&store).save_cv_text("Rust engineer, ten years").unwrap();
        let provider = ScriptedProvider::new(82);
        let dispatcher = Dispatcher::new(&store).with_provider(&provider);

        let response = dispatcher.handle(Request::AnalyzeCurrentPage {
            html: JOB_HTML.into(),
            url: "https://careers.acme.com/jobs/1".into(),
        });
        assert!(response.success, "{:?}", response.error);
        assert_eq!(response.data.unwrap()["match_score"], 82);

        dispatcher.handle(save_request("https://careers.acme.com/jobs/1"));
        let listed = dispatcher.handle(Request::GetTracker {
            status: Some(JobStatus::Inbox),
        });
        let entries: Vec<JobRecord> = serde_json::from_value(listed.data.unwrap()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].company, "Acme Corp");
    }

    #[test]
    fn test_analyze_without_settings_is_config_error() {
        let store = MemoryStore::new();
        Profile::new(&store).save_cv_text("CV").unwrap();
        let response = Dispatcher::new(&store).handle(Request::AnalyzeCurrentPage {
            html: JOB_HTML.into(),
            url: "https://careers.acme.com/jobs/1".into(),
        });
        assert!(!response.success);
        assert_eq!(response.error_kind.as_deref(), Some("config"));
    }

    #[test]
    fn test_delete_is_idempotent() {
        let store = MemoryStore::new();
        let dispatcher = Dispatcher::new(&store);
        let saved = dispatcher.handle(save_request("https://acme.example/1"));
        let id = saved.data.unwrap()["id"].as_str().unwrap().to_string();

        for _ in 0..2 {
            let response = dispatcher.handle(Request::DeleteJobEntry { id: id.clone() });
            assert!(response.success);
        }
        assert!(Tracker::new(&store).entries().unwrap().is_empty());
    }
}

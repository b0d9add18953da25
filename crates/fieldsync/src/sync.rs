//! Batch sync against the remote endpoint.
//!
//! A batch is posted as `{"submissions": [...]}` in a single request. The
//! reply decides which ids leave the queue. After a failure every batch record
//! the server did not confirm ends up queued, inserted only when its id is
//! absent so that an edit made while the request was in flight survives.
//! After an accepted reply only records that were never queued are inserted,
//! so a record deleted while the request was in flight stays deleted.
//!
//! The queue lock is taken only to reconcile, never across the request.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::notice::Notice;
use crate::queue::{PendingSubmission, SharedQueue};

/// How much of a non-JSON body is quoted in the error.
const BODY_EXCERPT_CHARS: usize = 200;

/// Raw reply from the endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body as text.
    pub body: String,
}

impl TransportResponse {
    /// Create a response.
    #[must_use]
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Whether the status is in the 2xx range.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends a serialized batch to the endpoint.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// POST `body` to `endpoint` and return whatever the server answered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] if no response was received.
    async fn post(&self, endpoint: &str, body: String) -> Result<TransportResponse>;
}

/// [`Transport`] over `reqwest`.
///
/// The body goes out as `text/plain`; the endpoint reads the raw JSON text.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with a fresh HTTP client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport sharing an existing HTTP client.
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, endpoint: &str, body: String) -> Result<TransportResponse> {
        let response = self
            .client
            .post(endpoint)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::network(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| Error::network(e.to_string()))?;
        Ok(TransportResponse { status, body })
    }
}

#[derive(Serialize)]
struct BatchRequest<'a> {
    submissions: &'a [PendingSubmission],
}

/// The fields of a JSON reply that matter, read leniently.
///
/// A field of the wrong type is treated as absent without affecting the
/// others; non-string entries in `successfullySyncedIds` are skipped.
#[derive(Debug, Default)]
struct ServerReply {
    status: Option<String>,
    message: Option<String>,
    successfully_synced_ids: Option<Vec<String>>,
}

impl ServerReply {
    fn from_value(value: &Value) -> Self {
        let text = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);
        Self {
            status: text("status"),
            message: text("message"),
            successfully_synced_ids: value
                .get("successfullySyncedIds")
                .and_then(Value::as_array)
                .map(|ids| {
                    ids.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                }),
        }
    }

    fn message(&self) -> Option<&str> {
        self.message.as_deref().filter(|m| !m.is_empty())
    }
}

/// What the server's answer means for the batch.
#[derive(Debug)]
enum Verdict {
    Accepted { message: String, synced: Vec<String> },
    Refused { message: String, synced: Vec<String> },
}

/// Outcome of one sync attempt.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Records in the attempted batch.
    pub attempted: usize,
    /// Ids removed from the queue as confirmed by the server.
    pub synced: Vec<String>,
    /// Batch records inserted into the queue because they were absent.
    pub requeued: usize,
    /// Why the batch was not fully accepted.
    pub error: Option<Error>,
    /// Messages for the user, in order.
    pub notices: Vec<Notice>,
}

impl SyncReport {
    /// Whether a request was made and the server accepted it.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.attempted > 0 && self.error.is_none()
    }

    /// Whether nothing was attempted.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.attempted == 0 && self.error.is_none()
    }

    fn failed(attempted: usize, error: Error, notice: Notice) -> Self {
        Self {
            attempted,
            error: Some(error),
            notices: vec![notice],
            ..Self::default()
        }
    }
}

/// Posts batches and reconciles the queue with the reply.
#[derive(Debug)]
pub struct SyncEngine {
    endpoint: Option<String>,
    transport: Box<dyn Transport>,
}

impl SyncEngine {
    /// Create an engine. `None` means no endpoint is configured.
    #[must_use]
    pub fn new(endpoint: Option<String>, transport: impl Transport + 'static) -> Self {
        Self {
            endpoint,
            transport: Box::new(transport),
        }
    }

    /// Create an engine from configuration using [`HttpTransport`].
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.endpoint().map(str::to_string), HttpTransport::new())
    }

    /// The configured endpoint, if any.
    #[must_use]
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Post `batch` and reconcile `queue` with the outcome.
    ///
    /// Offline, or without an endpoint, the batch is queued locally and no
    /// request is made. An empty batch does nothing.
    pub async fn submit_batch(
        &self,
        queue: &SharedQueue,
        online: bool,
        batch: Vec<PendingSubmission>,
    ) -> SyncReport {
        if batch.is_empty() {
            return SyncReport::default();
        }
        let attempted = batch.len();

        if !online {
            info!("Offline; keeping {} submission(s) locally", attempted);
            let mut report = SyncReport::failed(
                attempted,
                Error::network("device is offline"),
                Notice::warning("You are offline. Data saved locally."),
            );
            requeue(queue, &batch, &mut report);
            return report;
        }

        let Some(endpoint) = self.endpoint.as_deref() else {
            warn!("No sync endpoint configured; keeping {} submission(s) locally", attempted);
            let mut report = SyncReport::failed(
                attempted,
                Error::EndpointNotConfigured,
                Notice::error("Backend URL not configured. Cannot submit."),
            );
            requeue(queue, &batch, &mut report);
            return report;
        };

        let body = match serde_json::to_string(&BatchRequest { submissions: &batch }) {
            Ok(body) => body,
            Err(e) => {
                error!("Could not encode batch: {}", e);
                let mut report = SyncReport::failed(
                    attempted,
                    Error::from(e),
                    Notice::error("Could not encode submissions. Data saved locally."),
                );
                requeue(queue, &batch, &mut report);
                return report;
            }
        };

        let queued_before: HashSet<String> = {
            let guard = queue.lock();
            batch
                .iter()
                .filter(|r| guard.contains(&r.id))
                .map(|r| r.id.clone())
                .collect()
        };

        debug!("Posting {} submission(s) to {}", attempted, endpoint);
        let verdict = match self.transport.post(endpoint, body).await {
            Ok(response) => interpret(&response, &batch),
            Err(e) => Err(e),
        };

        match verdict {
            Ok(Verdict::Accepted { message, synced }) => {
                info!("Server accepted {} of {} submission(s)", synced.len(), attempted);
                let mut report = SyncReport {
                    attempted,
                    notices: vec![Notice::success(message)],
                    ..SyncReport::default()
                };
                // Records queued before the request and gone now were deleted.
                reconcile(queue, &batch, &synced, &mut report, |r| {
                    !queued_before.contains(&r.id)
                });
                report
            }
            Ok(Verdict::Refused { message, synced }) => {
                warn!(
                    "Server refused batch ({} of {} confirmed): {}",
                    synced.len(),
                    attempted,
                    message
                );
                let mut report = SyncReport::failed(
                    attempted,
                    Error::server(None, message.clone()),
                    Notice::error(format!("Submission issue: {message}")),
                );
                reconcile(queue, &batch, &synced, &mut report, |_| true);
                report
            }
            Err(e) => {
                warn!("Sync request failed: {}", e);
                let detail = match &e {
                    Error::Network(message) | Error::Server { message, .. } => message.clone(),
                    other => other.to_string(),
                };
                let mut report = SyncReport::failed(
                    attempted,
                    e,
                    Notice::error(format!(
                        "Network or submission error: {detail}. Data saved locally."
                    )),
                );
                requeue(queue, &batch, &mut report);
                report
            }
        }
    }

    /// Post a snapshot of the whole queue.
    ///
    /// Offline or with nothing queued this does nothing; a notice explains
    /// why only when `manual` is set.
    pub async fn sync_all(&self, queue: &SharedQueue, online: bool, manual: bool) -> SyncReport {
        if !online {
            debug!("Skipping sync: offline");
            return skipped(manual, Notice::warning("You are offline. Cannot sync."));
        }

        let batch = queue.lock().snapshot();
        if batch.is_empty() {
            debug!("Skipping sync: queue empty");
            return skipped(manual, Notice::info("No pending submissions to sync."));
        }

        let announce = Notice::info(format!(
            "Attempting to sync {} pending submission(s)...",
            batch.len()
        ));
        let mut report = self.submit_batch(queue, online, batch).await;
        report.notices.insert(0, announce);
        report
    }
}

fn skipped(manual: bool, notice: Notice) -> SyncReport {
    SyncReport {
        notices: if manual { vec![notice] } else { Vec::new() },
        ..SyncReport::default()
    }
}

/// Decide what a reply means.
///
/// `Err` means the reply was unusable and the whole batch stays queued.
fn interpret(response: &TransportResponse, batch: &[PendingSubmission]) -> Result<Verdict> {
    let all_ids = || batch.iter().map(|r| r.id.clone()).collect::<Vec<_>>();

    let Ok(value) = serde_json::from_str::<Value>(&response.body) else {
        if response.is_success() && response.body.to_lowercase().contains("success") {
            // Non-JSON bodies mentioning "success" count as full acceptance.
            warn!("Treating non-JSON reply as success");
            return Ok(Verdict::Accepted {
                message: response.body.clone(),
                synced: all_ids(),
            });
        }
        let excerpt: String = response.body.chars().take(BODY_EXCERPT_CHARS).collect();
        return Err(Error::server(
            Some(response.status),
            format!("Non-JSON response from server: {excerpt}"),
        ));
    };

    let reply = ServerReply::from_value(&value);

    if response.is_success() && reply.status.as_deref() == Some("success") {
        let synced = reply.successfully_synced_ids.clone().unwrap_or_else(all_ids);
        let message = reply
            .message()
            .map_or_else(|| format!("{} record(s) submitted successfully!", batch.len()), str::to_string);
        Ok(Verdict::Accepted { message, synced })
    } else {
        Ok(Verdict::Refused {
            message: reply.message().unwrap_or("Unknown server error.").to_string(),
            synced: reply.successfully_synced_ids.unwrap_or_default(),
        })
    }
}

/// Remove confirmed ids, then insert the unconfirmed batch records that pass
/// `reinsert` and are absent from the queue.
fn reconcile(
    queue: &SharedQueue,
    batch: &[PendingSubmission],
    synced: &[String],
    report: &mut SyncReport,
    reinsert: impl Fn(&PendingSubmission) -> bool,
) {
    let confirmed: HashSet<String> = synced.iter().cloned().collect();
    let mut guard = queue.lock();

    match guard.remove(&confirmed) {
        Ok(removed) => {
            debug!("Removed {} confirmed submission(s)", removed);
            report.synced = batch
                .iter()
                .filter(|r| confirmed.contains(&r.id))
                .map(|r| r.id.clone())
                .collect();
        }
        Err(e) => {
            error!("Could not remove synced submissions: {}", e);
            report
                .notices
                .push(Notice::error(format!("Could not update local queue: {e}")));
        }
    }

    let unconfirmed = batch
        .iter()
        .filter(|r| !confirmed.contains(&r.id) && reinsert(*r));
    match guard.ensure_present(unconfirmed) {
        Ok(inserted) => report.requeued = inserted,
        Err(e) => {
            error!("Could not keep unsynced submissions: {}", e);
            report
                .notices
                .push(Notice::error(format!("Could not save submissions locally: {e}")));
        }
    }
}

fn requeue(queue: &SharedQueue, batch: &[PendingSubmission], report: &mut SyncReport) {
    reconcile(queue, batch, &[], report, |_| true);
}

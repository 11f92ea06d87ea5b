//! Export API abstraction for testability.
//!
//! The [`ExportApi`] trait abstracts the remote vulnerability-export API,
//! allowing production code to use [`GitlabExportClient`] while tests use
//! a scripted substitute.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ ExportCollector  │
//! └────────┬─────────┘
//!          │
//!          ▼
//!   ┌─────────────┐
//!   │  ExportApi  │ (trait)
//!   └─────────────┘
//!        │     │
//!        ▼     ▼
//!   ┌──────┐ ┌──────┐
//!   │GitLab│ │ Mock │
//!   └───┬──┘ └──────┘
//!       │
//!       ▼
//!   GitLab API v4
//! ```
//!
//! # Error Classification
//!
//! A multi-minute export routinely survives transient network hiccups and
//! server 5xx responses; those classify as **Temporary**
//! ([`CollectorError::is_temporary`]) and are retried inside
//! [`wait_for_export`] until the overall timeout. A definitively failed job,
//! a 4xx response, or a malformed body classifies as **Fatal** and surfaces
//! immediately instead of being retried into a timeout.

use std::future::Future;
use std::time::Duration;

use futures::{StreamExt, TryStreamExt};
use reqwest::StatusCode;
use tokio::io::AsyncBufRead;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vulnpost_core::config::ApiConfig;
use vulnpost_core::types::{Target, TargetKind};

use crate::error::CollectorError;
use crate::types::{ExportJob, ExportStatus};

/// Trait abstracting the remote export API.
///
/// All remote calls go through this trait, enabling testability via a
/// scripted implementation. The trait is `Send + Sync + 'static`, allowing
/// safe sharing across async tasks.
///
/// # Implementations
///
/// - [`GitlabExportClient`]: production implementation over GitLab API v4
/// - `MockExportClient`: test implementation with scripted responses
///   (available in tests only)
pub trait ExportApi: Send + Sync + 'static {
    /// Streaming payload reader returned by [`fetch_export_data`](Self::fetch_export_data).
    type Payload: AsyncBufRead + Send + Unpin;

    /// Validates the configured target and resolves it to a numeric id.
    ///
    /// Numeric references are existence-checked; slash paths are resolved
    /// to their server-side id.
    ///
    /// # Errors
    ///
    /// - `CollectorError::InvalidTarget`: the target does not exist (404)
    /// - `CollectorError::Server` / `UnexpectedStatus`: other API failures
    fn resolve_target(
        &self,
        target: &Target,
    ) -> impl Future<Output = Result<String, CollectorError>> + Send;

    /// Submits a new vulnerability export for the target.
    ///
    /// Succeeds only on the server's `201 Created` response; any other
    /// status is a fatal error carrying the response body for diagnostics.
    fn create_export(
        &self,
        kind: TargetKind,
        target_id: &str,
    ) -> impl Future<Output = Result<ExportJob, CollectorError>> + Send;

    /// Fetches the current state of an export job.
    ///
    /// `200 OK` and `202 Accepted` are both valid responses. Network-level
    /// failures and 5xx responses classify as Temporary so callers can
    /// decide retry policy; everything else is Fatal.
    fn get_export(
        &self,
        export_id: i64,
    ) -> impl Future<Output = Result<ExportJob, CollectorError>> + Send;

    /// Opens a streaming reader over a finished export's download URL.
    ///
    /// The caller owns the reader; dropping it releases the connection.
    /// Non-2xx responses are fatal.
    fn fetch_export_data(
        &self,
        download_url: &str,
    ) -> impl Future<Output = Result<Self::Payload, CollectorError>> + Send;
}

/// Drives [`ExportApi::get_export`] until the job reaches a terminal state.
///
/// Polls on a fixed `poll_interval`. Behavior per observation:
///
/// - `Finished`: returns the job (its download link is now meaningful)
/// - `Failed`: returns a fatal error immediately, without further polling
/// - `Created` / `Running`: keeps waiting
/// - `Unknown`: logged as a warning and treated as "still waiting" — the
///   next poll is authoritative, so server-side vocabulary drift never
///   hard-fails an otherwise healthy export
/// - Temporary error: logged and retried after the same interval
/// - `timeout` elapsed: fatal timeout error naming the elapsed duration
///
/// Every wait races `cancel`, so shutdown is observed within one interval.
pub async fn wait_for_export<A: ExportApi>(
    api: &A,
    export_id: i64,
    poll_interval: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<ExportJob, CollectorError> {
    let started = tokio::time::Instant::now();

    loop {
        if started.elapsed() >= timeout {
            return Err(CollectorError::WaitTimeout {
                export_id,
                elapsed_secs: started.elapsed().as_secs(),
            });
        }

        match api.get_export(export_id).await {
            Ok(job) => match job.status {
                ExportStatus::Finished => {
                    info!(
                        export_id,
                        elapsed_secs = started.elapsed().as_secs(),
                        "export completed"
                    );
                    return Ok(job);
                }
                ExportStatus::Failed => {
                    return Err(CollectorError::ExportFailed {
                        export_id,
                        elapsed_secs: started.elapsed().as_secs(),
                    });
                }
                ExportStatus::Created | ExportStatus::Running => {
                    debug!(
                        export_id,
                        status = %job.status,
                        elapsed_secs = started.elapsed().as_secs(),
                        "export in progress"
                    );
                }
                ExportStatus::Unknown => {
                    warn!(
                        export_id,
                        "unrecognized export status reported, still waiting"
                    );
                }
            },
            Err(e) if e.is_temporary() => {
                warn!(
                    export_id,
                    error = %e,
                    "temporary error fetching export status, retrying"
                );
            }
            Err(e) => return Err(e),
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(CollectorError::Cancelled { export_id });
            }
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
}

/// Streaming payload type produced by [`GitlabExportClient`].
pub type HttpPayload = tokio::io::BufReader<
    StreamReader<futures::stream::BoxStream<'static, std::io::Result<bytes::Bytes>>, bytes::Bytes>,
>;

/// Production export client over GitLab API v4.
///
/// Attaches the configured `PRIVATE-TOKEN` header to every call and applies
/// a per-request timeout. Holds no mutable state; clones share the
/// underlying connection pool.
#[derive(Debug, Clone)]
pub struct GitlabExportClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl GitlabExportClient {
    /// Builds a client from the API configuration.
    ///
    /// # Errors
    ///
    /// Returns `CollectorError::Config` if the base URL does not parse or
    /// the HTTP client cannot be constructed.
    pub fn new(config: &ApiConfig) -> Result<Self, CollectorError> {
        reqwest::Url::parse(&config.base_url).map_err(|e| CollectorError::Config {
            field: "api.base_url".to_owned(),
            reason: e.to_string(),
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| CollectorError::Config {
                field: "api".to_owned(),
                reason: format!("failed to build http client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            token: config.token.clone(),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send_get(&self, url: &str) -> Result<reqwest::Response, CollectorError> {
        self.client
            .get(url)
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await
            .map_err(CollectorError::Transport)
    }

    async fn read_body(resp: reqwest::Response) -> Result<String, CollectorError> {
        resp.text().await.map_err(CollectorError::Transport)
    }

    fn decode<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, CollectorError> {
        serde_json::from_str(body).map_err(|e| CollectorError::MalformedBody(e.to_string()))
    }
}

/// Percent-encodes the slashes of a path reference for use as a URL segment.
fn encode_reference(reference: &str) -> String {
    reference.replace('/', "%2F")
}

#[derive(Debug, serde::Deserialize)]
struct ProjectInfo {
    id: i64,
    #[serde(default)]
    path_with_namespace: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct GroupInfo {
    id: i64,
    #[serde(default)]
    full_path: Option<String>,
}

impl ExportApi for GitlabExportClient {
    type Payload = HttpPayload;

    async fn resolve_target(&self, target: &Target) -> Result<String, CollectorError> {
        let path = match target.kind {
            TargetKind::Project => {
                format!("/api/v4/projects/{}", encode_reference(&target.reference))
            }
            TargetKind::Group => {
                format!("/api/v4/groups/{}", encode_reference(&target.reference))
            }
        };

        let resp = self.send_get(&self.api_url(&path)).await?;
        let status = resp.status();

        if status == StatusCode::NOT_FOUND {
            return Err(CollectorError::InvalidTarget {
                reference: target.reference.clone(),
                reason: format!("{} not found", target.kind),
            });
        }
        if status.is_server_error() {
            return Err(CollectorError::Server {
                status: status.as_u16(),
                body: Self::read_body(resp).await.unwrap_or_default(),
            });
        }
        if status != StatusCode::OK {
            return Err(CollectorError::UnexpectedStatus {
                status: status.as_u16(),
                body: Self::read_body(resp).await.unwrap_or_default(),
            });
        }

        let body = Self::read_body(resp).await?;
        let id = match target.kind {
            TargetKind::Project => {
                let project: ProjectInfo = Self::decode(&body)?;
                info!(
                    id = project.id,
                    path = project.path_with_namespace.as_deref().unwrap_or(""),
                    "resolved project target"
                );
                project.id
            }
            TargetKind::Group => {
                let group: GroupInfo = Self::decode(&body)?;
                info!(
                    id = group.id,
                    path = group.full_path.as_deref().unwrap_or(""),
                    "resolved group target"
                );
                group.id
            }
        };

        Ok(id.to_string())
    }

    async fn create_export(
        &self,
        kind: TargetKind,
        target_id: &str,
    ) -> Result<ExportJob, CollectorError> {
        let path = match kind {
            TargetKind::Project => {
                format!("/api/v4/security/projects/{target_id}/vulnerability_exports")
            }
            TargetKind::Group => {
                format!("/api/v4/security/groups/{target_id}/vulnerability_exports")
            }
        };

        let resp = self
            .client
            .post(self.api_url(&path))
            .header("PRIVATE-TOKEN", &self.token)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(CollectorError::Transport)?;

        let status = resp.status();
        if status != StatusCode::CREATED {
            return Err(CollectorError::UnexpectedStatus {
                status: status.as_u16(),
                body: Self::read_body(resp).await.unwrap_or_default(),
            });
        }

        let body = Self::read_body(resp).await?;
        let job: ExportJob = Self::decode(&body)?;
        info!(export_id = job.id, target_id, "created vulnerability export");
        Ok(job)
    }

    async fn get_export(&self, export_id: i64) -> Result<ExportJob, CollectorError> {
        let path = format!("/api/v4/security/vulnerability_exports/{export_id}");
        let resp = self.send_get(&self.api_url(&path)).await?;

        let status = resp.status();
        if status != StatusCode::OK && status != StatusCode::ACCEPTED {
            let body = Self::read_body(resp).await.unwrap_or_default();
            if status.is_server_error() {
                return Err(CollectorError::Server {
                    status: status.as_u16(),
                    body,
                });
            }
            return Err(CollectorError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }

        let body = Self::read_body(resp).await?;
        Self::decode(&body)
    }

    async fn fetch_export_data(&self, download_url: &str) -> Result<HttpPayload, CollectorError> {
        let resp = self.send_get(download_url).await?;

        let status = resp.status();
        if status != StatusCode::OK {
            return Err(CollectorError::UnexpectedStatus {
                status: status.as_u16(),
                body: Self::read_body(resp).await.unwrap_or_default(),
            });
        }

        let stream = resp
            .bytes_stream()
            .map_err(std::io::Error::other)
            .boxed();
        Ok(tokio::io::BufReader::new(StreamReader::new(stream)))
    }
}

/// Scripted export client for unit tests.
///
/// Status responses are consumed from a script queue; once the queue is
/// drained the `fallback_status` is reported forever. Call counters allow
/// asserting exactly how many requests were made.
#[cfg(test)]
pub struct MockExportClient {
    resolved_id: String,
    resolve_fails: bool,
    export_id: i64,
    create_fails: bool,
    status_script: std::sync::Mutex<std::collections::VecDeque<MockStatusStep>>,
    fallback_status: ExportStatus,
    csv_body: String,
    fetch_fails: bool,
    /// Number of `get_export` calls observed.
    pub status_calls: std::sync::atomic::AtomicUsize,
    /// Number of `create_export` calls observed.
    pub create_calls: std::sync::atomic::AtomicUsize,
    /// Number of `fetch_export_data` calls observed.
    pub fetch_calls: std::sync::atomic::AtomicUsize,
}

/// One scripted `get_export` response.
#[cfg(test)]
#[derive(Debug, Clone)]
pub enum MockStatusStep {
    /// Report this status.
    Status(ExportStatus),
    /// Fail with a temporary (5xx) error.
    TemporaryError,
    /// Fail with a fatal (4xx) error.
    FatalError,
}

#[cfg(test)]
impl MockExportClient {
    pub fn new() -> Self {
        Self {
            resolved_id: "12345".to_owned(),
            resolve_fails: false,
            export_id: 1,
            create_fails: false,
            status_script: std::sync::Mutex::new(std::collections::VecDeque::new()),
            fallback_status: ExportStatus::Finished,
            csv_body: String::new(),
            fetch_fails: false,
            status_calls: std::sync::atomic::AtomicUsize::new(0),
            create_calls: std::sync::atomic::AtomicUsize::new(0),
            fetch_calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn with_resolved_id(mut self, id: impl Into<String>) -> Self {
        self.resolved_id = id.into();
        self
    }

    pub fn with_failing_resolve(mut self) -> Self {
        self.resolve_fails = true;
        self
    }

    pub fn with_export_id(mut self, id: i64) -> Self {
        self.export_id = id;
        self
    }

    pub fn with_failing_create(mut self) -> Self {
        self.create_fails = true;
        self
    }

    pub fn with_status_sequence(self, statuses: Vec<ExportStatus>) -> Self {
        self.with_status_steps(statuses.into_iter().map(MockStatusStep::Status).collect())
    }

    pub fn with_status_steps(self, steps: Vec<MockStatusStep>) -> Self {
        {
            let mut script = self.status_script.lock().unwrap();
            script.extend(steps);
        }
        self
    }

    pub fn with_fallback_status(mut self, status: ExportStatus) -> Self {
        self.fallback_status = status;
        self
    }

    pub fn with_csv(mut self, body: impl Into<String>) -> Self {
        self.csv_body = body.into();
        self
    }

    pub fn with_failing_fetch(mut self) -> Self {
        self.fetch_fails = true;
        self
    }

    fn job(&self, status: ExportStatus) -> ExportJob {
        use crate::types::ExportLinks;
        ExportJob {
            id: self.export_id,
            project_id: Some(self.resolved_id.clone()),
            group_id: None,
            status,
            created_at: Some(chrono::Utc::now()),
            started_at: None,
            finished_at: None,
            links: ExportLinks {
                download: format!("https://mock.test/exports/{}/download", self.export_id),
            },
        }
    }
}

#[cfg(test)]
impl ExportApi for MockExportClient {
    type Payload = std::io::Cursor<Vec<u8>>;

    async fn resolve_target(&self, target: &Target) -> Result<String, CollectorError> {
        if self.resolve_fails {
            return Err(CollectorError::InvalidTarget {
                reference: target.reference.clone(),
                reason: format!("{} not found", target.kind),
            });
        }
        Ok(self.resolved_id.clone())
    }

    async fn create_export(
        &self,
        _kind: TargetKind,
        _target_id: &str,
    ) -> Result<ExportJob, CollectorError> {
        self.create_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if self.create_fails {
            return Err(CollectorError::UnexpectedStatus {
                status: 403,
                body: "mock create failure".to_owned(),
            });
        }
        Ok(self.job(ExportStatus::Created))
    }

    async fn get_export(&self, _export_id: i64) -> Result<ExportJob, CollectorError> {
        self.status_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let step = self.status_script.lock().unwrap().pop_front();
        match step {
            Some(MockStatusStep::Status(status)) => Ok(self.job(status)),
            Some(MockStatusStep::TemporaryError) => Err(CollectorError::Server {
                status: 503,
                body: "mock outage".to_owned(),
            }),
            Some(MockStatusStep::FatalError) => Err(CollectorError::UnexpectedStatus {
                status: 404,
                body: "mock not found".to_owned(),
            }),
            None => Ok(self.job(self.fallback_status)),
        }
    }

    async fn fetch_export_data(
        &self,
        _download_url: &str,
    ) -> Result<Self::Payload, CollectorError> {
        self.fetch_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if self.fetch_fails {
            return Err(CollectorError::UnexpectedStatus {
                status: 410,
                body: "mock download gone".to_owned(),
            });
        }
        Ok(std::io::Cursor::new(self.csv_body.clone().into_bytes()))
    }
}

//! Client-side view of the user's translation jobs.
//!
//! The registry keeps one belief about the job list, shared between explicit
//! refreshes and the background [`Poller`]. Both fold into one
//! [`TrackedSet`], so a job seen terminal never shows as pending again.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info};
use uuid::Uuid;

use crate::api::{BackendClient, Download};
use crate::error::ClientError;
use crate::operation::{JobOperation, JobStatus, TrackedSet, any_pending};
use crate::poller::{PollHandle, PollPhase, Poller};

/// Extensions the backend accepts for translation.
pub const ACCEPTED_EXTENSIONS: &[&str] = &["pdf", "epub"];

/// Prefix of ids given to submitted jobs the backend did not name yet.
pub const LOCAL_ID_PREFIX: &str = "local-";

/// A validated file waiting to be uploaded.
#[derive(Debug, Clone)]
pub struct PendingUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
    /// Optional glossary text sent along with the file.
    pub glossary: Option<String>,
}

impl PendingUpload {
    pub fn new(
        file_name: impl Into<String>,
        bytes: Vec<u8>,
        glossary: Option<String>,
        max_bytes: u64,
    ) -> Result<Self, ClientError> {
        let upload = Self {
            file_name: file_name.into(),
            bytes,
            glossary: glossary.filter(|g| !g.trim().is_empty()),
        };
        check_extension(&upload.file_name)?;
        check_size(&upload.file_name, upload.bytes.len() as u64, max_bytes)?;
        Ok(upload)
    }

    /// Reads and validates a file from disk. Size is checked before reading.
    pub fn from_path(
        path: &Path,
        glossary: Option<String>,
        max_bytes: u64,
    ) -> Result<Self, ClientError> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ClientError::UploadRejected {
                reason: format!("{} is not a file name", path.display()),
            })?
            .to_string();
        check_extension(&file_name)?;
        let len = std::fs::metadata(path)?.len();
        check_size(&file_name, len, max_bytes)?;
        let bytes = std::fs::read(path)?;
        Self::new(file_name, bytes, glossary, max_bytes)
    }
}

fn check_extension(file_name: &str) -> Result<(), ClientError> {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension {
        Some(ext) if ACCEPTED_EXTENSIONS.contains(&ext.as_str()) => Ok(()),
        _ => Err(ClientError::UploadRejected {
            reason: format!("{file_name}: only PDF and EPUB files can be translated"),
        }),
    }
}

fn check_size(file_name: &str, len: u64, max_bytes: u64) -> Result<(), ClientError> {
    if len == 0 {
        return Err(ClientError::UploadRejected {
            reason: format!("{file_name} is empty"),
        });
    }
    if len > max_bytes {
        return Err(ClientError::UploadRejected {
            reason: format!("{file_name} is {len} bytes, the limit is {max_bytes}"),
        });
    }
    Ok(())
}

/// Words used by completed jobs against the tier allowance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaUsage {
    pub used_words: u64,
    pub limit_words: u64,
}

impl QuotaUsage {
    /// Share of the allowance used, capped at 100.
    pub fn percent(&self) -> f64 {
        if self.limit_words == 0 {
            return 100.0;
        }
        (self.used_words as f64 / self.limit_words as f64 * 100.0).min(100.0)
    }

    pub fn remaining(&self) -> u64 {
        self.limit_words.saturating_sub(self.used_words)
    }
}

/// Sums `progress_hint` over completed jobs.
pub fn quota_usage(jobs: &[JobOperation], limit_words: u64) -> QuotaUsage {
    let used_words = jobs
        .iter()
        .filter(|j| j.status == JobStatus::Completed)
        .filter_map(|j| j.progress_hint)
        .sum();
    QuotaUsage {
        used_words,
        limit_words,
    }
}

/// One `GET /api/jobs`, in backend order.
pub async fn fetch_jobs(
    client: &BackendClient,
    token: &str,
) -> Result<Vec<JobOperation>, ClientError> {
    let response = client
        .list_jobs(token)
        .await
        .map_err(ClientError::from_authorized)?;
    Ok(response.jobs.into_iter().map(JobOperation::from).collect())
}

/// The user's jobs, refreshed on demand or by a background poller.
pub struct JobRegistry {
    client: BackendClient,
    token: String,
    poller: Poller,
    belief: Arc<Mutex<TrackedSet<JobStatus>>>,
    handle: Option<PollHandle<Vec<JobOperation>>>,
}

impl JobRegistry {
    pub fn new(client: BackendClient, token: impl Into<String>, poller: Poller) -> Self {
        Self {
            client,
            token: token.into(),
            poller,
            belief: Arc::new(Mutex::new(TrackedSet::new())),
            handle: None,
        }
    }

    /// Current belief, in backend order.
    pub fn jobs(&self) -> Vec<JobOperation> {
        lock(&self.belief).current().to_vec()
    }

    pub fn get(&self, id: &str) -> Option<JobOperation> {
        lock(&self.belief).get(id).cloned()
    }

    /// Fetches the full list once and folds it into the belief.
    pub async fn refresh(&self) -> Result<Vec<JobOperation>, ClientError> {
        let next = fetch_jobs(&self.client, &self.token).await?;
        let merged = apply(&self.belief, next);
        debug!(jobs = merged.len(), "job list refreshed");
        Ok(merged)
    }

    /// Background polling handle, started if none is alive.
    pub fn watch(&mut self) -> &PollHandle<Vec<JobOperation>> {
        let handle = match self.handle.take() {
            Some(handle) if !handle.is_finished() => handle,
            _ => self.start_poller(),
        };
        self.handle.insert(handle)
    }

    /// Current handle, if a poller was started.
    pub fn handle(&self) -> Option<&PollHandle<Vec<JobOperation>>> {
        self.handle.as_ref()
    }

    /// Uploads a file and returns the pending job.
    ///
    /// Nothing changes locally if the upload fails.
    pub async fn submit(&mut self, upload: PendingUpload) -> Result<JobOperation, ClientError> {
        let PendingUpload {
            file_name,
            bytes,
            glossary,
        } = upload;
        let size = bytes.len();
        let ack = self
            .client
            .upload(&self.token, &file_name, bytes, glossary.as_deref())
            .await
            .map_err(ClientError::from_upload)?;

        let id = ack
            .job_id
            .unwrap_or_else(|| format!("{LOCAL_ID_PREFIX}{}", Uuid::new_v4()));
        let status = ack.status.unwrap_or(JobStatus::Queued);
        let job = JobOperation::new(id, status, file_name);
        info!(job_id = %job.id, file = %job.label, bytes = size, "upload accepted");

        lock(&self.belief).insert_front(job.clone());

        // A fetch already in flight may predate the upload and report nothing
        // pending. While waiting, the scheduled fetch postdates it anyway.
        match self.handle.as_ref().filter(|h| !h.is_finished()) {
            Some(handle) => {
                if matches!(handle.phase(), PollPhase::Fetching | PollPhase::Idle) {
                    handle.restart();
                }
            }
            None => self.handle = Some(self.start_poller()),
        }
        Ok(job)
    }

    /// Fetches the translated artifact of a completed job.
    ///
    /// Refuses locally, without a request, unless the job is known and
    /// completed.
    pub async fn resolve_download(&self, id: &str) -> Result<Download, ClientError> {
        let ready = self
            .get(id)
            .is_some_and(|job| job.status == JobStatus::Completed);
        if !ready {
            return Err(ClientError::NotReady { id: id.to_string() });
        }
        self.client
            .download(&self.token, id)
            .await
            .map_err(ClientError::from_authorized)
    }

    pub fn quota(&self, limit_words: u64) -> QuotaUsage {
        quota_usage(lock(&self.belief).current(), limit_words)
    }

    /// Stops background polling. Later snapshots are discarded.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.stop();
        }
    }

    fn start_poller(&self) -> PollHandle<Vec<JobOperation>> {
        let client = self.client.clone();
        let token = self.token.clone();
        let belief = Arc::clone(&self.belief);
        debug!(interval_ms = self.poller.interval().as_millis() as u64, "starting job poller");
        self.poller.start_reconciling(
            move || {
                let client = client.clone();
                let token = token.clone();
                async move { fetch_jobs(&client, &token).await }
            },
            |jobs: &Vec<JobOperation>| any_pending(jobs),
            move |_, next| apply(&belief, next),
        )
    }
}

impl Drop for JobRegistry {
    fn drop(&mut self) {
        self.stop();
    }
}

// Folds `next` into the shared belief and returns the result.
fn apply(belief: &Mutex<TrackedSet<JobStatus>>, next: Vec<JobOperation>) -> Vec<JobOperation> {
    lock(belief).apply(next).to_vec()
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn jobs_body(status: &str, word_count: Option<u64>) -> serde_json::Value {
        serde_json::json!({
            "jobs": [{
                "id": "j1",
                "filename": "book.pdf",
                "status": status,
                "word_count": word_count,
                "created_at": "2025-03-01T10:00:00"
            }]
        })
    }

    async fn registry(server: &MockServer, interval_ms: u64) -> JobRegistry {
        let client = BackendClient::new(&server.uri(), Duration::from_secs(5)).unwrap();
        JobRegistry::new(client, "t1", Poller::new(Duration::from_millis(interval_ms)))
    }

    fn pdf() -> PendingUpload {
        PendingUpload::new("book.pdf", b"%PDF-1.4 ...".to_vec(), None, 1024).unwrap()
    }

    #[test]
    fn upload_validation() {
        assert!(PendingUpload::new("a.PDF", vec![1], None, 10).is_ok());
        assert!(PendingUpload::new("a.epub", vec![1], None, 10).is_ok());

        let reject = |name: &str, bytes: Vec<u8>| {
            matches!(
                PendingUpload::new(name, bytes, None, 10),
                Err(ClientError::UploadRejected { .. })
            )
        };
        assert!(reject("a.docx", vec![1]));
        assert!(reject("noext", vec![1]));
        assert!(reject("a.pdf", vec![]));
        assert!(reject("a.pdf", vec![0; 11]));
    }

    #[test]
    fn blank_glossary_is_dropped() {
        let upload = PendingUpload::new("a.pdf", vec![1], Some("  \n".into()), 10).unwrap();
        assert!(upload.glossary.is_none());
    }

    #[test]
    fn from_path_checks_size_before_reading() {
        let dir = tempfile::tempdir().unwrap();
        let big = dir.path().join("big.pdf");
        std::fs::write(&big, vec![0u8; 64]).unwrap();
        assert!(matches!(
            PendingUpload::from_path(&big, None, 32),
            Err(ClientError::UploadRejected { .. })
        ));

        let ok = PendingUpload::from_path(&big, Some("cat = кот".into()), 64).unwrap();
        assert_eq!(ok.file_name, "big.pdf");
        assert_eq!(ok.bytes.len(), 64);
    }

    #[test]
    fn quota_counts_completed_jobs_only() {
        let mut done = JobOperation::new("a", JobStatus::Completed, "a.pdf");
        done.progress_hint = Some(150_000);
        let mut running = JobOperation::new("b", JobStatus::Processing, "b.pdf");
        running.progress_hint = Some(999);
        let usage = quota_usage(&[done, running], 200_000);
        assert_eq!(usage.used_words, 150_000);
        assert_eq!(usage.remaining(), 50_000);
        assert!((usage.percent() - 75.0).abs() < f64::EPSILON);

        let over = QuotaUsage {
            used_words: 300,
            limit_words: 200,
        };
        assert_eq!(over.percent(), 100.0);
        assert_eq!(over.remaining(), 0);
    }

    #[tokio::test]
    async fn submit_poll_complete_download() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/upload"))
            .and(query_param("token", "t1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"job_id": "j1", "status": "queued"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        // queued, then processing three times, then completed for good.
        Mock::given(method("GET"))
            .and(path("/api/jobs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jobs_body("queued", None)))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/jobs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jobs_body("processing", None)))
            .up_to_n_times(3)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/jobs"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(jobs_body("completed", Some(120))),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/jobs/j1/download"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/plain; charset=utf-8")
                    .set_body_string("Перевод"),
            )
            .mount(&server)
            .await;

        let mut registry = registry(&server, 20).await;
        let job = registry.submit(pdf()).await.unwrap();
        assert_eq!(job.id, "j1");
        assert!(job.is_pending());

        let err = registry.resolve_download("j1").await.unwrap_err();
        assert!(matches!(err, ClientError::NotReady { .. }));

        let view = registry.watch().settled().await;
        assert_eq!(view.phase, PollPhase::Idle);
        assert_eq!(view.fetches, 5);

        let jobs = registry.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Completed);
        assert_eq!(jobs[0].result_ref.as_deref(), Some("j1"));
        assert_eq!(registry.quota(200_000).used_words, 120);

        let download = registry.resolve_download("j1").await.unwrap();
        assert_eq!(download, Download::Bytes("Перевод".as_bytes().to_vec()));
    }

    #[tokio::test]
    async fn placeholder_id_until_backend_names_the_job() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/upload"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/jobs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jobs_body("failed", None)))
            .mount(&server)
            .await;

        let mut registry = registry(&server, 20).await;
        let job = registry.submit(pdf()).await.unwrap();
        assert!(job.id.starts_with(LOCAL_ID_PREFIX));
        assert_eq!(registry.jobs()[0].id, job.id);

        registry.watch().settled().await;
        let jobs = registry.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, "j1");
    }

    #[tokio::test]
    async fn rejected_upload_changes_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/upload"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({"detail": "Quota exceeded"})),
            )
            .mount(&server)
            .await;

        let mut registry = registry(&server, 20).await;
        let err = registry.submit(pdf()).await.unwrap_err();
        assert!(matches!(err, ClientError::UploadRejected { ref reason } if reason == "Quota exceeded"));
        assert!(registry.jobs().is_empty());
        assert!(registry.handle().is_none());
    }

    #[tokio::test]
    async fn unauthorized_poll_stops_the_poller() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/jobs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jobs_body("queued", None)))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/jobs"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(serde_json::json!({"detail": "Invalid token"})),
            )
            .mount(&server)
            .await;

        let mut registry = registry(&server, 20).await;
        let view = registry.watch().settled().await;
        assert_eq!(view.phase, PollPhase::Unauthenticated);
        assert_eq!(registry.jobs()[0].status, JobStatus::Queued);

        let requests = server.received_requests().await.unwrap().len();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(server.received_requests().await.unwrap().len(), requests);
    }

    #[tokio::test]
    async fn refresh_is_monotonic() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/jobs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jobs_body("completed", Some(10))))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/jobs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jobs_body("processing", None)))
            .mount(&server)
            .await;

        let registry = registry(&server, 20).await;
        registry.refresh().await.unwrap();
        let jobs = registry.refresh().await.unwrap();
        assert_eq!(jobs[0].status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn unknown_job_is_not_ready_without_a_request() {
        let server = MockServer::start().await;
        let registry = registry(&server, 20).await;
        let err = registry.resolve_download("nope").await.unwrap_err();
        assert!(matches!(err, ClientError::NotReady { ref id } if id == "nope"));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn submit_while_waiting_adds_no_extra_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/upload"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"job_id": "j1", "status": "queued"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/jobs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jobs_body("queued", None)))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/jobs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jobs_body("completed", Some(5))))
            .mount(&server)
            .await;

        let mut registry = registry(&server, 200).await;
        let mut rx = registry.watch().subscribe();
        rx.wait_for(|v| v.fetches == 1 && v.phase == PollPhase::Waiting)
            .await
            .unwrap();
        registry.submit(pdf()).await.unwrap();

        let view = registry.watch().settled().await;
        assert_eq!(view.phase, PollPhase::Idle);
        assert_eq!(view.fetches, 3);

        tokio::time::sleep(Duration::from_millis(500)).await;
        let fetches = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == "/api/jobs")
            .count();
        assert_eq!(fetches, 3);
    }
}

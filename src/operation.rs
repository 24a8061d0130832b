use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Which backend collection an operation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    Job,
    Payment,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Job => write!(f, "job"),
            OperationKind::Payment => write!(f, "payment"),
        }
    }
}

/// Partition of a status space into pending and terminal states.
pub trait OperationStatus: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    const KIND: OperationKind;

    /// Pending states are re-polled; everything else is terminal.
    fn is_pending(&self) -> bool;

    /// The one terminal state that carries a result.
    fn is_success(&self) -> bool;

    fn is_terminal(&self) -> bool {
        !self.is_pending()
    }
}

/// Status of a translation job as reported by `GET /api/jobs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    /// A status this client does not know yet. Treated as pending.
    Other(String),
}

impl JobStatus {
    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Other(s) => s,
        }
    }
}

impl From<String> for JobStatus {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "queued" => JobStatus::Queued,
            "processing" => JobStatus::Processing,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            _ => JobStatus::Other(value),
        }
    }
}

impl From<JobStatus> for String {
    fn from(value: JobStatus) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl OperationStatus for JobStatus {
    const KIND: OperationKind = OperationKind::Job;

    fn is_pending(&self) -> bool {
        matches!(
            self,
            JobStatus::Queued | JobStatus::Processing | JobStatus::Other(_)
        )
    }

    fn is_success(&self) -> bool {
        *self == JobStatus::Completed
    }
}

/// Status of a checkout, order or invoice, normalized across providers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
    /// A provider status this client does not know. Treated as pending.
    Other(String),
}

impl PaymentStatus {
    pub fn as_str(&self) -> &str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Other(s) => s,
        }
    }
}

impl From<String> for PaymentStatus {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" | "active" | "open" | "processing" => PaymentStatus::Pending,
            "completed" | "paid" => PaymentStatus::Completed,
            "failed" | "declined" | "error" => PaymentStatus::Failed,
            "cancelled" | "canceled" | "expired" => PaymentStatus::Cancelled,
            _ => PaymentStatus::Other(value),
        }
    }
}

impl From<PaymentStatus> for String {
    fn from(value: PaymentStatus) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl OperationStatus for PaymentStatus {
    const KIND: OperationKind = OperationKind::Payment;

    fn is_pending(&self) -> bool {
        matches!(self, PaymentStatus::Pending | PaymentStatus::Other(_))
    }

    fn is_success(&self) -> bool {
        *self == PaymentStatus::Completed
    }
}

/// A backend-tracked asynchronous task, visible to the client only through
/// its id and status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteOperation<S> {
    pub id: String,
    pub status: S,
    /// File name for jobs, provider reference for payments.
    pub label: String,
    /// Word count for jobs. Display only.
    pub progress_hint: Option<u64>,
    pub created_at: Option<DateTime<Utc>>,
    /// Set only in the successful terminal state.
    pub result_ref: Option<String>,
}

pub type JobOperation = RemoteOperation<JobStatus>;
pub type PaymentOperation = RemoteOperation<PaymentStatus>;

impl<S: OperationStatus> RemoteOperation<S> {
    pub fn new(id: impl Into<String>, status: S, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status,
            label: label.into(),
            progress_hint: None,
            created_at: None,
            result_ref: None,
        }
    }

    pub fn kind(&self) -> OperationKind {
        S::KIND
    }

    pub fn is_pending(&self) -> bool {
        self.status.is_pending()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// True when at least one operation in the set is still pending.
pub fn any_pending<S: OperationStatus>(ops: &[RemoteOperation<S>]) -> bool {
    ops.iter().any(RemoteOperation::is_pending)
}

/// A tracked set of operations as the client believes it to be.
///
/// Each fresh snapshot replaces the set wholesale, in its own order. Ids ever
/// seen terminal are remembered across snapshots, so a terminal operation
/// stays terminal even if it drops out of one listing and comes back pending.
#[derive(Debug, Clone)]
pub struct TrackedSet<S: OperationStatus> {
    current: Vec<RemoteOperation<S>>,
    terminal: HashMap<String, RemoteOperation<S>>,
}

impl<S: OperationStatus> Default for TrackedSet<S> {
    fn default() -> Self {
        Self {
            current: Vec::new(),
            terminal: HashMap::new(),
        }
    }
}

impl<S: OperationStatus> TrackedSet<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> &[RemoteOperation<S>] {
        &self.current
    }

    pub fn get(&self, id: &str) -> Option<&RemoteOperation<S>> {
        self.current.iter().find(|op| op.id == id)
    }

    /// Adds an operation ahead of the others unless its id is already known.
    pub fn insert_front(&mut self, op: RemoteOperation<S>) -> bool {
        if self.get(&op.id).is_some() {
            return false;
        }
        self.current.insert(0, op);
        true
    }

    /// Folds a fresh snapshot in and returns the resulting set.
    pub fn apply(&mut self, next: Vec<RemoteOperation<S>>) -> &[RemoteOperation<S>] {
        let merged: Vec<_> = next
            .into_iter()
            .map(|op| {
                let known = self
                    .terminal
                    .get(&op.id)
                    .or_else(|| self.current.iter().find(|p| p.id == op.id));
                match known {
                    Some(prev) => reconcile_operation(prev, op),
                    None => op,
                }
            })
            .collect();
        for op in merged.iter().filter(|op| op.is_terminal()) {
            self.terminal.insert(op.id.clone(), op.clone());
        }
        self.current = merged;
        &self.current
    }
}

/// Monotonic merge of two observations of the same operation.
pub fn reconcile_operation<S: OperationStatus>(
    previous: &RemoteOperation<S>,
    next: RemoteOperation<S>,
) -> RemoteOperation<S> {
    if previous.is_terminal() && next.is_pending() {
        warn!(
            kind = %S::KIND,
            id = %next.id,
            believed = ?previous.status,
            reported = ?next.status,
            "ignoring regression from terminal to pending status"
        );
        return previous.clone();
    }
    next
}

/// Parses the backend's timestamps: RFC 3339, or naive ISO-8601 read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

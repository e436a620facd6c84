use serde::{Deserialize, Serialize};
use std::future::Future;
use thiserror::Error;

use crate::entry::{Entry, LastCommit};
use crate::store::TreeKey;

/// Response header carrying the next commit-log page.
pub const MORE_LOGS_HEADER: &str = "More-Logs-Url";

/// Failure reported by a collaborator (transport, backend).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation}: {message}")]
pub struct ServiceError {
    pub operation: String,
    pub message: String,
}

impl ServiceError {
    pub fn new(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// Commit details inside a commit-log record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub id: String,
    pub message: String,
    #[serde(default)]
    pub author_name: String,
    #[serde(default)]
    pub authored_date: String,
}

/// One element of the commit-log JSON array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitLogRecord {
    /// "tree", "blob" or "submodule"
    #[serde(rename = "type")]
    pub kind: String,
    pub file_name: String,
    pub commit: CommitInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_path: Option<String>,
}

impl CommitLogRecord {
    pub fn to_last_commit(&self) -> LastCommit {
        LastCommit {
            id: self.commit.id.clone(),
            message: self.commit.message.clone(),
            author: self.commit.author_name.clone(),
            authored_at: self.commit.authored_date.clone(),
            url: self.commit_path.clone(),
        }
    }
}

/// One page of commit-log data plus the cursor for the next page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitLogPage {
    pub records: Vec<CommitLogRecord>,
    /// `None` when the log is exhausted
    pub next_cursor: Option<String>,
}

impl CommitLogPage {
    pub fn new(records: Vec<CommitLogRecord>, next_cursor: Option<String>) -> Self {
        Self {
            records,
            next_cursor: next_cursor.filter(|c| !c.is_empty()),
        }
    }

    /// Build a page from a raw response: JSON body plus headers.
    ///
    /// Header names are matched case-insensitively; an absent or empty
    /// `More-Logs-Url` ends pagination.
    pub fn from_response<'a>(
        body: &str,
        headers: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, ServiceError> {
        let next_cursor = headers
            .into_iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(MORE_LOGS_HEADER))
            .map(|(_, value)| value.trim().to_owned());
        let records: Vec<CommitLogRecord> = serde_json::from_str(body)
            .map_err(|e| ServiceError::new("fetch_commit_log", e.to_string()))?;
        Ok(Self::new(records, next_cursor))
    }
}

/// Backend access for one project: file lists, commit logs, file content.
pub trait TreeService: Send + Sync + 'static {
    /// Every blob path in the checkout, in server order.
    fn fetch_files(
        &self,
        key: &TreeKey,
    ) -> impl Future<Output = Result<Vec<String>, ServiceError>> + Send;

    /// The commit-log page starting at `cursor`.
    fn fetch_commit_log(
        &self,
        cursor: &str,
    ) -> impl Future<Output = Result<CommitLogPage, ServiceError>> + Send;

    /// Load a file's content into the editor.
    fn fetch_file_data(
        &self,
        key: &TreeKey,
        entry: &Entry,
    ) -> impl Future<Output = Result<(), ServiceError>> + Send;
}

/// Route changes.
pub trait Navigator: Send + Sync + 'static {
    /// In-app route change
    fn push_route(&self, route: &str);

    /// Full page load, leaving the editor
    fn visit_url(&self, url: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Alert,
    Notice,
}

/// Transient user-facing alerts.
pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, message: &str, severity: Severity);
}

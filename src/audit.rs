//! Audit trail for security-relevant actions.
//!
//! Entries are immutable and append-only. Ownership passes to the sink as soon
//! as an entry is recorded; concurrent writers may interleave in any order.
//!
//! # Actions
//!
//! | Action | When |
//! |--------|------|
//! | `auth_failure` | API key or bearer token missing or rejected |
//! | `api_key_validate` | API key accepted |
//! | `auth_success` | Bearer token accepted |

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::config::{AuditConfig, AuditSinkKind};
use crate::Result;

/// Credential missing or rejected
pub const AUTH_FAILURE: &str = "auth_failure";
/// API key accepted
pub const API_KEY_VALIDATE: &str = "api_key_validate";
/// Bearer token accepted
pub const AUTH_SUCCESS: &str = "auth_success";

/// One audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// Unique entry id
    pub id: String,
    /// When the entry was created
    pub timestamp: DateTime<Utc>,
    /// Request correlation id
    pub correlation_id: String,
    /// Acting user id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Acting user email
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    /// What happened (`auth_failure`, ...)
    pub action: String,
    /// Kind of resource acted on
    pub resource_type: String,
    /// Specific resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    /// Outcome
    pub success: bool,
    /// Client address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    /// Extra structured detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl AuditEntry {
    /// Start an entry with a fresh id and timestamp
    #[must_use]
    pub fn new(
        correlation_id: impl Into<String>,
        action: impl Into<String>,
        resource_type: impl Into<String>,
        success: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            correlation_id: correlation_id.into(),
            user_id: None,
            user_email: None,
            action: action.into(),
            resource_type: resource_type.into(),
            resource_id: None,
            success,
            ip_address: None,
            details: None,
        }
    }

    /// Attach the acting user
    #[must_use]
    pub fn user(mut self, user_id: Option<String>, user_email: Option<String>) -> Self {
        self.user_id = user_id;
        self.user_email = user_email;
        self
    }

    /// Attach the resource id
    #[must_use]
    pub fn resource_id(mut self, id: impl Into<String>) -> Self {
        self.resource_id = Some(id.into());
        self
    }

    /// Attach the client address
    #[must_use]
    pub fn ip_address(mut self, ip: Option<String>) -> Self {
        self.ip_address = ip;
        self
    }

    /// Attach details
    #[must_use]
    pub fn details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Write-only destination for audit entries
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Append an entry
    async fn record(&self, entry: AuditEntry) -> Result<()>;
}

/// Emits entries through `tracing` as a JSON blob in the `audit` field:
///
/// ```text
/// INFO dispatch_gateway::audit audit={"id":"...","action":"auth_failure",...}
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<()> {
        let json = serde_json::to_string(&entry)?;
        tracing::info!(audit = %json, "audit");
        Ok(())
    }
}

/// Appends entries as JSON lines to a file
#[derive(Debug)]
pub struct FileAuditSink {
    path: PathBuf,
    file: tokio::sync::Mutex<tokio::fs::File>,
}

impl FileAuditSink {
    /// Open (or create) the file in append mode
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the file or its parent directory cannot be
    /// created.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            file: tokio::sync::Mutex::new(file),
        })
    }

    /// Path being written
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditSink for FileAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<()> {
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');
        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Keeps entries in memory
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    /// Create an empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded entries
    #[must_use]
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }

    /// Number of recorded entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing was recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<()> {
        self.entries.lock().push(entry);
        Ok(())
    }
}

/// Build the configured sink
///
/// # Errors
///
/// Returns an error if the file sink cannot be opened.
pub async fn build_sink(config: &AuditConfig) -> Result<Arc<dyn AuditSink>> {
    Ok(match config.sink {
        AuditSinkKind::Tracing => Arc::new(TracingAuditSink),
        AuditSinkKind::File => Arc::new(FileAuditSink::open(&config.path).await?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_sets_fields() {
        // GIVEN/WHEN: an entry built with all optional parts
        let entry = AuditEntry::new("c1", AUTH_FAILURE, "auth", false)
            .user(Some("u1".to_string()), Some("a@example.com".to_string()))
            .resource_id("newsletter.generate")
            .ip_address(Some("10.0.0.1".to_string()))
            .details(json!({"reason": "Missing API key"}));

        // THEN: every field is populated
        assert_eq!(entry.correlation_id, "c1");
        assert_eq!(entry.action, "auth_failure");
        assert!(!entry.success);
        assert_eq!(entry.user_email.as_deref(), Some("a@example.com"));
        assert_eq!(entry.details.unwrap()["reason"], "Missing API key");
    }

    #[test]
    fn serializes_camel_case_without_empty_options() {
        let entry = AuditEntry::new("c1", AUTH_SUCCESS, "auth", true);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["correlationId"], "c1");
        assert_eq!(json["resourceType"], "auth");
        assert!(json.get("userId").is_none());
    }

    #[tokio::test]
    async fn memory_sink_appends() {
        let sink = MemoryAuditSink::new();
        sink.record(AuditEntry::new("c1", AUTH_FAILURE, "auth", false)).await.unwrap();
        sink.record(AuditEntry::new("c2", AUTH_SUCCESS, "auth", true)).await.unwrap();

        let entries = sink.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].correlation_id, "c1");
        assert_eq!(entries[1].correlation_id, "c2");
    }

    #[tokio::test]
    async fn tracing_sink_does_not_fail() {
        TracingAuditSink
            .record(AuditEntry::new("c1", API_KEY_VALIDATE, "auth", true))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn file_sink_writes_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("audit.jsonl");
        let sink = FileAuditSink::open(&path).await.unwrap();

        sink.record(AuditEntry::new("c1", AUTH_FAILURE, "auth", false)).await.unwrap();
        sink.record(AuditEntry::new("c2", AUTH_SUCCESS, "auth", true)).await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<AuditEntry> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].action, "auth_success");
    }
}

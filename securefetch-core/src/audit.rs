//! Audit events for securefetch sessions
//!
//! Security-relevant actions are recorded as structured `tracing` events
//! under the `securefetch::audit` target, so they can be filtered or routed
//! separately from diagnostic logging with `RUST_LOG`.

use std::collections::BTreeMap;
use std::time::Instant;
use uuid::Uuid;

/// Target used for every audit event
pub const AUDIT_TARGET: &str = "securefetch::audit";

/// Audit action types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    /// Credential check
    Authentication,
    /// Directory listing
    List,
    /// File download
    FileDownload,
    /// Session start
    SessionStart,
    /// Session end
    SessionEnd,
}

/// Audit result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditResult {
    /// Operation successful
    Success,
    /// Operation failed
    Failure,
    /// Operation denied
    Denied,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Authentication => "authentication",
            AuditAction::List => "list",
            AuditAction::FileDownload => "file_download",
            AuditAction::SessionStart => "session_start",
            AuditAction::SessionEnd => "session_end",
        }
    }
}

impl AuditResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditResult::Success => "success",
            AuditResult::Failure => "failure",
            AuditResult::Denied => "denied",
        }
    }
}

/// Audit event structure
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub action: AuditAction,
    pub result: AuditResult,
    pub session_id: Option<Uuid>,
    pub source: Option<String>,
    pub user: Option<String>,
    pub file_path: Option<String>,
    pub bytes_transferred: Option<u64>,
    pub duration_ms: Option<u64>,
    pub error_code: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl AuditEvent {
    /// Create new audit event
    pub fn new(action: AuditAction, result: AuditResult) -> Self {
        Self {
            action,
            result,
            session_id: None,
            source: None,
            user: None,
            file_path: None,
            bytes_transferred: None,
            duration_ms: None,
            error_code: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_session_id(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Set peer address
    pub fn with_source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }

    pub fn with_user(mut self, user: &str) -> Self {
        self.user = Some(user.to_string());
        self
    }

    pub fn with_file_path(mut self, file_path: &str) -> Self {
        self.file_path = Some(file_path.to_string());
        self
    }

    pub fn with_bytes_transferred(mut self, bytes: u64) -> Self {
        self.bytes_transferred = Some(bytes);
        self
    }

    /// Set duration from a start instant
    pub fn with_elapsed(mut self, started: Instant) -> Self {
        self.duration_ms = Some(started.elapsed().as_millis() as u64);
        self
    }

    pub fn with_error_code(mut self, code: impl ToString) -> Self {
        self.error_code = Some(code.to_string());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: String) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Severity follows the result: failures of authentication are warnings
    fn level(&self) -> tracing::Level {
        match (self.result, self.action) {
            (AuditResult::Success, _) => tracing::Level::INFO,
            (AuditResult::Denied, _) => tracing::Level::WARN,
            (AuditResult::Failure, AuditAction::Authentication) => tracing::Level::WARN,
            (AuditResult::Failure, _) => tracing::Level::INFO,
        }
    }

    /// Emit the event through `tracing`
    pub fn emit(&self) {
        let session = self.session_id.map(|id| id.to_string());
        let metadata = if self.metadata.is_empty() {
            None
        } else {
            Some(format!("{:?}", self.metadata))
        };

        macro_rules! audit {
            ($level:expr) => {
                tracing::event!(
                    target: AUDIT_TARGET,
                    $level,
                    action = self.action.as_str(),
                    result = self.result.as_str(),
                    session = session.as_deref(),
                    source = self.source.as_deref(),
                    user = self.user.as_deref(),
                    file = self.file_path.as_deref(),
                    bytes = self.bytes_transferred,
                    duration_ms = self.duration_ms,
                    error_code = self.error_code.as_deref(),
                    metadata = metadata.as_deref(),
                    "audit"
                )
            };
        }

        if self.level() == tracing::Level::WARN {
            audit!(tracing::Level::WARN);
        } else {
            audit!(tracing::Level::INFO);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_event_creation() {
        let session = Uuid::new_v4();
        let event = AuditEvent::new(AuditAction::FileDownload, AuditResult::Success)
            .with_session_id(session)
            .with_source("127.0.0.1:50000")
            .with_user("GroupProject")
            .with_file_path("song.mp3")
            .with_bytes_transferred(4096);

        assert_eq!(event.session_id, Some(session));
        assert_eq!(event.source.as_deref(), Some("127.0.0.1:50000"));
        assert_eq!(event.user.as_deref(), Some("GroupProject"));
        assert_eq!(event.file_path.as_deref(), Some("song.mp3"));
        assert_eq!(event.bytes_transferred, Some(4096));
        event.emit();
    }

    #[test]
    fn test_severity_mapping() {
        let denied = AuditEvent::new(AuditAction::Authentication, AuditResult::Denied);
        assert_eq!(denied.level(), tracing::Level::WARN);

        let bad_auth = AuditEvent::new(AuditAction::Authentication, AuditResult::Failure);
        assert_eq!(bad_auth.level(), tracing::Level::WARN);

        let missing_file = AuditEvent::new(AuditAction::FileDownload, AuditResult::Failure)
            .with_error_code(2);
        assert_eq!(missing_file.level(), tracing::Level::INFO);
        assert_eq!(missing_file.error_code.as_deref(), Some("2"));
    }

    #[test]
    fn test_field_names_are_snake_case() {
        assert_eq!(AuditAction::FileDownload.as_str(), "file_download");
        assert_eq!(AuditAction::SessionStart.as_str(), "session_start");
        assert_eq!(AuditAction::SessionEnd.as_str(), "session_end");
        assert_eq!(AuditAction::Authentication.as_str(), "authentication");
        assert_eq!(AuditAction::List.as_str(), "list");
        assert_eq!(AuditResult::Denied.as_str(), "denied");
    }
}

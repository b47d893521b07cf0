use serde::{Deserialize, Serialize};

pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// A pending ask to execute a named agent, awaiting approval or denial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub agent: String,
    pub user: String,
    pub time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Request {
    pub fn new(agent: impl Into<String>, user: impl Into<String>, notes: Option<String>) -> Self {
        Self {
            id: fresh_request_id(),
            agent: agent.into(),
            user: user.into(),
            time: unix_now(),
            notes,
        }
    }
}

fn fresh_request_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static SEQ: AtomicU64 = AtomicU64::new(0);

    let nanos = chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_default();
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    format!("req-{:x}-{:x}-{:x}", nanos, std::process::id(), seq)
}

/// One line of the append-only execution record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub time: i64,
    pub agent: String,
    pub exec: bool,
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver: Option<String>,
}

impl AuditEntry {
    pub fn new(agent: impl Into<String>, exec: bool, exit_code: i32) -> Self {
        Self {
            time: unix_now(),
            agent: agent.into(),
            exec,
            exit_code,
            error: None,
            requester: None,
            approver: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_requester(mut self, requester: impl Into<String>) -> Self {
        self.requester = Some(requester.into());
        self
    }

    pub fn with_approver(mut self, approver: impl Into<String>) -> Self {
        self.approver = Some(approver.into());
        self
    }
}

/// A named automation agent discovered from the agents directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentInfo {
    pub name: String,
    pub description: String,
}

//! Audit records produced by a proxied session
//!
//! A session produces one [`ProxyLog`] when the backend connection is
//! attempted, any number of [`CommandLog`] entries while relaying, and
//! exactly one [`ProxyLogFinish`] when it ends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier handed out by the service for a session's proxy log
pub type LogId = u64;

/// How the user reached the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoginType {
    /// SSH terminal
    #[serde(rename = "ST")]
    SshTerminal,
    /// Web terminal
    #[serde(rename = "WT")]
    WebTerminal,
}

/// Start record of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyLog {
    pub username: String,
    pub user_full_name: String,
    pub asset_hostname: String,
    pub asset_ip: String,
    pub system_user: String,
    pub login_type: LoginType,
    pub started_at: DateTime<Utc>,
    pub failed: bool,
}

/// Finish record of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyLogFinish {
    pub log_id: LogId,
    pub finished_at: DateTime<Utc>,
    pub failed: bool,
}

/// One command typed on the backend shell together with its output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandLog {
    pub log_id: LogId,
    pub command_no: u64,
    pub command: String,
    pub output: String,
    pub timestamp: DateTime<Utc>,
}

/// Audit record as written to the JSON lines sink
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEvent<'a> {
    ProxyLogStart {
        log_id: LogId,
        #[serde(flatten)]
        record: &'a ProxyLog,
    },
    CommandLog(&'a CommandLog),
    ProxyLogFinish(&'a ProxyLogFinish),
}

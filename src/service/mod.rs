//! Audit and permission service
//!
//! The proxy core only talks to the [`ProxyService`] trait. The bundled
//! [`InventoryService`] answers from a JSON inventory and records audit
//! events in memory and, optionally, in a JSON lines file.

pub mod inventory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::audit::{CommandLog, LogId, ProxyLog, ProxyLogFinish};
use crate::error::Result;

pub use inventory::{Inventory, InventoryService, Permission};

/// A person allowed to log into the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub username: String,
    #[serde(default)]
    pub name: String,
    /// Gateway login password
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
}

/// A backend machine reachable through the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: u64,
    pub hostname: String,
    pub ip: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
}

/// An account on the backend machines the gateway logs in as
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemUser {
    pub id: u64,
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// OpenSSH private key content (not a path)
    #[serde(default, skip_serializing)]
    pub private_key: Option<String>,
}

/// Secrets used to authenticate against a backend
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Credentials {
    pub password: Option<String>,
    pub private_key: Option<String>,
}

fn default_ssh_port() -> u16 {
    22
}

/// The audit/permission collaborator used by every session
///
/// Implementations are shared between sessions and must be safe for
/// concurrent use.
#[async_trait]
pub trait ProxyService: Send + Sync {
    /// Whether `user_id` may open `system_user_id` on `asset_id`
    async fn validate_permission(
        &self,
        user_id: u64,
        asset_id: u64,
        system_user_id: u64,
    ) -> Result<bool>;

    /// Backend credentials of a system user
    async fn get_credentials(&self, system_user: &SystemUser) -> Result<Credentials>;

    /// Persist a session start record and return its id
    async fn start_proxy_log(&self, record: &ProxyLog) -> Result<LogId>;

    /// Persist one command/output cycle
    async fn append_command_log(&self, record: &CommandLog) -> Result<()>;

    /// Persist the end of a session
    async fn finish_proxy_log(&self, record: &ProxyLogFinish) -> Result<()>;
}

//! JSON inventory backed implementation of [`ProxyService`]

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{Asset, Credentials, ProxyService, SystemUser, User};
use crate::audit::{AuditEvent, CommandLog, LogId, ProxyLog, ProxyLogFinish};
use crate::error::{ProxyError, Result};

/// Grant of one system user on one asset to one user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub user_id: u64,
    pub asset_id: u64,
    pub system_user_id: u64,
}

/// Everything the gateway knows about users, assets and grants
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub assets: Vec<Asset>,
    #[serde(default)]
    pub system_users: Vec<SystemUser>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

impl Inventory {
    /// Parse an inventory from JSON text
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load an inventory file
    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::from_json(&text)
    }
}

#[derive(Debug, Default)]
struct AuditState {
    next_log_id: LogId,
    proxy_logs: Vec<(LogId, ProxyLog)>,
    finishes: Vec<ProxyLogFinish>,
    command_logs: Vec<CommandLog>,
}

/// Inventory lookups plus an audit trail kept in memory and, optionally,
/// appended to a JSON lines file
#[derive(Debug)]
pub struct InventoryService {
    inventory: Inventory,
    audit_log: Option<PathBuf>,
    state: Mutex<AuditState>,
}

impl InventoryService {
    /// Create a service answering from `inventory`
    pub fn new(inventory: Inventory) -> Self {
        Self {
            inventory,
            audit_log: None,
            state: Mutex::new(AuditState {
                next_log_id: 1,
                ..Default::default()
            }),
        }
    }

    /// Also append every audit record to `path`
    pub fn with_audit_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.audit_log = Some(path.into());
        self
    }

    /// The inventory this service answers from
    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    /// Check a gateway login; returns the user on success
    pub fn authenticate_user(&self, username: &str, password: &str) -> Option<&User> {
        self.find_user(username)
            .filter(|user| user.password.as_deref() == Some(password))
    }

    pub fn find_user(&self, username: &str) -> Option<&User> {
        self.inventory.users.iter().find(|u| u.username == username)
    }

    /// Find an asset by hostname or IP address
    pub fn find_asset(&self, name: &str) -> Option<&Asset> {
        self.inventory
            .assets
            .iter()
            .find(|a| a.hostname == name || a.ip == name)
    }

    pub fn find_system_user(&self, username: &str) -> Option<&SystemUser> {
        self.inventory
            .system_users
            .iter()
            .find(|s| s.username == username)
    }

    /// Start records in creation order
    pub async fn proxy_logs(&self) -> Vec<(LogId, ProxyLog)> {
        self.state.lock().await.proxy_logs.clone()
    }

    /// Finish records in emission order
    pub async fn finished_logs(&self) -> Vec<ProxyLogFinish> {
        self.state.lock().await.finishes.clone()
    }

    /// Command records in emission order
    pub async fn command_logs(&self) -> Vec<CommandLog> {
        self.state.lock().await.command_logs.clone()
    }

    async fn write_event(&self, event: AuditEvent<'_>) -> Result<()> {
        let Some(path) = &self.audit_log else {
            return Ok(());
        };

        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl ProxyService for InventoryService {
    async fn validate_permission(
        &self,
        user_id: u64,
        asset_id: u64,
        system_user_id: u64,
    ) -> Result<bool> {
        let wanted = Permission {
            user_id,
            asset_id,
            system_user_id,
        };
        Ok(self.inventory.permissions.contains(&wanted))
    }

    async fn get_credentials(&self, system_user: &SystemUser) -> Result<Credentials> {
        // The inventory entry is authoritative over whatever the caller holds
        let known = self
            .inventory
            .system_users
            .iter()
            .find(|s| s.id == system_user.id)
            .ok_or_else(|| {
                ProxyError::service(format!("Unknown system user {}", system_user.username))
            })?;

        if known.password.is_none() && known.private_key.is_none() {
            warn!("System user {} has no credentials configured", known.username);
        }

        Ok(Credentials {
            password: known.password.clone(),
            private_key: known.private_key.clone(),
        })
    }

    async fn start_proxy_log(&self, record: &ProxyLog) -> Result<LogId> {
        // The sink gets the record before it exists anywhere else, so a failed
        // write leaves no started session behind
        let mut state = self.state.lock().await;
        let log_id = state.next_log_id;
        self.write_event(AuditEvent::ProxyLogStart { log_id, record })
            .await?;

        state.next_log_id += 1;
        state.proxy_logs.push((log_id, record.clone()));
        debug!("Proxy log {} started for {}", log_id, record.username);
        Ok(log_id)
    }

    async fn append_command_log(&self, record: &CommandLog) -> Result<()> {
        self.state.lock().await.command_logs.push(record.clone());
        self.write_event(AuditEvent::CommandLog(record)).await
    }

    async fn finish_proxy_log(&self, record: &ProxyLogFinish) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            if let Some((_, log)) = state
                .proxy_logs
                .iter_mut()
                .find(|(id, _)| *id == record.log_id)
            {
                log.failed = record.failed;
            }
            state.finishes.push(record.clone());
        }
        debug!("Proxy log {} finished (failed={})", record.log_id, record.failed);

        self.write_event(AuditEvent::ProxyLogFinish(record)).await
    }
}

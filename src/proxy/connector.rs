//! Backend connection establishment
//!
//! Permission check, start record, credential lookup and the SSH handshake.
//! Once the start record exists, every failure path finishes it as failed.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info, warn};

use super::SessionContext;
use crate::audit::{LogId, ProxyLog, ProxyLogFinish};
use crate::channel::{BackendChannel, ByteChannel};
use crate::config::SessionSettings;
use crate::error::{ProxyError, Result};
use crate::service::{Credentials, ProxyService};

/// Everything needed to open an interactive shell on a backend
#[derive(Debug, Clone)]
pub struct ShellRequest<'a> {
    pub host: &'a str,
    pub port: u16,
    pub username: &'a str,
    pub credentials: &'a Credentials,
    pub term: &'a str,
    pub width: u16,
    pub height: u16,
    /// Bound on TCP connect, key exchange and authentication
    pub timeout: Duration,
}

/// Opens shells on backend hosts
///
/// Implementations classify handshake failures as
/// [`ProxyError::Authentication`] (credentials or protocol rejected) or
/// [`ProxyError::ConnectTimeout`] / [`ProxyError::Connection`] (unreachable).
#[async_trait]
pub trait BackendTransport: Send + Sync {
    async fn open_shell(&self, request: &ShellRequest<'_>) -> Result<Box<dyn BackendChannel>>;
}

/// A backend shell ready for relaying, with the session's log id
pub struct ConnectedBackend {
    pub log_id: LogId,
    pub channel: Box<dyn BackendChannel>,
}

impl std::fmt::Debug for ConnectedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectedBackend")
            .field("log_id", &self.log_id)
            .finish_non_exhaustive()
    }
}

/// Establishes the backend side of a session
pub struct SessionConnector<'a> {
    service: &'a dyn ProxyService,
    transport: &'a dyn BackendTransport,
    settings: &'a SessionSettings,
}

impl<'a> SessionConnector<'a> {
    pub fn new(
        service: &'a dyn ProxyService,
        transport: &'a dyn BackendTransport,
        settings: &'a SessionSettings,
    ) -> Self {
        Self {
            service,
            transport,
            settings,
        }
    }

    /// Connect the session to its backend.
    ///
    /// A denied permission returns [`ProxyError::PermissionDenied`] without
    /// creating any record or touching the backend. Any later failure is
    /// reported to the client and recorded as a failed session.
    pub async fn connect(
        &self,
        ctx: &SessionContext,
        client: &mut dyn ByteChannel,
    ) -> Result<ConnectedBackend> {
        let allowed = self
            .service
            .validate_permission(ctx.user.id, ctx.asset.id, ctx.system_user.id)
            .await?;

        if !allowed {
            warn!(
                "User {} have no permission connect {} with {}",
                ctx.user.username, ctx.asset.ip, ctx.system_user.username
            );
            return Err(ProxyError::PermissionDenied {
                user: ctx.user.username.clone(),
                asset: ctx.asset.ip.clone(),
                system_user: ctx.system_user.username.clone(),
            });
        }

        let record = ProxyLog {
            username: ctx.user.username.clone(),
            user_full_name: ctx.user.name.clone(),
            asset_hostname: ctx.asset.hostname.clone(),
            asset_ip: ctx.asset.ip.clone(),
            system_user: ctx.system_user.username.clone(),
            login_type: ctx.login_type,
            started_at: Utc::now(),
            failed: false,
        };
        let log_id = self.service.start_proxy_log(&record).await?;

        match self.open_backend(ctx, client).await {
            Ok(mut channel) => {
                channel.set_read_timeout(self.settings.read_timeout);
                info!(
                    "Connect asset {}@{}:{} successfully",
                    ctx.system_user.username, ctx.asset.ip, ctx.asset.port
                );
                Ok(ConnectedBackend { log_id, channel })
            }
            Err(e) => {
                let msg = failure_message(ctx, &e);
                warn!("{}", msg);

                if let Err(send_err) = client.send(warning(&format!("{}\r\n", msg)).as_bytes()).await {
                    warn!("Could not report connect failure to client: {}", send_err);
                }

                let finish = ProxyLogFinish {
                    log_id,
                    finished_at: Utc::now(),
                    failed: true,
                };
                if let Err(finish_err) = self.service.finish_proxy_log(&finish).await {
                    error!("Failed to finish proxy log {}: {}", log_id, finish_err);
                }

                Err(e)
            }
        }
    }

    async fn open_backend(
        &self,
        ctx: &SessionContext,
        client: &mut dyn ByteChannel,
    ) -> Result<Box<dyn BackendChannel>> {
        let credentials = self.service.get_credentials(&ctx.system_user).await?;

        client
            .send(
                format!(
                    "Connecting {}@{}:{} ... ",
                    ctx.system_user.username, ctx.asset.ip, ctx.asset.port
                )
                .as_bytes(),
            )
            .await?;

        let size = ctx.window_size();
        let request = ShellRequest {
            host: &ctx.asset.ip,
            port: ctx.asset.port,
            username: &ctx.system_user.username,
            credentials: &credentials,
            term: &ctx.term,
            width: size.width,
            height: size.height,
            timeout: self.settings.connect_timeout,
        };

        self.transport.open_shell(&request).await
    }
}

fn failure_message(ctx: &SessionContext, err: &ProxyError) -> String {
    if err.is_auth_failure() {
        format!(
            "Connect backend server {} failed: Auth failed",
            ctx.asset.ip
        )
    } else if err.is_transport_failure() {
        format!("Connect asset {} failed: Timeout", ctx.asset.ip)
    } else {
        format!("Connect asset {} failed: {}", ctx.asset.ip, err)
    }
}

/// Highlight a line for the client terminal
pub(crate) fn warning(text: &str) -> String {
    format!("\x1b[93m{}\x1b[0m", text)
}

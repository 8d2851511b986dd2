//! Full-duplex relay between the client and the backend shell

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::segmenter::{CommandSegmenter, CompletedCommand};
use super::{SessionContext, WindowSize};
use crate::audit::{CommandLog, LogId};
use crate::channel::{BackendChannel, ByteChannel};
use crate::error::Result;
use crate::service::ProxyService;

/// Largest chunk read from either side per iteration
pub const RECV_CHUNK: usize = 1024;

/// Which peer ended the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    /// The client closed its channel
    ClientLogout,
    /// The backend shell exited or dropped the connection
    BackendDisconnect,
}

/// Moves bytes between the two channels and feeds the segmenter
pub struct ChannelRelay<'a> {
    ctx: &'a SessionContext,
    service: &'a dyn ProxyService,
    log_id: LogId,
    segmenter: CommandSegmenter,
    window: watch::Receiver<WindowSize>,
}

impl<'a> ChannelRelay<'a> {
    pub fn new(
        ctx: &'a SessionContext,
        service: &'a dyn ProxyService,
        log_id: LogId,
        segmenter: CommandSegmenter,
    ) -> Self {
        Self {
            ctx,
            service,
            log_id,
            segmenter,
            window: ctx.window.clone(),
        }
    }

    pub fn segmenter(&self) -> &CommandSegmenter {
        &self.segmenter
    }

    /// Relay until either side disconnects.
    ///
    /// Forwarding is unconditional: capture and ignore rules only decide what
    /// gets recorded. When both sides are ready, the client chunk is handled
    /// first and the backend chunk right after it, in the same iteration.
    pub async fn run(
        &mut self,
        client: &mut dyn ByteChannel,
        backend: &mut dyn BackendChannel,
    ) -> Result<RelayEnd> {
        loop {
            let client_ready = tokio::select! {
                biased;
                r = client.readable() => { r?; true }
                r = backend.readable() => { r?; false }
            };
            // Backend output that is already waiting joins this iteration
            let backend_ready = !client_ready
                || tokio::select! {
                    biased;
                    r = backend.readable() => { r?; true }
                    _ = std::future::ready(()) => false,
                };

            self.apply_pending_resize(backend).await?;

            if client_ready {
                let data = client.recv(RECV_CHUNK).await?;

                if let Some(completed) = self.segmenter.on_client_data(&data) {
                    self.record(completed).await;
                }

                if data.is_empty() {
                    info!(
                        "Logout from ssh server {}: {}",
                        self.ctx.remote_addr_display(),
                        self.ctx.user.username
                    );
                    return Ok(RelayEnd::ClientLogout);
                }

                backend.send(&data).await?;
            }

            if backend_ready {
                let data = backend.recv(RECV_CHUNK).await?;

                if data.is_empty() {
                    let notice = format!("\r\nDisconnect from {}\r\n", self.ctx.asset.ip);
                    if let Err(e) = client.send(notice.as_bytes()).await {
                        debug!("Client already gone: {}", e);
                    }
                    info!(
                        "Logout from asset {}: {}",
                        self.ctx.asset.ip, self.ctx.user.username
                    );
                    return Ok(RelayEnd::BackendDisconnect);
                }

                self.segmenter.on_backend_data(&data);
                client.send(&data).await?;
            }
        }
    }

    /// Record the cycle still being captured when the session ends
    pub async fn flush(&mut self) {
        if let Some(completed) = self.segmenter.finish() {
            self.record(completed).await;
        }
    }

    async fn apply_pending_resize(&mut self, backend: &mut dyn BackendChannel) -> Result<()> {
        if !self.window.has_changed().unwrap_or(false) {
            return Ok(());
        }
        let size = *self.window.borrow_and_update();
        debug!("Resizing backend pty to {}x{}", size.width, size.height);
        self.segmenter.resize(size.width, size.height);
        backend.resize(size.width, size.height).await
    }

    async fn record(&self, completed: CompletedCommand) {
        let entry = CommandLog {
            log_id: self.log_id,
            command_no: completed.command_no,
            command: completed.command,
            output: completed.output,
            timestamp: Utc::now(),
        };
        // Losing an audit row must not kill the user's shell
        if let Err(e) = self.service.append_command_log(&entry).await {
            warn!(
                "Failed to record command {} of proxy log {}: {}",
                entry.command_no, self.log_id, e
            );
        }
    }
}

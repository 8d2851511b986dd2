//! Backend shell channel over russh

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{Channel, ChannelMsg};
use tokio::time::timeout;
use tracing::{debug, info};

use super::handler::BackendHandler;
use crate::channel::{BackendChannel, ByteChannel, PendingBytes};
use crate::config::DEFAULT_READ_TIMEOUT_SECS;
use crate::error::{ProxyError, Result};

/// Interactive shell on a backend host, owning its SSH session
pub struct SshBackendChannel {
    session: Handle<BackendHandler>,
    channel: Channel<client::Msg>,
    pending: PendingBytes,
    read_timeout: Duration,
}

impl SshBackendChannel {
    pub fn new(session: Handle<BackendHandler>, channel: Channel<client::Msg>) -> Self {
        Self {
            session,
            channel,
            pending: PendingBytes::default(),
            read_timeout: Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS),
        }
    }

    /// Pull channel messages until there is something to read.
    /// Cancel-safe: a message is buffered as soon as it is received.
    async fn fill(&mut self) {
        while !self.pending.is_ready() {
            match self.channel.wait().await {
                Some(ChannelMsg::Data { data }) => self.pending.push(&data),
                // stderr shares the terminal with stdout
                Some(ChannelMsg::ExtendedData { data, .. }) => self.pending.push(&data),
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    debug!("Backend shell exited with status {}", exit_status);
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => self.pending.set_eof(),
                Some(_) => {}
            }
        }
    }
}

#[async_trait]
impl ByteChannel for SshBackendChannel {
    async fn readable(&mut self) -> Result<()> {
        self.fill().await;
        Ok(())
    }

    /// Only blocks, and so only times out, when nothing is buffered. The
    /// relay always waits on `readable` first, which has no bound.
    async fn recv(&mut self, max: usize) -> Result<Vec<u8>> {
        if !self.pending.is_ready() {
            let limit = self.read_timeout;
            within(limit, self.fill()).await?;
        }
        Ok(self.pending.take(max))
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.channel
            .data(data)
            .await
            .map_err(|e| ProxyError::channel(format!("Failed to write to backend: {}", e)))
    }
}

/// Run a channel read, failing with [`ProxyError::ReadTimeout`] after `limit`
async fn within(limit: Duration, read: impl Future<Output = ()>) -> Result<()> {
    timeout(limit, read)
        .await
        .map_err(|_| ProxyError::ReadTimeout(limit.as_secs()))
}

#[async_trait]
impl BackendChannel for SshBackendChannel {
    async fn resize(&mut self, width: u16, height: u16) -> Result<()> {
        self.channel
            .window_change(u32::from(width), u32::from(height), 0, 0)
            .await
            .map_err(|e| ProxyError::channel(format!("Failed to resize backend pty: {}", e)))
    }

    fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }

    async fn close(&mut self) {
        let _ = self.channel.eof().await;
        let _ = self.channel.close().await;
        let _ = self
            .session
            .disconnect(russh::Disconnect::ByApplication, "", "")
            .await;
        info!("Backend connection closed");
    }
}

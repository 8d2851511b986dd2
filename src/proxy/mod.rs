//! Session core: connect to the backend, relay, audit
//!
//! A [`ProxySession`] is shared by every connection of the gateway. Each
//! call to [`ProxySession::proxy`] runs one session to completion on the
//! caller's task; all per-session state lives on that task.

pub mod connector;
pub mod ignore;
pub mod relay;
pub mod segmenter;

#[cfg(test)]
pub(crate) mod testing;

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info, Instrument};
use uuid::Uuid;

use crate::audit::{LoginType, ProxyLogFinish};
use crate::channel::ByteChannel;
use crate::config::SessionSettings;
use crate::error::Result;
use crate::service::{Asset, ProxyService, SystemUser, User};
use crate::tty::ScreenParser;

pub use connector::{BackendTransport, ConnectedBackend, SessionConnector, ShellRequest};
pub use ignore::IgnoreFilter;
pub use relay::{ChannelRelay, RelayEnd};
pub use segmenter::{CommandSegmenter, CompletedCommand};

/// Client terminal dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    pub width: u16,
    pub height: u16,
}

impl WindowSize {
    pub fn new(width: u16, height: u16) -> Self {
        Self { width, height }
    }
}

impl Default for WindowSize {
    fn default() -> Self {
        Self::new(80, 24)
    }
}

/// Who is connecting where, plus the client's terminal state
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: Uuid,
    pub user: User,
    pub asset: Asset,
    pub system_user: SystemUser,
    pub login_type: LoginType,
    pub term: String,
    /// Latest client window size; a change is a pending resize request
    pub window: watch::Receiver<WindowSize>,
    pub remote_addr: Option<SocketAddr>,
}

impl SessionContext {
    pub fn window_size(&self) -> WindowSize {
        *self.window.borrow()
    }

    pub(crate) fn remote_addr_display(&self) -> String {
        self.remote_addr
            .map(|a| a.to_string())
            .unwrap_or_else(|| "<unknown>".to_string())
    }
}

/// Runs proxied sessions against a service and a backend transport
#[derive(Clone)]
pub struct ProxySession {
    service: Arc<dyn ProxyService>,
    transport: Arc<dyn BackendTransport>,
    settings: SessionSettings,
    ignore: IgnoreFilter,
}

impl ProxySession {
    pub fn new(
        service: Arc<dyn ProxyService>,
        transport: Arc<dyn BackendTransport>,
        settings: SessionSettings,
    ) -> Result<Self> {
        let ignore = IgnoreFilter::new(&settings.ignore_commands)?;
        Ok(Self {
            service,
            transport,
            settings,
            ignore,
        })
    }

    /// Run one session to completion.
    ///
    /// The client channel is borrowed and left open for the caller to close.
    /// Exactly one finish record is written for every session that got a
    /// start record, whichever side ends it.
    pub async fn proxy(&self, ctx: SessionContext, client: &mut dyn ByteChannel) -> Result<RelayEnd> {
        let span = tracing::info_span!(
            "session",
            session_id = %ctx.session_id,
            user = %ctx.user.username,
            asset = %ctx.asset.hostname,
            system_user = %ctx.system_user.username,
        );
        self.run(ctx, client).instrument(span).await
    }

    async fn run(&self, ctx: SessionContext, client: &mut dyn ByteChannel) -> Result<RelayEnd> {
        let ConnectedBackend {
            log_id,
            mut channel,
        } = SessionConnector::new(self.service.as_ref(), self.transport.as_ref(), &self.settings)
            .connect(&ctx, client)
            .await?;

        let size = ctx.window_size();
        let segmenter = CommandSegmenter::new(
            Box::new(ScreenParser::new(size.width, size.height)),
            self.ignore.clone(),
        )
        .with_alt_screen_suspend(self.settings.suspend_on_alt_screen);

        let mut relay = ChannelRelay::new(&ctx, self.service.as_ref(), log_id, segmenter);
        let result = relay.run(client, channel.as_mut()).await;

        relay.flush().await;
        channel.close().await;

        let failed = match &result {
            Ok(end) => {
                info!("Session ended: {:?}", end);
                false
            }
            Err(e) => {
                error!("Session aborted: {}", e);
                true
            }
        };

        let finish = ProxyLogFinish {
            log_id,
            finished_at: Utc::now(),
            failed,
        };
        let finished = self.service.finish_proxy_log(&finish).await;
        if let Err(e) = &finished {
            error!("Failed to finish proxy log {}: {}", log_id, e);
        }

        let end = result?;
        finished?;
        Ok(end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProxyError;
    use crate::proxy::testing::{context, inventory_service, FakeTransport, Script, Step};

    fn session(service: Arc<dyn ProxyService>, transport: FakeTransport) -> ProxySession {
        ProxySession::new(service, Arc::new(transport), SessionSettings::default()).unwrap()
    }

    #[tokio::test]
    async fn test_full_session_finishes_once() {
        let service = Arc::new(inventory_service());
        let mut steps = vec![Step::Backend(b"$ ".to_vec())];
        for b in b"id".iter() {
            steps.push(Step::Client(vec![*b]));
            steps.push(Step::Backend(vec![*b]));
        }
        steps.push(Step::Client(b"\r".to_vec()));
        steps.push(Step::Backend(b"\r\nuid=0(root)\r\n$ ".to_vec()));
        steps.push(Step::BackendEof);
        let script = Script::new(steps);
        let (ctx, _size) = context("alice", "web01", "root");

        let end = session(service.clone(), FakeTransport::connected(script.backend()))
            .proxy(ctx, &mut script.client())
            .await
            .unwrap();

        assert_eq!(end, RelayEnd::BackendDisconnect);
        let finished = service.finished_logs().await;
        assert_eq!(finished.len(), 1);
        assert!(!finished[0].failed);
        assert_eq!(finished[0].log_id, 1);
        assert!(script.backend_closed());

        // The pending `id` cycle is flushed at teardown
        let logs = service.command_logs().await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].command, "id");
        assert_eq!(logs[0].output, "uid=0(root)");
    }

    #[tokio::test]
    async fn test_client_logout_finishes_once() {
        let service = Arc::new(inventory_service());
        let script = Script::new(vec![Step::Backend(b"$ ".to_vec()), Step::ClientEof]);
        let (ctx, _size) = context("alice", "web01", "root");

        let end = session(service.clone(), FakeTransport::connected(script.backend()))
            .proxy(ctx, &mut script.client())
            .await
            .unwrap();

        assert_eq!(end, RelayEnd::ClientLogout);
        assert_eq!(service.finished_logs().await.len(), 1);
        assert!(service.command_logs().await.is_empty());
        assert!(script.backend_closed());
    }

    #[tokio::test]
    async fn test_relay_error_finishes_as_failed() {
        let service = Arc::new(inventory_service());
        let script = Script::new(vec![Step::BackendError]);
        let (ctx, _size) = context("alice", "web01", "root");

        let result = session(service.clone(), FakeTransport::connected(script.backend()))
            .proxy(ctx, &mut script.client())
            .await;

        assert!(matches!(result, Err(ProxyError::Channel(_))));
        let finished = service.finished_logs().await;
        assert_eq!(finished.len(), 1);
        assert!(finished[0].failed);
        assert!(script.backend_closed());
    }

    #[tokio::test]
    async fn test_failed_connect_finishes_exactly_once() {
        let service = Arc::new(inventory_service());
        let script = Script::new(vec![]);
        let (ctx, _size) = context("alice", "web01", "root");

        let result = session(
            service.clone(),
            FakeTransport::failing(ProxyError::auth("rejected")),
        )
        .proxy(ctx, &mut script.client())
        .await;

        assert!(result.unwrap_err().is_auth_failure());
        let finished = service.finished_logs().await;
        assert_eq!(finished.len(), 1);
        assert!(finished[0].failed);
    }

    #[tokio::test]
    async fn test_permission_denied_session_leaves_no_trace() {
        let service = Arc::new(inventory_service());
        let script = Script::new(vec![]);
        let (ctx, _size) = context("alice", "web01", "deploy");
        let transport = FakeTransport::unreachable();
        let calls = transport.call_counter();

        let result = session(service.clone(), transport)
            .proxy(ctx, &mut script.client())
            .await;

        assert!(matches!(result, Err(ProxyError::PermissionDenied { .. })));
        assert!(service.proxy_logs().await.is_empty());
        assert!(service.finished_logs().await.is_empty());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn test_invalid_ignore_pattern_rejected() {
        let settings = SessionSettings {
            ignore_commands: vec!["(".to_string()],
            ..SessionSettings::default()
        };
        let result = ProxySession::new(
            Arc::new(inventory_service()),
            Arc::new(FakeTransport::unreachable()),
            settings,
        );
        assert!(result.is_err());
    }
}

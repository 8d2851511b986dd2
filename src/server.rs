//! Gateway SSH server
//!
//! Users log into the gateway with `user@system_user@asset` and their own
//! password. Each accepted shell request runs one [`ProxySession`] on its own
//! task; the russh handler only feeds client bytes and window changes into
//! that task.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::keys::PrivateKey;
use russh::server::{self, Auth, Msg, Server as _, Session};
use russh::{Channel, ChannelId, CryptoVec, Pty};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::LoginType;
use crate::channel::{ByteChannel, PendingBytes};
use crate::error::{self, ProxyError};
use crate::proxy::connector::warning;
use crate::proxy::{ProxySession, SessionContext, WindowSize};
use crate::service::{Asset, InventoryService, SystemUser, User};

/// Idle client connections are dropped after this long
const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(3600);

/// Target selected by the gateway login name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginTarget<'a> {
    pub username: &'a str,
    pub system_user: &'a str,
    pub asset: &'a str,
}

impl<'a> LoginTarget<'a> {
    /// Split `user@system_user@asset`; every part must be non-empty
    pub fn parse(login: &'a str) -> Option<Self> {
        let mut parts = login.splitn(3, '@');
        let username = parts.next().filter(|s| !s.is_empty())?;
        let system_user = parts.next().filter(|s| !s.is_empty())?;
        let asset = parts.next().filter(|s| !s.is_empty() && !s.contains('@'))?;
        Some(Self {
            username,
            system_user,
            asset,
        })
    }
}

/// Accepts client connections and hands out per-connection handlers
#[derive(Clone)]
pub struct GatewayServer {
    inventory: Arc<InventoryService>,
    proxy: ProxySession,
    default_term: String,
}

impl GatewayServer {
    pub fn new(inventory: Arc<InventoryService>, proxy: ProxySession, default_term: String) -> Self {
        Self {
            inventory,
            proxy,
            default_term,
        }
    }

    /// Listen on `addr` until the listener fails
    pub async fn serve(mut self, addr: SocketAddr, host_key: PrivateKey) -> anyhow::Result<()> {
        let config = Arc::new(server::Config {
            inactivity_timeout: Some(INACTIVITY_TIMEOUT),
            auth_rejection_time: Duration::from_secs(1),
            auth_rejection_time_initial: Some(Duration::from_secs(0)),
            keys: vec![host_key],
            ..Default::default()
        });

        let socket = TcpListener::bind(addr).await?;
        info!("Gateway listening on {}", addr);

        self.run_on_socket(config, &socket).await?;
        Ok(())
    }
}

impl server::Server for GatewayServer {
    type Handler = GatewayHandler;

    fn new_client(&mut self, addr: Option<SocketAddr>) -> GatewayHandler {
        debug!("Client connected from {:?}", addr);
        GatewayHandler::new(
            self.inventory.clone(),
            self.proxy.clone(),
            self.default_term.clone(),
            addr,
        )
    }

    fn handle_session_error(&mut self, error: <Self::Handler as server::Handler>::Error) {
        warn!("Client connection error: {:#}", error);
    }
}

/// Resolved login of an authenticated client
#[derive(Debug, Clone)]
struct Login {
    user: User,
    asset: Asset,
    system_user: SystemUser,
}

/// Per-connection russh handler
pub struct GatewayHandler {
    inventory: Arc<InventoryService>,
    proxy: ProxySession,
    default_term: String,
    remote_addr: Option<SocketAddr>,
    login: Option<Login>,
    channel: Option<ChannelId>,
    term: Option<String>,
    window: watch::Sender<WindowSize>,
    /// Dropping the sender is the client EOF seen by the session task
    input: Option<mpsc::UnboundedSender<Vec<u8>>>,
    /// Detached on drop, so a session outlives its connection long enough
    /// to finish its audit records
    task: Option<JoinHandle<()>>,
}

impl GatewayHandler {
    fn new(
        inventory: Arc<InventoryService>,
        proxy: ProxySession,
        default_term: String,
        remote_addr: Option<SocketAddr>,
    ) -> Self {
        let (window, _) = watch::channel(WindowSize::default());
        Self {
            inventory,
            proxy,
            default_term,
            remote_addr,
            login: None,
            channel: None,
            term: None,
            window,
            input: None,
            task: None,
        }
    }

    fn resolve(&self, login: &str, password: &str) -> Option<Login> {
        let target = LoginTarget::parse(login)?;
        let user = self.inventory.authenticate_user(target.username, password)?;
        let system_user = self.inventory.find_system_user(target.system_user)?;
        let asset = self.inventory.find_asset(target.asset)?;
        Some(Login {
            user: user.clone(),
            asset: asset.clone(),
            system_user: system_user.clone(),
        })
    }

    fn set_window(&self, width: u32, height: u32) {
        let size = WindowSize::new(clamp_dimension(width), clamp_dimension(height));
        self.window.send_replace(size);
    }

    fn start_session(&mut self, channel: ChannelId, session: &Session) -> anyhow::Result<()> {
        let login = self
            .login
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Shell requested before authentication"))?;

        let ctx = SessionContext {
            session_id: Uuid::new_v4(),
            user: login.user,
            asset: login.asset,
            system_user: login.system_user,
            login_type: LoginType::SshTerminal,
            term: self.term.clone().unwrap_or_else(|| self.default_term.clone()),
            window: self.window.subscribe(),
            remote_addr: self.remote_addr,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        self.input = Some(tx);

        let handle = session.handle();
        let mut client = GatewayClientChannel::new(channel, handle.clone(), rx);
        let proxy = self.proxy.clone();

        self.task = Some(tokio::spawn(async move {
            if let Err(e) = proxy.proxy(ctx, &mut client).await {
                if matches!(e, ProxyError::PermissionDenied { .. }) {
                    let _ = client.send(warning(&format!("{}\r\n", e)).as_bytes()).await;
                }
            }
            let _ = handle.exit_status_request(channel, 0).await;
            let _ = handle.eof(channel).await;
            let _ = handle.close(channel).await;
        }));
        Ok(())
    }
}

impl server::Handler for GatewayHandler {
    type Error = anyhow::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        match self.resolve(user, password) {
            Some(login) => {
                info!(
                    "Gateway login {} -> {}@{} from {:?}",
                    login.user.username, login.system_user.username, login.asset.hostname,
                    self.remote_addr
                );
                self.login = Some(login);
                Ok(Auth::Accept)
            }
            None => {
                warn!("Gateway login rejected for '{}' from {:?}", user, self.remote_addr);
                Ok(Auth::Reject {
                    proceed_with_methods: None,
                    partial_success: false,
                })
            }
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        // One interactive session per connection
        if self.channel.is_some() {
            return Ok(false);
        }
        self.channel = Some(channel.id());
        Ok(true)
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if !term.is_empty() {
            self.term = Some(term.to_string());
        }
        self.set_window(col_width, row_height);
        session.channel_success(channel)?;
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        _channel: ChannelId,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.set_window(col_width, row_height);
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if Some(channel) != self.channel || self.task.is_some() {
            session.channel_failure(channel)?;
            return Ok(());
        }
        session.channel_success(channel)?;
        self.start_session(channel, session)
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if Some(channel) != self.channel {
            return Ok(());
        }
        if let Some(tx) = &self.input {
            if tx.send(data.to_vec()).is_err() {
                self.input = None;
            }
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if Some(channel) == self.channel {
            self.input = None;
        }
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if Some(channel) == self.channel {
            self.input = None;
        }
        Ok(())
    }
}

fn clamp_dimension(value: u32) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX).max(1)
}

/// Client end of a session: bytes queued by the handler, written back
/// through the russh session handle
pub struct GatewayClientChannel {
    id: ChannelId,
    handle: server::Handle,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    pending: PendingBytes,
}

impl GatewayClientChannel {
    fn new(id: ChannelId, handle: server::Handle, rx: mpsc::UnboundedReceiver<Vec<u8>>) -> Self {
        Self {
            id,
            handle,
            rx,
            pending: PendingBytes::default(),
        }
    }
}

#[async_trait]
impl ByteChannel for GatewayClientChannel {
    async fn readable(&mut self) -> error::Result<()> {
        while !self.pending.is_ready() {
            match self.rx.recv().await {
                Some(data) => self.pending.push(&data),
                None => self.pending.set_eof(),
            }
        }
        Ok(())
    }

    async fn recv(&mut self, max: usize) -> error::Result<Vec<u8>> {
        self.readable().await?;
        Ok(self.pending.take(max))
    }

    async fn send(&mut self, data: &[u8]) -> error::Result<()> {
        self.handle
            .data(self.id, CryptoVec::from_slice(data))
            .await
            .map_err(|_| ProxyError::channel("client channel closed"))
    }
}

//! Scripted channels and a fake transport for driving sessions in tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use uuid::Uuid;

use super::connector::{BackendTransport, ShellRequest};
use super::{SessionContext, WindowSize};
use crate::audit::LoginType;
use crate::channel::{BackendChannel, ByteChannel};
use crate::error::{ProxyError, Result};
use crate::service::{Inventory, InventoryService};

const INVENTORY: &str = r#"{
    "users": [
        {"id": 1, "username": "alice", "name": "Alice Liddell", "password": "wonderland"}
    ],
    "assets": [
        {"id": 10, "hostname": "web01", "ip": "10.0.0.5"},
        {"id": 11, "hostname": "db01", "ip": "10.0.0.6", "port": 2200}
    ],
    "system_users": [
        {"id": 100, "username": "root", "password": "toor"},
        {"id": 101, "username": "deploy"}
    ],
    "permissions": [
        {"user_id": 1, "asset_id": 10, "system_user_id": 100}
    ]
}"#;

pub(crate) fn inventory_service() -> InventoryService {
    InventoryService::new(Inventory::from_json(INVENTORY).unwrap())
}

/// Session context for known inventory names, with an 80x24 window
pub(crate) fn context(
    user: &str,
    asset: &str,
    system_user: &str,
) -> (SessionContext, watch::Sender<WindowSize>) {
    let service = inventory_service();
    let (tx, rx) = watch::channel(WindowSize::new(80, 24));
    let ctx = SessionContext {
        session_id: Uuid::new_v4(),
        user: service.find_user(user).unwrap().clone(),
        asset: service.find_asset(asset).unwrap().clone(),
        system_user: service.find_system_user(system_user).unwrap().clone(),
        login_type: LoginType::SshTerminal,
        term: "xterm".to_string(),
        window: rx,
        remote_addr: Some("192.0.2.7:50022".parse().unwrap()),
    };
    (ctx, tx)
}

/// One event of a scripted session
#[derive(Debug, Clone)]
pub(crate) enum Step {
    Client(Vec<u8>),
    Backend(Vec<u8>),
    ClientEof,
    BackendEof,
    BackendError,
}

impl Step {
    fn is_client(&self) -> bool {
        matches!(self, Step::Client(_) | Step::ClientEof)
    }
}

#[derive(Debug, Default)]
struct ScriptState {
    steps: VecDeque<Step>,
    /// Each side is ready whenever it has a step left, not only at the front
    unordered: bool,
    client_received: Vec<u8>,
    backend_received: Vec<u8>,
    resizes: Vec<(u16, u16)>,
    read_timeout: Option<Duration>,
    backend_closed: bool,
}

impl ScriptState {
    fn position(&self, client: bool) -> Option<usize> {
        if self.unordered {
            self.steps.iter().position(|s| s.is_client() == client)
        } else {
            self.steps.front().filter(|s| s.is_client() == client).map(|_| 0)
        }
    }

    fn take(&mut self, client: bool, max: usize) -> Result<Vec<u8>> {
        let Some(idx) = self.position(client) else {
            return Err(ProxyError::channel("recv without readiness"));
        };
        if let Step::Client(data) | Step::Backend(data) = &mut self.steps[idx] {
            if data.len() > max {
                return Ok(data.drain(..max).collect());
            }
        }
        match self.steps.remove(idx) {
            Some(Step::Client(data)) | Some(Step::Backend(data)) => Ok(data),
            Some(Step::BackendError) => Err(ProxyError::channel("backend reset")),
            _ => Ok(Vec::new()),
        }
    }
}

/// A deterministic interleaving of client and backend traffic
#[derive(Clone)]
pub(crate) struct Script {
    state: Arc<Mutex<ScriptState>>,
}

impl Script {
    /// Steps become readable strictly in order
    pub(crate) fn new(steps: Vec<Step>) -> Self {
        Self::from_state(ScriptState {
            steps: steps.into(),
            ..ScriptState::default()
        })
    }

    /// Both sides ready at once; the client hangs up after its chunks
    pub(crate) fn unordered(client: Vec<Vec<u8>>, backend: Vec<Vec<u8>>) -> Self {
        let mut steps: VecDeque<Step> = client.into_iter().map(Step::Client).collect();
        steps.push_back(Step::ClientEof);
        steps.extend(backend.into_iter().map(Step::Backend));
        Self::from_state(ScriptState {
            steps,
            unordered: true,
            ..ScriptState::default()
        })
    }

    fn from_state(state: ScriptState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub(crate) fn client(&self) -> ScriptedClient {
        ScriptedClient {
            state: self.state.clone(),
        }
    }

    pub(crate) fn backend(&self) -> ScriptedBackend {
        ScriptedBackend {
            state: self.state.clone(),
        }
    }

    pub(crate) fn client_received(&self) -> Vec<u8> {
        self.state.lock().unwrap().client_received.clone()
    }

    pub(crate) fn backend_received(&self) -> Vec<u8> {
        self.state.lock().unwrap().backend_received.clone()
    }

    pub(crate) fn resizes(&self) -> Vec<(u16, u16)> {
        self.state.lock().unwrap().resizes.clone()
    }

    pub(crate) fn read_timeout(&self) -> Option<Duration> {
        self.state.lock().unwrap().read_timeout
    }

    pub(crate) fn backend_closed(&self) -> bool {
        self.state.lock().unwrap().backend_closed
    }
}

async fn wait_turn(state: &Mutex<ScriptState>, client: bool) {
    let ready = state.lock().unwrap().position(client).is_some();
    if !ready {
        // The other side's recv is what changes the script; the relay polls
        // readiness afresh on every iteration.
        std::future::pending::<()>().await;
    }
}

pub(crate) struct ScriptedClient {
    state: Arc<Mutex<ScriptState>>,
}

#[async_trait]
impl ByteChannel for ScriptedClient {
    async fn readable(&mut self) -> Result<()> {
        wait_turn(&self.state, true).await;
        Ok(())
    }

    async fn recv(&mut self, max: usize) -> Result<Vec<u8>> {
        self.state.lock().unwrap().take(true, max)
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.state.lock().unwrap().client_received.extend_from_slice(data);
        Ok(())
    }
}

pub(crate) struct ScriptedBackend {
    state: Arc<Mutex<ScriptState>>,
}

#[async_trait]
impl ByteChannel for ScriptedBackend {
    async fn readable(&mut self) -> Result<()> {
        wait_turn(&self.state, false).await;
        Ok(())
    }

    async fn recv(&mut self, max: usize) -> Result<Vec<u8>> {
        self.state.lock().unwrap().take(false, max)
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.state.lock().unwrap().backend_received.extend_from_slice(data);
        Ok(())
    }
}

#[async_trait]
impl BackendChannel for ScriptedBackend {
    async fn resize(&mut self, width: u16, height: u16) -> Result<()> {
        self.state.lock().unwrap().resizes.push((width, height));
        Ok(())
    }

    fn set_read_timeout(&mut self, timeout: Duration) {
        self.state.lock().unwrap().read_timeout = Some(timeout);
    }

    async fn close(&mut self) {
        self.state.lock().unwrap().backend_closed = true;
    }
}

/// What the fake transport was asked to open, with owned fields
#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub term: String,
    pub width: u16,
    pub height: u16,
    pub timeout: Duration,
}

/// Backend transport that hands out a prepared channel or a prepared error
pub(crate) struct FakeTransport {
    outcome: Mutex<Option<Result<Box<dyn BackendChannel>>>>,
    calls: Arc<AtomicUsize>,
    last_request: Mutex<Option<RecordedRequest>>,
}

impl FakeTransport {
    fn with_outcome(outcome: Option<Result<Box<dyn BackendChannel>>>) -> Self {
        Self {
            outcome: Mutex::new(outcome),
            calls: Arc::new(AtomicUsize::new(0)),
            last_request: Mutex::new(None),
        }
    }

    /// Every attempt fails as an unreachable host
    pub(crate) fn unreachable() -> Self {
        Self::with_outcome(None)
    }

    pub(crate) fn failing(err: ProxyError) -> Self {
        Self::with_outcome(Some(Err(err)))
    }

    pub(crate) fn connected(backend: ScriptedBackend) -> Self {
        Self::with_outcome(Some(Ok(Box::new(backend))))
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Call counter that outlives the transport once it is moved into a session
    pub(crate) fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    pub(crate) fn last_request(&self) -> Option<RecordedRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

#[async_trait]
impl BackendTransport for FakeTransport {
    async fn open_shell(&self, request: &ShellRequest<'_>) -> Result<Box<dyn BackendChannel>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(RecordedRequest {
            host: request.host.to_string(),
            port: request.port,
            username: request.username.to_string(),
            password: request.credentials.password.clone(),
            term: request.term.to_string(),
            width: request.width,
            height: request.height,
            timeout: request.timeout,
        });

        self.outcome.lock().unwrap().take().unwrap_or_else(|| {
            Err(ProxyError::connection(format!(
                "{}:{} unreachable",
                request.host, request.port
            )))
        })
    }
}

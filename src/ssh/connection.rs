//! Backend SSH transport
//!
//! Opens an interactive shell on a backend host: TCP connect, key exchange,
//! authentication with the system user's credentials, then a pty and a shell
//! on a fresh session channel.

use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::keys::PrivateKeyWithHashAlg;
use tokio::time::timeout;
use tracing::{debug, error, info};

use super::channel::SshBackendChannel;
use super::handler::BackendHandler;
use crate::channel::BackendChannel;
use crate::error::{ProxyError, Result};
use crate::proxy::{BackendTransport, ShellRequest};
use crate::service::Credentials;

/// [`BackendTransport`] over russh
#[derive(Clone)]
pub struct SshTransport {
    config: Arc<client::Config>,
}

impl SshTransport {
    pub fn new() -> Self {
        Self {
            config: Arc::new(client::Config::default()),
        }
    }

    /// Connect and authenticate, without the overall deadline
    async fn handshake(&self, request: &ShellRequest<'_>) -> Result<Handle<BackendHandler>> {
        info!(
            "Connecting to backend {}:{} as {}",
            request.host, request.port, request.username
        );

        let mut session = client::connect(
            self.config.clone(),
            (request.host, request.port),
            BackendHandler::new(request.host),
        )
        .await
        .map_err(classify_connect_error)?;

        authenticate(&mut session, request.username, request.credentials).await?;
        Ok(session)
    }

    async fn start_shell(
        session: &Handle<BackendHandler>,
        request: &ShellRequest<'_>,
    ) -> Result<russh::Channel<client::Msg>> {
        let channel = session
            .channel_open_session()
            .await
            .map_err(|e| ProxyError::channel(format!("Failed to open channel: {}", e)))?;

        channel
            .request_pty(
                true,
                request.term,
                u32::from(request.width),
                u32::from(request.height),
                0,
                0,
                &[],
            )
            .await
            .map_err(|e| ProxyError::channel(format!("Failed to request PTY: {}", e)))?;

        channel
            .request_shell(true)
            .await
            .map_err(|e| ProxyError::channel(format!("Failed to request shell: {}", e)))?;

        debug!(
            "Shell started on {}:{} ({} {}x{})",
            request.host, request.port, request.term, request.width, request.height
        );
        Ok(channel)
    }
}

impl Default for SshTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SshTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshTransport").finish_non_exhaustive()
    }
}

#[async_trait]
impl BackendTransport for SshTransport {
    async fn open_shell(&self, request: &ShellRequest<'_>) -> Result<Box<dyn BackendChannel>> {
        let session = match timeout(request.timeout, self.handshake(request)).await {
            Ok(result) => result?,
            Err(_) => {
                error!(
                    "Backend {}:{} handshake timeout after {}s",
                    request.host,
                    request.port,
                    request.timeout.as_secs()
                );
                return Err(ProxyError::ConnectTimeout(request.timeout.as_secs()));
            }
        };

        match Self::start_shell(&session, request).await {
            Ok(channel) => Ok(Box::new(SshBackendChannel::new(session, channel))),
            Err(e) => {
                let _ = session
                    .disconnect(russh::Disconnect::ByApplication, "", "")
                    .await;
                Err(e)
            }
        }
    }
}

/// Key first when both are present, then password
async fn authenticate(
    session: &mut Handle<BackendHandler>,
    username: &str,
    credentials: &Credentials,
) -> Result<()> {
    if let Some(ref key_content) = credentials.private_key {
        debug!("Attempting key authentication for user '{}'", username);

        let key = russh::keys::PrivateKey::from_openssh(key_content.as_bytes())
            .map_err(|e| ProxyError::SshKey(format!("Failed to parse private key: {}", e)))?;
        let key_with_alg = PrivateKeyWithHashAlg::new(Arc::new(key), None);

        let auth_result = session
            .authenticate_publickey(username, key_with_alg)
            .await
            .map_err(|e| ProxyError::auth(e.to_string()))?;

        if auth_result.success() {
            info!("Key authentication successful");
            return Ok(());
        }
        debug!("Key authentication rejected for user '{}'", username);
    }

    if let Some(ref password) = credentials.password {
        debug!("Attempting password authentication for user '{}'", username);

        let auth_result = session
            .authenticate_password(username, password)
            .await
            .map_err(|e| ProxyError::auth(e.to_string()))?;

        if auth_result.success() {
            info!("Password authentication successful");
            return Ok(());
        }
        return Err(ProxyError::auth("Password authentication rejected"));
    }

    if credentials.private_key.is_some() {
        return Err(ProxyError::auth("Key authentication rejected"));
    }

    Err(ProxyError::auth(
        "No authentication method available (require password or private_key)",
    ))
}

/// Socket failures are unreachable hosts; anything else in the handshake
/// counts as a protocol or credential failure.
fn classify_connect_error(err: anyhow::Error) -> ProxyError {
    if let Some(io) = err.downcast_ref::<std::io::Error>() {
        return ProxyError::connection(io.to_string());
    }
    match err.downcast_ref::<russh::Error>() {
        Some(russh::Error::IO(io)) => ProxyError::connection(io.to_string()),
        Some(russh::Error::ConnectionTimeout) => ProxyError::connection(err.to_string()),
        Some(russh::Error::Disconnect) => ProxyError::connection(err.to_string()),
        _ => ProxyError::auth(err.to_string()),
    }
}

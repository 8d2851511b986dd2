//! russh client handler for backend connections

use russh::keys::{HashAlg, PublicKey};
use tracing::info;

/// Client-side event handler for one backend connection
///
/// Backend host keys are accepted unconditionally; the fingerprint is logged
/// so that a changed key shows up in the audit trail.
#[derive(Debug, Clone)]
pub struct BackendHandler {
    host: String,
}

impl BackendHandler {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

impl russh::client::Handler for BackendHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        info!(
            "Backend {} host key {} {}",
            self.host,
            server_public_key.algorithm(),
            server_public_key.fingerprint(HashAlg::Sha256)
        );
        Ok(true)
    }
}

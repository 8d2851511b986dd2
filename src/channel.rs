//! Byte channels the relay moves data between
//!
//! Both sides expose the same readiness/read split as a socket: the relay
//! waits on [`ByteChannel::readable`] for both channels at once, then pulls a
//! bounded chunk with [`ByteChannel::recv`]. A zero-length chunk means the
//! peer went away.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// A bidirectional stream of terminal bytes
#[async_trait]
pub trait ByteChannel: Send {
    /// Wait until `recv` can return without waiting for the peer.
    ///
    /// Must be cancel-safe: the relay races the client and backend futures
    /// and drops the loser.
    async fn readable(&mut self) -> Result<()>;

    /// Read at most `max` bytes. An empty vector signals end of stream.
    async fn recv(&mut self, max: usize) -> Result<Vec<u8>>;

    /// Write all of `data` to the peer
    async fn send(&mut self, data: &[u8]) -> Result<()>;
}

/// Shell channel on the backend host, owned by the session
#[async_trait]
pub trait BackendChannel: ByteChannel {
    /// Propagate a client window size change to the remote pty
    async fn resize(&mut self, width: u16, height: u16) -> Result<()>;

    /// Bound on a `recv` that has to wait for the peer.
    ///
    /// A `recv` issued after `readable` returned never waits, so this does not
    /// limit how long an idle shell may stay quiet.
    fn set_read_timeout(&mut self, timeout: Duration);

    /// Release the channel and its transport
    async fn close(&mut self);
}

/// Buffered chunks fed by a queue, the common shape of both channel ends
#[derive(Debug, Default)]
pub(crate) struct PendingBytes {
    buf: Vec<u8>,
    eof: bool,
}

impl PendingBytes {
    pub(crate) fn is_ready(&self) -> bool {
        !self.buf.is_empty() || self.eof
    }

    pub(crate) fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub(crate) fn set_eof(&mut self) {
        self.eof = true;
    }

    /// Take up to `max` buffered bytes; empty once drained after EOF
    pub(crate) fn take(&mut self, max: usize) -> Vec<u8> {
        let n = max.min(self.buf.len());
        self.buf.drain(..n).collect()
    }
}

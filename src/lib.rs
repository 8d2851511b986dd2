//! SSH audit proxy - an SSH bastion that relays interactive shells and
//! records every command
//!
//! Users log into the gateway, pick a backend asset and a system user through
//! their login name, and get a shell on that asset. The proxy relays bytes in
//! both directions untouched while segmenting the stream into
//! command / output pairs that are written to an audit log.
//!
//! # Features
//!
//! - Permission check and session start/finish records for every connection
//! - Command segmentation from terminal echo, with screen emulation to recover
//!   the edited command line and its output
//! - Output suppression for noisy commands (`cat`, `tail`, configurable)
//! - Window size changes propagated to the backend pty
//! - JSON inventory and JSON lines audit sink
//!
//! # Example Usage (CLI)
//!
//! ```bash
//! ssh-audit-proxy --host-key=/etc/ssh-audit-proxy/host_ed25519 \
//!   --inventory=/etc/ssh-audit-proxy/inventory.json \
//!   --audit-log=/var/log/ssh-audit-proxy/audit.jsonl
//!
//! ssh -p 2222 alice@root@web01@bastion.example.com
//! ```

pub mod audit;
pub mod channel;
pub mod config;
pub mod error;
pub mod proxy;
pub mod server;
pub mod service;
pub mod ssh;
pub mod tty;

// Re-exports for convenience
pub use audit::{CommandLog, LogId, LoginType, ProxyLog, ProxyLogFinish};
pub use channel::{BackendChannel, ByteChannel};
pub use config::{Args, Config, SessionSettings};
pub use error::{ProxyError, Result};
pub use proxy::{
    BackendTransport, ChannelRelay, CommandSegmenter, IgnoreFilter, ProxySession, RelayEnd,
    SessionConnector, SessionContext, WindowSize,
};
pub use server::{GatewayServer, LoginTarget};
pub use service::{Inventory, InventoryService, ProxyService};
pub use ssh::SshTransport;
pub use tty::{ScreenParser, TtyParser};

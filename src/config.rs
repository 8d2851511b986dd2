//! Configuration and CLI argument parsing for the SSH audit proxy

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use regex::Regex;

use crate::error::{ProxyError, Result};

/// Default listen address of the gateway
pub const DEFAULT_LISTEN: &str = "0.0.0.0:2222";

/// Backend handshake timeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Bound on a backend read that has to wait for data
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 100;

/// Terminal type requested on the backend when the client sent none
pub const DEFAULT_TERM: &str = "xterm";

/// Commands whose output is not recorded (file dumps and follow-style readers)
pub const DEFAULT_IGNORE_COMMANDS: &[&str] = &[r"^cat\s+", r"^tailf?\s+"];

/// SSH audit proxy CLI Arguments
#[derive(Parser, Debug, Clone)]
#[command(name = "ssh-audit-proxy")]
#[command(version)]
#[command(about = "SSH bastion proxy that relays interactive shells and audits every command")]
pub struct Args {
    /// Address the gateway listens on
    #[arg(long, default_value = DEFAULT_LISTEN, env = "SSH_AUDIT_PROXY_LISTEN")]
    pub listen: String,

    /// Path to the gateway's OpenSSH private host key
    #[arg(long, env = "SSH_AUDIT_PROXY_HOST_KEY")]
    pub host_key: PathBuf,

    /// Path to the JSON inventory (users, assets, system users, permissions)
    #[arg(long, env = "SSH_AUDIT_PROXY_INVENTORY")]
    pub inventory: PathBuf,

    /// File receiving audit records as JSON lines
    #[arg(long, env = "SSH_AUDIT_PROXY_AUDIT_LOG")]
    pub audit_log: Option<PathBuf>,

    /// Backend handshake timeout in seconds
    #[arg(long, default_value = "10", env = "SSH_AUDIT_PROXY_CONNECT_TIMEOUT")]
    pub connect_timeout: u64,

    /// Backend read timeout in seconds
    #[arg(long, default_value = "100", env = "SSH_AUDIT_PROXY_READ_TIMEOUT")]
    pub read_timeout: u64,

    /// Terminal type used when the client did not request a pty
    #[arg(long, default_value = DEFAULT_TERM, env = "SSH_AUDIT_PROXY_TERM")]
    pub term: String,

    /// Regex of commands whose output is not recorded (repeatable; the
    /// environment holds a single pattern).
    /// Defaults to `^cat\s+` and `^tailf?\s+`.
    #[arg(long = "ignore-command", env = "SSH_AUDIT_PROXY_IGNORE_COMMAND")]
    pub ignore_commands: Vec<String>,

    /// Stop segmenting commands while a full-screen program holds the alternate screen
    #[arg(long, default_value = "false", env = "SSH_AUDIT_PROXY_SUSPEND_ON_ALT_SCREEN")]
    pub suspend_on_alt_screen: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info", env = "SSH_AUDIT_PROXY_LOG_LEVEL")]
    pub log_level: String,
}

/// Parsed and validated configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Gateway listen address
    pub listen: SocketAddr,

    /// Gateway host key path
    pub host_key: PathBuf,

    /// Inventory path
    pub inventory: PathBuf,

    /// JSON lines audit sink
    pub audit_log: Option<PathBuf>,

    /// Session tuning shared by every proxied connection
    pub session: SessionSettings,

    /// Log filter
    pub log_level: String,
}

/// Per-session tuning derived from the CLI
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub term: String,
    pub ignore_commands: Vec<String>,
    pub suspend_on_alt_screen: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS),
            term: DEFAULT_TERM.to_string(),
            ignore_commands: DEFAULT_IGNORE_COMMANDS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            suspend_on_alt_screen: false,
        }
    }
}

impl Config {
    /// Create Config from CLI Args
    pub fn from_args(args: Args) -> Result<Self> {
        validate_args(&args)?;

        let listen = args
            .listen
            .parse::<SocketAddr>()
            .map_err(|e| ProxyError::config(format!("Invalid --listen '{}': {}", args.listen, e)))?;

        let ignore_commands = if args.ignore_commands.is_empty() {
            SessionSettings::default().ignore_commands
        } else {
            args.ignore_commands
        };

        Ok(Config {
            listen,
            host_key: args.host_key,
            inventory: args.inventory,
            audit_log: args.audit_log,
            session: SessionSettings {
                connect_timeout: Duration::from_secs(args.connect_timeout),
                read_timeout: Duration::from_secs(args.read_timeout),
                term: args.term,
                ignore_commands,
                suspend_on_alt_screen: args.suspend_on_alt_screen,
            },
            log_level: args.log_level,
        })
    }
}

/// Validate CLI arguments
fn validate_args(args: &Args) -> Result<()> {
    let mut errors = Vec::new();

    if args.listen.parse::<SocketAddr>().is_err() {
        errors.push(format!("Invalid --listen address: {}", args.listen));
    }

    if !args.host_key.exists() {
        errors.push(format!("Host key file not found: {}", args.host_key.display()));
    }

    if !args.inventory.exists() {
        errors.push(format!(
            "Inventory file not found: {}",
            args.inventory.display()
        ));
    }

    if args.connect_timeout == 0 {
        errors.push("--connect-timeout must be greater than 0".to_string());
    }

    if args.read_timeout == 0 {
        errors.push("--read-timeout must be greater than 0".to_string());
    }

    if args.term.trim().is_empty() {
        errors.push("--term cannot be empty".to_string());
    }

    for pattern in &args.ignore_commands {
        if let Err(e) = Regex::new(pattern) {
            errors.push(format!("Invalid --ignore-command '{}': {}", pattern, e));
        }
    }

    if !errors.is_empty() {
        return Err(ProxyError::Config(format!(
            "Configuration error:\n{}",
            errors.join("\n")
        )));
    }

    Ok(())
}

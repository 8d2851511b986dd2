//! Backend side: russh client transport and shell channel

pub mod channel;
pub mod connection;
pub mod handler;

pub use channel::SshBackendChannel;
pub use connection::SshTransport;
pub use handler::BackendHandler;

//! Local socket transport for ipcx.
//!
//! Binds, accepts and connects Unix domain sockets on the tokio reactor.
//! This is the lowest layer of ipcx: the frame and peer crates build the
//! message link on top of the [`tokio::net::UnixStream`] values handed out here.

pub mod error;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};

#[cfg(unix)]
pub use uds::{connect, PeerIdentity, SocketListener};

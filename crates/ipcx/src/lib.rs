//! Pass live callbacks across process boundaries.
//!
//! ipcx lets one side of a message link call handlers on the other side
//! with closures anywhere in the arguments. The closures are lifted out
//! into an envelope, rebuilt as callable proxies by the handler side, and
//! their reply listeners are torn down when the call settles.
//!
//! # Crate Structure
//!
//! - [`transport`] — Unix domain socket bind/accept/connect
//! - [`frame`] — Length-prefixed wire messages
//! - [`envelope`] — Callback lifting, validation and the error envelope
//! - [`peer`] — Endpoints: invoke, handle, on/once/off (behind `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use ipcx_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use ipcx_frame::*;
}

/// Re-export envelope types.
pub mod envelope {
    pub use ipcx_envelope::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use ipcx_peer::*;
}

pub use ipcx_envelope::{Arg, BoxError, ErrorCode, IpcxError, RemoteError};
#[cfg(feature = "peer")]
pub use ipcx_peer::{connect, Endpoint, HandleContext, Link, LinkListener, PeerConfig, PeerError};

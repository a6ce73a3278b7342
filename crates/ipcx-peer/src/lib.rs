//! Endpoints that pass live callbacks across a message link.
//!
//! An [`Endpoint`] sits on one side of a [`Link`]. It can call handlers on
//! the other side with [`Endpoint::invoke`], passing closures anywhere in the
//! argument tree, and it can serve calls with [`Endpoint::handle`], where the
//! handler receives callable proxies in place of the caller's closures.
//!
//! ```ignore
//! let (left, right) = Link::pair();
//! let server = Endpoint::new(right, PeerConfig::default());
//! let client = Endpoint::new(left, PeerConfig::default());
//!
//! server.handle("test-channel", |_ctx, args| async move {
//!     if let Some(cb) = args[0].get("cb") {
//!         cb.as_callback().unwrap().call(vec!["ok".into()])?;
//!     }
//!     Ok(json!("done"))
//! });
//!
//! let cb = Arg::function(|args| { println!("{args:?}"); Ok(()) });
//! let result = client.invoke("test-channel", vec![Arg::map([("cb", cb)])]).await?;
//! ```

pub mod channel;
pub mod config;
pub mod connector;
pub mod endpoint;
pub mod error;
pub mod handler;
mod hydrate;
pub mod invoke;
pub mod link;
pub mod listener;
pub mod subscription;

pub use channel::{ChannelLease, ChannelPool, DirectGenerator, HybridProvider, PoolOptions, PoolStats};
pub use config::PeerConfig;
pub use connector::{connect, connect_with_config};
pub use endpoint::Endpoint;
pub use error::{PeerError, Result};
pub use handler::{BoxFuture, HandleContext, Handler, Sender};
pub use invoke::{DisposeHandle, InvokeHandle};
pub use link::Link;
pub use listener::LinkListener;
pub use subscription::Subscription;

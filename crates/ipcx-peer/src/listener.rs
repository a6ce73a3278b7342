use std::path::Path;

use ipcx_transport::SocketListener;
use tracing::debug;

use crate::config::PeerConfig;
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::link::Link;

/// Accepts socket connections and serves each one as an [`Endpoint`].
pub struct LinkListener {
    socket: SocketListener,
    config: PeerConfig,
}

impl LinkListener {
    /// Bind to a Unix domain socket path. Must be called from within a tokio runtime.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let socket = SocketListener::bind(path)?;
        Ok(Self {
            socket,
            config: PeerConfig::default(),
        })
    }

    /// Override the configuration handed to accepted endpoints.
    pub fn with_config(mut self, config: PeerConfig) -> Self {
        self.config = config;
        self
    }

    /// Accept the next connection as an endpoint.
    ///
    /// Handlers must be registered on the returned endpoint before the
    /// client's first invoke arrives; calls to unknown channels are answered
    /// with an error.
    pub async fn accept(&self) -> Result<Endpoint> {
        let link = self.accept_link().await?;
        Ok(Endpoint::new(link, self.config.clone()))
    }

    /// Accept the next connection, running `setup` before it is served.
    pub async fn accept_with(&self, setup: impl FnOnce(&Endpoint)) -> Result<Endpoint> {
        let link = self.accept_link().await?;
        Ok(Endpoint::with_setup(link, self.config.clone(), setup))
    }

    /// Accept the next connection as a bare link.
    pub async fn accept_link(&self) -> Result<Link> {
        let stream = self.socket.accept().await?;
        let link = Link::from_stream(stream, self.config.frame.clone());
        debug!(peer = ?link.peer(), "link accepted");
        Ok(link)
    }

    /// Bound socket path.
    pub fn path(&self) -> &Path {
        self.socket.path()
    }

    pub fn config(&self) -> &PeerConfig {
        &self.config
    }
}

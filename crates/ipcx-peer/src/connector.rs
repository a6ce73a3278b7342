use std::path::Path;

use tracing::debug;

use crate::config::PeerConfig;
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::link::Link;

/// Connect to a [`crate::LinkListener`] with default configuration.
pub async fn connect(path: impl AsRef<Path>) -> Result<Endpoint> {
    connect_with_config(path, PeerConfig::default()).await
}

/// Connect with explicit configuration.
pub async fn connect_with_config(path: impl AsRef<Path>, config: PeerConfig) -> Result<Endpoint> {
    let path = path.as_ref();
    let link = Link::connect(path, config.frame.clone()).await?;
    debug!(?path, peer = ?link.peer(), "connected");
    Ok(Endpoint::new(link, config))
}

#[cfg(test)]
mod tests {
    use ipcx_envelope::{Arg, BoxError};
    use serde_json::json;

    use super::*;
    use crate::error::PeerError;
    use crate::handler::HandleContext;
    use crate::listener::LinkListener;

    #[tokio::test]
    async fn connect_missing_socket_fails() {
        let path = std::env::temp_dir().join(format!("ipcx-missing-{}.sock", std::process::id()));
        let err = connect(&path).await.unwrap_err();
        assert!(matches!(err, PeerError::Transport(_)));
    }

    #[tokio::test]
    async fn connect_convenience() {
        let path =
            std::env::temp_dir().join(format!("ipcx-connector-{}.sock", std::process::id()));
        let listener = LinkListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let endpoint = listener.accept().await.unwrap();
            endpoint.handle("ping", |_ctx: HandleContext, _args: Vec<Arg>| async {
                Ok::<_, BoxError>(json!("pong"))
            });
            (endpoint, listener)
        });

        let client = connect(&path).await.unwrap();
        let (_server, _listener) = server.await.unwrap();
        assert_eq!(client.invoke("ping", Vec::new()).await.unwrap(), json!("pong"));
    }
}

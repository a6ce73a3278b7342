//! Ordered, bidirectional message links.
//!
//! A [`Link`] is a pair of unbounded queues: outbound [`Message`]s and
//! inbound [`Message`]s. In-memory links connect two queues directly; socket
//! links bridge them to a framed Unix stream with one task per direction.

use std::path::Path;

use futures_util::{SinkExt, StreamExt};
use ipcx_frame::{FrameCodec, FrameConfig, Message};
use ipcx_transport::PeerIdentity;
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};

use crate::error::Result;

/// One side of a message link.
#[derive(Debug)]
pub struct Link {
    outbound: mpsc::UnboundedSender<Message>,
    inbound: mpsc::UnboundedReceiver<Message>,
    peer: Option<PeerIdentity>,
}

impl Link {
    /// Two connected in-memory links.
    pub fn pair() -> (Link, Link) {
        let (left_tx, right_rx) = mpsc::unbounded_channel();
        let (right_tx, left_rx) = mpsc::unbounded_channel();
        (
            Link {
                outbound: left_tx,
                inbound: left_rx,
                peer: None,
            },
            Link {
                outbound: right_tx,
                inbound: right_rx,
                peer: None,
            },
        )
    }

    /// Connect to a [`crate::LinkListener`] at `path`.
    pub async fn connect(path: impl AsRef<Path>, config: FrameConfig) -> Result<Link> {
        let stream = ipcx_transport::connect(path).await?;
        Ok(Self::from_stream(stream, config))
    }

    /// Bridge a connected stream. Must be called from within a tokio runtime.
    pub fn from_stream(stream: UnixStream, config: FrameConfig) -> Link {
        let peer = PeerIdentity::of(&stream);
        let codec = FrameCodec::with_config(config);
        let (read_half, write_half) = stream.into_split();
        let mut reader = FramedRead::new(read_half, codec.clone());
        let mut writer = FramedWrite::new(write_half, codec);

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                let frame = match message.to_frame() {
                    Ok(frame) => frame,
                    Err(err) => {
                        warn!(error = %err, "dropping unencodable message");
                        continue;
                    }
                };
                if let Err(err) = writer.send(frame).await {
                    warn!(error = %err, "link write failed");
                    break;
                }
            }
            debug!("link writer stopped");
        });

        tokio::spawn(async move {
            while let Some(next) = reader.next().await {
                match next {
                    Ok(frame) => match Message::from_frame(&frame) {
                        Ok(message) => {
                            if in_tx.send(message).is_err() {
                                break;
                            }
                        }
                        Err(err) => warn!(error = %err, "dropping undecodable message"),
                    },
                    Err(err) => {
                        warn!(error = %err, "link read failed");
                        break;
                    }
                }
            }
            debug!("link reader stopped");
        });

        Link {
            outbound: out_tx,
            inbound: in_rx,
            peer,
        }
    }

    /// Credentials of the remote process, for socket links.
    pub fn peer(&self) -> Option<PeerIdentity> {
        self.peer
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        mpsc::UnboundedSender<Message>,
        mpsc::UnboundedReceiver<Message>,
        Option<PeerIdentity>,
    ) {
        (self.outbound, self.inbound, self.peer)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn pair_delivers_in_order() {
        let (left, right) = Link::pair();
        let (left_tx, _left_rx, _) = left.into_parts();
        let (_right_tx, mut right_rx, peer) = right.into_parts();
        assert!(peer.is_none());

        left_tx.send(Message::event("a", vec![json!(1)])).unwrap();
        left_tx.send(Message::reply(9, json!("x"))).unwrap();
        assert_eq!(right_rx.recv().await.unwrap().channel(), Some("a"));
        assert_eq!(right_rx.recv().await.unwrap(), Message::reply(9, json!("x")));
    }

    #[tokio::test]
    async fn closed_when_far_side_dropped() {
        let (left, right) = Link::pair();
        let (left_tx, _left_rx, _) = left.into_parts();
        drop(right);
        assert!(left_tx.is_closed());
    }

    #[tokio::test]
    async fn stream_links_carry_messages() {
        let (a, b) = UnixStream::pair().unwrap();
        let (a_tx, mut a_rx, a_peer) = Link::from_stream(a, FrameConfig::default()).into_parts();
        let (b_tx, mut b_rx, _) = Link::from_stream(b, FrameConfig::default()).into_parts();
        assert!(a_peer.is_some());

        a_tx.send(Message::invoke(1, "echo", json!({"args": []}))).unwrap();
        let got = b_rx.recv().await.unwrap();
        assert_eq!(got.channel(), Some("echo"));

        b_tx.send(Message::reply(1, json!("pong"))).unwrap();
        assert_eq!(a_rx.recv().await.unwrap(), Message::reply(1, json!("pong")));

        drop(b_tx);
        assert!(a_rx.recv().await.is_none());
    }
}

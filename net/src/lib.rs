use futures::stream::StreamExt;
use prelude::Message;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;

pub mod doh;
pub mod prelude;
pub mod receiver;
pub mod sender;

/// Invoked by both the UDP listener and the DoH endpoint with the raw wire
/// bytes of a query; always returns the raw wire bytes of a response. Every
/// well-formed or malformed datagram gets exactly one reply — callers never
/// see `None`.
#[async_trait::async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, query: &[u8], client: Option<SocketAddr>) -> Vec<u8>;
}

pub struct UdpServer<H> {
    socket: Arc<UdpSocket>,
    handler: Arc<H>,
}

impl<H: Handler + 'static> UdpServer<H> {
    /// Binds the listening socket eagerly so a bind failure (e.g. the port
    /// is already in use) surfaces to the caller before any query is
    /// dispatched, rather than only once `run` starts its receive loop.
    pub async fn bind(address: SocketAddr, handler: Arc<H>) -> std::io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(address).await?);
        Ok(Self { socket, handler })
    }

    pub async fn run(&self) -> std::io::Result<()> {
        let socket = self.socket.clone();

        let receiver = receiver::Receiver::new(socket.clone());
        let sender = sender::Sender::new(socket);
        let handler = self.handler.clone();

        let stream = receiver.into_stream().map(|item| {
            let handler = handler.clone();
            async move {
                let reply = handler.handle(item.payload(), Some(item.address)).await;
                Message {
                    address: item.address,
                    buffer: {
                        let mut buf = [0u8; shieldns_wire::buffer::MAX_BUFFER_SIZE];
                        let len = reply.len().min(buf.len());
                        buf[..len].copy_from_slice(&reply[..len]);
                        buf
                    },
                    size: reply.len().min(shieldns_wire::buffer::MAX_BUFFER_SIZE),
                }
            }
        });

        // A worker panicking or a single reply failing to send must not take
        // the listener down with it; only the socket write can fail here.
        let stream = stream.buffer_unordered(64);
        tokio::pin!(stream);

        while let Some(item) = stream.next().await {
            if let Err(error) = sender.send(&item).await {
                tracing::error!("couldn't send message to {:?}: {error:?}", item.address);
            }
        }

        Ok(())
    }
}

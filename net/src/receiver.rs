use crate::prelude::Message;
use async_stream::stream;
use futures_core::stream::Stream;
use shieldns_wire::buffer::MAX_BUFFER_SIZE;
use std::sync::Arc;
use tokio::net::UdpSocket;

#[derive(Debug)]
pub struct Receiver {
    socket: Arc<UdpSocket>,
}

impl Receiver {
    pub fn new(socket: Arc<UdpSocket>) -> Self {
        Self { socket }
    }

    async fn receive(&self) -> std::io::Result<Message> {
        let mut buffer = [0u8; MAX_BUFFER_SIZE];
        let (size, address) = self.socket.recv_from(&mut buffer).await?;
        Ok(Message {
            address,
            buffer,
            size,
        })
    }

    pub fn into_stream(self) -> impl Stream<Item = Message> {
        stream! {
            loop {
                match self.receive().await {
                    Ok(message) => {
                        tracing::debug!("received message from {:?}", message.address);
                        yield message;
                    }
                    Err(error) => {
                        tracing::warn!("failed to read from udp socket: {error:?}");
                    }
                }
            }
        }
    }
}

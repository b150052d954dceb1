use shieldns_wire::buffer::MAX_BUFFER_SIZE;
use std::net::SocketAddr;

/// A single inbound or outbound UDP datagram, sized for the largest EDNS(0)
/// payload this server advertises.
pub struct Message {
    pub address: SocketAddr,
    pub buffer: [u8; MAX_BUFFER_SIZE],
    pub size: usize,
}

impl Message {
    pub fn payload(&self) -> &[u8] {
        &self.buffer[..self.size]
    }
}

use std::time::Duration;

use shieldns_wire::{DnsPacket, ResponseCode};

use crate::prelude::{Provider, ProviderError};

const DNS_MESSAGE_CONTENT_TYPE: &str = "application/dns-message";

fn is_acceptable(bytes: &[u8]) -> bool {
    match DnsPacket::try_from(bytes) {
        Ok(packet) => {
            !packet.header.truncated_message
                && matches!(
                    packet.header.response_code,
                    ResponseCode::NoError | ResponseCode::NameError
                )
        }
        Err(_) => false,
    }
}

/// A DNS-over-HTTPS provider: NextDNS, Cloudflare, Google and OpenDNS all
/// speak the same RFC 8484 POST contract, differing only in endpoint.
#[derive(Debug, Clone)]
pub struct DohProvider {
    name: &'static str,
    endpoint: String,
    client: reqwest::Client,
}

impl DohProvider {
    pub fn new(name: &'static str, endpoint: impl Into<String>) -> Self {
        Self {
            name,
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn cloudflare() -> Self {
        Self::new("cloudflare", "https://cloudflare-dns.com/dns-query")
    }

    pub fn google() -> Self {
        Self::new("google", "https://dns.google/dns-query")
    }

    pub fn opendns() -> Self {
        Self::new("opendns", "https://doh.opendns.com/dns-query")
    }

    /// `config_id` is NextDNS's per-account routing id; it is a hard error
    /// to construct this provider without one.
    pub fn nextdns(config_id: &str) -> Result<Self, ProviderError> {
        if config_id.trim().is_empty() {
            return Err(ProviderError::ConfigInvalid(
                "nextdns requires a non-empty config id".into(),
            ));
        }
        Ok(Self::new(
            "nextdns",
            format!("https://dns.nextdns.io/{config_id}"),
        ))
    }
}

#[async_trait::async_trait]
impl Provider for DohProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn resolve(&self, query: &[u8], timeout: Duration) -> Result<Vec<u8>, ProviderError> {
        let response = self
            .client
            .post(&self.endpoint)
            .timeout(timeout)
            .header(reqwest::header::CONTENT_TYPE, DNS_MESSAGE_CONTENT_TYPE)
            .header(reqwest::header::ACCEPT, DNS_MESSAGE_CONTENT_TYPE)
            .body(query.to_vec())
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    ProviderError::Timeout
                } else if error.is_connect() {
                    ProviderError::Refused
                } else {
                    ProviderError::Network(error.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(ProviderError::Network(format!(
                "http status {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|error| ProviderError::Network(error.to_string()))?;

        if !is_acceptable(&bytes) {
            return Err(ProviderError::Unacceptable);
        }

        Ok(bytes.to_vec())
    }
}

/// Forwards raw wire bytes to the host's classic resolver over UDP. This is
/// the one-step fallback named in the spec, not a general recursive client.
#[derive(Debug, Clone)]
pub struct SystemProvider {
    address: std::net::SocketAddr,
}

impl SystemProvider {
    pub fn new(address: std::net::SocketAddr) -> Self {
        Self { address }
    }
}

#[async_trait::async_trait]
impl Provider for SystemProvider {
    fn name(&self) -> &'static str {
        "system"
    }

    async fn resolve(&self, query: &[u8], timeout: Duration) -> Result<Vec<u8>, ProviderError> {
        let socket = tokio::net::UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|error| ProviderError::Network(error.to_string()))?;
        socket
            .connect(self.address)
            .await
            .map_err(|error| ProviderError::Network(error.to_string()))?;
        socket
            .send(query)
            .await
            .map_err(|error| ProviderError::Network(error.to_string()))?;

        let mut buffer = [0u8; shieldns_wire::buffer::MAX_BUFFER_SIZE];
        let size = tokio::time::timeout(timeout, socket.recv(&mut buffer))
            .await
            .map_err(|_| ProviderError::Timeout)?
            .map_err(|error| ProviderError::Network(error.to_string()))?;

        let reply = &buffer[..size];
        if !is_acceptable(reply) {
            return Err(ProviderError::Unacceptable);
        }
        Ok(reply.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nextdns_requires_config_id() {
        let error = DohProvider::nextdns("").unwrap_err();
        assert!(matches!(error, ProviderError::ConfigInvalid(_)));
    }

    #[test]
    fn nextdns_builds_endpoint_from_config_id() {
        let provider = DohProvider::nextdns("abc123").unwrap();
        assert_eq!(provider.endpoint, "https://dns.nextdns.io/abc123");
    }
}

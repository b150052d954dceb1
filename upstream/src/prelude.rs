use std::fmt::Display;
use std::time::Duration;

/// Failure kinds a single provider call can produce. Distinguishing them
/// lets the dispatcher decide whether a provider is merely slow (timeout,
/// worth retrying later) or structurally broken (refused, network error).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProviderError {
    Timeout,
    Refused,
    Network(String),
    /// The response decoded but was truncated or carried an RCODE other
    /// than NOERROR/NXDOMAIN, so it cannot win the fan-out.
    Unacceptable,
    ConfigInvalid(String),
}

impl Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "provider timed out"),
            Self::Refused => write!(f, "provider refused the connection"),
            Self::Network(message) => write!(f, "provider network error: {message}"),
            Self::Unacceptable => write!(f, "provider returned an unacceptable response"),
            Self::ConfigInvalid(message) => write!(f, "provider misconfigured: {message}"),
        }
    }
}

impl std::error::Error for ProviderError {}

pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(5);

/// A single upstream DNS provider: NextDNS, Cloudflare, Google, OpenDNS, or
/// the system resolver. Implementations receive and return raw wire bytes
/// so the dispatcher never has to know which transport a provider uses.
#[async_trait::async_trait]
pub trait Provider: std::fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    async fn resolve(&self, query: &[u8], timeout: Duration) -> Result<Vec<u8>, ProviderError>;
}

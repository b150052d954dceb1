use std::time::Duration;

use crate::prelude::{Provider, ProviderError};

/// A canned provider for exercising the dispatcher without real network
/// calls.
#[derive(Debug)]
pub struct MockProvider {
    name: &'static str,
    outcome: Result<Vec<u8>, ProviderError>,
}

impl MockProvider {
    pub fn succeeding(name: &'static str, response: Vec<u8>) -> Self {
        Self {
            name,
            outcome: Ok(response),
        }
    }

    pub fn failing(name: &'static str) -> Self {
        Self {
            name,
            outcome: Err(ProviderError::Network("mock failure".into())),
        }
    }
}

#[async_trait::async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn resolve(&self, _query: &[u8], _timeout: Duration) -> Result<Vec<u8>, ProviderError> {
        self.outcome.clone()
    }
}

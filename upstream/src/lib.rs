#[cfg(feature = "mock")]
pub mod mock;
pub mod prelude;
pub mod provider;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::stream::FuturesUnordered;
use futures::StreamExt;

use prelude::{Provider, ProviderError, DEFAULT_PROVIDER_TIMEOUT};

const DEFAULT_FANOUT: usize = 3;
const DEFAULT_STAGGER: Duration = Duration::from_millis(200);
const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

#[derive(Default)]
struct ProviderState {
    consecutive_failures: u32,
    cooldown_until: Option<Instant>,
}

/// Every configured provider failed; carries one error per attempt made.
#[derive(Debug)]
pub struct AllProvidersFailed {
    pub errors: Vec<(&'static str, ProviderError)>,
}

/// Dispatches a query to an ordered list of upstream providers concurrently,
/// staggering starts so the preferred provider gets a head start, and
/// returns as soon as one returns an acceptable response. Providers with
/// too many recent consecutive failures are skipped until their cooldown
/// elapses.
pub struct Dispatcher {
    providers: Vec<Arc<dyn Provider>>,
    state: Mutex<HashMap<&'static str, ProviderState>>,
    fanout: usize,
    stagger: Duration,
    failure_threshold: u32,
    cooldown: Duration,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(providers: Vec<Arc<dyn Provider>>) -> Self {
        Self {
            providers,
            state: Mutex::new(HashMap::new()),
            fanout: DEFAULT_FANOUT,
            stagger: DEFAULT_STAGGER,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown: DEFAULT_COOLDOWN,
            timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }

    fn available_providers(&self, prefer: Option<&str>) -> Vec<Arc<dyn Provider>> {
        let now = Instant::now();
        let state = self.state.lock().expect("provider state lock poisoned");
        let mut candidates: Vec<Arc<dyn Provider>> = self
            .providers
            .iter()
            .filter(|provider| {
                state
                    .get(provider.name())
                    .and_then(|entry| entry.cooldown_until)
                    .map(|until| now >= until)
                    .unwrap_or(true)
            })
            .cloned()
            .collect();

        if let Some(name) = prefer {
            if let Some(index) = candidates.iter().position(|provider| provider.name() == name) {
                let preferred = candidates.remove(index);
                candidates.insert(0, preferred);
            }
        }

        candidates.truncate(self.fanout);
        candidates
    }

    fn record_success(&self, name: &'static str) {
        let mut state = self.state.lock().expect("provider state lock poisoned");
        state.entry(name).or_default().consecutive_failures = 0;
        if let Some(entry) = state.get_mut(name) {
            entry.cooldown_until = None;
        }
    }

    fn record_failure(&self, name: &'static str) {
        let mut state = self.state.lock().expect("provider state lock poisoned");
        let entry = state.entry(name).or_default();
        entry.consecutive_failures += 1;
        if entry.consecutive_failures >= self.failure_threshold {
            entry.cooldown_until = Some(Instant::now() + self.cooldown);
        }
    }

    /// Fans the query out to the first `fanout` available providers, in
    /// order, each starting `stagger` after the previous one. Returns the
    /// winning provider's name and its response bytes.
    pub async fn dispatch(
        &self,
        query: &[u8],
    ) -> Result<(&'static str, Vec<u8>), AllProvidersFailed> {
        self.dispatch_preferring(query, None).await
    }

    /// As [`Self::dispatch`], but moves the named provider to the front of
    /// the fan-out order first (if present and available). Used by the
    /// resolver's whitelist-aware primary-upstream selection.
    pub async fn dispatch_preferring(
        &self,
        query: &[u8],
        prefer: Option<&str>,
    ) -> Result<(&'static str, Vec<u8>), AllProvidersFailed> {
        let candidates = self.available_providers(prefer);
        if candidates.is_empty() {
            return Err(AllProvidersFailed { errors: Vec::new() });
        }

        let mut attempts = FuturesUnordered::new();
        for (index, provider) in candidates.into_iter().enumerate() {
            let delay = self.stagger * index as u32;
            let timeout = self.timeout;
            let query = query.to_vec();
            attempts.push(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let result = provider.resolve(&query, timeout).await;
                (provider.name(), result)
            });
        }

        let mut errors = Vec::new();
        while let Some((name, result)) = attempts.next().await {
            match result {
                Ok(bytes) => {
                    self.record_success(name);
                    return Ok((name, bytes));
                }
                Err(error) => {
                    tracing::debug!(provider = name, %error, "provider attempt failed");
                    self.record_failure(name);
                    errors.push((name, error));
                }
            }
        }

        Err(AllProvidersFailed { errors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn should_return_first_success() {
        let dispatcher = Dispatcher::new(vec![Arc::new(mock::MockProvider::failing("broken"))
            as Arc<dyn Provider>]);
        let result = dispatcher.dispatch(&[0u8; 12]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn should_succeed_when_one_provider_answers() {
        let working = mock::MockProvider::succeeding("good", vec![1, 2, 3]);
        let dispatcher = Dispatcher::new(vec![Arc::new(working) as Arc<dyn Provider>]);
        let (name, bytes) = dispatcher.dispatch(&[0u8; 12]).await.unwrap();
        assert_eq!(name, "good");
        assert_eq!(bytes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn should_cooldown_after_consecutive_failures() {
        let broken = mock::MockProvider::failing("broken");
        let dispatcher = Dispatcher::new(vec![Arc::new(broken) as Arc<dyn Provider>]);
        for _ in 0..DEFAULT_FAILURE_THRESHOLD {
            let _ = dispatcher.dispatch(&[0u8; 12]).await;
        }
        let result = dispatcher.dispatch(&[0u8; 12]).await;
        assert!(result.unwrap_err().errors.is_empty());
    }
}

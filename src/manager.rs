//! Manager / State Machine (C9): owns the DNS server's lifecycle, the
//! active driver set and the authoritative config, and brokers hot
//! driver/config swaps without restarting the listeners.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use shieldns_net::doh;
use shieldns_net::UdpServer;
use shieldns_upstream::provider::{DohProvider, SystemProvider};
use shieldns_upstream::prelude::Provider;
use shieldns_upstream::Dispatcher;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::events::EventBus;
use crate::resolver::{Resolver, ResolverConfig};
use crate::store::log::LogEntry;
use crate::store::Drivers;

/// Maps the on-disk `secondaryDns` string onto the resolver's `'static str`
/// provider name; `Config::validate` already rejects anything else.
fn resolver_config_from(config: &Config) -> ResolverConfig {
    let secondary_dns = match config.secondary_dns.as_str() {
        "google" => "google",
        "opendns" => "opendns",
        _ => "cloudflare",
    };
    ResolverConfig {
        enable_whitelist_mode: config.enable_whitelist_mode,
        next_dns_provider: "nextdns",
        secondary_dns,
    }
}

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug)]
pub struct IllegalState {
    pub from: State,
    pub attempted: &'static str,
}

impl std::fmt::Display for IllegalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cannot {} from state {:?}", self.attempted, self.from)
    }
}

impl std::error::Error for IllegalState {}

/// `start`'s failure cases: either the state machine rejected the call, or
/// the call was legal but the UDP socket couldn't be bound. Spec.md line
/// 123's "on bind failure → Stopped + error" requires the latter to reach
/// the caller, not just the logs.
#[derive(Debug)]
pub enum StartError {
    Illegal(IllegalState),
    Bind(std::io::Error),
}

impl std::fmt::Display for StartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Illegal(error) => write!(f, "{error}"),
            Self::Bind(error) => write!(f, "failed to bind udp listener: {error}"),
        }
    }
}

impl std::error::Error for StartError {}

impl From<IllegalState> for StartError {
    fn from(value: IllegalState) -> Self {
        Self::Illegal(value)
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

struct RunningServer {
    udp_task: JoinHandle<()>,
    http_task: JoinHandle<()>,
    keepalive_task: JoinHandle<()>,
    status_task: JoinHandle<()>,
    started_at: u64,
}

/// Builds the dispatcher's provider list from `Config.providers`, filtering
/// out NextDNS if no config id is set, per §4.6's "filtered by availability".
fn build_providers(config: &Config) -> Vec<Arc<dyn Provider>> {
    config
        .providers
        .iter()
        .filter_map(|name| match name.as_str() {
            "nextdns" => config
                .next_dns_config_id
                .as_deref()
                .and_then(|id| DohProvider::nextdns(id).ok())
                .map(|provider| Arc::new(provider) as Arc<dyn Provider>),
            "cloudflare" => Some(Arc::new(DohProvider::cloudflare()) as Arc<dyn Provider>),
            "google" => Some(Arc::new(DohProvider::google()) as Arc<dyn Provider>),
            "opendns" => Some(Arc::new(DohProvider::opendns()) as Arc<dyn Provider>),
            "system" => Some(Arc::new(SystemProvider::new(SocketAddr::from(([1, 1, 1, 1], 53))))
                as Arc<dyn Provider>),
            other => {
                tracing::warn!(provider = other, "unknown provider name in config, skipping");
                None
            }
        })
        .collect()
}

/// The single owner of server lifecycle. `start`/`stop`/`toggle` drive the
/// `Stopped → Starting → Running → Stopping → Stopped` state machine;
/// `updateDrivers`/`updateResolverConfig` mutate the running resolver
/// without touching that state.
pub struct Manager {
    state: tokio::sync::Mutex<State>,
    running: tokio::sync::Mutex<Option<RunningServer>>,
    resolver: Arc<Resolver>,
    events: Arc<EventBus>,
    config: tokio::sync::RwLock<Config>,
}

impl Manager {
    pub fn new(config: Config, drivers: Drivers, events: Arc<EventBus>) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(build_providers(&config)));
        let resolver = Arc::new(Resolver::new(drivers, dispatcher, events.clone()));
        Self {
            state: tokio::sync::Mutex::new(State::Stopped),
            running: tokio::sync::Mutex::new(None),
            resolver,
            events,
            config: tokio::sync::RwLock::new(config),
        }
    }

    pub async fn state(&self) -> State {
        *self.state.lock().await
    }

    pub fn resolver(&self) -> Arc<Resolver> {
        self.resolver.clone()
    }

    pub async fn status(&self) -> crate::events::StatusSnapshot {
        let state = self.state().await;
        let running = self.running.lock().await;
        let cache_size = self.resolver.drivers().await.cache.size().await.unwrap_or(0);
        crate::events::StatusSnapshot {
            running: state == State::Running,
            cache_size,
            uptime_secs: running
                .as_ref()
                .map(|server| now_secs().saturating_sub(server.started_at))
                .unwrap_or(0),
        }
    }

    /// `getConfig` of the admin control surface (spec §4.10's SUPPLEMENT):
    /// a plain accessor an external admin layer can bolt onto.
    pub async fn get_config(&self) -> Config {
        self.config.read().await.clone()
    }

    /// `updateConfig`: replaces the stored config outright. Address and
    /// provider-list changes only take effect on the next `start`; driver
    /// and resolver-policy changes should go through `update_drivers`/
    /// `update_resolver_config` instead, which apply immediately.
    pub async fn update_config(&self, config: Config) {
        *self.config.write().await = config;
    }

    /// `listDrivers`: the driver bundle currently backing the resolver.
    pub async fn drivers(&self) -> Drivers {
        (*self.resolver.drivers().await).clone()
    }

    /// `setDriver`: swaps a single storage role without disturbing the
    /// others, by reading the current bundle, replacing one field, and
    /// publishing the result wholesale through `Resolver::set_drivers`.
    pub async fn set_cache_driver(&self, driver: Arc<dyn crate::store::CacheStore>) {
        let mut drivers = self.drivers().await;
        drivers.cache = driver;
        self.update_drivers(drivers).await;
    }

    pub async fn set_blacklist_driver(&self, driver: Arc<dyn crate::store::ListStore>) {
        let mut drivers = self.drivers().await;
        drivers.blacklist = driver;
        self.update_drivers(drivers).await;
    }

    pub async fn set_whitelist_driver(&self, driver: Arc<dyn crate::store::ListStore>) {
        let mut drivers = self.drivers().await;
        drivers.whitelist = driver;
        self.update_drivers(drivers).await;
    }

    pub async fn set_logs_driver(&self, driver: Arc<dyn crate::store::LogStore>) {
        let mut drivers = self.drivers().await;
        drivers.logs = driver;
        self.update_drivers(drivers).await;
    }

    /// SSE event stream: an admin layer subscribes here and forwards events
    /// to connected clients; the engine itself does no HTTP framing.
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<crate::events::Event> {
        self.events.subscribe()
    }

    pub async fn start(&self) -> Result<(), StartError> {
        {
            let mut state = self.state.lock().await;
            if *state != State::Stopped {
                return Err(StartError::Illegal(IllegalState { from: *state, attempted: "start" }));
            }
            *state = State::Starting;
        }

        let config = self.config.read().await.clone();
        let address = config.address();
        self.resolver.set_config(resolver_config_from(&config)).await;

        let udp_resolver = self.resolver.clone();
        let udp_server = match UdpServer::bind(address, udp_resolver).await {
            Ok(server) => server,
            Err(error) => {
                *self.state.lock().await = State::Stopped;
                tracing::error!(%error, %address, "failed to bind udp listener");
                return Err(StartError::Bind(error));
            }
        };
        let udp_task = tokio::spawn(async move {
            if let Err(error) = udp_server.run().await {
                tracing::error!(%error, "udp listener exited");
            }
        });

        let http_resolver = self.resolver.clone();
        let http_address = SocketAddr::from((config.host, config.port.saturating_add(1)));
        let http_task = tokio::spawn(async move {
            let app = doh::router(http_resolver);
            if let Err(error) = axum::Server::bind(&http_address)
                .serve(app.into_make_service())
                .await
            {
                tracing::error!(%error, %http_address, "doh listener exited");
            }
        });

        let keepalive_task = self.events.spawn_keepalive();
        let status_events = self.events.clone();
        let resolver_for_status = self.resolver.clone();
        let started_at = now_secs();
        let status_task = status_events.spawn_status(move || {
            let resolver = resolver_for_status.clone();
            async move {
                let cache_size = resolver.drivers().await.cache.size().await.unwrap_or(0);
                crate::events::StatusSnapshot {
                    running: true,
                    cache_size,
                    uptime_secs: now_secs().saturating_sub(started_at),
                }
            }
        });

        *self.running.lock().await = Some(RunningServer {
            udp_task,
            http_task,
            keepalive_task,
            status_task,
            started_at,
        });
        *self.state.lock().await = State::Running;

        self.publish_lifecycle("started").await;
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), IllegalState> {
        {
            let mut state = self.state.lock().await;
            if *state != State::Running {
                return Err(IllegalState { from: *state, attempted: "stop" });
            }
            *state = State::Stopping;
        }

        tokio::time::sleep(SHUTDOWN_GRACE).await;

        if let Some(server) = self.running.lock().await.take() {
            server.udp_task.abort();
            server.http_task.abort();
            server.keepalive_task.abort();
            server.status_task.abort();
        }

        *self.state.lock().await = State::Stopped;
        self.publish_lifecycle("stopped").await;
        Ok(())
    }

    pub async fn toggle(&self) -> Result<(), StartError> {
        match self.state().await {
            State::Stopped => self.start().await,
            State::Running => self.stop().await.map_err(StartError::from),
            other => Err(StartError::Illegal(IllegalState { from: other, attempted: "toggle" })),
        }
    }

    pub async fn update_drivers(&self, drivers: Drivers) {
        self.resolver.set_drivers(drivers).await;
    }

    pub async fn update_resolver_config(&self, resolver_config: ResolverConfig) -> Result<(), IllegalState> {
        if self.state().await != State::Running {
            return Err(IllegalState { from: self.state().await, attempted: "updateResolverConfig" });
        }
        self.resolver.set_config(resolver_config).await;
        self.publish_lifecycle("configChanged").await;
        Ok(())
    }

    async fn publish_lifecycle(&self, kind: &str) {
        self.events
            .publish(crate::events::Event::Log(LogEntry::server_event(kind.to_string())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> Manager {
        Manager::new(Config::default(), Drivers::in_memory(), Arc::new(EventBus::default()))
    }

    #[tokio::test]
    async fn should_reject_stop_when_already_stopped() {
        let manager = manager();
        let error = manager.stop().await.unwrap_err();
        assert_eq!(error.from, State::Stopped);
    }

    #[tokio::test]
    async fn should_reject_update_resolver_config_when_not_running() {
        let manager = manager();
        let error = manager
            .update_resolver_config(ResolverConfig::default())
            .await
            .unwrap_err();
        assert_eq!(error.from, State::Stopped);
    }

    #[tokio::test]
    async fn update_drivers_is_allowed_while_stopped() {
        let manager = manager();
        manager.update_drivers(Drivers::in_memory()).await;
        assert_eq!(manager.state().await, State::Stopped);
    }

    #[test]
    fn resolver_config_from_falls_back_to_cloudflare_for_unknown_secondary_dns() {
        let mut config = Config::default();
        config.secondary_dns = "not-a-real-provider".into();
        assert_eq!(resolver_config_from(&config).secondary_dns, "cloudflare");
    }

    #[tokio::test]
    async fn set_cache_driver_replaces_only_the_cache_role() {
        let manager = manager();
        let blacklist_before = Arc::as_ptr(&manager.drivers().await.blacklist);

        manager
            .set_cache_driver(Arc::new(crate::store::cache::MemoryCacheStore::new(1)))
            .await;

        let after = manager.drivers().await;
        assert_eq!(Arc::as_ptr(&after.blacklist), blacklist_before);
    }

    #[tokio::test]
    async fn update_config_is_visible_through_get_config() {
        let manager = manager();
        let mut replacement = Config::default();
        replacement.port = 9999;
        manager.update_config(replacement).await;
        assert_eq!(manager.get_config().await.port, 9999);
    }
}

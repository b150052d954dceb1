use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

use shieldns_blocklist_loader::BlocklistKind;

/// A named remote blocklist source, fetched and imported into the
/// blacklist store by the `blocklist import` subcommand.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct BlocklistSource {
    pub url: String,
    pub kind: BlocklistKind,
}

/// Full on-disk configuration, loaded once at startup and mutated in place
/// by the manager's `updateResolverConfig` while the server is running.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    #[serde(default = "Config::default_host")]
    pub host: IpAddr,
    #[serde(default = "Config::default_port")]
    pub port: u16,
    #[serde(default)]
    pub next_dns_config_id: Option<String>,
    #[serde(default = "Config::default_providers")]
    pub providers: Vec<String>,
    #[serde(default)]
    pub enable_whitelist_mode: bool,
    #[serde(default = "Config::default_secondary_dns")]
    pub secondary_dns: String,
    #[serde(default)]
    pub database: crate::service::database::Config,
    #[serde(default)]
    pub blocklists: BTreeMap<String, BlocklistSource>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            next_dns_config_id: None,
            providers: Self::default_providers(),
            enable_whitelist_mode: false,
            secondary_dns: Self::default_secondary_dns(),
            database: Default::default(),
            blocklists: Default::default(),
        }
    }
}

impl Config {
    fn default_host() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0))
    }

    fn default_port() -> u16 {
        53
    }

    fn default_providers() -> Vec<String> {
        vec!["nextdns".into(), "cloudflare".into(), "google".into()]
    }

    fn default_secondary_dns() -> String {
        "cloudflare".into()
    }

    pub fn address(&self) -> SocketAddr {
        SocketAddr::from((self.host, self.port))
    }

    pub fn load(path: &Path) -> Self {
        let conf = ::config::Config::builder()
            .add_source(::config::File::from(path).required(true))
            .add_source(::config::Environment::default().separator("_"))
            .build()
            .expect("unable to locate configuration file");
        conf.try_deserialize()
            .expect("configuration format invalid")
    }

    /// Validates cross-field invariants `config check` and the manager
    /// enforce before accepting a config: NextDNS can't be selected without
    /// a config id, and `secondaryDns` must name an actual DoH provider.
    pub fn validate(&self) -> Result<(), String> {
        if self.providers.iter().any(|name| name == "nextdns") && self.next_dns_config_id.is_none()
        {
            return Err("providers list names \"nextdns\" but next_dns_config_id is unset".into());
        }
        if !["cloudflare", "google", "opendns"].contains(&self.secondary_dns.as_str()) {
            return Err(format!(
                "secondary_dns must be one of cloudflare/google/opendns, got {:?}",
                self.secondary_dns
            ));
        }
        Ok(())
    }
}

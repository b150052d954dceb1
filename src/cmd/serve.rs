use std::sync::Arc;

use clap::Args;

use crate::events::EventBus;
use crate::manager::Manager;
use crate::store::cache::SqlCacheStore;
use crate::store::list::SqlListStore;
use crate::store::log::SqlLogStore;
use crate::store::Drivers;

/// Starts the DNS engine and blocks until a shutdown signal arrives.
#[derive(Args, Debug)]
pub struct Command;

impl Command {
    pub async fn run(self, config: crate::config::Config) {
        if let Err(message) = config.validate() {
            tracing::error!(message, "invalid configuration");
            std::process::exit(3);
        }

        let drivers = match config.database.build().await {
            Ok(pool) => {
                if let Err(error) = crate::service::database::migrate(&pool).await {
                    tracing::error!(%error, "unable to migrate storage");
                    std::process::exit(2);
                }
                Drivers {
                    cache: Arc::new(SqlCacheStore::new(pool.clone())),
                    blacklist: Arc::new(SqlListStore::blacklist(pool.clone())),
                    whitelist: Arc::new(SqlListStore::whitelist(pool.clone())),
                    logs: Arc::new(SqlLogStore::new(pool)),
                }
            }
            Err(error) => {
                tracing::error!(%error, "unable to connect to database, falling back to in-memory storage");
                Drivers::in_memory()
            }
        };

        let events = Arc::new(EventBus::default());
        let manager = Manager::new(config, drivers, events);

        if let Err(error) = manager.start().await {
            tracing::error!(%error, "unable to start server");
            std::process::exit(1);
        }

        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("shutdown signal received"),
            Err(error) => tracing::warn!(%error, "unable to listen for shutdown signal"),
        }

        if let Err(error) = manager.stop().await {
            tracing::warn!(%error, "manager was not running at shutdown");
        }
    }
}

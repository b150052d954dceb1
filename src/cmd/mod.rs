pub mod blocklist;
pub mod config;
pub mod serve;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Local recursive-style DNS proxy with blacklist/whitelist policy
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Path to the configuration file
    #[arg(
        short,
        long,
        default_value = "/etc/shieldns/shieldns.toml",
        env = "CONFIG_PATH"
    )]
    config_path: PathBuf,
    #[command(subcommand)]
    inner: Commands,
}

impl Args {
    pub async fn run(self) {
        let config = crate::config::Config::load(&self.config_path);
        match self.inner {
            Commands::Serve(inner) => inner.run(config).await,
            Commands::Blocklist(inner) => inner.run(config).await,
            Commands::Config(inner) => inner.run(config).await,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    Serve(serve::Command),
    Blocklist(blocklist::Command),
    Config(config::Command),
}

use clap::{Args, Subcommand};

/// Validate a configuration file without starting the engine.
#[derive(Args, Debug)]
pub struct Command {
    #[command(subcommand)]
    inner: Inner,
}

#[derive(Debug, Subcommand)]
enum Inner {
    /// Parse and cross-validate the config, exiting 3 on failure
    Check,
}

impl Command {
    pub async fn run(self, config: crate::config::Config) {
        let Inner::Check = self.inner;
        match config.validate() {
            Ok(()) => tracing::info!("configuration is valid"),
            Err(message) => {
                tracing::error!(message, "invalid configuration");
                std::process::exit(3);
            }
        }
    }
}

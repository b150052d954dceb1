use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Args, Subcommand};

use crate::store::list::{ListEntry, ListStore, Source, SqlListStore};

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// Bulk-import a blocklist into the persistent blacklist store.
#[derive(Args, Debug)]
pub struct Command {
    #[command(subcommand)]
    inner: Inner,
}

#[derive(Debug, Subcommand)]
enum Inner {
    /// Load a hosts-format blocklist URL and upsert its domains
    Import(Import),
}

#[derive(Args, Debug)]
struct Import {
    /// Name of an entry in the config file's `[blocklists]` table; when
    /// omitted every configured source is imported.
    name: Option<String>,
}

impl Command {
    pub async fn run(self, config: crate::config::Config) {
        let pool = config
            .database
            .build()
            .await
            .expect("unable to connect to database");
        crate::service::database::migrate(&pool)
            .await
            .expect("unable to migrate the database");

        let blacklist = SqlListStore::blacklist(pool);
        let loader = shieldns_blocklist_loader::BlocklistLoader::default();

        let Inner::Import(Import { name }) = self.inner;
        let sources: Vec<(&String, &crate::config::BlocklistSource)> = config
            .blocklists
            .iter()
            .filter(|(key, _)| name.as_deref().is_none_or(|want| want == key.as_str()))
            .collect();

        let mut total_inserted = 0;
        for (key, source) in sources {
            match loader.load(&source.url, source.kind).await {
                Ok(blocklist) => {
                    tracing::debug!(
                        blocklist = key,
                        domains = blocklist.entries.len(),
                        hash = blocklist.hash,
                        "loaded blocklist"
                    );
                    let entries: Vec<ListEntry> = blocklist
                        .entries
                        .into_iter()
                        .map(|domain| ListEntry {
                            domain,
                            added_at_ms: now_millis(),
                            source: Source::Import,
                            reason: Some(format!("{key} blocklist")),
                            category: None,
                        })
                        .collect();
                    let inserted = blacklist
                        .import(entries)
                        .await
                        .expect("couldn't import blocklist");
                    tracing::debug!(blocklist = key, inserted, "imported blocklist");
                    total_inserted += inserted;
                }
                Err(error) => tracing::warn!(blocklist = key, %error, "unable to load blocklist"),
            }
        }
        tracing::info!(total_inserted, "blocklist import complete");
    }
}

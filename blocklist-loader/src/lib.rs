use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Which of the two blocklist formats aggregators commonly publish a given
/// source in. Both normalize to the same storage key shape (lowercase,
/// trimmed domain) so the blacklist/whitelist stores never need to know
/// which format an entry arrived in.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum BlocklistKind {
    /// `/etc/hosts` style: `0.0.0.0 domain [alias...]`, `#` starts a comment.
    EtcHosts,
    /// One domain per line, `#` starts a comment; no leading IP column.
    DomainList,
}

impl BlocklistKind {
    fn parse(self, input: &str) -> HashSet<String> {
        match self {
            Self::EtcHosts => parse_hostfile(input),
            Self::DomainList => parse_domain_list(input),
        }
    }
}

fn is_valid_domain(domain: &str) -> bool {
    !domain.is_empty() && domain != "0.0.0.0" && domain != "127.0.0.1" && domain.contains('.')
}

/// Domains come out normalized (lowercase, trimmed) so they match the
/// storage key used by the blacklist/whitelist engines directly.
fn parse_hostfile(input: &str) -> HashSet<String> {
    input
        .split('\n')
        .flat_map(|line| {
            line.split_whitespace()
                .take_while(|item| !item.starts_with('#'))
                .enumerate()
                .filter_map(|(idx, item)| if idx > 0 { Some(item) } else { None })
                .map(|item| item.trim().to_lowercase())
        })
        .filter(|domain| is_valid_domain(domain))
        .collect()
}

fn parse_domain_list(input: &str) -> HashSet<String> {
    input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.split_whitespace().next().unwrap_or(line).to_lowercase())
        .filter(|domain| is_valid_domain(domain))
        .collect()
}

fn hash(input: &str) -> String {
    let result = Sha256::new().chain_update(input).finalize();
    base16ct::lower::encode_string(&result)
}

#[derive(Debug)]
pub struct Blocklist {
    pub hash: String,
    pub entries: HashSet<String>,
}

impl Blocklist {
    pub fn from_file(value: &str, kind: BlocklistKind) -> Self {
        let hash = hash(value);
        let entries = kind.parse(value);

        Self { hash, entries }
    }
}

#[derive(Debug, Default)]
pub struct BlocklistLoader;

impl BlocklistLoader {
    pub async fn load(&self, url: &str, kind: BlocklistKind) -> Result<Blocklist, reqwest::Error> {
        tracing::debug!("loading {url:?}");
        let req = reqwest::get(url).await?;
        let text = req.text().await?;
        Ok(Blocklist::from_file(&text, kind))
    }
}

#[cfg(test)]
mod tests {
    use crate::BlocklistKind;

    use super::{hash, parse_domain_list, parse_hostfile, Blocklist};

    #[test]
    fn parse_ads_hostfile() {
        let data = include_str!("../data/ads.txt");
        let result = parse_hostfile(data);
        assert!(result.contains("0.r.msn.com"));
        assert!(result.contains("207.net"));
        assert!(!result.contains("#"));
        assert!(!result.contains("0.0.0.0"));
    }

    #[test]
    fn parse_basic_hostfile() {
        let data = include_str!("../data/basic.txt");
        let result = parse_hostfile(data);
        assert!(result.contains("0-app.com"));
        assert!(!result.contains("#"));
        assert!(!result.contains("0.0.0.0"));
        assert_eq!(
            hash(data),
            "c0d1929bb2584c045eece5cf9d46ae913fc524e960893ab469f8a93a88fe6e94"
        );
    }

    #[test]
    fn parse_complex() {
        let result = Blocklist::from_file(
            r#"# nope
0.0.0.0 this.is.blocked
0.0.0.0 this.is.also.blocked blocked.again
0.0.0.0 this.is.also.blocked #Youwon'tgetthis
0.0.0.0 this.is.also.blocked # or this"#,
            BlocklistKind::EtcHosts,
        );
        assert!(result.entries.contains("this.is.blocked"));
        assert!(result.entries.contains("this.is.also.blocked"));
        assert!(result.entries.contains("blocked.again"));
        assert!(!result.entries.contains("nope"));
        assert!(!result.entries.contains("Youwon'tgetthis"));
        assert!(!result.entries.contains("or"));
        assert!(!result.entries.contains("this"));
        assert_eq!(
            result.hash,
            "52139cfb54f4ca549444fe7cf31b30a6f71174dc39eeaf2df631ebd34b91950d"
        );
    }

    #[test]
    fn parse_domain_list_skips_comments_and_blank_lines() {
        let result = parse_domain_list(
            "# a plain domain list\n\nAds.Example.com\ntracker.example.net\n  \n# trailing comment",
        );
        assert!(result.contains("ads.example.com"));
        assert!(result.contains("tracker.example.net"));
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn parse_domain_list_drops_unroutable_ip_placeholders() {
        let result = parse_domain_list("0.0.0.0\n127.0.0.1\nblocked.example");
        assert!(!result.contains("0.0.0.0"));
        assert!(!result.contains("127.0.0.1"));
        assert!(result.contains("blocked.example"));
    }
}

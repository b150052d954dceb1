//! Resolver Pipeline (C3): parse, classify, check policy, consult cache,
//! dispatch upstream, persist, log, publish, respond. Grounded on
//! `src/dns/handler.rs`'s `DnsHandler::try_handle`, generalized with
//! whitelist-aware upstream selection and a hot-swappable driver bundle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use shieldns_net::Handler;
use shieldns_upstream::Dispatcher;
use shieldns_wire::packet::{DnsPacket, Header, ResponseCode};

use crate::events::{Event, EventBus};
use crate::store::cache::{self, Provenance};
use crate::store::log::LogEntry;
use crate::store::Drivers;

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub enable_whitelist_mode: bool,
    pub next_dns_provider: &'static str,
    pub secondary_dns: &'static str,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            enable_whitelist_mode: false,
            next_dns_provider: "nextdns",
            secondary_dns: "cloudflare",
        }
    }
}

/// Synthesizes the blacklist-mode answer: `A` gets `0.0.0.0`, `AAAA` gets
/// `::`, every other type gets an empty NOERROR answer section. TTL 60s.
fn synthesize_blocked(request: &DnsPacket, question: &shieldns_wire::packet::Question) -> DnsPacket {
    use shieldns_wire::packet::{QueryType, Record};
    use std::net::{Ipv4Addr, Ipv6Addr};

    let mut response = DnsPacket::new(Header::response_from(&request.header));
    response.questions = request.questions.clone();

    match question.qtype {
        QueryType::A => response.answers.push(Record::A {
            domain: question.name.clone(),
            addr: Ipv4Addr::UNSPECIFIED,
            ttl: 60,
        }),
        QueryType::AAAA => response.answers.push(Record::AAAA {
            domain: question.name.clone(),
            addr: Ipv6Addr::UNSPECIFIED,
            ttl: 60,
        }),
        _ => {}
    }

    response
}

fn synthesize_servfail(request: &DnsPacket) -> DnsPacket {
    let mut response =
        DnsPacket::new(Header::response_from(&request.header).with_response_code(ResponseCode::ServerFailure));
    response.questions = request.questions.clone();
    response
}

fn synthesize_formerr(id_source: &DnsPacket) -> DnsPacket {
    DnsPacket::new(Header::response_from(&id_source.header).with_response_code(ResponseCode::FormatError))
}

/// Best-effort header-only FORMERR for input too mangled to parse at all
/// (not even a valid 12-byte header): the transaction id is unknowable, so
/// `0` is used rather than dropping the datagram, per the always-answer
/// invariant.
fn synthesize_formerr_unparseable() -> DnsPacket {
    DnsPacket::new(Header {
        response: true,
        recursion_available: true,
        response_code: ResponseCode::FormatError,
        ..Header::default()
    })
}

/// Owns the driver bundle and upstream dispatcher for a running server and
/// implements [`shieldns_net::Handler`], so it plugs directly into both the
/// UDP listener and the DoH endpoint.
pub struct Resolver {
    drivers: tokio::sync::RwLock<Arc<Drivers>>,
    config: tokio::sync::RwLock<ResolverConfig>,
    dispatcher: Arc<Dispatcher>,
    events: Arc<EventBus>,
}

impl Resolver {
    pub fn new(drivers: Drivers, dispatcher: Arc<Dispatcher>, events: Arc<EventBus>) -> Self {
        Self {
            drivers: tokio::sync::RwLock::new(Arc::new(drivers)),
            config: tokio::sync::RwLock::new(ResolverConfig::default()),
            dispatcher,
            events,
        }
    }

    /// Swaps the driver bundle wholesale. In-flight requests already hold
    /// their own `Arc` snapshot taken at request start, so they finish
    /// against the old bundle.
    pub async fn set_drivers(&self, drivers: Drivers) {
        *self.drivers.write().await = Arc::new(drivers);
        self.events.publish(Event::Drivers { kind: "all".into() });
    }

    pub async fn set_config(&self, config: ResolverConfig) {
        *self.config.write().await = config;
    }

    /// Current driver bundle, for admin-surface reads and single-role swaps
    /// (`Manager::set_cache_driver` and friends).
    pub async fn drivers(&self) -> Arc<Drivers> {
        self.drivers.read().await.clone()
    }

    async fn resolve(&self, client: Option<SocketAddr>, query: &[u8], request: &DnsPacket) -> DnsPacket {
        let started = Instant::now();
        let drivers = self.drivers.read().await.clone();
        let config = self.config.read().await.clone();

        let Some(question) = request.questions.first() else {
            drivers.logs.append(LogEntry::error("query carried no question".into())).await.ok();
            return synthesize_formerr(request);
        };

        drivers
            .logs
            .append(LogEntry::request(
                client.map(|addr| addr.to_string()),
                question.name.clone(),
                format!("{:?}", question.qtype),
            ))
            .await
            .ok();

        // Whitelist override applies unconditionally (spec §4.4): a name on
        // the whitelist beats a blacklist hit even outside whitelist-mode.
        // A storage fault fails open to "no override", not "override" — an
        // unreadable list must not grant a blacklist bypass.
        let whitelisted = drivers.whitelist.contains(&question.name).await.unwrap_or(false);

        let primary = if config.enable_whitelist_mode {
            if whitelisted {
                config.next_dns_provider
            } else {
                config.secondary_dns
            }
        } else {
            config.next_dns_provider
        };

        let blacklisted = !whitelisted
            && drivers.blacklist.contains(&question.name).await.unwrap_or(false);

        if blacklisted {
            let response = synthesize_blocked(request, question);
            self.emit_response(&drivers, question, "blocked", false, None, started);
            return response;
        }

        let fingerprint = cache::fingerprint(&question.name, question.qtype, question.qclass);

        if let Ok(Some(cached)) = drivers.cache.get(&fingerprint).await {
            let remaining = cached.remaining_ttl(now_millis());
            let mut response = DnsPacket::new(Header::response_from(&request.header));
            response.questions = request.questions.clone();
            response.answers = cached
                .packet
                .answers
                .iter()
                .cloned()
                .map(|record| record.with_ttl(remaining))
                .collect();
            self.emit_response(&drivers, question, "NOERROR", true, None, started);
            return response;
        }

        match self.dispatcher.dispatch_preferring(query, Some(primary)).await {
            Ok((provider, bytes)) => {
                let upstream = match DnsPacket::try_from(bytes.as_slice()) {
                    Ok(packet) => packet,
                    Err(error) => {
                        drivers
                            .logs
                            .append(LogEntry::error(format!("undecodable upstream response: {error}")))
                            .await
                            .ok();
                        let response = synthesize_servfail(request);
                        self.emit_response(&drivers, question, "SERVFAIL", false, Some(provider), started);
                        return response;
                    }
                };

                if let Some(ttl) = cache::cacheable_ttl(&upstream) {
                    let provenance = Provenance {
                        provider: Some(provider.to_string()),
                        upstream_latency_ms: Some(started.elapsed().as_millis() as u64),
                    };
                    if let Err(error) = drivers
                        .cache
                        .set(fingerprint, upstream.clone(), ttl, provenance)
                        .await
                    {
                        tracing::warn!(%error, "failed to persist cache entry");
                    }
                }

                let mut response = DnsPacket::new(Header::response_from(&request.header));
                response.questions = request.questions.clone();
                response.answers = upstream.answers.clone();
                response.header.response_code = upstream.header.response_code;
                response.header.truncated_message = upstream.header.truncated_message;

                let rcode = format!("{:?}", upstream.header.response_code);
                self.emit_response(&drivers, question, &rcode, false, Some(provider), started);
                response
            }
            Err(failure) => {
                for (provider, error) in &failure.errors {
                    drivers
                        .logs
                        .append(LogEntry::error(format!("{provider} failed: {error:?}")))
                        .await
                        .ok();
                }
                let response = synthesize_servfail(request);
                self.emit_response(&drivers, question, "SERVFAIL", false, None, started);
                response
            }
        }
    }

    fn emit_response(
        &self,
        drivers: &Drivers,
        question: &shieldns_wire::packet::Question,
        rcode: &str,
        from_cache: bool,
        provider: Option<&'static str>,
        started: Instant,
    ) {
        let latency_ms = started.elapsed().as_millis() as u64;
        let entry = LogEntry::response(
            question.name.clone(),
            rcode.to_string(),
            from_cache,
            provider.map(str::to_string),
            latency_ms,
        );
        self.events.publish(Event::Log(entry.clone()));

        let drivers = drivers.logs.clone();
        tokio::spawn(async move {
            drivers.append(entry).await.ok();
        });
    }
}

#[async_trait::async_trait]
impl Handler for Resolver {
    async fn handle(&self, query: &[u8], client: Option<SocketAddr>) -> Vec<u8> {
        let request = match DnsPacket::try_from(query) {
            Ok(packet) => packet,
            Err(error) => {
                tracing::debug!(%error, "unable to parse query");
                let drivers = self.drivers.read().await.clone();
                drivers
                    .logs
                    .append(LogEntry::error(format!("unable to parse query: {error}")))
                    .await
                    .ok();
                let response = synthesize_formerr_unparseable();
                return response
                    .create_buffer()
                    .map(|buffer| buffer.as_slice().to_vec())
                    .unwrap_or_default();
            }
        };

        let response = self.resolve(client, query, &request).await;
        response
            .create_buffer()
            .map(|buffer| buffer.as_slice().to_vec())
            .unwrap_or_else(|_| {
                synthesize_servfail(&request)
                    .create_buffer()
                    .map(|buffer| buffer.as_slice().to_vec())
                    .unwrap_or_default()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shieldns_upstream::mock::MockProvider;
    use shieldns_upstream::prelude::Provider;
    use shieldns_wire::packet::{DnsClass, QueryType, Question, Record};
    use std::net::Ipv4Addr;

    fn make_query(name: &str, qtype: QueryType) -> Vec<u8> {
        let mut packet = DnsPacket::new(Header::question(7));
        packet.questions.push(Question::new(name.into(), qtype));
        packet.create_buffer().unwrap().as_slice().to_vec()
    }

    fn answer_bytes(name: &str, addr: Ipv4Addr) -> Vec<u8> {
        let mut packet = DnsPacket::new(Header::response_from(&Header::question(7)));
        packet.questions.push(Question::new(name.into(), QueryType::A));
        packet.answers.push(Record::A {
            domain: name.into(),
            addr,
            ttl: 120,
        });
        packet.create_buffer().unwrap().as_slice().to_vec()
    }

    fn resolver_with(provider: MockProvider) -> Resolver {
        let dispatcher = Arc::new(Dispatcher::new(vec![Arc::new(provider) as Arc<dyn Provider>]));
        Resolver::new(Drivers::in_memory(), dispatcher, Arc::new(EventBus::default()))
    }

    #[tokio::test]
    async fn should_resolve_and_populate_cache() {
        let resolver = resolver_with(MockProvider::succeeding(
            "nextdns",
            answer_bytes("example.com", Ipv4Addr::new(1, 2, 3, 4)),
        ));
        let query = make_query("example.com", QueryType::A);

        let reply = resolver.handle(&query, None).await;
        let packet = DnsPacket::try_from(reply.as_slice()).unwrap();
        assert_eq!(packet.header.id, 7);
        assert!(packet.header.response);
        assert_eq!(packet.answers.len(), 1);

        let fingerprint = cache::fingerprint("example.com", QueryType::A, DnsClass::Internet);
        let cached = resolver.drivers.read().await.cache.get(&fingerprint).await.unwrap();
        assert!(cached.is_some());
    }

    #[tokio::test]
    async fn should_block_blacklisted_domain_without_hitting_upstream() {
        let resolver = resolver_with(MockProvider::failing("nextdns"));
        resolver
            .drivers
            .read()
            .await
            .blacklist
            .add("ads.example", crate::store::list::Source::Manual, None, None)
            .await
            .unwrap();

        let query = make_query("ads.example", QueryType::A);
        let reply = resolver.handle(&query, None).await;
        let packet = DnsPacket::try_from(reply.as_slice()).unwrap();
        assert_eq!(packet.answers.len(), 1);
        assert!(matches!(packet.answers[0], Record::A { addr, .. } if addr == Ipv4Addr::UNSPECIFIED));
    }

    #[tokio::test]
    async fn should_reply_formerr_on_question_less_packet() {
        let resolver = resolver_with(MockProvider::failing("nextdns"));
        let packet = DnsPacket::new(Header::question(9));
        let query = packet.create_buffer().unwrap().as_slice().to_vec();

        let reply = resolver.handle(&query, None).await;
        let result = DnsPacket::try_from(reply.as_slice()).unwrap();
        assert_eq!(result.header.response_code, ResponseCode::FormatError);
        assert_eq!(result.header.id, 9);
    }

    #[tokio::test]
    async fn should_servfail_when_all_providers_fail() {
        let resolver = resolver_with(MockProvider::failing("nextdns"));
        let query = make_query("example.com", QueryType::A);
        let reply = resolver.handle(&query, None).await;
        let packet = DnsPacket::try_from(reply.as_slice()).unwrap();
        assert_eq!(packet.header.response_code, ResponseCode::ServerFailure);
    }

    #[tokio::test]
    async fn should_answer_formerr_for_unparseable_bytes() {
        let resolver = resolver_with(MockProvider::failing("nextdns"));
        let reply = resolver.handle(b"short", None).await;
        let packet = DnsPacket::try_from(reply.as_slice()).unwrap();
        assert_eq!(packet.header.response_code, ResponseCode::FormatError);
    }
}

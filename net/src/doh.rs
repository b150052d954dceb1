//! RFC 8484 DNS-over-HTTPS ingress, mounted on `/` alongside whatever
//! non-DoH surface a caller puts on the same port: a request is routed to
//! DoH handling iff it carries a `dns` query parameter or a `Content-Type`/
//! `Accept` containing `application/dns-message`; anything else 405s, since
//! this router has no fallback surface of its own to hand unmatched
//! requests to.

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::any,
    Router,
};
use base64::Engine;
use shieldns_wire::DnsPacket;
use std::sync::Arc;

use crate::Handler;

const DNS_MESSAGE_CONTENT_TYPE: &str = "application/dns-message";

#[derive(serde::Deserialize)]
pub struct GetQuery {
    dns: Option<String>,
}

pub fn router<H: Handler + 'static>(handler: Arc<H>) -> Router {
    Router::new().route("/", any(handle::<H>)).with_state(handler)
}

fn header_contains(headers: &HeaderMap, name: header::HeaderName, needle: &str) -> bool {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains(needle))
}

async fn handle<H: Handler + 'static>(
    State(handler): State<Arc<H>>,
    method: Method,
    headers: HeaderMap,
    Query(params): Query<GetQuery>,
    body: axum::body::Bytes,
) -> axum::response::Response {
    let is_doh_request = params.dns.is_some()
        || header_contains(&headers, header::CONTENT_TYPE, DNS_MESSAGE_CONTENT_TYPE)
        || header_contains(&headers, header::ACCEPT, DNS_MESSAGE_CONTENT_TYPE);
    if !is_doh_request {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    match method {
        Method::GET => {
            let Some(encoded) = params.dns else {
                return StatusCode::BAD_REQUEST.into_response();
            };
            let Ok(query) = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(encoded) else {
                return StatusCode::BAD_REQUEST.into_response();
            };
            respond(handler, query).await
        }
        Method::POST => {
            if !header_contains(&headers, header::CONTENT_TYPE, DNS_MESSAGE_CONTENT_TYPE) || body.is_empty() {
                return StatusCode::BAD_REQUEST.into_response();
            }
            respond(handler, body.to_vec()).await
        }
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

async fn respond<H: Handler + 'static>(
    handler: Arc<H>,
    query: Vec<u8>,
) -> axum::response::Response {
    let reply = handler.handle(&query, None).await;
    let max_age = min_ttl(&reply).unwrap_or(0);

    let mut response = reply.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(DNS_MESSAGE_CONTENT_TYPE),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_str(&format!("max-age={max_age}")).expect("integer is valid header"),
    );
    response
}

fn min_ttl(reply: &[u8]) -> Option<u32> {
    let packet = DnsPacket::try_from(reply).ok()?;
    packet.answers.iter().map(|record| record.ttl()).min()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use shieldns_wire::{Header, QueryType, Question};
    use tower::ServiceExt;

    struct EchoHandler;

    #[async_trait::async_trait]
    impl Handler for EchoHandler {
        async fn handle(&self, _query: &[u8], _client: Option<std::net::SocketAddr>) -> Vec<u8> {
            let mut packet = DnsPacket::new(Header::question(42));
            packet
                .questions
                .push(Question::new("example.com".into(), QueryType::A));
            packet.create_buffer().unwrap().as_slice().to_vec()
        }
    }

    #[tokio::test]
    async fn should_answer_post_with_dns_message_content_type() {
        let app = router(Arc::new(EchoHandler));
        let request = Request::builder()
            .method("POST")
            .uri("/")
            .header(header::CONTENT_TYPE, DNS_MESSAGE_CONTENT_TYPE)
            .body(axum::body::Body::from(vec![0u8; 12]))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            DNS_MESSAGE_CONTENT_TYPE
        );
    }

    #[tokio::test]
    async fn should_reject_post_without_dns_message_content_type() {
        let app = router(Arc::new(EchoHandler));
        let request = Request::builder()
            .method("POST")
            .uri("/")
            .body(axum::body::Body::from(vec![0u8; 12]))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn should_reject_get_without_dns_param_but_doh_accept_header() {
        let app = router(Arc::new(EchoHandler));
        let request = Request::builder()
            .method("GET")
            .uri("/")
            .header(header::ACCEPT, DNS_MESSAGE_CONTENT_TYPE)
            .body(axum::body::Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn should_answer_get_with_dns_query_param() {
        let mut packet = DnsPacket::new(Header::question(7));
        packet
            .questions
            .push(Question::new("example.org".into(), QueryType::A));
        let encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(packet.create_buffer().unwrap().as_slice());

        let app = router(Arc::new(EchoHandler));
        let request = Request::builder()
            .method("GET")
            .uri(format!("/?dns={encoded}"))
            .header(header::ACCEPT, DNS_MESSAGE_CONTENT_TYPE)
            .body(axum::body::Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn should_reject_non_doh_request_with_405() {
        let app = router(Arc::new(EchoHandler));
        let request = Request::builder()
            .method("GET")
            .uri("/")
            .body(axum::body::Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}

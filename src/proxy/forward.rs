//! Relays an admitted request to its resolved target

use crate::middleware::Target;
use crate::proxy::core::{OutboundRequest, ProxyError, ProxyRequest, ProxyResponse, RequestContext, Transport};
use crate::utils::{
    forwarded_proto, log_forwarding_request, log_upstream_failure, log_upstream_success,
    remove_hop_by_hop_headers, set_header, strip_headers, INBOUND_STRIPPED_HEADERS,
    OUTBOUND_STRIPPED_HEADERS, X_FORWARDED_FOR, X_FORWARDED_PROTO,
};
use bytes::{Bytes, BytesMut};
use hyper::body::HttpBody;
use hyper::header::{CONTENT_LENGTH, HOST};
use hyper::{Body, HeaderMap};
use std::sync::Arc;
use std::time::Instant;

/// Builds the outbound request, dispatches it and sanitizes the reply.
///
/// The upstream path and query come only from the target, never from the
/// inbound request line. Status and body are relayed unchanged.
#[derive(Clone)]
pub struct ForwardingProxy {
    transport: Arc<dyn Transport>,
    max_body_size: usize,
    trust_proxy: bool,
}

impl ForwardingProxy {
    pub fn new(transport: Arc<dyn Transport>, max_body_size: usize, trust_proxy: bool) -> Self {
        Self {
            transport,
            max_body_size,
            trust_proxy,
        }
    }

    pub async fn forward(
        &self,
        request: ProxyRequest,
        target: &Target,
        ctx: &RequestContext,
    ) -> Result<ProxyResponse, ProxyError> {
        let ProxyRequest {
            method,
            headers,
            body,
            ..
        } = request;

        let proto = forwarded_proto(&headers, self.trust_proxy);
        let headers = self.outbound_headers(headers, &ctx.client_ip.to_string(), &proto);
        let body = read_body(body, self.max_body_size).await?;

        log_forwarding_request(&method, &target.hostname, headers.len(), body.len());

        let outbound = OutboundRequest {
            method: method.clone(),
            url: target.outbound_url(),
            headers,
            body,
        };

        let started = Instant::now();
        let upstream = match self.transport.send(outbound).await {
            Ok(upstream) => upstream,
            Err(err) => {
                log_upstream_failure(&method, &target.hostname, started.elapsed(), &err);
                return Err(ProxyError::Upstream(err));
            }
        };
        log_upstream_success(&method, &target.hostname, upstream.status, started.elapsed());

        let mut headers = upstream.headers;
        remove_hop_by_hop_headers(&mut headers);
        strip_headers(&mut headers, INBOUND_STRIPPED_HEADERS);

        Ok(ProxyResponse {
            status: upstream.status,
            headers,
            body: upstream.body,
        })
    }

    fn outbound_headers(&self, mut headers: HeaderMap, client_ip: &str, proto: &str) -> HeaderMap {
        remove_hop_by_hop_headers(&mut headers);
        // The transport sets Host from the target URL and recomputes the length
        headers.remove(HOST);
        headers.remove(CONTENT_LENGTH);
        strip_headers(&mut headers, OUTBOUND_STRIPPED_HEADERS);

        set_header(&mut headers, X_FORWARDED_FOR, client_ip);
        set_header(&mut headers, X_FORWARDED_PROTO, proto);
        headers
    }
}

/// Buffer the inbound body, refusing anything over `limit` bytes
async fn read_body(mut body: Body, limit: usize) -> Result<Bytes, ProxyError> {
    if body.size_hint().lower() > limit as u64 {
        return Err(ProxyError::PayloadTooLarge);
    }

    let mut buf = BytesMut::new();
    while let Some(chunk) = body.data().await {
        let chunk = chunk.map_err(|e| ProxyError::Internal(format!("failed to read request body: {}", e)))?;
        if buf.len() + chunk.len() > limit {
            return Err(ProxyError::PayloadTooLarge);
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{upstream_response, RecordingTransport};
    use hyper::header::HeaderValue;
    use hyper::{Method, StatusCode};
    use std::net::SocketAddr;

    fn request(headers: &[(&'static str, &'static str)], body: &'static str) -> ProxyRequest {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.append(*name, HeaderValue::from_static(*value));
        }
        ProxyRequest {
            method: Method::POST,
            uri: "/proxy/ignored/path?url=https://api.github.com/repos".parse().unwrap(),
            headers: map,
            body: Body::from(body),
            remote_addr: SocketAddr::from(([203, 0, 113, 9], 51000)),
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::new("203.0.113.9".parse().unwrap(), Instant::now())
    }

    #[tokio::test]
    async fn test_outbound_request_is_sanitized() {
        let transport = Arc::new(RecordingTransport::ok(upstream_response(200, &[], "ok")));
        let proxy = ForwardingProxy::new(transport.clone(), 1024, false);
        let target = Target::parse("https://api.github.com/repos?page=2#top").unwrap();

        let req = request(
            &[
                ("cookie", "session=abc"),
                ("referer", "https://app.local/"),
                ("origin", "https://app.local"),
                ("host", "proxy.local"),
                ("connection", "keep-alive, x-trace"),
                ("x-trace", "1"),
                ("x-forwarded-for", "1.1.1.1"),
                ("authorization", "Bearer t"),
                ("accept", "application/json"),
            ],
            "payload",
        );
        proxy.forward(req, &target, &ctx()).await.unwrap();

        let sent = transport.single_request();
        assert_eq!(sent.url.as_str(), "https://api.github.com/repos?page=2");
        assert_eq!(sent.method, Method::POST);
        assert_eq!(&sent.body[..], b"payload");
        for stripped in ["cookie", "referer", "origin", "host", "connection", "x-trace"] {
            assert!(sent.headers.get(stripped).is_none(), "{} should be stripped", stripped);
        }
        assert_eq!(sent.headers["x-forwarded-for"], "203.0.113.9");
        assert_eq!(sent.headers.get_all("x-forwarded-for").iter().count(), 1);
        assert_eq!(sent.headers["x-forwarded-proto"], "http");
        assert_eq!(sent.headers["accept"], "application/json");
    }

    #[tokio::test]
    async fn test_response_is_sanitized_but_passed_through() {
        let upstream = upstream_response(
            201,
            &[("set-cookie", "a=b"), ("x-powered-by", "Express"), ("etag", "\"v1\""), ("transfer-encoding", "chunked")],
            "{\"id\":1}",
        );
        let transport = Arc::new(RecordingTransport::ok(upstream));
        let proxy = ForwardingProxy::new(transport, 1024, false);
        let target = Target::parse("https://api.github.com/x").unwrap();

        let response = proxy.forward(request(&[], ""), &target, &ctx()).await.unwrap();
        assert_eq!(response.status, StatusCode::CREATED);
        assert_eq!(&response.body[..], b"{\"id\":1}");
        assert_eq!(response.headers["etag"], "\"v1\"");
        assert!(response.headers.get("set-cookie").is_none());
        assert!(response.headers.get("x-powered-by").is_none());
        assert!(response.headers.get("transfer-encoding").is_none());
    }

    #[tokio::test]
    async fn test_transport_failure_is_upstream_error() {
        let transport = Arc::new(RecordingTransport::failing());
        let proxy = ForwardingProxy::new(transport, 1024, false);
        let target = Target::parse("https://api.github.com/x").unwrap();

        let err = proxy.forward(request(&[], ""), &target, &ctx()).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.message(), "Proxy error: upstream request failed");
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected_before_dispatch() {
        let transport = Arc::new(RecordingTransport::ok(upstream_response(200, &[], "")));
        let proxy = ForwardingProxy::new(transport.clone(), 4, false);
        let target = Target::parse("https://api.github.com/x").unwrap();

        let err = proxy.forward(request(&[], "too long"), &target, &ctx()).await.unwrap_err();
        assert!(matches!(err, ProxyError::PayloadTooLarge));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_trusted_forwarded_proto() {
        let transport = Arc::new(RecordingTransport::ok(upstream_response(200, &[], "")));
        let proxy = ForwardingProxy::new(transport.clone(), 1024, true);
        let target = Target::parse("https://api.github.com/x").unwrap();

        proxy
            .forward(request(&[("x-forwarded-proto", "https")], ""), &target, &ctx())
            .await
            .unwrap();
        assert_eq!(transport.single_request().headers["x-forwarded-proto"], "https");
    }
}

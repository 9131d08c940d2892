//! Catch-all handler: forwards anything under a configured mount to its
//! upstream and relays the reply.

use axum::{
    body::{Body, HttpBody},
    extract::{Request, State},
    http::{header, request::Parts, HeaderMap, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use reqwest::Url;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::app::ProxyState;

/// Connection-scoped headers. They describe one hop and are never relayed.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Header names are stored lowercase, so one prefix check covers every
/// `Proxy-*` header.
fn is_hop_by_hop(name: &HeaderName) -> bool {
    let name = name.as_str();
    HOP_BY_HOP.contains(&name) || name.starts_with("proxy-")
}

pub async fn forward_handler(State(state): State<Arc<ProxyState>>, req: Request) -> Response {
    let (parts, body) = req.into_parts();
    let path = parts.uri.path();

    let Some((route, rest)) = state.routes.find(path) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("no proxy route for {path}") })),
        )
            .into_response();
    };

    let target = route.target_url(rest, parts.uri.query());
    let request_url = request_url(&parts);
    info!(
        request_url = %request_url,
        target_url = %target,
        proxy_key = %route.key,
        method = %parts.method,
        "forwarding request"
    );

    // inbound Host names the proxy; the upstream gets its own
    let mut headers = upstream_headers(&parts.headers);
    if let Some(host) = route.host_header() {
        headers.insert(header::HOST, host);
    }

    let mut upstream = state
        .client
        .request(parts.method.clone(), target.clone())
        .headers(headers);
    if !body.is_end_stream() {
        upstream = upstream.body(reqwest::Body::wrap_stream(body.into_data_stream()));
    }

    match upstream.send().await {
        Ok(resp) => relay(resp),
        Err(e) => {
            warn!(
                proxy_key = %route.key,
                target_url = %target,
                error = %e,
                "upstream request failed"
            );
            failure(&e, &request_url, &target, &route.key)
        }
    }
}

/// Everything the client sent except `Host` and hop-by-hop headers.
fn upstream_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(inbound.len());
    for (name, value) in inbound {
        if *name != header::HOST && !is_hop_by_hop(name) {
            headers.append(name.clone(), value.clone());
        }
    }
    headers
}

/// The URL as the client addressed it.
fn request_url(parts: &Parts) -> String {
    let host = parts
        .headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost");
    format!("http://{host}{}", parts.uri)
}

/// Upstream status, headers and a streamed body.
fn relay(resp: reqwest::Response) -> Response {
    let status = resp.status();
    let mut headers = HeaderMap::with_capacity(resp.headers().len());
    for (name, value) in resp.headers() {
        if !is_hop_by_hop(name) {
            headers.append(name.clone(), value.clone());
        }
    }

    let mut out = Response::new(Body::from_stream(resp.bytes_stream()));
    *out.status_mut() = status;
    *out.headers_mut() = headers;
    out
}

fn failure(err: &reqwest::Error, request_url: &str, target: &Url, proxy_key: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": err.to_string(),
            "details": {
                "requestUrl": request_url,
                "targetUrl": target.as_str(),
                "proxyKey": proxy_key,
                "message": "failed to proxy",
            }
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn drops_host_and_hop_by_hop_only() {
        let mut inbound = HeaderMap::new();
        inbound.insert(header::HOST, HeaderValue::from_static("localhost:8787"));
        inbound.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        inbound.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        inbound.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer k"));
        inbound.insert(header::PROXY_AUTHORIZATION, HeaderValue::from_static("Basic p"));
        inbound.insert("proxy-connection", HeaderValue::from_static("keep-alive"));
        inbound.insert("x-proxy-hint", HeaderValue::from_static("kept"));
        inbound.append("x-multi", HeaderValue::from_static("a"));
        inbound.append("x-multi", HeaderValue::from_static("b"));

        let out = upstream_headers(&inbound);
        assert!(out.get(header::HOST).is_none());
        assert!(out.get(header::CONNECTION).is_none());
        assert!(out.get(header::TRANSFER_ENCODING).is_none());
        assert!(out.get(header::PROXY_AUTHORIZATION).is_none());
        assert!(out.get("proxy-connection").is_none());
        assert_eq!(out[header::AUTHORIZATION], "Bearer k");
        assert_eq!(out["x-proxy-hint"], "kept");
        assert_eq!(out.get_all("x-multi").iter().count(), 2);
    }

    #[test]
    fn request_url_uses_inbound_host() {
        let (parts, _) = axum::http::Request::get("/mia_proxy/openai/v1/models?x=1")
            .header(header::HOST, "127.0.0.1:8787")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(request_url(&parts), "http://127.0.0.1:8787/mia_proxy/openai/v1/models?x=1");
    }
}

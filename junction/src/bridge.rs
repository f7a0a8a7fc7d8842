//! Bridges a raw monoio TCP connection to the [`Engine`]: decode HTTP/1.1
//! requests, translate them into a [`junction_router::Request`], drive
//! `handle_routing`, and encode whatever [`Outcome`] it produced back onto
//! the wire. Grounded on monolake's `HttpCoreService::h1_svc` decode/encode
//! loop, stripped of its certain-map context forking and HTTP/2 path since
//! this binary only needs to demonstrate the embedding contract.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use http::{Response, StatusCode};
use monoio::io::{sink::SinkExt, stream::Stream, Splitable};
use monoio::net::TcpStream;
use monoio_http::common::body::HttpBody;
use monoio_http::h1::codec::decoder::{FillPayload, RequestDecoder};
use monoio_http::h1::codec::encoder::GenericEncoder;
use std::sync::Arc;

use junction_core::AnyError;
use junction_router::request::{ingest_body, normalize_and_reduce, should_ingest_body, Outcome};
use junction_router::{Engine, Request as RoutingRequest};

pub async fn serve_connection(stream: TcpStream, peer: SocketAddr, engine: Arc<Engine>) -> Result<(), AnyError> {
    let (reader, writer) = stream.into_split();
    let mut decoder = RequestDecoder::new(reader);
    let mut encoder = GenericEncoder::new(writer);

    loop {
        let decoded = decoder.next().await;
        let inbound = match decoded {
            Some(Ok(req)) => req,
            Some(Err(_)) => break,
            None => break,
        };

        let _ = decoder.fill_payload().await;
        let (parts, body) = inbound.into_parts();
        let body_bytes = body.bytes().await.unwrap_or_default();

        let mut routing_req = match to_routing_request(&parts, peer, &body_bytes) {
            Ok(r) => r,
            Err(_) => {
                let resp = simple_response(StatusCode::BAD_REQUEST, "bad request");
                encoder.send_and_flush(resp).await?;
                break;
            }
        };

        engine.handle_routing(&mut routing_req).await?;

        let (response, keep_going) = to_http_response(&routing_req);
        encoder.send_and_flush(response).await?;
        if !keep_going {
            break;
        }
    }

    Ok(())
}

fn to_routing_request(
    parts: &http::request::Parts,
    peer: SocketAddr,
    body: &Bytes,
) -> Result<RoutingRequest, AnyError> {
    let uri = &parts.uri;
    let hostname = parts
        .headers
        .get(http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| uri.host())
        .unwrap_or("")
        .to_string();
    let (hostname, port) = junction_core::util::split_host_port(&hostname, peer.port());

    // The engine owns the collapse-or-redirect decision for double slashes
    // (spec.md §4.8); only percent-decoding happens here.
    let path = normalize_and_reduce(uri.path(), false)?;
    let raw_query = uri.query().unwrap_or("").to_string();

    let mut query = HashMap::new();
    if let Some(q) = uri.query() {
        for pair in q.split('&') {
            if let Some((k, v)) = pair.split_once('=') {
                query.insert(k.to_string(), v.to_string());
            } else if !pair.is_empty() {
                query.insert(pair.to_string(), String::new());
            }
        }
    }

    let mut routing_req = RoutingRequest::new(parts.method.as_str(), hostname, "http", port, path);
    routing_req.query = query;
    routing_req.raw_query = raw_query;
    routing_req.remote_addr = peer.ip().to_string();
    for (name, value) in &parts.headers {
        if let Ok(v) = value.to_str() {
            routing_req.headers.insert(name.as_str().to_ascii_lowercase(), v.to_string());
        }
    }

    if !body.is_empty() && should_ingest_body(&routing_req.method, &routing_req.headers) {
        let content_type = routing_req.headers.get("content-type").cloned();
        routing_req.body = ingest_body(content_type.as_deref(), body)?;
    }

    Ok(routing_req)
}

fn simple_response(status: StatusCode, body: &str) -> Response<HttpBody> {
    Response::builder()
        .status(status)
        .body(HttpBody::fixed_body(Some(Bytes::copy_from_slice(body.as_bytes()))))
        .expect("static response is well-formed")
}

/// Translate the routing outcome into a wire response. Returns whether the
/// connection should keep serving further requests.
fn to_http_response(req: &RoutingRequest) -> (Response<HttpBody>, bool) {
    match req.outcome() {
        Some(Outcome::Sent { status, headers, body }) => {
            let mut builder = Response::builder().status(*status);
            for (k, v) in headers {
                builder = builder.header(k.as_str(), v.as_str());
            }
            let resp = builder
                .body(HttpBody::fixed_body(Some(body.clone())))
                .unwrap_or_else(|_| simple_response(StatusCode::INTERNAL_SERVER_ERROR, "encode error"));
            (resp, true)
        }
        Some(Outcome::Redirect { status, location, headers }) => {
            let mut builder = Response::builder().status(*status).header(http::header::LOCATION, location.as_str());
            for (k, v) in headers {
                builder = builder.header(k.as_str(), v.as_str());
            }
            let resp = builder
                .body(HttpBody::fixed_body(Some(Bytes::new())))
                .unwrap_or_else(|_| simple_response(StatusCode::INTERNAL_SERVER_ERROR, "encode error"));
            (resp, true)
        }
        Some(Outcome::Error(e)) => {
            let status = StatusCode::from_u16(e.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (simple_response(status, &e.message), status != StatusCode::BAD_REQUEST)
        }
        Some(Outcome::Rewritten { .. }) | None => {
            (simple_response(StatusCode::INTERNAL_SERVER_ERROR, "routing loop ended without a response"), false)
        }
    }
}

//! Request/response middleware: access log, trusted subnet, body unsealing
//! (integrity check, gunzip, decryption) and response signing.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::{Body, Bytes, to_bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue, Method, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{debug, info};

use metrix_core::security::{self, IntegrityError};
use metrix_core::{HASH_HEADER, REAL_IP_HEADER};

use crate::error::ApiError;
use crate::state::Security;

/// Largest request or response body buffered for hashing.
const MAX_BODY: usize = 16 * 1024 * 1024;

/// `HashSHA256` in the normalized form `HeaderMap` stores.
pub(crate) const HASH_HEADER_NAME: HeaderName = HeaderName::from_static("hashsha256");

// ============================================================
// Access log
// ============================================================

#[derive(Clone)]
pub(crate) struct AccessLogLayer;

impl<S> tower::Layer<S> for AccessLogLayer {
    type Service = AccessLogService<S>;
    fn layer(&self, inner: S) -> Self::Service {
        AccessLogService { inner }
    }
}

#[derive(Clone)]
pub(crate) struct AccessLogService<S> {
    inner: S,
}

impl<S> tower::Service<Request> for AccessLogService<S>
where
    S: tower::Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let method = req.method().clone();
        let path = req.uri().path().to_owned();
        let client = req
            .extensions()
            .get::<axum::extract::ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip().to_string())
            .unwrap_or_else(|| "-".to_owned());
        let t0 = Instant::now();

        let mut inner = self.inner.clone();
        Box::pin(async move {
            let response = inner.call(req).await?;
            let latency_ms = t0.elapsed().as_millis() as u64;
            let status = response.status().as_u16();
            info!(client, status, latency_ms, "{method} {path}");
            Ok(response)
        })
    }
}

// ============================================================
// Trusted subnet
// ============================================================

pub(crate) async fn trusted_subnet(
    State(security): State<Arc<Security>>,
    req: Request,
    next: Next,
) -> Response {
    let real_ip = req
        .headers()
        .get(REAL_IP_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    if security.admits(real_ip.as_deref()) == Some(false) {
        return ApiError::Forbidden(real_ip.unwrap_or_else(|| "no X-Real-IP".to_owned()))
            .into_response();
    }
    next.run(req).await
}

// ============================================================
// Request unsealing
// ============================================================

/// Reverses the agent's send path on POST bodies: verify the tag over the
/// raw bytes, then gunzip, then decrypt.
pub(crate) async fn unseal_request(
    State(security): State<Arc<Security>>,
    req: Request,
    next: Next,
) -> Response {
    if req.method() != Method::POST {
        return next.run(req).await;
    }
    match unseal(&security, req).await {
        Ok(req) => next.run(req).await,
        Err(e) => e.into_response(),
    }
}

async fn unseal(security: &Security, req: Request) -> Result<Request, ApiError> {
    let (mut parts, body) = req.into_parts();
    let raw = to_bytes(body, MAX_BODY)
        .await
        .map_err(|e| ApiError::BadRequest(format!("cannot read body: {e}")))?;

    if let Some(signer) = &security.signer {
        let tag = parts
            .headers
            .get(HASH_HEADER)
            .map(|v| v.to_str().map_err(|_| IntegrityError::Malformed))
            .transpose()?;
        signer.verify(&raw, tag)?;
    }

    let gzipped = parts
        .headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("gzip"));
    let mut body = if gzipped {
        parts.headers.remove(header::CONTENT_ENCODING);
        Bytes::from(security::gunzip(&raw)?)
    } else {
        raw
    };

    if let Some(decryptor) = &security.decryptor
        && !body.is_empty()
    {
        body = Bytes::from(decryptor.decrypt(&body)?);
    }

    parts.headers.remove(header::CONTENT_LENGTH);
    debug!(bytes = body.len(), gzipped, "request body unsealed");
    Ok(Request::from_parts(parts, Body::from(body)))
}

// ============================================================
// Response signing
// ============================================================

pub(crate) async fn sign_response(
    State(security): State<Arc<Security>>,
    req: Request,
    next: Next,
) -> Response {
    let response = next.run(req).await;
    let Some(signer) = &security.signer else {
        return response;
    };

    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, MAX_BODY).await {
        Ok(b) => b,
        Err(e) => return ApiError::Internal(format!("cannot buffer response: {e}")).into_response(),
    };
    match signer.sign(&bytes) {
        Ok(tag) => {
            if let Ok(value) = HeaderValue::from_str(&tag) {
                parts.headers.insert(HASH_HEADER_NAME, value);
            }
        }
        Err(e) => return ApiError::from(e).into_response(),
    }
    Response::from_parts(parts, Body::from(bytes))
}

//! # Request Signing
//!
//! Every agent call carries a shared token (`X-Token`) and an HMAC-SHA256
//! signature (`X-Signature`, lowercase hex) over
//! `method + "\n" + path + "\n" + body`. The path is the route path without
//! query string. The receiver recomputes the signature over what it received
//! and compares both values in constant time.

use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::config::{AgentConfig, AppConfig};
use crate::error::{ApiError, forbidden, validation_error};

type HmacSha256 = Hmac<Sha256>;

pub const TOKEN_HEADER: &str = "x-token";
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Reasons an agent request is rejected. Callers only ever see a generic
/// forbidden response; the variant is logged.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("remote agent is disabled")]
    Disabled,
    #[error("source address is not allowed")]
    IpNotAllowed,
    #[error("missing authentication headers")]
    MissingCredentials,
    #[error("token mismatch")]
    TokenMismatch,
    #[error("signature mismatch")]
    SignatureMismatch,
}

/// Hex HMAC-SHA256 of `method\npath\nbody` under `secret`.
pub fn sign(secret: &str, method: &str, path: &str, body: &[u8]) -> String {
    hex::encode(compute(secret, method, path, body))
}

fn compute(secret: &str, method: &str, path: &str, body: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length, so this never fails.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return Vec::new(),
    };
    mac.update(method.to_ascii_uppercase().as_bytes());
    mac.update(b"\n");
    mac.update(path.as_bytes());
    mac.update(b"\n");
    mac.update(body);
    mac.finalize().into_bytes().to_vec()
}

/// Check a hex signature in constant time.
pub fn verify_signature(
    secret: &str,
    method: &str,
    path: &str,
    body: &[u8],
    signature_hex: &str,
) -> Result<(), AuthError> {
    let provided =
        hex::decode(signature_hex.trim()).map_err(|_| AuthError::SignatureMismatch)?;
    let expected = compute(secret, method, path, body);
    if !expected.is_empty() && bool::from(expected.ct_eq(&provided)) {
        Ok(())
    } else {
        Err(AuthError::SignatureMismatch)
    }
}

/// Run every agent check in order: enabled, allowlist, token, signature.
pub fn authorize(
    agent: &AgentConfig,
    source_ip: Option<IpAddr>,
    method: &str,
    path: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(), AuthError> {
    if !agent.enabled {
        return Err(AuthError::Disabled);
    }
    let (Some(expected_token), Some(secret)) = (
        agent.token.as_deref().filter(|t| !t.is_empty()),
        agent.hmac_secret.as_deref().filter(|s| !s.is_empty()),
    ) else {
        return Err(AuthError::Disabled);
    };

    if !agent.ip_allowlist.is_empty() {
        let allowed = source_ip.is_some_and(|ip| {
            agent
                .ip_allowlist
                .iter()
                .any(|entry| *entry == ip || *entry == ip.to_canonical())
        });
        if !allowed {
            return Err(AuthError::IpNotAllowed);
        }
    }

    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let (Some(token), Some(signature)) = (header(TOKEN_HEADER), header(SIGNATURE_HEADER)) else {
        return Err(AuthError::MissingCredentials);
    };

    if !bool::from(token.as_bytes().ct_eq(expected_token.as_bytes())) {
        return Err(AuthError::TokenMismatch);
    }

    verify_signature(secret, method, path, body, signature)
}

/// Middleware guarding the agent routes.
///
/// Buffers the body (bounded by the configured cap), authorizes the request
/// and hands the rebuilt request on. Every failure yields the same 403.
pub async fn agent_auth_middleware(
    State(config): State<Arc<AppConfig>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let source_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let method = request.method().as_str().to_string();
    let path = request.uri().path().to_string();

    let (parts, body) = request.into_parts();
    let body_bytes = axum::body::to_bytes(body, config.max_body_bytes())
        .await
        .map_err(|err| {
            warn!(error = %err, path = %path, "Failed to read agent request body");
            validation_error("Request body could not be read or exceeds the size limit")
        })?;

    match authorize(
        &config.agent,
        source_ip,
        &method,
        &path,
        &parts.headers,
        &body_bytes,
    ) {
        Ok(()) => {
            debug!(method = %method, path = %path, body_size = body_bytes.len(), "Agent request authorized");
            let request = Request::from_parts(parts, axum::body::Body::from(body_bytes));
            Ok(next.run(request).await)
        }
        Err(reason) => {
            warn!(
                method = %method,
                path = %path,
                source_ip = ?source_ip,
                reason = %reason,
                "Rejected agent request"
            );
            metrics::counter!("sitesync_agent_rejections_total").increment(1);
            Err(forbidden())
        }
    }
}

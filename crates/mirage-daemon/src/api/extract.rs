//! Request field extraction
//!
//! Scanners present tokens in every shape imaginable, so extraction is
//! deliberately permissive: the standard Authorization header, bare-token
//! headers, several alternate header names, and query parameters all work.

use axum::http::HeaderMap;
use std::collections::BTreeMap;
use std::net::SocketAddr;

/// Alternate header names a token may arrive under.
const TOKEN_HEADERS: [&str; 6] = [
    "X-Auth-Token",
    "X-Token",
    "X-Access-Token",
    "Authentication",
    "Bearer",
    "Token",
];

/// Query parameters a token may arrive under.
const TOKEN_QUERY_KEYS: [&str; 2] = ["token", "access_token"];

/// Best-guess client IP: forwarded headers first, socket address last.
pub fn client_ip(headers: &HeaderMap, addr: &SocketAddr) -> String {
    if let Some(forwarded) = header_str(headers, "x-forwarded-for") {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    if let Some(real_ip) = header_str(headers, "x-real-ip") {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }

    addr.ip().to_string()
}

/// Pull a bearer-style token from wherever the client put it.
pub fn extract_token(headers: &HeaderMap, query: &[(String, String)]) -> Option<String> {
    if let Some(auth) = header_str(headers, "authorization") {
        if let Some(token) = auth.strip_prefix("Bearer ") {
            return Some(token.to_string());
        }
        if auth.split_whitespace().count() == 1 {
            return Some(auth.trim().to_string());
        }
    }

    for name in TOKEN_HEADERS {
        if let Some(raw) = header_str(headers, name) {
            if let Some(token) = raw.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
            return Some(raw.trim().to_string());
        }
    }

    for key in TOKEN_QUERY_KEYS {
        if let Some((_, value)) = query.iter().find(|(k, _)| k == key) {
            return Some(value.clone());
        }
    }

    None
}

/// Flatten a header map into storable string pairs.
pub fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

//! Request handlers
//!
//! One login route plus a catch-all that feeds every other path into the
//! resolution engine. Path validation failures are answered before the
//! engine is involved: deep paths disappear with an empty response and
//! malformed segments 404 naming the offender.

use crate::api::extract::{client_ip, extract_token, header_map};
use crate::api::state::AppState;
use crate::auth::{LoginRequest, LoginResponse};
use crate::error::{ApiError, ApiResult};
use crate::framing;
use axum::body::Bytes;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, Method, Uri};
use axum::response::Response;
use axum::Json;
use mirage_types::{InboundRequest, PathError, RequestBody};
use std::net::SocketAddr;

/// Honeypot login: capture credentials, maybe hand out a token.
pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let ip = client_ip(&headers, &addr);
    state.login.login(request, &ip).await.map(Json)
}

/// Resolve-or-fabricate for every other path and verb.
pub async fn resolve(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    Query(query): Query<Vec<(String, String)>>,
    headers: HeaderMap,
    raw_body: Bytes,
) -> ApiResult<Response> {
    let is_mutation = method == Method::POST || method == Method::PUT || method == Method::PATCH;

    let body = if is_mutation {
        RequestBody::from_bytes(&raw_body)
    } else {
        None
    };

    let request = InboundRequest::new(
        client_ip(&headers, &addr),
        method.as_str(),
        uri.path(),
        query.clone(),
        body,
        header_map(&headers),
    )
    .map_err(|err| match err {
        PathError::TooManySegments => ApiError::NoContent,
        PathError::InvalidSegment(_) => ApiError::NotFound(err.to_string()),
    })?;

    tracing::debug!(
        method = %request.method,
        path = %request.full_path,
        client_ip = %request.client_ip,
        "resolving request"
    );

    let served = if method == Method::GET {
        state.engine.resolve_get(&request).await?
    } else if is_mutation {
        let authenticated = extract_token(&headers, &query)
            .and_then(|token| state.tokens.verify(&token))
            .is_some();
        state.engine.resolve_mutation(&request, authenticated).await?
    } else if method == Method::DELETE {
        state.engine.resolve_delete(&request).await?
    } else {
        return Err(ApiError::NoContent);
    };

    Ok(framing::frame(
        served.body.as_ref(),
        served.status,
        &served.headers,
    ))
}

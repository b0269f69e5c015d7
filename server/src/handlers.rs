//! HTTP handlers for the paste API.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use axum_extra::TypedHeader;
use burnbin_common::{CreatePaste, Created, PastePassword, Success};
use tracing::{instrument, warn};

use crate::error::PasteError;
use crate::rate_limit::client_id;
use crate::AppState;

#[instrument(skip_all)]
pub async fn create(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(request): Json<CreatePaste>,
) -> Result<(StatusCode, Json<Created>), PasteError> {
    let client = client_id(&headers, peer.map(|ConnectInfo(addr)| addr));
    if !state.limiter.admit(&client).await {
        warn!(client, "Rejected create over the daily limit");
        return Err(PasteError::RateLimited);
    }

    let slug = state.service.create(request).await?;
    Ok((
        StatusCode::CREATED,
        Json(Created {
            slug: slug.to_string(),
        }),
    ))
}

#[instrument(skip(state, password))]
pub async fn read(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    password: Option<TypedHeader<PastePassword>>,
) -> Result<impl IntoResponse, PasteError> {
    let password = password.map(|TypedHeader(PastePassword(password))| password);
    let entry = state.service.read(&slug, password).await?;

    // Burned or password protected content must not end up in caches.
    Ok((
        [(header::CACHE_CONTROL, "no-store")],
        Json(entry.into_view()),
    ))
}

#[instrument(skip(state))]
pub async fn report(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<Success>, PasteError> {
    state.service.report(&slug).await?;
    Ok(Json(Success::OK))
}

#[instrument(skip(state))]
pub async fn delete(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<Success>, PasteError> {
    if state.service.delete(&slug).await? {
        Ok(Json(Success::OK))
    } else {
        Err(PasteError::NotFound)
    }
}

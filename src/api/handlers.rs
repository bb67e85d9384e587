use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::errors::AppError;
use crate::models::{
    parse_since, Interaction, InteractionTicket, InteractionUpdate, NewInteractionUpdate,
    NewToken, Page, Token,
};
use crate::queue::split_keywords;
use crate::store::Seq;
use crate::tokens::Addressing;
use crate::AppState;

// ── Query parameters ─────────────────────────────────────────
//
// Everything arrives as an optional string so that malformed input
// surfaces as a validation error in the usual JSON shape.

#[derive(Deserialize)]
pub struct IdParams {
    pub id: Option<String>,
}

#[derive(Deserialize)]
pub struct PageParams {
    pub offset: Option<String>,
    pub start_id: Option<String>,
    pub end_id: Option<String>,
    pub count: Option<String>,
    pub newest_first: Option<String>,
}

#[derive(Deserialize)]
pub struct DepositParams {
    pub id: Option<String>,
    pub keywords: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateParams {
    pub id: Option<String>,
    pub queue_position: Option<String>,
    pub token_id: Option<String>,
}

#[derive(Deserialize)]
pub struct WatchParams {
    pub id: Option<String>,
    pub since: Option<String>,
    /// Milliseconds.
    pub timeout: Option<String>,
}

#[derive(Deserialize)]
pub struct SinceParams {
    pub since: Option<String>,
}

fn present(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn require_id(id: Option<String>) -> Result<String, AppError> {
    present(id).ok_or_else(|| AppError::validation("id missing"))
}

fn parse_param<T: FromStr>(value: Option<String>, name: &str) -> Result<Option<T>, AppError> {
    present(value)
        .map(|v| v.parse::<T>())
        .transpose()
        .map_err(|_| AppError::validation(format!("invalid {}", name)))
}

fn parse_flag(value: Option<String>, name: &str, default: bool) -> Result<bool, AppError> {
    match present(value).map(|v| v.to_ascii_lowercase()).as_deref() {
        None => Ok(default),
        Some("true") | Some("1") => Ok(true),
        Some("false") | Some("0") => Ok(false),
        Some(_) => Err(AppError::validation(format!("invalid {}", name))),
    }
}

fn since_param(value: Option<String>) -> Result<Option<DateTime<Utc>>, AppError> {
    present(value)
        .map(|v| parse_since(&v))
        .transpose()
        .map_err(|_| AppError::validation("invalid timestamp"))
}

/// Requested long-poll window, capped at the configured maximum.
fn longpoll_timeout(state: &AppState, value: Option<String>) -> Result<Duration, AppError> {
    let max = state.config.longpoll_timeout();
    Ok(parse_param::<u64>(value, "timeout")?
        .map(|ms| Duration::from_millis(ms).min(max))
        .unwrap_or(max))
}

fn seq(value: Option<String>) -> Seq {
    present(value).map(Seq).unwrap_or_default()
}

// ── Health ───────────────────────────────────────────────────

pub async fn root(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    state.store.ping().await?;
    Ok(Json(json!({
        "service": "tokenq",
        "version": env!("CARGO_PKG_VERSION"),
        "store": "ok",
    })))
}

// ── Tokens ───────────────────────────────────────────────────

pub async fn get_token(
    State(state): State<Arc<AppState>>,
    Query(params): Query<IdParams>,
) -> Result<Json<Token>, AppError> {
    let id = require_id(params.id)?;
    Ok(Json(state.tokens.get_token(&id).await?))
}

pub async fn get_svg(
    State(state): State<Arc<AppState>>,
    Query(params): Query<IdParams>,
) -> Result<impl IntoResponse, AppError> {
    let id = require_id(params.id)?;
    let svg = state.tokens.get_svg(&id).await?;
    Ok(([(header::CONTENT_TYPE, "image/svg+xml")], svg))
}

pub async fn get_tokens(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PageParams>,
) -> Result<Json<Page>, AppError> {
    let addressing = Addressing::from_params(
        parse_param(params.offset, "offset")?,
        present(params.start_id),
        present(params.end_id),
    )?;
    let count = parse_param::<usize>(params.count, "count")?.unwrap_or(1);
    let newest_first = parse_flag(params.newest_first, "newest_first", true)?;

    Ok(Json(
        state
            .tokens
            .get_tokens(&addressing, count, newest_first)
            .await?,
    ))
}

pub async fn put_token(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let token: NewToken = serde_json::from_slice(&body)
        .map_err(|e| AppError::validation(format!("invalid token body: {}", e)))?;
    let id = state.tokens.put_token(token).await?;
    Ok(Json(json!({ "id": id })))
}

// ── Interactions ─────────────────────────────────────────────

pub async fn request_interaction(
    State(state): State<Arc<AppState>>,
) -> Result<Json<InteractionTicket>, AppError> {
    Ok(Json(state.queue.request_interaction().await?))
}

pub async fn deposit_interaction(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DepositParams>,
) -> Result<Json<Value>, AppError> {
    let id = require_id(params.id)?;
    let keywords = present(params.keywords)
        .map(|raw| split_keywords(&raw))
        .ok_or_else(|| AppError::validation("keywords missing"))?;

    state.queue.deposit_interaction(&id, keywords).await?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn update_interaction(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UpdateParams>,
) -> Result<Json<Value>, AppError> {
    let id = require_id(params.id)?;
    let queue_position = parse_param::<i64>(params.queue_position, "queue_position")?;

    state
        .queue
        .update_interaction(&id, queue_position, present(params.token_id))
        .await?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn interaction_updates(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WatchParams>,
) -> Result<Json<InteractionUpdate>, AppError> {
    let id = require_id(params.id)?;
    let timeout = longpoll_timeout(&state, params.timeout)?;
    let since = seq(params.since);

    Ok(Json(
        state
            .queue
            .interaction_updates(&id, &since, timeout)
            .await?,
    ))
}

pub async fn new_interaction_updates(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WatchParams>,
) -> Result<Json<NewInteractionUpdate>, AppError> {
    let timeout = longpoll_timeout(&state, params.timeout)?;
    let since = seq(params.since);

    Ok(Json(
        state
            .queue
            .new_interaction_updates(&since, timeout)
            .await?,
    ))
}

pub async fn waiting_interactions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SinceParams>,
) -> Result<Json<Vec<Interaction>>, AppError> {
    let since = since_param(params.since)?;
    Ok(Json(state.queue.get_waiting_interactions(since).await?))
}

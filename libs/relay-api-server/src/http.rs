use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;

use relay_api::{Change, Envelope, Event, Payload, SubscriptionId, SubscriptionInfo, TopicStatus};

use crate::AppState;
use crate::error::ApiError;

/// `?subscription=&cursor=` of the delivery routes.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct DeliveryParams {
    pub(crate) subscription: Option<u64>,
    pub(crate) cursor: Option<u64>,
}

impl DeliveryParams {
    pub(crate) fn subscription_id(&self) -> Option<SubscriptionId> {
        self.subscription.map(SubscriptionId)
    }
}

// ═══════════════════════════════════════════════════════════════
//  Topics
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_list_topics(State(state): State<AppState>) -> Json<Vec<TopicStatus>> {
    Json(state.dispatcher.topics())
}

pub(crate) async fn handle_topic_status(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<TopicStatus>, ApiError> {
    state
        .dispatcher
        .topic_status(&name)
        .map(Json)
        .ok_or(ApiError::TopicNotFound(name))
}

pub(crate) async fn handle_publish(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Result<Json<Payload>, JsonRejection>,
) -> Result<(StatusCode, Json<Event>), ApiError> {
    let Json(payload) = body?;
    let event = state.dispatcher.publish(&name, Change::new(payload));
    tracing::debug!(topic = %name, sequence = event.sequence, "published over http");
    Ok((StatusCode::CREATED, Json(event)))
}

// ═══════════════════════════════════════════════════════════════
//  Polls
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_short_poll(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<DeliveryParams>,
) -> Json<Envelope> {
    Json(state.dispatcher.short_poll(&name, params.cursor))
}

pub(crate) async fn handle_long_poll(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<DeliveryParams>,
) -> Result<Json<Envelope>, ApiError> {
    let envelope = state
        .dispatcher
        .long_poll(&name, params.subscription_id(), params.cursor)
        .await?;
    Ok(Json(envelope))
}

// ═══════════════════════════════════════════════════════════════
//  Subscriptions
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_subscription(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<SubscriptionInfo>, ApiError> {
    Ok(Json(state.dispatcher.subscription(SubscriptionId(id))?))
}

pub(crate) async fn handle_unsubscribe(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    state.dispatcher.unsubscribe(SubscriptionId(id))?;
    Ok(StatusCode::NO_CONTENT)
}

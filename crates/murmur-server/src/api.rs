//! HTTP API for friends, friend requests, and messages.
//!
//! Credentials are checked upstream; the authenticated caller arrives in
//! the `x-user-id` header. Writes go through the same router as the
//! WebSocket events, so role checks and pushes to connected users match.

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use murmur_core::{RouteError, StoreError};
use murmur_protocol::events::{Decision, SendMessage};
use murmur_protocol::model::{
    DeliveryStatus, FriendEntry, Friendship, FriendshipId, FriendshipStatus, Message, MessageId,
    User, UserId,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::error;

use crate::handlers::AppState;

/// Header carrying the authenticated user ID.
pub const USER_ID_HEADER: &str = "x-user-id";

/// API error type.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Missing or invalid x-user-id header")]
    Unauthorized,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    /// HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Store(e) => match e {
                StoreError::UnknownUser(_) => StatusCode::NOT_FOUND,
                StoreError::SelfRequest(_) => StatusCode::BAD_REQUEST,
                StoreError::DuplicateRequest(..)
                | StoreError::DuplicateUser(_)
                | StoreError::InvalidTransition { .. } => StatusCode::CONFLICT,
                StoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            },
        }
    }

    /// Machine-readable error code.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Conflict(_) => "CONFLICT",
            Self::Store(StoreError::UnknownUser(_)) => "UNKNOWN_USER",
            Self::Store(StoreError::Unavailable(_)) => "STORE_UNAVAILABLE",
            Self::Store(_) => "CONFLICT",
        }
    }
}

impl From<RouteError> for ApiError {
    fn from(err: RouteError) -> Self {
        let message = err.to_string();
        match err {
            RouteError::Store(e) => ApiError::Store(e),
            RouteError::UnknownUsername(_) => ApiError::NotFound("User"),
            RouteError::NotFriends(_) => ApiError::Forbidden(message),
            RouteError::EmptyContent | RouteError::ContentTooLong { .. } => {
                ApiError::BadRequest(message)
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "API request failed");
        }

        let body = ErrorBody {
            error: self.error_code(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser(pub UserId);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok())
            .map(AuthUser)
            .ok_or(ApiError::Unauthorized)
    }
}

/// API routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/friends", get(list_friends))
        .route("/api/friends/request", post(send_friend_request))
        .route(
            "/api/friends/request/:id",
            put(answer_friend_request).delete(cancel_friend_request),
        )
        .route("/api/friends/:id", delete(remove_friend))
        .route("/api/messages", post(send_message))
        .route("/api/messages/:id", get(conversation))
        .route("/api/messages/:id/status", put(update_message_status))
        .route("/api/users/:id", get(get_user))
}

#[derive(Debug, Deserialize)]
struct NewFriendRequest {
    username: String,
}

#[derive(Debug, Deserialize)]
struct RequestAnswer {
    status: Decision,
}

#[derive(Debug, Deserialize)]
struct StatusChange {
    status: DeliveryStatus,
}

async fn list_friends(
    AuthUser(me): AuthUser,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<FriendEntry>>, ApiError> {
    Ok(Json(state.relay.friends(me).await?))
}

async fn send_friend_request(
    AuthUser(me): AuthUser,
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewFriendRequest>,
) -> Result<(StatusCode, Json<Friendship>), ApiError> {
    let request = state
        .relay
        .request_friend_by_name(me, body.username.trim())
        .await?;
    Ok((StatusCode::CREATED, Json(request)))
}

async fn answer_friend_request(
    AuthUser(me): AuthUser,
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<FriendshipId>,
    Json(body): Json<RequestAnswer>,
) -> Result<Json<Friendship>, ApiError> {
    match state
        .relay
        .router()
        .answer_request(me, request_id, body.status)
        .await?
    {
        Some(updated) => Ok(Json(updated)),
        None => Err(refusal(&state, request_id, |r| r.recipient_id == me).await),
    }
}

async fn cancel_friend_request(
    AuthUser(me): AuthUser,
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<FriendshipId>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match state.relay.router().cancel_request(me, request_id).await? {
        Some(_) => Ok(Json(serde_json::json!({ "cancelled": true }))),
        None => Err(refusal(&state, request_id, |r| r.requester_id == me).await),
    }
}

/// Why a friend request could not be changed by a caller the `allowed`
/// check describes.
async fn refusal(
    state: &AppState,
    request_id: FriendshipId,
    allowed: impl Fn(&Friendship) -> bool,
) -> ApiError {
    match state.relay.store().get_friendship(request_id).await {
        Err(e) => e.into(),
        Ok(None) => ApiError::NotFound("Friend request"),
        Ok(Some(request)) if !allowed(&request) => {
            ApiError::Forbidden("Not authorized to change this friend request".to_string())
        }
        Ok(Some(request)) if request.status != FriendshipStatus::Pending => {
            ApiError::Conflict("Friend request is no longer pending".to_string())
        }
        // Changed between the attempt and this lookup
        Ok(Some(_)) => ApiError::Conflict("Friend request changed concurrently".to_string()),
    }
}

async fn remove_friend(
    AuthUser(me): AuthUser,
    State(state): State<Arc<AppState>>,
    Path(friend_id): Path<UserId>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.relay.remove_friend(me, friend_id).await? {
        return Err(ApiError::NotFound("Friendship"));
    }
    Ok(Json(serde_json::json!({ "removed": true })))
}

async fn conversation(
    AuthUser(me): AuthUser,
    State(state): State<Arc<AppState>>,
    Path(friend_id): Path<UserId>,
) -> Result<Json<Vec<Message>>, ApiError> {
    Ok(Json(state.relay.conversation(me, friend_id).await?))
}

async fn send_message(
    AuthUser(me): AuthUser,
    State(state): State<Arc<AppState>>,
    Json(body): Json<SendMessage>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let sent = state
        .relay
        .router()
        .send_message(me, body.receiver_id, body.content)
        .await?;
    Ok((StatusCode::CREATED, Json(sent.latest().clone())))
}

async fn update_message_status(
    AuthUser(me): AuthUser,
    State(state): State<Arc<AppState>>,
    Path(message_id): Path<MessageId>,
    Json(body): Json<StatusChange>,
) -> Result<Json<Message>, ApiError> {
    state
        .relay
        .router()
        .update_message_status(me, message_id, body.status)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("Message"))
}

async fn get_user(
    _caller: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
) -> Result<Json<User>, ApiError> {
    state
        .relay
        .store()
        .get_user(user_id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("User"))
}

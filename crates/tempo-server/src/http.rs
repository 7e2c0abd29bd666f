use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use tempo_auth::{bearer_token, derive_user_id, normalize_username, AuthError};
use tempo_core::ids::UserId;
use tempo_core::protocol::TimerPayload;
use tempo_store::timers::TimerRepo;
use tempo_store::StoreError;

use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub token_type: String,
    pub user_id: UserId,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self {
            ApiError::Auth(error) => (StatusCode::UNAUTHORIZED, error.to_string()),
            ApiError::Store(error) => {
                tracing::error!(error = %error, "store failure while serving request");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_owned())
            }
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

/// `POST /login`. The password is accepted but not checked; identity is
/// derived from the username alone, so the same name always maps to the
/// same user id.
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let username = normalize_username(&request.username);
    let user_id = derive_user_id(&username);
    let token = state.keys.issue(&user_id, &username, state.token_ttl)?;
    tracing::info!(user_id = %user_id, username = %username, "login");
    Ok(Json(LoginResponse {
        token,
        token_type: "bearer".to_owned(),
        user_id,
    }))
}

/// `GET /timers`. Returns the caller's most recently updated timer, or
/// `null` when the user has never written one.
pub async fn current_timer(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Option<TimerPayload>>, ApiError> {
    let header = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    let claims = state.keys.verify(bearer_token(header)?)?;
    let user_id = claims.user_id();

    let row = TimerRepo::new(state.db.clone()).latest_for_user(&user_id)?;
    Ok(Json(row.as_ref().map(TimerPayload::from)))
}

/// `GET /health`.
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

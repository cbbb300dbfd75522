use axum::{
    extract::State,
    routing::{get, post},
    Router,
};
use tracing::{info, instrument, warn};

use crate::{
    auth::extractors::AuthUser,
    response::{ApiError, ApiResponse, JsonBody},
    state::AppState,
    users::{
        dto::{
            LoginRequest, LoginResponse, LoginUser, RegisterRequest, RegisterResponse,
            UpdateProfileRequest,
        },
        repo_types::User,
        services::ServiceError,
    },
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users/register", post(register))
        .route("/users/login", post(login))
        .route("/users/profile", get(get_profile).put(update_profile))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<RegisterRequest>,
) -> Result<ApiResponse<RegisterResponse>, ApiError> {
    let registration = payload.validate().map_err(|e| {
        warn!(error = %e, "invalid registration");
        ApiError::from(e)
    })?;
    let user = state.users.register(registration).await?;
    Ok(ApiResponse(RegisterResponse { user_id: user.id }))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<LoginRequest>,
) -> Result<ApiResponse<LoginResponse>, ApiError> {
    payload.validate()?;

    // Unknown user and wrong password must look the same to the caller.
    let user = match state
        .users
        .verify_credentials(payload.username.trim(), &payload.password)
        .await
    {
        Ok(u) => u,
        Err(ServiceError::NotFound | ServiceError::InvalidCredentials) => {
            warn!("login rejected");
            return Err(ApiError::Unauthorized("invalid username or password".into()));
        }
        Err(e) => return Err(e.into()),
    };

    let token = state.tokens.issue(&user)?;
    info!(user_id = user.id, "user logged in");
    Ok(ApiResponse(LoginResponse {
        token,
        user: LoginUser {
            id: user.id,
            username: user.username,
            nickname: user.nickname,
            email: user.email,
        },
    }))
}

#[instrument(skip(state))]
pub async fn get_profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<ApiResponse<User>, ApiError> {
    let user = state.users.get_user_by_id(user_id).await?;
    Ok(ApiResponse(user))
}

#[instrument(skip(state, payload))]
pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    JsonBody(payload): JsonBody<UpdateProfileRequest>,
) -> Result<ApiResponse<User>, ApiError> {
    let changes = payload.validate()?;
    let user = state.users.update_profile(user_id, changes).await?;
    Ok(ApiResponse(user))
}

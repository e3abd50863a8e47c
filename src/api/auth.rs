use axum::{
    extract::{Path, Query, Request, State},
    middleware,
    response::Json,
    routing::{get, post, put},
    Extension, Router,
};
use std::net::IpAddr;
use std::time::Duration;
use uuid::Uuid;
use validator::Validate;

use crate::auth::{
    admin_only_middleware, extract_bearer_token, jwt_auth_middleware, rate_limit_middleware, AuthError, AuthResponse,
    AuthService, ChangePasswordRequest, ForgotPasswordRequest, ListUsersQuery, LoginRequest,
    MessageResponse, RefreshTokenRequest, RegisterRequest, ResetPasswordRequest, TokenResponse,
    RateLimiter, TotpCodeRequest, TotpSetupResponse, UpdateRoleRequest, UserSession,
};
use crate::models::{UpdateUser, UserResponse};

const CREDENTIAL_ATTEMPTS_PER_MINUTE: usize = 20;

/// Authentication routes
pub fn auth_routes(auth_service: AuthService, trusted_proxies: &[IpAddr]) -> Router {
    let protected = Router::new()
        .route("/logout", post(logout))
        .route("/profile", get(get_profile).put(update_profile))
        .route("/change-password", post(change_password))
        .route("/totp/setup", post(setup_totp))
        .route("/totp/enable", post(enable_totp))
        .route("/totp/disable", post(disable_totp))
        .route_layer(middleware::from_fn_with_state(
            auth_service.clone(),
            jwt_auth_middleware,
        ));

    // Per client address, across all credential endpoints.
    let credentials = Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/forgot-password", post(forgot_password))
        .route("/reset-password", post(reset_password))
        .route_layer(middleware::from_fn_with_state(
            RateLimiter::new(CREDENTIAL_ATTEMPTS_PER_MINUTE, Duration::from_secs(60))
                .with_trusted_proxies(trusted_proxies),
            rate_limit_middleware,
        ));

    Router::new()
        .route("/refresh", post(refresh_token))
        .merge(credentials)
        .merge(protected)
        .with_state(auth_service)
}

/// Register a new trainer or client
#[tracing::instrument(skip(auth_service, request))]
async fn register(
    State(auth_service): State<AuthService>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>, AuthError> {
    let response = auth_service.register(request).await?;
    Ok(Json(response))
}

/// Login user
#[tracing::instrument(skip(auth_service, request))]
async fn login(
    State(auth_service): State<AuthService>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AuthError> {
    let response = auth_service.login(request).await?;
    Ok(Json(response))
}

/// Refresh access token
#[tracing::instrument(skip(auth_service, request))]
async fn refresh_token(
    State(auth_service): State<AuthService>,
    Json(request): Json<RefreshTokenRequest>,
) -> Result<Json<TokenResponse>, AuthError> {
    let response = auth_service.refresh_token(request).await?;
    Ok(Json(response))
}

/// Logout user
#[tracing::instrument(skip(auth_service, request))]
async fn logout(
    State(auth_service): State<AuthService>,
    request: Request,
) -> Result<Json<MessageResponse>, AuthError> {
    let auth_header = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .ok_or(AuthError::MissingAuthHeader)?;

    let token = extract_bearer_token(auth_header)?;
    let response = auth_service.logout(token).await?;
    Ok(Json(response))
}

/// Get user profile
#[tracing::instrument(skip(auth_service, session), fields(user_id = %session.user_id))]
async fn get_profile(
    State(auth_service): State<AuthService>,
    Extension(session): Extension<UserSession>,
) -> Result<Json<UserResponse>, AuthError> {
    let user = auth_service.get_user(session.user_id).await?;
    Ok(Json(user.into()))
}

/// Update user profile
#[tracing::instrument(skip(auth_service, session, update), fields(user_id = %session.user_id))]
async fn update_profile(
    State(auth_service): State<AuthService>,
    Extension(session): Extension<UserSession>,
    Json(update): Json<UpdateUser>,
) -> Result<Json<UserResponse>, AuthError> {
    let response = auth_service.update_profile(session.user_id, update).await?;
    Ok(Json(response))
}

/// Change user password
#[tracing::instrument(skip(auth_service, session, request), fields(user_id = %session.user_id))]
async fn change_password(
    State(auth_service): State<AuthService>,
    Extension(session): Extension<UserSession>,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    let response = auth_service.change_password(session.user_id, request).await?;
    Ok(Json(response))
}

/// Forgot password. The response does not reveal whether the account exists.
#[tracing::instrument(skip(auth_service, request))]
async fn forgot_password(
    State(auth_service): State<AuthService>,
    Json(request): Json<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    request.validate()?;
    let response = auth_service.forgot_password(&request.email).await?;
    Ok(Json(response))
}

/// Reset password
#[tracing::instrument(skip(auth_service, request))]
async fn reset_password(
    State(auth_service): State<AuthService>,
    Json(request): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    let response = auth_service.reset_password(request).await?;
    Ok(Json(response))
}

#[tracing::instrument(skip(auth_service, session), fields(user_id = %session.user_id))]
async fn setup_totp(
    State(auth_service): State<AuthService>,
    Extension(session): Extension<UserSession>,
) -> Result<Json<TotpSetupResponse>, AuthError> {
    let response = auth_service.setup_totp(session.user_id).await?;
    Ok(Json(response))
}

#[tracing::instrument(skip(auth_service, session, request), fields(user_id = %session.user_id))]
async fn enable_totp(
    State(auth_service): State<AuthService>,
    Extension(session): Extension<UserSession>,
    Json(request): Json<TotpCodeRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    let response = auth_service.enable_totp(session.user_id, &request.code).await?;
    Ok(Json(response))
}

#[tracing::instrument(skip(auth_service, session, request), fields(user_id = %session.user_id))]
async fn disable_totp(
    State(auth_service): State<AuthService>,
    Extension(session): Extension<UserSession>,
    Json(request): Json<TotpCodeRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    let response = auth_service.disable_totp(session.user_id, &request.code).await?;
    Ok(Json(response))
}

/// Admin endpoints
pub fn admin_routes(auth_service: AuthService) -> Router {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/:id/role", put(update_user_role))
        .route_layer(middleware::from_fn(admin_only_middleware))
        .route_layer(middleware::from_fn_with_state(
            auth_service.clone(),
            jwt_auth_middleware,
        ))
        .with_state(auth_service)
}

/// List users (admin only)
#[tracing::instrument(skip(auth_service))]
async fn list_users(
    State(auth_service): State<AuthService>,
    Query(query): Query<ListUsersQuery>,
) -> Result<Json<Vec<UserResponse>>, AuthError> {
    let users = auth_service.list_users(query).await?;
    Ok(Json(users))
}

/// Update user role (admin only)
#[tracing::instrument(skip(auth_service, request))]
async fn update_user_role(
    State(auth_service): State<AuthService>,
    Path(user_id): Path<Uuid>,
    Json(request): Json<UpdateRoleRequest>,
) -> Result<Json<UserResponse>, AuthError> {
    let user = auth_service.update_user_role(user_id, request.role).await?;
    Ok(Json(user))
}

use axum::{
    extract::{ConnectInfo, Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};

use crate::auth::{extract_bearer_token, AuthError, AuthService, UserRole, UserSession};

/// JWT authentication middleware. Puts the caller's [`UserSession`] into request extensions.
pub async fn jwt_auth_middleware(
    State(auth_service): State<AuthService>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .ok_or(AuthError::MissingAuthHeader)?;

    let token = extract_bearer_token(auth_header)?;
    let session = auth_service.validate_session(token).await?;

    request.extensions_mut().insert(session);

    Ok(next.run(request).await)
}

fn session_role(request: &Request) -> Result<UserRole, AuthError> {
    request
        .extensions()
        .get::<UserSession>()
        .map(|session| session.role)
        .ok_or(AuthError::InsufficientPermissions)
}

/// Admin-only middleware
pub async fn admin_only_middleware(request: Request, next: Next) -> Result<Response, AuthError> {
    if session_role(&request)? != UserRole::Admin {
        return Err(AuthError::InsufficientPermissions);
    }

    Ok(next.run(request).await)
}

/// Trainer-only middleware
pub async fn trainer_only_middleware(request: Request, next: Next) -> Result<Response, AuthError> {
    if session_role(&request)? != UserRole::Trainer {
        return Err(AuthError::InsufficientPermissions);
    }

    Ok(next.run(request).await)
}

/// Client-only middleware
pub async fn client_only_middleware(request: Request, next: Next) -> Result<Response, AuthError> {
    if session_role(&request)? != UserRole::Client {
        return Err(AuthError::InsufficientPermissions);
    }

    Ok(next.run(request).await)
}

/// CORS configuration for the browser front end
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Security headers middleware
pub fn security_headers_layer() -> tower_http::set_header::SetResponseHeaderLayer<axum::http::HeaderValue> {
    tower_http::set_header::SetResponseHeaderLayer::overriding(
        axum::http::header::HeaderName::from_static("x-content-type-options"),
        axum::http::HeaderValue::from_static("nosniff"),
    )
}

/// Idle clients are swept once this many addresses are tracked.
const MAX_TRACKED_CLIENTS: usize = 10_000;

/// Sliding-window request counter keyed by client address.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    requests: Arc<Mutex<HashMap<IpAddr, Vec<Instant>>>>,
    max_requests: usize,
    window: Duration,
    trusted_proxies: Arc<[IpAddr]>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            requests: Arc::new(Mutex::new(HashMap::new())),
            max_requests,
            window,
            trusted_proxies: Arc::from(Vec::new()),
        }
    }

    /// Honour `X-Forwarded-For` only on connections from these addresses.
    pub fn with_trusted_proxies(mut self, proxies: &[IpAddr]) -> Self {
        self.trusted_proxies = Arc::from(proxies);
        self
    }

    pub fn check_rate_limit(&self, client: IpAddr) -> bool {
        let mut requests = self.requests.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Instant::now();
        let window = self.window;

        if requests.len() >= MAX_TRACKED_CLIENTS {
            requests.retain(|_, times| times.last().is_some_and(|&time| now.duration_since(time) < window));
        }

        let entry = requests.entry(client).or_default();
        entry.retain(|&time| now.duration_since(time) < window);

        if entry.len() >= self.max_requests {
            return false;
        }

        entry.push(now);
        true
    }

    pub fn tracked_clients(&self) -> usize {
        self.requests.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    /// The socket peer, or for a trusted proxy the rightmost forwarded address it did not add itself.
    pub fn client_address(&self, request: &Request) -> Option<IpAddr> {
        let ConnectInfo(peer) = request.extensions().get::<ConnectInfo<SocketAddr>>()?;
        let peer = peer.ip();
        if !self.trusted_proxies.contains(&peer) {
            return Some(peer);
        }

        let forwarded = request
            .headers()
            .get("x-forwarded-for")
            .and_then(|header| header.to_str().ok())
            .unwrap_or_default();

        for entry in forwarded.rsplit(',') {
            match entry.trim().parse::<IpAddr>() {
                Ok(ip) if self.trusted_proxies.contains(&ip) => continue,
                Ok(ip) => return Some(ip),
                Err(_) => break,
            }
        }
        Some(peer)
    }
}

/// Rejects callers over the limit with 429.
pub async fn rate_limit_middleware(
    State(rate_limiter): State<RateLimiter>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let Some(client) = rate_limiter.client_address(&request) else {
        tracing::warn!("No peer address on request, serve with connect info to enable rate limiting");
        return Ok(next.run(request).await);
    };

    if !rate_limiter.check_rate_limit(client) {
        tracing::warn!("Rate limit exceeded for {}", client);
        return Err(AuthError::RateLimitExceeded);
    }

    Ok(next.run(request).await)
}

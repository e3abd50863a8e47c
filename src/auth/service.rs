use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

use crate::auth::password::{generate_reset_token, hash_password, verify_password};
use crate::auth::totp;
use crate::auth::{
    AuthError, AuthResponse, ChangePasswordRequest, JwtService, ListUsersQuery, LoginRequest,
    MessageResponse, RefreshTokenRequest, RegisterRequest, ResetPasswordRequest, TokenResponse,
    TokenType, TotpSetupResponse, UserRole, UserSession,
};
use crate::models::{NewNotification, NotificationKind, UpdateUser, User, UserResponse};
use crate::services::NotificationService;

pub(crate) const USER_COLUMNS: &str = "id, email, password_hash, role, full_name, phone, totp_secret, \
     totp_enabled, email_notifications, sms_notifications, whatsapp_notifications, \
     push_notifications, created_at, updated_at";

const TOTP_ISSUER: &str = "Fitness Scheduler";
const RESET_TOKEN_TTL_MINUTES: i64 = 60;

#[derive(Debug, Clone)]
pub struct AuthService {
    jwt_service: JwtService,
    notifications: NotificationService,
    app_url: String,
    db: PgPool,
}

impl AuthService {
    pub fn new(db: PgPool, jwt_secret: &str, app_url: &str) -> Self {
        Self {
            jwt_service: JwtService::new(jwt_secret),
            notifications: NotificationService::new(db.clone()),
            app_url: app_url.trim_end_matches('/').to_string(),
            db,
        }
    }

    pub fn jwt(&self) -> &JwtService {
        &self.jwt_service
    }

    /// Register a new trainer or client, creating the matching profile row.
    pub async fn register(&self, request: RegisterRequest) -> Result<AuthResponse, AuthError> {
        request.validate()?;

        let role = request.role.unwrap_or(UserRole::Client);
        if role == UserRole::Admin {
            return Err(AuthError::InsufficientPermissions);
        }

        let email = request.email.trim().to_lowercase();
        if self.find_user_by_email(&email).await?.is_some() {
            return Err(AuthError::EmailAlreadyExists);
        }

        let password_hash = hash_password(&request.password)?;
        let now = Utc::now();

        let mut tx = self.db.begin().await?;

        let user = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (id, email, password_hash, role, full_name, phone, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
             RETURNING {USER_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&email)
        .bind(&password_hash)
        .bind(role)
        .bind(request.full_name.trim())
        .bind(&request.phone)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => AuthError::EmailAlreadyExists,
            _ => AuthError::Database(e),
        })?;

        let profile_sql = match role {
            UserRole::Trainer => "INSERT INTO trainer_profiles (user_id) VALUES ($1)",
            _ => "INSERT INTO client_profiles (user_id) VALUES ($1)",
        };
        sqlx::query(profile_sql).bind(user.id).execute(&mut *tx).await?;

        tx.commit().await?;

        tracing::info!("Registered {} account {}", role.as_str(), user.id);
        self.issue_tokens(user).await
    }

    /// Login user, requiring a TOTP code when two-factor is enabled
    pub async fn login(&self, request: LoginRequest) -> Result<AuthResponse, AuthError> {
        let email = request.email.trim().to_lowercase();
        let user = self
            .find_user_by_email(&email)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        if !verify_password(&request.password, &user.password_hash)? {
            return Err(AuthError::InvalidCredentials);
        }

        if user.totp_enabled {
            let code = request.totp_code.as_deref().ok_or(AuthError::TotpRequired)?;
            let secret = user.totp_secret.as_deref().ok_or(AuthError::TotpNotConfigured)?;
            self.accept_totp(user.id, secret, code).await?;
        }

        self.issue_tokens(user).await
    }

    /// Exchange a stored refresh token for a new access token
    pub async fn refresh_token(&self, request: RefreshTokenRequest) -> Result<TokenResponse, AuthError> {
        let claims = self
            .jwt_service
            .validate_token_of_type(&request.refresh_token, TokenType::Refresh)?;
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidToken)?;

        if !self.is_refresh_token_valid(user_id, &request.refresh_token).await? {
            return Err(AuthError::InvalidToken);
        }

        // Role may have changed since the refresh token was issued.
        let user = self.get_user(user_id).await?;
        let access_token = self
            .jwt_service
            .create_access_token(user.id, &user.email, user.role)?;

        Ok(TokenResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: self.jwt_service.access_token_expires_in_seconds(),
        })
    }

    /// Logout user: blacklist the access token and revoke refresh tokens
    pub async fn logout(&self, token: &str) -> Result<MessageResponse, AuthError> {
        let claims = self.jwt_service.validate_token_of_type(token, TokenType::Access)?;
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidToken)?;

        self.blacklist_token(&claims.jti, claims.exp as i64).await?;
        self.revoke_user_refresh_tokens(user_id).await?;

        Ok(MessageResponse::new("Successfully logged out"))
    }

    pub async fn is_token_blacklisted(&self, jti: &str) -> Result<bool, AuthError> {
        let result = sqlx::query("SELECT 1 FROM token_blacklist WHERE jti = $1 AND expires_at > NOW()")
            .bind(jti)
            .fetch_optional(&self.db)
            .await?;

        Ok(result.is_some())
    }

    /// Validate user session from token
    pub async fn validate_session(&self, token: &str) -> Result<UserSession, AuthError> {
        let session = self.jwt_service.extract_user_session(token)?;

        if self.is_token_blacklisted(&session.jti).await? {
            return Err(AuthError::InvalidToken);
        }

        Ok(session)
    }

    pub async fn get_user(&self, user_id: Uuid) -> Result<User, AuthError> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(user_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or(AuthError::UserNotFound)
    }

    pub async fn update_profile(&self, user_id: Uuid, update: UpdateUser) -> Result<UserResponse, AuthError> {
        update.validate()?;

        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users
             SET full_name = COALESCE($2, full_name),
                 phone = COALESCE($3, phone),
                 updated_at = NOW()
             WHERE id = $1
             RETURNING {USER_COLUMNS}"
        ))
        .bind(user_id)
        .bind(update.full_name.as_deref().map(str::trim))
        .bind(&update.phone)
        .fetch_optional(&self.db)
        .await?
        .ok_or(AuthError::UserNotFound)?;

        Ok(user.into())
    }

    pub async fn change_password(&self, user_id: Uuid, request: ChangePasswordRequest) -> Result<MessageResponse, AuthError> {
        let user = self.get_user(user_id).await?;

        if !verify_password(&request.current_password, &user.password_hash)? {
            return Err(AuthError::InvalidCredentials);
        }

        let password_hash = hash_password(&request.new_password)?;
        self.set_password(user_id, &password_hash).await?;
        self.revoke_user_refresh_tokens(user_id).await?;

        Ok(MessageResponse::new("Password changed successfully"))
    }

    /// Start a password reset. The response never reveals whether the account exists.
    pub async fn forgot_password(&self, email: &str) -> Result<MessageResponse, AuthError> {
        let email = email.trim().to_lowercase();

        if let Some(user) = self.find_user_by_email(&email).await? {
            let token = generate_reset_token();
            let expires_at = Utc::now() + Duration::minutes(RESET_TOKEN_TTL_MINUTES);

            sqlx::query(
                "INSERT INTO password_reset_tokens (token_hash, user_id, expires_at) VALUES ($1, $2, $3)",
            )
            .bind(hash_token(&token))
            .bind(user.id)
            .bind(expires_at)
            .execute(&self.db)
            .await?;

            let link = format!("{}/reset-password?token={}", self.app_url, token);
            let notification = NewNotification::now(
                user.id,
                NotificationKind::PasswordReset,
                "Reset your password",
                format!(
                    "Use this link within {} minutes to choose a new password: {}",
                    RESET_TOKEN_TTL_MINUTES, link
                ),
            );
            self.notifications.enqueue(notification).await?;

            tracing::info!("Password reset requested for user {}", user.id);
        }

        Ok(MessageResponse::new(
            "If an account with that email exists, a password reset link has been sent.",
        ))
    }

    pub async fn reset_password(&self, request: ResetPasswordRequest) -> Result<MessageResponse, AuthError> {
        let password_hash = hash_password(&request.new_password)?;

        let user_id: Uuid = sqlx::query_scalar(
            "UPDATE password_reset_tokens SET used = TRUE
             WHERE token_hash = $1 AND NOT used AND expires_at > NOW()
             RETURNING user_id",
        )
        .bind(hash_token(&request.token))
        .fetch_optional(&self.db)
        .await?
        .ok_or(AuthError::InvalidResetToken)?;

        self.set_password(user_id, &password_hash).await?;
        self.revoke_user_refresh_tokens(user_id).await?;

        Ok(MessageResponse::new("Password reset successfully"))
    }

    /// Generate and store a new (not yet enabled) TOTP secret
    pub async fn setup_totp(&self, user_id: Uuid) -> Result<TotpSetupResponse, AuthError> {
        let user = self.get_user(user_id).await?;
        let secret = totp::generate_secret();

        sqlx::query("UPDATE users SET totp_secret = $2, totp_enabled = FALSE, updated_at = NOW() WHERE id = $1")
            .bind(user_id)
            .bind(&secret)
            .execute(&self.db)
            .await?;

        Ok(TotpSetupResponse {
            otpauth_uri: totp::provisioning_uri(&secret, &user.email, TOTP_ISSUER),
            secret,
        })
    }

    /// Enable two-factor after the user proves their authenticator produces valid codes
    pub async fn enable_totp(&self, user_id: Uuid, code: &str) -> Result<MessageResponse, AuthError> {
        let user = self.get_user(user_id).await?;
        let secret = user.totp_secret.as_deref().ok_or(AuthError::TotpNotConfigured)?;
        self.accept_totp(user_id, secret, code).await?;

        sqlx::query("UPDATE users SET totp_enabled = TRUE, updated_at = NOW() WHERE id = $1")
            .bind(user_id)
            .execute(&self.db)
            .await?;

        Ok(MessageResponse::new("Two-factor authentication enabled"))
    }

    pub async fn disable_totp(&self, user_id: Uuid, code: &str) -> Result<MessageResponse, AuthError> {
        let user = self.get_user(user_id).await?;
        if !user.totp_enabled {
            return Err(AuthError::TotpNotConfigured);
        }
        let secret = user.totp_secret.as_deref().ok_or(AuthError::TotpNotConfigured)?;
        self.accept_totp(user_id, secret, code).await?;

        sqlx::query("UPDATE users SET totp_secret = NULL, totp_enabled = FALSE, updated_at = NOW() WHERE id = $1")
            .bind(user_id)
            .execute(&self.db)
            .await?;

        Ok(MessageResponse::new("Two-factor authentication disabled"))
    }

    pub async fn list_users(&self, query: ListUsersQuery) -> Result<Vec<UserResponse>, AuthError> {
        let limit = query.limit.unwrap_or(50).clamp(1, 100);
        let offset = query.offset.unwrap_or(0).max(0);

        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE ($1::user_role IS NULL OR role = $1)
             ORDER BY created_at DESC LIMIT $2 OFFSET $3"
        ))
        .bind(query.role)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;

        Ok(users.into_iter().map(UserResponse::from).collect())
    }

    pub async fn update_user_role(&self, user_id: Uuid, role: UserRole) -> Result<UserResponse, AuthError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET role = $2, updated_at = NOW() WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(user_id)
        .bind(role)
        .fetch_optional(&self.db)
        .await?
        .ok_or(AuthError::UserNotFound)?;

        let profile_sql = match role {
            UserRole::Trainer => "INSERT INTO trainer_profiles (user_id) VALUES ($1) ON CONFLICT DO NOTHING",
            UserRole::Client => "INSERT INTO client_profiles (user_id) VALUES ($1) ON CONFLICT DO NOTHING",
            UserRole::Admin => "SELECT $1::uuid",
        };
        sqlx::query(profile_sql).bind(user_id).execute(&self.db).await?;

        tracing::info!("Changed role of user {} to {}", user_id, role.as_str());
        Ok(user.into())
    }

    /// Drop expired blacklist entries, refresh tokens and reset tokens.
    pub async fn purge_expired_tokens(&self) -> Result<u64, AuthError> {
        let mut removed = 0;
        for sql in [
            "DELETE FROM token_blacklist WHERE expires_at <= NOW()",
            "DELETE FROM refresh_tokens WHERE expires_at <= NOW() OR revoked",
            "DELETE FROM password_reset_tokens WHERE expires_at <= NOW() OR used",
        ] {
            removed += sqlx::query(sql).execute(&self.db).await?.rows_affected();
        }
        Ok(removed)
    }

    // Private helper methods

    /// Verify a TOTP code and burn its time step, so each code logs in at most once.
    async fn accept_totp(&self, user_id: Uuid, secret: &str, code: &str) -> Result<(), AuthError> {
        let step = check_totp(secret, code)?.ok_or(AuthError::InvalidTotp)?;
        let step = i64::try_from(step).map_err(|_| AuthError::InvalidTotp)?;

        let consumed = sqlx::query(
            "UPDATE users SET totp_last_step = $2
             WHERE id = $1 AND (totp_last_step IS NULL OR totp_last_step < $2)",
        )
        .bind(user_id)
        .bind(step)
        .execute(&self.db)
        .await?
        .rows_affected();

        if consumed == 0 {
            tracing::warn!("Rejected reused TOTP code for user {}", user_id);
            return Err(AuthError::InvalidTotp);
        }
        Ok(())
    }

    async fn issue_tokens(&self, user: User) -> Result<AuthResponse, AuthError> {
        let (access_token, refresh_token) = self
            .jwt_service
            .create_token_pair(user.id, &user.email, user.role)?;

        self.store_refresh_token(user.id, &refresh_token).await?;

        Ok(AuthResponse {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.jwt_service.access_token_expires_in_seconds(),
            user: user.into(),
        })
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        let user = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1"))
            .bind(email)
            .fetch_optional(&self.db)
            .await?;

        Ok(user)
    }

    async fn set_password(&self, user_id: Uuid, password_hash: &str) -> Result<(), AuthError> {
        sqlx::query("UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1")
            .bind(user_id)
            .bind(password_hash)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn store_refresh_token(&self, user_id: Uuid, refresh_token: &str) -> Result<(), AuthError> {
        let claims = self
            .jwt_service
            .validate_token_of_type(refresh_token, TokenType::Refresh)?;
        let expires_at = chrono::DateTime::from_timestamp(claims.exp as i64, 0).ok_or(AuthError::InvalidToken)?;

        sqlx::query(
            "INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(hash_token(refresh_token))
        .bind(expires_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn is_refresh_token_valid(&self, user_id: Uuid, refresh_token: &str) -> Result<bool, AuthError> {
        let result = sqlx::query(
            "SELECT 1 FROM refresh_tokens
             WHERE user_id = $1 AND token_hash = $2 AND expires_at > NOW() AND NOT revoked",
        )
        .bind(user_id)
        .bind(hash_token(refresh_token))
        .fetch_optional(&self.db)
        .await?;

        Ok(result.is_some())
    }

    async fn revoke_user_refresh_tokens(&self, user_id: Uuid) -> Result<(), AuthError> {
        sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    async fn blacklist_token(&self, jti: &str, exp: i64) -> Result<(), AuthError> {
        let expires_at = chrono::DateTime::from_timestamp(exp, 0).ok_or(AuthError::InvalidToken)?;

        sqlx::query(
            "INSERT INTO token_blacklist (jti, expires_at) VALUES ($1, $2)
             ON CONFLICT (jti) DO NOTHING",
        )
        .bind(jti)
        .bind(expires_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }
}

/// Tokens are only ever stored as SHA-256 hex digests.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn check_totp(secret: &str, code: &str) -> Result<Option<u64>, AuthError> {
    let now = Utc::now().timestamp().max(0) as u64;
    match totp::verify_code(secret, code, now) {
        Ok(step) => Ok(step),
        Err(totp::TotpError::MalformedCode) => Ok(None),
        Err(totp::TotpError::InvalidSecret) => Err(AuthError::TotpNotConfigured),
    }
}

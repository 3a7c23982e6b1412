use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{request::Parts, HeaderMap, StatusCode},
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use super::error::{ApiError, ValidationErrorBuilder};
use super::rate_limit::ClientIp;
use super::validation::{validate_email, validate_password};
use crate::config::{AuthConfig, MAX_DURATION_SECONDS};
use crate::db::{
    DataResponse, DbPool, LoginRequest, LoginResponse, RegisterRequest, Session, User,
    UserResponse, ROLE_ADMIN, ROLE_USER,
};
use crate::AppState;

pub const SESSION_COOKIE: &str = "session";

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Random 32 byte session token, hex encoded
fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

/// Only the SHA-256 of a token is ever stored
pub(crate) fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Session token from `Authorization: Bearer`, `X-API-Key` or the session cookie.
fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(auth_header) = headers.get("Authorization").and_then(|h| h.to_str().ok()) {
        if let Some(token) = auth_header.strip_prefix("Bearer ") {
            return Some(token.trim().to_string());
        }
    }

    if let Some(api_key) = headers.get("X-API-Key").and_then(|h| h.to_str().ok()) {
        return Some(api_key.trim().to_string());
    }

    CookieJar::from_headers(headers)
        .get(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
}

fn session_cookie(token: String, config: &AuthConfig) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(config.secure_cookies)
        .max_age(cookie::time::Duration::seconds(
            config.session_ttl_seconds.min(MAX_DURATION_SECONDS) as i64,
        ))
        .build()
}

fn removal_cookie() -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, "")).path("/").build()
}

/// The authenticated caller and the session it presented.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
    pub session: Session,
    pub token: String,
}

impl AuthUser {
    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.user.is_admin() {
            Ok(())
        } else {
            Err(ApiError::forbidden("Administrator access required"))
        }
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_token(&parts.headers)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

        let (session, user) = Session::find_valid(&state.db, &hash_token(&token))
            .await?
            .ok_or_else(|| ApiError::unauthorized("Session is invalid or has expired"))?;

        Ok(AuthUser {
            user,
            session,
            token,
        })
    }
}

/// Extractor that additionally requires the admin role.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let auth = AuthUser::from_request_parts(parts, state).await?;
        auth.require_admin()?;
        Ok(AdminUser(auth))
    }
}

/// POST /auth/register
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<DataResponse<UserResponse>>), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("email", validate_email(&request.email))
        .check("password", validate_password(&request.password));
    errors.finish()?;

    if User::get_by_email(&state.db, &request.email).await?.is_some() {
        return Err(ApiError::conflict("An account with this email already exists"));
    }

    let password_hash = hash_password(&request.password)
        .map_err(|e| ApiError::internal(format!("Failed to hash password: {}", e)))?;
    let user = User::create(
        &state.db,
        &request.email,
        &password_hash,
        request.first_name.trim(),
        request.last_name.trim(),
        ROLE_USER,
    )
    .await?;

    tracing::info!(user_id = %user.id, "Registered new user");
    Ok((
        StatusCode::CREATED,
        Json(DataResponse::new(UserResponse::from(user))),
    ))
}

/// POST /auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    jar: CookieJar,
    Json(request): Json<LoginRequest>,
) -> Result<(CookieJar, Json<LoginResponse>), ApiError> {
    let invalid = || ApiError::unauthorized("Invalid email or password");

    let user = User::get_by_email(&state.db, &request.email)
        .await?
        .ok_or_else(invalid)?;
    if !verify_password(&request.password, &user.password_hash) {
        tracing::warn!(ip = %ip, "Failed login attempt");
        return Err(invalid());
    }

    let token = generate_token();
    let session = Session::create(
        &state.db,
        &user.id,
        &hash_token(&token),
        Some(&ip.to_string()),
        state.config.auth.session_ttl_seconds,
    )
    .await?;

    tracing::info!(user_id = %user.id, ip = %ip, "User logged in");
    let jar = jar.add(session_cookie(token.clone(), &state.config.auth));
    Ok((
        jar,
        Json(LoginResponse {
            token,
            expires_at: session.expires_at,
            user: UserResponse::from(user),
        }),
    ))
}

/// POST /auth/logout
pub async fn logout(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    jar: CookieJar,
) -> Result<(CookieJar, StatusCode), ApiError> {
    Session::delete(&state.db, &auth.session.id).await?;
    Ok((jar.remove(removal_cookie()), StatusCode::NO_CONTENT))
}

/// GET /auth/refresh
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    jar: CookieJar,
) -> Result<(CookieJar, Json<LoginResponse>), ApiError> {
    let expires_at = Session::extend(
        &state.db,
        &auth.session.id,
        state.config.auth.session_ttl_seconds,
    )
    .await?;

    let jar = jar.add(session_cookie(auth.token.clone(), &state.config.auth));
    Ok((
        jar,
        Json(LoginResponse {
            token: auth.token,
            expires_at,
            user: UserResponse::from(auth.user),
        }),
    ))
}

/// GET /auth/me
pub async fn me(auth: AuthUser) -> Json<DataResponse<UserResponse>> {
    Json(DataResponse::new(UserResponse::from(auth.user)))
}

/// Create the configured administrator account if it does not exist yet.
pub async fn ensure_admin_user(db: &DbPool, config: &AuthConfig) -> anyhow::Result<()> {
    let (Some(email), Some(password)) = (&config.admin_email, &config.admin_password) else {
        return Ok(());
    };

    if User::get_by_email(db, email).await?.is_some() {
        tracing::debug!(email = %email, "Admin user already exists");
        return Ok(());
    }

    let password_hash =
        hash_password(password).map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;
    User::create(db, email, &password_hash, "Admin", "", ROLE_ADMIN).await?;
    tracing::info!(email = %email, "Created admin user");
    Ok(())
}

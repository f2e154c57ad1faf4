use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use uuid::Uuid;

use hearth_db::Database;
use hearth_types::api::{
    ChangePasswordRequest, Claims, LoginRequest, LoginResponse, MeResponse, RegisterRequest,
    RegisterResponse,
};
use hearth_types::events::EventSink;
use hearth_types::models::Role;

use crate::error::ApiError;
use crate::friendships::FriendPolicy;
use crate::run_blocking;
use crate::views::profile_view;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
    pub sink: Arc<dyn EventSink>,
    pub friends: FriendPolicy,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.username.len() < 3 || req.username.len() > 32 {
        return Err(ApiError::InvalidArgument(
            "username must be 3-32 characters".into(),
        ));
    }
    if req.password.len() < 8 {
        return Err(ApiError::InvalidArgument(
            "password must be at least 8 characters".into(),
        ));
    }
    if !req.email.contains('@') {
        return Err(ApiError::InvalidArgument("invalid email address".into()));
    }

    let jwt_secret = state.jwt_secret.clone();
    let (user_id, token) = run_blocking(move || {
        if state.db.get_user_by_username(&req.username)?.is_some() {
            return Err(ApiError::Conflict("username already taken".into()));
        }
        if state.db.get_user_by_email(&req.email)?.is_some() {
            return Err(ApiError::Conflict("email already registered".into()));
        }

        // Hash password with Argon2id
        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(req.password.as_bytes(), &salt)
            .map_err(|e| anyhow::anyhow!("password hash failed: {}", e))?
            .to_string();

        let user_id = Uuid::new_v4();
        state.db.create_user(
            &user_id.to_string(),
            &req.username,
            &req.email,
            &password_hash,
            Role::User.as_str(),
        )?;

        let token = create_token(&jwt_secret, user_id, &req.username, Role::User)?;
        Ok((user_id, token))
    })
    .await?;

    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id, token })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let jwt_secret = state.jwt_secret.clone();
    let response = run_blocking(move || {
        let user = state
            .db
            .get_user_by_username(&req.username)?
            .ok_or_else(|| ApiError::Unauthorized("invalid username or password".into()))?;

        let parsed_hash = PasswordHash::new(&user.password)
            .map_err(|e| anyhow::anyhow!("stored hash unreadable: {}", e))?;

        Argon2::default()
            .verify_password(req.password.as_bytes(), &parsed_hash)
            .map_err(|_| ApiError::Unauthorized("invalid username or password".into()))?;

        let user_id: Uuid = user
            .id
            .parse()
            .map_err(|e| anyhow::anyhow!("corrupt user id '{}': {}", user.id, e))?;
        let role = user.role.parse().unwrap_or(Role::User);

        let token = create_token(&jwt_secret, user_id, &user.username, role)?;
        Ok(LoginResponse {
            user_id,
            username: user.username,
            role,
            token,
        })
    })
    .await?;

    Ok(Json(response))
}

/// The authenticated user's own identity plus profile.
pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let response = run_blocking(move || {
        let user = state
            .db
            .get_user_by_id(&claims.sub.to_string())?
            .ok_or(ApiError::NotFound("user"))?;
        let profile = state
            .db
            .get_profile(&user.id)?
            .map(|row| profile_view(&row));

        Ok(MeResponse {
            id: claims.sub,
            username: user.username,
            email: user.email,
            role: user.role.parse().unwrap_or(Role::User),
            profile,
        })
    })
    .await?;

    Ok(Json(response))
}

pub async fn change_password(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.new_password.len() < 8 {
        return Err(ApiError::InvalidArgument(
            "password must be at least 8 characters".into(),
        ));
    }

    run_blocking(move || {
        let user = state
            .db
            .get_user_by_id(&claims.sub.to_string())?
            .ok_or(ApiError::NotFound("user"))?;

        let parsed_hash = PasswordHash::new(&user.password)
            .map_err(|e| anyhow::anyhow!("stored hash unreadable: {}", e))?;
        Argon2::default()
            .verify_password(req.current_password.as_bytes(), &parsed_hash)
            .map_err(|_| ApiError::Unauthorized("current password is incorrect".into()))?;

        let salt = SaltString::generate(&mut OsRng);
        let new_hash = Argon2::default()
            .hash_password(req.new_password.as_bytes(), &salt)
            .map_err(|e| anyhow::anyhow!("password hash failed: {}", e))?
            .to_string();

        state.db.update_password(&user.id, &new_hash)?;
        Ok(())
    })
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

pub(crate) fn create_token(
    secret: &str,
    user_id: Uuid,
    username: &str,
    role: Role,
) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        role,
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

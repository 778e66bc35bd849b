//! Account registration, login and bearer-token resolution.

use std::{future::Future, pin::Pin};

use actix_web::{dev::Payload, http::header, web::Data, FromRequest, HttpRequest};
use sqlx::SqlitePool;

use crate::{
    db,
    errors::{AppError, INVALID_CREDENTIALS},
    structs::{LoginResponse, PublicUser, Register, User},
    token::{Claims, TokenService},
    utils::{hash_password, verify_password},
    AppState,
};

pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const MAX_PASSWORD_LENGTH: usize = 128;
pub const MIN_ACCOUNT_ID_LENGTH: usize = 3;
pub const MAX_ACCOUNT_ID_LENGTH: usize = 20;
pub const MAX_NAME_LENGTH: usize = 50;

lazy_static! {
    /// Verified against when the account does not exist, so both login
    /// failure paths cost one Argon2 verification.
    static ref DUMMY_HASH: Option<String> = hash_password("dummy-password-for-timing").ok();
}

#[derive(Clone)]
pub struct AuthService {
    pool: SqlitePool,
    tokens: TokenService,
}

impl AuthService {
    pub fn new(pool: SqlitePool, tokens: TokenService) -> Self {
        Self { pool, tokens }
    }

    pub async fn register(&self, form: Register) -> Result<User, AppError> {
        let name = form.name.trim();
        validate_registration(name, &form.account_id, &form.password)?;

        if db::get_user_by_account_id(&self.pool, &form.account_id)
            .await?
            .is_some()
        {
            log::info!(target: "audit", "registration rejected, account_id={} taken", form.account_id);
            return Err(AppError::Conflict("Account ID already exists".into()));
        }

        let pwd_hash = hash_password(&form.password)?;
        db::create_user(&self.pool, name, &form.account_id, &pwd_hash).await
    }

    pub async fn login(&self, account_id: &str, password: &str) -> Result<LoginResponse, AppError> {
        let user = db::get_user_by_account_id(&self.pool, account_id).await?;

        let user = match user {
            Some(user) => {
                if !verify_password(password, &user.pwd_hash)? {
                    log::warn!(target: "audit", "login failed for account_id={}", account_id);
                    return Err(AppError::Unauthorized(INVALID_CREDENTIALS.into()));
                }
                user
            }
            None => {
                if let Some(dummy) = DUMMY_HASH.as_deref() {
                    let _ = verify_password(password, dummy);
                }
                log::warn!(target: "audit", "login failed for account_id={}", account_id);
                return Err(AppError::Unauthorized(INVALID_CREDENTIALS.into()));
            }
        };

        let issued = self.tokens.issue(user.id, user.token_version)?;
        log::info!(target: "audit", "user {} logged in", user.id);
        Ok(LoginResponse {
            token: issued.token,
            expires_at: issued.claims.expires_at(),
            user: PublicUser::from(&user),
        })
    }

    pub async fn get_user_by_id(&self, id: i64) -> Result<User, AppError> {
        db::get_user_by_id(&self.pool, id)
            .await?
            .ok_or(AppError::NotFound("User"))
    }

    pub async fn get_all_users(&self) -> Result<Vec<PublicUser>, AppError> {
        let users = db::get_all_users(&self.pool).await?;
        Ok(users.iter().map(PublicUser::from).collect())
    }

    /// Resolves a bearer token to its claims, rejecting revoked, superseded
    /// or orphaned tokens with the same error.
    pub async fn authenticate(&self, token: &str) -> Result<Claims, AppError> {
        let claims = self.tokens.verify(token)?;
        let user_id = claims.user_id()?;

        if db::is_token_revoked(&self.pool, &claims.jti).await? {
            return Err(AppError::unauthorized());
        }
        match db::get_user_by_id(&self.pool, user_id).await? {
            Some(user) if user.token_version == claims.ver => Ok(claims),
            _ => Err(AppError::unauthorized()),
        }
    }

    pub async fn logout(&self, claims: &Claims) -> Result<(), AppError> {
        let user_id = claims.user_id()?;
        db::revoke_token(&self.pool, &claims.jti, user_id, claims.expires_at()).await?;
        let purged = db::purge_expired_revocations(&self.pool).await?;
        if purged > 0 {
            log::debug!("Purged {} expired token revocations", purged);
        }
        log::info!(target: "audit", "user {} logged out", user_id);
        Ok(())
    }

    pub async fn logout_all(&self, user_id: i64) -> Result<(), AppError> {
        db::bump_token_version(&self.pool, user_id).await?;
        log::info!(target: "audit", "user {} logged out of all sessions", user_id);
        Ok(())
    }
}

pub fn validate_registration(name: &str, account_id: &str, password: &str) -> Result<(), AppError> {
    if name.is_empty() {
        return Err(AppError::Validation("Name is required".into()));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(AppError::Validation(format!(
            "Name must be at most {MAX_NAME_LENGTH} characters long"
        )));
    }
    let account_len = account_id.chars().count();
    if !(MIN_ACCOUNT_ID_LENGTH..=MAX_ACCOUNT_ID_LENGTH).contains(&account_len) {
        return Err(AppError::Validation(format!(
            "Account ID must be between {MIN_ACCOUNT_ID_LENGTH} and {MAX_ACCOUNT_ID_LENGTH} characters long"
        )));
    }
    if !account_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(AppError::Validation(
            "Account ID may only contain letters, numbers, '_' and '-'".into(),
        ));
    }
    let password_len = password.chars().count();
    if password_len < MIN_PASSWORD_LENGTH {
        return Err(AppError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters long"
        )));
    }
    if password_len > MAX_PASSWORD_LENGTH {
        return Err(AppError::Validation(format!(
            "Password must be at most {MAX_PASSWORD_LENGTH} characters long"
        )));
    }
    Ok(())
}

/// Caller resolved from `Authorization: Bearer <token>`.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: i64,
    pub claims: Claims,
}

impl FromRequest for AuthUser {
    type Error = AppError;
    type Future = Pin<Box<dyn Future<Output = Result<Self, Self::Error>>>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let state = req.app_data::<Data<AppState>>().cloned();
        let token = bearer_token(req);

        Box::pin(async move {
            let state = state.ok_or(AppError::InternalServerError)?;
            let token = token.ok_or_else(AppError::unauthorized)?;
            let claims = state.auth.authenticate(&token).await?;
            Ok(AuthUser {
                id: claims.user_id()?,
                claims,
            })
        })
    }
}

fn bearer_token(req: &HttpRequest) -> Option<String> {
    let value = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") || token.trim().is_empty() {
        return None;
    }
    Some(token.trim().to_owned())
}

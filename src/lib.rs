//! Household expense splitting service.
//!
//! Members of a household register accounts and settle a bill each month:
//! one member (the requester) collects the month's expenses as line items and
//! asks another member (the payer) to pay the total.
//!
//! # Bill workflow
//! - `pending`: the requester may replace the items or delete the bill
//! - `requested`: the requester has asked for payment, items are frozen
//! - `paid`: the payer confirmed payment, the bill is closed
//!
//! # Request pipeline
//! Outermost first: error normalization, audit logging, compression,
//! security headers, development headers, input validation, global rate
//! limit, session, CSRF, then the route. Login and registration carry an
//! extra rate limit and a smaller body cap. Bill and account routes resolve
//! the caller from an `Authorization: Bearer` token.
//!
//! # Running
//! ```sh
//! RUST_LOG=info,audit=info cargo run
//! ```
//! See [`config::Config::load`] for the environment variables read at startup.

#[macro_use]
extern crate lazy_static;

use actix_files::Files;
use actix_session::{storage::CookieSessionStore, SessionMiddleware};
use actix_web::{
    body::MessageBody,
    cookie::SameSite,
    dev::{fn_service, ServiceFactory, ServiceRequest, ServiceResponse},
    error::PathError,
    middleware::{from_fn, Compress, Condition, Logger},
    web::{self, Data},
    App, HttpRequest,
};
use sqlx::SqlitePool;

pub mod auth;
pub mod bills;
pub mod config;
pub mod db;
pub mod errors;
pub mod middleware;
pub mod routes;
pub mod structs;
pub mod token;
pub mod utils;

use auth::AuthService;
use bills::BillService;
use config::Config;
use errors::AppError;
use middleware::{
    development_headers, global_rate_limit, json_error_handler, normalize_errors,
    security_headers, validate_input, verify_csrf, RateLimiter, RateLimiters,
};
use token::TokenService;

pub const SESSION_COOKIE: &str = "household_bills_session";
const ACCESS_LOG_FORMAT: &str = r#"%a "%r" %s %b "%{User-Agent}i" %Dms"#;

pub struct AppState {
    pub pool: SqlitePool,
    pub auth: AuthService,
    pub bills: BillService,
    pub limiters: RateLimiters,
    pub config: Config,
}

impl AppState {
    pub fn new(pool: SqlitePool, config: Config) -> Self {
        let tokens = TokenService::new(&config.jwt_secret, config.token_ttl);
        Self {
            auth: AuthService::new(pool.clone(), tokens),
            bills: BillService::new(pool.clone()),
            limiters: RateLimiters {
                global: RateLimiter::new(config.global_rate_limit),
                auth: RateLimiter::new(config.auth_rate_limit),
            },
            pool,
            config,
        }
    }

    /// Opens the configured database, runs migrations and wires the services.
    pub async fn connect(config: Config) -> Result<Self, AppError> {
        let pool = db::init_pool(&config.database_url, config.database_max_connections).await?;
        Ok(Self::new(pool, config))
    }
}

fn path_error_handler(err: PathError, _req: &HttpRequest) -> actix_web::Error {
    AppError::Validation(format!("Invalid path parameter: {err}")).into()
}

/// Builds the application with its full middleware pipeline. `state` must be
/// created once and shared by every worker so rate limits are global.
pub fn create_app(
    state: Data<AppState>,
) -> App<
    impl ServiceFactory<
        ServiceRequest,
        Config = (),
        Response = ServiceResponse<impl MessageBody>,
        Error = actix_web::Error,
        InitError = (),
    >,
> {
    let development = state.config.is_development();
    let session = SessionMiddleware::builder(
        CookieSessionStore::default(),
        state.config.session_key.clone(),
    )
    .cookie_name(SESSION_COOKIE.to_owned())
    .cookie_secure(!development)
    .cookie_http_only(true)
    .cookie_same_site(SameSite::Strict)
    .build();
    let assets_dir = format!("{}/assets", state.config.static_dir);

    App::new()
        .app_data(state)
        .app_data(
            web::JsonConfig::default()
                .limit(middleware::validation::MAX_BODY_BYTES)
                .error_handler(json_error_handler),
        )
        .app_data(web::PathConfig::default().error_handler(path_error_handler))
        .service(
            Files::new("/assets", assets_dir).default_handler(fn_service(routes::missing_asset)),
        )
        .configure(routes::configure)
        .default_service(web::to(routes::default_handler))
        // registered innermost first; the last wrap sees the request first
        .wrap(from_fn(verify_csrf))
        .wrap(session)
        .wrap(from_fn(global_rate_limit))
        .wrap(from_fn(validate_input))
        .wrap(Condition::new(development, development_headers()))
        .wrap(security_headers(!development))
        .wrap(Compress::default())
        .wrap(Logger::new(ACCESS_LOG_FORMAT).log_target("audit"))
        .wrap(normalize_errors())
}

use std::path::Path;

use actix_files::NamedFile;
use actix_session::Session;
use actix_web::{
    delete,
    dev::{ServiceRequest, ServiceResponse},
    get,
    http::{Method, StatusCode},
    middleware::from_fn,
    post, put,
    web::{self, Data, Json},
    Either, HttpRequest, HttpResponse, Responder,
};
use serde::{Deserialize, Serialize};

use crate::{
    auth::AuthUser,
    config::RateLimitSettings,
    db,
    errors::AppError,
    middleware::{auth_rate_limit, csrf, validate_auth_input},
    structs::{CreateBill, Login, MessageResponse, PublicUser, Register, UpdateItems},
    AppState,
};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health_handler)
        .service(csrf_token_handler)
        .service(security_status_handler)
        .service(login_handler)
        .service(register_handler)
        .service(me_handler)
        .service(logout_handler)
        .service(logout_all_handler)
        .service(users_handler)
        .service(list_bills_handler)
        .service(get_bill_handler)
        .service(create_bill_handler)
        .service(update_items_handler)
        .service(request_payment_handler)
        .service(confirm_payment_handler)
        .service(delete_bill_handler);
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    database: &'static str,
    version: &'static str,
}

#[get("/health")]
pub async fn health_handler(state: Data<AppState>) -> impl Responder {
    match db::ping(&state.pool).await {
        Ok(()) => HttpResponse::Ok().json(HealthResponse {
            status: "ok",
            database: "ok",
            version: env!("CARGO_PKG_VERSION"),
        }),
        Err(e) => {
            log::error!("Health check failed: {}", e);
            HttpResponse::ServiceUnavailable().json(HealthResponse {
                status: "degraded",
                database: "unavailable",
                version: env!("CARGO_PKG_VERSION"),
            })
        }
    }
}

#[derive(Serialize)]
struct CsrfTokenResponse {
    csrf_token: String,
}

#[get("/api/csrf-token")]
pub async fn csrf_token_handler(session: Session) -> Result<impl Responder, AppError> {
    let csrf_token = csrf::issue_token(&session)?;
    Ok(HttpResponse::Ok().json(CsrfTokenResponse { csrf_token }))
}

#[derive(Serialize)]
struct RateLimitStatus {
    max_requests: u32,
    window_secs: u64,
}

impl From<RateLimitSettings> for RateLimitStatus {
    fn from(settings: RateLimitSettings) -> Self {
        Self {
            max_requests: settings.max_requests,
            window_secs: settings.window.as_secs(),
        }
    }
}

#[derive(Serialize)]
struct SecurityStatus {
    environment: String,
    csrf_protection: bool,
    csrf_header: &'static str,
    security_headers: bool,
    hsts: bool,
    token_ttl_hours: i64,
    global_rate_limit: RateLimitStatus,
    auth_rate_limit: RateLimitStatus,
}

#[get("/api/security-status")]
pub async fn security_status_handler(state: Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(SecurityStatus {
        environment: state.config.environment.to_string(),
        csrf_protection: true,
        csrf_header: csrf::CSRF_HEADER,
        security_headers: true,
        hsts: !state.config.is_development(),
        token_ttl_hours: state.config.token_ttl.num_hours(),
        global_rate_limit: state.limiters.global.settings().into(),
        auth_rate_limit: state.limiters.auth.settings().into(),
    })
}

#[post(
    "/api/auth/login",
    wrap = "from_fn(validate_auth_input)",
    wrap = "from_fn(auth_rate_limit)"
)]
pub async fn login_handler(
    state: Data<AppState>,
    Json(form): Json<Login>,
) -> Result<impl Responder, AppError> {
    if form.account_id.is_empty() || form.password.is_empty() {
        return Err(AppError::Validation("All fields are required".into()));
    }
    let response = state.auth.login(&form.account_id, &form.password).await?;
    Ok(HttpResponse::Ok().json(response))
}

#[post(
    "/api/auth/register",
    wrap = "from_fn(validate_auth_input)",
    wrap = "from_fn(auth_rate_limit)"
)]
pub async fn register_handler(
    state: Data<AppState>,
    Json(form): Json<Register>,
) -> Result<impl Responder, AppError> {
    let user = state.auth.register(form).await?;
    Ok(HttpResponse::Created().json(PublicUser::from(&user)))
}

#[get("/api/auth/me")]
pub async fn me_handler(state: Data<AppState>, user: AuthUser) -> Result<impl Responder, AppError> {
    let user = state.auth.get_user_by_id(user.id).await?;
    Ok(HttpResponse::Ok().json(PublicUser::from(&user)))
}

#[post("/api/auth/logout")]
pub async fn logout_handler(state: Data<AppState>, user: AuthUser) -> Result<impl Responder, AppError> {
    state.auth.logout(&user.claims).await?;
    Ok(HttpResponse::Ok().json(MessageResponse::new("Logged out")))
}

#[post("/api/auth/logout-all")]
pub async fn logout_all_handler(
    state: Data<AppState>,
    user: AuthUser,
) -> Result<impl Responder, AppError> {
    state.auth.logout_all(user.id).await?;
    Ok(HttpResponse::Ok().json(MessageResponse::new("Logged out of all sessions")))
}

#[get("/api/users")]
pub async fn users_handler(state: Data<AppState>, _user: AuthUser) -> Result<impl Responder, AppError> {
    let users = state.auth.get_all_users().await?;
    Ok(HttpResponse::Ok().json(users))
}

#[get("/api/bills")]
pub async fn list_bills_handler(
    state: Data<AppState>,
    user: AuthUser,
) -> Result<impl Responder, AppError> {
    let bills = state.bills.list(user.id).await?;
    Ok(HttpResponse::Ok().json(bills))
}

#[derive(Deserialize)]
pub struct PeriodPath {
    year: i64,
    month: i64,
}

#[get("/api/bills/{year}/{month}")]
pub async fn get_bill_handler(
    state: Data<AppState>,
    user: AuthUser,
    path: web::Path<PeriodPath>,
) -> Result<impl Responder, AppError> {
    let bill = state.bills.get_by_period(user.id, path.year, path.month).await?;
    Ok(HttpResponse::Ok().json(bill))
}

#[post("/api/bills")]
pub async fn create_bill_handler(
    state: Data<AppState>,
    user: AuthUser,
    Json(form): Json<CreateBill>,
) -> Result<impl Responder, AppError> {
    let bill = state.bills.create(user.id, form).await?;
    Ok(HttpResponse::Created().json(bill))
}

#[put("/api/bills/{id}/items")]
pub async fn update_items_handler(
    state: Data<AppState>,
    user: AuthUser,
    path: web::Path<i64>,
    Json(form): Json<UpdateItems>,
) -> Result<impl Responder, AppError> {
    let bill = state
        .bills
        .update_items(user.id, path.into_inner(), &form.items)
        .await?;
    Ok(HttpResponse::Ok().json(bill))
}

#[put("/api/bills/{id}/request")]
pub async fn request_payment_handler(
    state: Data<AppState>,
    user: AuthUser,
    path: web::Path<i64>,
) -> Result<impl Responder, AppError> {
    let bill = state.bills.request_payment(user.id, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(bill))
}

#[put("/api/bills/{id}/payment")]
pub async fn confirm_payment_handler(
    state: Data<AppState>,
    user: AuthUser,
    path: web::Path<i64>,
) -> Result<impl Responder, AppError> {
    let bill = state.bills.confirm_payment(user.id, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(bill))
}

#[delete("/api/bills/{id}")]
pub async fn delete_bill_handler(
    state: Data<AppState>,
    user: AuthUser,
    path: web::Path<i64>,
) -> Result<impl Responder, AppError> {
    state.bills.delete(user.id, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(MessageResponse::new("Bill deleted")))
}

/// Client-side routes get the SPA shell; everything else is a JSON error.
pub async fn default_handler(
    req: HttpRequest,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    match *req.method() {
        Method::GET | Method::HEAD if !req.path().starts_with("/api/") => {
            let index = Path::new(&state.config.static_dir).join("index.html");
            let file = NamedFile::open(index).map_err(|_| AppError::NotFound("Page"))?;
            Ok(Either::Left(file.use_last_modified(true)))
        }
        Method::GET | Method::HEAD => Err(AppError::NotFound("Resource")),
        _ => Ok(Either::Right(
            HttpResponse::build(StatusCode::METHOD_NOT_ALLOWED).json(crate::errors::ErrorBody {
                error: "Method not allowed".into(),
            }),
        )),
    }
}

/// Missing files under `/assets` are plain 404s rather than the SPA shell.
pub async fn missing_asset(req: ServiceRequest) -> Result<ServiceResponse, actix_web::Error> {
    let (req, _) = req.into_parts();
    Ok(ServiceResponse::from_err(AppError::NotFound("Asset"), req))
}

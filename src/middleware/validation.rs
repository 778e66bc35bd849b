use actix_web::{
    body::{EitherBody, MessageBody},
    dev::{ServiceRequest, ServiceResponse},
    error::JsonPayloadError,
    http::{header, Method},
    middleware::Next,
    Error, HttpRequest,
};

use crate::errors::AppError;

pub const MAX_BODY_BYTES: usize = 64 * 1024;
pub const MAX_AUTH_BODY_BYTES: usize = 4 * 1024;

fn declared_length(req: &ServiceRequest) -> Option<usize> {
    req.headers()
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

fn has_body(req: &ServiceRequest) -> bool {
    declared_length(req).map(|len| len > 0).unwrap_or(false)
        || req.headers().contains_key(header::TRANSFER_ENCODING)
}

fn is_json(req: &ServiceRequest) -> bool {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(';')
                .next()
                .unwrap_or("")
                .trim()
                .eq_ignore_ascii_case("application/json")
        })
        .unwrap_or(false)
}

fn suspicious_target(path: &str, query: &str) -> bool {
    let decoded_traversal = |s: &str| {
        let lower = s.to_ascii_lowercase();
        lower.contains("%2e%2e") || lower.contains("%00")
    };
    path.contains('\0')
        || query.contains('\0')
        || path.split('/').any(|segment| segment == "..")
        || decoded_traversal(path)
        || decoded_traversal(query)
}

fn check(req: &ServiceRequest, max_body: usize) -> Result<(), AppError> {
    if suspicious_target(req.path(), req.query_string()) {
        return Err(AppError::Validation("Malformed request path".into()));
    }
    if matches!(*req.method(), Method::POST | Method::PUT | Method::PATCH) && has_body(req) {
        if !is_json(req) {
            return Err(AppError::UnsupportedMediaType);
        }
        if declared_length(req).map(|len| len > max_body).unwrap_or(false) {
            return Err(AppError::PayloadTooLarge);
        }
    }
    Ok(())
}

pub async fn validate_input<B: MessageBody>(
    req: ServiceRequest,
    next: Next<B>,
) -> Result<ServiceResponse<EitherBody<B>>, Error> {
    if let Err(e) = check(&req, MAX_BODY_BYTES) {
        log::warn!(target: "audit", "rejected {} {}: {}", req.method(), req.path(), e);
        return Ok(req.error_response(e).map_into_right_body());
    }
    Ok(next.call(req).await?.map_into_left_body())
}

pub async fn validate_auth_input<B: MessageBody>(
    req: ServiceRequest,
    next: Next<B>,
) -> Result<ServiceResponse<EitherBody<B>>, Error> {
    if let Err(e) = check(&req, MAX_AUTH_BODY_BYTES) {
        log::warn!(target: "audit", "rejected auth request {} {}: {}", req.method(), req.path(), e);
        return Ok(req.error_response(e).map_into_right_body());
    }
    Ok(next.call(req).await?.map_into_left_body())
}

/// Maps JSON extractor failures onto the validation error body.
pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> Error {
    let app_error = match &err {
        JsonPayloadError::OverflowKnownLength { .. } | JsonPayloadError::Overflow { .. } => {
            AppError::PayloadTooLarge
        }
        JsonPayloadError::ContentType => AppError::UnsupportedMediaType,
        _ => AppError::Validation(format!("Invalid request body: {err}")),
    };
    app_error.into()
}

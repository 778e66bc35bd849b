use actix_session::{Session, SessionExt};
use actix_web::{
    body::{EitherBody, MessageBody},
    dev::{ServiceRequest, ServiceResponse},
    http::Method,
    middleware::Next,
    Error,
};
use subtle::ConstantTimeEq;

use crate::{errors::AppError, utils::random_token};

pub const CSRF_HEADER: &str = "X-CSRF-Token";
const SESSION_KEY: &str = "csrf_token";

/// Returns the session's CSRF token, minting one on first use.
pub fn issue_token(session: &Session) -> Result<String, AppError> {
    if let Ok(Some(existing)) = session.get::<String>(SESSION_KEY) {
        return Ok(existing);
    }
    let token = random_token(32);
    session.insert(SESSION_KEY, &token).map_err(|e| {
        log::error!("Failed to store CSRF token in session: {}", e);
        AppError::InternalServerError
    })?;
    Ok(token)
}

fn is_mutating(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

fn verify(req: &ServiceRequest) -> Result<(), AppError> {
    if !is_mutating(req.method()) {
        return Ok(());
    }
    let provided = req
        .headers()
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::CsrfRejected)?;
    let expected = req
        .get_session()
        .get::<String>(SESSION_KEY)
        .ok()
        .flatten()
        .ok_or(AppError::CsrfRejected)?;
    if provided.as_bytes().ct_eq(expected.as_bytes()).into() {
        Ok(())
    } else {
        Err(AppError::CsrfRejected)
    }
}

pub async fn verify_csrf<B: MessageBody>(
    req: ServiceRequest,
    next: Next<B>,
) -> Result<ServiceResponse<EitherBody<B>>, Error> {
    if let Err(e) = verify(&req) {
        log::warn!(target: "audit", "CSRF check failed for {} {}", req.method(), req.path());
        return Ok(req.error_response(e).map_into_right_body());
    }
    Ok(next.call(req).await?.map_into_left_body())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_state_changing_methods_are_checked() {
        assert!(is_mutating(&Method::POST));
        assert!(is_mutating(&Method::PUT));
        assert!(is_mutating(&Method::DELETE));
        assert!(!is_mutating(&Method::GET));
        assert!(!is_mutating(&Method::HEAD));
        assert!(!is_mutating(&Method::OPTIONS));
    }
}

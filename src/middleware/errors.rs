use actix_web::{
    dev::ServiceResponse,
    http::header,
    middleware::{ErrorHandlerResponse, ErrorHandlers},
    HttpResponse, Result,
};

use crate::errors::ErrorBody;

/// Rewrites error responses that did not come from `AppError` (routing
/// misses, framework rejections) into the JSON error body.
pub fn normalize_errors<B: 'static>() -> ErrorHandlers<B> {
    ErrorHandlers::new().default_handler(to_json_error)
}

fn to_json_error<B>(res: ServiceResponse<B>) -> Result<ErrorHandlerResponse<B>> {
    let is_json = res
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/json"))
        .unwrap_or(false);
    if is_json {
        return Ok(ErrorHandlerResponse::Response(res.map_into_left_body()));
    }

    let status = res.status();
    let message = status.canonical_reason().unwrap_or("Error").to_owned();
    let (req, original) = res.into_parts();
    let mut response = HttpResponse::build(status);
    // headers describing the discarded body must not leak onto the new one
    for (name, value) in original.headers() {
        if *name != header::CONTENT_TYPE
            && *name != header::CONTENT_LENGTH
            && *name != header::CONTENT_ENCODING
        {
            response.append_header((name.clone(), value.clone()));
        }
    }
    let response = response.json(ErrorBody { error: message });
    Ok(ErrorHandlerResponse::Response(
        ServiceResponse::new(req, response).map_into_right_body(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{body, test::TestRequest};

    #[actix_web::test]
    async fn plain_error_becomes_uncompressed_json() {
        let req = TestRequest::default().to_http_request();
        let res = HttpResponse::NotFound()
            .insert_header((header::CONTENT_ENCODING, "gzip"))
            .insert_header(("X-Frame-Options", "DENY"))
            .body("not here");
        let ErrorHandlerResponse::Response(res) = to_json_error(ServiceResponse::new(req, res)).unwrap() else {
            panic!("expected a rewritten response");
        };

        assert_eq!(res.status(), 404);
        assert!(res.headers().get(header::CONTENT_ENCODING).is_none());
        assert_eq!(res.headers().get("X-Frame-Options").unwrap(), "DENY");
        assert_eq!(res.headers().get(header::CONTENT_TYPE).unwrap(), "application/json");
        let bytes = body::to_bytes(res.into_body()).await.unwrap();
        assert_eq!(&bytes[..], br#"{"error":"Not Found"}"#);
    }

    #[actix_web::test]
    async fn json_errors_pass_through() {
        let req = TestRequest::default().to_http_request();
        let res = HttpResponse::Conflict().json(ErrorBody {
            error: "Account ID already exists".into(),
        });
        let ErrorHandlerResponse::Response(res) = to_json_error(ServiceResponse::new(req, res)).unwrap() else {
            panic!("expected the original response");
        };
        let bytes = body::to_bytes(res.into_body()).await.unwrap();
        assert_eq!(&bytes[..], br#"{"error":"Account ID already exists"}"#);
    }
}

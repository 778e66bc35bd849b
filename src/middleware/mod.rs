//! Request pipeline stages. Each stage either passes the request on or
//! answers it with an `AppError` response.

pub mod csrf;
pub mod errors;
pub mod headers;
pub mod rate_limit;
pub mod validation;

pub use csrf::verify_csrf;
pub use errors::normalize_errors;
pub use headers::{development_headers, security_headers};
pub use rate_limit::{auth_rate_limit, global_rate_limit, RateLimiter, RateLimiters};
pub use validation::{json_error_handler, validate_auth_input, validate_input};

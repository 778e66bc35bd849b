use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use actix_web::{
    body::{EitherBody, MessageBody},
    dev::{ServiceRequest, ServiceResponse},
    middleware::Next,
    web::Data,
    Error,
};

use crate::{config::RateLimitSettings, errors::AppError, AppState};

/// Hard cap on callers tracked by one limiter.
const MAX_TRACKED_CALLERS: usize = 10_000;

struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window request counter keyed by caller.
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    max_tracked: usize,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(settings: RateLimitSettings) -> Self {
        Self::with_capacity(settings, MAX_TRACKED_CALLERS)
    }

    fn with_capacity(settings: RateLimitSettings, max_tracked: usize) -> Self {
        Self {
            max_requests: settings.max_requests,
            window: settings.window,
            max_tracked,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> RateLimitSettings {
        RateLimitSettings {
            max_requests: self.max_requests,
            window: self.window,
        }
    }

    /// Counts one request for `key`. `Err` carries seconds until the window resets.
    pub fn check(&self, key: &str) -> Result<u32, u64> {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> Result<u32, u64> {
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        // a full table only admits callers it already tracks
        if !windows.contains_key(key) && windows.len() >= self.max_tracked {
            let window = self.window;
            windows.retain(|_, w| now.duration_since(w.started) < window);
            if windows.len() >= self.max_tracked {
                log::warn!(target: "audit", "rate limiter tracking {} callers, refusing new caller {}", windows.len(), key);
                return Err(window.as_secs().max(1));
            }
        }

        let entry = windows.entry(key.to_owned()).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.count = 0;
        }
        if entry.count >= self.max_requests {
            let remaining = self.window.saturating_sub(now.duration_since(entry.started));
            return Err(remaining.as_secs().max(1));
        }
        entry.count += 1;
        Ok(self.max_requests - entry.count)
    }
}

pub struct RateLimiters {
    pub global: RateLimiter,
    pub auth: RateLimiter,
}

/// Peer IP of the connection. Forwarding headers are client-controlled, so
/// they are only read when the deployment declares a trusted proxy.
fn caller_key(req: &ServiceRequest, trust_proxy: bool) -> String {
    if trust_proxy {
        if let Some(addr) = req.connection_info().realip_remote_addr() {
            return addr.to_owned();
        }
    }
    req.peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_owned())
}

fn limit(req: &ServiceRequest, pick: fn(&RateLimiters) -> &RateLimiter, scope: &str) -> Result<(), AppError> {
    let Some(state) = req.app_data::<Data<AppState>>() else {
        return Ok(());
    };
    let key = caller_key(req, state.config.trust_proxy);
    pick(&state.limiters).check(&key).map(|_| ()).map_err(|retry_after| {
        log::warn!(target: "audit", "{} rate limit exceeded for {} on {}", scope, key, req.path());
        AppError::RateLimited { retry_after }
    })
}

pub async fn global_rate_limit<B: MessageBody>(
    req: ServiceRequest,
    next: Next<B>,
) -> Result<ServiceResponse<EitherBody<B>>, Error> {
    if let Err(e) = limit(&req, |l| &l.global, "global") {
        return Ok(req.error_response(e).map_into_right_body());
    }
    Ok(next.call(req).await?.map_into_left_body())
}

pub async fn auth_rate_limit<B: MessageBody>(
    req: ServiceRequest,
    next: Next<B>,
) -> Result<ServiceResponse<EitherBody<B>>, Error> {
    if let Err(e) = limit(&req, |l| &l.auth, "auth") {
        return Ok(req.error_response(e).map_into_right_body());
    }
    Ok(next.call(req).await?.map_into_left_body())
}

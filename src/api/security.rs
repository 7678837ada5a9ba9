use super::*;
use std::time::{Duration, Instant};

pub(super) const DEFAULT_API_RATE_LIMIT_PER_SEC: u32 = 60;
const MAX_TRACKED_CLIENTS: usize = 1024;
const RATE_WINDOW: Duration = Duration::from_secs(1);
const IDLE_EVICTION: Duration = Duration::from_secs(10);

/// Optional shared token plus a per-client request budget.
#[derive(Clone)]
pub(super) struct ApiSecurity {
    token: Option<Arc<str>>,
    limiter: RateLimiter,
}

/// Fixed one second windows keyed by client address.
#[derive(Clone)]
pub(super) struct RateLimiter {
    per_window: u32,
    clients: Arc<Mutex<HashMap<String, RateWindow>>>,
}

struct RateWindow {
    opened: Instant,
    used: u32,
}

impl ApiSecurity {
    pub(super) fn new(token: Option<&str>, rate_limit_per_sec: u32) -> Self {
        Self {
            token: token.map(str::trim).filter(|t| !t.is_empty()).map(Arc::from),
            limiter: RateLimiter::new(rate_limit_per_sec),
        }
    }

    pub(super) fn from_env() -> Self {
        let token = std::env::var("PROMPTSCENE_API_TOKEN").ok();
        let rate_limit_per_sec = std::env::var("PROMPTSCENE_API_RATE_LIMIT_PER_SEC")
            .ok()
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(DEFAULT_API_RATE_LIMIT_PER_SEC);
        let security = Self::new(token.as_deref(), rate_limit_per_sec);
        if security.token.is_some() {
            info!("[promptscene api] Token authentication enabled");
        }
        security
    }

    fn authorized(&self, req: &Request) -> bool {
        let Some(expected) = self.token.as_deref() else {
            return true;
        };
        let header = |name: &str| {
            req.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
        };
        let bearer = header("authorization").map(|auth| {
            auth.strip_prefix("Bearer ")
                .or_else(|| auth.strip_prefix("bearer "))
                .unwrap_or(auth)
        });
        bearer == Some(expected) || header("x-api-key") == Some(expected)
    }
}

impl RateLimiter {
    fn new(per_window: u32) -> Self {
        Self {
            per_window: per_window.max(1),
            clients: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Counts one request for `client`; false once its window is spent.
    fn admit(&self, client: &str, now: Instant) -> bool {
        let mut clients = self
            .clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if clients.len() >= MAX_TRACKED_CLIENTS && !clients.contains_key(client) {
            clients.retain(|_, window| now.duration_since(window.opened) < IDLE_EVICTION);
        }
        let window = clients.entry(client.to_string()).or_insert(RateWindow {
            opened: now,
            used: 0,
        });
        if now.duration_since(window.opened) >= RATE_WINDOW {
            window.opened = now;
            window.used = 0;
        }
        window.used = window.used.saturating_add(1);
        window.used <= self.per_window
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

/// First hop of `x-forwarded-for`, then `x-real-ip`, else one shared local bucket.
fn client_key(req: &Request) -> String {
    let headers = req.headers();
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|chain| chain.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .unwrap_or("local")
        .to_string()
}

pub(super) async fn api_guard(
    State(security): State<ApiSecurity>,
    req: Request,
    next: Next,
) -> axum::response::Response {
    if !security.authorized(&req) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::err(
                "Unauthorized: set PROMPTSCENE_API_TOKEN and send Authorization: Bearer <token>",
            )),
        )
            .into_response();
    }

    let client = client_key(&req);
    if !security.limiter.admit(&client, Instant::now()) {
        warn!("[promptscene api] Rate limit exceeded for {client}");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ApiResponse::err("Rate limit exceeded")),
        )
            .into_response();
    }

    next.run(req).await
}

//! 凭据校验、浏览器会话与登录限流。

use axum::body::Body as AxumBody;
use axum::extract::{Extension, Form, Query, connect_info::ConnectInfo};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::{CookieJar, cookie::Cookie, cookie::SameSite};
use cookie::time::Duration as CookieDuration;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AUTH_COOKIE_NAME;
use crate::error::ApiError;
use crate::frontend::render_login;
use crate::http::{RequestScheme, client_identity, is_https_request};

/// 全局唯一的用户名/密码，启动时确定。
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// 两个值均做明文相等比较。
    pub fn authenticate(&self, username: &str, password: &str) -> bool {
        username == self.username && password == self.password
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug)]
pub struct AuthConfig {
    pub credentials: Credentials,
    pub sessions: Mutex<HashMap<String, SessionEntry>>,
    pub session_ttl: Duration,
    pub login_attempts: Mutex<HashMap<IpAddr, LoginAttempt>>,
    pub login_window: Duration,
    pub login_max_attempts: u32,
    pub login_lockout: Duration,
}

impl AuthConfig {
    pub fn new(credentials: Credentials, session_ttl: Duration) -> Self {
        Self {
            credentials,
            sessions: Mutex::new(HashMap::new()),
            session_ttl,
            login_attempts: Mutex::new(HashMap::new()),
            login_window: Duration::ZERO,
            login_max_attempts: 0,
            login_lockout: Duration::ZERO,
        }
    }

    /// 在 `window` 内失败 `max_attempts` 次后锁定登录。
    pub fn with_login_limits(mut self, max_attempts: u32, window: Duration, lockout: Duration) -> Self {
        self.login_max_attempts = max_attempts;
        self.login_window = window;
        self.login_lockout = lockout;
        self
    }
}

#[derive(Debug)]
pub struct SessionEntry {
    pub expires_at: Instant,
}

#[derive(Debug)]
pub struct LoginAttempt {
    pub window_start: Instant,
    pub failures: u32,
    pub locked_until: Option<Instant>,
}

/// 校验无头客户端发送的 `Username`/`Password` 请求头。
///
/// 不创建会话，每个请求都必须携带这两个请求头。
pub fn authenticate_headers(auth: &AuthConfig, headers: &HeaderMap) -> Result<(), ApiError> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
    };
    let username = header("Username");
    if auth.credentials.authenticate(username, header("Password")) {
        return Ok(());
    }
    warn!(username, "header authentication failed");
    Err(ApiError::Unauthorized("Invalid credentials".into()))
}

/// 浏览器路由的会话校验中间件。
pub async fn auth_middleware(
    Extension(auth): Extension<Arc<AuthConfig>>,
    jar: CookieJar,
    req: Request<AxumBody>,
    next: middleware::Next,
) -> Result<Response, ApiError> {
    let path = req.uri().path();
    if is_auth_exempt_path(path) {
        return Ok(next.run(req).await);
    }

    if let Some(cookie) = jar.get(AUTH_COOKIE_NAME)
        && is_session_valid(&auth, cookie.value()).await
    {
        return Ok(next.run(req).await);
    }

    if path == "/" {
        return Ok(Redirect::to("/login").into_response());
    }
    Err(ApiError::Unauthorized("login required".into()))
}

fn is_auth_exempt_path(path: &str) -> bool {
    matches!(path, "/login" | "/receive" | "/api/version") || path.starts_with("/static/")
}

#[derive(Deserialize)]
pub(crate) struct LoginForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[derive(Deserialize)]
pub(crate) struct LoginQuery {
    next: Option<String>,
}

/// 登录页面。
pub async fn login_page() -> Result<Response, ApiError> {
    Ok(render_login(None)?.into_response())
}

/// 表单登录：创建会话并重定向回应用。
pub async fn login_submit(
    Extension(auth): Extension<Arc<AuthConfig>>,
    Extension(scheme): Extension<RequestScheme>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<LoginQuery>,
    headers: HeaderMap,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Result<(CookieJar, Response), ApiError> {
    let client_ip = client_identity(&headers, Some(addr.ip())).unwrap_or_else(|| addr.ip());

    if let Some(retry_after) = check_login_rate_limit(&auth, client_ip).await {
        return Err(ApiError::TooManyRequests(retry_after));
    }

    if !auth.credentials.authenticate(&form.username, &form.password) {
        register_login_failure(&auth, client_ip).await;
        warn!(username = form.username, client_ip = %client_ip, "failed login attempt");
        let page = render_login(Some("Invalid credentials"))?;
        return Ok((jar, (StatusCode::UNAUTHORIZED, page).into_response()));
    }

    clear_login_failures(&auth, client_ip).await;

    let token = Uuid::new_v4().to_string();
    let expires_at = Instant::now() + auth.session_ttl;
    auth.sessions
        .lock()
        .await
        .insert(token.clone(), SessionEntry { expires_at });
    info!(username = form.username, "user logged in");

    let cookie = Cookie::build((AUTH_COOKIE_NAME, token))
        .path("/")
        .http_only(true)
        .secure(is_https_request(&headers, scheme))
        .same_site(SameSite::Strict)
        .max_age(CookieDuration::seconds(auth.session_ttl.as_secs() as i64))
        .build();
    let target = query
        .next
        .as_deref()
        .filter(|next| is_local_redirect(next))
        .unwrap_or("/");
    Ok((jar.add(cookie), Redirect::to(target).into_response()))
}

/// 登录后只跳转到站内绝对路径。
fn is_local_redirect(target: &str) -> bool {
    target.starts_with('/') && !target.starts_with("//") && !target.contains('\\')
}

/// 注销会话并返回登录页。
pub async fn logout(
    Extension(auth): Extension<Arc<AuthConfig>>,
    jar: CookieJar,
) -> (CookieJar, Redirect) {
    if let Some(cookie) = jar.get(AUTH_COOKIE_NAME) {
        auth.sessions.lock().await.remove(cookie.value());
        info!("user logged out");
    }

    (
        jar.remove(Cookie::build(AUTH_COOKIE_NAME).path("/").build()),
        Redirect::to("/login"),
    )
}

async fn is_session_valid(auth: &AuthConfig, token: &str) -> bool {
    let mut sessions = auth.sessions.lock().await;
    let now = Instant::now();
    match sessions.get(token) {
        Some(entry) if entry.expires_at > now => true,
        _ => {
            sessions.remove(token);
            false
        }
    }
}

async fn check_login_rate_limit(auth: &AuthConfig, ip: IpAddr) -> Option<u64> {
    if auth.login_max_attempts == 0 {
        return None;
    }

    let mut attempts = auth.login_attempts.lock().await;
    let now = Instant::now();
    let entry = attempts.get_mut(&ip)?;

    if let Some(locked_until) = entry.locked_until {
        if now < locked_until {
            return Some(locked_until.saturating_duration_since(now).as_secs().max(1));
        }
        attempts.remove(&ip);
    }
    None
}

async fn register_login_failure(auth: &AuthConfig, ip: IpAddr) {
    if auth.login_max_attempts == 0 {
        return;
    }

    let mut attempts = auth.login_attempts.lock().await;
    let now = Instant::now();
    let entry = attempts.entry(ip).or_insert(LoginAttempt {
        window_start: now,
        failures: 0,
        locked_until: None,
    });

    if now.duration_since(entry.window_start) > auth.login_window {
        entry.window_start = now;
        entry.failures = 0;
        entry.locked_until = None;
    }

    entry.failures = entry.failures.saturating_add(1);
    if entry.failures >= auth.login_max_attempts {
        entry.locked_until = Some(now + auth.login_lockout);
        warn!(client_ip = %ip, "login locked out");
    }
}

async fn clear_login_failures(auth: &AuthConfig, ip: IpAddr) {
    auth.login_attempts.lock().await.remove(&ip);
}

/// 清理过期会话。
pub async fn prune_expired_sessions(auth: &AuthConfig) {
    let now = Instant::now();
    auth.sessions
        .lock()
        .await
        .retain(|_, entry| entry.expires_at > now);
}

/// 清理已过统计窗口或锁定期的登录失败记录。
pub async fn prune_login_attempts(auth: &AuthConfig) {
    let now = Instant::now();
    auth.login_attempts.lock().await.retain(|_, entry| {
        if let Some(locked_until) = entry.locked_until {
            return locked_until > now;
        }
        now.duration_since(entry.window_start) <= auth.login_window
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn auth() -> AuthConfig {
        AuthConfig::new(Credentials::new("admin", "secret"), Duration::from_secs(60))
    }

    #[test]
    fn authenticate_is_exact_equality() {
        let credentials = Credentials::new("admin", "secret");
        assert!(credentials.authenticate("admin", "secret"));
        assert!(!credentials.authenticate("admin", "Secret"));
        assert!(!credentials.authenticate("Admin", "secret"));
        assert!(!credentials.authenticate("", ""));
    }

    #[test]
    fn debug_output_hides_password() {
        let rendered = format!("{:?}", Credentials::new("admin", "secret"));
        assert!(!rendered.contains("secret"));
    }

    #[test]
    fn header_authentication() {
        let auth = auth();
        let mut headers = HeaderMap::new();
        assert!(matches!(
            authenticate_headers(&auth, &headers),
            Err(ApiError::Unauthorized(_))
        ));

        headers.insert("Username", HeaderValue::from_static("admin"));
        headers.insert("Password", HeaderValue::from_static("wrong"));
        assert!(authenticate_headers(&auth, &headers).is_err());

        headers.insert("Password", HeaderValue::from_static("secret"));
        assert!(authenticate_headers(&auth, &headers).is_ok());
    }

    #[test]
    fn redirect_targets_must_stay_local() {
        assert!(is_local_redirect("/"));
        assert!(is_local_redirect("/get_files"));
        assert!(!is_local_redirect("//evil.example"));
        assert!(!is_local_redirect("https://evil.example"));
        assert!(!is_local_redirect("/\\evil.example"));
    }

    #[tokio::test]
    async fn repeated_failures_lock_out_client() {
        let auth = auth().with_login_limits(2, Duration::from_secs(60), Duration::from_secs(60));
        let ip: IpAddr = "10.0.0.1".parse().expect("ip");

        assert!(check_login_rate_limit(&auth, ip).await.is_none());
        register_login_failure(&auth, ip).await;
        assert!(check_login_rate_limit(&auth, ip).await.is_none());
        register_login_failure(&auth, ip).await;
        assert!(check_login_rate_limit(&auth, ip).await.is_some());

        let other: IpAddr = "10.0.0.2".parse().expect("ip");
        assert!(check_login_rate_limit(&auth, other).await.is_none());
    }

    #[tokio::test]
    async fn expired_sessions_are_rejected_and_pruned() {
        let auth = auth();
        let past = Instant::now() - Duration::from_millis(1);
        auth.sessions
            .lock()
            .await
            .insert("stale".into(), SessionEntry { expires_at: past });
        auth.sessions.lock().await.insert(
            "fresh".into(),
            SessionEntry {
                expires_at: Instant::now() + Duration::from_secs(60),
            },
        );

        prune_expired_sessions(&auth).await;
        assert_eq!(auth.sessions.lock().await.len(), 1);
        assert!(is_session_valid(&auth, "fresh").await);
        assert!(!is_session_valid(&auth, "stale").await);
    }
}

//! 命令行参数与服务配置默认值。

use clap::Parser;
use clap::builder::TypedValueParser;
use shadow_rs::formatcp;

use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

/// 存储目录中保存文本日志的保留文件名。
pub const TEXT_LOG_NAME: &str = "received_text.txt";
pub const TEXT_LOG_PLACEHOLDER: &str = "No text received yet.";
pub const DEFAULT_STORAGE_DIR: &str = "received_files";
pub const DEFAULT_AUTH_USER: &str = "admin";
pub const DEFAULT_AUTH_PASS: &str = "admin";
pub const AUTH_COOKIE_NAME: &str = "SKYDROP_SESSION";
pub const DEFAULT_SESSION_TTL_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_LOGIN_MAX_ATTEMPTS: u32 = 10;
pub const DEFAULT_LOGIN_WINDOW_SECS: u64 = 60;
pub const DEFAULT_LOGIN_LOCKOUT_SECS: u64 = 60;
pub const DEFAULT_MAX_CONTENT_LENGTH: u64 = 16 * 1024 * 1024;
pub const DEFAULT_RETENTION_LIMIT: usize = 10;
pub const DEFAULT_LOCK_WAIT_TIMEOUT_SECS: u64 = 5;
pub const SESSION_PRUNE_INTERVAL_SECS: u64 = 300;

/// 服务的命令行参数与环境变量配置。
#[derive(Parser, Debug)]
#[command(name = "skydrop", version = VERSION_INFO, about = "SkyDrop personal drop-box server")]
pub struct Args {
    #[arg(
        short = 's',
        long,
        env = "SKYDROP_STORAGE_DIR",
        default_value = DEFAULT_STORAGE_DIR,
        help = "Storage directory for received files and text"
    )]
    pub storage_dir: String,
    #[arg(
        long,
        env = "SKYDROP_AUTH_USER",
        default_value = DEFAULT_AUTH_USER,
        help = "Shared username for the web UI and /receive"
    )]
    pub auth_user: String,
    #[arg(
        long,
        env = "SKYDROP_AUTH_PASS",
        default_value = DEFAULT_AUTH_PASS,
        help = "Shared password for the web UI and /receive"
    )]
    pub auth_pass: String,
    #[arg(
        short = 'b',
        long,
        env = "SKYDROP_BIND",
        default_value = "0.0.0.0",
        help = "Bind address for HTTP/HTTPS"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "SKYDROP_HTTP_PORT",
        default_value_t = 5000,
        help = "HTTP port"
    )]
    pub http_port: u16,
    #[arg(
        short = 'P',
        long,
        env = "SKYDROP_HTTPS_PORT",
        help = "HTTPS port (HTTPS is disabled when unset)"
    )]
    pub https_port: Option<u16>,
    #[arg(short = 'c', long, env = "SKYDROP_TLS_CERT", help = "TLS cert path")]
    pub tls_cert: Option<String>,
    #[arg(short = 'k', long, env = "SKYDROP_TLS_KEY", help = "TLS key path")]
    pub tls_key: Option<String>,
    #[arg(long, env = "SKYDROP_CORS_ORIGINS", help = "Comma separated CORS origins")]
    pub cors_origins: Option<String>,
    #[arg(
        long,
        env = "SKYDROP_SESSION_TTL_SECS",
        default_value_t = DEFAULT_SESSION_TTL_SECS,
        help = "Session expiration in seconds"
    )]
    pub session_ttl_secs: u64,
    #[arg(
        long,
        env = "SKYDROP_LOGIN_MAX_ATTEMPTS",
        default_value_t = DEFAULT_LOGIN_MAX_ATTEMPTS,
        help = "Max failed logins per window before lockout (0 to disable)"
    )]
    pub login_max_attempts: u32,
    #[arg(
        long,
        env = "SKYDROP_LOGIN_WINDOW_SECS",
        default_value_t = DEFAULT_LOGIN_WINDOW_SECS,
        help = "Login attempt window in seconds"
    )]
    pub login_window_secs: u64,
    #[arg(
        long,
        env = "SKYDROP_LOGIN_LOCKOUT_SECS",
        default_value_t = DEFAULT_LOGIN_LOCKOUT_SECS,
        help = "Login lockout time after max attempts"
    )]
    pub login_lockout_secs: u64,
    #[arg(
        long,
        env = "SKYDROP_MAX_CONTENT_LENGTH",
        default_value_t = DEFAULT_MAX_CONTENT_LENGTH,
        help = "Max request body size in bytes"
    )]
    pub max_content_length: u64,
    #[arg(
        long,
        env = "SKYDROP_RETENTION_LIMIT",
        default_value_t = DEFAULT_RETENTION_LIMIT,
        value_parser = clap::value_parser!(u64).range(1..).map(|value| value as usize),
        help = "Number of files and text entries to keep"
    )]
    pub retention_limit: usize,
}

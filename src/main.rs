//! SkyDrop 服务入口。
//!
//! 个人投递箱：快捷指令和脚本把文件或文本推送到 `/receive`，网页端负责列表、
//! 重命名与下载。文件存放在单层目录中，每次写入后只保留最近的若干个。

mod auth;
mod background;
mod config;
mod error;
mod etag;
mod files;
mod frontend;
mod http;
mod locking;
mod logging;
mod naming;
mod receive;
mod retention;
mod router;
mod storage;
mod text_log;
mod tls;
mod version;

use axum::extract::Extension;
use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};

use crate::auth::{AuthConfig, Credentials};
use crate::background::spawn_background_tasks;
use crate::config::Args;
use crate::http::{RequestScheme, build_cors_layer};
use crate::receive::IngestConfig;
use crate::retention::RetentionPolicy;
use crate::storage::Storage;

shadow!(build);

/// 启动 SkyDrop 服务并阻塞直到退出。
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let storage = Arc::new(Storage::new(PathBuf::from(&args.storage_dir)));
    storage.ensure_root().await?;

    if args.auth_pass == config::DEFAULT_AUTH_PASS {
        warn!("using the default password, set SKYDROP_AUTH_PASS");
    }
    let auth_config = Arc::new(
        AuthConfig::new(
            Credentials::new(args.auth_user.clone(), args.auth_pass.clone()),
            Duration::from_secs(args.session_ttl_secs),
        )
        .with_login_limits(
            args.login_max_attempts,
            Duration::from_secs(args.login_window_secs),
            Duration::from_secs(args.login_lockout_secs),
        ),
    );
    let ingest = Arc::new(IngestConfig {
        max_content_length: args.max_content_length,
        retention: RetentionPolicy::new(args.retention_limit),
    });
    info!(
        storage_dir = %storage.root_path().display(),
        retention = args.retention_limit,
        "storage ready"
    );

    let mut app = router::build_router(storage, auth_config.clone(), ingest);
    if let Some(cors_layer) = build_cors_layer(args.cors_origins.as_deref()) {
        app = app.layer(cors_layer);
    }

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let http_addr = SocketAddr::new(host, args.http_port);
    let handle = Handle::new();

    let https = match args.https_port {
        Some(port) => {
            let tls_config = tls::build_rustls_config(&args, host).await?;
            Some((SocketAddr::new(host, port), tls_config))
        }
        None => None,
    };

    info!("starting HTTP server at {}", http_addr);
    let http_app = app.clone().layer(Extension(RequestScheme::Http));
    let http_server = axum_server::bind(http_addr)
        .handle(handle.clone())
        .serve(http_app.into_make_service_with_connect_info::<SocketAddr>());

    let https_app = app.layer(Extension(RequestScheme::Https));
    let https_handle = handle.clone();
    let https_server = async move {
        match https {
            Some((https_addr, tls_config)) => {
                info!("starting HTTPS server at {}", https_addr);
                axum_server::bind_rustls(https_addr, tls_config)
                    .handle(https_handle)
                    .serve(https_app.into_make_service_with_connect_info::<SocketAddr>())
                    .await
            }
            None => std::future::pending().await,
        }
    };

    spawn_background_tasks(auth_config);
    tokio::select! {
        result = http_server => result?,
        result = https_server => result?,
        _ = shutdown_signal(handle) => {}
    }

    Ok(())
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("received termination signal, shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}

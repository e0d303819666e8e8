//! 路由表与公共中间件。

use axum::extract::{DefaultBodyLimit, Extension};
use axum::http::Request;
use axum::routing::{get, post};
use axum::{Router, middleware};
use std::sync::Arc;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info_span};

use crate::auth::{self, AuthConfig};
use crate::files;
use crate::frontend;
use crate::http::{add_security_headers, request_client_identity};
use crate::receive::{self, IngestConfig};
use crate::storage::Storage;
use crate::version;

/// 构建应用路由，`RequestScheme` 扩展由调用方按监听器添加。
pub fn build_router(
    storage: Arc<Storage>,
    auth_config: Arc<AuthConfig>,
    ingest: Arc<IngestConfig>,
) -> Router {
    let body_limit = usize::try_from(ingest.max_content_length).unwrap_or(usize::MAX);

    Router::new()
        .route("/", get(frontend::serve_index))
        .route("/login", get(auth::login_page).post(auth::login_submit))
        .route("/logout", get(auth::logout))
        .route("/receive", post(receive::receive))
        .route("/upload_file", post(files::upload_file))
        .route("/rename_file", post(files::rename_file))
        .route("/get_files", get(files::list_files))
        .route("/get_text", get(files::get_text))
        .route("/received_files/{name}", get(files::download_file))
        .route("/api/version", get(version::get_version_info))
        .fallback(frontend::serve_static)
        .layer(middleware::from_fn(auth::auth_middleware))
        .layer(middleware::from_fn(add_security_headers))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let client_ip = request_client_identity(request)
                        .map(|ip| ip.to_string())
                        .unwrap_or_else(|| "unknown".to_string());
                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(Extension(storage))
        .layer(Extension(auth_config))
        .layer(Extension(ingest))
}

//! 内嵌前端：首页、登录页与静态资源。

use axum::body::Body as AxumBody;
use axum::http::{HeaderMap, HeaderValue, Request, header};
use axum::response::{Html, IntoResponse, Response};
use rust_embed::RustEmbed;

use crate::error::ApiError;

#[derive(RustEmbed)]
#[folder = "frontend/"]
struct FrontendAssets;

const ERROR_SLOT: &str = "{{error}}";

/// 首页（需要会话）。
pub async fn serve_index() -> Result<Response, ApiError> {
    load_embedded_asset("index.html")?.ok_or_else(|| ApiError::NotFound("Not found".into()))
}

/// `/static/*` 静态资源的兜底处理。
pub async fn serve_static(req: Request<AxumBody>) -> Result<Response, ApiError> {
    let path = req.uri().path().trim_start_matches('/');
    if path.starts_with("static/")
        && let Some(response) = load_embedded_asset(path)?
    {
        return Ok(response);
    }
    Err(ApiError::NotFound("Not found".into()))
}

/// 渲染登录页，可附带错误提示。
pub fn render_login(error: Option<&str>) -> Result<Html<String>, ApiError> {
    let asset = FrontendAssets::get("login.html")
        .ok_or_else(|| ApiError::Internal("login page missing".into()))?;
    let template = String::from_utf8_lossy(&asset.data);
    let slot = error
        .map(|message| format!(r#"<p class="error">{}</p>"#, escape_html(message)))
        .unwrap_or_default();
    Ok(Html(template.replace(ERROR_SLOT, &slot)))
}

fn load_embedded_asset(path: &str) -> Result<Option<Response>, ApiError> {
    let Some(asset) = FrontendAssets::get(path) else {
        return Ok(None);
    };
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.essence_str())
            .map_err(|_| ApiError::Internal("invalid mime type".into()))?,
    );
    Ok(Some(
        (headers, AxumBody::from(asset.data.into_owned())).into_response(),
    ))
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

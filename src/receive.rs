//! `POST /receive`：供快捷指令与脚本使用的请求头认证接收接口。
//!
//! 每个请求只分类一次为 [`Payload`]，优先级依次为：multipart 文件、
//! 由 `X-File-Name` 命名的原始请求体、`text` 表单字段。没有文件字段的
//! multipart 请求在设置了 `X-File-Name` 时仍按原始请求体保存。

use axum::body::{Body as AxumBody, Bytes};
use axum::extract::{Extension, Form, FromRequest, Multipart};
use axum::http::{HeaderMap, Request, StatusCode};
use axum_extra::headers::{ContentLength, ContentType, HeaderMapExt};
use mime_guess::{Mime, mime};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::auth::{AuthConfig, authenticate_headers};
use crate::error::ApiError;
use crate::naming;
use crate::retention::RetentionPolicy;
use crate::storage::Storage;
use crate::text_log;

pub const FILE_NAME_HEADER: &str = "X-File-Name";
pub const FILE_EXTENSION_HEADER: &str = "X-File-Extension";
const TEXT_FIELD: &str = "text";

/// 所有写文件路径共用的限制。
#[derive(Debug, Clone, Copy)]
pub struct IngestConfig {
    pub max_content_length: u64,
    pub retention: RetentionPolicy,
}

/// `/receive` 请求携带的内容。
#[derive(Debug)]
pub enum Payload {
    MultipartFile {
        raw_name: String,
        data: Bytes,
    },
    RawFile {
        raw_name: String,
        explicit_ext: Option<String>,
        content_type: Option<Mime>,
        body: AxumBody,
    },
    Text(String),
    Empty,
}

#[derive(Deserialize)]
pub(crate) struct TextForm {
    text: Option<String>,
}

pub enum FileSource {
    Bytes(Bytes),
    Body(AxumBody),
}

/// 接收接口。
pub async fn receive(
    Extension(storage): Extension<Arc<Storage>>,
    Extension(auth): Extension<Arc<AuthConfig>>,
    Extension(ingest): Extension<Arc<IngestConfig>>,
    request: Request<AxumBody>,
) -> Result<(StatusCode, &'static str), ApiError> {
    authenticate_headers(&auth, request.headers())?;

    match classify(request, ingest.max_content_length).await? {
        Payload::MultipartFile { raw_name, data } => {
            let name = naming::resolve(&raw_name, None, None)?;
            info!(name, "processing multipart file");
            persist_file(&storage, &ingest, &name, FileSource::Bytes(data)).await?;
            Ok((StatusCode::OK, "File received successfully"))
        }
        Payload::RawFile {
            raw_name,
            explicit_ext,
            content_type,
            body,
        } => {
            let name = naming::resolve(&raw_name, explicit_ext.as_deref(), content_type.as_ref())?;
            info!(name, content_type = ?content_type, "processing raw file");
            persist_file(&storage, &ingest, &name, FileSource::Body(body)).await?;
            Ok((StatusCode::OK, "File received successfully"))
        }
        Payload::Text(text) => {
            let entries = text_log::append(&storage, ingest.retention.max_items(), &text).await?;
            info!(entries, "text content saved");
            Ok((StatusCode::OK, "Text received successfully"))
        }
        Payload::Empty => {
            warn!("no content received");
            Err(ApiError::BadRequest("No content received".into()))
        }
    }
}

/// 判定请求走哪个分支，只有 multipart 与表单请求会在此消费请求体。
pub async fn classify(request: Request<AxumBody>, max_size: u64) -> Result<Payload, ApiError> {
    let headers = request.headers();
    let content_type: Option<Mime> = headers.typed_get::<ContentType>().map(Mime::from);
    let declared_len = headers
        .typed_get::<ContentLength>()
        .map(|ContentLength(len)| len)
        .unwrap_or(0);
    let header_name = header_value(headers, FILE_NAME_HEADER);
    let explicit_ext = header_value(headers, FILE_EXTENSION_HEADER);

    if content_type.as_ref().is_some_and(is_multipart) {
        let Some(raw_name) = header_name.filter(|_| declared_len > 0) else {
            let mut multipart = Multipart::from_request(request, &())
                .await
                .map_err(|rejection| rejection_error(rejection.status(), rejection.body_text(), max_size))?;
            return classify_multipart(&mut multipart, max_size).await;
        };
        return classify_named_multipart(request, raw_name, explicit_ext, max_size).await;
    }

    if let Some(raw_name) = header_name
        && declared_len > 0
    {
        return Ok(Payload::RawFile {
            raw_name,
            explicit_ext,
            content_type,
            body: request.into_body(),
        });
    }

    if content_type
        .as_ref()
        .is_some_and(|mime| mime.essence_str() == mime::APPLICATION_WWW_FORM_URLENCODED.essence_str())
    {
        let Form(form) = Form::<TextForm>::from_request(request, &())
            .await
            .map_err(|rejection| rejection_error(rejection.status(), rejection.body_text(), max_size))?;
        return Ok(text_payload(form.text));
    }

    Ok(Payload::Empty)
}

async fn classify_multipart(multipart: &mut Multipart, max_size: u64) -> Result<Payload, ApiError> {
    let mut text = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| rejection_error(err.status(), err.body_text(), max_size))?
    {
        if let Some(raw_name) = field.file_name().filter(|name| !name.is_empty()) {
            let raw_name = raw_name.to_string();
            let data = field
                .bytes()
                .await
                .map_err(|err| rejection_error(err.status(), err.body_text(), max_size))?;
            return Ok(Payload::MultipartFile { raw_name, data });
        }
        if text.is_none() && field.name() == Some(TEXT_FIELD) {
            text = Some(
                field
                    .text()
                    .await
                    .map_err(|err| rejection_error(err.status(), err.body_text(), max_size))?,
            );
        }
    }
    Ok(text_payload(text))
}

/// 带 `X-File-Name` 的 multipart 请求：先缓存请求体，有文件字段时按文件字段保存，
/// 否则整个请求体按原始文件保存，`text` 字段不再参与判断。
async fn classify_named_multipart(
    request: Request<AxumBody>,
    raw_name: String,
    explicit_ext: Option<String>,
    max_size: u64,
) -> Result<Payload, ApiError> {
    let (parts, body) = request.into_parts();
    let data = Bytes::from_request(Request::from_parts(parts.clone(), body), &())
        .await
        .map_err(|rejection| rejection_error(rejection.status(), rejection.body_text(), max_size))?;

    let replay = Request::from_parts(parts, AxumBody::from(data.clone()));
    if let Ok(mut multipart) = Multipart::from_request(replay, &()).await
        && let Ok(payload @ Payload::MultipartFile { .. }) =
            classify_multipart(&mut multipart, max_size).await
    {
        return Ok(payload);
    }

    debug!(raw_name, bytes = data.len(), "multipart body without file field, storing raw");
    Ok(Payload::RawFile {
        raw_name,
        explicit_ext,
        content_type: None,
        body: AxumBody::from(data),
    })
}

fn text_payload(text: Option<String>) -> Payload {
    match text.map(|text| text_log::normalize_entry(&text)) {
        Some(entry) if !entry.is_empty() => Payload::Text(entry),
        _ => Payload::Empty,
    }
}

fn is_multipart(mime: &Mime) -> bool {
    mime.type_() == mime::MULTIPART && mime.subtype() == mime::FORM_DATA
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn rejection_error(status: StatusCode, detail: String, max_size: u64) -> ApiError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        return ApiError::PayloadTooLarge(max_size);
    }
    ApiError::BadRequest(detail)
}

/// 以已解析的文件名写入文件，随后执行一次保留清理。
///
/// 清理结果不影响返回值，此时写入已经成功。
pub async fn persist_file(
    storage: &Storage,
    ingest: &IngestConfig,
    name: &str,
    source: FileSource,
) -> Result<u64, ApiError> {
    let size = match source {
        FileSource::Bytes(data) => {
            if data.len() as u64 > ingest.max_content_length {
                return Err(ApiError::PayloadTooLarge(ingest.max_content_length));
            }
            storage.write_bytes(name, &data).await?
        }
        FileSource::Body(body) => {
            storage
                .write_stream(name, body, ingest.max_content_length)
                .await?
        }
    };
    info!(name, size, "saved file");

    let evicted = ingest.retention.enforce(storage).await;
    if !evicted.is_empty() {
        debug!(count = evicted.len(), "retention pass evicted files");
    }
    Ok(size)
}

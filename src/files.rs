//! 需要会话的接口：网页上传、重命名、文件列表、文本日志与下载。

use axum::body::Body as AxumBody;
use axum::extract::{Extension, Form, Multipart, Path};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json as JsonResponse, Response};
use httpdate::fmt_http_date;
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use crate::config::TEXT_LOG_PLACEHOLDER;
use crate::error::ApiError;
use crate::etag::{etag_from_metadata, is_not_modified};
use crate::naming;
use crate::receive::{FileSource, IngestConfig, persist_file};
use crate::storage::{Storage, StoredFile};
use crate::text_log;

#[derive(Deserialize)]
pub(crate) struct RenameForm {
    old_name: Option<String>,
    new_name: Option<String>,
}

/// 通过 multipart 的 `file` 字段上传文件。
pub async fn upload_file(
    Extension(storage): Extension<Arc<Storage>>,
    Extension(ingest): Extension<Arc<IngestConfig>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, &'static str), ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(|err| {
        warn!(error = %err, "failed to read multipart field");
        ApiError::BadRequest(err.body_text())
    })? {
        if field.name() != Some("file") {
            continue;
        }
        let Some(raw_name) = field.file_name().filter(|name| !name.is_empty()) else {
            return Err(ApiError::BadRequest("No selected file".into()));
        };
        let name = naming::resolve(raw_name, None, None)?;
        let data = field
            .bytes()
            .await
            .map_err(|err| ApiError::BadRequest(err.body_text()))?;
        persist_file(&storage, &ingest, &name, FileSource::Bytes(data)).await?;
        info!(name, "file uploaded via web");
        return Ok((StatusCode::OK, "File uploaded successfully"));
    }
    Err(ApiError::BadRequest("No file part".into()))
}

/// 重命名文件，不会覆盖已存在的文件。
pub async fn rename_file(
    Extension(storage): Extension<Arc<Storage>>,
    Form(form): Form<RenameForm>,
) -> Result<(StatusCode, &'static str), ApiError> {
    let (Some(old_name), Some(new_name)) = (
        form.old_name.filter(|name| !name.is_empty()),
        form.new_name.filter(|name| !name.is_empty()),
    ) else {
        return Err(ApiError::BadRequest("Missing filename".into()));
    };

    let old_name = naming::resolve(&old_name, None, None)?;
    let new_name = naming::resolve(&new_name, None, None)?;
    storage.rename(&old_name, &new_name).await?;
    info!(old_name, new_name, "file renamed");
    Ok((StatusCode::OK, "File renamed successfully"))
}

/// 列出已存文件，最新的在前。
pub async fn list_files(
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<JsonResponse<Vec<StoredFile>>, ApiError> {
    let files = storage.list_files().await?;
    Ok(JsonResponse(files))
}

/// 原样返回文本日志。
pub async fn get_text(Extension(storage): Extension<Arc<Storage>>) -> Result<String, ApiError> {
    let text = text_log::read(&storage).await?;
    Ok(text.unwrap_or_else(|| TEXT_LOG_PLACEHOLDER.to_string()))
}

/// 按字节原样流式返回文件。
pub async fn download_file(
    Path(name): Path<String>,
    request_headers: HeaderMap,
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<Response, ApiError> {
    let name = naming::base_name(&name)?;
    let (file, metadata) = storage.open(&name).await.map_err(|err| {
        warn!(name, error = %err, "download failed");
        ApiError::from(err)
    })?;

    let etag = etag_from_metadata(&metadata);
    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::ETAG,
        HeaderValue::from_str(&etag).map_err(|_| ApiError::Internal("invalid etag".into()))?,
    );
    if is_not_modified(&request_headers, &etag) {
        return Ok((StatusCode::NOT_MODIFIED, response_headers).into_response());
    }

    let mime = mime_guess::from_path(&name).first_or_octet_stream();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.essence_str())
            .map_err(|_| ApiError::Internal("invalid mime type".into()))?,
    );
    response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(metadata.len()));
    if let Ok(modified) = metadata.modified()
        && let Ok(value) = HeaderValue::from_str(&fmt_http_date(modified))
    {
        response_headers.insert(header::LAST_MODIFIED, value);
    }

    info!(name, size = metadata.len(), "download file");
    let stream = ReaderStream::new(file);
    Ok((
        StatusCode::OK,
        response_headers,
        AxumBody::from_stream(stream),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TEXT_LOG_NAME;
    use crate::router::tests::{TestApp, multipart_body, test_app};
    use crate::storage::tests::write_aged;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn send(app: &TestApp, request: Request<AxumBody>) -> (StatusCode, HeaderMap, Vec<u8>) {
        let response = app
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible");
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        (status, headers, bytes.to_vec())
    }

    fn rename_request(app: &TestApp, body: &'static str) -> Request<AxumBody> {
        Request::post("/rename_file")
            .header(header::COOKIE, app.session_cookie())
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(AxumBody::from(body))
            .expect("request")
    }

    #[tokio::test]
    async fn session_routes_require_login() {
        let app = test_app();
        for path in ["/get_files", "/get_text", "/received_files/a.txt"] {
            let request = Request::get(path).body(AxumBody::empty()).expect("request");
            let (status, _, _) = send(&app, request).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{path}");
        }

        let request = Request::get("/").body(AxumBody::empty()).expect("request");
        let (status, headers, _) = send(&app, request).await;
        assert!(status.is_redirection());
        assert_eq!(headers[header::LOCATION], "/login");
    }

    #[tokio::test]
    async fn rename_moves_content_and_reports_conflicts() {
        let app = test_app();
        app.storage.write_bytes("a.txt", b"alpha").await.expect("write");
        app.storage.write_bytes("b.txt", b"beta").await.expect("write");

        let (status, _, _) = send(&app, rename_request(&app, "old_name=a.txt&new_name=b.txt")).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _, _) =
            send(&app, rename_request(&app, "old_name=missing.txt&new_name=c.txt")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _, _) = send(&app, rename_request(&app, "old_name=a.txt")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) =
            send(&app, rename_request(&app, "old_name=a.txt&new_name=..%2F..%2Fc.txt")).await;
        assert_eq!(status, StatusCode::OK);

        let request = Request::get("/received_files/a.txt")
            .header(header::COOKIE, app.session_cookie())
            .body(AxumBody::empty())
            .expect("request");
        let (status, _, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let request = Request::get("/received_files/c.txt")
            .header(header::COOKIE, app.session_cookie())
            .body(AxumBody::empty())
            .expect("request");
        let (status, _, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"alpha");
    }

    #[tokio::test]
    async fn rename_onto_text_log_is_rejected() {
        let app = test_app();
        app.storage.write_bytes("a.txt", b"alpha").await.expect("write");
        let (status, _, _) =
            send(&app, rename_request(&app, "old_name=a.txt&new_name=received_text.txt")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(app.storage.root_path().join("a.txt").exists());
    }

    #[tokio::test]
    async fn get_files_lists_newest_first_without_text_log() {
        let app = test_app();
        write_aged(&app.storage, "older.png", 600);
        write_aged(&app.storage, "newer.txt", 5);
        write_aged(&app.storage, TEXT_LOG_NAME, 0);

        let request = Request::get("/get_files")
            .header(header::COOKIE, app.session_cookie())
            .body(AxumBody::empty())
            .expect("request");
        let (status, _, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);

        let files: Vec<serde_json::Value> = serde_json::from_slice(&body).expect("json");
        let names: Vec<_> = files.iter().map(|file| file["name"].as_str().unwrap_or("")).collect();
        assert_eq!(names, ["newer.txt", "older.png"]);
        assert!(files[0]["mtime"].as_f64().expect("mtime") > files[1]["mtime"].as_f64().expect("mtime"));
        assert_eq!(files[1]["mime_type"], "image/png");
    }

    #[tokio::test]
    async fn get_text_falls_back_to_placeholder() {
        let app = test_app();
        let request = || {
            Request::get("/get_text")
                .header(header::COOKIE, app.session_cookie())
                .body(AxumBody::empty())
                .expect("request")
        };
        let (status, _, body) = send(&app, request()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, TEXT_LOG_PLACEHOLDER.as_bytes());

        text_log::append(&app.storage, 10, "hello").await.expect("append");
        let (_, _, body) = send(&app, request()).await;
        assert_eq!(body, b"hello\n");
    }

    #[tokio::test]
    async fn browser_upload_writes_and_trims() {
        let app = test_app();
        for age in 1..=10u64 {
            write_aged(&app.storage, &format!("old{age:02}"), age * 60);
        }
        let (content_type, body) = multipart_body(&[("file", Some("photos/pic.png"), "png")]);
        let request = Request::post("/upload_file")
            .header(header::COOKIE, app.session_cookie())
            .header(header::CONTENT_TYPE, content_type)
            .body(AxumBody::from(body))
            .expect("request");
        let (status, _, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK, "{}", String::from_utf8_lossy(&body));

        assert!(app.storage.root_path().join("pic.png").exists());
        assert!(!app.storage.root_path().join("old10").exists());
        assert_eq!(app.storage.list_files().await.expect("list").len(), 10);
    }

    #[tokio::test]
    async fn browser_upload_without_file_is_bad_request() {
        let app = test_app();
        let (content_type, body) = multipart_body(&[("note", None, "hi")]);
        let request = Request::post("/upload_file")
            .header(header::COOKIE, app.session_cookie())
            .header(header::CONTENT_TYPE, content_type)
            .body(AxumBody::from(body))
            .expect("request");
        let (status, _, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, b"No file part");
    }

    #[tokio::test]
    async fn download_revalidates_with_etag() {
        let app = test_app();
        app.storage.write_bytes("doc.pdf", b"%PDF-1.7").await.expect("write");
        let request = Request::get("/received_files/doc.pdf")
            .header(header::COOKIE, app.session_cookie())
            .body(AxumBody::empty())
            .expect("request");
        let (status, headers, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"%PDF-1.7");
        assert_eq!(headers[header::CONTENT_TYPE], "application/pdf");
        assert!(headers.contains_key(header::LAST_MODIFIED));

        let request = Request::get("/received_files/doc.pdf")
            .header(header::COOKIE, app.session_cookie())
            .header(header::IF_NONE_MATCH, headers[header::ETAG].clone())
            .body(AxumBody::empty())
            .expect("request");
        let (status, _, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::NOT_MODIFIED);
    }
}

//! 文件名解析：把客户端提供的文件名转换为安全的单层存储名。
//!
//! 解析结果不含路径分隔符，不是 `.`/`..`，也不会与文本日志的保留名冲突。

use mime_guess::Mime;
use std::fmt;

use crate::config::TEXT_LOG_NAME;

/// 常见类型的首选扩展名，`mime_guess` 会给出多个候选。
const CANONICAL_EXTENSIONS: &[(&str, &str)] = &[
    ("application/json", "json"),
    ("application/pdf", "pdf"),
    ("application/zip", "zip"),
    ("audio/mp4", "m4a"),
    ("audio/mpeg", "mp3"),
    ("audio/wav", "wav"),
    ("audio/x-wav", "wav"),
    ("image/gif", "gif"),
    ("image/heic", "heic"),
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/svg+xml", "svg"),
    ("image/webp", "webp"),
    ("text/csv", "csv"),
    ("text/html", "html"),
    ("text/markdown", "md"),
    ("text/plain", "txt"),
    ("video/mp4", "mp4"),
    ("video/quicktime", "mov"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidName {
    Empty,
    Reserved,
    Extension(String),
}

impl fmt::Display for InvalidName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidName::Empty => f.write_str("Invalid filename"),
            InvalidName::Reserved => write!(f, "{TEXT_LOG_NAME} is a reserved name"),
            InvalidName::Extension(ext) => write!(f, "Invalid file extension: {ext}"),
        }
    }
}

impl std::error::Error for InvalidName {}

/// 去掉所有目录部分，`/` 与 `\` 都视为分隔符。
///
/// `"../../etc/passwd"` 解析为 `"passwd"`。
pub fn base_name(raw: &str) -> Result<String, InvalidName> {
    let name = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    if name.is_empty() || name == "." || name == ".." || name.contains('\0') {
        return Err(InvalidName::Empty);
    }
    Ok(name.to_string())
}

/// 解析上传文件名，按显式扩展名或 Content-Type 补全扩展名。
///
/// 显式扩展名优先于 Content-Type；`application/octet-stream` 与未知类型不补全。
pub fn resolve(
    raw: &str,
    explicit_ext: Option<&str>,
    content_type: Option<&Mime>,
) -> Result<String, InvalidName> {
    let mut name = base_name(raw)?;

    let explicit_ext = explicit_ext
        .map(|ext| ext.trim().trim_start_matches('.'))
        .filter(|ext| !ext.is_empty());

    let extension = match explicit_ext {
        Some(ext) => {
            if ext.contains(['/', '\\', '\0']) {
                return Err(InvalidName::Extension(ext.to_string()));
            }
            Some(ext)
        }
        None => content_type.and_then(extension_for_mime),
    };

    if let Some(ext) = extension
        && !has_extension(&name, ext)
    {
        name = format!("{name}.{ext}");
    }

    if name == TEXT_LOG_NAME {
        return Err(InvalidName::Reserved);
    }
    Ok(name)
}

/// MIME 类型对应的标准扩展名（不含点）。
pub fn extension_for_mime(mime: &Mime) -> Option<&'static str> {
    let essence = mime.essence_str().to_ascii_lowercase();
    if essence == mime_guess::mime::APPLICATION_OCTET_STREAM.essence_str() {
        return None;
    }
    CANONICAL_EXTENSIONS
        .iter()
        .find(|(candidate, _)| *candidate == essence)
        .map(|(_, ext)| *ext)
        .or_else(|| {
            mime_guess::get_mime_extensions_str(&essence)
                .and_then(|extensions| extensions.first().copied())
        })
}

fn has_extension(name: &str, ext: &str) -> bool {
    name.to_ascii_lowercase()
        .ends_with(&format!(".{}", ext.to_ascii_lowercase()))
}

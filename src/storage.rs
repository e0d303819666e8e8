//! 单层存储目录：列表、写入、重命名与删除。

use axum::Error as AxumError;
use axum::body::Body as AxumBody;
use chrono::{DateTime, Utc};
use futures_util::stream::StreamExt;
use http_body_util::BodyExt;
use serde::Serialize;
use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, ErrorKind};
use tracing::debug;

use crate::config::{DEFAULT_LOCK_WAIT_TIMEOUT_SECS, TEXT_LOG_NAME};
use crate::locking::{LockManager, NameGuard};
use crate::naming::InvalidName;

#[derive(Debug)]
pub struct Storage {
    root: PathBuf,
    locks: LockManager,
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            locks: LockManager::new(),
        }
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// 已解析名称对应的路径，名称来自 `naming`，只有一级。
    fn entry_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// 校验条目不是符号链接后返回路径。
    ///
    /// 元数据为 `None` 表示条目尚不存在。
    async fn checked_entry(&self, name: &str) -> Result<(PathBuf, Option<Metadata>), StorageError> {
        let path = self.entry_path(name);
        match fs::symlink_metadata(&path).await {
            Ok(metadata) if metadata.file_type().is_symlink() => {
                Err(StorageError::InvalidName(InvalidName::Empty))
            }
            Ok(metadata) => Ok((path, Some(metadata))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok((path, None)),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    pub(crate) async fn lock(&self, names: &[&str]) -> Result<NameGuard, StorageError> {
        self.locks
            .lock_names(names, Duration::from_secs(DEFAULT_LOCK_WAIT_TIMEOUT_SECS))
            .await
            .map_err(|_| StorageError::Locked(names.join(", ")))
    }

    /// 列出除文本日志外的所有文件，最新的在前。
    ///
    /// 使用稳定排序，修改时间相同的条目保持目录遍历顺序。
    pub async fn list_files(&self) -> Result<Vec<StoredFile>, StorageError> {
        let mut dir = fs::read_dir(&self.root).await?;
        let mut files = Vec::new();

        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name == TEXT_LOG_NAME {
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                // 遍历与读取元数据之间已被删除
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(StorageError::Io(err)),
            };
            if !metadata.is_file() {
                continue;
            }
            files.push(StoredFile::from_metadata(name, &metadata));
        }

        files.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));
        Ok(files)
    }

    /// 创建或覆盖写入 `name`。
    pub async fn write_bytes(&self, name: &str, data: &[u8]) -> Result<u64, StorageError> {
        let (path, _) = self.checked_entry(name).await?;
        fs::write(&path, data).await?;
        Ok(data.len() as u64)
    }

    /// 把请求体流式写入 `name`，超过 `max_size` 时删除文件并停止。
    ///
    /// 读流失败时已写入的部分保留在磁盘上。
    pub async fn write_stream(
        &self,
        name: &str,
        body: AxumBody,
        max_size: u64,
    ) -> Result<u64, StorageError> {
        let (path, _) = self.checked_entry(name).await?;
        let mut file = File::create(&path).await?;
        let mut data_stream = BodyExt::into_data_stream(body);
        let mut total_written: u64 = 0;

        while let Some(chunk) = data_stream.next().await {
            let chunk = chunk.map_err(|err: AxumError| io::Error::other(err.to_string()))?;
            if chunk.is_empty() {
                continue;
            }
            total_written += chunk.len() as u64;
            if total_written > max_size {
                drop(file);
                let _ = fs::remove_file(&path).await;
                return Err(StorageError::TooLarge(max_size));
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        debug!(name, bytes = total_written, "stream written");
        Ok(total_written)
    }

    /// 把 `old` 重命名为 `new`，不会覆盖已有条目。
    pub async fn rename(&self, old: &str, new: &str) -> Result<(), StorageError> {
        let _guard = self.lock(&[old, new]).await?;
        let (old_path, old_meta) = self.checked_entry(old).await?;
        match old_meta {
            Some(metadata) if metadata.is_file() => {}
            _ => return Err(StorageError::NotFound(old.to_string())),
        }
        let (new_path, new_meta) = self.checked_entry(new).await?;
        if new_meta.is_some() {
            return Err(StorageError::AlreadyExists(new.to_string()));
        }
        fs::rename(old_path, new_path).await?;
        Ok(())
    }

    /// 删除 `name`，已不存在时返回 `false`。
    pub async fn remove(&self, name: &str) -> Result<bool, StorageError> {
        match fs::remove_file(self.entry_path(name)).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    /// 打开文件用于读取。
    pub async fn open(&self, name: &str) -> Result<(File, Metadata), StorageError> {
        let (path, metadata) = self.checked_entry(name).await?;
        match metadata {
            Some(metadata) if metadata.is_file() => {
                let file = File::open(&path).await?;
                Ok((file, metadata))
            }
            _ => Err(StorageError::NotFound(name.to_string())),
        }
    }

    /// 读取整个条目，不存在时返回 `None`。
    pub async fn read_optional(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let (path, metadata) = self.checked_entry(name).await?;
        if metadata.is_none() {
            return Ok(None);
        }
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StorageError::Io(err)),
        }
    }
}

fn format_timestamp(duration: Duration) -> String {
    let timestamp = UNIX_EPOCH + duration;
    let datetime: DateTime<Utc> = timestamp.into();
    datetime.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[derive(Debug)]
pub enum StorageError {
    InvalidName(InvalidName),
    NotFound(String),
    AlreadyExists(String),
    Locked(String),
    TooLarge(u64),
    Io(io::Error),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::InvalidName(err) => write!(f, "{err}"),
            StorageError::NotFound(name) => write!(f, "{name} not found"),
            StorageError::AlreadyExists(name) => write!(f, "{name} already exists"),
            StorageError::Locked(name) => write!(f, "{name} is locked"),
            StorageError::TooLarge(limit) => write!(f, "payload exceeds {limit} bytes"),
            StorageError::Io(err) => write!(f, "{err}"),
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}

/// 文件列表中返回给客户端的文件信息。
#[derive(Debug, Clone, Serialize)]
pub struct StoredFile {
    pub name: String,
    pub size: u64,
    /// Unix 时间戳（秒）。
    pub mtime: f64,
    pub modified: Option<String>,
    pub mime_type: String,
    #[serde(skip)]
    pub modified_at: SystemTime,
}

impl StoredFile {
    fn from_metadata(name: String, metadata: &Metadata) -> Self {
        let modified_at = metadata.modified().unwrap_or(UNIX_EPOCH);
        let since_epoch = modified_at.duration_since(UNIX_EPOCH).ok();
        let mime_type = mime_guess::from_path(&name)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Self {
            size: metadata.len(),
            mtime: since_epoch.map(|d| d.as_secs_f64()).unwrap_or_default(),
            modified: since_epoch.map(format_timestamp),
            mime_type,
            modified_at,
            name,
        }
    }
}

//! 文本日志：保存在单个保留文件中，每行一条，最新的在前。
//!
//! 追加时整个读-改-写过程持有文本日志的名称锁，本进程内的并发提交会被串行化；
//! 其他进程的写入不做协调。

use tracing::debug;

use crate::config::TEXT_LOG_NAME;
use crate::storage::{Storage, StorageError};

/// 把换行合并为空格，保证每次提交只占一行。
pub fn normalize_entry(text: &str) -> String {
    text.split(['\r', '\n'])
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// 在日志开头插入 `text` 并截断到 `capacity` 条。
///
/// 返回日志当前的条目数。
pub async fn append(storage: &Storage, capacity: usize, text: &str) -> Result<usize, StorageError> {
    let _guard = storage.lock(&[TEXT_LOG_NAME]).await?;

    let existing = storage.read_optional(TEXT_LOG_NAME).await?;
    let existing = existing
        .as_deref()
        .map(String::from_utf8_lossy)
        .unwrap_or_default();

    let mut lines = Vec::with_capacity(capacity);
    lines.push(normalize_entry(text));
    lines.extend(
        existing
            .lines()
            .take(capacity.saturating_sub(1))
            .map(str::to_string),
    );

    let mut contents = lines.join("\n");
    contents.push('\n');
    storage.write_bytes(TEXT_LOG_NAME, contents.as_bytes()).await?;
    debug!(entries = lines.len(), "text log rewritten");
    Ok(lines.len())
}

/// 原样返回日志内容，尚未收到文本时返回 `None`。
pub async fn read(storage: &Storage) -> Result<Option<String>, StorageError> {
    let contents = storage.read_optional(TEXT_LOG_NAME).await?;
    Ok(contents.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::make_storage;

    async fn log_lines(storage: &Storage) -> Vec<String> {
        read(storage)
            .await
            .expect("read")
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn newest_entry_is_first_line() {
        let (_temp, storage) = make_storage();
        append(&storage, 10, "first").await.expect("append");
        append(&storage, 10, "second").await.expect("append");
        assert_eq!(log_lines(&storage).await, ["second", "first"]);
    }

    #[tokio::test]
    async fn full_log_drops_oldest_entry() {
        let (_temp, storage) = make_storage();
        for i in 0..10 {
            append(&storage, 10, &format!("entry {i}")).await.expect("append");
        }
        let count = append(&storage, 10, "buy milk").await.expect("append");
        assert_eq!(count, 10);

        let lines = log_lines(&storage).await;
        assert_eq!(lines.len(), 10);
        assert_eq!(lines[0], "buy milk");
        assert_eq!(lines[9], "entry 1");
        assert!(!lines.contains(&"entry 0".to_string()));
    }

    #[tokio::test]
    async fn multi_line_submission_stays_one_entry() {
        let (_temp, storage) = make_storage();
        append(&storage, 3, "a").await.expect("append");
        append(&storage, 3, "line one\r\nline two\nthree").await.expect("append");
        assert_eq!(log_lines(&storage).await, ["line one line two three", "a"]);
    }

    #[tokio::test]
    async fn missing_log_reads_as_none() {
        let (_temp, storage) = make_storage();
        assert!(read(&storage).await.expect("read").is_none());
    }

    #[tokio::test]
    async fn concurrent_appends_lose_nothing_within_capacity() {
        let (_temp, storage) = make_storage();
        let storage = std::sync::Arc::new(storage);
        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let storage = storage.clone();
                tokio::spawn(async move { append(&storage, 10, &format!("t{i}")).await })
            })
            .collect();
        for task in tasks {
            task.await.expect("join").expect("append");
        }
        assert_eq!(log_lines(&storage).await.len(), 8);
    }
}

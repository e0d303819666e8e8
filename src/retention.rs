//! 保留策略：只保留最近修改的若干个文件。

use tracing::{info, warn};

use crate::storage::Storage;

/// 每类数据（文件、文本条目）保留的数量。
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    max_items: usize,
}

impl RetentionPolicy {
    pub fn new(max_items: usize) -> Self {
        Self {
            max_items: max_items.max(1),
        }
    }

    pub fn max_items(&self) -> usize {
        self.max_items
    }

    /// 删除最近修改的 `max_items` 个之外的文件，返回实际删除的文件名。
    ///
    /// 不返回错误：列目录或删除失败只记录日志并跳过。
    pub async fn enforce(&self, storage: &Storage) -> Vec<String> {
        let files = match storage.list_files().await {
            Ok(files) => files,
            Err(err) => {
                warn!(error = %err, "retention listing failed");
                return Vec::new();
            }
        };

        let mut evicted = Vec::new();
        for file in files.iter().skip(self.max_items) {
            match storage.remove(&file.name).await {
                Ok(true) => {
                    info!(name = file.name, "removed old file");
                    evicted.push(file.name.clone());
                }
                // 已被并发的清理删除
                Ok(false) => {}
                Err(err) => warn!(name = file.name, error = %err, "failed to remove old file"),
            }
        }
        evicted
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_RETENTION_LIMIT)
    }
}

//! 内存名称锁：用于串行化存储目录中的读-改-写操作。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time;

/// Manages asynchronous mutexes keyed by storage entry name.
#[derive(Debug, Default)]
pub struct LockManager {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// 持有一个或多个名称锁，drop 时释放。
#[derive(Debug)]
pub struct NameGuard {
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按排序后的顺序获取名称锁，超时返回 Err。
    ///
    /// 获取前会清理无人持有的锁条目。
    pub async fn lock_names(&self, names: &[&str], timeout: Duration) -> Result<NameGuard, ()> {
        let mut keys: Vec<&str> = names.to_vec();
        keys.sort_unstable();
        keys.dedup();

        let mutexes = {
            let mut locks = self.locks.lock().await;
            locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
            keys.iter()
                .map(|key| {
                    locks
                        .entry((*key).to_string())
                        .or_insert_with(|| Arc::new(Mutex::new(())))
                        .clone()
                })
                .collect::<Vec<_>>()
        };

        let acquire = async move {
            let mut guards = Vec::with_capacity(mutexes.len());
            for mutex in mutexes {
                guards.push(mutex.lock_owned().await);
            }
            guards
        };
        let guards = time::timeout(timeout, acquire).await.map_err(|_| ())?;
        Ok(NameGuard { _guards: guards })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn held_lock_times_out_second_caller() {
        let manager = LockManager::new();
        let _held = manager
            .lock_names(&["a.txt"], Duration::from_millis(50))
            .await
            .expect("first lock");
        let second = manager
            .lock_names(&["a.txt"], Duration::from_millis(50))
            .await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn pair_lock_is_order_independent() {
        let manager = LockManager::new();
        let guard = manager
            .lock_names(&["b", "a"], Duration::from_millis(50))
            .await
            .expect("pair lock");
        drop(guard);
        manager
            .lock_names(&["a", "b", "a"], Duration::from_millis(50))
            .await
            .expect("relock after release");
    }

    #[tokio::test]
    async fn released_names_are_pruned() {
        let manager = LockManager::new();
        for i in 0..50 {
            let name = format!("file-{i}");
            let guard = manager
                .lock_names(&[name.as_str(), "target"], Duration::from_millis(50))
                .await
                .expect("lock");
            drop(guard);
        }
        let held = manager
            .lock_names(&["held"], Duration::from_millis(50))
            .await
            .expect("lock");
        assert_eq!(manager.locks.lock().await.len(), 1);

        manager
            .lock_names(&["other"], Duration::from_millis(50))
            .await
            .expect("lock");
        let locks = manager.locks.lock().await;
        assert!(locks.contains_key("held"));
        drop(locks);
        drop(held);
    }
}

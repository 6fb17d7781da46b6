//! 执行器：按计划并行执行复制和删除

use crate::core::planner::PlanEntry;
use crate::error::SyncError;
use crate::storage::{Storage, StorageUrl};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// 执行统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecStats {
    pub copied: u64,
    pub deleted: u64,
    pub failed: u64,
    pub bytes: u64,
}

#[derive(Debug, Default)]
struct TransferStats {
    copied: AtomicU64,
    deleted: AtomicU64,
    failed: AtomicU64,
    bytes: AtomicU64,
}

impl TransferStats {
    fn snapshot(&self) -> ExecStats {
        ExecStats {
            copied: self.copied.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }
}

/// 计划执行器
pub struct Executor {
    source: Arc<dyn Storage>,
    destination: Arc<dyn Storage>,
    workers: usize,
    dry_run: bool,
}

impl Executor {
    pub fn new(
        source: Arc<dyn Storage>,
        destination: Arc<dyn Storage>,
        workers: usize,
        dry_run: bool,
    ) -> Self {
        Self {
            source,
            destination,
            workers: workers.max(1),
            dry_run,
        }
    }

    /// 消费计划直到通道关闭或运行被取消，失败通过 `err_tx` 上报
    pub async fn run(
        &self,
        mut rx: mpsc::Receiver<PlanEntry>,
        err_tx: mpsc::UnboundedSender<SyncError>,
        cancel: CancellationToken,
    ) -> ExecStats {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let stats = Arc::new(TransferStats::default());
        let mut tasks = JoinSet::new();

        loop {
            let entry = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                entry = rx.recv() => match entry {
                    Some(entry) => entry,
                    None => break,
                },
            };

            if self.dry_run {
                println!("{}", entry);
                continue;
            }

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let source = self.source.clone();
            let destination = self.destination.clone();
            let stats = stats.clone();
            let err_tx = err_tx.clone();
            let cancel = cancel.clone();

            tasks.spawn(async move {
                if cancel.is_cancelled() {
                    return;
                }

                let op = entry.op();
                let result = match &entry {
                    PlanEntry::Copy {
                        source: src,
                        destination: dst,
                        ..
                    } => copy_object(source.as_ref(), destination.as_ref(), src, dst)
                        .await
                        .map(|bytes| {
                            stats.copied.fetch_add(1, Ordering::Relaxed);
                            stats.bytes.fetch_add(bytes, Ordering::Relaxed);
                        })
                        .map_err(|e| SyncError::execution(op, format!("{} {}", src, dst), &e)),
                    PlanEntry::Delete { urls, .. } => destination
                        .delete_batch(urls)
                        .await
                        .map(|_| {
                            stats.deleted.fetch_add(urls.len() as u64, Ordering::Relaxed);
                        })
                        .map_err(|e| SyncError::execution(op, delete_target(urls), &e)),
                };

                if let Err(err) = result {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    // 收集端已退出时丢弃
                    let _ = err_tx.send(err);
                }

                drop(permit);
            });
        }

        // 等待所有任务完成
        while tasks.join_next().await.is_some() {}

        let stats = stats.snapshot();
        info!(
            "执行完成: 复制 {}, 删除 {}, 失败 {}, 传输 {} 字节",
            stats.copied, stats.deleted, stats.failed, stats.bytes
        );
        stats
    }
}

/// 同一 bucket 内用后端复制，其余情况读出再写入
async fn copy_object(
    source: &dyn Storage,
    destination: &dyn Storage,
    from: &StorageUrl,
    to: &StorageUrl,
) -> anyhow::Result<u64> {
    if from.is_remote() && from.same_bucket(to) {
        debug!("服务端复制: {} -> {}", from, to);
        destination.copy(from, to).await?;
        return Ok(0);
    }

    let data = source.get(from).await?;
    let size = data.len() as u64;
    destination.put(to, data).await?;
    debug!("已复制: {} -> {} ({} 字节)", from, to, size);
    Ok(size)
}

fn delete_target(urls: &[StorageUrl]) -> String {
    match urls {
        [single] => single.to_string(),
        [first, ..] => format!("{} (+{} more)", first, urls.len() - 1),
        [] => String::new(),
    }
}

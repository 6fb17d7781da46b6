//! 错误收集：汇总执行器上报的错误

use crate::error::{MultiError, SyncError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// 文件描述符耗尽时给用户的提示
pub const FD_LIMIT_WARNING: &str = "WARNING: the process has reached its open file descriptor limit.\n\
Lower the number of workers with --numworkers, or raise the limit (ulimit -n) and try again.";

/// 错误收集器，错误通道的唯一读取方
#[derive(Debug, Clone)]
pub struct ErrorAggregator {
    op: String,
}

impl ErrorAggregator {
    pub fn new(op: impl Into<String>) -> Self {
        Self { op: op.into() }
    }

    /// 读取通道直到所有发送端关闭
    ///
    /// 遇到文件描述符耗尽时取消整个运行并返回 `TooManyOpenFiles`，
    /// 其余错误逐条上报并保留在结果中。
    pub async fn drain(
        &self,
        mut rx: mpsc::UnboundedReceiver<SyncError>,
        cancel: CancellationToken,
    ) -> Result<MultiError, SyncError> {
        let mut merr = MultiError::new();

        while let Some(err) = rx.recv().await {
            if err.is_fd_exhaustion() {
                error!(op = %self.op, "文件描述符耗尽，取消同步: {}", err);
                cancel.cancel();
                return Err(SyncError::TooManyOpenFiles(err.to_string()));
            }

            // 取消引起的错误不再上报
            if !err.is_cancellation() {
                error!(op = %self.op, "ERROR {}", err);
            }
            merr.push(err);
        }

        Ok(merr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_collects_all_errors() {
        let (tx, rx) = mpsc::unbounded_channel();
        let aggregator = ErrorAggregator::new("sync");

        let writers: Vec<_> = (0..3)
            .map(|i| {
                let tx = tx.clone();
                tokio::spawn(async move {
                    tx.send(SyncError::plan(format!("e{}", i))).unwrap();
                })
            })
            .collect();
        drop(tx);
        for w in writers {
            w.await.unwrap();
        }

        let merr = aggregator
            .drain(rx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(merr.len(), 3);
    }

    #[tokio::test]
    async fn test_fd_exhaustion_cancels_run() {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        tx.send(SyncError::plan("first")).unwrap();
        tx.send(SyncError::Execution {
            op: "cp".to_string(),
            target: "s3://bucket/key".to_string(),
            message: "open file: Too many open files (os error 24)".to_string(),
        })
        .unwrap();
        tx.send(SyncError::plan("never seen")).unwrap();

        let result = ErrorAggregator::new("sync").drain(rx, cancel.clone()).await;
        assert!(matches!(result, Err(SyncError::TooManyOpenFiles(_))));
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_empty_channel() {
        let (tx, rx) = mpsc::unbounded_channel::<SyncError>();
        drop(tx);
        let merr = ErrorAggregator::new("sync")
            .drain(rx, CancellationToken::new())
            .await
            .unwrap();
        assert!(merr.is_empty());
    }
}

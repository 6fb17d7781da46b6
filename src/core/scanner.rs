use crate::core::filter::SkipFilter;
use crate::error::SyncError;
use crate::storage::{Object, Storage, StorageUrl};
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// 对象扫描器：列举一侧的对象并剔除不参与比较的对象
pub struct ObjectScanner {
    filter: Arc<SkipFilter>,
    follow_symlinks: bool,
    cancel: CancellationToken,
}

impl ObjectScanner {
    pub fn new(filter: Arc<SkipFilter>, follow_symlinks: bool, cancel: CancellationToken) -> Self {
        Self {
            filter,
            follow_symlinks,
            cancel,
        }
    }

    /// 扫描一侧，`is_source` 决定是否上报错误
    pub async fn scan(&self, storage: &dyn Storage, url: &StorageUrl, is_source: bool) -> Vec<Object> {
        let side = if is_source { "源" } else { "目标" };
        info!("开始扫描{}: {} ({})", side, url, storage.name());

        // 目标端不跟随符号链接
        let follow = is_source && self.follow_symlinks;
        let mut stream = storage.list(url, follow, self.cancel.clone()).await;

        let mut objects = Vec::new();
        let mut skipped = 0usize;
        while let Some(object) = stream.next().await {
            if self.filter.should_skip(&object, is_source) {
                skipped += 1;
                continue;
            }
            objects.push(object);
        }

        debug!("扫描{}完成: {} 个对象, {} 个被跳过", side, objects.len(), skipped);
        objects
    }

    /// 两侧并发扫描，全部完成后才返回
    pub async fn scan_both(
        &self,
        source: (&dyn Storage, &StorageUrl),
        destination: (&dyn Storage, &StorageUrl),
    ) -> (Vec<Object>, Vec<Object>) {
        tokio::join!(
            self.scan(source.0, source.1, true),
            self.scan(destination.0, destination.1, false),
        )
    }
}

/// 目标位置后追加通配符，递归列出其下所有对象
///
/// raw 模式下目标里的通配符是字面字符，只追加分隔符，按前缀列举
pub fn destination_listing_url(destination: &str, raw: bool) -> Result<StorageUrl, SyncError> {
    let terminated = destination.ends_with('/') || destination.ends_with('\\');
    let expr = match (raw, terminated) {
        (true, true) => destination.to_string(),
        (true, false) => format!("{}/", destination),
        (false, true) => format!("{}*", destination),
        (false, false) => format!("{}/*", destination),
    };
    StorageUrl::parse(&expr, raw)
}

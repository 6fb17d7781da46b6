//! 生成同步计划并逐条交给执行器

use crate::core::comparator::DiffResult;
use crate::core::resolver::resolve_destination;
use crate::core::strategy::SyncStrategy;
use crate::error::SyncError;
use crate::storage::{StorageUrl, UrlKind};
use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 命令参数
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandFlags {
    /// 按字面处理路径，不再展开通配符
    pub raw: bool,
    pub sse: Option<String>,
    pub sse_kms_key_id: Option<String>,
    pub storage_class: Option<String>,
}

impl CommandFlags {
    /// 删除命令只保留 raw
    fn for_delete(&self) -> Self {
        Self {
            raw: self.raw,
            ..Default::default()
        }
    }
}

impl fmt::Display for CommandFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "--raw={}", self.raw)?;
        if let Some(sse) = &self.sse {
            write!(f, " --sse={}", sse)?;
        }
        if let Some(key_id) = &self.sse_kms_key_id {
            write!(f, " --sse-kms-key-id={}", key_id)?;
        }
        if let Some(class) = &self.storage_class {
            write!(f, " --storage-class={}", class)?;
        }
        Ok(())
    }
}

/// 计划中的一条操作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanEntry {
    Copy {
        source: StorageUrl,
        destination: StorageUrl,
        flags: CommandFlags,
    },
    Delete {
        urls: Vec<StorageUrl>,
        flags: CommandFlags,
    },
}

impl PlanEntry {
    pub fn copy(
        source: StorageUrl,
        destination: StorageUrl,
        flags: CommandFlags,
    ) -> Result<Self, SyncError> {
        if source == destination {
            return Err(SyncError::plan(format!(
                "source and destination are the same: {}",
                source
            )));
        }
        Ok(PlanEntry::Copy {
            source,
            destination,
            flags,
        })
    }

    /// 所有位置必须同为本地，或位于同一个 bucket
    pub fn delete(urls: Vec<StorageUrl>, flags: &CommandFlags) -> Result<Self, SyncError> {
        let Some(first) = urls.first() else {
            return Err(SyncError::plan("delete requires at least one url"));
        };

        let consistent = urls.iter().all(|u| match first.kind() {
            UrlKind::Local => !u.is_remote(),
            UrlKind::Remote => first.same_bucket(u),
        });
        if !consistent {
            return Err(SyncError::plan(
                "arguments of a batch delete must be in the same bucket or all local",
            ));
        }

        Ok(PlanEntry::Delete {
            urls,
            flags: flags.for_delete(),
        })
    }

    pub fn op(&self) -> &'static str {
        match self {
            PlanEntry::Copy { .. } => "cp",
            PlanEntry::Delete { .. } => "rm",
        }
    }
}

impl fmt::Display for PlanEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanEntry::Copy {
                source,
                destination,
                flags,
            } => write!(f, "cp {} \"{}\" \"{}\"", flags, source, destination),
            PlanEntry::Delete { urls, flags } => {
                write!(f, "rm {}", flags)?;
                for url in urls {
                    write!(f, " \"{}\"", url)?;
                }
                Ok(())
            }
        }
    }
}

/// 计划统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSummary {
    pub copy_count: usize,
    pub delete_count: usize,
    /// 策略判断为已同步的数量
    pub skip_count: usize,
    /// 生成失败被丢弃的数量
    pub dropped_count: usize,
}

/// 计划生成器
#[derive(Debug, Clone)]
pub struct Planner {
    op: String,
    destination: StorageUrl,
    strategy: SyncStrategy,
    delete: bool,
    is_batch: bool,
    flags: CommandFlags,
}

impl Planner {
    pub fn new(
        destination: StorageUrl,
        strategy: SyncStrategy,
        delete: bool,
        is_batch: bool,
        flags: CommandFlags,
    ) -> Self {
        // sync 自己已经展开了通配符，生成的命令一律按字面处理
        let flags = CommandFlags { raw: true, ..flags };
        Self {
            op: "sync".to_string(),
            destination,
            strategy,
            delete,
            is_batch,
            flags,
        }
    }

    /// 发送一条计划，消费端关闭或已取消时返回 false
    async fn emit(
        tx: &mpsc::Sender<PlanEntry>,
        cancel: &CancellationToken,
        entry: PlanEntry,
    ) -> bool {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            sent = tx.send(entry) => sent.is_ok(),
        }
    }

    /// 依次处理只在源、两边都有、只在目标的对象；函数返回时关闭通道
    pub async fn plan_run(
        &self,
        diff: DiffResult,
        tx: mpsc::Sender<PlanEntry>,
        cancel: CancellationToken,
    ) -> PlanSummary {
        let mut summary = PlanSummary::default();
        let DiffResult {
            source_only,
            destination_only,
            common,
        } = diff;

        // 只在源
        for source in source_only {
            let entry = resolve_destination(&source, &self.destination, self.is_batch)
                .and_then(|dst| PlanEntry::copy(source.clone(), dst, self.flags.clone()));
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(op = %self.op, "DEBUG \"{}\": {}", source, e);
                    summary.dropped_count += 1;
                    continue;
                }
            };
            if !Self::emit(&tx, &cancel, entry).await {
                return summary;
            }
            summary.copy_count += 1;
        }

        // 两边都有
        for pair in common {
            let (source, destination) = (&pair.source, &pair.destination);
            if let Err(reason) = self.strategy.should_sync(source, destination) {
                debug!(
                    op = %self.op,
                    "DEBUG \"{}\" \"{}\": {}",
                    source.url,
                    destination.url,
                    reason
                );
                summary.skip_count += 1;
                continue;
            }

            let entry = match PlanEntry::copy(
                pair.source.url.clone(),
                pair.destination.url.clone(),
                self.flags.clone(),
            ) {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(op = %self.op, "DEBUG \"{}\" \"{}\": {}", source.url, destination.url, e);
                    summary.dropped_count += 1;
                    continue;
                }
            };
            if !Self::emit(&tx, &cancel, entry).await {
                return summary;
            }
            summary.copy_count += 1;
        }

        // 只在目标
        if self.delete && !destination_only.is_empty() {
            let count = destination_only.len();
            match PlanEntry::delete(destination_only, &self.flags) {
                Ok(entry) => {
                    if Self::emit(&tx, &cancel, entry).await {
                        summary.delete_count += count;
                    }
                }
                Err(e) => {
                    debug!(op = %self.op, "DEBUG delete {} objects: {}", count, e);
                    summary.dropped_count += count;
                }
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::comparator::compare_objects;
    use crate::storage::Object;
    use chrono::{Duration, Utc};

    fn listed(base: &str, name: &str, size: u64) -> Object {
        let base = StorageUrl::parse(base, false).unwrap();
        let path = format!("{}{}", base.prefix(), name);
        Object::file(StorageUrl::object(&base, path, name), size, Some(Utc::now()))
    }

    async fn collect(planner: Planner, diff: DiffResult) -> (Vec<PlanEntry>, PlanSummary) {
        let (tx, mut rx) = mpsc::channel(1);
        let handle =
            tokio::spawn(async move { planner.plan_run(diff, tx, CancellationToken::new()).await });

        let mut entries = Vec::new();
        while let Some(entry) = rx.recv().await {
            entries.push(entry);
        }
        (entries, handle.await.unwrap())
    }

    fn mixed_diff() -> DiffResult {
        let src = vec![
            listed("s3://src/*", "a.txt", 10),
            listed("s3://src/*", "b.txt", 20),
            listed("s3://src/*", "sub/c.txt", 5),
        ];
        let dst = vec![
            listed("s3://dst/dest/*", "a.txt", 12),
            listed("s3://dst/dest/*", "old.txt", 1),
        ];
        compare_objects(src, dst)
    }

    #[tokio::test]
    async fn test_plan_order_and_batched_delete() {
        let dst = StorageUrl::parse("s3://dst/dest", false).unwrap();
        let planner = Planner::new(
            dst,
            SyncStrategy::default(),
            true,
            true,
            CommandFlags::default(),
        );

        let (entries, summary) = collect(planner, mixed_diff()).await;
        let rendered: Vec<String> = entries.iter().map(|e| e.to_string()).collect();

        assert_eq!(
            rendered,
            vec![
                r#"cp --raw=true "s3://src/b.txt" "s3://dst/dest/b.txt""#,
                r#"cp --raw=true "s3://src/sub/c.txt" "s3://dst/dest/sub/c.txt""#,
                r#"cp --raw=true "s3://src/a.txt" "s3://dst/dest/a.txt""#,
                r#"rm --raw=true "s3://dst/dest/old.txt""#,
            ]
        );
        assert_eq!(summary.copy_count, 3);
        assert_eq!(summary.delete_count, 1);
    }

    #[tokio::test]
    async fn test_no_delete_unless_enabled() {
        let dst = StorageUrl::parse("s3://dst/dest", false).unwrap();
        let planner = Planner::new(
            dst,
            SyncStrategy::default(),
            false,
            true,
            CommandFlags::default(),
        );

        let (entries, summary) = collect(planner, mixed_diff()).await;
        assert!(entries.iter().all(|e| e.op() == "cp"));
        assert_eq!(summary.delete_count, 0);
    }

    #[tokio::test]
    async fn test_in_sync_pair_is_skipped() {
        let now = Utc::now();
        let mut src = listed("s3://src/*", "a.txt", 10);
        src.mod_time = Some(now - Duration::hours(1));
        let mut dst = listed("s3://dst/*", "a.txt", 10);
        dst.mod_time = Some(now);

        let planner = Planner::new(
            StorageUrl::parse("s3://dst/", false).unwrap(),
            SyncStrategy::default(),
            true,
            true,
            CommandFlags::default(),
        );
        let (entries, summary) = collect(planner, compare_objects(vec![src], vec![dst])).await;
        assert!(entries.is_empty());
        assert_eq!(summary.skip_count, 1);
    }

    #[tokio::test]
    async fn test_bad_entry_does_not_block_the_rest() {
        // 源为 bucket 根时取不到文件名
        let bad = Object::file(StorageUrl::parse("s3://src", true).unwrap(), 1, None);
        let good = listed("s3://src/*", "good.txt", 1);
        let diff = DiffResult {
            source_only: vec![bad.url, good.url],
            ..Default::default()
        };

        let planner = Planner::new(
            StorageUrl::parse("s3://dst/", false).unwrap(),
            SyncStrategy::default(),
            false,
            false,
            CommandFlags::default(),
        );
        let (entries, summary) = collect(planner, diff).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(summary.dropped_count, 1);
    }

    #[tokio::test]
    async fn test_copy_flags_are_rendered() {
        let flags = CommandFlags {
            raw: false,
            sse: Some("aws:kms".to_string()),
            sse_kms_key_id: Some("key-1".to_string()),
            storage_class: Some("STANDARD_IA".to_string()),
        };
        let planner = Planner::new(
            StorageUrl::parse("s3://dst/dest", false).unwrap(),
            SyncStrategy::default(),
            true,
            true,
            flags,
        );

        let (entries, _) = collect(planner, mixed_diff()).await;
        assert_eq!(
            entries[0].to_string(),
            r#"cp --raw=true --sse=aws:kms --sse-kms-key-id=key-1 --storage-class=STANDARD_IA "s3://src/b.txt" "s3://dst/dest/b.txt""#
        );
        assert_eq!(
            entries.last().unwrap().to_string(),
            r#"rm --raw=true "s3://dst/dest/old.txt""#
        );
    }

    #[test]
    fn test_delete_validation() {
        let a = StorageUrl::parse("s3://one/a", false).unwrap();
        let b = StorageUrl::parse("s3://two/b", false).unwrap();
        let local = StorageUrl::parse("dir/c", false).unwrap();
        let flags = CommandFlags::default();

        assert!(PlanEntry::delete(vec![], &flags).is_err());
        assert!(PlanEntry::delete(vec![a.clone(), b], &flags).is_err());
        assert!(PlanEntry::delete(vec![a.clone(), local], &flags).is_err());
        assert!(PlanEntry::delete(vec![a], &flags).is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_plan_stops_early() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (tx, mut rx) = mpsc::channel(1);
        let planner = Planner::new(
            StorageUrl::parse("s3://dst/dest", false).unwrap(),
            SyncStrategy::default(),
            true,
            true,
            CommandFlags::default(),
        );

        let summary = planner.plan_run(mixed_diff(), tx, cancel).await;
        assert_eq!(summary.copy_count, 0);
        assert!(rx.recv().await.is_none());
    }
}

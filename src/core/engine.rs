use crate::core::aggregator::ErrorAggregator;
use crate::core::comparator::compare_objects;
use crate::core::executor::{ExecStats, Executor};
use crate::core::filter::SkipFilter;
use crate::core::planner::{CommandFlags, PlanSummary, Planner};
use crate::core::resolver::is_batch;
use crate::core::scanner::{destination_listing_url, ObjectScanner};
use crate::core::strategy::SyncStrategy;
use crate::error::{MultiError, SyncError};
use crate::storage::{create_storage, Storage, StorageOptions, StorageUrl};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// 默认并发数
pub const DEFAULT_WORKERS: usize = 256;
/// 计划通道容量，1 即逐条交接
pub const DEFAULT_PLAN_BUFFER: usize = 1;

/// 同步选项
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// 删除只在目标中存在的对象
    pub delete: bool,
    /// 只比较大小
    pub size_only: bool,
    pub exclude: Vec<String>,
    pub raw: bool,
    pub follow_symlinks: bool,
    pub sse: Option<String>,
    pub sse_kms_key_id: Option<String>,
    pub storage_class: Option<String>,
    pub source_region: Option<String>,
    pub destination_region: Option<String>,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// 最大并发操作数
    pub workers: usize,
    pub plan_buffer: usize,
    /// 只打印计划，不执行
    pub dry_run: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            delete: false,
            size_only: false,
            exclude: Vec::new(),
            raw: false,
            follow_symlinks: true,
            sse: None,
            sse_kms_key_id: None,
            storage_class: None,
            source_region: None,
            destination_region: None,
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            workers: DEFAULT_WORKERS,
            plan_buffer: DEFAULT_PLAN_BUFFER,
            dry_run: false,
        }
    }
}

impl SyncOptions {
    fn storage_options(&self, region: Option<String>) -> StorageOptions {
        StorageOptions {
            region,
            endpoint: self.endpoint.clone(),
            access_key_id: self.access_key_id.clone(),
            secret_access_key: self.secret_access_key.clone(),
            sse: self.sse.clone(),
            sse_kms_key_id: self.sse_kms_key_id.clone(),
            storage_class: self.storage_class.clone(),
        }
    }

    fn command_flags(&self) -> CommandFlags {
        CommandFlags {
            raw: self.raw,
            sse: self.sse.clone(),
            sse_kms_key_id: self.sse_kms_key_id.clone(),
            storage_class: self.storage_class.clone(),
        }
    }
}

/// 同步报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub run_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub source_objects: usize,
    pub destination_objects: usize,
    pub plan: PlanSummary,
    pub stats: ExecStats,
    pub errors: MultiError,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// 同步引擎
pub struct SyncEngine {
    source: String,
    destination: String,
    options: SyncOptions,
    full_command: String,
}

impl SyncEngine {
    const OP: &'static str = "sync";

    pub fn new(
        source: impl Into<String>,
        destination: impl Into<String>,
        options: SyncOptions,
    ) -> Self {
        let source = source.into();
        let destination = destination.into();
        let full_command = format!("{} {} {}", Self::OP, source, destination);
        Self {
            source,
            destination,
            options,
            full_command,
        }
    }

    /// 错误上报时显示的完整命令行
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.full_command = command.into();
        self
    }

    /// 在列举之前校验源和目标
    pub fn validate(&self) -> Result<(StorageUrl, StorageUrl), SyncError> {
        let src = StorageUrl::parse(&self.source, self.options.raw)?;
        let dst = StorageUrl::parse(&self.destination, self.options.raw)?;

        if dst.is_wildcard() {
            return Err(SyncError::validation(
                "target path cannot contain wildcard characters",
            ));
        }
        // 远程前缀或 bucket 会递归展开，必须显式写成通配符
        if src.is_remote() && !src.is_wildcard() && (src.is_prefix() || src.is_bucket()) {
            return Err(SyncError::validation(
                "source argument must contain wildcard character",
            ));
        }
        if !src.is_remote() && !dst.is_remote() {
            return Err(SyncError::validation(
                "local->local sync operations are not permitted",
            ));
        }
        if src.is_wildcard() && dst.is_remote() && !(dst.is_prefix() || dst.is_bucket()) {
            return Err(SyncError::validation(
                "target must be a bucket or a prefix when source is a wildcard",
            ));
        }

        Ok((src, dst))
    }

    /// 运行同步，按源和目标创建存储客户端
    pub async fn run(&self, cancel: CancellationToken) -> Result<SyncReport, SyncError> {
        let (src, dst) = self.validate()?;

        let source_client = create_storage(
            &src,
            &self.options.storage_options(self.options.source_region.clone()),
        )
        .map_err(|e| SyncError::validation(format!("创建源存储失败: {:#}", e)))?;
        let destination_client = create_storage(
            &dst,
            &self
                .options
                .storage_options(self.options.destination_region.clone()),
        )
        .map_err(|e| SyncError::validation(format!("创建目标存储失败: {:#}", e)))?;

        self.execute(src, dst, source_client, destination_client, cancel)
            .await
    }

    /// 使用给定的存储客户端运行同步
    pub async fn run_with(
        &self,
        source_client: Arc<dyn Storage>,
        destination_client: Arc<dyn Storage>,
        cancel: CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        let (src, dst) = self.validate()?;
        self.execute(src, dst, source_client, destination_client, cancel)
            .await
    }

    async fn execute(
        &self,
        src: StorageUrl,
        dst: StorageUrl,
        source_client: Arc<dyn Storage>,
        destination_client: Arc<dyn Storage>,
        cancel: CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        let start_time = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        info!("开始同步: {} -> {} ({})", src, dst, run_id);

        let batch = is_batch(&src, source_client.as_ref()).await;
        debug!("批量模式: {}", batch);

        let filter = SkipFilter::new(&self.options.exclude)?.with_command(self.full_command.clone());
        let scanner = ObjectScanner::new(
            Arc::new(filter),
            self.options.follow_symlinks,
            cancel.clone(),
        );

        // 目标端列出其下所有对象
        let listing = destination_listing_url(&self.destination, self.options.raw)?;
        let (source_objects, destination_objects) = scanner
            .scan_both(
                (source_client.as_ref(), &src),
                (destination_client.as_ref(), &listing),
            )
            .await;
        let (source_count, destination_count) = (source_objects.len(), destination_objects.len());

        let diff = compare_objects(source_objects, destination_objects);
        info!(
            "比较完成: 只在源 {}, 只在目标 {}, 两边都有 {}",
            diff.source_only.len(),
            diff.destination_only.len(),
            diff.common.len()
        );

        // 错误收集
        let (err_tx, err_rx) = mpsc::unbounded_channel();
        let aggregator = ErrorAggregator::new(Self::OP);
        let aggregator_cancel = cancel.clone();
        let aggregator_handle =
            tokio::spawn(async move { aggregator.drain(err_rx, aggregator_cancel).await });

        // 计划生成
        let (plan_tx, plan_rx) = mpsc::channel(self.options.plan_buffer.max(1));
        let planner = Planner::new(
            dst,
            SyncStrategy::new(self.options.size_only),
            self.options.delete,
            batch,
            self.options.command_flags(),
        );
        let planner_cancel = cancel.clone();
        let planner_handle =
            tokio::spawn(async move { planner.plan_run(diff, plan_tx, planner_cancel).await });

        // 执行
        let executor = Executor::new(
            source_client,
            destination_client,
            self.options.workers,
            self.options.dry_run,
        );
        let stats = executor.run(plan_rx, err_tx, cancel.clone()).await;

        let plan = planner_handle.await.unwrap_or_else(|e| {
            error!("计划任务异常退出: {}", e);
            PlanSummary::default()
        });

        let mut errors = match aggregator_handle.await {
            Ok(result) => result?,
            Err(e) => {
                error!("错误收集任务异常退出: {}", e);
                MultiError::new()
            }
        };

        if cancel.is_cancelled() {
            errors.push(SyncError::Cancelled);
        }

        let end_time = Utc::now();
        info!(
            "同步完成: 复制 {}, 删除 {}, 跳过 {}, 失败 {}",
            stats.copied, stats.deleted, plan.skip_count, stats.failed
        );

        Ok(SyncReport {
            run_id,
            start_time,
            end_time,
            source_objects: source_count,
            destination_objects: destination_count,
            plan,
            stats,
            errors,
        })
    }
}

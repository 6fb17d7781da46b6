pub mod local;
pub mod s3;
pub mod url;

use crate::error::SyncError;
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub use local::LocalStorage;
pub use s3::S3Storage;
pub use url::{StorageUrl, UrlKind};

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- stat, delete 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- read, write 等
pub const IO_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    File,
    Directory,
}

impl ObjectType {
    pub fn is_dir(&self) -> bool {
        matches!(self, ObjectType::Directory)
    }
}

/// 存储类型
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StorageClass {
    #[default]
    Standard,
    ReducedRedundancy,
    StandardIa,
    OnezoneIa,
    IntelligentTiering,
    GlacierIr,
    Glacier,
    DeepArchive,
    Other(String),
}

impl StorageClass {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "" | "STANDARD" => StorageClass::Standard,
            "REDUCED_REDUNDANCY" => StorageClass::ReducedRedundancy,
            "STANDARD_IA" => StorageClass::StandardIa,
            "ONEZONE_IA" => StorageClass::OnezoneIa,
            "INTELLIGENT_TIERING" => StorageClass::IntelligentTiering,
            "GLACIER_IR" => StorageClass::GlacierIr,
            "GLACIER" => StorageClass::Glacier,
            "DEEP_ARCHIVE" => StorageClass::DeepArchive,
            _ => StorageClass::Other(s.to_string()),
        }
    }

    /// 需要先 restore 才能读取
    pub fn is_glacier(&self) -> bool {
        matches!(self, StorageClass::Glacier | StorageClass::DeepArchive)
    }
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StorageClass::Standard => "STANDARD",
            StorageClass::ReducedRedundancy => "REDUCED_REDUNDANCY",
            StorageClass::StandardIa => "STANDARD_IA",
            StorageClass::OnezoneIa => "ONEZONE_IA",
            StorageClass::IntelligentTiering => "INTELLIGENT_TIERING",
            StorageClass::GlacierIr => "GLACIER_IR",
            StorageClass::Glacier => "GLACIER",
            StorageClass::DeepArchive => "DEEP_ARCHIVE",
            StorageClass::Other(s) => s,
        };
        f.write_str(s)
    }
}

/// 列举得到的对象
#[derive(Debug, Clone)]
pub struct Object {
    pub url: StorageUrl,
    pub typ: ObjectType,
    pub size: u64,
    pub mod_time: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub storage_class: StorageClass,
    /// 列举出错时对象仍然出现在流中，由过滤器剔除
    pub err: Option<SyncError>,
}

impl Object {
    pub fn file(url: StorageUrl, size: u64, mod_time: Option<DateTime<Utc>>) -> Self {
        Self {
            url,
            typ: ObjectType::File,
            size,
            mod_time,
            etag: None,
            storage_class: StorageClass::Standard,
            err: None,
        }
    }

    pub fn dir(url: StorageUrl) -> Self {
        Self {
            typ: ObjectType::Directory,
            ..Self::file(url, 0, None)
        }
    }

    pub fn error(url: StorageUrl, err: SyncError) -> Self {
        Self {
            err: Some(err),
            ..Self::file(url, 0, None)
        }
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn with_storage_class(mut self, class: StorageClass) -> Self {
        self.storage_class = class;
        self
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// 惰性的对象序列
pub type ObjectStream = BoxStream<'static, Object>;

/// 存储抽象接口
#[async_trait]
pub trait Storage: Send + Sync {
    /// 列出位置下的所有对象，错误以带 err 的对象形式出现
    async fn list(
        &self,
        url: &StorageUrl,
        follow_symlinks: bool,
        cancel: CancellationToken,
    ) -> ObjectStream;

    /// 获取对象元数据，不存在时返回 None
    async fn stat(&self, url: &StorageUrl) -> Result<Option<Object>>;

    /// 读取整个对象
    async fn get(&self, url: &StorageUrl) -> Result<Bytes>;

    /// 写入整个对象
    async fn put(&self, url: &StorageUrl, data: Bytes) -> Result<()>;

    /// 复制对象（同一存储内）
    async fn copy(&self, from: &StorageUrl, to: &StorageUrl) -> Result<()> {
        let data = self.get(from).await?;
        self.put(to, data).await
    }

    async fn delete(&self, url: &StorageUrl) -> Result<()>;

    /// 批量删除，默认逐个删除并在第一个错误处返回
    async fn delete_batch(&self, urls: &[StorageUrl]) -> Result<()> {
        for url in urls {
            self.delete(url).await?;
        }
        Ok(())
    }

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 创建存储客户端所需的选项
#[derive(Debug, Clone, Default)]
pub struct StorageOptions {
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub sse: Option<String>,
    pub sse_kms_key_id: Option<String>,
    pub storage_class: Option<String>,
}

/// 根据位置创建存储实例
pub fn create_storage(url: &StorageUrl, options: &StorageOptions) -> Result<Arc<dyn Storage>> {
    match url.kind() {
        UrlKind::Local => {
            tracing::debug!("初始化本地存储: {}", url);
            Ok(Arc::new(LocalStorage::new()) as Arc<dyn Storage>)
        }
        UrlKind::Remote => {
            tracing::debug!(
                "初始化S3存储: bucket={}, region={:?}",
                url.bucket(),
                options.region
            );
            Ok(Arc::new(S3Storage::new(url.bucket(), options)?) as Arc<dyn Storage>)
        }
    }
}

use super::{
    Object, ObjectStream, Storage, StorageOptions, StorageUrl, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS,
};
use crate::error::SyncError;
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use opendal::{layers::TimeoutLayer, Entry, Metadata, Metakey, Operator};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

const DEFAULT_REGION: &str = "us-east-1";
const LIST_BUFFER: usize = 1000;

/// 单个 bucket 的 S3 客户端
pub struct S3Storage {
    operator: Operator,
    name: String,
}

impl S3Storage {
    pub fn new(bucket: &str, options: &StorageOptions) -> Result<Self> {
        use opendal::services::S3;

        let region = options.region.as_deref().unwrap_or(DEFAULT_REGION);
        let mut builder = S3::default().bucket(bucket).region(region);

        if let Some(ref ep) = options.endpoint {
            builder = builder.endpoint(ep);
        }
        if let Some(ref key) = options.access_key_id {
            builder = builder.access_key_id(key);
        }
        if let Some(ref secret) = options.secret_access_key {
            builder = builder.secret_access_key(secret);
        }

        // 写入参数作用于整个客户端
        if let Some(ref sse) = options.sse {
            builder = builder.server_side_encryption(sse);
        }
        if let Some(ref key_id) = options.sse_kms_key_id {
            builder = builder.server_side_encryption_aws_kms_key_id(key_id);
        }
        if let Some(ref class) = options.storage_class {
            builder = builder.default_storage_class(class);
        }

        // 添加超时层
        let operator = Operator::new(builder)?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                    .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
            )
            .finish();

        let name = format!("s3://{}", bucket);
        Ok(Self { operator, name })
    }

    fn to_object(url: StorageUrl, meta: &Metadata) -> Object {
        if meta.is_dir() {
            return Object::dir(url);
        }
        let obj = Object::file(url, meta.content_length(), meta.last_modified());
        match meta.etag() {
            Some(etag) => obj.with_etag(etag.trim_matches('"')),
            None => obj,
        }
    }

    fn entry_to_object(base: &StorageUrl, root: &str, entry: &Entry) -> Option<Object> {
        let key = entry.path().trim_start_matches('/');

        // 跳过列举根本身
        if key.is_empty() || key == root {
            return None;
        }
        if base.is_wildcard() && !base.matches(key) {
            return None;
        }

        let relative = key.strip_prefix(root).unwrap_or(key);
        let url = StorageUrl::object(base, key, relative);
        Some(Self::to_object(url, entry.metadata()))
    }

    async fn walk(
        operator: Operator,
        url: StorageUrl,
        cancel: CancellationToken,
        tx: mpsc::Sender<Object>,
    ) {
        // 精确 key 只返回这一个对象
        if !url.is_wildcard() && !url.is_bucket() && !url.is_prefix() {
            let obj = match operator.stat(url.path()).await {
                Ok(meta) => {
                    let relative = url.base().to_string();
                    Self::to_object(StorageUrl::object(&url, url.path(), relative), &meta)
                }
                Err(e) if e.kind() == opendal::ErrorKind::NotFound => {
                    Object::error(url, SyncError::NoObjectFound)
                }
                Err(e) => Object::error(url, SyncError::Listing(e.to_string())),
            };
            let _ = tx.send(obj).await;
            return;
        }

        let root = if url.is_wildcard() {
            url.prefix().to_string()
        } else {
            url.path().to_string()
        };

        // 使用 lister_with 进行递归列表
        let lister = operator
            .lister_with(&root)
            .recursive(true)
            .metakey(Metakey::ContentLength | Metakey::LastModified | Metakey::Mode | Metakey::Etag)
            .await;
        let mut lister = match lister {
            Ok(lister) => lister,
            Err(e) => {
                let _ = tx
                    .send(Object::error(url, SyncError::Listing(e.to_string())))
                    .await;
                return;
            }
        };

        let mut found = false;
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = tx.send(Object::error(url.clone(), SyncError::Cancelled)).await;
                    return;
                }
                next = lister.try_next() => next,
            };

            match next {
                Ok(Some(entry)) => {
                    let Some(obj) = Self::entry_to_object(&url, &root, &entry) else {
                        continue;
                    };
                    found = true;
                    if tx.send(obj).await.is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let err = SyncError::Listing(e.to_string());
                    let _ = tx.send(Object::error(url.clone(), err)).await;
                    return;
                }
            }
        }

        if !found {
            let _ = tx.send(Object::error(url, SyncError::NoObjectFound)).await;
        }
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn list(
        &self,
        url: &StorageUrl,
        _follow_symlinks: bool,
        cancel: CancellationToken,
    ) -> ObjectStream {
        let (tx, rx) = mpsc::channel(LIST_BUFFER);
        tokio::spawn(Self::walk(self.operator.clone(), url.clone(), cancel, tx));
        ReceiverStream::new(rx).boxed()
    }

    async fn stat(&self, url: &StorageUrl) -> Result<Option<Object>> {
        match self.operator.stat(url.path()).await {
            Ok(meta) => Ok(Some(Self::to_object(url.clone(), &meta))),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, url: &StorageUrl) -> Result<Bytes> {
        let data = self.operator.read(url.path()).await?;
        Ok(data.to_bytes())
    }

    async fn put(&self, url: &StorageUrl, data: Bytes) -> Result<()> {
        self.operator.write(url.path(), data).await?;
        Ok(())
    }

    async fn copy(&self, from: &StorageUrl, to: &StorageUrl) -> Result<()> {
        // 同一 bucket 内由服务端完成复制
        self.operator.copy(from.path(), to.path()).await?;
        Ok(())
    }

    async fn delete(&self, url: &StorageUrl) -> Result<()> {
        // S3 删除不存在的文件不会报错
        self.operator.delete(url.path()).await?;
        Ok(())
    }

    async fn delete_batch(&self, urls: &[StorageUrl]) -> Result<()> {
        let keys = urls.iter().map(|u| u.path().to_string()).collect();
        self.operator.remove(keys).await?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

use super::{Object, ObjectStream, Storage, StorageUrl};
use crate::error::SyncError;
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

/// 列举结果的缓冲大小
const LIST_BUFFER: usize = 1000;

pub struct LocalStorage {
    name: String,
}

impl LocalStorage {
    pub fn new() -> Self {
        Self {
            name: "local".to_string(),
        }
    }

    fn to_object(url: StorageUrl, metadata: &std::fs::Metadata) -> Object {
        if metadata.is_dir() {
            return Object::dir(url);
        }
        let mod_time = metadata.modified().ok().map(DateTime::<Utc>::from);
        Object::file(url, metadata.len(), mod_time)
    }

    /// 在阻塞线程中遍历目录，结果逐个发送到通道
    fn walk(
        url: StorageUrl,
        follow_symlinks: bool,
        cancel: CancellationToken,
        tx: mpsc::Sender<Object>,
    ) {
        let send = |obj: Object| tx.blocking_send(obj).is_ok();

        let (root, wildcard) = if url.is_wildcard() {
            let prefix = url.prefix();
            let root = if prefix.is_empty() { "." } else { prefix };
            (PathBuf::from(root), true)
        } else {
            let path = url.local_path();
            match std::fs::metadata(&path) {
                Ok(meta) if meta.is_dir() => (path, false),
                Ok(meta) => {
                    // 单个文件，相对路径就是文件名
                    let rel = url.base().to_string();
                    let obj = Self::to_object(StorageUrl::object(&url, url.path(), rel), &meta);
                    send(obj);
                    return;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    send(Object::error(url, SyncError::NoObjectFound));
                    return;
                }
                Err(e) => {
                    let err = SyncError::Listing(e.to_string());
                    send(Object::error(url, err));
                    return;
                }
            }
        };

        if !root.exists() {
            send(Object::error(url, SyncError::NoObjectFound));
            return;
        }

        let mut found = false;
        for entry in WalkDir::new(&root).follow_links(follow_symlinks) {
            if cancel.is_cancelled() {
                send(Object::error(url.clone(), SyncError::Cancelled));
                return;
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let err = SyncError::Listing(e.to_string());
                    if !send(Object::error(url.clone(), err)) {
                        return;
                    }
                    continue;
                }
            };

            // 跳过根目录本身
            if entry.depth() == 0 {
                continue;
            }
            // 不跟随符号链接时直接忽略链接
            if entry.path_is_symlink() && !follow_symlinks {
                continue;
            }

            let path = entry.path();
            let display = display_path(&root, path);
            if wildcard && !url.matches(&display) {
                continue;
            }

            let relative = match path.strip_prefix(&root) {
                Ok(rel) => rel.to_string_lossy().into_owned(),
                Err(_) => continue,
            };

            let obj_url = StorageUrl::object(&url, display, relative);
            let obj = match entry.metadata() {
                Ok(meta) => Self::to_object(obj_url, &meta),
                Err(e) => Object::error(obj_url, SyncError::Listing(e.to_string())),
            };
            found = true;
            if !send(obj) {
                return;
            }
        }

        if !found {
            send(Object::error(url, SyncError::NoObjectFound));
        }
    }
}

impl Default for LocalStorage {
    fn default() -> Self {
        Self::new()
    }
}

/// 以 "." 为根时去掉 "./" 前缀，使路径与用户输入的形式一致
fn display_path(root: &Path, path: &Path) -> String {
    if root == Path::new(".") {
        if let Ok(rel) = path.strip_prefix(".") {
            return rel.to_string_lossy().into_owned();
        }
    }
    path.to_string_lossy().into_owned()
}

#[async_trait]
impl Storage for LocalStorage {
    async fn list(
        &self,
        url: &StorageUrl,
        follow_symlinks: bool,
        cancel: CancellationToken,
    ) -> ObjectStream {
        let (tx, rx) = mpsc::channel(LIST_BUFFER);
        let url = url.clone();

        // 使用 spawn_blocking 避免阻塞 async runtime
        tokio::task::spawn_blocking(move || Self::walk(url, follow_symlinks, cancel, tx));

        ReceiverStream::new(rx).boxed()
    }

    async fn stat(&self, url: &StorageUrl) -> Result<Option<Object>> {
        match fs::metadata(url.local_path()).await {
            Ok(metadata) => Ok(Some(Self::to_object(url.clone(), &metadata))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, url: &StorageUrl) -> Result<Bytes> {
        let data = fs::read(url.local_path()).await?;
        Ok(Bytes::from(data))
    }

    async fn put(&self, url: &StorageUrl, data: Bytes) -> Result<()> {
        let full_path = url.local_path();

        if let Some(parent) = full_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        // 使用临时文件写入，然后原子重命名
        let mut temp_name = full_path.clone().into_os_string();
        temp_name.push(".objsync.tmp");
        let temp_path = PathBuf::from(temp_name);
        fs::write(&temp_path, &data).await?;
        fs::rename(&temp_path, &full_path).await?;

        Ok(())
    }

    async fn delete(&self, url: &StorageUrl) -> Result<()> {
        match fs::remove_file(url.local_path()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

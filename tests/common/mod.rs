//! 测试用的内存存储，按 S3 的语义列举一个 bucket

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use futures::StreamExt;
use objsync_lib::storage::{Object, ObjectStream, Storage, StorageClass, StorageUrl};
use objsync_lib::SyncError;
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct Entry {
    pub data: Bytes,
    pub mod_time: DateTime<Utc>,
    pub storage_class: StorageClass,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<String, Entry>,
    /// 读取时报错的 key
    broken: HashSet<String>,
    /// 写入时报 EMFILE
    fd_exhausted: bool,
    server_copies: usize,
}

pub struct MemoryStorage {
    bucket: String,
    state: Mutex<State>,
}

impl MemoryStorage {
    pub fn new(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            state: Mutex::new(State::default()),
        }
    }

    /// 写入一个对象，修改时间为当前时间加上偏移
    pub fn insert(&self, key: &str, size: usize, age_offset: Duration) -> &Self {
        self.insert_entry(
            key,
            Entry {
                data: Bytes::from(vec![b'x'; size]),
                mod_time: Utc::now() + age_offset,
                storage_class: StorageClass::Standard,
            },
        )
    }

    pub fn insert_entry(&self, key: &str, entry: Entry) -> &Self {
        self.state.lock().unwrap().objects.insert(key.to_string(), entry);
        self
    }

    pub fn set_storage_class(&self, key: &str, class: StorageClass) {
        if let Some(entry) = self.state.lock().unwrap().objects.get_mut(key) {
            entry.storage_class = class;
        }
    }

    pub fn break_key(&self, key: &str) {
        self.state.lock().unwrap().broken.insert(key.to_string());
    }

    pub fn exhaust_fds(&self) {
        self.state.lock().unwrap().fd_exhausted = true;
    }

    pub fn keys(&self) -> Vec<String> {
        self.state.lock().unwrap().objects.keys().cloned().collect()
    }

    pub fn size_of(&self, key: &str) -> Option<usize> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(key)
            .map(|e| e.data.len())
    }

    pub fn server_copies(&self) -> usize {
        self.state.lock().unwrap().server_copies
    }

    fn to_object(url: StorageUrl, entry: &Entry) -> Object {
        Object::file(url, entry.data.len() as u64, Some(entry.mod_time))
            .with_storage_class(entry.storage_class.clone())
    }

    fn check_bucket(&self, url: &StorageUrl) -> Result<()> {
        if url.bucket() != self.bucket {
            return Err(anyhow!("wrong bucket {} for {}", url.bucket(), self.bucket));
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn list(
        &self,
        url: &StorageUrl,
        _follow_symlinks: bool,
        cancel: CancellationToken,
    ) -> ObjectStream {
        if cancel.is_cancelled() {
            let obj = Object::error(url.clone(), SyncError::Cancelled);
            return futures::stream::iter(vec![obj]).boxed();
        }

        let state = self.state.lock().unwrap();
        let mut objects = Vec::new();

        if !url.is_wildcard() && !url.is_bucket() && !url.is_prefix() {
            match state.objects.get(url.path()) {
                Some(entry) => {
                    let obj_url = StorageUrl::object(url, url.path(), url.base());
                    objects.push(Self::to_object(obj_url, entry));
                }
                None => objects.push(Object::error(url.clone(), SyncError::NoObjectFound)),
            }
            return futures::stream::iter(objects).boxed();
        }

        let root = if url.is_wildcard() {
            url.prefix().to_string()
        } else {
            url.path().to_string()
        };
        for (key, entry) in state.objects.range(root.clone()..) {
            if !key.starts_with(&root) {
                break;
            }
            if url.is_wildcard() && !url.matches(key) {
                continue;
            }
            let relative = &key[root.len()..];
            objects.push(Self::to_object(
                StorageUrl::object(url, key.as_str(), relative),
                entry,
            ));
        }

        if objects.is_empty() {
            objects.push(Object::error(url.clone(), SyncError::NoObjectFound));
        }
        futures::stream::iter(objects).boxed()
    }

    async fn stat(&self, url: &StorageUrl) -> Result<Option<Object>> {
        self.check_bucket(url)?;
        let state = self.state.lock().unwrap();
        Ok(state
            .objects
            .get(url.path())
            .map(|entry| Self::to_object(url.clone(), entry)))
    }

    async fn get(&self, url: &StorageUrl) -> Result<Bytes> {
        self.check_bucket(url)?;
        let state = self.state.lock().unwrap();
        if state.broken.contains(url.path()) {
            return Err(anyhow!("read {}: access denied", url));
        }
        state
            .objects
            .get(url.path())
            .map(|e| e.data.clone())
            .ok_or_else(|| anyhow!("{} not found", url))
    }

    async fn put(&self, url: &StorageUrl, data: Bytes) -> Result<()> {
        self.check_bucket(url)?;
        let mut state = self.state.lock().unwrap();
        if state.fd_exhausted {
            return Err(anyhow!("open {}: Too many open files (os error 24)", url));
        }
        state.objects.insert(
            url.path().to_string(),
            Entry {
                data,
                mod_time: Utc::now(),
                storage_class: StorageClass::Standard,
            },
        );
        Ok(())
    }

    async fn copy(&self, from: &StorageUrl, to: &StorageUrl) -> Result<()> {
        let data = self.get(from).await?;
        self.put(to, data).await?;
        self.state.lock().unwrap().server_copies += 1;
        Ok(())
    }

    async fn delete(&self, url: &StorageUrl) -> Result<()> {
        self.check_bucket(url)?;
        self.state.lock().unwrap().objects.remove(url.path());
        Ok(())
    }

    fn name(&self) -> &str {
        &self.bucket
    }
}

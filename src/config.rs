//! 应用配置模块

use crate::core::engine::{DEFAULT_PLAN_BUFFER, DEFAULT_WORKERS};
use crate::logging::LogConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.json";

/// S3 连接配置，未设置的项交给存储客户端从环境变量中获取
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_access_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// 同步默认值
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncDefaults {
    /// 最大并发操作数
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// 计划通道容量
    #[serde(default = "default_plan_buffer")]
    pub plan_buffer: usize,
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_plan_buffer() -> usize {
    DEFAULT_PLAN_BUFFER
}

impl Default for SyncDefaults {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            plan_buffer: default_plan_buffer(),
        }
    }
}

/// config.json 的全部内容
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub log: LogConfig,
    pub s3: S3Config,
    pub sync: SyncDefaults,
}

impl AppConfig {
    /// 逐段加载，缺失或格式错误的段使用默认值
    pub fn load(config_dir: &Path) -> Self {
        let root = read_root(config_dir);
        Self {
            log: section(&root, "log"),
            s3: section(&root, "s3"),
            sync: section(&root, "sync"),
        }
    }
}

fn read_root(config_dir: &Path) -> serde_json::Value {
    fs::read_to_string(config_dir.join(CONFIG_FILE))
        .ok()
        .and_then(|content| serde_json::from_str(&content).ok())
        .unwrap_or_else(|| serde_json::json!({}))
}

fn section<T: DeserializeOwned + Default>(root: &serde_json::Value, key: &str) -> T {
    root.get(key)
        .and_then(|value| match serde_json::from_value(value.clone()) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!("配置项 {} 格式错误，使用默认值: {}", key, e);
                None
            }
        })
        .unwrap_or_default()
}

/// 默认配置目录：<系统配置目录>/objsync
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|p| p.join("objsync"))
        .unwrap_or_else(|| PathBuf::from(".objsync"))
}

pub mod dirs {
    use std::path::PathBuf;

    pub fn config_dir() -> Option<PathBuf> {
        if cfg!(target_os = "windows") {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        } else if cfg!(target_os = "macos") {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library").join("Application Support"))
        } else {
            std::env::var("XDG_CONFIG_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".config"))
                })
        }
    }
}

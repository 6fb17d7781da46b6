//! 错误类型

use serde::{Serialize, Serializer};
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

/// 同步过程中可能出现的错误
///
/// 只携带字符串，以便同一个错误既能挂在对象上，又能被上报和收集。
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// 参数校验失败，在列举之前中止
    #[error("{0}")]
    Validation(String),

    /// 列举对象时出错（附着在单个对象上）
    #[error("{0}")]
    Listing(String),

    /// 列举或执行过程中被取消
    #[error("operation cancelled")]
    Cancelled,

    #[error("no object found")]
    NoObjectFound,

    /// 归档存储中的对象，需要先恢复才能读取
    #[error("object '{0}' is on Glacier storage")]
    ArchivedObject(String),

    /// 单条计划生成失败
    #[error("{0}")]
    Plan(String),

    /// 执行器报告的单个操作失败
    #[error("{op} {target}: {message}")]
    Execution {
        op: String,
        target: String,
        message: String,
    },

    #[error("too many open files: {0}")]
    TooManyOpenFiles(String),
}

impl SyncError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn plan(msg: impl Into<String>) -> Self {
        Self::Plan(msg.into())
    }

    /// 从存储层错误构造列举错误，保留完整的错误链
    pub fn listing(err: &anyhow::Error) -> Self {
        Self::Listing(format!("{:#}", err))
    }

    pub fn execution(op: &str, target: impl fmt::Display, err: &anyhow::Error) -> Self {
        Self::Execution {
            op: op.to_string(),
            target: target.to_string(),
            message: format!("{:#}", err),
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }

    /// 进程文件描述符耗尽（EMFILE），只能按错误文本识别
    pub fn is_fd_exhaustion(&self) -> bool {
        matches!(self, SyncError::TooManyOpenFiles(_))
            || self
                .to_string()
                .to_lowercase()
                .contains("too many open files")
    }
}

/// 汇总多个错误
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiError {
    errors: Vec<SyncError>,
}

impl MultiError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: SyncError) {
        self.errors.push(err);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SyncError> {
        self.errors.iter()
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.len() {
            0 => write!(f, "no errors"),
            1 => write!(f, "1 error occurred:\n\t* {}", self.errors[0]),
            n => {
                write!(f, "{} errors occurred:", n)?;
                for err in &self.errors {
                    write!(f, "\n\t* {}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for MultiError {}

impl Serialize for MultiError {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.errors.iter().map(|e| e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fd_exhaustion_detected_by_text() {
        let err = SyncError::Execution {
            op: "cp".to_string(),
            target: "s3://bucket/key".to_string(),
            message: "open /tmp/x: Too many open files (os error 24)".to_string(),
        };
        assert!(err.is_fd_exhaustion());
        assert!(!SyncError::Listing("permission denied".to_string()).is_fd_exhaustion());
    }

    #[test]
    fn test_multi_error_display() {
        let mut merr = MultiError::new();
        assert_eq!(merr.to_string(), "no errors");

        merr.push(SyncError::plan("a"));
        merr.push(SyncError::plan("b"));
        assert_eq!(merr.len(), 2);
        assert_eq!(merr.to_string(), "2 errors occurred:\n\t* a\n\t* b");
    }
}

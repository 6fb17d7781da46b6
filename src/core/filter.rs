//! 对象过滤：决定哪些对象参与比较

use crate::error::SyncError;
use crate::storage::url::{glob_to_regex, normalize};
use crate::storage::Object;
use regex::Regex;
use tracing::{error, warn};

/// 对象不参与比较的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ineligible {
    Directory,
    /// 取消导致的错误，由别处上报
    Cancelled,
    Errored(SyncError),
    /// 归档存储，需要先 restore
    Archived,
    Excluded,
}

/// 跳过过滤器
#[derive(Debug, Clone, Default)]
pub struct SkipFilter {
    excludes: Vec<Regex>,
    command: String,
}

impl SkipFilter {
    /// 编译 --exclude 规则
    pub fn new(exclude_patterns: &[String]) -> Result<Self, SyncError> {
        let excludes = exclude_patterns
            .iter()
            .map(|pattern| {
                Regex::new(&glob_to_regex(&normalize(pattern))).map_err(|e| {
                    SyncError::validation(format!("invalid exclude pattern {:?}: {}", pattern, e))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            excludes,
            command: String::new(),
        })
    }

    /// 上报错误时附带的命令行
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    /// 按相对路径或文件名匹配排除规则
    pub fn is_excluded(&self, object: &Object) -> bool {
        let relative = object.url.relative();
        let base = object.url.base();
        self.excludes
            .iter()
            .any(|re| re.is_match(relative) || re.is_match(base))
    }

    /// 按顺序应用规则，返回第一个命中的原因
    pub fn classify(&self, object: &Object) -> Option<Ineligible> {
        if object.typ.is_dir() {
            return Some(Ineligible::Directory);
        }

        if let Some(err) = &object.err {
            if err.is_cancellation() {
                return Some(Ineligible::Cancelled);
            }
            return Some(Ineligible::Errored(err.clone()));
        }

        if object.storage_class.is_glacier() {
            return Some(Ineligible::Archived);
        }

        if self.is_excluded(object) {
            return Some(Ineligible::Excluded);
        }

        None
    }

    /// `verbose` 为 false 时不上报（目标端的列举错误是预期内的）
    pub fn should_skip(&self, object: &Object, verbose: bool) -> bool {
        let Some(reason) = self.classify(object) else {
            return false;
        };

        if verbose {
            match &reason {
                Ineligible::Errored(err) => {
                    error!(command = %self.command, "ERROR {}", err);
                }
                Ineligible::Archived => {
                    let err = SyncError::ArchivedObject(object.url.to_string());
                    warn!(command = %self.command, "{}", err);
                }
                Ineligible::Directory | Ineligible::Cancelled | Ineligible::Excluded => {}
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{StorageClass, StorageUrl};

    fn object(relative: &str) -> Object {
        let base = StorageUrl::parse("s3://bucket/*", false).unwrap();
        Object::file(StorageUrl::object(&base, relative, relative), 1, None)
    }

    #[test]
    fn test_rules_in_order() {
        let filter = SkipFilter::default();

        let dir = Object::dir(StorageUrl::parse("s3://bucket/dir/", false).unwrap());
        assert_eq!(filter.classify(&dir), Some(Ineligible::Directory));

        let mut cancelled = object("a.txt");
        cancelled.err = Some(SyncError::Cancelled);
        assert_eq!(filter.classify(&cancelled), Some(Ineligible::Cancelled));

        let mut failed = object("a.txt");
        failed.err = Some(SyncError::Listing("access denied".to_string()));
        assert!(matches!(filter.classify(&failed), Some(Ineligible::Errored(_))));

        let archived = object("a.txt").with_storage_class(StorageClass::Glacier);
        assert_eq!(filter.classify(&archived), Some(Ineligible::Archived));

        assert_eq!(filter.classify(&object("a.txt")), None);
    }

    #[test]
    fn test_directory_wins_over_error() {
        let filter = SkipFilter::default();
        let mut dir = Object::dir(StorageUrl::parse("s3://bucket/dir/", false).unwrap());
        dir.err = Some(SyncError::Listing("boom".to_string()));
        assert_eq!(filter.classify(&dir), Some(Ineligible::Directory));
    }

    #[test]
    fn test_exclude_patterns() {
        let filter = SkipFilter::new(&["*.txt".to_string(), "logs/*".to_string()]).unwrap();
        assert!(filter.should_skip(&object("a.txt"), false));
        assert!(filter.should_skip(&object("deep/b.txt"), false));
        assert!(filter.should_skip(&object("logs/today.gz"), false));
        assert!(!filter.should_skip(&object("data/today.gz"), false));
    }

    #[test]
    fn test_filter_is_idempotent() {
        let filter = SkipFilter::new(&["*.tmp".to_string()]).unwrap();
        let mut errored = object("x.bin");
        errored.err = Some(SyncError::NoObjectFound);
        let input = vec![
            object("a.bin"),
            object("b.tmp"),
            errored,
            object("c.bin").with_storage_class(StorageClass::DeepArchive),
            Object::dir(StorageUrl::parse("s3://bucket/d/", false).unwrap()),
        ];

        let once: Vec<_> = input
            .into_iter()
            .filter(|o| !filter.should_skip(o, false))
            .collect();
        let twice: Vec<_> = once
            .iter()
            .filter(|o| !filter.should_skip(o, false))
            .cloned()
            .collect();

        assert_eq!(once.len(), 1);
        assert_eq!(once[0].url, twice[0].url);
        assert_eq!(twice.len(), once.len());
    }
}

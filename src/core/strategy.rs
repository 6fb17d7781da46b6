//! 同步策略：判断一对对象是否已经同步

use crate::storage::Object;
use thiserror::Error;

/// 不需要复制的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SkipReason {
    #[error("object size matches")]
    SizesMatch,
    #[error("object is newer or same age and object size matches")]
    DestinationNotOlderAndSizesMatch,
    #[error("object etag matches")]
    EtagsMatch,
}

/// 比较策略，每次运行选定一次
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncStrategy {
    /// 只比较大小
    SizeOnly,
    /// 大小 + 修改时间（可用时再比较 etag）
    #[default]
    SizeAndModification,
}

impl SyncStrategy {
    pub fn new(size_only: bool) -> Self {
        if size_only {
            SyncStrategy::SizeOnly
        } else {
            SyncStrategy::SizeAndModification
        }
    }

    /// `Err` 表示已经同步、不需要复制；`Ok(())` 表示需要复制。
    ///
    /// 调用方按 `Err` 分支跳过，不要改成布尔值。
    pub fn should_sync(&self, source: &Object, destination: &Object) -> Result<(), SkipReason> {
        match self {
            SyncStrategy::SizeOnly => {
                if source.size == destination.size {
                    return Err(SkipReason::SizesMatch);
                }
                Ok(())
            }
            SyncStrategy::SizeAndModification => {
                if source.size != destination.size {
                    return Ok(());
                }

                // 缺少修改时间时按"源不比目标新"处理
                let source_newer = match (source.mod_time, destination.mod_time) {
                    (Some(src), Some(dst)) => src > dst,
                    _ => false,
                };
                if !source_newer {
                    return Err(SkipReason::DestinationNotOlderAndSizesMatch);
                }

                if let (Some(src), Some(dst)) = (&source.etag, &destination.etag) {
                    if src == dst {
                        return Err(SkipReason::EtagsMatch);
                    }
                }

                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageUrl;
    use chrono::{DateTime, Duration, Utc};

    fn object(size: u64, mod_time: Option<DateTime<Utc>>) -> Object {
        Object::file(StorageUrl::parse("s3://bucket/key", false).unwrap(), size, mod_time)
    }

    #[test]
    fn test_size_only() {
        let now = Utc::now();
        let strategy = SyncStrategy::new(true);

        let older = object(10, Some(now - Duration::hours(1)));
        let newer = object(10, Some(now));
        assert_eq!(strategy.should_sync(&newer, &older), Err(SkipReason::SizesMatch));

        // 大小不同时无论时间如何都需要复制
        let bigger = object(11, Some(now - Duration::hours(2)));
        assert_eq!(strategy.should_sync(&bigger, &newer), Ok(()));
    }

    #[test]
    fn test_size_and_modification() {
        let now = Utc::now();
        let strategy = SyncStrategy::new(false);

        let src = object(10, Some(now - Duration::hours(1)));
        let dst = object(10, Some(now));
        assert_eq!(
            strategy.should_sync(&src, &dst),
            Err(SkipReason::DestinationNotOlderAndSizesMatch)
        );

        let same_time = object(10, Some(now));
        assert!(strategy.should_sync(&same_time, &dst).is_err());

        let newer_src = object(10, Some(now + Duration::hours(1)));
        assert_eq!(strategy.should_sync(&newer_src, &dst), Ok(()));

        let different_size = object(12, Some(now - Duration::hours(5)));
        assert_eq!(strategy.should_sync(&different_size, &dst), Ok(()));
    }

    #[test]
    fn test_matching_etag_skips_newer_source() {
        let now = Utc::now();
        let strategy = SyncStrategy::default();

        let src = object(10, Some(now + Duration::hours(1))).with_etag("abc");
        let dst = object(10, Some(now)).with_etag("abc");
        assert_eq!(strategy.should_sync(&src, &dst), Err(SkipReason::EtagsMatch));

        let changed = object(10, Some(now + Duration::hours(1))).with_etag("def");
        assert_eq!(strategy.should_sync(&changed, &dst), Ok(()));
    }

    #[test]
    fn test_missing_mod_time() {
        let strategy = SyncStrategy::default();
        let src = object(10, None);
        let dst = object(10, Some(Utc::now()));
        assert!(strategy.should_sync(&src, &dst).is_err());
        assert_eq!(strategy.should_sync(&object(3, None), &dst), Ok(()));
    }
}

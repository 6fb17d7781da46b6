use crate::error::SyncError;
use crate::storage::{Storage, StorageUrl};

/// 源是否会展开成多个对象：通配符，或者本地目录
pub async fn is_batch(source: &StorageUrl, client: &dyn Storage) -> bool {
    if source.is_wildcard() {
        return true;
    }
    if source.is_remote() {
        return false;
    }
    matches!(client.stat(source).await, Ok(Some(obj)) if obj.typ.is_dir())
}

/// 计算只在源中存在的对象在目标中的位置
pub fn resolve_destination(
    source: &StorageUrl,
    destination: &StorageUrl,
    is_batch: bool,
) -> Result<StorageUrl, SyncError> {
    let name = if is_batch {
        source.relative()
    } else {
        source.base()
    };
    if name.is_empty() {
        return Err(SyncError::plan(format!(
            "cannot resolve destination name for {}",
            source
        )));
    }

    if is_batch {
        return Ok(destination.join(name));
    }

    if destination.is_remote() && !destination.is_prefix() && !destination.is_bucket() {
        // 精确 key
        return Ok(destination.clone());
    }

    Ok(destination.join(name))
}

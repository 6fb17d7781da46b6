use crate::storage::{Object, StorageUrl};
use std::cmp::Ordering;

/// 两侧相同相对路径上的一对对象
#[derive(Debug, Clone)]
pub struct ObjectPair {
    pub source: Object,
    pub destination: Object,
}

/// 比较结果：三个互不相交的分区
#[derive(Debug, Clone, Default)]
pub struct DiffResult {
    pub source_only: Vec<StorageUrl>,
    pub destination_only: Vec<StorageUrl>,
    pub common: Vec<ObjectPair>,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.source_only.is_empty() && self.destination_only.is_empty() && self.common.is_empty()
    }
}

/// 按相对路径稳定排序（相对路径已统一为 /）
fn sort_by_relative(objects: &mut [Object]) {
    objects.sort_by(|a, b| a.url.relative().cmp(b.url.relative()));
}

/// 比较源和目标对象，返回只在源、只在目标和两边都有的对象
///
/// 先排序再做一次线性的归并连接，避免为大列表建立索引。
/// 同一侧不应出现重复的相对路径。
pub fn compare_objects(mut source: Vec<Object>, mut destination: Vec<Object>) -> DiffResult {
    sort_by_relative(&mut source);
    sort_by_relative(&mut destination);

    let mut result = DiffResult::default();
    let mut src = source.into_iter().peekable();
    let mut dst = destination.into_iter().peekable();

    loop {
        let order = match (src.peek(), dst.peek()) {
            (None, None) => break,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(s), Some(d)) => s.url.relative().cmp(d.url.relative()),
        };

        match order {
            Ordering::Less => {
                if let Some(s) = src.next() {
                    result.source_only.push(s.url);
                }
            }
            Ordering::Greater => {
                if let Some(d) = dst.next() {
                    result.destination_only.push(d.url);
                }
            }
            Ordering::Equal => {
                if let (Some(source), Some(destination)) = (src.next(), dst.next()) {
                    result.common.push(ObjectPair {
                        source,
                        destination,
                    });
                }
            }
        }
    }

    result
}

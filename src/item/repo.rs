pub mod memory;
pub mod mongo;

pub use memory::{MemoryBookStore, MemoryInterestStore};
pub use mongo::{BookMongoStore, InterestMongoStore};

use chrono::{DateTime, Utc};

/// 스냅샷 정렬 순서로 생성 시각 내림차순으로 정렬하며 생성 시각이 없는 문서는 마지막에 둔다.
pub(crate) fn sort_by_created_desc<T, F>(records: &mut [T], created_at: F)
where
    F: Fn(&T) -> Option<DateTime<Utc>>
{
    records.sort_by(|a, b| created_at(b).cmp(&created_at(a)));
}

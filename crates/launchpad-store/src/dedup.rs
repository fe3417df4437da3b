use std::time::Duration;

use moka::future::Cache;
use uuid::Uuid;

/// Remembers recently delivered envelope ids.
///
/// The transport delivers at least once; an id seen within the TTL is a
/// redelivery and must not be processed again. Entries are evicted after
/// TTL or when capacity is exceeded.
pub struct DeliveryFilter {
    seen: Cache<Uuid, ()>,
}

impl DeliveryFilter {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            seen: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Mark `id` as delivered. Returns `true` the first time an id is seen
    /// and `false` for a redelivery.
    pub async fn check_and_mark(&self, id: Uuid) -> bool {
        let entry = self.seen.entry(id).or_insert(()).await;
        entry.is_fresh()
    }

    pub async fn contains(&self, id: &Uuid) -> bool {
        self.seen.get(id).await.is_some()
    }

    pub fn entry_count(&self) -> u64 {
        self.seen.entry_count()
    }
}

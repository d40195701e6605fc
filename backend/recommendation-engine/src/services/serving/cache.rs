/// Per-subject response cache with a fixed TTL and bounded capacity
///
/// Entries remember the model version they were computed on; a lookup
/// against a different version is a miss.
use crate::models::RecommendationResponse;
use moka::sync::Cache;
use std::time::Duration;

pub struct ResponseCache {
    entries: Cache<String, RecommendationResponse>,
    enabled: bool,
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl.max(Duration::from_millis(1)))
            .build();

        Self {
            entries,
            enabled: !ttl.is_zero() && max_capacity > 0,
        }
    }

    /// Fresh response for `model_version` holding at least `count` items
    pub fn get(
        &self,
        subject_id: &str,
        count: usize,
        model_version: &str,
    ) -> Option<RecommendationResponse> {
        let mut response = self.entries.get(subject_id)?;
        if response.model_version != model_version {
            self.entries.invalidate(subject_id);
            return None;
        }
        if response.recommendations.len() < count {
            return None;
        }

        response.recommendations.truncate(count);
        Some(response)
    }

    pub fn put(&self, subject_id: &str, response: RecommendationResponse) {
        if !self.enabled {
            return;
        }
        self.entries.insert(subject_id.to_string(), response);
    }

    pub fn invalidate(&self, subject_id: &str) {
        self.entries.invalidate(subject_id);
    }

    pub fn clear(&self) {
        self.entries.invalidate_all();
    }

    /// Entry count after pending evictions have been applied
    pub fn len(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Published model snapshots
///
/// A snapshot bundles the factor model, the embedding index and the
/// popularity ranking of one training run. Serving reads the current
/// snapshot through an `Arc`; publishing replaces the pointer, so in-flight
/// requests finish against the snapshot they started with.
use crate::models::ScoredItem;
use crate::services::embeddings::EmbeddingIndex;
use crate::services::ranking::rank;
use crate::services::training::FactorModel;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, RwLock};
use tracing::info;

#[derive(Debug, Clone)]
pub struct ModelSnapshot {
    version: String,
    factor_model: Option<FactorModel>,
    embedding_index: EmbeddingIndex,
    popularity: Vec<ScoredItem>,
    candidates: Vec<String>,
    published_at: DateTime<Utc>,
}

impl ModelSnapshot {
    pub fn new(
        version: impl Into<String>,
        factor_model: Option<FactorModel>,
        embedding_index: EmbeddingIndex,
        popularity: Vec<(String, f64)>,
    ) -> Self {
        let mut popularity: Vec<ScoredItem> = popularity
            .into_iter()
            .map(|(item_id, score)| ScoredItem { item_id, score })
            .collect();
        rank(&mut popularity);

        let mut candidates: BTreeSet<String> =
            embedding_index.item_ids().map(str::to_string).collect();
        if let Some(model) = &factor_model {
            candidates.extend(model.item_ids().iter().cloned());
        }

        Self {
            version: version.into(),
            factor_model,
            embedding_index,
            popularity,
            candidates: candidates.into_iter().collect(),
            published_at: Utc::now(),
        }
    }

    /// Snapshot with no items, served until the first model is published
    pub fn empty() -> Self {
        Self::new("empty", None, EmbeddingIndex::empty(), Vec::new())
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn factor_model(&self) -> Option<&FactorModel> {
        self.factor_model.as_ref()
    }

    pub fn embedding_index(&self) -> &EmbeddingIndex {
        &self.embedding_index
    }

    pub fn published_at(&self) -> DateTime<Utc> {
        self.published_at
    }

    pub fn has_user(&self, user_id: &str) -> bool {
        self.factor_model
            .as_ref()
            .map(|model| model.has_user(user_id))
            .unwrap_or(false)
    }

    /// Every servable item id, ascending
    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    /// Most popular items not in `exclude`. Without popularity data, items
    /// are taken in id order with a score of 0.
    pub fn trending(&self, count: usize, exclude: &[String]) -> Vec<ScoredItem> {
        let exclude: HashSet<&str> = exclude.iter().map(String::as_str).collect();
        if self.popularity.is_empty() {
            return self
                .candidates
                .iter()
                .filter(|id| !exclude.contains(id.as_str()))
                .take(count)
                .map(|id| ScoredItem {
                    item_id: id.clone(),
                    score: 0.0,
                })
                .collect();
        }
        self.popularity
            .iter()
            .filter(|item| !exclude.contains(item.item_id.as_str()))
            .take(count)
            .cloned()
            .collect()
    }
}

/// Holder of the current snapshot
#[derive(Debug)]
pub struct SnapshotStore {
    current: RwLock<Arc<ModelSnapshot>>,
}

impl SnapshotStore {
    pub fn new(snapshot: ModelSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// The snapshot new requests should read
    pub fn current(&self) -> Arc<ModelSnapshot> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Swap in a new snapshot; returns the one it replaced
    pub fn publish(&self, snapshot: ModelSnapshot) -> Arc<ModelSnapshot> {
        let next = Arc::new(snapshot);
        info!(
            version = %next.version,
            items = next.candidates.len(),
            "Publishing model snapshot"
        );
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *guard, next)
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new(ModelSnapshot::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn index(ids: &[&str]) -> EmbeddingIndex {
        let vectors: BTreeMap<String, Vec<f32>> = ids
            .iter()
            .map(|id| (id.to_string(), vec![1.0, 0.0]))
            .collect();
        EmbeddingIndex::from_vectors(2, "test", vectors).unwrap()
    }

    #[test]
    fn test_trending_ranks_by_popularity() {
        let snapshot = ModelSnapshot::new(
            "v1",
            None,
            index(&["a", "b", "c"]),
            vec![
                ("a".to_string(), 1.0),
                ("b".to_string(), 5.0),
                ("c".to_string(), 3.0),
            ],
        );
        let ids: Vec<String> = snapshot
            .trending(2, &["b".to_string()])
            .into_iter()
            .map(|s| s.item_id)
            .collect();
        assert_eq!(ids, vec!["c", "a"]);
    }

    #[test]
    fn test_trending_without_popularity_uses_id_order() {
        let snapshot = ModelSnapshot::new("v1", None, index(&["z", "m", "a"]), Vec::new());
        let trending = snapshot.trending(10, &[]);
        assert_eq!(trending.len(), 3);
        assert_eq!(trending[0].item_id, "a");
        assert!(ModelSnapshot::empty().trending(5, &[]).is_empty());
    }

    #[test]
    fn test_publish_swaps_without_affecting_readers() {
        let store = SnapshotStore::new(ModelSnapshot::new("v1", None, index(&["a"]), Vec::new()));
        let in_flight = store.current();

        let previous = store.publish(ModelSnapshot::new("v2", None, index(&["a", "b"]), Vec::new()));

        assert_eq!(previous.version(), "v1");
        assert_eq!(in_flight.version(), "v1");
        assert_eq!(in_flight.candidates().len(), 1);
        assert_eq!(store.current().version(), "v2");
        assert_eq!(store.current().candidates().len(), 2);
    }
}

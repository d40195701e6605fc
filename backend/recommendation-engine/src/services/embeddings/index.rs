/// Embedding Index - item id → content vector of fixed dimension D
///
/// Built offline through an `EmbeddingProvider`, then read-only. Persisted as
/// human-readable JSON:
/// { "format_version": 1, "dimension": D, "model_name": "...",
///   "embeddings": { "<item_id>": [f32; D], ... } }
use super::EmbeddingProvider;
use crate::error::{EngineError, Result};
use crate::models::{ContentItem, ScoredItem};
use crate::utils::{compare_ranked, cosine_similarity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

pub const EMBEDDING_INDEX_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingIndex {
    dimension: usize,
    model_name: String,
    vectors: BTreeMap<String, Vec<f32>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EmbeddingIndexFile {
    format_version: u32,
    dimension: usize,
    model_name: String,
    embeddings: BTreeMap<String, Vec<f32>>,
}

impl EmbeddingIndex {
    /// Encode `"{title} {description}"` of every item, `batch_size` texts per call
    pub async fn build(
        items: &[ContentItem],
        provider: &dyn EmbeddingProvider,
        batch_size: usize,
    ) -> Result<Self> {
        let dimension = provider.dimension();
        let mut vectors = BTreeMap::new();

        for batch in items.chunks(batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(ContentItem::embedding_text).collect();
            let encoded = provider.encode(&texts).await?;
            if encoded.len() != batch.len() {
                return Err(EngineError::EmbeddingProvider(format!(
                    "provider returned {} vectors for {} texts",
                    encoded.len(),
                    batch.len()
                )));
            }

            for (item, vector) in batch.iter().zip(encoded) {
                validate_vector(&item.id, &vector, dimension)?;
                if vectors.insert(item.id.clone(), vector).is_some() {
                    return Err(EngineError::Construction(format!(
                        "duplicate content item id: {}",
                        item.id
                    )));
                }
            }
        }

        info!(
            items = vectors.len(),
            dimension = dimension,
            model = provider.model_name(),
            "Embedding index built"
        );

        Ok(Self {
            dimension,
            model_name: provider.model_name().to_string(),
            vectors,
        })
    }

    pub fn from_vectors(
        dimension: usize,
        model_name: impl Into<String>,
        vectors: BTreeMap<String, Vec<f32>>,
    ) -> Result<Self> {
        for (id, vector) in &vectors {
            validate_vector(id, vector, dimension)?;
        }
        Ok(Self {
            dimension,
            model_name: model_name.into(),
            vectors,
        })
    }

    pub fn empty() -> Self {
        Self {
            dimension: 0,
            model_name: "none".to_string(),
            vectors: BTreeMap::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn contains(&self, item_id: &str) -> bool {
        self.vectors.contains_key(item_id)
    }

    pub fn vector(&self, item_id: &str) -> Option<&[f32]> {
        self.vectors.get(item_id).map(Vec::as_slice)
    }

    /// Item ids in ascending order
    pub fn item_ids(&self) -> impl Iterator<Item = &str> {
        self.vectors.keys().map(String::as_str)
    }

    /// Cosine similarity of two indexed items, in [-1, 1]
    pub fn similarity(&self, item_a: &str, item_b: &str) -> Result<f64> {
        let a = self
            .vector(item_a)
            .ok_or_else(|| EngineError::UnknownItem(item_a.to_string()))?;
        let b = self
            .vector(item_b)
            .ok_or_else(|| EngineError::UnknownItem(item_b.to_string()))?;
        Ok(cosine_similarity(a, b))
    }

    /// Top-k items by cosine similarity to `query`, ties by ascending id
    pub fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<ScoredItem>> {
        self.nearest_filtered(query, k, |_| true)
    }

    /// Top-k items most similar to an indexed item, excluding the item itself
    pub fn similar_items(&self, item_id: &str, k: usize) -> Result<Vec<ScoredItem>> {
        let query = self
            .vector(item_id)
            .ok_or_else(|| EngineError::UnknownItem(item_id.to_string()))?;
        self.nearest_filtered(query, k, |id| id != item_id)
    }

    fn nearest_filtered<F>(&self, query: &[f32], k: usize, keep: F) -> Result<Vec<ScoredItem>>
    where
        F: Fn(&str) -> bool,
    {
        if query.len() != self.dimension {
            return Err(EngineError::DimensionMismatch(format!(
                "query has length {}, index dimension is {}",
                query.len(),
                self.dimension
            )));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<ScoredItem> = self
            .vectors
            .iter()
            .filter(|(id, _)| keep(id.as_str()))
            .map(|(id, vector)| ScoredItem {
                item_id: id.clone(),
                score: cosine_similarity(query, vector),
            })
            .collect();

        scored.sort_by(|a, b| compare_ranked(&a.item_id, a.score, &b.item_id, b.score));
        scored.truncate(k);
        Ok(scored)
    }

    /// Mean vector of the known items; `None` if none of them are indexed
    pub fn profile_vector<S: AsRef<str>>(&self, item_ids: &[S]) -> Option<Vec<f32>> {
        let mut sum = vec![0.0_f64; self.dimension];
        let mut count = 0usize;
        for vector in item_ids.iter().filter_map(|id| self.vector(id.as_ref())) {
            for (acc, v) in sum.iter_mut().zip(vector) {
                *acc += *v as f64;
            }
            count += 1;
        }
        if count == 0 {
            return None;
        }
        Some(sum.into_iter().map(|v| (v / count as f64) as f32).collect())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = EmbeddingIndexFile {
            format_version: EMBEDDING_INDEX_FORMAT_VERSION,
            dimension: self.dimension,
            model_name: self.model_name.clone(),
            embeddings: self.vectors.clone(),
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(&file)?)?;

        info!(
            path = %path.display(),
            items = self.vectors.len(),
            dimension = self.dimension,
            "Embedding index saved"
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path)?;
        let file: EmbeddingIndexFile = serde_json::from_slice(&raw)?;
        if file.format_version != EMBEDDING_INDEX_FORMAT_VERSION {
            return Err(EngineError::DimensionMismatch(format!(
                "unsupported embedding index format version {}",
                file.format_version
            )));
        }
        Self::from_vectors(file.dimension, file.model_name, file.embeddings)
    }
}

fn validate_vector(item_id: &str, vector: &[f32], dimension: usize) -> Result<()> {
    if vector.len() != dimension {
        return Err(EngineError::DimensionMismatch(format!(
            "item {} has a vector of length {}, expected {}",
            item_id,
            vector.len(),
            dimension
        )));
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(EngineError::DimensionMismatch(format!(
            "item {} has non-finite vector values",
            item_id
        )));
    }
    Ok(())
}

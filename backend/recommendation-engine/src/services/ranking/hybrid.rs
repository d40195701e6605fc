// ============================================
// Hybrid Scorer
// ============================================
//
// combined = w_cf × collaborative + w_content × content
//
// - collaborative: dot product of the user's and item's latent factors
// - content: cosine between the user's profile (mean embedding of recently
//   interacted items) and the item's embedding
//
// A missing term counts as 0: cold-start users and items fall back to
// content-only ranking. The weights come from the experiment variant and
// are independent coefficients, not a normalized mixture.

use crate::models::{ScoredItem, StrategyConfig};
use crate::services::embeddings::EmbeddingIndex;
use crate::services::training::FactorModel;
use crate::utils::{compare_ranked, cosine_similarity};
use std::collections::{HashMap, HashSet};

/// Scores candidates against one published model snapshot
pub struct HybridScorer<'a> {
    factor_model: Option<&'a FactorModel>,
    index: &'a EmbeddingIndex,
}

impl<'a> HybridScorer<'a> {
    pub fn new(factor_model: Option<&'a FactorModel>, index: &'a EmbeddingIndex) -> Self {
        Self {
            factor_model,
            index,
        }
    }

    /// Rank candidates for a user
    ///
    /// `history` holds the user's recent item ids and feeds the content
    /// profile. Duplicate candidates are scored once.
    pub fn score(
        &self,
        user_id: &str,
        history: &[String],
        candidates: &[String],
        strategy: &StrategyConfig,
    ) -> Vec<ScoredItem> {
        let collaborative = self.collaborative_scores(user_id, candidates);
        let content = self.content_scores(history, candidates);
        blend(candidates, &collaborative, &content, strategy)
    }

    /// Factor-model scores for known (user, item) pairs only
    pub fn collaborative_scores(&self, user_id: &str, candidates: &[String]) -> HashMap<String, f64> {
        self.factor_model
            .map(|model| model.scores_for(user_id, candidates))
            .unwrap_or_default()
    }

    /// Cosine between the history profile and each indexed candidate
    pub fn content_scores(&self, history: &[String], candidates: &[String]) -> HashMap<String, f64> {
        let Some(profile) = self.index.profile_vector(history) else {
            return HashMap::new();
        };
        candidates
            .iter()
            .filter_map(|item_id| {
                self.index
                    .vector(item_id)
                    .map(|vector| (item_id.clone(), cosine_similarity(&profile, vector)))
            })
            .collect()
    }

    pub fn has_user(&self, user_id: &str) -> bool {
        self.factor_model
            .map(|model| model.has_user(user_id))
            .unwrap_or(false)
    }
}

/// Weighted sum of the two score maps over the candidates, ranked
pub fn blend(
    candidates: &[String],
    collaborative: &HashMap<String, f64>,
    content: &HashMap<String, f64>,
    strategy: &StrategyConfig,
) -> Vec<ScoredItem> {
    let mut seen = HashSet::with_capacity(candidates.len());
    let mut scored: Vec<ScoredItem> = candidates
        .iter()
        .filter(|item_id| seen.insert(item_id.as_str()))
        .map(|item_id| {
            let cf = collaborative.get(item_id).copied().unwrap_or(0.0);
            let cb = content.get(item_id).copied().unwrap_or(0.0);
            ScoredItem {
                item_id: item_id.clone(),
                score: strategy.collaborative_weight * cf + strategy.content_weight * cb,
            }
        })
        .collect();

    rank(&mut scored);
    scored
}

/// Descending by score, ties by ascending item id
pub fn rank(items: &mut [ScoredItem]) {
    items.sort_by(|a, b| compare_ranked(&a.item_id, a.score, &b.item_id, b.score));
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::collections::BTreeMap;

    fn ids(items: &[ScoredItem]) -> Vec<&str> {
        items.iter().map(|s| s.item_id.as_str()).collect()
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn index() -> EmbeddingIndex {
        let mut vectors = BTreeMap::new();
        vectors.insert("i1".to_string(), vec![1.0, 0.0, 0.0]);
        vectors.insert("i2".to_string(), vec![0.8, 0.6, 0.0]);
        vectors.insert("i3".to_string(), vec![0.0, 1.0, 0.0]);
        vectors.insert("i4".to_string(), vec![0.0, 0.0, 1.0]);
        EmbeddingIndex::from_vectors(3, "test", vectors).unwrap()
    }

    fn factor_model() -> FactorModel {
        FactorModel::new(
            "v1",
            strings(&["alice"]),
            strings(&["i1", "i2", "i3"]),
            array![[1.0, 0.5]],
            array![[0.2, 0.2], [0.9, 0.0], [0.1, 0.1]],
        )
        .unwrap()
    }

    #[test]
    fn test_blend_closed_form() {
        let collaborative: HashMap<String, f64> =
            [("i1".to_string(), 0.8), ("i2".to_string(), 0.6)].into_iter().collect();
        let content: HashMap<String, f64> =
            [("i1".to_string(), 0.7), ("i3".to_string(), 0.9)].into_iter().collect();
        let strategy = StrategyConfig::new("hybrid_collaborative", 0.6, 0.4);

        let ranked = blend(&strings(&["i3", "i2", "i1"]), &collaborative, &content, &strategy);

        assert_eq!(ids(&ranked), vec!["i1", "i2", "i3"]);
        assert!((ranked[0].score - 0.76).abs() < 1e-12);
        assert!((ranked[1].score - 0.36).abs() < 1e-12);
        assert!((ranked[2].score - 0.36).abs() < 1e-12);
    }

    #[test]
    fn test_blend_deduplicates_and_handles_empty() {
        let strategy = StrategyConfig::new("hybrid", 1.0, 1.0);
        let ranked = blend(
            &strings(&["b", "a", "b"]),
            &HashMap::new(),
            &HashMap::new(),
            &strategy,
        );
        assert_eq!(ids(&ranked), vec!["a", "b"]);
        assert!(blend(&[], &HashMap::new(), &HashMap::new(), &strategy).is_empty());
    }

    #[test]
    fn test_weights_are_not_normalized() {
        let collaborative: HashMap<String, f64> = [("x".to_string(), 1.0)].into_iter().collect();
        let content: HashMap<String, f64> = [("x".to_string(), 1.0)].into_iter().collect();
        let ranked = blend(
            &strings(&["x"]),
            &collaborative,
            &content,
            &StrategyConfig::new("boosted", 0.8, 0.7),
        );
        assert!((ranked[0].score - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_score_known_user() {
        let model = factor_model();
        let index = index();
        let scorer = HybridScorer::new(Some(&model), &index);
        let strategy = StrategyConfig::new("hybrid_collaborative", 0.6, 0.4);

        let ranked = scorer.score(
            "alice",
            &strings(&["i1"]),
            &strings(&["i2", "i3", "i4"]),
            &strategy,
        );

        // i2: 0.6 × 0.9 + 0.4 × 0.8; i3: 0.6 × 0.15 + 0; i4: no factor row, orthogonal
        assert_eq!(ids(&ranked), vec!["i2", "i3", "i4"]);
        assert!((ranked[0].score - 0.86).abs() < 1e-6);
        assert!((ranked[1].score - 0.09).abs() < 1e-6);
        assert_eq!(ranked[2].score, 0.0);
    }

    #[test]
    fn test_cold_start_user_matches_content_only() {
        let model = factor_model();
        let index = index();
        let scorer = HybridScorer::new(Some(&model), &index);
        let candidates = strings(&["i1", "i2", "i3", "i4"]);
        let history = strings(&["i2"]);

        assert!(!scorer.has_user("newcomer"));
        let hybrid = scorer.score(
            "newcomer",
            &history,
            &candidates,
            &StrategyConfig::new("hybrid_collaborative", 0.6, 0.4),
        );
        let content_only = scorer.score(
            "newcomer",
            &history,
            &candidates,
            &StrategyConfig::content_only("content"),
        );

        assert_eq!(ids(&hybrid), ids(&content_only));
        for (h, c) in hybrid.iter().zip(&content_only) {
            assert!((h.score - 0.4 * c.score).abs() < 1e-12);
        }
    }

    #[test]
    fn test_no_model_and_no_history_scores_zero() {
        let index = index();
        let scorer = HybridScorer::new(None, &index);
        let ranked = scorer.score(
            "anyone",
            &[],
            &strings(&["i3", "i1"]),
            &StrategyConfig::new("hybrid", 0.6, 0.4),
        );
        assert_eq!(ids(&ranked), vec!["i1", "i3"]);
        assert!(ranked.iter().all(|s| s.score == 0.0));
    }
}

/// Factor Model - trained latent factors for collaborative scoring
///
/// `user_factors` is (U, K), `item_factors` is (I, K). The compatibility of a
/// (user, item) pair is the dot product of their rows. Read-only after
/// training; a retrain produces a new version.
///
/// On-disk format is self-describing JSON:
/// { format_version, version, trained_at, factors,
///   user_ids, item_ids,
///   user_factors: { rows, cols, data }, item_factors: { rows, cols, data } }
use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

pub const FACTOR_MODEL_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq)]
pub struct FactorModel {
    version: String,
    trained_at: DateTime<Utc>,
    user_ids: Vec<String>,
    item_ids: Vec<String>,
    user_index: HashMap<String, usize>,
    item_index: HashMap<String, usize>,
    user_factors: Array2<f64>,
    item_factors: Array2<f64>,
}

/// Row-major matrix with explicit shape
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DenseMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FactorModelFile {
    format_version: u32,
    version: String,
    trained_at: DateTime<Utc>,
    factors: usize,
    user_ids: Vec<String>,
    item_ids: Vec<String>,
    user_factors: DenseMatrix,
    item_factors: DenseMatrix,
}

impl FactorModel {
    pub fn new(
        version: impl Into<String>,
        user_ids: Vec<String>,
        item_ids: Vec<String>,
        user_factors: Array2<f64>,
        item_factors: Array2<f64>,
    ) -> Result<Self> {
        if user_factors.ncols() != item_factors.ncols() {
            return Err(EngineError::DimensionMismatch(format!(
                "user factors have K={}, item factors have K={}",
                user_factors.ncols(),
                item_factors.ncols()
            )));
        }
        if user_factors.nrows() != user_ids.len() {
            return Err(EngineError::DimensionMismatch(format!(
                "{} user ids for {} user factor rows",
                user_ids.len(),
                user_factors.nrows()
            )));
        }
        if item_factors.nrows() != item_ids.len() {
            return Err(EngineError::DimensionMismatch(format!(
                "{} item ids for {} item factor rows",
                item_ids.len(),
                item_factors.nrows()
            )));
        }

        Ok(Self {
            version: version.into(),
            trained_at: Utc::now(),
            user_index: index_of(&user_ids)?,
            item_index: index_of(&item_ids)?,
            user_ids,
            item_ids,
            user_factors,
            item_factors,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn trained_at(&self) -> DateTime<Utc> {
        self.trained_at
    }

    /// Latent dimension K
    pub fn factors(&self) -> usize {
        self.user_factors.ncols()
    }

    pub fn user_factors(&self) -> &Array2<f64> {
        &self.user_factors
    }

    pub fn item_factors(&self) -> &Array2<f64> {
        &self.item_factors
    }

    pub fn user_ids(&self) -> &[String] {
        &self.user_ids
    }

    pub fn item_ids(&self) -> &[String] {
        &self.item_ids
    }

    pub fn has_user(&self, user_id: &str) -> bool {
        self.user_index.contains_key(user_id)
    }

    pub fn has_item(&self, item_id: &str) -> bool {
        self.item_index.contains_key(item_id)
    }

    pub fn user_vector(&self, user_id: &str) -> Option<ArrayView1<'_, f64>> {
        self.user_index
            .get(user_id)
            .map(|&u| self.user_factors.row(u))
    }

    /// Dot product of the user and item rows; `None` if either is unknown
    pub fn score(&self, user_id: &str, item_id: &str) -> Option<f64> {
        let user = self.user_vector(user_id)?;
        let item = self.item_index.get(item_id).map(|&i| self.item_factors.row(i))?;
        Some(user.dot(&item))
    }

    /// Scores for the known candidates of a known user
    pub fn scores_for(&self, user_id: &str, item_ids: &[String]) -> HashMap<String, f64> {
        let Some(user) = self.user_vector(user_id) else {
            return HashMap::new();
        };
        item_ids
            .iter()
            .filter_map(|item_id| {
                self.item_index
                    .get(item_id)
                    .map(|&i| (item_id.clone(), user.dot(&self.item_factors.row(i))))
            })
            .collect()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = FactorModelFile {
            format_version: FACTOR_MODEL_FORMAT_VERSION,
            version: self.version.clone(),
            trained_at: self.trained_at,
            factors: self.factors(),
            user_ids: self.user_ids.clone(),
            item_ids: self.item_ids.clone(),
            user_factors: to_dense_matrix(&self.user_factors),
            item_factors: to_dense_matrix(&self.item_factors),
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec(&file)?)?;

        info!(
            path = %path.display(),
            version = %self.version,
            users = self.user_ids.len(),
            items = self.item_ids.len(),
            factors = self.factors(),
            "Factor model saved"
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path)?;
        let file: FactorModelFile = serde_json::from_slice(&raw)?;

        if file.format_version != FACTOR_MODEL_FORMAT_VERSION {
            return Err(EngineError::DimensionMismatch(format!(
                "unsupported factor model format version {}",
                file.format_version
            )));
        }

        let user_factors = from_dense_matrix("user_factors", file.user_factors, file.factors)?;
        let item_factors = from_dense_matrix("item_factors", file.item_factors, file.factors)?;

        let mut model = Self::new(
            file.version,
            file.user_ids,
            file.item_ids,
            user_factors,
            item_factors,
        )?;
        model.trained_at = file.trained_at;
        Ok(model)
    }
}

fn to_dense_matrix(matrix: &Array2<f64>) -> DenseMatrix {
    DenseMatrix {
        rows: matrix.nrows(),
        cols: matrix.ncols(),
        data: matrix.iter().copied().collect(),
    }
}

fn from_dense_matrix(name: &str, matrix: DenseMatrix, factors: usize) -> Result<Array2<f64>> {
    if matrix.cols != factors {
        return Err(EngineError::DimensionMismatch(format!(
            "{} has {} columns, model declares K={}",
            name, matrix.cols, factors
        )));
    }
    if matrix.data.iter().any(|v| !v.is_finite()) {
        return Err(EngineError::DimensionMismatch(format!(
            "{} contains non-finite values",
            name
        )));
    }
    let expected = matrix.rows * matrix.cols;
    let actual = matrix.data.len();
    Array2::from_shape_vec((matrix.rows, matrix.cols), matrix.data).map_err(|_| {
        EngineError::DimensionMismatch(format!(
            "{} declares {}x{} but holds {} values (expected {})",
            name, matrix.rows, matrix.cols, actual, expected
        ))
    })
}

fn index_of(ids: &[String]) -> Result<HashMap<String, usize>> {
    let mut index = HashMap::with_capacity(ids.len());
    for (position, id) in ids.iter().enumerate() {
        if index.insert(id.clone(), position).is_some() {
            return Err(EngineError::DimensionMismatch(format!("duplicate id: {}", id)));
        }
    }
    Ok(index)
}

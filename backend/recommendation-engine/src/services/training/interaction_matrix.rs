// ============================================
// Interaction Matrix (subject × item feedback)
// ============================================
//
// Sparse row-major storage: one row per subject holding (item_index, value)
// pairs sorted by item index. Ids map to dense indices in first-seen order.
// Immutable once built; the trainer reads it through `to_dense()`.

use crate::error::{EngineError, Result};
use crate::models::InteractionRecord;
use ndarray::Array2;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct InteractionMatrix {
    subject_ids: Vec<String>,
    item_ids: Vec<String>,
    subject_index: HashMap<String, usize>,
    item_index: HashMap<String, usize>,
    rows: Vec<Vec<(usize, f64)>>,
}

impl InteractionMatrix {
    /// Build from a dense grid with generated ids `user_{row}` / `item_{col}`
    pub fn from_dense(values: &[Vec<f64>]) -> Result<Self> {
        let n_items = values.first().map(Vec::len).unwrap_or(0);
        let subject_ids = (0..values.len()).map(|u| format!("user_{}", u)).collect();
        let item_ids = (0..n_items).map(|i| format!("item_{}", i)).collect();
        Self::from_dense_with_ids(subject_ids, item_ids, values)
    }

    /// Build from a dense grid with explicit row and column ids
    pub fn from_dense_with_ids(
        subject_ids: Vec<String>,
        item_ids: Vec<String>,
        values: &[Vec<f64>],
    ) -> Result<Self> {
        if values.is_empty() || item_ids.is_empty() {
            return Err(EngineError::Construction(
                "interaction matrix must have at least one row and one column".to_string(),
            ));
        }
        if subject_ids.len() != values.len() {
            return Err(EngineError::Construction(format!(
                "{} subject ids for {} rows",
                subject_ids.len(),
                values.len()
            )));
        }

        let mut rows = Vec::with_capacity(values.len());
        for (u, row) in values.iter().enumerate() {
            if row.len() != item_ids.len() {
                return Err(EngineError::Construction(format!(
                    "row {} has {} columns, expected {}",
                    u,
                    row.len(),
                    item_ids.len()
                )));
            }
            let mut sparse = Vec::new();
            for (i, value) in row.iter().enumerate() {
                check_finite(*value, u, i)?;
                if *value != 0.0 {
                    sparse.push((i, *value));
                }
            }
            rows.push(sparse);
        }

        Ok(Self {
            subject_index: index_of(&subject_ids)?,
            item_index: index_of(&item_ids)?,
            subject_ids,
            item_ids,
            rows,
        })
    }

    /// Build from feedback rows; repeated (subject, item) pairs are summed
    pub fn from_records(records: &[InteractionRecord]) -> Result<Self> {
        if records.is_empty() {
            return Err(EngineError::Construction(
                "no interaction records".to_string(),
            ));
        }

        let mut subject_ids = Vec::new();
        let mut item_ids = Vec::new();
        let mut subject_index: HashMap<String, usize> = HashMap::new();
        let mut item_index: HashMap<String, usize> = HashMap::new();
        let mut cells: Vec<HashMap<usize, f64>> = Vec::new();

        for record in records {
            let u = *subject_index
                .entry(record.subject_id.clone())
                .or_insert_with(|| {
                    subject_ids.push(record.subject_id.clone());
                    cells.push(HashMap::new());
                    subject_ids.len() - 1
                });
            let i = *item_index.entry(record.item_id.clone()).or_insert_with(|| {
                item_ids.push(record.item_id.clone());
                item_ids.len() - 1
            });
            check_finite(record.value, u, i)?;
            *cells[u].entry(i).or_insert(0.0) += record.value;
        }

        let rows = cells
            .into_iter()
            .map(|row| {
                let mut sparse: Vec<(usize, f64)> =
                    row.into_iter().filter(|(_, v)| *v != 0.0).collect();
                sparse.sort_unstable_by_key(|(i, _)| *i);
                sparse
            })
            .collect();

        Ok(Self {
            subject_ids,
            item_ids,
            subject_index,
            item_index,
            rows,
        })
    }

    pub fn n_subjects(&self) -> usize {
        self.subject_ids.len()
    }

    pub fn n_items(&self) -> usize {
        self.item_ids.len()
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.n_subjects(), self.n_items())
    }

    pub fn subject_ids(&self) -> &[String] {
        &self.subject_ids
    }

    pub fn item_ids(&self) -> &[String] {
        &self.item_ids
    }

    pub fn subject_position(&self, subject_id: &str) -> Option<usize> {
        self.subject_index.get(subject_id).copied()
    }

    pub fn item_position(&self, item_id: &str) -> Option<usize> {
        self.item_index.get(item_id).copied()
    }

    /// Non-zero cells of a row as (item_index, value), ascending by item index
    pub fn row_items(&self, subject: usize) -> &[(usize, f64)] {
        self.rows.get(subject).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn nnz(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    pub fn to_dense(&self) -> Array2<f64> {
        let mut dense = Array2::zeros(self.shape());
        for (u, row) in self.rows.iter().enumerate() {
            for (i, value) in row {
                dense[[u, *i]] = *value;
            }
        }
        dense
    }

    /// Total feedback per item, in item index order
    pub fn item_popularity(&self) -> Vec<(String, f64)> {
        let mut totals = vec![0.0; self.n_items()];
        for row in &self.rows {
            for (i, value) in row {
                totals[*i] += value;
            }
        }
        self.item_ids.iter().cloned().zip(totals).collect()
    }
}

fn check_finite(value: f64, row: usize, col: usize) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(EngineError::Construction(format!(
            "non-finite value at ({}, {})",
            row, col
        )))
    }
}

fn index_of(ids: &[String]) -> Result<HashMap<String, usize>> {
    let mut index = HashMap::with_capacity(ids.len());
    for (position, id) in ids.iter().enumerate() {
        if index.insert(id.clone(), position).is_some() {
            return Err(EngineError::Construction(format!("duplicate id: {}", id)));
        }
    }
    Ok(index)
}

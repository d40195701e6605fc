// ============================================
// Matrix Factorization Trainer (ALS)
// ============================================
//
// Alternating Least Squares over the dense interaction matrix R (U × I):
//
//   for each iteration:
//     users ← argmin ||R - users · itemsᵀ||²  (items fixed, one solve per row)
//     items ← argmin ||Rᵀ - items · usersᵀ||² (users fixed, one solve per row)
//
// Each pass factors the Gram matrix of the fixed side once, then solves all
// rows in parallel (rayon) into a fresh matrix. The item pass only starts once
// every user row of the same iteration has been written.
//
// Loss = mean((R - users · itemsᵀ)²), reported every `loss_every` iterations
// and once at the end. It is never a stopping criterion.

use super::{FactorModel, InteractionMatrix};
use crate::error::{EngineError, Result};
use chrono::Utc;
use ndarray::{Array2, ArrayView1, ArrayView2};
use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::Normal;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Standard deviation of the initial factor values
const INIT_STD: f64 = 0.1;

/// Pivots smaller than this (relative to the largest Gram entry) mark a free variable
const PIVOT_TOLERANCE: f64 = 1e-10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Latent dimension K
    pub factors: usize,
    pub iterations: usize,
    /// Ridge term added to each Gram matrix diagonal
    pub regularization: f64,
    pub seed: u64,
    /// Loss reporting cadence in iterations; 0 reports only the final loss
    pub loss_every: usize,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            factors: 100,
            iterations: 10,
            regularization: 0.0,
            seed: 42,
            loss_every: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    /// (iteration, loss) pairs at the reporting cadence
    pub loss_history: Vec<(usize, f64)>,
    pub final_loss: f64,
    pub iterations: usize,
    pub factors: usize,
    pub elapsed: Duration,
}

pub struct MatrixFactorizationTrainer {
    config: TrainerConfig,
}

impl MatrixFactorizationTrainer {
    pub fn new(config: TrainerConfig) -> Result<Self> {
        if config.factors == 0 {
            return Err(EngineError::Construction(
                "factor count must be at least 1".to_string(),
            ));
        }
        if config.iterations == 0 {
            return Err(EngineError::Construction(
                "iteration count must be at least 1".to_string(),
            ));
        }
        if !config.regularization.is_finite() || config.regularization < 0.0 {
            return Err(EngineError::Construction(format!(
                "regularization must be a non-negative number, got {}",
                config.regularization
            )));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Train a factor model. CPU-bound; call from a blocking context.
    pub fn train(&self, matrix: &InteractionMatrix) -> Result<(FactorModel, TrainingReport)> {
        let start = Instant::now();
        let (n_users, n_items) = matrix.shape();
        let k = self.config.factors;

        info!(
            users = n_users,
            items = n_items,
            nnz = matrix.nnz(),
            factors = k,
            iterations = self.config.iterations,
            "Starting ALS training"
        );

        let ratings = matrix.to_dense();
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let normal =
            Normal::new(0.0, INIT_STD).map_err(|e| EngineError::Internal(e.to_string()))?;

        let mut user_factors = Array2::from_shape_simple_fn((n_users, k), || normal.sample(&mut rng));
        let mut item_factors = Array2::from_shape_simple_fn((n_items, k), || normal.sample(&mut rng));

        let mut loss_history = Vec::new();
        for iteration in 0..self.config.iterations {
            user_factors = solve_pass(ratings.view(), &item_factors, self.config.regularization)?;
            item_factors = solve_pass(ratings.t(), &user_factors, self.config.regularization)?;

            if self.config.loss_every > 0 && iteration % self.config.loss_every == 0 {
                let loss = reconstruction_loss(&ratings, &user_factors, &item_factors);
                info!(iteration = iteration, loss = loss, "ALS iteration");
                loss_history.push((iteration, loss));
            } else {
                debug!(iteration = iteration, "ALS iteration");
            }
        }

        let final_loss = reconstruction_loss(&ratings, &user_factors, &item_factors);
        let elapsed = start.elapsed();
        info!(
            final_loss = final_loss,
            elapsed_ms = elapsed.as_millis() as u64,
            "ALS training completed"
        );

        let version = format!("als-k{}-{}", k, Utc::now().format("%Y%m%d%H%M%S"));
        let model = FactorModel::new(
            version,
            matrix.subject_ids().to_vec(),
            matrix.item_ids().to_vec(),
            user_factors,
            item_factors,
        )?;

        Ok((
            model,
            TrainingReport {
                loss_history,
                final_loss,
                iterations: self.config.iterations,
                factors: k,
                elapsed,
            },
        ))
    }
}

/// mean((R - U·Iᵀ)²)
pub fn reconstruction_loss(
    ratings: &Array2<f64>,
    user_factors: &Array2<f64>,
    item_factors: &Array2<f64>,
) -> f64 {
    let predictions = user_factors.dot(&item_factors.t());
    let diff = ratings - &predictions;
    diff.mapv(|v| v * v).mean().unwrap_or(0.0)
}

/// Solve every row of `ratings` against the fixed factors:
/// (FᵀF + λI) x = Fᵀ r
fn solve_pass(
    ratings: ArrayView2<'_, f64>,
    fixed: &Array2<f64>,
    regularization: f64,
) -> Result<Array2<f64>> {
    let k = fixed.ncols();
    let mut gram = fixed.t().dot(fixed);
    if regularization > 0.0 {
        for d in 0..k {
            gram[[d, d]] += regularization;
        }
    }

    let solver = NormalEquationSolver::factor(&gram);
    let rhs = ratings.dot(fixed);

    let rows: Vec<Vec<f64>> = (0..rhs.nrows())
        .into_par_iter()
        .map(|row| solver.solve(rhs.row(row)))
        .collect();

    Array2::from_shape_vec((rhs.nrows(), k), rows.concat())
        .map_err(|e| EngineError::Internal(format!("ALS pass produced a malformed matrix: {}", e)))
}

/// Gauss-Jordan reduction of a K×K system with partial pivoting, reusable
/// across right-hand sides. Columns without a usable pivot are free
/// variables and solve to 0, so rank-deficient systems still yield a
/// least-squares solution.
struct NormalEquationSolver {
    /// (pivot column, row of the accumulated elimination operator scaled by 1/pivot)
    pivots: Vec<(usize, Vec<f64>)>,
    k: usize,
}

impl NormalEquationSolver {
    fn factor(gram: &Array2<f64>) -> Self {
        let k = gram.nrows();
        let mut a: Vec<Vec<f64>> = gram.outer_iter().map(|row| row.to_vec()).collect();
        let mut ops: Vec<Vec<f64>> = (0..k)
            .map(|r| {
                let mut row = vec![0.0; k];
                row[r] = 1.0;
                row
            })
            .collect();

        let scale = gram.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        let tolerance = scale * PIVOT_TOLERANCE;

        let mut pivot_cols = Vec::new();
        let mut pivot_row = 0;
        for col in 0..k {
            if pivot_row == k {
                break;
            }

            let (best, best_abs) = (pivot_row..k)
                .map(|r| (r, a[r][col].abs()))
                .fold((pivot_row, -1.0), |acc, cur| if cur.1 > acc.1 { cur } else { acc });
            if best_abs <= tolerance {
                continue;
            }

            a.swap(pivot_row, best);
            ops.swap(pivot_row, best);

            let pivot = a[pivot_row][col];
            for r in 0..k {
                if r == pivot_row {
                    continue;
                }
                let factor = a[r][col] / pivot;
                if factor == 0.0 {
                    continue;
                }
                for c in col..k {
                    a[r][c] -= factor * a[pivot_row][c];
                }
                for c in 0..k {
                    ops[r][c] -= factor * ops[pivot_row][c];
                }
            }

            pivot_cols.push((pivot_row, col));
            pivot_row += 1;
        }

        let pivots = pivot_cols
            .into_iter()
            .map(|(row, col)| {
                let pivot = a[row][col];
                (col, ops[row].iter().map(|v| v / pivot).collect())
            })
            .collect();

        Self { pivots, k }
    }

    fn solve(&self, rhs: ArrayView1<'_, f64>) -> Vec<f64> {
        let mut x = vec![0.0; self.k];
        for (col, coefficients) in &self.pivots {
            x[*col] = coefficients
                .iter()
                .zip(rhs.iter())
                .map(|(c, b)| c * b)
                .sum();
        }
        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::Rng;

    fn random_matrix(users: usize, items: usize, seed: u64) -> InteractionMatrix {
        let mut rng = StdRng::seed_from_u64(seed);
        let values: Vec<Vec<f64>> = (0..users)
            .map(|_| (0..items).map(|_| rng.gen_range(0..2) as f64).collect())
            .collect();
        InteractionMatrix::from_dense(&values).unwrap()
    }

    fn config(factors: usize, iterations: usize) -> TrainerConfig {
        TrainerConfig {
            factors,
            iterations,
            ..TrainerConfig::default()
        }
    }

    #[test]
    fn test_output_shapes() {
        let matrix = random_matrix(30, 20, 7);
        let trainer = MatrixFactorizationTrainer::new(config(5, 3)).unwrap();
        let (model, report) = trainer.train(&matrix).unwrap();

        assert_eq!(model.user_factors().dim(), (30, 5));
        assert_eq!(model.item_factors().dim(), (20, 5));
        assert_eq!(report.iterations, 3);
        assert!(model.has_user("user_29"));
        assert!(model.has_item("item_19"));
    }

    #[test]
    fn test_final_loss_not_worse_than_first_iteration() {
        let matrix = random_matrix(40, 25, 11);
        let trainer = MatrixFactorizationTrainer::new(TrainerConfig {
            factors: 6,
            iterations: 10,
            loss_every: 1,
            ..TrainerConfig::default()
        })
        .unwrap();
        let (_, report) = trainer.train(&matrix).unwrap();

        let first = report.loss_history[0].1;
        assert!(report.final_loss <= first + 1e-9);
        assert_eq!(report.loss_history.len(), 10);
        assert!(report.final_loss.is_finite());
    }

    #[test]
    fn test_loss_cadence() {
        let matrix = random_matrix(10, 8, 3);
        let trainer = MatrixFactorizationTrainer::new(config(3, 10)).unwrap();
        let (_, report) = trainer.train(&matrix).unwrap();

        let reported: Vec<usize> = report.loss_history.iter().map(|(i, _)| *i).collect();
        assert_eq!(reported, vec![0, 2, 4, 6, 8]);
    }

    #[test]
    fn test_seeded_training_is_reproducible() {
        let matrix = random_matrix(15, 12, 5);
        let trainer = MatrixFactorizationTrainer::new(config(4, 4)).unwrap();
        let (a, _) = trainer.train(&matrix).unwrap();
        let (b, _) = trainer.train(&matrix).unwrap();
        assert_eq!(a.user_factors(), b.user_factors());
        assert_eq!(a.item_factors(), b.item_factors());
    }

    #[test]
    fn test_rank_deficient_input_does_not_fail() {
        // More factors than users or items, plus an all-zero row
        let matrix = InteractionMatrix::from_dense(&[
            vec![1.0, 0.0, 1.0],
            vec![0.0, 0.0, 0.0],
        ])
        .unwrap();
        let trainer = MatrixFactorizationTrainer::new(config(10, 5)).unwrap();
        let (model, report) = trainer.train(&matrix).unwrap();

        assert_eq!(model.user_factors().dim(), (2, 10));
        assert!(model.user_factors().iter().all(|v| v.is_finite()));
        assert!(report.final_loss.is_finite());
        assert!(report.final_loss < 1e-6);
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(matches!(
            MatrixFactorizationTrainer::new(config(0, 10)),
            Err(EngineError::Construction(_))
        ));
        assert!(matches!(
            MatrixFactorizationTrainer::new(config(10, 0)),
            Err(EngineError::Construction(_))
        ));
        assert!(MatrixFactorizationTrainer::new(TrainerConfig {
            regularization: -1.0,
            ..TrainerConfig::default()
        })
        .is_err());
    }

    #[test]
    fn test_solver_full_rank() {
        let gram = array![[4.0, 1.0], [1.0, 3.0]];
        let solver = NormalEquationSolver::factor(&gram);
        let x = solver.solve(array![1.0, 2.0].view());
        // 4x + y = 1, x + 3y = 2 → x = 1/11, y = 7/11
        assert!((x[0] - 1.0 / 11.0).abs() < 1e-12);
        assert!((x[1] - 7.0 / 11.0).abs() < 1e-12);
    }

    #[test]
    fn test_solver_singular_zeroes_free_variable() {
        let gram = array![[1.0, 1.0], [1.0, 1.0]];
        let solver = NormalEquationSolver::factor(&gram);
        let x = solver.solve(array![2.0, 2.0].view());
        assert!((x[0] + x[1] - 2.0).abs() < 1e-12);
        assert_eq!(x[1], 0.0);

        let zero = NormalEquationSolver::factor(&Array2::zeros((3, 3)));
        assert_eq!(zero.solve(array![0.0, 0.0, 0.0].view()), vec![0.0; 3]);
    }
}

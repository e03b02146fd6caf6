use log::{debug, warn};
use nalgebra::{SMatrix, SVector};
use ndarray::{Array1, Array2, ArrayView2, Axis, s};
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::error::{ForensicsError, Result};

pub const NEIGHBOURS: usize = 8;

/// (row, column) of each predictor inside the 3x3 window, centre excluded.
const OFFSETS: [(usize, usize); NEIGHBOURS] =
    [(0, 0), (0, 1), (0, 2), (1, 0), (1, 2), (2, 0), (2, 1), (2, 2)];
const MIN_VARIANCE: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct RegressionConfig {
    pub max_iterations: usize,
    pub tolerance: f64,
    pub initial_variance: f64,
    pub outlier_density: f64,
}

impl Default for RegressionConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            tolerance: 0.01,
            initial_variance: 0.005,
            outlier_density: 0.1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegressionOutcome {
    /// Posterior probability that each interior pixel follows the linear model.
    pub weights: Array2<f64>,
    pub coefficients: [f64; NEIGHBOURS],
    pub iterations: usize,
    pub converged: bool,
    pub variance: f64,
}

impl RegressionOutcome {
    pub fn mean_weight(&self) -> f64 {
        self.weights.mean().unwrap_or(0.0)
    }
}

/// Expectation-maximisation fit of each pixel as a linear mix of its eight neighbours.
pub struct NeighborRegression {
    config: RegressionConfig,
}

impl NeighborRegression {
    pub fn new() -> Self {
        Self::with_config(RegressionConfig::default())
    }

    pub fn with_config(config: RegressionConfig) -> Self {
        Self { config }
    }

    pub fn estimate(&self, image: &Array2<f64>, seed: Option<u64>) -> Result<RegressionOutcome> {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        self.estimate_with_rng(image, &mut rng)
    }

    pub fn estimate_with_rng<R: Rng + ?Sized>(&self, image: &Array2<f64>, rng: &mut R) -> Result<RegressionOutcome> {
        let (height, width) = image.dim();
        if height < 3 || width < 3 {
            return Err(ForensicsError::ImageTooSmall(3));
        }

        let (design, target) = build_design_matrix(image.view());
        let mut coefficients = random_simplex(rng);
        let mut variance = self.config.initial_variance;
        let outlier = self.config.outlier_density;

        let mut weights = Array1::<f64>::zeros(target.len());
        let mut iterations = 0;
        let mut converged = false;

        while iterations < self.config.max_iterations {
            iterations += 1;

            let residuals = (&target - &design.dot(&coefficients)).mapv(f64::abs);
            weights = residuals.mapv(|r| {
                let g = (-(r * r) / variance).exp();
                g / (g + outlier)
            });

            let weight_sum = weights.sum();
            if weight_sum > 0.0 {
                variance = (&weights * &residuals.mapv(|r| r * r)).sum() / weight_sum;
            }
            variance = variance.max(MIN_VARIANCE);

            let Some(next) = solve_weighted(&design, &target, &weights) else {
                warn!("normal equations are singular at iteration {iterations}, keeping previous coefficients");
                break;
            };

            let change = (&next - &coefficients).mapv(|v| v * v).sum().sqrt();
            coefficients = next;
            if change < self.config.tolerance {
                converged = true;
                break;
            }
        }

        debug!(
            "neighbour regression: {iterations} iterations, converged: {converged}, variance {variance:.3e}"
        );

        let weights = weights.into_shape_with_order((height - 2, width - 2))?;
        let mut coeffs = [0.0; NEIGHBOURS];
        coeffs.iter_mut().zip(coefficients.iter()).for_each(|(c, v)| *c = *v);

        Ok(RegressionOutcome {
            weights,
            coefficients: coeffs,
            iterations,
            converged,
            variance,
        })
    }
}

impl Default for NeighborRegression {
    fn default() -> Self {
        Self::new()
    }
}

/// One row per interior pixel: the eight neighbours as predictors, the centre as target.
pub fn build_design_matrix(image: ArrayView2<f64>) -> (Array2<f64>, Array1<f64>) {
    let (height, width) = image.dim();
    let (rows, cols) = (height - 2, width - 2);

    let mut design = Array2::<f64>::zeros((rows * cols, NEIGHBOURS));
    for (column, &(dy, dx)) in OFFSETS.iter().enumerate() {
        let shifted = image.slice(s![dy..dy + rows, dx..dx + cols]);
        design
            .column_mut(column)
            .iter_mut()
            .zip(shifted.iter())
            .for_each(|(d, v)| *d = *v);
    }

    let target = image.slice(s![1..1 + rows, 1..1 + cols]).iter().cloned().collect::<Array1<f64>>();

    (design, target)
}

fn random_simplex<R: Rng + ?Sized>(rng: &mut R) -> Array1<f64> {
    let draws = (0..NEIGHBOURS).map(|_| rng.r#gen::<f64>()).collect::<Array1<f64>>();
    let sum = draws.sum();

    if sum > 0.0 {
        draws / sum
    } else {
        Array1::from_elem(NEIGHBOURS, 1.0 / NEIGHBOURS as f64)
    }
}

// Solves (F^T W^2 F) a = F^T W^2 f.
fn solve_weighted(design: &Array2<f64>, target: &Array1<f64>, weights: &Array1<f64>) -> Option<Array1<f64>> {
    let squared = weights.mapv(|w| w * w);
    let weighted = design * &squared.view().insert_axis(Axis(1));

    let lhs = weighted.t().dot(design);
    let rhs = weighted.t().dot(target);

    let lhs = SMatrix::<f64, NEIGHBOURS, NEIGHBOURS>::from_fn(|r, c| lhs[[r, c]]);
    let rhs = SVector::<f64, NEIGHBOURS>::from_fn(|r, _| rhs[r]);

    let solution = lhs.lu().solve(&rhs)?;
    if solution.iter().all(|v| v.is_finite()) {
        Some(solution.iter().cloned().collect())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noise(height: usize, width: usize, seed: u64) -> Array2<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        Array2::from_shape_fn((height, width), |_| rng.r#gen::<f64>())
    }

    #[test]
    fn design_matrix_follows_raster_neighbour_order() {
        let image = Array2::from_shape_fn((3, 4), |(y, x)| (y * 4 + x) as f64);
        let (design, target) = build_design_matrix(image.view());

        assert_eq!(design.dim(), (2, 8));
        assert_eq!(target.to_vec(), vec![5.0, 6.0]);
        assert_eq!(design.row(0).to_vec(), vec![0.0, 1.0, 2.0, 4.0, 6.0, 8.0, 9.0, 10.0]);
        assert_eq!(design.row(1).to_vec(), vec![1.0, 2.0, 3.0, 5.0, 7.0, 9.0, 10.0, 11.0]);
    }

    #[test]
    fn tiny_images_are_rejected() {
        let image = Array2::<f64>::zeros((2, 10));
        assert!(matches!(
            NeighborRegression::new().estimate(&image, Some(1)),
            Err(ForensicsError::ImageTooSmall(3))
        ));
    }

    #[test]
    fn simplex_initialisation_sums_to_one() {
        let mut rng = StdRng::seed_from_u64(3);
        let a = random_simplex(&mut rng);
        assert!((a.sum() - 1.0).abs() < 1e-12);
        assert!(a.iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn noise_weights_stay_low_and_bounded() {
        let outcome = NeighborRegression::new().estimate(&noise(100, 100, 11), Some(5)).unwrap();

        assert_eq!(outcome.weights.dim(), (98, 98));
        assert!(outcome.iterations <= 50);
        assert!(outcome.weights.iter().all(|&w| (0.0..=1.0).contains(&w)));
        assert!(outcome.mean_weight() < 0.3);
    }

    #[test]
    fn interpolated_columns_are_more_predictable_than_noise() {
        let base = noise(60, 40, 21);
        let interpolated = Array2::from_shape_fn((60, 79), |(y, x)| {
            if x % 2 == 0 {
                base[[y, x / 2]]
            } else {
                0.5 * (base[[y, x / 2]] + base[[y, x / 2 + 1]])
            }
        });

        let regression = NeighborRegression::new();
        let resampled = regression.estimate(&interpolated, Some(9)).unwrap();
        let plain = regression.estimate(&noise(60, 79, 22), Some(9)).unwrap();

        assert!(resampled.mean_weight() > plain.mean_weight());
    }

    #[test]
    fn singular_system_keeps_initial_coefficients() {
        let flat = Array2::<f64>::zeros((10, 10));
        let outcome = NeighborRegression::new().estimate(&flat, Some(2)).unwrap();

        assert_eq!(outcome.iterations, 1);
        assert!(!outcome.converged);
        assert!((outcome.coefficients.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn same_seed_same_outcome() {
        let image = noise(30, 30, 4);
        let regression = NeighborRegression::new();
        let a = regression.estimate(&image, Some(77)).unwrap();
        let b = regression.estimate(&image, Some(77)).unwrap();
        assert_eq!(a.coefficients, b.coefficients);
        assert_eq!(a.weights, b.weights);
    }
}

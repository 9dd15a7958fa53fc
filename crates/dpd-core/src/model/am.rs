//! AM/AM polynomial model with damped coefficient updates.
//!
//! The model predicts the TX amplitude that produced a given RX amplitude:
//!
//! ```text
//! tx ≈ c0·rx + c1·rx² + c2·rx³ + c3·rx⁴ + c4·rx⁵
//! ```
//!
//! Fitting this postdistorter and loading it as the predistorter is the
//! indirect-learning scheme: once applied, the cascade predistorter + PA is
//! approximately linear.
//!
//! Raw per-iteration fits are noisy because they come from finite sample
//! statistics, so [`PolynomialAmplitudeModel::get_next_coefs`] only moves the
//! coefficients part of the way towards each new fit.
//!
//! # Example
//!
//! ```rust
//! use dpd_core::model::PolynomialAmplitudeModel;
//! use dpd_core::types::IDENTITY_AM;
//!
//! // PA with mild 3rd-order compression, sampled at 64 operating points.
//! let rx: Vec<f32> = (1..=64).map(|i| i as f32 / 100.0).collect();
//! let tx: Vec<f32> = rx.iter().map(|&r| r + 0.2 * r * r * r).collect();
//!
//! let update = PolynomialAmplitudeModel::get_next_coefs(&tx, &rx, &IDENTITY_AM, 0.5).unwrap();
//! assert!((update.coefs[0] - 1.0).abs() < 1e-3);
//! assert!((update.coefs[2] - 0.1).abs() < 1e-3);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{DpdError, DpdResult};
use crate::types::{check_amplitudes, AmCoefficients, NUM_COEFS};

/// Scaled pivots below this are treated as a rank-deficient design matrix.
const SINGULAR_PIVOT: f64 = 1e-12;

/// Inputs and outcome of one model update, kept for fit-quality reports.
///
/// Purely observational; nothing in the engine reads it back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitRecord {
    pub tx_amplitude: Vec<f32>,
    pub rx_amplitude: Vec<f32>,
    pub previous: AmCoefficients,
    pub fitted: AmCoefficients,
    pub next: AmCoefficients,
    pub learning_rate: f64,
}

/// Result of [`PolynomialAmplitudeModel::get_next_coefs`].
#[derive(Debug, Clone, PartialEq)]
pub struct AmUpdate {
    /// Damped coefficients to push to the transmitter
    pub coefs: AmCoefficients,
    pub record: FitRecord,
}

/// Incremental AM/AM model.
#[derive(Debug, Clone)]
pub struct PolynomialAmplitudeModel {
    learning_rate: f64,
}

impl PolynomialAmplitudeModel {
    /// Create a model with the given damping factor.
    ///
    /// `learning_rate = 1` replaces the coefficients by each fresh fit,
    /// `learning_rate = 0` freezes them.
    pub fn new(learning_rate: f64) -> DpdResult<Self> {
        if !learning_rate.is_finite() || learning_rate < 0.0 {
            return Err(DpdError::Config(format!(
                "AM learning rate must be finite and non-negative, got {}",
                learning_rate
            )));
        }
        Ok(Self { learning_rate })
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Damped update with this model's learning rate.
    pub fn update(&self, tx: &[f32], rx: &[f32], current: &AmCoefficients) -> DpdResult<AmUpdate> {
        Self::get_next_coefs(tx, rx, current, self.learning_rate)
    }

    /// Least-squares fit of `tx ≈ Σ c[i]·rx^(i+1)`.
    ///
    /// Needs at least [`NUM_COEFS`] finite, equal-length samples and enough
    /// distinct RX amplitudes to determine every coefficient.
    pub fn fit(tx: &[f32], rx: &[f32]) -> DpdResult<AmCoefficients> {
        check_amplitudes(tx, rx)?;
        if tx.len() < NUM_COEFS {
            return Err(DpdError::InvalidInput(format!(
                "need at least {} amplitude pairs to fit a degree-{} polynomial, got {}",
                NUM_COEFS,
                NUM_COEFS,
                tx.len()
            )));
        }

        // Normal equations (Aᵀ A) c = Aᵀ y with A[n][k] = rx[n]^(k+1).
        let mut ata = [[0.0f64; NUM_COEFS]; NUM_COEFS];
        let mut aty = [0.0f64; NUM_COEFS];
        for (&t, &r) in tx.iter().zip(rx.iter()) {
            let basis = powers(r as f64);
            for i in 0..NUM_COEFS {
                aty[i] += basis[i] * t as f64;
                for j in i..NUM_COEFS {
                    ata[i][j] += basis[i] * basis[j];
                }
            }
        }
        for i in 0..NUM_COEFS {
            for j in 0..i {
                ata[i][j] = ata[j][i];
            }
        }

        // Jacobi scaling: monomial columns span orders of magnitude.
        let mut scale = [0.0f64; NUM_COEFS];
        for k in 0..NUM_COEFS {
            if ata[k][k] <= 0.0 {
                return Err(DpdError::InvalidInput(format!(
                    "design column rx^{} is identically zero",
                    k + 1
                )));
            }
            scale[k] = ata[k][k].sqrt();
        }
        for i in 0..NUM_COEFS {
            aty[i] /= scale[i];
            for j in 0..NUM_COEFS {
                ata[i][j] /= scale[i] * scale[j];
            }
        }

        let solution = solve_5x5(ata, aty).ok_or_else(|| {
            DpdError::InvalidInput(
                "rx amplitudes do not determine a degree-5 polynomial (rank deficient)".into(),
            )
        })?;

        let mut coefs = [0.0; NUM_COEFS];
        for k in 0..NUM_COEFS {
            coefs[k] = solution[k] / scale[k];
        }
        if coefs.iter().any(|c| !c.is_finite()) {
            return Err(DpdError::InvalidInput(format!(
                "fit produced non-finite coefficients {:?}",
                coefs
            )));
        }
        Ok(coefs)
    }

    /// Fit, then step from `current` towards the fit by `learning_rate`:
    /// `current + learning_rate · (fit − current)`.
    pub fn get_next_coefs(
        tx: &[f32],
        rx: &[f32],
        current: &AmCoefficients,
        learning_rate: f64,
    ) -> DpdResult<AmUpdate> {
        if !learning_rate.is_finite() || learning_rate < 0.0 {
            return Err(DpdError::InvalidInput(format!(
                "AM learning rate must be finite and non-negative, got {}",
                learning_rate
            )));
        }
        let fitted = Self::fit(tx, rx)?;

        // Written as a lerp so both ends of the range are exact.
        let mut next = [0.0; NUM_COEFS];
        for k in 0..NUM_COEFS {
            next[k] = (1.0 - learning_rate) * current[k] + learning_rate * fitted[k];
        }

        Ok(AmUpdate {
            coefs: next,
            record: FitRecord {
                tx_amplitude: tx.to_vec(),
                rx_amplitude: rx.to_vec(),
                previous: *current,
                fitted,
                next,
                learning_rate,
            },
        })
    }
}

/// Evaluate the polynomial at amplitude `a`: `Σ coefs[i]·a^(i+1)`.
pub fn evaluate(coefs: &AmCoefficients, a: f64) -> f64 {
    powers(a)
        .iter()
        .zip(coefs.iter())
        .map(|(p, c)| p * c)
        .sum()
}

/// Sample the curve at `points` evenly spaced amplitudes in `[min_amp, max_amp]`.
///
/// Returns `(amplitude, evaluate(coefs, amplitude))` pairs for plotting.
pub fn curve(coefs: &AmCoefficients, min_amp: f64, max_amp: f64, points: usize) -> Vec<(f64, f64)> {
    match points {
        0 => Vec::new(),
        1 => vec![(min_amp, evaluate(coefs, min_amp))],
        _ => {
            let step = (max_amp - min_amp) / (points - 1) as f64;
            (0..points)
                .map(|i| {
                    let a = min_amp + step * i as f64;
                    (a, evaluate(coefs, a))
                })
                .collect()
        }
    }
}

#[inline]
fn powers(a: f64) -> [f64; NUM_COEFS] {
    let mut p = [0.0; NUM_COEFS];
    let mut acc = a;
    for slot in p.iter_mut() {
        *slot = acc;
        acc *= a;
    }
    p
}

/// Gaussian elimination with partial pivoting on a unit-diagonal system.
fn solve_5x5(
    mut a: [[f64; NUM_COEFS]; NUM_COEFS],
    mut b: [f64; NUM_COEFS],
) -> Option<[f64; NUM_COEFS]> {
    const N: usize = NUM_COEFS;
    for col in 0..N {
        let max_row = (col..N).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[max_row][col].abs() < SINGULAR_PIVOT {
            return None;
        }
        a.swap(col, max_row);
        b.swap(col, max_row);

        let pivot = a[col][col];
        for row in (col + 1)..N {
            let factor = a[row][col] / pivot;
            for k in col..N {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = [0.0; N];
    for row in (0..N).rev() {
        let mut s = b[row];
        for k in (row + 1)..N {
            s -= a[row][k] * x[k];
        }
        x[row] = s / a[row][row];
    }
    Some(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IDENTITY_AM;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const TRUTH: AmCoefficients = [1.05, -0.2, 0.45, -0.3, 0.12];

    fn sample_truth(n: usize, noise: f32, seed: u64) -> (Vec<f32>, Vec<f32>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let rx: Vec<f32> = (0..n).map(|_| rng.gen_range(0.0..1.0f32)).collect();
        let tx = rx
            .iter()
            .map(|&r| {
                let n = if noise > 0.0 { rng.gen_range(-noise..noise) } else { 0.0 };
                evaluate(&TRUTH, r as f64) as f32 + n
            })
            .collect();
        (tx, rx)
    }

    #[test]
    fn test_fit_recovers_exact_polynomial() {
        let (tx, rx) = sample_truth(512, 0.0, 1);
        let coefs = PolynomialAmplitudeModel::fit(&tx, &rx).unwrap();
        for (c, t) in coefs.iter().zip(TRUTH.iter()) {
            assert_abs_diff_eq!(*c, *t, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_fit_recovers_polynomial_under_bounded_noise() {
        let (tx, rx) = sample_truth(20_000, 1e-5, 7);
        let coefs = PolynomialAmplitudeModel::fit(&tx, &rx).unwrap();
        for (c, t) in coefs.iter().zip(TRUTH.iter()) {
            assert_abs_diff_eq!(*c, *t, epsilon = 2e-2);
        }
        // Prediction error is what matters for the predistorter.
        for a in [0.1, 0.3, 0.5, 0.7, 0.9] {
            assert_abs_diff_eq!(evaluate(&coefs, a), evaluate(&TRUTH, a), epsilon = 1e-4);
        }
    }

    #[test]
    fn test_learning_rate_one_is_pure_refit() {
        let (tx, rx) = sample_truth(256, 1e-3, 3);
        let current = [0.9, 0.1, -0.05, 0.02, 0.3];
        let fitted = PolynomialAmplitudeModel::fit(&tx, &rx).unwrap();
        let update = PolynomialAmplitudeModel::get_next_coefs(&tx, &rx, &current, 1.0).unwrap();
        assert_eq!(update.coefs, fitted);
    }

    #[test]
    fn test_learning_rate_zero_is_noop() {
        let (tx, rx) = sample_truth(256, 1e-3, 4);
        let current = [0.9, 0.1, -0.05, 0.02, 0.3];
        let update = PolynomialAmplitudeModel::get_next_coefs(&tx, &rx, &current, 0.0).unwrap();
        assert_eq!(update.coefs, current);
    }

    #[test]
    fn test_intermediate_learning_rate_is_damped_step() {
        let (tx, rx) = sample_truth(256, 1e-3, 5);
        let current = IDENTITY_AM;
        let fitted = PolynomialAmplitudeModel::fit(&tx, &rx).unwrap();
        for r in [0.1, 0.25, 0.5, 0.9] {
            let update = PolynomialAmplitudeModel::get_next_coefs(&tx, &rx, &current, r).unwrap();
            for k in 0..NUM_COEFS {
                assert_relative_eq!(
                    update.coefs[k],
                    current[k] + r * (fitted[k] - current[k]),
                    epsilon = 1e-12
                );
            }
            assert_eq!(update.record.previous, current);
            assert_eq!(update.record.fitted, fitted);
            assert_eq!(update.record.next, update.coefs);
        }
    }

    #[test]
    fn test_update_uses_model_learning_rate() {
        let (tx, rx) = sample_truth(128, 0.0, 6);
        let model = PolynomialAmplitudeModel::new(0.3).unwrap();
        let a = model.update(&tx, &rx, &IDENTITY_AM).unwrap();
        let b = PolynomialAmplitudeModel::get_next_coefs(&tx, &rx, &IDENTITY_AM, 0.3).unwrap();
        assert_eq!(a.coefs, b.coefs);
    }

    #[test]
    fn test_rejects_nan() {
        let tx = vec![0.1, 0.2, f32::NAN, 0.4, 0.5];
        let rx = vec![0.1, 0.2, 0.3, 0.4, 0.5];
        let err = PolynomialAmplitudeModel::fit(&tx, &rx).unwrap_err();
        assert!(matches!(err, DpdError::InvalidInput(_)));
        let err = PolynomialAmplitudeModel::get_next_coefs(&rx, &tx, &IDENTITY_AM, 0.5).unwrap_err();
        assert!(matches!(err, DpdError::InvalidInput(_)));
    }

    #[test]
    fn test_rejects_length_mismatch() {
        let tx = vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6];
        let rx = vec![0.1, 0.2, 0.3, 0.4, 0.5];
        assert!(matches!(
            PolynomialAmplitudeModel::fit(&tx, &rx),
            Err(DpdError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_rejects_underdetermined() {
        let v = vec![0.1, 0.2, 0.3, 0.4];
        assert!(matches!(
            PolynomialAmplitudeModel::fit(&v, &v),
            Err(DpdError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_rejects_rank_deficient() {
        let tx = vec![0.3; 16];
        let rx = vec![0.3; 16];
        assert!(matches!(
            PolynomialAmplitudeModel::fit(&tx, &rx),
            Err(DpdError::InvalidInput(_))
        ));
        let zeros = vec![0.0; 16];
        assert!(matches!(
            PolynomialAmplitudeModel::fit(&tx, &zeros),
            Err(DpdError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_rejects_bad_learning_rate() {
        assert!(PolynomialAmplitudeModel::new(f64::NAN).is_err());
        assert!(PolynomialAmplitudeModel::new(-0.1).is_err());
        assert!(PolynomialAmplitudeModel::new(0.0).is_ok());

        let (tx, rx) = sample_truth(256, 0.0, 6);
        for rate in [f64::NAN, f64::INFINITY, -0.5] {
            assert!(matches!(
                PolynomialAmplitudeModel::get_next_coefs(&tx, &rx, &IDENTITY_AM, rate),
                Err(DpdError::InvalidInput(_))
            ));
        }
    }

    #[test]
    fn test_evaluate_and_curve() {
        let coefs = [1.0, 0.5, 0.0, 0.0, 2.0];
        // 0.5 + 0.5·0.25 + 2·0.03125
        assert_relative_eq!(evaluate(&coefs, 0.5), 0.6875);
        let line = curve(&IDENTITY_AM, 0.0, 0.6, 50);
        assert_eq!(line.len(), 50);
        assert_relative_eq!(line[49].0, 0.6, epsilon = 1e-12);
        for (a, y) in line {
            assert_relative_eq!(a, y);
        }
        assert!(curve(&coefs, 0.0, 1.0, 0).is_empty());
    }
}

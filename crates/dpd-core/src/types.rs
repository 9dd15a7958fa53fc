//! Core types shared by the capture, model and control paths
//!
//! The transmitter hands out baseband as interleaved 32-bit float I/Q pairs,
//! so samples here are [`Complex32`] and every amplitude statistic the model
//! consumes is `f32`. Timestamps are seconds as `f64`.

use num_complex::Complex32;
use serde::{Deserialize, Serialize};

use crate::error::{DpdError, DpdResult};

/// A single I/Q sample point
pub type IQSample = Complex32;

/// Number of coefficients in each polynomial (basis `x, x², …, x⁵`)
pub const NUM_COEFS: usize = 5;

/// AM/AM predistortion polynomial, lowest order first
pub type AmCoefficients = [f64; NUM_COEFS];

/// AM/PM predistortion polynomial, lowest order first
pub type PmCoefficients = [f64; NUM_COEFS];

/// Pass-through AM/AM polynomial
pub const IDENTITY_AM: AmCoefficients = [1.0, 0.0, 0.0, 0.0, 0.0];

/// Zero phase correction
pub const ZERO_PM: PmCoefficients = [0.0; NUM_COEFS];

/// One captured buffer and the moment its first sample left (or reached) the
/// radio.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleFrame {
    pub samples: Vec<IQSample>,
    /// Capture time in seconds
    pub timestamp: f64,
}

impl SampleFrame {
    pub fn new(samples: Vec<IQSample>, timestamp: f64) -> Self {
        Self { samples, timestamp }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Magnitude of every sample.
    pub fn amplitudes(&self) -> Vec<f32> {
        amplitudes(&self.samples)
    }

    /// Median magnitude, `None` for an empty frame.
    pub fn median_amplitude(&self) -> Option<f32> {
        median(&mut self.amplitudes())
    }
}

/// Synchronized TX/RX buffers for one adaptation iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedPair {
    pub tx: SampleFrame,
    pub rx: SampleFrame,
    /// Median RX amplitude before any normalization
    pub rx_median: f32,
}

impl CapturedPair {
    /// Absolute timestamp difference between the two captures.
    pub fn skew(&self) -> f64 {
        (self.tx.timestamp - self.rx.timestamp).abs()
    }
}

/// Matched TX/RX amplitude statistics at the same operating points.
///
/// Both vectors have equal length and contain only finite values; the
/// constructor is the only way to build one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmplitudeSamplePair {
    tx: Vec<f32>,
    rx: Vec<f32>,
}

impl AmplitudeSamplePair {
    pub fn new(tx: Vec<f32>, rx: Vec<f32>) -> DpdResult<Self> {
        check_amplitudes(&tx, &rx)?;
        Ok(Self { tx, rx })
    }

    pub fn tx(&self) -> &[f32] {
        &self.tx
    }

    pub fn rx(&self) -> &[f32] {
        &self.rx
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

/// Validate a TX/RX amplitude pair: equal length, finite values only.
pub fn check_amplitudes(tx: &[f32], rx: &[f32]) -> DpdResult<()> {
    if tx.len() != rx.len() {
        return Err(DpdError::InvalidInput(format!(
            "length mismatch: tx has {} values, rx has {}",
            tx.len(),
            rx.len()
        )));
    }
    for (name, values) in [("tx", tx), ("rx", rx)] {
        if let Some(i) = values.iter().position(|v| !v.is_finite()) {
            return Err(DpdError::InvalidInput(format!(
                "{} amplitude at index {} is not finite ({})",
                name, i, values[i]
            )));
        }
    }
    Ok(())
}

/// Magnitude of every sample.
pub fn amplitudes(samples: &[IQSample]) -> Vec<f32> {
    samples.iter().map(|s| s.norm()).collect()
}

/// Median of `values`, averaging the two middle elements for even lengths.
///
/// Reorders `values` in place. Returns `None` when empty.
pub fn median(values: &mut [f32]) -> Option<f32> {
    let n = values.len();
    if n == 0 {
        return None;
    }
    let mid = n / 2;
    let (lower, upper, _) = values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    let upper = *upper;
    if n % 2 == 1 {
        Some(upper)
    } else {
        let lower_max = lower
            .iter()
            .copied()
            .max_by(|a, b| a.total_cmp(b))
            .unwrap_or(upper);
        Some(((lower_max as f64 + upper as f64) / 2.0) as f32)
    }
}

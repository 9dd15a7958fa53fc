//! Reduction of aligned sample frames to amplitude statistics
//!
//! The model fit wants a few hundred well-spread operating points, not a full
//! capture dominated by low-amplitude samples. [`BinnedMedianReducer`] sorts
//! TX amplitudes into equal-width bins and keeps one median pair per
//! populated bin.
//!
//! ## Example
//!
//! ```rust
//! use dpd_core::reduce::{BinnedMedianReducer, FrameReducer};
//! use dpd_core::types::{IQSample, SampleFrame};
//!
//! let samples: Vec<IQSample> = (0..4096)
//!     .map(|i| IQSample::from_polar((i % 512) as f32 / 1024.0, i as f32))
//!     .collect();
//! let tx = SampleFrame::new(samples.clone(), 0.0);
//! let rx = SampleFrame::new(samples, 0.0);
//!
//! let pair = BinnedMedianReducer::default().reduce(&tx, &rx).unwrap();
//! assert_eq!(pair.len(), 64);
//! assert_eq!(pair.tx(), pair.rx());
//! ```

use crate::error::{DpdError, DpdResult};
use crate::types::{check_amplitudes, median, AmplitudeSamplePair, SampleFrame, NUM_COEFS};

/// Turns an aligned TX/RX pair into matched amplitude samples.
pub trait FrameReducer {
    fn reduce(&self, tx: &SampleFrame, rx: &SampleFrame) -> DpdResult<AmplitudeSamplePair>;
}

/// Per-bin medians over equal-width TX amplitude bins.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinnedMedianReducer {
    n_bins: usize,
    min_per_bin: usize,
}

impl Default for BinnedMedianReducer {
    fn default() -> Self {
        Self {
            n_bins: 64,
            min_per_bin: 16,
        }
    }
}

impl BinnedMedianReducer {
    pub fn new(n_bins: usize, min_per_bin: usize) -> DpdResult<Self> {
        if n_bins < NUM_COEFS {
            return Err(DpdError::Config(format!(
                "need at least {} amplitude bins, got {}",
                NUM_COEFS, n_bins
            )));
        }
        Ok(Self {
            n_bins,
            min_per_bin: min_per_bin.max(1),
        })
    }

    /// Number of bins between 0 and the TX peak
    pub fn n_bins(&self) -> usize {
        self.n_bins
    }

    /// Bins with fewer samples are dropped
    pub fn min_per_bin(&self) -> usize {
        self.min_per_bin
    }
}

impl FrameReducer for BinnedMedianReducer {
    fn reduce(&self, tx: &SampleFrame, rx: &SampleFrame) -> DpdResult<AmplitudeSamplePair> {
        let tx_amp = tx.amplitudes();
        let rx_amp = rx.amplitudes();
        check_amplitudes(&tx_amp, &rx_amp)?;

        let peak = tx_amp.iter().copied().fold(0.0f32, f32::max);
        if peak <= 0.0 {
            return Err(DpdError::InvalidInput("TX frame carries no signal".into()));
        }

        let mut bins: Vec<(Vec<f32>, Vec<f32>)> = vec![(Vec::new(), Vec::new()); self.n_bins];
        let scale = self.n_bins as f32 / peak;
        for (&t, &r) in tx_amp.iter().zip(rx_amp.iter()) {
            let idx = ((t * scale) as usize).min(self.n_bins - 1);
            bins[idx].0.push(t);
            bins[idx].1.push(r);
        }

        let mut tx_out = Vec::with_capacity(self.n_bins);
        let mut rx_out = Vec::with_capacity(self.n_bins);
        for (mut t, mut r) in bins.into_iter().filter(|(t, _)| t.len() >= self.min_per_bin) {
            if let (Some(mt), Some(mr)) = (median(&mut t), median(&mut r)) {
                tx_out.push(mt);
                rx_out.push(mr);
            }
        }

        if tx_out.len() < NUM_COEFS {
            return Err(DpdError::InvalidInput(format!(
                "only {} amplitude bins hold {} or more samples",
                tx_out.len(),
                self.min_per_bin
            )));
        }
        AmplitudeSamplePair::new(tx_out, rx_out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IQSample;
    use approx::assert_relative_eq;

    fn ramp(n: usize, peak: f32) -> Vec<IQSample> {
        (0..n)
            .map(|i| IQSample::from_polar(peak * (i as f32 + 0.5) / n as f32, i as f32 * 0.7))
            .collect()
    }

    #[test]
    fn test_uniform_ramp_fills_every_bin() {
        let tx = SampleFrame::new(ramp(6400, 0.5), 0.0);
        let rx = SampleFrame::new(
            tx.samples.iter().map(|s| *s * 0.8).collect(),
            0.0,
        );
        let pair = BinnedMedianReducer::default().reduce(&tx, &rx).unwrap();
        assert_eq!(pair.len(), 64);
        for (t, r) in pair.tx().iter().zip(pair.rx()) {
            assert_relative_eq!(*r, 0.8 * t, max_relative = 1e-4);
        }
        assert!(pair.tx().windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_sparse_bins_are_dropped() {
        let reducer = BinnedMedianReducer::new(10, 16).unwrap();
        // 100 samples near zero, 3 at the peak
        let mut samples = ramp(100, 0.05);
        samples.extend(std::iter::repeat(IQSample::new(1.0, 0.0)).take(3));
        let frame = SampleFrame::new(samples, 0.0);
        assert!(matches!(
            reducer.reduce(&frame, &frame),
            Err(DpdError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_rejects_mismatch_and_silence() {
        let reducer = BinnedMedianReducer::default();
        let a = SampleFrame::new(ramp(128, 0.3), 0.0);
        let b = SampleFrame::new(ramp(64, 0.3), 0.0);
        assert!(reducer.reduce(&a, &b).is_err());

        let silent = SampleFrame::new(vec![IQSample::new(0.0, 0.0); 128], 0.0);
        assert!(reducer.reduce(&silent, &silent).is_err());
    }

    #[test]
    fn test_too_few_bins_is_config_error() {
        assert!(matches!(
            BinnedMedianReducer::new(3, 16),
            Err(DpdError::Config(_))
        ));
        assert!(matches!(
            BinnedMedianReducer::new(0, 1),
            Err(DpdError::Config(_))
        ));
    }

    #[test]
    fn test_validated_settings_are_kept() {
        let reducer = BinnedMedianReducer::new(32, 0).unwrap();
        assert_eq!((reducer.n_bins(), reducer.min_per_bin()), (32, 1));
        let frame = SampleFrame::new(ramp(3200, 0.4), 0.0);
        assert_eq!(reducer.reduce(&frame, &frame).unwrap().len(), 32);
    }
}

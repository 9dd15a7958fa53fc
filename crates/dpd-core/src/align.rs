//! Integer-lag alignment of RX against TX
//!
//! The loopback path delays RX by an unknown number of samples. The lag is the
//! peak of the circular cross-correlation, computed with zero padding so the
//! wrap-around does not alias:
//!
//! ```text
//! r[k] = IFFT( FFT(tx) · conj(FFT(rx)) )[k]
//! ```
//!
//! Both frames are then trimmed to their common span.

use num_complex::Complex32;
use rustfft::FftPlanner;

use crate::error::{DpdError, DpdResult};
use crate::types::IQSample;

/// Cross-correlation frame aligner.
pub struct FrameAligner {
    planner: FftPlanner<f32>,
    /// Minimum overlap as a fraction of the shorter frame
    min_overlap: f64,
}

impl Default for FrameAligner {
    fn default() -> Self {
        Self::new(0.25)
    }
}

impl std::fmt::Debug for FrameAligner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameAligner")
            .field("min_overlap", &self.min_overlap)
            .finish()
    }
}

impl FrameAligner {
    pub fn new(min_overlap: f64) -> Self {
        Self {
            planner: FftPlanner::new(),
            min_overlap: min_overlap.clamp(0.0, 1.0),
        }
    }

    /// Lag of RX relative to TX in samples.
    ///
    /// Positive: RX arrives later than TX (`rx[n + lag] ≈ tx[n]`).
    pub fn lag(&mut self, tx: &[IQSample], rx: &[IQSample]) -> DpdResult<isize> {
        if tx.is_empty() || rx.is_empty() {
            return Err(DpdError::InvalidInput("cannot align empty frames".into()));
        }
        let n = (tx.len() + rx.len()).next_power_of_two();

        let mut a = padded(tx, n);
        let mut b = padded(rx, n);
        let fft = self.planner.plan_fft_forward(n);
        fft.process(&mut a);
        fft.process(&mut b);

        for (x, y) in a.iter_mut().zip(b.iter()) {
            *x *= y.conj();
        }
        self.planner.plan_fft_inverse(n).process(&mut a);

        let peak = a
            .iter()
            .enumerate()
            .max_by(|(_, x), (_, y)| x.norm_sqr().total_cmp(&y.norm_sqr()))
            .map(|(i, _)| i)
            .unwrap_or(0);

        // r[k] peaks where tx[m + k] = rx[m]; k in the upper half wraps to a
        // negative shift, i.e. RX is late by n - k.
        Ok(if peak > n / 2 {
            (n - peak) as isize
        } else {
            -(peak as isize)
        })
    }

    /// Shift RX onto TX and trim both to the overlapping span.
    pub fn align(
        &mut self,
        tx: &[IQSample],
        rx: &[IQSample],
    ) -> DpdResult<(Vec<IQSample>, Vec<IQSample>)> {
        let lag = self.lag(tx, rx)?;
        let shorter = tx.len().min(rx.len());
        let (tx, rx) = if lag >= 0 {
            (tx, &rx[(lag as usize).min(rx.len())..])
        } else {
            (&tx[(lag.unsigned_abs()).min(tx.len())..], rx)
        };

        let len = tx.len().min(rx.len());
        let required = (self.min_overlap * shorter as f64).ceil() as usize;
        if len == 0 || len < required {
            return Err(DpdError::InvalidInput(format!(
                "only {} overlapping samples after a lag of {}",
                len, lag
            )));
        }
        Ok((tx[..len].to_vec(), rx[..len].to_vec()))
    }
}

fn padded(samples: &[IQSample], n: usize) -> Vec<Complex32> {
    let mut out = Vec::with_capacity(n);
    out.extend_from_slice(samples);
    out.resize(n, Complex32::new(0.0, 0.0));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn noise(n: usize, seed: u64) -> Vec<IQSample> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| IQSample::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)))
            .collect()
    }

    #[test]
    fn test_lag_of_delayed_rx() {
        let tx = noise(1024, 1);
        let mut rx = vec![IQSample::new(0.0, 0.0); 7];
        rx.extend_from_slice(&tx[..1017]);
        let mut aligner = FrameAligner::default();
        assert_eq!(aligner.lag(&tx, &rx).unwrap(), 7);
    }

    #[test]
    fn test_lag_of_early_rx() {
        let tx = noise(1024, 2);
        let rx = tx[5..].to_vec();
        let mut aligner = FrameAligner::default();
        assert_eq!(aligner.lag(&tx, &rx).unwrap(), -5);
    }

    #[test]
    fn test_align_trims_to_overlap() {
        let tx = noise(512, 3);
        let mut rx: Vec<IQSample> = vec![IQSample::new(0.0, 0.0); 12];
        rx.extend(tx.iter().map(|s| *s * 0.5));
        let mut aligner = FrameAligner::default();
        let (a, b) = aligner.align(&tx, &rx).unwrap();
        assert_eq!(a.len(), 512);
        assert_eq!(b.len(), 512);
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((*x * 0.5 - *y).norm() < 1e-6);
        }
    }

    #[test]
    fn test_align_rejects_empty() {
        let mut aligner = FrameAligner::default();
        assert!(aligner.align(&[], &noise(4, 0)).is_err());
    }
}

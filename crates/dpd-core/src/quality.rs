//! Signal quality probes
//!
//! The adaptation loop reports the modulation error ratio of TX and RX after
//! each update. [`OfdmMerProbe`] measures it on a DAB transmission mode I
//! signal:
//!
//! 1. locate a symbol by correlating the guard interval with the symbol tail
//! 2. FFT a window that starts inside the guard interval and pick the 1536
//!    active carriers
//! 3. remove the phase slope across carriers left by the early start
//! 4. remove the common phase with the 4th-power estimator
//! 5. compare against the unit QPSK constellation
//!
//! MER = 10·log10(Σ|ref|² / Σ|err|²), capped at 100 dB.

use std::sync::Arc;

use num_complex::{Complex32, Complex64};
use rustfft::{Fft, FftPlanner};

use crate::error::{DpdError, DpdResult};
use crate::types::IQSample;

/// MER reported for error-free input
pub const MER_CAP_DB: f64 = 100.0;

/// Locates symbols and measures MER on captured frames.
pub trait QualityProbe {
    /// Start of a measurement window for the first complete symbol in
    /// `samples`. The window may begin inside the guard interval.
    fn symbol_offset(&self, samples: &[IQSample]) -> DpdResult<usize>;

    /// MER of one useful symbol part of exactly [`window_len`](Self::window_len) samples.
    fn mer_db(&self, window: &[IQSample]) -> DpdResult<f64>;

    fn window_len(&self) -> usize;

    /// TX and RX MER over the same window, located on TX.
    fn measure(&self, tx: &[IQSample], rx: &[IQSample]) -> DpdResult<(f64, f64)> {
        let off = self.symbol_offset(tx)?;
        let end = off + self.window_len();
        if end > tx.len() || end > rx.len() {
            return Err(DpdError::InvalidInput(format!(
                "symbol window {}..{} exceeds the {}-sample capture",
                off,
                end,
                tx.len().min(rx.len())
            )));
        }
        Ok((self.mer_db(&tx[off..end])?, self.mer_db(&rx[off..end])?))
    }
}

/// Symbol geometry of an OFDM signal in samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfdmGeometry {
    /// Useful symbol length (FFT size)
    pub t_u: usize,
    /// Guard interval (cyclic prefix) length
    pub t_gi: usize,
    /// Active carriers, split evenly around DC
    pub n_carriers: usize,
}

impl OfdmGeometry {
    /// Native DAB sample rate
    pub const DAB_SAMPLERATE: f64 = 2_048_000.0;

    /// DAB transmission mode I resampled to `samplerate`.
    pub fn dab_mode_1(samplerate: f64) -> DpdResult<Self> {
        let factor = samplerate / Self::DAB_SAMPLERATE;
        if !(factor.is_finite() && factor >= 1.0) {
            return Err(DpdError::Config(format!(
                "sample rate {} Hz is below the DAB rate",
                samplerate
            )));
        }
        Ok(Self {
            t_u: (2048.0 * factor).round() as usize,
            t_gi: (504.0 * factor).round() as usize,
            n_carriers: 1536,
        })
    }

    /// Full symbol length
    pub fn t_s(&self) -> usize {
        self.t_u + self.t_gi
    }

    /// Samples the measurement window starts ahead of the useful part.
    pub fn guard_margin(&self) -> usize {
        self.t_gi / 4
    }

    /// FFT bins of the active carriers: `1..=K/2` then `T_U-K/2..T_U`.
    pub fn carrier_bins(&self) -> impl Iterator<Item = usize> + '_ {
        let half = self.n_carriers / 2;
        (1..=half).chain(self.t_u - half..self.t_u)
    }

    /// Active carriers as `(bin, frequency index)` from `-K/2` up to `K/2`.
    fn signed_carriers(&self) -> impl Iterator<Item = (usize, i64)> + '_ {
        let half = self.n_carriers / 2;
        let t_u = self.t_u as i64;
        (self.t_u - half..self.t_u)
            .map(move |k| (k, k as i64 - t_u))
            .chain((1..=half).map(|k| (k, k as i64)))
    }
}

/// MER probe for DAB mode I.
pub struct OfdmMerProbe {
    geometry: OfdmGeometry,
    fft: Arc<dyn Fft<f32>>,
}

impl std::fmt::Debug for OfdmMerProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfdmMerProbe")
            .field("geometry", &self.geometry)
            .finish()
    }
}

impl OfdmMerProbe {
    pub fn new(geometry: OfdmGeometry) -> Self {
        let fft = FftPlanner::new().plan_fft_forward(geometry.t_u);
        Self { geometry, fft }
    }

    pub fn dab_mode_1(samplerate: f64) -> DpdResult<Self> {
        Ok(Self::new(OfdmGeometry::dab_mode_1(samplerate)?))
    }

    pub fn geometry(&self) -> &OfdmGeometry {
        &self.geometry
    }
}

impl QualityProbe for OfdmMerProbe {
    fn symbol_offset(&self, samples: &[IQSample]) -> DpdResult<usize> {
        let OfdmGeometry { t_u, t_gi, .. } = self.geometry;
        let t_s = self.geometry.t_s();
        if samples.len() < 2 * t_s {
            return Err(DpdError::InvalidInput(format!(
                "{} samples cannot hold two {}-sample symbols",
                samples.len(),
                t_s
            )));
        }

        // products of each sample with its copy one useful length later
        let prod: Vec<Complex64> = (0..t_s + t_gi)
            .map(|n| {
                let a = samples[n];
                let b = samples[n + t_u];
                Complex64::new(a.re as f64, a.im as f64)
                    * Complex64::new(b.re as f64, -b.im as f64)
            })
            .collect();

        let mut acc: Complex64 = prod[..t_gi].iter().sum();
        let mut best = (0usize, acc.norm_sqr());
        for s in 1..t_s {
            acc += prod[s + t_gi - 1] - prod[s - 1];
            let power = acc.norm_sqr();
            if power > best.1 {
                best = (s, power);
            }
        }
        // best.0 is the start of the guard interval; back off from the useful
        // part so a few samples of timing error stay inside the same symbol
        Ok(best.0 + t_gi - self.geometry.guard_margin())
    }

    fn mer_db(&self, window: &[IQSample]) -> DpdResult<f64> {
        if window.len() != self.geometry.t_u {
            return Err(DpdError::InvalidInput(format!(
                "MER window must be {} samples, got {}",
                self.geometry.t_u,
                window.len()
            )));
        }
        let mut spectrum: Vec<Complex32> = window.to_vec();
        self.fft.process(&mut spectrum);

        let (bins, freqs): (Vec<usize>, Vec<i64>) = self.geometry.signed_carriers().unzip();
        let carriers: Vec<Complex64> = bins
            .iter()
            .map(|&k| Complex64::new(spectrum[k].re as f64, spectrum[k].im as f64))
            .collect();

        let mean_mag = carriers.iter().map(|c| c.norm()).sum::<f64>() / carriers.len() as f64;
        if !(mean_mag.is_finite() && mean_mag > 0.0) {
            return Err(DpdError::InvalidInput("no energy on the active carriers".into()));
        }

        // a window starting d samples early rotates carrier f by 2π·f·d/T_U;
        // estimate that slope on neighbouring carriers with QPSK stripped
        let stripped: Vec<Complex64> = carriers.iter().map(|c| c.powu(4)).collect();
        let step: Complex64 = (1..carriers.len())
            .filter(|&i| freqs[i] - freqs[i - 1] == 1)
            .map(|i| stripped[i] * stripped[i - 1].conj())
            .sum();
        let slope = step.arg() / 4.0;
        let carriers: Vec<Complex64> = carriers
            .iter()
            .zip(&freqs)
            .map(|(c, &f)| c * Complex64::from_polar(1.0, -slope * f as f64))
            .collect();

        let fourth: Complex64 = carriers.iter().map(|c| c.powu(4)).sum();
        let theta = (fourth.arg() - std::f64::consts::PI) / 4.0;
        let derotate = Complex64::from_polar(1.0 / mean_mag, -theta);

        let (mut ref_power, mut err_power) = (0.0f64, 0.0f64);
        for c in carriers {
            let c = c * derotate;
            let nearest = Complex64::new(c.re.signum(), c.im.signum()) / std::f64::consts::SQRT_2;
            ref_power += nearest.norm_sqr();
            err_power += (c - nearest).norm_sqr();
        }

        if err_power < 1e-30 {
            return Ok(MER_CAP_DB);
        }
        Ok((10.0 * (ref_power / err_power).log10()).min(MER_CAP_DB))
    }

    fn window_len(&self) -> usize {
        self.geometry.t_u
    }
}

//! Power amplifier behavioral models
//!
//! Memoryless AM/AM and AM/PM characteristics of the simulated amplifier:
//!
//! - **Rapp**: solid-state amplifier, smooth amplitude limiting, no AM/PM
//! - **Saleh**: travelling-wave tube, amplitude fold-back plus AM/PM
//!
//! ## Example
//!
//! ```rust
//! use dpd_sim::pa::PaModel;
//! use num_complex::Complex32;
//!
//! let pa = PaModel::rapp(1.0, 2.0);
//! let y = pa.apply(Complex32::new(0.3, 0.4));
//! assert!(y.norm() < 0.5);
//! ```

use num_complex::Complex32;
use serde::{Deserialize, Serialize};

/// Amplifier characteristic, input amplitude in units of the drive level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum PaModel {
    /// g(r) = r / (1 + (r/saturation)^(2p))^(1/(2p))
    Rapp { saturation: f64, smoothness: f64 },
    /// g(r) = α_a·r / (1 + β_a·r²), φ(r) = α_φ·r² / (1 + β_φ·r²)
    Saleh {
        alpha_a: f64,
        beta_a: f64,
        alpha_phi: f64,
        beta_phi: f64,
    },
}

impl Default for PaModel {
    fn default() -> Self {
        Self::rapp(1.0, 2.0)
    }
}

impl PaModel {
    pub fn rapp(saturation: f64, smoothness: f64) -> Self {
        Self::Rapp {
            saturation,
            smoothness,
        }
    }

    /// Saleh model with unit small-signal gain.
    pub fn saleh(beta_a: f64, alpha_phi: f64, beta_phi: f64) -> Self {
        Self::Saleh {
            alpha_a: 1.0,
            beta_a,
            alpha_phi,
            beta_phi,
        }
    }

    /// Output amplitude for input amplitude `r`.
    pub fn am_am(&self, r: f64) -> f64 {
        match *self {
            Self::Rapp {
                saturation,
                smoothness,
            } => {
                let p = 2.0 * smoothness;
                r / (1.0 + (r / saturation).powf(p)).powf(1.0 / p)
            }
            Self::Saleh {
                alpha_a, beta_a, ..
            } => alpha_a * r / (1.0 + beta_a * r * r),
        }
    }

    /// Phase shift in radians for input amplitude `r`.
    pub fn am_pm(&self, r: f64) -> f64 {
        match *self {
            Self::Rapp { .. } => 0.0,
            Self::Saleh {
                alpha_phi,
                beta_phi,
                ..
            } => alpha_phi * r * r / (1.0 + beta_phi * r * r),
        }
    }

    pub fn apply(&self, x: Complex32) -> Complex32 {
        let r = x.norm() as f64;
        if r < 1e-15 {
            return Complex32::new(0.0, 0.0);
        }
        let g = self.am_am(r);
        let phase = x.arg() as f64 + self.am_pm(r);
        Complex32::from_polar(g as f32, phase as f32)
    }

    /// Input amplitude at which the gain has dropped 1 dB below small-signal.
    pub fn compression_point_1db(&self) -> f64 {
        let small_signal = self.am_am(1e-3) / 1e-3;
        let target = small_signal * 10f64.powf(-1.0 / 20.0);

        let (mut lo, mut hi) = (0.0f64, 10.0f64);
        for _ in 0..60 {
            let mid = (lo + hi) / 2.0;
            if self.am_am(mid) / mid > target {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        (lo + hi) / 2.0
    }
}

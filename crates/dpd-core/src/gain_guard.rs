//! TX gain guard
//!
//! Keeps the digital signal clear of DAC clipping. The TX peak level is
//! tracked through the median amplitude of the TX capture; when the median
//! leaves `[threshold_min, threshold_max]` the analog TX gain and the digital
//! gain are traded against each other so that the median returns to
//! `target` while the radiated level stays the same:
//!
//! ```text
//! delta_db     = 20·log10(target / median)
//! tx_gain'     = tx_gain − delta_db
//! digital'     = digital · 10^(delta_db / 20)
//! ```
//!
//! A median above target gives a negative `delta_db`: analog gain rises and
//! digital gain falls by the same amount.
//!
//! ## Example
//!
//! ```rust
//! use dpd_core::gain_guard::{GainGuard, GainGuardConfig};
//!
//! let guard = GainGuard::new(GainGuardConfig {
//!     settle_secs: 0.0,
//!     ..Default::default()
//! })
//! .unwrap();
//! assert!(guard.in_band(0.1));
//! assert!(!guard.in_band(0.2));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::channel::ConfigChannel;
use crate::error::{DpdError, DpdResult, GainStage};
use crate::types::{amplitudes, median, IQSample};

/// Gain guard thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GainGuardConfig {
    /// Analog TX gain ceiling in dB (exclusive)
    pub max_txgain: f64,
    /// Median TX amplitude to steer towards
    pub tx_median_target: f64,
    /// Upper edge of the tolerated median band
    pub tx_median_threshold_max: f64,
    /// Lower edge of the tolerated median band
    pub tx_median_threshold_min: f64,
    /// Pause after a gain change, in seconds
    pub settle_secs: f64,
}

impl Default for GainGuardConfig {
    fn default() -> Self {
        Self {
            max_txgain: 89.0,
            tx_median_target: 0.1,
            tx_median_threshold_max: 0.12,
            tx_median_threshold_min: 0.08,
            settle_secs: 1.0,
        }
    }
}

impl GainGuardConfig {
    pub fn settle_time(&self) -> Duration {
        Duration::from_secs_f64(self.settle_secs)
    }

    pub fn validate(&self) -> DpdResult<()> {
        let all_finite = [
            self.max_txgain,
            self.tx_median_target,
            self.tx_median_threshold_max,
            self.tx_median_threshold_min,
            self.settle_secs,
        ]
        .iter()
        .all(|v| v.is_finite());
        if !all_finite {
            return Err(DpdError::Config("gain guard settings must be finite".into()));
        }
        if self.tx_median_target <= 0.0 {
            return Err(DpdError::Config(format!(
                "TX median target must be positive, got {}",
                self.tx_median_target
            )));
        }
        if self.tx_median_threshold_max <= self.tx_median_target {
            return Err(DpdError::Config(format!(
                "tolerated TX median {} must exceed the target {}",
                self.tx_median_threshold_max, self.tx_median_target
            )));
        }
        if self.tx_median_threshold_min >= self.tx_median_target {
            return Err(DpdError::Config(format!(
                "minimum TX median {} must be below the target {}",
                self.tx_median_threshold_min, self.tx_median_target
            )));
        }
        if self.settle_secs < 0.0 {
            return Err(DpdError::Config("settle time cannot be negative".into()));
        }
        Ok(())
    }
}

/// Analog/digital gain trader for the TX path.
#[derive(Debug, Clone)]
pub struct GainGuard {
    config: GainGuardConfig,
}

impl GainGuard {
    pub fn new(config: GainGuardConfig) -> DpdResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &GainGuardConfig {
        &self.config
    }

    /// Whether `tx_median` lies in the tolerated band (edges included).
    pub fn in_band(&self, tx_median: f64) -> bool {
        tx_median >= self.config.tx_median_threshold_min
            && tx_median <= self.config.tx_median_threshold_max
    }

    /// Gain correction in dB that moves `tx_median` onto the target.
    pub fn delta_db(&self, tx_median: f64) -> f64 {
        20.0 * (self.config.tx_median_target / tx_median).log10()
    }

    /// Re-balance TX and digital gain if the TX median is out of band.
    ///
    /// Returns `Ok(true)` when gains were changed; the caller should discard
    /// the capture since it was taken at the old operating point. Fails with
    /// [`DpdError::GainLimit`] before touching the channel if the new TX gain
    /// would reach `max_txgain`.
    pub fn adapt_if_necessary<R>(&self, channel: &mut R, tx: &[IQSample]) -> DpdResult<bool>
    where
        R: ConfigChannel + ?Sized,
    {
        let tx_median = median(&mut amplitudes(tx))
            .ok_or_else(|| DpdError::InvalidInput("empty TX frame".into()))?
            as f64;
        if !tx_median.is_finite() {
            return Err(DpdError::InvalidInput(format!("TX median is {}", tx_median)));
        }
        if self.in_band(tx_median) {
            return Ok(false);
        }
        if tx_median <= 0.0 {
            return Err(DpdError::InvalidInput("TX frame is silent".into()));
        }

        let delta_db = self.delta_db(tx_median);
        let new_txgain = channel.tx_gain()? - delta_db;
        if new_txgain >= self.config.max_txgain {
            return Err(DpdError::GainLimit {
                stage: GainStage::Tx,
                requested: new_txgain,
                limit: self.config.max_txgain,
            });
        }
        channel.set_tx_gain(new_txgain)?;
        let txgain = channel.tx_gain()?;

        let factor = 10f64.powf(delta_db / 20.0);
        let digital_gain = channel.digital_gain()? * factor;
        channel.set_digital_gain(digital_gain)?;

        info!(
            digital_gain,
            txgain, delta_db, tx_median, factor, "TX gain re-balanced"
        );

        let settle = self.config.settle_time();
        if !settle.is_zero() {
            std::thread::sleep(settle);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AmCoefficients, PmCoefficients, IDENTITY_AM, ZERO_PM};
    use approx::assert_abs_diff_eq;

    #[derive(Debug, Default)]
    struct Gains {
        tx: f64,
        digital: f64,
        writes: usize,
    }

    impl ConfigChannel for Gains {
        fn coefficients(&mut self) -> DpdResult<(AmCoefficients, PmCoefficients)> {
            Ok((IDENTITY_AM, ZERO_PM))
        }
        fn set_coefficients(&mut self, _: &AmCoefficients, _: &PmCoefficients) -> DpdResult<()> {
            self.writes += 1;
            Ok(())
        }
        fn tx_gain(&mut self) -> DpdResult<f64> {
            Ok(self.tx)
        }
        fn set_tx_gain(&mut self, gain_db: f64) -> DpdResult<()> {
            self.writes += 1;
            self.tx = gain_db;
            Ok(())
        }
        fn rx_gain(&mut self) -> DpdResult<f64> {
            Ok(30.0)
        }
        fn set_rx_gain(&mut self, _: f64) -> DpdResult<()> {
            self.writes += 1;
            Ok(())
        }
        fn digital_gain(&mut self) -> DpdResult<f64> {
            Ok(self.digital)
        }
        fn set_digital_gain(&mut self, gain: f64) -> DpdResult<()> {
            self.writes += 1;
            self.digital = gain;
            Ok(())
        }
    }

    fn guard() -> GainGuard {
        GainGuard::new(GainGuardConfig {
            settle_secs: 0.0,
            ..Default::default()
        })
        .unwrap()
    }

    fn frame(median: f32) -> Vec<IQSample> {
        // amplitudes 0.5·m, m, 1.5·m at varying phase
        (0..301)
            .map(|i| IQSample::from_polar(median * (0.5 + (i % 3) as f32 * 0.5), i as f32))
            .collect()
    }

    #[test]
    fn test_in_band_leaves_gains_alone() {
        let mut ch = Gains {
            tx: 74.0,
            digital: 1.0,
            writes: 0,
        };
        for m in [0.085f32, 0.1, 0.115] {
            assert!(!guard().adapt_if_necessary(&mut ch, &frame(m)).unwrap());
        }
        assert_eq!(ch.writes, 0);
        assert_eq!(ch.tx, 74.0);
        assert_eq!(ch.digital, 1.0);
    }

    #[test]
    fn test_median_twice_target_raises_tx_gain() {
        let mut ch = Gains {
            tx: 74.0,
            digital: 1.0,
            writes: 0,
        };
        let g = guard();
        assert_abs_diff_eq!(g.delta_db(0.2), -6.0206, epsilon = 1e-4);
        assert!(g.adapt_if_necessary(&mut ch, &frame(0.2)).unwrap());
        assert_abs_diff_eq!(ch.tx, 74.0 + 6.0206, epsilon = 1e-3);
        assert_abs_diff_eq!(ch.digital, 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_median_below_min_lowers_tx_gain() {
        let mut ch = Gains {
            tx: 74.0,
            digital: 0.5,
            writes: 0,
        };
        assert!(guard().adapt_if_necessary(&mut ch, &frame(0.05)).unwrap());
        assert_abs_diff_eq!(ch.tx, 74.0 - 6.0206, epsilon = 1e-3);
        assert_abs_diff_eq!(ch.digital, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_gain_limit_fails_without_mutation() {
        let mut ch = Gains {
            tx: 85.0,
            digital: 1.0,
            writes: 0,
        };
        // needs +6 dB, ceiling is 89
        let err = guard().adapt_if_necessary(&mut ch, &frame(0.2)).unwrap_err();
        assert!(matches!(
            err,
            DpdError::GainLimit {
                stage: GainStage::Tx,
                ..
            }
        ));
        assert!(err.is_structural());
        assert_eq!(ch.writes, 0);
        assert_eq!(ch.tx, 85.0);
    }

    #[test]
    fn test_gain_exactly_at_limit_fails() {
        let mut ch = Gains {
            tx: 89.0 + 20.0 * (0.1f64 / 0.2).log10(),
            digital: 1.0,
            writes: 0,
        };
        let tx = vec![IQSample::new(0.2, 0.0); 16];
        assert!(guard().adapt_if_necessary(&mut ch, &tx).is_err());
        assert_eq!(ch.writes, 0);
    }

    #[test]
    fn test_empty_frame_is_invalid() {
        let mut ch = Gains::default();
        assert!(matches!(
            guard().adapt_if_necessary(&mut ch, &[]),
            Err(DpdError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_config_validation() {
        let bad_max = GainGuardConfig {
            tx_median_threshold_max: 0.1,
            ..Default::default()
        };
        assert!(matches!(GainGuard::new(bad_max), Err(DpdError::Config(_))));
        let bad_min = GainGuardConfig {
            tx_median_threshold_min: 0.11,
            ..Default::default()
        };
        assert!(matches!(GainGuard::new(bad_min), Err(DpdError::Config(_))));
    }
}

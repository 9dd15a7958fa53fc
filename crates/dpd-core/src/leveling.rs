//! RX auto-levelling
//!
//! Before adaptation starts, the feedback receiver gain is brought to a
//! point where the estimated RX peak sits at full scale. The peak is not
//! measured directly; it is estimated as a fixed multiple of the median.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::capture::CaptureSource;
use crate::channel::ConfigChannel;
use crate::error::{DpdError, DpdResult, GainStage};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RxLevelingConfig {
    /// Capture/adjust rounds
    pub passes: usize,
    /// Assumed ratio of RX peak to RX median amplitude
    pub peak_to_median: f64,
    /// RX gain floor in dB
    pub min_rxgain: f64,
    /// Pause after each gain change, in seconds
    pub settle_secs: f64,
}

impl Default for RxLevelingConfig {
    fn default() -> Self {
        Self {
            passes: 3,
            peak_to_median: 20.0,
            min_rxgain: 25.0,
            settle_secs: 1.0,
        }
    }
}

impl RxLevelingConfig {
    pub fn validate(&self) -> DpdResult<()> {
        if !(self.peak_to_median.is_finite() && self.peak_to_median > 0.0) {
            return Err(DpdError::Config(format!(
                "peak to median ratio must be positive, got {}",
                self.peak_to_median
            )));
        }
        if !self.min_rxgain.is_finite() {
            return Err(DpdError::Config("RX gain floor must be finite".into()));
        }
        if !(self.settle_secs.is_finite() && self.settle_secs >= 0.0) {
            return Err(DpdError::Config("settle time cannot be negative".into()));
        }
        Ok(())
    }
}

/// Blocking RX gain bootstrap.
#[derive(Debug, Clone)]
pub struct RxLeveler {
    config: RxLevelingConfig,
}

impl RxLeveler {
    pub fn new(config: RxLevelingConfig) -> DpdResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RxLevelingConfig {
        &self.config
    }

    /// RX gain step in dB that moves the estimated peak to 1.0.
    pub fn correction_db(&self, rx_median: f64) -> f64 {
        20.0 * (1.0 / (self.config.peak_to_median * rx_median)).log10()
    }

    /// Run all passes and return the final RX gain.
    pub fn run<C, R>(&self, capture: &mut C, channel: &mut R) -> DpdResult<f64>
    where
        C: CaptureSource + ?Sized,
        R: ConfigChannel + ?Sized,
    {
        let mut rx_gain = channel.rx_gain()?;
        for pass in 0..self.config.passes {
            let pair = capture.get_samples()?;
            let rx_median = pair.rx_median as f64;
            if !(rx_median.is_finite() && rx_median > 0.0) {
                return Err(DpdError::InvalidInput(format!(
                    "RX median amplitude is {}",
                    rx_median
                )));
            }

            let delta = self.correction_db(rx_median);
            let next = rx_gain + delta;
            if next < self.config.min_rxgain {
                return Err(DpdError::GainLimit {
                    stage: GainStage::Rx,
                    requested: next,
                    limit: self.config.min_rxgain,
                });
            }
            channel.set_rx_gain(next)?;
            rx_gain = channel.rx_gain()?;
            info!(pass, rx_median, delta_db = delta, rx_gain, "RX gain levelled");

            if self.config.settle_secs > 0.0 {
                std::thread::sleep(Duration::from_secs_f64(self.config.settle_secs));
            }
        }
        Ok(rx_gain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        AmCoefficients, CapturedPair, PmCoefficients, SampleFrame, IDENTITY_AM, ZERO_PM,
    };
    use approx::assert_abs_diff_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Loopback whose RX median follows the RX gain: 0.005 at 30 dB.
    #[derive(Debug)]
    struct Device {
        rx_gain: f64,
        captures: usize,
        follows_gain: bool,
    }

    #[derive(Clone)]
    struct Handle(Rc<RefCell<Device>>);

    impl Handle {
        fn new(rx_gain: f64, follows_gain: bool) -> Self {
            Handle(Rc::new(RefCell::new(Device {
                rx_gain,
                captures: 0,
                follows_gain,
            })))
        }
    }

    impl CaptureSource for Handle {
        fn get_samples(&mut self) -> DpdResult<CapturedPair> {
            let mut dev = self.0.borrow_mut();
            dev.captures += 1;
            let gain = if dev.follows_gain { dev.rx_gain } else { 30.0 };
            Ok(CapturedPair {
                tx: SampleFrame::new(vec![], 0.0),
                rx: SampleFrame::new(vec![], 0.0),
                rx_median: (0.005 * 10f64.powf((gain - 30.0) / 20.0)) as f32,
            })
        }
    }

    impl ConfigChannel for Handle {
        fn coefficients(&mut self) -> DpdResult<(AmCoefficients, PmCoefficients)> {
            Ok((IDENTITY_AM, ZERO_PM))
        }
        fn set_coefficients(&mut self, _: &AmCoefficients, _: &PmCoefficients) -> DpdResult<()> {
            Ok(())
        }
        fn tx_gain(&mut self) -> DpdResult<f64> {
            Ok(74.0)
        }
        fn set_tx_gain(&mut self, _: f64) -> DpdResult<()> {
            Ok(())
        }
        fn rx_gain(&mut self) -> DpdResult<f64> {
            Ok(self.0.borrow().rx_gain)
        }
        fn set_rx_gain(&mut self, gain_db: f64) -> DpdResult<()> {
            self.0.borrow_mut().rx_gain = gain_db;
            Ok(())
        }
        fn digital_gain(&mut self) -> DpdResult<f64> {
            Ok(1.0)
        }
        fn set_digital_gain(&mut self, _: f64) -> DpdResult<()> {
            Ok(())
        }
    }

    fn leveler() -> RxLeveler {
        RxLeveler::new(RxLevelingConfig {
            settle_secs: 0.0,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_levels_rx_peak_to_full_scale() {
        let dev = Handle::new(30.0, true);
        let gain = leveler().run(&mut dev.clone(), &mut dev.clone()).unwrap();
        // peak 20 · 0.005 = 0.1 → +20 dB, then already levelled
        assert_abs_diff_eq!(gain, 50.0, epsilon = 1e-3);
        assert_eq!(dev.0.borrow().captures, 3);
    }

    #[test]
    fn test_each_pass_applies_its_own_correction() {
        let dev = Handle::new(30.0, false);
        let gain = leveler().run(&mut dev.clone(), &mut dev.clone()).unwrap();
        assert_abs_diff_eq!(gain, 30.0 + 3.0 * 20.0, epsilon = 1e-3);
    }

    #[test]
    fn test_gain_floor_is_structural() {
        // median 0.5 → peak 10 → −20 dB from 30 dB
        let dev = Handle::new(70.0, true);
        let mut capture = dev.clone();
        let mut channel = Handle::new(30.0, true);
        let err = leveler().run(&mut capture, &mut channel).unwrap_err();
        assert!(matches!(
            err,
            DpdError::GainLimit {
                stage: GainStage::Rx,
                ..
            }
        ));
        assert!(err.is_structural());
        assert_eq!(channel.0.borrow().rx_gain, 30.0);
    }

    #[test]
    fn test_rejects_bad_config() {
        let bad = RxLevelingConfig {
            peak_to_median: 0.0,
            ..Default::default()
        };
        assert!(matches!(RxLeveler::new(bad), Err(DpdError::Config(_))));
    }
}

//! Transmitter configuration channel
//!
//! The engine never holds gain or coefficient state of its own: every read
//! and write goes through a [`ConfigChannel`] handle, the only path that
//! changes real hardware.
//!
//! - [`rc`]: JSON request/reply client for a running transmitter
//! - [`protocol`]: wire messages used by [`rc`]

pub mod protocol;
pub mod rc;

use serde::{Deserialize, Serialize};

use crate::error::DpdResult;
use crate::types::{AmCoefficients, PmCoefficients};

pub use rc::RemoteControl;

/// Analog and digital gain settings of the transmit/loopback chain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GainState {
    /// Analog TX gain in dB
    pub tx_gain: f64,
    /// Analog RX (feedback) gain in dB
    pub rx_gain: f64,
    /// Linear digital scale factor applied before the DAC
    pub digital_gain: f64,
}

/// Accessor/mutator contract for transmitter parameters.
pub trait ConfigChannel {
    /// Currently loaded AM/AM and AM/PM coefficients.
    fn coefficients(&mut self) -> DpdResult<(AmCoefficients, PmCoefficients)>;

    /// Persist and activate new coefficients.
    fn set_coefficients(&mut self, am: &AmCoefficients, pm: &PmCoefficients) -> DpdResult<()>;

    fn tx_gain(&mut self) -> DpdResult<f64>;
    fn set_tx_gain(&mut self, gain_db: f64) -> DpdResult<()>;

    fn rx_gain(&mut self) -> DpdResult<f64>;
    fn set_rx_gain(&mut self, gain_db: f64) -> DpdResult<()>;

    fn digital_gain(&mut self) -> DpdResult<f64>;
    fn set_digital_gain(&mut self, gain: f64) -> DpdResult<()>;

    /// Read all three gains.
    fn gain_state(&mut self) -> DpdResult<GainState> {
        Ok(GainState {
            tx_gain: self.tx_gain()?,
            rx_gain: self.rx_gain()?,
            digital_gain: self.digital_gain()?,
        })
    }
}

impl<T: ConfigChannel + ?Sized> ConfigChannel for Box<T> {
    fn coefficients(&mut self) -> DpdResult<(AmCoefficients, PmCoefficients)> {
        (**self).coefficients()
    }

    fn set_coefficients(&mut self, am: &AmCoefficients, pm: &PmCoefficients) -> DpdResult<()> {
        (**self).set_coefficients(am, pm)
    }

    fn tx_gain(&mut self) -> DpdResult<f64> {
        (**self).tx_gain()
    }

    fn set_tx_gain(&mut self, gain_db: f64) -> DpdResult<()> {
        (**self).set_tx_gain(gain_db)
    }

    fn rx_gain(&mut self) -> DpdResult<f64> {
        (**self).rx_gain()
    }

    fn set_rx_gain(&mut self, gain_db: f64) -> DpdResult<()> {
        (**self).set_rx_gain(gain_db)
    }

    fn digital_gain(&mut self) -> DpdResult<f64> {
        (**self).digital_gain()
    }

    fn set_digital_gain(&mut self, gain: f64) -> DpdResult<()> {
        (**self).set_digital_gain(gain)
    }
}

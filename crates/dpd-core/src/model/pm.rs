//! AM/PM companion model seam.
//!
//! The adaptation loop pushes AM and PM coefficients together, so it needs
//! a PM update every iteration. Phase fitting itself lives elsewhere; the
//! default here keeps whatever the transmitter already has.

use crate::error::DpdResult;
use crate::types::{PmCoefficients, SampleFrame};

/// Produces the next AM/PM coefficients from an aligned TX/RX pair.
pub trait PhaseModel {
    fn next_coefs(
        &mut self,
        tx: &SampleFrame,
        rx: &SampleFrame,
        current: &PmCoefficients,
    ) -> DpdResult<PmCoefficients>;
}

/// Leaves the phase correction untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct HoldPhase;

impl PhaseModel for HoldPhase {
    fn next_coefs(
        &mut self,
        _tx: &SampleFrame,
        _rx: &SampleFrame,
        current: &PmCoefficients,
    ) -> DpdResult<PmCoefficients> {
        Ok(*current)
    }
}

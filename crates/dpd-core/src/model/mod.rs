//! Predistortion models
//!
//! - [`am`]: AM/AM polynomial fit with damped updates
//! - [`pm`]: AM/PM companion seam

pub mod am;
pub mod pm;

pub use am::{curve, evaluate, AmUpdate, FitRecord, PolynomialAmplitudeModel};
pub use pm::{HoldPhase, PhaseModel};

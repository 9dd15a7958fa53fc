//! # Adaptive DPD Engine
//!
//! Closed-loop digital predistortion control for a broadcast transmitter.
//! The engine captures the transmitted signal and its loopback through the
//! power amplifier, fits an AM/AM model of the amplifier's inverse and pushes
//! the resulting predistortion coefficients back to the transmitter.
//!
//! ## Overview
//!
//! - **Capture**: synchronized TX/RX buffers from the feedback server
//! - **Gain guard**: keeps the TX signal clear of digital clipping
//! - **Model**: degree-5 AM/AM polynomial with damped updates
//! - **Control**: coefficient and gain changes through the remote control
//! - **Quality**: MER of TX and RX after each update
//!
//! ## Signal Flow
//!
//! ```text
//!            ┌──────────── coefficients, gains ─────────────┐
//!            ▼                                              │
//! baseband → DPD → digital gain → DAC → PA ─┬─► antenna     │
//!                                           │               │
//!                     TX capture ◄──────────┤ loopback      │
//!                     RX capture ◄──────────┘               │
//!                          │                                │
//!                          └──► AdaptationLoop ─────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use dpd_core::prelude::*;
//! use std::time::Duration;
//!
//! # fn main() -> DpdResult<()> {
//! let capture = TcpCapture::new("127.0.0.1:50055", 81920, Duration::from_secs(10))?;
//! let channel = RemoteControl::connect("127.0.0.1:9400", "poly.coef", Duration::from_secs(5))?;
//!
//! let mut engine = AdaptationLoop::new(
//!     capture,
//!     channel,
//!     GainGuard::new(GainGuardConfig::default())?,
//!     PolynomialAmplitudeModel::new(0.5)?,
//! )
//! .with_probe(Box::new(OfdmMerProbe::dab_mode_1(8_192_000.0)?));
//!
//! let settings = StartupSettings {
//!     load_existing: false,
//!     gains: GainState { tx_gain: 74.0, rx_gain: 30.0, digital_gain: 1.0 },
//! };
//! engine.startup(&settings, Some(&RxLeveler::new(RxLevelingConfig::default())?))?;
//! let summary = engine.run(10)?;
//! println!("{} updates, AM {:?}", summary.updated(), summary.am);
//! # Ok(())
//! # }
//! ```

pub mod adaptation;
pub mod align;
pub mod capture;
pub mod channel;
pub mod coef_file;
pub mod config;
pub mod error;
pub mod gain_guard;
pub mod leveling;
pub mod model;
pub mod observe;
pub mod quality;
pub mod reduce;
pub mod types;

pub use adaptation::{AdaptationLoop, IterationOutcome, RunSummary, StartupSettings};
pub use error::{DpdError, DpdResult, GainStage};
pub use types::{AmplitudeSamplePair, CapturedPair, IQSample, SampleFrame};

/// Everything needed to assemble and run an engine.
pub mod prelude {
    pub use crate::adaptation::{AdaptationLoop, IterationOutcome, RunSummary, StartupSettings};
    pub use crate::capture::{CaptureSource, TcpCapture};
    pub use crate::channel::{ConfigChannel, GainState, RemoteControl};
    pub use crate::config::EngineConfig;
    pub use crate::error::{DpdError, DpdResult, GainStage};
    pub use crate::gain_guard::{GainGuard, GainGuardConfig};
    pub use crate::leveling::{RxLeveler, RxLevelingConfig};
    pub use crate::model::{HoldPhase, PhaseModel, PolynomialAmplitudeModel};
    pub use crate::observe::RunDiagnostics;
    pub use crate::quality::{OfdmMerProbe, QualityProbe};
    pub use crate::reduce::{BinnedMedianReducer, FrameReducer};
    pub use crate::types::{
        AmCoefficients, AmplitudeSamplePair, CapturedPair, IQSample, PmCoefficients, SampleFrame,
        IDENTITY_AM, ZERO_PM,
    };
}

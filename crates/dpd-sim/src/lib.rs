//! # DPD Simulator
//!
//! A software transmitter for running the adaptive DPD engine without
//! hardware. It plays both roles the engine talks to: the feedback capture
//! server and the remote-control endpoint.
//!
//! ## Modules
//!
//! - [`pa`]: Rapp and Saleh amplifier models
//! - [`transmitter`]: OFDM source, predistorter, gain stages and loopback
//!
//! ## Example
//!
//! ```rust
//! use dpd_core::capture::CaptureSource;
//! use dpd_sim::{SimConfig, SimTransmitter};
//!
//! let mut sim = SimTransmitter::new(SimConfig {
//!     samplerate: 2_048_000.0,
//!     num_samples: 8192,
//!     ..Default::default()
//! })
//! .unwrap();
//! let pair = sim.get_samples().unwrap();
//! assert!(pair.skew() < 1e-5);
//! ```

pub mod pa;
pub mod transmitter;

pub use pa::PaModel;
pub use transmitter::{Fault, SimConfig, SimTransmitter, BASEBAND_MEDIAN};

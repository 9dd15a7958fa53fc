//! # Observability
//!
//! - **Logging**: structured console and file logs via `tracing`
//! - **Diagnostics**: per-run directory and fit records for later review
//!
//! ```text
//!   AdaptationLoop
//!     │  tracing::info!/warn!         FitRecord
//!     ▼                                  │
//! ┌──────────┐                    ┌──────────────┐
//! │ Logging  │                    │ Diagnostics  │
//! └──────────┘                    └──────────────┘
//!   stderr + <run>/dpd.log          <run>/fits.jsonl
//! ```

pub mod diagnostics;
pub mod logging;

pub use diagnostics::{FitSink, JsonFitSink, RunDiagnostics};
pub use logging::{init_logging, LogConfig, LogFormat, LogLevel};

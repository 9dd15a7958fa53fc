//! DPD engine error types

use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for DPD engine operations
pub type DpdResult<T> = Result<T, DpdError>;

/// Which analog gain stage a limit applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GainStage {
    Tx,
    Rx,
}

impl fmt::Display for GainStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GainStage::Tx => write!(f, "TX"),
            GainStage::Rx => write!(f, "RX"),
        }
    }
}

/// Errors that can occur while adapting the predistorter
#[derive(Error, Debug)]
pub enum DpdError {
    /// TX and RX captures do not describe the same transmission
    #[error("time stamps do not match: tx {tx_ts:.9} s, rx {rx_ts:.9} s (skew {skew:.3e} s)")]
    Alignment { tx_ts: f64, rx_ts: f64, skew: f64 },

    /// Samples or amplitude statistics violate the input contract
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A computed analog gain crosses the hardware limit
    #[error("{stage} gain of {requested:.2} dB violates the {limit:.2} dB limit")]
    GainLimit {
        stage: GainStage,
        requested: f64,
        limit: f64,
    },

    /// Capture or remote-control round trip failed
    #[error("transport error: {0}")]
    Transport(String),

    /// Peer answered with something we cannot use
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Configuration is inconsistent or cannot be loaded
    #[error("configuration error: {0}")]
    Config(String),

    /// Local file I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Diagnostic output could not be written
    #[error("diagnostics error: {0}")]
    Diagnostics(String),
}

impl DpdError {
    /// Structural faults mean no further adaptation can be trusted: the
    /// operating point is unreachable or the engine is misconfigured.
    pub fn is_structural(&self) -> bool {
        matches!(self, DpdError::GainLimit { .. } | DpdError::Config(_))
    }

    /// Check if the adaptation loop may continue with the next iteration
    pub fn is_recoverable(&self) -> bool {
        !self.is_structural()
    }

    pub(crate) fn transport(context: &str, e: io::Error) -> Self {
        DpdError::Transport(format!("{}: {}", context, e))
    }
}

/// Render an error and its full `source()` chain on one line.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_classification() {
        let limit = DpdError::GainLimit {
            stage: GainStage::Tx,
            requested: 90.0,
            limit: 89.0,
        };
        assert!(limit.is_structural());
        assert!(DpdError::Config("bad".into()).is_structural());

        assert!(DpdError::Alignment {
            tx_ts: 1.0,
            rx_ts: 1.00002,
            skew: 2e-5
        }
        .is_recoverable());
        assert!(DpdError::InvalidInput("nan".into()).is_recoverable());
        assert!(DpdError::Transport("refused".into()).is_recoverable());
        assert!(DpdError::Protocol("garbage".into()).is_recoverable());
    }

    #[test]
    fn test_display() {
        let e = DpdError::GainLimit {
            stage: GainStage::Rx,
            requested: 20.0,
            limit: 25.0,
        };
        assert_eq!(e.to_string(), "RX gain of 20.00 dB violates the 25.00 dB limit");
    }

    #[test]
    fn test_error_chain_includes_io_source() {
        let e = DpdError::Io(io::Error::new(io::ErrorKind::NotFound, "poly.coef"));
        let chain = error_chain(&e);
        assert!(chain.starts_with("I/O error: poly.coef"));
    }
}

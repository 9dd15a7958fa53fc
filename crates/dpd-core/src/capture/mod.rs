//! TX/RX sample capture
//!
//! A [`CaptureSource`] delivers one synchronized TX/RX buffer pair per call.
//! [`tcp::TcpCapture`] talks to the transmitter's feedback server.

pub mod tcp;

use crate::error::DpdResult;
use crate::types::CapturedPair;

pub use tcp::TcpCapture;

/// Source of synchronized TX/RX captures.
pub trait CaptureSource {
    /// Block until one TX/RX pair with timestamps is available.
    fn get_samples(&mut self) -> DpdResult<CapturedPair>;
}

impl<T: CaptureSource + ?Sized> CaptureSource for Box<T> {
    fn get_samples(&mut self) -> DpdResult<CapturedPair> {
        (**self).get_samples()
    }
}

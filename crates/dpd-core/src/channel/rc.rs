//! Remote-control client for a running transmitter
//!
//! Gains are read and written as individual parameters. Coefficients go
//! through a file the transmitter reads: the client rewrites the file, then
//! points the predistorter at it so it reloads.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, trace};

use super::protocol::{Param, RcReply, RcRequest};
use super::ConfigChannel;
use crate::coef_file;
use crate::error::{DpdError, DpdResult};
use crate::types::{AmCoefficients, PmCoefficients};

/// Default remote-control port of the transmitter
pub const DEFAULT_RC_PORT: u16 = 9400;

/// Owned request/reply session with the transmitter.
pub struct RemoteControl {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
    coef_path: PathBuf,
}

impl RemoteControl {
    /// Connect to the remote-control endpoint.
    ///
    /// `coef_path` is the coefficient file shared with the transmitter.
    pub fn connect<A: ToSocketAddrs>(
        addr: A,
        coef_path: impl Into<PathBuf>,
        timeout: Duration,
    ) -> DpdResult<Self> {
        let stream = TcpStream::connect(addr)
            .map_err(|e| DpdError::transport("cannot reach remote control", e))?;
        stream
            .set_read_timeout(Some(timeout))
            .and_then(|_| stream.set_write_timeout(Some(timeout)))
            .map_err(|e| DpdError::transport("cannot configure socket", e))?;
        let reader = BufReader::new(
            stream
                .try_clone()
                .map_err(|e| DpdError::transport("cannot clone socket", e))?,
        );

        Ok(Self {
            stream,
            reader,
            coef_path: coef_path.into(),
        })
    }

    pub fn coef_path(&self) -> &Path {
        &self.coef_path
    }

    /// Send one request and wait for its reply.
    pub fn send(&mut self, request: &RcRequest) -> DpdResult<RcReply> {
        let json = serde_json::to_string(request)
            .map_err(|e| DpdError::Protocol(format!("cannot encode request: {}", e)))?;
        trace!(request = %json, "rc send");

        writeln!(self.stream, "{}", json)
            .and_then(|_| self.stream.flush())
            .map_err(|e| DpdError::transport("remote control write failed", e))?;

        let mut line = String::new();
        let n = self
            .reader
            .read_line(&mut line)
            .map_err(|e| DpdError::transport("remote control read failed", e))?;
        if n == 0 {
            return Err(DpdError::Transport(
                "remote control closed the connection".into(),
            ));
        }

        serde_json::from_str(line.trim_end()).map_err(|e| {
            DpdError::Protocol(format!("unparseable reply {:?}: {}", line.trim_end(), e))
        })
    }

    fn get(&mut self, param: Param) -> DpdResult<String> {
        match self.send(&RcRequest::get(param))? {
            RcReply::Ok { value: Some(v) } => Ok(v),
            RcReply::Ok { value: None } => Err(DpdError::Protocol(format!(
                "reply to get {:?} carries no value",
                param
            ))),
            RcReply::Error { message } => Err(DpdError::Protocol(format!(
                "get {:?} rejected: {}",
                param, message
            ))),
        }
    }

    fn get_f64(&mut self, param: Param) -> DpdResult<f64> {
        let raw = self.get(param)?;
        raw.trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| DpdError::Protocol(format!("{:?} is not a number: {:?}", param, raw)))
    }

    fn set(&mut self, param: Param, value: String) -> DpdResult<()> {
        match self.send(&RcRequest::set(param, value))? {
            RcReply::Ok { .. } => Ok(()),
            RcReply::Error { message } => Err(DpdError::Protocol(format!(
                "set {:?} rejected: {}",
                param, message
            ))),
        }
    }
}

impl ConfigChannel for RemoteControl {
    fn coefficients(&mut self) -> DpdResult<(AmCoefficients, PmCoefficients)> {
        coef_file::read(&self.coef_path)
    }

    fn set_coefficients(&mut self, am: &AmCoefficients, pm: &PmCoefficients) -> DpdResult<()> {
        coef_file::write(&self.coef_path, am, pm)?;
        let path = self.coef_path.display().to_string();
        self.set(Param::CoefFile, path)?;
        debug!(?am, ?pm, "coefficients pushed");
        Ok(())
    }

    fn tx_gain(&mut self) -> DpdResult<f64> {
        self.get_f64(Param::TxGain)
    }

    fn set_tx_gain(&mut self, gain_db: f64) -> DpdResult<()> {
        self.set(Param::TxGain, gain_db.to_string())
    }

    fn rx_gain(&mut self) -> DpdResult<f64> {
        self.get_f64(Param::RxGain)
    }

    fn set_rx_gain(&mut self, gain_db: f64) -> DpdResult<()> {
        self.set(Param::RxGain, gain_db.to_string())
    }

    fn digital_gain(&mut self) -> DpdResult<f64> {
        self.get_f64(Param::DigitalGain)
    }

    fn set_digital_gain(&mut self, gain: f64) -> DpdResult<()> {
        self.set(Param::DigitalGain, gain.to_string())
    }
}

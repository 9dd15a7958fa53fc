//! Client for the transmitter's DPD feedback server
//!
//! One connection per capture. All integers and samples are little-endian:
//!
//! ```text
//! -> u8   version (1)
//! -> u32  requested sample count
//! <- u32  delivered sample count n
//! <- u32  TX seconds, u32 TX PPS ticks, n × (f32 I, f32 Q)
//! <- u32  RX seconds, u32 RX PPS ticks, n × (f32 I, f32 Q)
//! ```
//!
//! Timestamps are `seconds + ticks / 16.384 MHz`.

use std::io::{BufReader, BufWriter, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::debug;

use super::CaptureSource;
use crate::align::FrameAligner;
use crate::error::{DpdError, DpdResult};
use crate::types::{amplitudes, median, CapturedPair, IQSample, SampleFrame};

/// Protocol version byte sent with every request
pub const PROTOCOL_VERSION: u8 = 1;

/// Rate of the PPS tick counter in Hz
pub const PPS_TICK_RATE: f64 = 16_384_000.0;

/// Default port of the DPD feedback server
pub const DEFAULT_CAPTURE_PORT: u16 = 50055;

/// Capture client. Each [`get_samples`](CaptureSource::get_samples) opens
/// a fresh connection, aligns RX onto TX and levels RX to the TX median.
#[derive(Debug)]
pub struct TcpCapture {
    addr: SocketAddr,
    num_samples: u32,
    timeout: Duration,
    aligner: FrameAligner,
}

impl TcpCapture {
    pub fn new<A: ToSocketAddrs>(addr: A, num_samples: usize, timeout: Duration) -> DpdResult<Self> {
        let addr = addr
            .to_socket_addrs()
            .map_err(|e| DpdError::Config(format!("bad capture address: {}", e)))?
            .next()
            .ok_or_else(|| DpdError::Config("capture address resolves to nothing".into()))?;
        let num_samples = u32::try_from(num_samples)
            .ok()
            .filter(|&n| n > 0)
            .ok_or_else(|| {
                DpdError::Config(format!("cannot request {} samples per capture", num_samples))
            })?;

        Ok(Self {
            addr,
            num_samples,
            timeout,
            aligner: FrameAligner::default(),
        })
    }

    pub fn with_aligner(mut self, aligner: FrameAligner) -> Self {
        self.aligner = aligner;
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn num_samples(&self) -> usize {
        self.num_samples as usize
    }

    fn request(&self) -> DpdResult<(SampleFrame, SampleFrame)> {
        let stream = TcpStream::connect_timeout(&self.addr, self.timeout)
            .map_err(|e| DpdError::transport("cannot reach capture server", e))?;
        stream
            .set_read_timeout(Some(self.timeout))
            .and_then(|_| stream.set_write_timeout(Some(self.timeout)))
            .and_then(|_| stream.set_nodelay(true))
            .map_err(|e| DpdError::transport("cannot configure socket", e))?;

        let mut writer = BufWriter::new(
            stream
                .try_clone()
                .map_err(|e| DpdError::transport("cannot clone socket", e))?,
        );
        write_request(&mut writer, self.num_samples)?;
        drop(writer);

        read_reply(&mut BufReader::new(stream), self.num_samples)
    }
}

impl CaptureSource for TcpCapture {
    fn get_samples(&mut self) -> DpdResult<CapturedPair> {
        let (tx, rx) = self.request()?;
        debug!(
            samples = tx.len(),
            tx_ts = tx.timestamp,
            rx_ts = rx.timestamp,
            "capture received"
        );
        level_pair(&mut self.aligner, tx, rx)
    }
}

/// Encode a capture request.
pub fn write_request<W: Write>(writer: &mut W, num_samples: u32) -> DpdResult<()> {
    writer
        .write_u8(PROTOCOL_VERSION)
        .and_then(|_| writer.write_u32::<LittleEndian>(num_samples))
        .and_then(|_| writer.flush())
        .map_err(|e| DpdError::transport("capture request failed", e))
}

/// Decode a capture reply into its TX and RX frames.
pub fn read_reply<R: Read>(reader: &mut R, requested: u32) -> DpdResult<(SampleFrame, SampleFrame)> {
    let n = reader
        .read_u32::<LittleEndian>()
        .map_err(|e| DpdError::transport("capture reply header", e))?;
    if n == 0 {
        return Err(DpdError::Transport("capture server delivered no samples".into()));
    }
    if n > requested {
        return Err(DpdError::Protocol(format!(
            "capture server delivered {} samples, {} requested",
            n, requested
        )));
    }

    let tx = read_frame(reader, n as usize).map_err(|e| DpdError::transport("TX frame", e))?;
    let rx = read_frame(reader, n as usize).map_err(|e| DpdError::transport("RX frame", e))?;
    Ok((tx, rx))
}

fn read_frame<R: Read>(reader: &mut R, n: usize) -> std::io::Result<SampleFrame> {
    let seconds = reader.read_u32::<LittleEndian>()?;
    let ticks = reader.read_u32::<LittleEndian>()?;
    let mut raw = vec![0.0f32; 2 * n];
    reader.read_f32_into::<LittleEndian>(&mut raw)?;

    let samples = raw
        .chunks_exact(2)
        .map(|iq| IQSample::new(iq[0], iq[1]))
        .collect();
    Ok(SampleFrame::new(
        samples,
        seconds as f64 + ticks as f64 / PPS_TICK_RATE,
    ))
}

/// Align RX onto TX and scale RX so both medians match.
///
/// The returned pair keeps the original timestamps and reports the RX median
/// measured before scaling.
pub fn level_pair(
    aligner: &mut FrameAligner,
    tx: SampleFrame,
    rx: SampleFrame,
) -> DpdResult<CapturedPair> {
    let (tx_samples, mut rx_samples) = aligner.align(&tx.samples, &rx.samples)?;

    let tx_median = median(&mut amplitudes(&tx_samples))
        .ok_or_else(|| DpdError::InvalidInput("empty TX capture".into()))?;
    let rx_median = median(&mut amplitudes(&rx_samples))
        .ok_or_else(|| DpdError::InvalidInput("empty RX capture".into()))?;
    if !(rx_median.is_finite() && rx_median > 0.0) {
        return Err(DpdError::InvalidInput(format!(
            "RX median amplitude is {}",
            rx_median
        )));
    }

    let scale = tx_median / rx_median;
    for s in rx_samples.iter_mut() {
        *s *= scale;
    }

    Ok(CapturedPair {
        tx: SampleFrame::new(tx_samples, tx.timestamp),
        rx: SampleFrame::new(rx_samples, rx.timestamp),
        rx_median,
    })
}

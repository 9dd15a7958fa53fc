//! Simulated transmitter with loopback feedback
//!
//! ```text
//! OFDM baseband ─► DPD(am, pm) ─► × digital ─┬─► × TX gain ─► PA ─► × RX gain ─► + AWGN
//!                                            │                                    │
//!                                       TX capture                           RX capture
//! ```
//!
//! The baseband is DAB transmission mode I at the configured sample rate,
//! scaled to a median amplitude of [`BASEBAND_MEDIAN`]. Analog gains are
//! relative to [`TX_REF_GAIN_DB`] and [`RX_REF_GAIN_DB`].
//!
//! [`SimTransmitter`] is a cheap handle onto shared state: clone it to hand
//! one copy to the engine as capture source and another as configuration
//! channel.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dpd_core::align::FrameAligner;
use dpd_core::capture::tcp::level_pair;
use dpd_core::capture::CaptureSource;
use dpd_core::channel::{ConfigChannel, GainState};
use dpd_core::error::{DpdError, DpdResult};
use dpd_core::model::evaluate;
use dpd_core::quality::OfdmGeometry;
use dpd_core::types::{
    amplitudes, median, AmCoefficients, CapturedPair, IQSample, PmCoefficients, SampleFrame,
    IDENTITY_AM, ZERO_PM,
};
use num_complex::Complex32;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::pa::PaModel;

/// TX gain at which `drive_scale` applies, dB
pub const TX_REF_GAIN_DB: f64 = 74.0;

/// RX gain at which `rx_scale` applies, dB
pub const RX_REF_GAIN_DB: f64 = 30.0;

/// Median amplitude of the generated baseband
pub const BASEBAND_MEDIAN: f32 = 0.1;

/// Simulator parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Sample rate in Hz, at least 2.048 MHz
    pub samplerate: f64,
    /// Samples per capture
    pub num_samples: usize,
    pub pa: PaModel,
    /// PA input amplitude per unit TX amplitude at the reference TX gain
    pub drive_scale: f64,
    /// RX amplitude per unit PA output at the reference RX gain
    pub rx_scale: f64,
    /// Standard deviation of the noise on each RX component
    pub noise_std: f64,
    /// Loopback delay in samples
    pub rx_delay: usize,
    /// RX timestamp minus TX timestamp, seconds
    pub skew_secs: f64,
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            samplerate: 8_192_000.0,
            num_samples: 81920,
            pa: PaModel::default(),
            drive_scale: 3.0,
            rx_scale: 0.1,
            noise_std: 1e-4,
            rx_delay: 0,
            skew_secs: 0.0,
            seed: 1,
        }
    }
}

impl SimConfig {
    pub fn validate(&self) -> DpdResult<()> {
        OfdmGeometry::dab_mode_1(self.samplerate)?;
        if self.num_samples == 0 {
            return Err(DpdError::Config("simulator needs a non-zero capture size".into()));
        }
        for (name, value) in [("drive_scale", self.drive_scale), ("rx_scale", self.rx_scale)] {
            if !(value.is_finite() && value > 0.0) {
                return Err(DpdError::Config(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        if !(self.noise_std.is_finite() && self.noise_std >= 0.0) {
            return Err(DpdError::Config(format!(
                "noise_std must be non-negative, got {}",
                self.noise_std
            )));
        }
        if self.rx_delay >= self.num_samples {
            return Err(DpdError::Config(format!(
                "RX delay of {} samples swallows the {}-sample capture",
                self.rx_delay, self.num_samples
            )));
        }
        Ok(())
    }
}

/// One-shot failures, consumed in order by the operation they target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Next capture fails with a transport error
    DropCapture,
    /// Next coefficient push is rejected by the transmitter
    RejectPush,
}

/// Signal chain at one operating point.
#[derive(Debug, Clone, Copy)]
struct Chain {
    am: AmCoefficients,
    pm: PmCoefficients,
    digital: f32,
    tx_lin: f32,
    rx_lin: f32,
    pa: PaModel,
}

impl Chain {
    /// Predistorted, digitally scaled sample as the TX capture sees it.
    fn tx(&self, x: IQSample) -> IQSample {
        let a = x.norm() as f64;
        let am = self.am.iter().rev().fold(0.0, |acc, c| acc * a + c);
        let phase = self.pm.iter().rev().fold(0.0, |acc, c| acc * a + c);
        x * Complex32::from_polar(am as f32, phase as f32) * self.digital
    }

    /// Loopback sample for a TX sample, before noise.
    fn rx(&self, t: IQSample) -> IQSample {
        self.pa.apply(t * self.tx_lin) * self.rx_lin
    }

    /// End-to-end amplitude response for baseband amplitude `a`.
    fn am_response(&self, a: f64) -> f64 {
        let t = evaluate(&self.am, a) * self.digital as f64;
        self.pa.am_am(t * self.tx_lin as f64) * self.rx_lin as f64
    }
}

struct SimState {
    config: SimConfig,
    geometry: OfdmGeometry,
    ifft: Arc<dyn Fft<f32>>,
    aligner: FrameAligner,
    rng: StdRng,
    noise: Normal<f32>,
    gains: GainState,
    am: AmCoefficients,
    pm: PmCoefficients,
    pushes: Vec<(AmCoefficients, PmCoefficients)>,
    faults: VecDeque<Fault>,
    clock: f64,
    captures: usize,
}

impl SimState {
    fn chain(&self) -> Chain {
        Chain {
            am: self.am,
            pm: self.pm,
            digital: self.gains.digital_gain as f32,
            tx_lin: (db_to_lin(self.gains.tx_gain - TX_REF_GAIN_DB) * self.config.drive_scale)
                as f32,
            rx_lin: (db_to_lin(self.gains.rx_gain - RX_REF_GAIN_DB) * self.config.rx_scale)
                as f32,
            pa: self.config.pa,
        }
    }

    fn take_fault(&mut self, fault: Fault) -> bool {
        if self.faults.front() == Some(&fault) {
            self.faults.pop_front();
            true
        } else {
            false
        }
    }

    /// QPSK OFDM symbols with cyclic prefix, cut to `len` samples.
    fn baseband(&mut self, len: usize) -> Vec<IQSample> {
        let OfdmGeometry { t_u, t_gi, .. } = self.geometry;
        let bins: Vec<usize> = self.geometry.carrier_bins().collect();
        let level = std::f32::consts::FRAC_1_SQRT_2;

        let mut out = Vec::with_capacity(len + self.geometry.t_s());
        let mut symbol = vec![Complex32::new(0.0, 0.0); t_u];
        while out.len() < len {
            symbol.iter_mut().for_each(|s| *s = Complex32::new(0.0, 0.0));
            for &k in &bins {
                let re = if self.rng.gen::<bool>() { level } else { -level };
                let im = if self.rng.gen::<bool>() { level } else { -level };
                symbol[k] = Complex32::new(re, im);
            }
            self.ifft.process(&mut symbol);
            out.extend_from_slice(&symbol[t_u - t_gi..]);
            out.extend_from_slice(&symbol);
        }
        out.truncate(len);

        if let Some(m) = median(&mut amplitudes(&out)).filter(|m| *m > 0.0) {
            let scale = BASEBAND_MEDIAN / m;
            out.iter_mut().for_each(|s| *s *= scale);
        }
        out
    }

    fn capture(&mut self) -> DpdResult<CapturedPair> {
        if self.take_fault(Fault::DropCapture) {
            return Err(DpdError::Transport("simulated capture dropped".into()));
        }

        let n = self.config.num_samples;
        let delay = self.config.rx_delay;
        let chain = self.chain();
        let baseband = self.baseband(n + delay);
        let tx: Vec<IQSample> = baseband.iter().map(|&b| chain.tx(b)).collect();

        let mut rx: Vec<IQSample> = tx[..n].iter().map(|&t| chain.rx(t)).collect();
        if self.config.noise_std > 0.0 {
            for s in rx.iter_mut() {
                *s += Complex32::new(
                    self.noise.sample(&mut self.rng),
                    self.noise.sample(&mut self.rng),
                );
            }
        }

        let ts = self.clock;
        self.clock += n as f64 / self.config.samplerate;
        self.captures += 1;
        trace!(capture = self.captures, ts, "simulated capture");

        let tx_frame = SampleFrame::new(tx[delay..].to_vec(), ts);
        let rx_frame = SampleFrame::new(rx, ts + self.config.skew_secs);
        level_pair(&mut self.aligner, tx_frame, rx_frame)
    }
}

/// Shared handle onto a simulated transmitter.
#[derive(Clone)]
pub struct SimTransmitter {
    state: Arc<Mutex<SimState>>,
}

impl std::fmt::Debug for SimTransmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("SimTransmitter")
            .field("config", &state.config)
            .field("gains", &state.gains)
            .field("am", &state.am)
            .field("captures", &state.captures)
            .finish()
    }
}

impl SimTransmitter {
    pub fn new(config: SimConfig) -> DpdResult<Self> {
        config.validate()?;
        let geometry = OfdmGeometry::dab_mode_1(config.samplerate)?;
        let ifft = FftPlanner::new().plan_fft_inverse(geometry.t_u);
        let noise = Normal::new(0.0, config.noise_std as f32)
            .map_err(|e| DpdError::Config(format!("noise: {}", e)))?;

        let state = SimState {
            geometry,
            ifft,
            aligner: FrameAligner::default(),
            rng: StdRng::seed_from_u64(config.seed),
            noise,
            gains: GainState {
                tx_gain: TX_REF_GAIN_DB,
                rx_gain: RX_REF_GAIN_DB,
                digital_gain: 1.0,
            },
            am: IDENTITY_AM,
            pm: ZERO_PM,
            pushes: Vec::new(),
            faults: VecDeque::new(),
            clock: 0.0,
            captures: 0,
            config,
        };
        Ok(Self {
            state: Arc::new(Mutex::new(state)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> SimConfig {
        self.lock().config.clone()
    }

    pub fn set_skew(&self, seconds: f64) {
        self.lock().config.skew_secs = seconds;
    }

    /// Queue a fault for the next matching operation.
    pub fn inject(&self, fault: Fault) {
        self.lock().faults.push_back(fault);
    }

    /// Every accepted coefficient push, oldest first.
    pub fn pushes(&self) -> Vec<(AmCoefficients, PmCoefficients)> {
        self.lock().pushes.clone()
    }

    /// Number of captures delivered so far.
    pub fn captures(&self) -> usize {
        self.lock().captures
    }

    /// Relative RMS deviation of the end-to-end AM/AM response from the best
    /// straight line, over baseband amplitudes up to 2.5× the median.
    pub fn linearity_error(&self) -> f64 {
        let chain = self.lock().chain();
        let top = 2.5 * BASEBAND_MEDIAN as f64;
        let points = 200;
        let sweep: Vec<(f64, f64)> = (1..=points)
            .map(|i| {
                let a = top * i as f64 / points as f64;
                (a, chain.am_response(a))
            })
            .collect();

        let gain = sweep.iter().map(|(a, y)| a * y).sum::<f64>()
            / sweep.iter().map(|(a, _)| a * a).sum::<f64>();
        let err: f64 = sweep.iter().map(|(a, y)| (y - gain * a).powi(2)).sum();
        let ref_power: f64 = sweep.iter().map(|(a, _)| (gain * a).powi(2)).sum();
        (err / ref_power).sqrt()
    }
}

impl CaptureSource for SimTransmitter {
    fn get_samples(&mut self) -> DpdResult<CapturedPair> {
        self.lock().capture()
    }
}

impl ConfigChannel for SimTransmitter {
    fn coefficients(&mut self) -> DpdResult<(AmCoefficients, PmCoefficients)> {
        let state = self.lock();
        Ok((state.am, state.pm))
    }

    fn set_coefficients(&mut self, am: &AmCoefficients, pm: &PmCoefficients) -> DpdResult<()> {
        let mut state = self.lock();
        if state.take_fault(Fault::RejectPush) {
            return Err(DpdError::Protocol("simulated transmitter rejected coefficients".into()));
        }
        if am.iter().chain(pm.iter()).any(|c| !c.is_finite()) {
            return Err(DpdError::InvalidInput(format!(
                "non-finite coefficients {:?} {:?}",
                am, pm
            )));
        }
        state.am = *am;
        state.pm = *pm;
        state.pushes.push((*am, *pm));
        debug!(push = state.pushes.len(), ?am, "simulated coefficients loaded");
        Ok(())
    }

    fn tx_gain(&mut self) -> DpdResult<f64> {
        Ok(self.lock().gains.tx_gain)
    }

    fn set_tx_gain(&mut self, gain_db: f64) -> DpdResult<()> {
        self.lock().gains.tx_gain = finite("TX gain", gain_db)?;
        Ok(())
    }

    fn rx_gain(&mut self) -> DpdResult<f64> {
        Ok(self.lock().gains.rx_gain)
    }

    fn set_rx_gain(&mut self, gain_db: f64) -> DpdResult<()> {
        self.lock().gains.rx_gain = finite("RX gain", gain_db)?;
        Ok(())
    }

    fn digital_gain(&mut self) -> DpdResult<f64> {
        Ok(self.lock().gains.digital_gain)
    }

    fn set_digital_gain(&mut self, gain: f64) -> DpdResult<()> {
        self.lock().gains.digital_gain = finite("digital gain", gain)?;
        Ok(())
    }
}

fn finite(name: &str, value: f64) -> DpdResult<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(DpdError::InvalidInput(format!("{} is {}", name, value)))
    }
}

fn db_to_lin(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

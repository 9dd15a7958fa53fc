//! Closed-loop adaptation
//!
//! One iteration:
//!
//! ```text
//! capture ──► timestamp check ──► gain guard ──► reduce ──► AM fit + PM update
//!                                    │ adjusted                  │
//!                                    ▼                           ▼
//!                                 Skipped                 push to transmitter
//!                                                                │
//!                                                                ▼
//!                                                           MER (diagnostic)
//! ```
//!
//! Recoverable errors end only the current iteration. Structural errors
//! ([`DpdError::is_structural`]) end the run.

use tracing::{debug, error, info, warn};

use crate::capture::CaptureSource;
use crate::channel::{ConfigChannel, GainState};
use crate::error::{error_chain, DpdError, DpdResult};
use crate::gain_guard::GainGuard;
use crate::leveling::RxLeveler;
use crate::model::{HoldPhase, PhaseModel, PolynomialAmplitudeModel};
use crate::observe::RunDiagnostics;
use crate::quality::QualityProbe;
use crate::reduce::{BinnedMedianReducer, FrameReducer};
use crate::types::{AmCoefficients, PmCoefficients, IDENTITY_AM, ZERO_PM};

/// Default largest TX/RX timestamp skew in seconds (exclusive)
pub const DEFAULT_ALIGNMENT_TOLERANCE: f64 = 1e-5;

/// What a single iteration did.
#[derive(Debug)]
pub enum IterationOutcome {
    /// Coefficients were pushed. MER is `None` when no probe is installed
    /// or the probe could not measure this capture.
    Updated {
        tx_mer: Option<f64>,
        rx_mer: Option<f64>,
    },
    /// Gains were re-balanced; the capture was discarded
    Skipped,
    /// A recoverable error ended the iteration
    Failed(DpdError),
}

impl IterationOutcome {
    pub fn is_updated(&self) -> bool {
        matches!(self, IterationOutcome::Updated { .. })
    }
}

/// Outcomes of a run and the coefficients it ended with.
#[derive(Debug)]
pub struct RunSummary {
    pub outcomes: Vec<IterationOutcome>,
    pub am: AmCoefficients,
    pub pm: PmCoefficients,
}

impl RunSummary {
    pub fn updated(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_updated()).count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, IterationOutcome::Skipped))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, IterationOutcome::Failed(_)))
            .count()
    }
}

/// Settings applied once before the first iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct StartupSettings {
    /// Keep the transmitter's coefficients instead of resetting to identity
    pub load_existing: bool,
    pub gains: GainState,
}

/// The adaptation engine. Owns its capture source and configuration
/// channel; it is their only user for the duration of a run.
pub struct AdaptationLoop<C, R> {
    capture: C,
    channel: R,
    gain_guard: GainGuard,
    model: PolynomialAmplitudeModel,
    phase: Box<dyn PhaseModel>,
    reducer: Box<dyn FrameReducer>,
    probe: Option<Box<dyn QualityProbe>>,
    diagnostics: RunDiagnostics,
    am: AmCoefficients,
    pm: PmCoefficients,
    alignment_tolerance: f64,
    iteration: usize,
}

impl<C, R> std::fmt::Debug for AdaptationLoop<C, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptationLoop")
            .field("gain_guard", &self.gain_guard)
            .field("model", &self.model)
            .field("am", &self.am)
            .field("pm", &self.pm)
            .field("alignment_tolerance", &self.alignment_tolerance)
            .field("iteration", &self.iteration)
            .finish()
    }
}

impl<C: CaptureSource, R: ConfigChannel> AdaptationLoop<C, R> {
    pub fn new(
        capture: C,
        channel: R,
        gain_guard: GainGuard,
        model: PolynomialAmplitudeModel,
    ) -> Self {
        Self {
            capture,
            channel,
            gain_guard,
            model,
            phase: Box::new(HoldPhase),
            reducer: Box::new(BinnedMedianReducer::default()),
            probe: None,
            diagnostics: RunDiagnostics::disabled(),
            am: IDENTITY_AM,
            pm: ZERO_PM,
            alignment_tolerance: DEFAULT_ALIGNMENT_TOLERANCE,
            iteration: 0,
        }
    }

    pub fn with_phase_model(mut self, phase: Box<dyn PhaseModel>) -> Self {
        self.phase = phase;
        self
    }

    pub fn with_reducer(mut self, reducer: Box<dyn FrameReducer>) -> Self {
        self.reducer = reducer;
        self
    }

    pub fn with_probe(mut self, probe: Box<dyn QualityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: RunDiagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn with_alignment_tolerance(mut self, seconds: f64) -> Self {
        self.alignment_tolerance = seconds;
        self
    }

    /// Current AM/AM and AM/PM coefficients, as last pushed.
    pub fn coefficients(&self) -> (AmCoefficients, PmCoefficients) {
        (self.am, self.pm)
    }

    pub fn channel(&self) -> &R {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut R {
        &mut self.channel
    }

    pub fn capture_mut(&mut self) -> &mut C {
        &mut self.capture
    }

    pub fn diagnostics(&self) -> &RunDiagnostics {
        &self.diagnostics
    }

    pub fn into_parts(self) -> (C, R) {
        (self.capture, self.channel)
    }

    /// Bring the transmitter to a known state.
    ///
    /// Pushes the starting coefficients, applies the gains, logs what the
    /// transmitter reports back and, with a leveler, adjusts the RX gain.
    /// Any failure here is fatal to the run.
    pub fn startup(
        &mut self,
        settings: &StartupSettings,
        leveler: Option<&RxLeveler>,
    ) -> DpdResult<GainState> {
        let (am, pm) = if settings.load_existing {
            self.channel.coefficients()?
        } else {
            (IDENTITY_AM, ZERO_PM)
        };
        self.channel.set_coefficients(&am, &pm)?;
        self.am = am;
        self.pm = pm;

        let gains = &settings.gains;
        self.channel.set_digital_gain(gains.digital_gain)?;
        self.channel.set_tx_gain(gains.tx_gain)?;
        self.channel.set_rx_gain(gains.rx_gain)?;

        let state = self.channel.gain_state()?;
        let (am, pm) = self.channel.coefficients()?;
        info!(
            tx_gain = state.tx_gain,
            rx_gain = state.rx_gain,
            digital_gain = state.digital_gain,
            ?am,
            ?pm,
            "transmitter configured"
        );

        match leveler {
            Some(leveler) => {
                leveler.run(&mut self.capture, &mut self.channel)?;
                self.channel.gain_state()
            }
            None => Ok(state),
        }
    }

    /// Run `iterations` iterations.
    ///
    /// Returns `Err` only for structural errors; everything else is recorded
    /// as [`IterationOutcome::Failed`] and the loop continues.
    pub fn run(&mut self, iterations: usize) -> DpdResult<RunSummary> {
        let mut outcomes = Vec::with_capacity(iterations);
        for _ in 0..iterations {
            let i = self.iteration;
            self.iteration += 1;

            match self.iterate(i) {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) if e.is_structural() => {
                    error!(iteration = i, error = %error_chain(&e), "adaptation stopped");
                    return Err(e);
                }
                Err(e) => {
                    warn!(iteration = i, error = %error_chain(&e), "iteration failed");
                    outcomes.push(IterationOutcome::Failed(e));
                }
            }
        }

        let summary = RunSummary {
            outcomes,
            am: self.am,
            pm: self.pm,
        };
        info!(
            updated = summary.updated(),
            skipped = summary.skipped(),
            failed = summary.failed(),
            am = ?summary.am,
            "adaptation finished"
        );
        Ok(summary)
    }

    fn iterate(&mut self, i: usize) -> DpdResult<IterationOutcome> {
        let pair = self.capture.get_samples()?;
        debug!(
            iteration = i,
            tx_ts = pair.tx.timestamp,
            rx_ts = pair.rx.timestamp,
            rx_median = pair.rx_median,
            "captured"
        );

        let skew = pair.skew();
        if !(skew < self.alignment_tolerance) {
            return Err(DpdError::Alignment {
                tx_ts: pair.tx.timestamp,
                rx_ts: pair.rx.timestamp,
                skew,
            });
        }

        if self
            .gain_guard
            .adapt_if_necessary(&mut self.channel, &pair.tx.samples)?
        {
            info!(iteration = i, "gains re-balanced, capture discarded");
            return Ok(IterationOutcome::Skipped);
        }

        let amplitudes = self.reducer.reduce(&pair.tx, &pair.rx)?;
        let update = self
            .model
            .update(amplitudes.tx(), amplitudes.rx(), &self.am)?;
        let pm = self.phase.next_coefs(&pair.tx, &pair.rx, &self.pm)?;

        self.channel.set_coefficients(&update.coefs, &pm)?;
        self.am = update.coefs;
        self.pm = pm;
        self.diagnostics.record_fit(i, &update.record);
        debug!(iteration = i, am = ?self.am, points = amplitudes.len(), "coefficients updated");

        let (tx_mer, rx_mer) = match self.probe {
            Some(ref probe) => match probe.measure(&pair.tx.samples, &pair.rx.samples) {
                Ok((tx_mer, rx_mer)) => {
                    info!(iteration = i, tx_mer, rx_mer, "MER");
                    (Some(tx_mer), Some(rx_mer))
                }
                Err(e) => {
                    warn!(iteration = i, error = %error_chain(&e), "MER not measured");
                    (None, None)
                }
            },
            None => {
                info!(iteration = i, "coefficients pushed");
                (None, None)
            }
        };
        Ok(IterationOutcome::Updated { tx_mer, rx_mer })
    }
}

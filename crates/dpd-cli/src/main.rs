//! Adaptive DPD command-line interface
//!
//! Connects to a running transmitter (or a simulated one with `--simulate`),
//! brings it to a known state and runs a fixed number of adaptation
//! iterations.
//!
//! Settings come from the YAML configuration (see `--config`); flags given on
//! the command line override it.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use dpd_core::capture::{CaptureSource, TcpCapture};
use dpd_core::channel::{ConfigChannel, GainState, RemoteControl};
use dpd_core::config::EngineConfig;
use dpd_core::gain_guard::GainGuard;
use dpd_core::leveling::RxLeveler;
use dpd_core::model::PolynomialAmplitudeModel;
use dpd_core::observe::{init_logging, LogFormat, LogLevel, RunDiagnostics};
use dpd_core::quality::OfdmMerProbe;
use dpd_core::reduce::BinnedMedianReducer;
use dpd_core::{AdaptationLoop, RunSummary, StartupSettings};
use dpd_sim::{SimConfig, SimTransmitter};
use tracing::info;

#[derive(Parser)]
#[command(name = "dpd")]
#[command(author, version, about = "Adaptive digital predistortion for a broadcast transmitter", long_about = None)]
struct Cli {
    /// Configuration file (default: search DPD_CONFIG, ./dpd.yaml, user and system dirs)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port of the DPD feedback (capture) server [default: 50055]
    #[arg(long)]
    port: Option<u16>,

    /// Port of the remote-control endpoint [default: 9400]
    #[arg(long = "rc-port")]
    rc_port: Option<u16>,

    /// Sample rate of the captured signal in Hz [default: 8192000]
    #[arg(long)]
    samplerate: Option<f64>,

    /// Coefficient file shared with the transmitter [default: poly.coef]
    #[arg(long)]
    coefs: Option<PathBuf>,

    /// TX gain in dB [default: 74]
    #[arg(long)]
    txgain: Option<f64>,

    /// RX (feedback) gain in dB [default: 30]
    #[arg(long)]
    rxgain: Option<f64>,

    /// Linear digital gain [default: 1]
    #[arg(long = "digital_gain")]
    digital_gain: Option<f64>,

    /// Samples per capture [default: 81920]
    #[arg(long)]
    samps: Option<usize>,

    /// Number of adaptation iterations [default: 1]
    #[arg(short, long)]
    iterations: Option<usize>,

    /// Keep the coefficients currently loaded in the transmitter
    #[arg(short = 'l', long = "load-poly")]
    load_poly: bool,

    /// Run against a simulated transmitter instead of real hardware
    #[arg(long)]
    simulate: bool,

    /// Increase console verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Console log format
    #[arg(long = "log-format", value_enum)]
    log_format: Option<LogFormatArg>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Json,
    Pretty,
    Compact,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Json => LogFormat::Json,
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Compact => LogFormat::Compact,
        }
    }
}

impl Cli {
    fn apply(&self, config: &mut EngineConfig) {
        if let Some(port) = self.port {
            config.capture.port = port;
        }
        if let Some(port) = self.rc_port {
            config.control.rc_port = port;
        }
        if let Some(rate) = self.samplerate {
            config.capture.samplerate = rate;
        }
        if let Some(ref path) = self.coefs {
            config.control.coef_path = path.clone();
        }
        if let Some(gain) = self.txgain {
            config.gains.tx = gain;
        }
        if let Some(gain) = self.rxgain {
            config.gains.rx = gain;
        }
        if let Some(gain) = self.digital_gain {
            config.gains.digital = gain;
        }
        if let Some(n) = self.samps {
            config.capture.num_samples = n;
        }
        if let Some(n) = self.iterations {
            config.adaptation.iterations = n;
        }
        if self.load_poly {
            config.adaptation.load_existing = true;
        }
        if self.verbose > 0 {
            config.logging.level = LogLevel::from_verbosity(self.verbose);
        }
        if let Some(format) = self.log_format {
            config.logging.format = format.into();
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match cli.config {
        Some(ref path) => EngineConfig::load_from(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => EngineConfig::load().context("Failed to load configuration")?,
    };
    cli.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let diagnostics = if config.diagnostics.enabled {
        RunDiagnostics::create(&config.diagnostics.root, config.diagnostics.dump_fits)
            .context("Failed to create run directory")?
    } else {
        RunDiagnostics::disabled()
    };

    let mut logging = config.logging.clone();
    if logging.file.is_none() {
        logging.file = diagnostics.log_path();
    }
    init_logging(&logging).context("Failed to set up logging")?;
    diagnostics.announce();

    let summary = if cli.simulate {
        let sim = SimTransmitter::new(SimConfig {
            samplerate: config.capture.samplerate,
            num_samples: config.capture.num_samples,
            ..Default::default()
        })
        .context("Failed to build the simulated transmitter")?;
        info!("running against the simulated transmitter");
        run(sim.clone(), sim, &config, diagnostics)?
    } else {
        let capture = TcpCapture::new(
            config.capture.address(),
            config.capture.num_samples,
            config.capture.timeout(),
        )
        .context("Invalid capture server address")?;
        let control = RemoteControl::connect(
            config.control.address(),
            config.control.coef_path.clone(),
            config.control.timeout(),
        )
        .with_context(|| format!("Failed to connect to {}", config.control.address()))?;
        run(capture, control, &config, diagnostics)?
    };

    println!(
        "{} iterations: {} updated, {} skipped, {} failed",
        summary.outcomes.len(),
        summary.updated(),
        summary.skipped(),
        summary.failed()
    );
    println!("AM coefficients: {:?}", summary.am);
    Ok(())
}

fn run<C, R>(
    capture: C,
    channel: R,
    config: &EngineConfig,
    diagnostics: RunDiagnostics,
) -> Result<RunSummary>
where
    C: CaptureSource,
    R: ConfigChannel,
{
    let guard = GainGuard::new(config.gain_guard.clone()).context("Invalid gain guard settings")?;
    let model = PolynomialAmplitudeModel::new(config.model.am_learning_rate)
        .context("Invalid AM model settings")?;
    let reducer = BinnedMedianReducer::new(config.model.n_bins, config.model.min_per_bin)
        .context("Invalid reducer settings")?;
    let probe = OfdmMerProbe::dab_mode_1(config.capture.samplerate)
        .context("Sample rate too low for MER measurement")?;
    let leveler = RxLeveler::new(config.rx_leveling.clone()).context("Invalid RX levelling")?;

    let mut engine = AdaptationLoop::new(capture, channel, guard, model)
        .with_reducer(Box::new(reducer))
        .with_probe(Box::new(probe))
        .with_diagnostics(diagnostics)
        .with_alignment_tolerance(config.adaptation.alignment_tolerance);

    let settings = StartupSettings {
        load_existing: config.adaptation.load_existing,
        gains: GainState {
            tx_gain: config.gains.tx,
            rx_gain: config.gains.rx,
            digital_gain: config.gains.digital,
        },
    };
    let state = engine
        .startup(&settings, Some(&leveler))
        .context("Transmitter startup failed")?;
    info!(
        tx_gain = state.tx_gain,
        rx_gain = state.rx_gain,
        digital_gain = state.digital_gain,
        "startup complete"
    );

    engine
        .run(config.adaptation.iterations)
        .context("Adaptation stopped")
}

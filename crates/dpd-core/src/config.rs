//! # Engine Configuration
//!
//! YAML configuration for the DPD engine. Every section and field has a
//! default, so a file only needs to name what differs.
//!
//! ## Configuration Search Path
//!
//! Configuration is loaded from the first file found:
//! 1. Path specified via `DPD_CONFIG` environment variable
//! 2. `./dpd.yaml` (current directory)
//! 3. `~/.config/dpd/config.yaml` (user config)
//! 4. `/etc/dpd/config.yaml` (system config)
//!
//! ## Example Configuration
//!
//! ```yaml
//! capture:
//!   host: "127.0.0.1"
//!   port: 50055
//!   samplerate: 8192000
//!   num_samples: 81920
//!
//! control:
//!   rc_port: 9400
//!   coef_path: "poly.coef"
//!
//! gains:
//!   tx: 74
//!   rx: 30
//!   digital: 1.0
//!
//! gain_guard:
//!   max_txgain: 89
//!   tx_median_target: 0.1
//!
//! model:
//!   am_learning_rate: 0.5
//!
//! adaptation:
//!   iterations: 20
//!   load_existing: true
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DpdError, DpdResult};
use crate::gain_guard::GainGuardConfig;
use crate::leveling::RxLevelingConfig;
use crate::observe::LogConfig;

/// Feedback capture server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub host: String,
    pub port: u16,
    /// Baseband sample rate in Hz
    pub samplerate: f64,
    /// Samples requested per capture
    pub num_samples: usize,
    pub timeout_secs: f64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 50055,
            samplerate: 8_192_000.0,
            num_samples: 81920,
            timeout_secs: 10.0,
        }
    }
}

impl CaptureConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs)
    }
}

/// Remote control of the transmitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub host: String,
    pub rc_port: u16,
    /// Coefficient file shared with the transmitter
    pub coef_path: PathBuf,
    pub timeout_secs: f64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            rc_port: 9400,
            coef_path: PathBuf::from("poly.coef"),
            timeout_secs: 5.0,
        }
    }
}

impl ControlConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.rc_port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs)
    }
}

/// Gains applied at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GainsConfig {
    /// Analog TX gain in dB
    pub tx: f64,
    /// Analog RX gain in dB
    pub rx: f64,
    /// Linear digital gain
    pub digital: f64,
}

impl Default for GainsConfig {
    fn default() -> Self {
        Self {
            tx: 74.0,
            rx: 30.0,
            digital: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Step towards each fresh AM/AM fit (1 = replace)
    pub am_learning_rate: f64,
    /// Amplitude bins used to reduce a capture
    pub n_bins: usize,
    /// Samples a bin needs to be used
    pub min_per_bin: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            am_learning_rate: 1.0,
            n_bins: 64,
            min_per_bin: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptationConfig {
    pub iterations: usize,
    /// Start from the coefficients the transmitter already has
    pub load_existing: bool,
    /// Largest tolerated TX/RX timestamp skew in seconds (exclusive)
    pub alignment_tolerance: f64,
}

impl Default for AdaptationConfig {
    fn default() -> Self {
        Self {
            iterations: 1,
            load_existing: false,
            alignment_tolerance: 1e-5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Create a run directory at all
    pub enabled: bool,
    /// Parent of the per-run directories
    pub root: PathBuf,
    /// Write `fits.jsonl` into the run directory
    pub dump_fits: bool,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            root: std::env::temp_dir(),
            dump_fits: true,
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub capture: CaptureConfig,
    pub control: ControlConfig,
    pub gains: GainsConfig,
    pub gain_guard: GainGuardConfig,
    pub rx_leveling: RxLevelingConfig,
    pub model: ModelConfig,
    pub adaptation: AdaptationConfig,
    pub logging: LogConfig,
    pub diagnostics: DiagnosticsConfig,
}

impl EngineConfig {
    /// Load configuration from the default search path.
    ///
    /// Returns the defaults if no file is found.
    pub fn load() -> DpdResult<Self> {
        if let Ok(path) = std::env::var("DPD_CONFIG") {
            if Path::new(&path).exists() {
                return Self::load_from(Path::new(&path));
            }
        }

        for path in Self::config_search_paths() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    pub fn load_from(path: &Path) -> DpdResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DpdError::Config(format!("{}: {}", path.display(), e)))?;
        Self::parse(&content).map_err(|e| match e {
            DpdError::Config(msg) => DpdError::Config(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    /// Parse configuration from a YAML string.
    pub fn parse(yaml: &str) -> DpdResult<Self> {
        serde_yaml::from_str(yaml).map_err(|e| DpdError::Config(e.to_string()))
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> DpdResult<()> {
        let content = serde_yaml::to_string(self).map_err(|e| DpdError::Config(e.to_string()))?;
        std::fs::write(path, content)
            .map_err(|e| DpdError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Get configuration search paths.
    pub fn config_search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("./dpd.yaml")];

        if let Some(dirs) = directories::ProjectDirs::from("", "", "dpd") {
            paths.push(dirs.config_dir().join("config.yaml"));
        }

        paths.push(PathBuf::from("/etc/dpd/config.yaml"));
        paths
    }

    /// Validate the configuration.
    pub fn validate(&self) -> DpdResult<()> {
        let capture = &self.capture;
        if !(capture.samplerate.is_finite() && capture.samplerate > 0.0) {
            return Err(DpdError::Config("samplerate must be positive".to_string()));
        }
        if capture.num_samples == 0 || u32::try_from(capture.num_samples).is_err() {
            return Err(DpdError::Config(format!(
                "num_samples must be between 1 and {}",
                u32::MAX
            )));
        }
        for (name, secs) in [
            ("capture timeout", capture.timeout_secs),
            ("control timeout", self.control.timeout_secs),
        ] {
            if !(secs.is_finite() && secs > 0.0) {
                return Err(DpdError::Config(format!("{} must be positive", name)));
            }
        }

        if !(self.gains.digital.is_finite() && self.gains.digital > 0.0) {
            return Err(DpdError::Config("digital gain must be positive".to_string()));
        }
        if !(self.gains.tx.is_finite() && self.gains.rx.is_finite()) {
            return Err(DpdError::Config("analog gains must be finite".to_string()));
        }
        if self.gains.tx >= self.gain_guard.max_txgain {
            return Err(DpdError::Config(format!(
                "TX gain {} dB is not below the {} dB limit",
                self.gains.tx, self.gain_guard.max_txgain
            )));
        }

        let lr = self.model.am_learning_rate;
        if !(lr.is_finite() && (0.0..=1.0).contains(&lr)) {
            return Err(DpdError::Config(format!(
                "am_learning_rate must be within [0, 1], got {}",
                lr
            )));
        }

        let tol = self.adaptation.alignment_tolerance;
        if !(tol.is_finite() && tol > 0.0) {
            return Err(DpdError::Config("alignment_tolerance must be positive".to_string()));
        }

        self.gain_guard.validate()?;
        self.rx_leveling.validate()
    }
}

//! Per-run diagnostics
//!
//! Each engine run gets its own directory `<root>/dpd_<unix-seconds>` holding
//! the debug log and, when enabled, one JSON line per model update:
//!
//! ```text
//! {"iteration":3,"tx_amplitude":[...],"rx_amplitude":[...],
//!  "previous":[...],"fitted":[...],"next":[...],"learning_rate":0.5,
//!  "previous_curve":[[0.0,0.0],...],"next_curve":[[0.0,0.0],...]}
//! ```
//!
//! Diagnostics never influence adaptation: a sink that fails is reported
//! and the run goes on.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{error_chain, DpdError, DpdResult};
use crate::model::{curve, FitRecord};

/// Points per rendered AM/AM curve
pub const CURVE_POINTS: usize = 50;

/// Upper amplitude of rendered curves
pub const CURVE_MAX_AMPLITUDE: f64 = 0.6;

/// Name of the fit dump inside the run directory
pub const FITS_FILE: &str = "fits.jsonl";

/// Name of the debug log inside the run directory
pub const LOG_FILE: &str = "dpd.log";

/// Consumer of model-update records.
pub trait FitSink {
    fn record(&mut self, iteration: usize, record: &FitRecord) -> DpdResult<()>;
}

#[derive(Serialize)]
struct FitLine<'a> {
    iteration: usize,
    #[serde(flatten)]
    record: &'a FitRecord,
    previous_curve: Vec<(f64, f64)>,
    next_curve: Vec<(f64, f64)>,
}

/// Appends JSON lines to a file.
#[derive(Debug)]
pub struct JsonFitSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonFitSink {
    pub fn create(path: impl Into<PathBuf>) -> DpdResult<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| DpdError::Diagnostics(format!("{}: {}", path.display(), e)))?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FitSink for JsonFitSink {
    fn record(&mut self, iteration: usize, record: &FitRecord) -> DpdResult<()> {
        let line = FitLine {
            iteration,
            record,
            previous_curve: curve(&record.previous, 0.0, CURVE_MAX_AMPLITUDE, CURVE_POINTS),
            next_curve: curve(&record.next, 0.0, CURVE_MAX_AMPLITUDE, CURVE_POINTS),
        };
        let json = serde_json::to_string(&line)
            .map_err(|e| DpdError::Diagnostics(format!("cannot encode fit record: {}", e)))?;
        writeln!(self.writer, "{}", json)
            .and_then(|_| self.writer.flush())
            .map_err(|e| DpdError::Diagnostics(format!("{}: {}", self.path.display(), e)))
    }
}

/// Diagnostics context handed to the adaptation loop.
#[derive(Default)]
pub struct RunDiagnostics {
    run_dir: Option<PathBuf>,
    sink: Option<Box<dyn FitSink>>,
}

impl std::fmt::Debug for RunDiagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunDiagnostics")
            .field("run_dir", &self.run_dir)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

impl RunDiagnostics {
    /// No run directory, no sink.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Create `<root>/dpd_<unix-seconds>`; with `dump_fits` also open
    /// `fits.jsonl` in it.
    pub fn create(root: &Path, dump_fits: bool) -> DpdResult<Self> {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| DpdError::Diagnostics(format!("system clock before epoch: {}", e)))?
            .as_secs();
        let run_dir = root.join(format!("dpd_{}", secs));
        fs::create_dir_all(&run_dir)
            .map_err(|e| DpdError::Diagnostics(format!("{}: {}", run_dir.display(), e)))?;

        let sink: Option<Box<dyn FitSink>> = if dump_fits {
            Some(Box::new(JsonFitSink::create(run_dir.join(FITS_FILE))?))
        } else {
            None
        };
        Ok(Self {
            run_dir: Some(run_dir),
            sink,
        })
    }

    pub fn with_sink(mut self, sink: Box<dyn FitSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn run_dir(&self) -> Option<&Path> {
        self.run_dir.as_deref()
    }

    /// Where the debug log of this run belongs.
    pub fn log_path(&self) -> Option<PathBuf> {
        self.run_dir.as_ref().map(|d| d.join(LOG_FILE))
    }

    /// Log where this run's files go. `create` runs before the subscriber
    /// is installed, so the caller announces the directory afterwards.
    pub fn announce(&self) {
        if let Some(ref dir) = self.run_dir {
            info!(run_dir = %dir.display(), dump_fits = self.sink.is_some(), "diagnostics enabled");
        }
    }

    /// Hand a record to the sink, if any. Failures are logged only.
    pub fn record_fit(&mut self, iteration: usize, record: &FitRecord) {
        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.record(iteration, record) {
                warn!(iteration, error = %error_chain(&e), "fit record dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IDENTITY_AM;
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn record() -> FitRecord {
        FitRecord {
            tx_amplitude: vec![0.1, 0.2, 0.3, 0.4, 0.5],
            rx_amplitude: vec![0.1, 0.2, 0.3, 0.4, 0.5],
            previous: IDENTITY_AM,
            fitted: [1.0, 0.0, 0.2, 0.0, 0.0],
            next: [1.0, 0.0, 0.1, 0.0, 0.0],
            learning_rate: 0.5,
        }
    }

    #[test]
    fn test_run_dir_is_announced_only_on_request() {
        let root = tempfile::tempdir().unwrap();
        let out = Captured::default();
        let writer = out.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let diag = RunDiagnostics::create(root.path(), false).unwrap();
            assert!(out.text().is_empty(), "create logged: {}", out.text());

            diag.announce();
            let dir = diag.run_dir().unwrap().display().to_string();
            assert!(out.text().contains("diagnostics enabled"));
            assert!(out.text().contains(&dir));

            RunDiagnostics::disabled().announce();
            assert_eq!(out.text().lines().count(), 1);
        });
    }

    #[test]
    fn test_run_dir_and_fit_dump() {
        let root = tempfile::tempdir().unwrap();
        let mut diag = RunDiagnostics::create(root.path(), true).unwrap();
        let run_dir = diag.run_dir().unwrap().to_path_buf();
        assert!(run_dir.is_dir());
        let name = run_dir.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("dpd_"));
        assert_eq!(diag.log_path().unwrap(), run_dir.join("dpd.log"));

        diag.record_fit(0, &record());
        diag.record_fit(1, &record());

        let text = fs::read_to_string(run_dir.join(FITS_FILE)).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["iteration"], 1);
        assert_eq!(lines[0]["learning_rate"], 0.5);
        let next_curve = lines[0]["next_curve"].as_array().unwrap();
        assert_eq!(next_curve.len(), CURVE_POINTS);
        let last = next_curve[CURVE_POINTS - 1][0].as_f64().unwrap();
        assert!((last - CURVE_MAX_AMPLITUDE).abs() < 1e-12);
    }

    #[test]
    fn test_without_dump_writes_no_fits() {
        let root = tempfile::tempdir().unwrap();
        let mut diag = RunDiagnostics::create(root.path(), false).unwrap();
        diag.record_fit(0, &record());
        assert!(!diag.run_dir().unwrap().join(FITS_FILE).exists());
    }

    struct Broken(Rc<Cell<usize>>);

    impl FitSink for Broken {
        fn record(&mut self, _: usize, _: &FitRecord) -> DpdResult<()> {
            self.0.set(self.0.get() + 1);
            Err(DpdError::Diagnostics("disk full".into()))
        }
    }

    #[test]
    fn test_sink_failure_is_swallowed() {
        let calls = Rc::new(Cell::new(0));
        let mut diag = RunDiagnostics::disabled().with_sink(Box::new(Broken(calls.clone())));
        diag.record_fit(0, &record());
        diag.record_fit(1, &record());
        assert_eq!(calls.get(), 2);
    }
}

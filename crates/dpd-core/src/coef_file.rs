//! Predistortion coefficient file
//!
//! The transmitter loads its memoryless polynomial from a plain text file:
//!
//! ```text
//! 1          <- polynomial format id
//! 5          <- coefficients per polynomial
//! <am0>
//! ...
//! <am4>
//! <pm0>
//! ...
//! <pm4>
//! ```

use std::fs;
use std::path::Path;

use crate::error::{DpdError, DpdResult};
use crate::types::{AmCoefficients, PmCoefficients, NUM_COEFS};

/// Format id of the memoryless polynomial predistorter
pub const POLY_FORMAT_ID: u32 = 1;

/// Render coefficients in the file format.
pub fn format(am: &AmCoefficients, pm: &PmCoefficients) -> String {
    let mut out = format!("{}\n{}\n", POLY_FORMAT_ID, NUM_COEFS);
    for c in am.iter().chain(pm.iter()) {
        out.push_str(&format!("{}\n", c));
    }
    out
}

/// Parse a coefficient file's content.
pub fn parse(content: &str) -> DpdResult<(AmCoefficients, PmCoefficients)> {
    let mut lines = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .enumerate();

    let (_, id) = next_line(&mut lines, "format id")?;
    let id: u32 = id
        .parse()
        .map_err(|_| DpdError::Config(format!("bad format id '{}'", id)))?;
    if id != POLY_FORMAT_ID {
        return Err(DpdError::Config(format!(
            "unsupported coefficient format {} (expected {})",
            id, POLY_FORMAT_ID
        )));
    }

    let (_, count) = next_line(&mut lines, "coefficient count")?;
    let count: usize = count
        .parse()
        .map_err(|_| DpdError::Config(format!("bad coefficient count '{}'", count)))?;
    if count != NUM_COEFS {
        return Err(DpdError::Config(format!(
            "expected {} coefficients per polynomial, file declares {}",
            NUM_COEFS, count
        )));
    }

    let mut values = [0.0f64; 2 * NUM_COEFS];
    for slot in values.iter_mut() {
        let (line, text) = next_line(&mut lines, "all coefficients were read")?;
        *slot = text
            .parse()
            .ok()
            .filter(|v: &f64| v.is_finite())
            .ok_or_else(|| {
                DpdError::Config(format!("line {}: '{}' is not a finite number", line + 1, text))
            })?;
    }

    let mut am = [0.0; NUM_COEFS];
    let mut pm = [0.0; NUM_COEFS];
    am.copy_from_slice(&values[..NUM_COEFS]);
    pm.copy_from_slice(&values[NUM_COEFS..]);
    Ok((am, pm))
}

fn next_line<'a, I>(lines: &mut I, what: &str) -> DpdResult<(usize, &'a str)>
where
    I: Iterator<Item = (usize, &'a str)>,
{
    lines
        .next()
        .ok_or_else(|| DpdError::Config(format!("coefficient file ends before {}", what)))
}

/// Write coefficients to `path`, replacing it atomically.
pub fn write(path: &Path, am: &AmCoefficients, pm: &PmCoefficients) -> DpdResult<()> {
    let tmp = path.with_extension("coef.tmp");
    fs::write(&tmp, format(am, pm))?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Read coefficients from `path`.
pub fn read(path: &Path) -> DpdResult<(AmCoefficients, PmCoefficients)> {
    let content = fs::read_to_string(path)?;
    parse(&content).map_err(|e| match e {
        DpdError::Config(msg) => DpdError::Config(format!("{}: {}", path.display(), msg)),
        other => other,
    })
}

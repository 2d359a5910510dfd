//! Text rendering of a published frame for the reporting layer, and the
//! inputs that layer feeds back into the core.

use core::fmt::{self, Write};

use crate::ipc::{ExternalFlags, TargetSetpoint};
use crate::scanner::Measurement;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "board", derive(defmt::Format))]
pub enum ReportError {
    /// A setpoint component was not a number.
    InvalidNumber,
    /// The read flag belongs to the core side of the protocol.
    ReadOnlyFlag,
}

fn flag_text(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

/// Render `samples` and the flags as CSV:
///
/// ```text
/// Voltage Readings,0,-1.000,1,-1.000,...,207,0.250
/// initializeFLG,True
/// readFLG,False
/// ```
pub fn write_csv<W: Write>(
    out: &mut W,
    samples: &Measurement,
    flags: &ExternalFlags,
) -> fmt::Result {
    out.write_str("Voltage Readings")?;
    for (index, value) in samples.iter().enumerate() {
        write!(out, ",{},{:.3}", index, value)?;
    }
    out.write_char('\n')?;
    writeln!(out, "initializeFLG,{}", flag_text(flags.initialize()))?;
    writeln!(out, "readFLG,{}", flag_text(flags.read()))
}

/// Parse and store a setpoint pair. Values outside [-1, 1] are clamped.
pub fn apply_setpoint(
    setpoint: &TargetSetpoint,
    x: &str,
    y: &str,
) -> Result<(f32, f32), ReportError> {
    let x: f32 = x.trim().parse().map_err(|_| ReportError::InvalidNumber)?;
    let y: f32 = y.trim().parse().map_err(|_| ReportError::InvalidNumber)?;
    setpoint.set(x, y);
    Ok(setpoint.get())
}

fn parse_flag(value: &str) -> bool {
    let value = value.trim();
    value.eq_ignore_ascii_case("true") || value == "1"
}

/// Apply a flag update by name. Only `initializeFLG` is writable.
pub fn apply_flag(flags: &ExternalFlags, name: &str, value: &str) -> Result<bool, ReportError> {
    match name {
        "initializeFLG" => {
            let value = parse_flag(value);
            flags.set_initialize(value);
            Ok(value)
        }
        _ => Err(ReportError::ReadOnlyFlag),
    }
}

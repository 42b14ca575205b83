//! Custom error types for the scan toolkit.
//!
//! This module defines the primary error type, `ScanError`, for the entire
//! crate. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the different failure classes of a scan:
//!
//! - **Configuration errors** (`MissingGetter`, `MissingSetter`,
//!   `ConstantUnset`, `EmptySweep`, `DuplicateSeries`, `UnknownSeries`):
//!   detected before any hardware mutation where possible; fatal, the scan
//!   never starts.
//! - **`Hardware`**: an instrument getter or setter failed. Never swallowed
//!   by the engine; it aborts the scan at the current step, and the store
//!   keeps every line flushed before the failing step.
//! - **`ShapeMismatch`**: a measured parameter's reading changed shape
//!   mid-scan. Fatal for the scan; previously flushed lines remain valid.
//! - **`Aborted`**: wrapper for any fatal mid-scan failure, carrying the
//!   points measured and lines flushed before the scan died so the caller
//!   can tell "no data collected" from "partial data on disk".
//! - **`Storage` / `Io`**: persistence failures from the structured-array
//!   store or the filesystem.
//! - **`Config`**: settings-file parse errors from the `config` crate.
//! - **`FeatureNotEnabled`**: a storage or plot backend was compiled out.
//!
//! User-driven cancellation (closing the plot window) is deliberately NOT an
//! error: it is a normal completion path reported through
//! [`crate::engine::ScanStatus::Cancelled`].

use thiserror::Error;

/// Unified error type for scan configuration, execution, and persistence.
#[derive(Error, Debug)]
pub enum ScanError {
    /// A parameter without a getter was asked to measure.
    #[error("parameter '{0}' has no getter and cannot be measured")]
    MissingGetter(String),

    /// A parameter without a setter was used as a sweep axis or set directly.
    #[error("parameter '{0}' has no setter and cannot be set")]
    MissingSetter(String),

    /// `set_constant` had no explicit value, no stored constant, and no getter.
    #[error("parameter '{0}': need a constant value, a stored constant, or a getter")]
    ConstantUnset(String),

    /// A sweep axis was configured with an empty value sequence.
    #[error("sweep axis '{0}' has an empty value sequence")]
    EmptySweep(String),

    /// Two plot series were registered under the same label.
    #[error("plot series '{0}' already exists")]
    DuplicateSeries(String),

    /// A plot push or query referenced a series that was never registered.
    #[error("no plot series labeled '{0}'")]
    UnknownSeries(String),

    /// The plot bridge was driven against its state machine.
    #[error("plot bridge is {state}; cannot {op}")]
    PlotState {
        /// State the bridge was in.
        state: &'static str,
        /// Operation that was attempted.
        op: &'static str,
    },

    /// Two parameters in one scan share a label.
    #[error("parameter label '{0}' is used more than once in this scan")]
    DuplicateParam(String),

    /// A plot series referenced a parameter label not present in the scan.
    #[error("plot series '{series}' references unknown parameter '{param}'")]
    UnknownPlotParam {
        /// Label of the offending series.
        series: String,
        /// Parameter label that could not be resolved.
        param: String,
    },

    /// An instrument getter or setter returned an error.
    #[error("hardware I/O failed on parameter '{label}': {source:#}")]
    Hardware {
        /// Label of the parameter whose closure failed.
        label: String,
        /// Underlying driver error.
        source: anyhow::Error,
    },

    /// A measured parameter's reading shape changed after store creation.
    #[error("parameter '{label}': reading shape {got:?} does not match locked-in shape {expected:?}")]
    ShapeMismatch {
        /// Label of the measured parameter.
        label: String,
        /// Shape observed at store creation.
        expected: Vec<usize>,
        /// Shape of the offending reading.
        got: Vec<usize>,
    },

    /// A fatal error stopped a scan that was already under way.
    ///
    /// Wraps the underlying failure together with how much data survived:
    /// `lines_flushed == 0` means nothing reached the store, otherwise the
    /// first `lines_flushed` innermost lines are valid on disk.
    #[error(
        "scan aborted after {points_completed} points ({lines_flushed} lines on disk): {source}"
    )]
    Aborted {
        /// Sweep points fully measured before the failure.
        points_completed: usize,
        /// Innermost lines flushed to the store before the failure.
        lines_flushed: usize,
        /// The failure that stopped the scan.
        #[source]
        source: Box<ScanError>,
    },

    /// The structured-array store was driven out of order or rejected a write.
    #[error("store error: {0}")]
    Storage(String),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings-file error.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// A backend was requested that is not compiled in.
    #[error("feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

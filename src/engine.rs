//! The N-dimensional sweep/acquisition engine.
//!
//! [`run_scan`] iterates the Cartesian product of the sweep axes in
//! odometer (sawtooth) order, innermost axis fastest: with axis lengths
//! `[l0, l1, ..., ln]` and `total = ∏ li`, axis `i` is re-applied exactly
//! when `scan_index % stride_i == 0`, where
//! `stride_i = total / (l0 * ... * li)`. Each axis therefore sweeps its full
//! range before the next-outer axis advances, and an axis of length 1 never
//! re-fires after step 0.
//!
//! At every point the engine applies pending axis writes, settles, measures
//! every dependent parameter once (plot and store both consume that single
//! cached reading), pushes live-plot points, and flushes each completed
//! innermost line to the structured-array store. All hardware I/O is issued
//! strictly sequentially from the caller's thread; the only other thread is
//! the plot worker, which never touches hardware.
//!
//! # Example
//!
//! ```rust,ignore
//! use labscan::engine::{run_scan, ScanConfig, SweepAxis, TimingPolicy};
//! use labscan::store::MemoryStore;
//!
//! let config = ScanConfig {
//!     sweep: vec![SweepAxis::new(gate, vec![-1.0, 0.0, 1.0]),
//!                 SweepAxis::new(bias, vec![0.0, 0.1, 0.2, 0.3])],
//!     constants: vec![(heater, Some(4.2))],
//!     measured: vec![current],
//!     plots: vec![],
//! };
//! let mut store = MemoryStore::new();
//! let result = run_scan(config, &TimingPolicy::default(), &mut store, None)?;
//! ```

use crate::error::ScanError;
use crate::parameter::Param;
use crate::plot::{PlotBridge, RenderSurface, SeriesSpec};
use crate::sample::Sample;
use crate::store::{AxisMeta, StoreSink, VarMeta};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Label of the elapsed-time parameter folded into every scan.
pub const TIME_PARAM_LABEL: &str = "time_s";

/// Fixed delay after starting the plot worker, so the surface exists before
/// the first push.
pub const PLOT_WARMUP: Duration = Duration::from_secs(1);

/// Scheduling delays of a scan. These affect timing only, never data
/// semantics.
///
/// Deserializable from settings files with human-friendly durations
/// (`"50ms"`, `"1s"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingPolicy {
    /// Pause after applying the constant parameters.
    #[serde(with = "humantime_serde")]
    pub const_settle_time: Duration,
    /// Pause between axis writes and the first measurement of a step.
    #[serde(with = "humantime_serde")]
    pub settle_before_measure: Duration,
    /// Pause after the last measurement of a step.
    #[serde(with = "humantime_serde")]
    pub settle_after_measure: Duration,
    /// Pause between successive measurements within one step. Papers over
    /// back-to-back command issues on shared instrument buses.
    #[serde(with = "humantime_serde")]
    pub inter_measurement_delay: Duration,
    /// Pause at the end of each innermost line, before the flush. Lets
    /// hardware settle after the large swing back to the line start.
    #[serde(with = "humantime_serde")]
    pub line_turnaround_delay: Duration,
}

impl Default for TimingPolicy {
    fn default() -> Self {
        Self {
            const_settle_time: Duration::from_secs(1),
            settle_before_measure: Duration::from_millis(50),
            settle_after_measure: Duration::from_millis(50),
            inter_measurement_delay: Duration::from_millis(10),
            line_turnaround_delay: Duration::from_secs(1),
        }
    }
}

impl TimingPolicy {
    /// All delays zero. For tests and dry runs against mock hardware.
    pub fn zero() -> Self {
        Self {
            const_settle_time: Duration::ZERO,
            settle_before_measure: Duration::ZERO,
            settle_after_measure: Duration::ZERO,
            inter_measurement_delay: Duration::ZERO,
            line_turnaround_delay: Duration::ZERO,
        }
    }
}

/// One sweep axis: a settable parameter plus its ordered target values.
pub struct SweepAxis {
    /// The driven parameter. Must have a setter.
    pub param: Param,
    /// Target values, applied in order each cycle.
    pub values: Vec<f64>,
}

impl SweepAxis {
    /// Bundle a parameter with its sweep range.
    pub fn new(param: Param, values: impl Into<Vec<f64>>) -> Self {
        Self {
            param,
            values: values.into(),
        }
    }
}

/// One live-plot series, referring to scan parameters by label.
///
/// `x` may name any sweep, constant, or measured parameter, or
/// [`TIME_PARAM_LABEL`] for elapsed time.
#[derive(Debug, Clone)]
pub struct PlotSpec {
    /// Series label, unique within the scan.
    pub label: String,
    /// Label of the parameter supplying x values.
    pub x: String,
    /// Label of the parameter supplying y values.
    pub y: String,
}

impl PlotSpec {
    /// Convenience constructor.
    pub fn new(label: impl Into<String>, x: impl Into<String>, y: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            x: x.into(),
            y: y.into(),
        }
    }
}

/// Everything a scan needs besides timing and sinks.
pub struct ScanConfig {
    /// Sweep axes, outermost first; the LAST entry varies fastest.
    pub sweep: Vec<SweepAxis>,
    /// Parameters set once before the scan, in listed order. `None` means
    /// re-apply the stored constant or adopt the current reading.
    pub constants: Vec<(Param, Option<f64>)>,
    /// Parameters read at every sweep point, in listed order.
    pub measured: Vec<Param>,
    /// Live-plot series, if any.
    pub plots: Vec<PlotSpec>,
}

/// How a scan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStatus {
    /// Every sweep point was measured and flushed.
    Completed,
    /// The user closed the live plot; partial results are on disk.
    Cancelled,
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanStatus::Completed => write!(f, "completed"),
            ScanStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Summary of a finished (or cancelled) scan.
#[derive(Debug, Clone)]
pub struct ScanResult {
    /// Completion status. Cancellation is a normal outcome, not an error.
    pub status: ScanStatus,
    /// Sweep points fully measured.
    pub points_completed: usize,
    /// Innermost lines flushed to the store.
    pub lines_flushed: usize,
}

/// `total` and per-axis strides for the given axis lengths.
///
/// Axis `i`'s value is (re-)applied exactly when
/// `scan_index % strides[i] == 0`, reproducing odometer advancement without
/// materializing index tuples.
pub(crate) fn axis_strides(lens: &[usize]) -> (usize, Vec<usize>) {
    let total: usize = lens.iter().product();
    if total == 0 {
        // Validation rejects empty axes before this can matter.
        return (0, Vec::new());
    }
    let mut strides = Vec::with_capacity(lens.len());
    let mut cum = 1usize;
    for &len in lens {
        cum *= len;
        strides.push(total / cum);
    }
    (total, strides)
}

fn pause(d: Duration) {
    if !d.is_zero() {
        thread::sleep(d);
    }
}

/// Reject invalid configurations before any hardware mutation.
fn validate(config: &ScanConfig) -> Result<(), ScanError> {
    let mut labels = HashSet::new();
    let mut check_label = |label: &str| -> Result<(), ScanError> {
        if !labels.insert(label.to_string()) {
            return Err(ScanError::DuplicateParam(label.to_string()));
        }
        Ok(())
    };

    for axis in &config.sweep {
        if axis.values.is_empty() {
            return Err(ScanError::EmptySweep(axis.param.label().to_string()));
        }
        if !axis.param.has_setter() {
            return Err(ScanError::MissingSetter(axis.param.label().to_string()));
        }
        check_label(axis.param.label())?;
    }
    for (param, _) in &config.constants {
        check_label(param.label())?;
    }
    for param in &config.measured {
        if !param.has_getter() {
            return Err(ScanError::MissingGetter(param.label().to_string()));
        }
        check_label(param.label())?;
    }
    check_label(TIME_PARAM_LABEL)?;

    let mut series_labels = HashSet::new();
    for spec in &config.plots {
        if !series_labels.insert(spec.label.as_str()) {
            return Err(ScanError::DuplicateSeries(spec.label.clone()));
        }
        for param_label in [spec.x.as_str(), spec.y.as_str()] {
            if param_label != TIME_PARAM_LABEL && !labels.contains(param_label) {
                return Err(ScanError::UnknownPlotParam {
                    series: spec.label.clone(),
                    param: param_label.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Find a parameter by label across all three lists.
fn find_param<'a>(config: &'a ScanConfig, label: &str) -> Option<&'a Param> {
    config
        .sweep
        .iter()
        .map(|a| &a.param)
        .chain(config.constants.iter().map(|(p, _)| p))
        .chain(config.measured.iter())
        .find(|p| p.label() == label)
}

/// Latest cached scalar of the named parameter, for plot consumption.
fn resolve_scalar(config: &ScanConfig, label: &str) -> Option<f64> {
    find_param(config, label)?.last_value().and_then(Sample::as_scalar)
}

#[derive(Default)]
struct LoopOutcome {
    points: usize,
    lines: usize,
    cancelled: bool,
}

/// Run an N-dimensional sweep.
///
/// Applies the constants, optionally starts the live plot on a worker
/// thread, iterates the sweep in odometer order, and streams each completed
/// innermost line into `store`. See the module docs for the per-step
/// ordering guarantees.
///
/// # Errors
///
/// Configuration problems surface before any hardware mutation. Hardware
/// and storage errors abort the scan at the current step, wrapped in
/// [`ScanError::Aborted`] with the points measured and lines flushed so
/// far; every line flushed before the failure remains valid on disk. A
/// user-closed plot
/// window is NOT an error: the scan stops gracefully with
/// [`ScanStatus::Cancelled`].
pub fn run_scan(
    mut config: ScanConfig,
    timing: &TimingPolicy,
    store: &mut dyn StoreSink,
    plot_surface: Option<Box<dyn RenderSurface>>,
) -> Result<ScanResult, ScanError> {
    validate(&config)?;

    // 1. Constants first, then let the hardware settle.
    for (param, value) in &mut config.constants {
        param.set_constant(*value)?;
        info!(
            param = param.label(),
            value = ?param.constant(),
            units = param.units().unwrap_or(""),
            "constant applied"
        );
    }
    pause(timing.const_settle_time);

    // 2. Fold elapsed time into the measured list; it is stored like any
    // other dependent parameter.
    let t0 = Instant::now();
    config.measured.push(
        Param::new(TIME_PARAM_LABEL)
            .with_units("s")
            .with_long_name("Time since the start of the scan")
            .with_getter(move || Ok(Sample::scalar(t0.elapsed().as_secs_f64()))),
    );

    // 3. Live plot, on its own thread, warmed up before the first push.
    let mut bridge = match (plot_surface, config.plots.is_empty()) {
        (Some(surface), false) => {
            let mut bridge = PlotBridge::new();
            for spec in &config.plots {
                let axis_caption = |label: &str| {
                    find_param(&config, label)
                        .map(Param::axis_label)
                        .unwrap_or_else(|| label.to_string())
                };
                bridge.add_series(SeriesSpec {
                    label: spec.label.clone(),
                    x_label: axis_caption(&spec.x),
                    y_label: axis_caption(&spec.y),
                })?;
            }
            bridge.start(surface)?;
            pause(PLOT_WARMUP);
            Some(bridge)
        }
        (Some(_), true) => {
            debug!("plot surface supplied but no series configured; plotting disabled");
            None
        }
        (None, _) => None,
    };

    let outcome = scan_loop(&mut config, timing, store, bridge.as_ref());

    // The worker is stopped exactly once, on every exit path.
    if let Some(bridge) = bridge.as_mut() {
        bridge.shutdown();
    }
    let outcome = outcome?;

    // Sync and best-effort mirroring; mirror failures are logged inside the
    // sink and never escalate.
    store.finish()?;

    let status = if outcome.cancelled {
        ScanStatus::Cancelled
    } else {
        ScanStatus::Completed
    };
    info!(
        %status,
        points = outcome.points,
        lines = outcome.lines,
        "scan finished"
    );
    Ok(ScanResult {
        status,
        points_completed: outcome.points,
        lines_flushed: outcome.lines,
    })
}

/// Drive the sweep, attaching progress counts to any fatal error.
///
/// A failure inside the loop is wrapped in [`ScanError::Aborted`] so the
/// caller learns how many points were measured and how many lines reached
/// the store before the scan died; `lines_flushed == 0` means no data is on
/// disk.
fn scan_loop(
    config: &mut ScanConfig,
    timing: &TimingPolicy,
    store: &mut dyn StoreSink,
    bridge: Option<&PlotBridge>,
) -> Result<LoopOutcome, ScanError> {
    let mut outcome = LoopOutcome::default();
    match sweep_steps(config, timing, store, bridge, &mut outcome) {
        Ok(()) => Ok(outcome),
        Err(source) => {
            error!(
                points = outcome.points,
                lines = outcome.lines,
                "scan aborted: {source}"
            );
            Err(ScanError::Aborted {
                points_completed: outcome.points,
                lines_flushed: outcome.lines,
                source: Box::new(source),
            })
        }
    }
}

fn sweep_steps(
    config: &mut ScanConfig,
    timing: &TimingPolicy,
    store: &mut dyn StoreSink,
    bridge: Option<&PlotBridge>,
    outcome: &mut LoopOutcome,
) -> Result<(), ScanError> {
    let lens: Vec<usize> = config.sweep.iter().map(|a| a.values.len()).collect();
    let (total, strides) = axis_strides(&lens);
    let inner_len = lens.last().copied().unwrap_or(1);
    info!(total, ?lens, "starting sweep");

    // One innermost line per measured parameter, recycled every line.
    let mut line_bufs: Vec<Vec<f64>> = Vec::new();
    let mut locked_shapes: Vec<Vec<usize>> = Vec::new();

    for scan_index in 0..total {
        // a. Odometer: re-apply every axis whose stride divides this index.
        for (axis, &stride) in config.sweep.iter_mut().zip(&strides) {
            if scan_index % stride == 0 {
                let value = axis.values[(scan_index / stride) % axis.values.len()];
                axis.param.set(value)?;
            }
        }

        // b. Settle, then measure every dependent parameter exactly once.
        pause(timing.settle_before_measure);
        let row = scan_index % inner_len;
        for (i, param) in config.measured.iter_mut().enumerate() {
            param.measure()?;
            let sample = param
                .last_value()
                .ok_or_else(|| ScanError::MissingGetter(param.label().to_string()))?;
            if scan_index == 0 {
                locked_shapes.push(sample.shape().to_vec());
                line_bufs.push(vec![f64::NAN; inner_len * sample.len()]);
            } else if sample.shape() != locked_shapes[i].as_slice() {
                return Err(ScanError::ShapeMismatch {
                    label: param.label().to_string(),
                    expected: locked_shapes[i].clone(),
                    got: sample.shape().to_vec(),
                });
            }
            let width = sample.len();
            line_bufs[i][row * width..(row + 1) * width].copy_from_slice(sample.data());
            pause(timing.inter_measurement_delay);
        }
        pause(timing.settle_after_measure);
        outcome.points = scan_index + 1;

        // c. Live plot: push the step's cached values, then poll for a
        // user-driven close. The closed-check is non-blocking, so a dead
        // worker can never hang the loop.
        if let Some(bridge) = bridge {
            for spec in &config.plots {
                match (
                    resolve_scalar(config, &spec.x),
                    resolve_scalar(config, &spec.y),
                ) {
                    (Some(x), Some(y)) => bridge.push_point(&spec.label, x, y)?,
                    _ => debug!(
                        series = spec.label,
                        "non-scalar or unmeasured plot value; point skipped"
                    ),
                }
            }
            if !outcome.cancelled && bridge.cancelled() {
                warn!(scan_index, "plot window closed; cancelling scan");
                outcome.cancelled = true;
            }
        }

        // d. Store bookkeeping. Creation happens once, with shapes locked
        // from the first reading; a completed line flushes even when it is
        // the same step (innermost axis of length 1).
        if scan_index == 0 {
            let axes: Vec<AxisMeta> = config
                .sweep
                .iter()
                .map(|a| AxisMeta {
                    label: a.param.label().to_string(),
                    units: a.param.units().map(String::from),
                    long_name: a.param.long_name().map(String::from),
                    values: a.values.clone(),
                })
                .collect();
            let vars: Vec<VarMeta> = config
                .measured
                .iter()
                .zip(&locked_shapes)
                .map(|(p, shape)| VarMeta {
                    label: p.label().to_string(),
                    units: p.units().map(String::from),
                    long_name: p.long_name().map(String::from),
                    extra_shape: shape.clone(),
                })
                .collect();
            store.create(&axes, &vars)?;
            debug!("store created with locked shapes {:?}", locked_shapes);
        }
        if (scan_index + 1) % inner_len == 0 {
            pause(timing.line_turnaround_delay);
            let line_index = scan_index / inner_len;
            store.flush_line(line_index, &line_bufs)?;
            outcome.lines += 1;
            debug!(line_index, lines_flushed = outcome.lines, "line flushed");
        }

        if outcome.cancelled {
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strides_follow_cumulative_products() {
        let (total, strides) = axis_strides(&[2, 3, 4]);
        assert_eq!(total, 24);
        assert_eq!(strides, vec![12, 4, 1]);
    }

    #[test]
    fn single_axis_has_unit_stride() {
        let (total, strides) = axis_strides(&[5]);
        assert_eq!(total, 5);
        assert_eq!(strides, vec![1]);
    }

    #[test]
    fn length_one_axis_fires_only_at_step_zero() {
        let (total, strides) = axis_strides(&[1, 3]);
        assert_eq!(total, 3);
        // Axis 0 has stride 3: only scan_index 0 satisfies index % 3 == 0
        // within 0..3, so it never re-fires.
        assert_eq!(strides, vec![3, 1]);
    }

    #[test]
    fn empty_axis_yields_zero_total() {
        let (total, strides) = axis_strides(&[2, 0]);
        assert_eq!(total, 0);
        assert!(strides.is_empty());
    }

    #[test]
    fn timing_policy_deserializes_human_durations() {
        let policy: TimingPolicy = toml_from_str(
            r#"
            const_settle_time = "2s"
            settle_before_measure = "20ms"
            "#,
        );
        assert_eq!(policy.const_settle_time, Duration::from_secs(2));
        assert_eq!(policy.settle_before_measure, Duration::from_millis(20));
        // Unspecified fields keep their defaults.
        assert_eq!(policy.inter_measurement_delay, Duration::from_millis(10));
    }

    fn toml_from_str(s: &str) -> TimingPolicy {
        config::Config::builder()
            .add_source(config::File::from_str(s, config::FileFormat::Toml))
            .build()
            .and_then(config::Config::try_deserialize)
            .unwrap()
    }
}

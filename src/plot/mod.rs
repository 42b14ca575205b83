//! Threaded live-plot bridge.
//!
//! The scan engine's main loop appends (x, y) points to a set of named
//! series; a dedicated worker thread owns the render surface and redraws
//! those series at its own cadence. The two sides share only
//! [`PlotShared`]: a mutex-guarded series map plus atomic stop/exit flags.
//! Appends are O(1) and the worker copies snapshots, so neither side ever
//! blocks the other for long.
//!
//! # State machine
//!
//! ```text
//! Uninitialized → Initialized → Running → Stopping → Closed
//! ```
//!
//! `add_series` is only valid before `start`; `shutdown` transitions through
//! `Stopping` with a bounded wait, so a wedged render surface can delay the
//! scan's teardown by at most [`SHUTDOWN_TIMEOUT`], never hang it. The
//! worker exits on its own when every series has been closed by the user or
//! when the stop flag is raised.
//!
//! Rendering itself lives behind [`RenderSurface`]: [`NullSurface`] is a
//! headless cadence loop, and the `plot_egui` feature adds a native
//! `eframe`/`egui_plot` window.

use crate::error::ScanError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

#[cfg(feature = "plot_egui")]
pub mod egui;

/// Default redraw cadence (10 Hz).
pub const REDRAW_INTERVAL: Duration = Duration::from_millis(100);

/// Bounded wait for the worker during shutdown.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Identity and axis labels of one plot series.
#[derive(Debug, Clone)]
pub struct SeriesSpec {
    /// Series label, unique per bridge.
    pub label: String,
    /// X-axis caption.
    pub x_label: String,
    /// Y-axis caption.
    pub y_label: String,
}

/// A point-in-time copy of one series, handed to the render surface.
#[derive(Debug, Clone)]
pub struct SeriesFrame {
    /// Series identity and axis labels.
    pub spec: SeriesSpec,
    /// X values in push order.
    pub x: Vec<f64>,
    /// Y values in push order.
    pub y: Vec<f64>,
}

struct SeriesBuf {
    spec: SeriesSpec,
    x: Vec<f64>,
    y: Vec<f64>,
    closed: bool,
}

/// Data shared between the scan thread and the plot worker.
///
/// The scan thread appends; the worker snapshots and marks series closed.
pub struct PlotShared {
    series: Mutex<Vec<SeriesBuf>>,
    stop: AtomicBool,
    worker_exited: AtomicBool,
}

impl PlotShared {
    fn new() -> Self {
        Self {
            series: Mutex::new(Vec::new()),
            stop: AtomicBool::new(false),
            worker_exited: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<SeriesBuf>> {
        // A panic while holding this lock poisons only plot data; rendering
        // the last consistent snapshot is still fine.
        match self.series.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Copy every series for rendering.
    pub fn snapshot(&self) -> Vec<SeriesFrame> {
        self.lock()
            .iter()
            .map(|s| SeriesFrame {
                spec: s.spec.clone(),
                x: s.x.clone(),
                y: s.y.clone(),
            })
            .collect()
    }

    /// Record that the user dismissed one series' window.
    pub fn mark_closed(&self, label: &str) {
        let mut series = self.lock();
        if let Some(s) = series.iter_mut().find(|s| s.spec.label == label) {
            s.closed = true;
        }
    }

    /// Record that the user dismissed the whole surface.
    pub fn mark_all_closed(&self) {
        for s in self.lock().iter_mut() {
            s.closed = true;
        }
    }

    /// True once any series has been closed.
    pub fn any_closed(&self) -> bool {
        self.lock().iter().any(|s| s.closed)
    }

    /// True once every series has been closed (or none exist).
    pub fn all_closed(&self) -> bool {
        self.lock().iter().all(|s| s.closed)
    }

    /// True once the bridge requested the worker to stop.
    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

/// A render backend driven on the plot worker thread.
///
/// `run` owns the surface's whole lifetime: create windows for the shared
/// series, redraw from [`PlotShared::snapshot`] at a ≥10 Hz cadence, mark
/// series closed when the user dismisses them, and return when
/// [`PlotShared::stop_requested`] is raised or every series is closed.
pub trait RenderSurface: Send + 'static {
    /// Run the surface's event/redraw loop to completion.
    fn run(self: Box<Self>, shared: Arc<PlotShared>) -> anyhow::Result<()>;
}

/// Headless surface: keeps the redraw cadence without rendering anything.
///
/// Used when scans run unattended (no display) and by tests.
#[derive(Debug, Clone)]
pub struct NullSurface {
    interval: Duration,
}

impl NullSurface {
    /// Surface polling at the default cadence.
    pub fn new() -> Self {
        Self {
            interval: REDRAW_INTERVAL,
        }
    }
}

impl Default for NullSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderSurface for NullSurface {
    fn run(self: Box<Self>, shared: Arc<PlotShared>) -> anyhow::Result<()> {
        loop {
            if shared.stop_requested() || shared.all_closed() {
                return Ok(());
            }
            let _ = shared.snapshot();
            thread::sleep(self.interval);
        }
    }
}

/// Bridge lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// No series registered yet.
    Uninitialized,
    /// Series registered, worker not started.
    Initialized,
    /// Worker thread live.
    Running,
    /// Stop signaled, waiting for the worker.
    Stopping,
    /// Terminal; no further pushes or redraws.
    Closed,
}

impl BridgeState {
    fn name(self) -> &'static str {
        match self {
            BridgeState::Uninitialized => "uninitialized",
            BridgeState::Initialized => "initialized",
            BridgeState::Running => "running",
            BridgeState::Stopping => "stopping",
            BridgeState::Closed => "closed",
        }
    }
}

impl std::fmt::Display for BridgeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Owner of the plot worker thread and the shared series map.
pub struct PlotBridge {
    shared: Arc<PlotShared>,
    worker: Option<JoinHandle<()>>,
    done_rx: Option<mpsc::Receiver<()>>,
    state: BridgeState,
}

impl PlotBridge {
    /// A bridge with no series and no worker.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(PlotShared::new()),
            worker: None,
            done_rx: None,
            state: BridgeState::Uninitialized,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BridgeState {
        self.state
    }

    /// Register a new empty series. Only valid before [`PlotBridge::start`].
    pub fn add_series(&mut self, spec: SeriesSpec) -> Result<(), ScanError> {
        if !matches!(
            self.state,
            BridgeState::Uninitialized | BridgeState::Initialized
        ) {
            return Err(ScanError::PlotState {
                state: self.state.name(),
                op: "add a series",
            });
        }
        let mut series = self.shared.lock();
        if series.iter().any(|s| s.spec.label == spec.label) {
            return Err(ScanError::DuplicateSeries(spec.label));
        }
        series.push(SeriesBuf {
            spec,
            x: Vec::new(),
            y: Vec::new(),
            closed: false,
        });
        drop(series);
        self.state = BridgeState::Initialized;
        Ok(())
    }

    /// Spawn the worker thread running `surface`.
    pub fn start(&mut self, surface: Box<dyn RenderSurface>) -> Result<(), ScanError> {
        if self.state != BridgeState::Initialized {
            return Err(ScanError::PlotState {
                state: self.state.name(),
                op: "start the worker",
            });
        }
        let shared = self.shared.clone();
        let (done_tx, done_rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("liveplot".into())
            .spawn(move || {
                if let Err(e) = surface.run(shared.clone()) {
                    warn!("plot surface exited with error: {e:#}");
                }
                shared.worker_exited.store(true, Ordering::Release);
                let _ = done_tx.send(());
            })?;
        self.worker = Some(handle);
        self.done_rx = Some(done_rx);
        self.state = BridgeState::Running;
        debug!("plot worker started");
        Ok(())
    }

    /// Append one point to a series. O(1) amortized; unbounded growth.
    pub fn push_point(&self, label: &str, x: f64, y: f64) -> Result<(), ScanError> {
        if !matches!(self.state, BridgeState::Running) {
            return Err(ScanError::PlotState {
                state: self.state.name(),
                op: "push a point",
            });
        }
        let mut series = self.shared.lock();
        let buf = series
            .iter_mut()
            .find(|s| s.spec.label == label)
            .ok_or_else(|| ScanError::UnknownSeries(label.to_string()))?;
        buf.x.push(x);
        buf.y.push(y);
        Ok(())
    }

    /// True once the user dismissed that series' window.
    pub fn is_closed(&self, label: &str) -> Result<bool, ScanError> {
        self.shared
            .lock()
            .iter()
            .find(|s| s.spec.label == label)
            .map(|s| s.closed)
            .ok_or_else(|| ScanError::UnknownSeries(label.to_string()))
    }

    /// True once the user requested cancellation.
    ///
    /// Any closed series counts, and so does a worker that exited on its
    /// own (a crashed surface must not let the scan run blind forever).
    /// Non-blocking.
    pub fn cancelled(&self) -> bool {
        self.shared.any_closed() || self.shared.worker_exited.load(Ordering::Acquire)
    }

    /// Stop the worker and retire the bridge. Idempotent.
    ///
    /// Blocks until the worker exits, but at most [`SHUTDOWN_TIMEOUT`]: an
    /// unresponsive surface is detached with a warning rather than hanging
    /// the scan.
    pub fn shutdown(&mut self) {
        if self.state == BridgeState::Closed {
            return;
        }
        self.state = BridgeState::Stopping;
        self.shared.stop.store(true, Ordering::Release);

        let worker_done = match self.done_rx.take() {
            Some(rx) => rx.recv_timeout(SHUTDOWN_TIMEOUT).is_ok(),
            None => true,
        };
        match self.worker.take() {
            Some(handle) if worker_done => {
                if handle.join().is_err() {
                    warn!("plot worker panicked");
                }
            }
            Some(_) => {
                warn!(
                    "plot worker did not stop within {:?}; detaching",
                    SHUTDOWN_TIMEOUT
                );
            }
            None => {}
        }
        self.state = BridgeState::Closed;
        debug!("plot bridge closed");
    }
}

impl Default for PlotBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PlotBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(label: &str) -> SeriesSpec {
        SeriesSpec {
            label: label.into(),
            x_label: "x".into(),
            y_label: "y".into(),
        }
    }

    /// Surface that marks every series closed after `after` redraw passes.
    struct ClosingSurface {
        after: usize,
    }

    impl RenderSurface for ClosingSurface {
        fn run(self: Box<Self>, shared: Arc<PlotShared>) -> anyhow::Result<()> {
            for _ in 0..self.after {
                if shared.stop_requested() {
                    return Ok(());
                }
                let _ = shared.snapshot();
                thread::sleep(Duration::from_millis(1));
            }
            shared.mark_all_closed();
            Ok(())
        }
    }

    #[test]
    fn duplicate_series_is_rejected() {
        let mut bridge = PlotBridge::new();
        bridge.add_series(spec("iv")).unwrap();
        assert!(matches!(
            bridge.add_series(spec("iv")),
            Err(ScanError::DuplicateSeries(label)) if label == "iv"
        ));
    }

    #[test]
    fn push_before_start_is_a_state_error() {
        let mut bridge = PlotBridge::new();
        bridge.add_series(spec("iv")).unwrap();
        assert!(matches!(
            bridge.push_point("iv", 0.0, 0.0),
            Err(ScanError::PlotState { .. })
        ));
    }

    #[test]
    fn lifecycle_with_null_surface() {
        let mut bridge = PlotBridge::new();
        assert_eq!(bridge.state(), BridgeState::Uninitialized);
        bridge.add_series(spec("iv")).unwrap();
        assert_eq!(bridge.state(), BridgeState::Initialized);
        bridge
            .start(Box::new(NullSurface {
                interval: Duration::from_millis(1),
            }))
            .unwrap();
        assert_eq!(bridge.state(), BridgeState::Running);

        bridge.push_point("iv", 0.0, 1.0).unwrap();
        bridge.push_point("iv", 1.0, 2.0).unwrap();
        assert!(!bridge.cancelled());
        assert!(!bridge.is_closed("iv").unwrap());

        let frames = bridge.shared.snapshot();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].x, vec![0.0, 1.0]);
        assert_eq!(frames[0].y, vec![1.0, 2.0]);

        bridge.shutdown();
        assert_eq!(bridge.state(), BridgeState::Closed);
        // Idempotent.
        bridge.shutdown();
    }

    #[test]
    fn user_close_is_reported_as_cancellation() {
        let mut bridge = PlotBridge::new();
        bridge.add_series(spec("iv")).unwrap();
        bridge.start(Box::new(ClosingSurface { after: 3 })).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !bridge.cancelled() {
            assert!(std::time::Instant::now() < deadline, "close never observed");
            thread::sleep(Duration::from_millis(2));
        }
        assert!(bridge.is_closed("iv").unwrap());
        bridge.shutdown();
    }

    #[test]
    fn dead_worker_counts_as_cancellation() {
        struct CrashingSurface;
        impl RenderSurface for CrashingSurface {
            fn run(self: Box<Self>, _shared: Arc<PlotShared>) -> anyhow::Result<()> {
                anyhow::bail!("render surface lost its context");
            }
        }

        let mut bridge = PlotBridge::new();
        bridge.add_series(spec("iv")).unwrap();
        bridge.start(Box::new(CrashingSurface)).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !bridge.cancelled() {
            assert!(std::time::Instant::now() < deadline, "worker exit not seen");
            thread::sleep(Duration::from_millis(2));
        }
        bridge.shutdown();
    }
}

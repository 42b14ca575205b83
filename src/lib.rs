//! # labscan
//!
//! An N-dimensional sweep-and-measure engine for laboratory experiments.
//! The crate wraps instrument knobs and readouts in a uniform [`Param`]
//! abstraction, drives arbitrary nested sweeps over them, streams points to a
//! live plot on a worker thread, and persists every measured value into a
//! dated run directory as the scan progresses, one completed sweep line at a
//! time.
//!
//! ## Crate Structure
//!
//! - **`parameter`**: The [`Param`] handle tying a label, units, and optional
//!   getter/setter closures to a cached last measurement.
//! - **`sample`**: [`Sample`], a shaped block of `f64` values; scalars are
//!   zero-dimensional samples.
//! - **`engine`**: Scan configuration and [`run_scan`], the blocking sweep
//!   loop that applies axis writes, settles, measures, plots, and flushes.
//! - **`plot`**: The thread-backed [`PlotBridge`] and the `RenderSurface`
//!   trait a display backend implements; an `egui` backend is available
//!   behind the `plot_egui` feature.
//! - **`store`**: The [`StoreSink`] persistence trait, an in-memory
//!   implementation for tests, and a netCDF backend behind the
//!   `storage_netcdf` feature (enabled by default).
//! - **`rundir`**: Dated run-directory creation, provenance copies, and
//!   best-effort mirroring to a network share.
//! - **`config`**: TOML settings loaded with the `config` crate.
//! - **`mock`**: A simulated instrument rack for demos and tests.
//! - **`error`**: The crate-wide [`ScanError`] type.

pub mod config;
pub mod engine;
pub mod error;
pub mod mock;
pub mod parameter;
pub mod plot;
pub mod rundir;
pub mod sample;
pub mod store;

pub use engine::{run_scan, PlotSpec, ScanConfig, ScanResult, ScanStatus, SweepAxis, TimingPolicy};
pub use error::ScanError;
pub use parameter::Param;
pub use plot::{PlotBridge, RenderSurface};
pub use sample::Sample;
pub use store::{MemoryStore, StoreSink};

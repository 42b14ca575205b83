//! CLI entry point for labscan.
//!
//! Provides a `demo` subcommand that runs a simulated two-dimensional gate
//! sweep against the mock instrument rack, writing a dated run directory the
//! same way a real experiment would. Useful for checking an installation and
//! as a template for wiring up actual hardware.
//!
//! # Usage
//!
//! ```bash
//! labscan demo --outer-points 5 --inner-points 21 --comment cooldown3
//! labscan demo --plot    # native plot window, requires the plot_egui feature
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use labscan::config::Settings;
use labscan::engine::{run_scan, PlotSpec, ScanConfig, SweepAxis};
use labscan::mock::MockRack;
use labscan::plot::{NullSurface, RenderSurface};
use labscan::rundir;
use labscan::store::StoreSink;

#[derive(Parser)]
#[command(name = "labscan")]
#[command(about = "N-dimensional sweep-and-measure engine", long_about = None)]
struct Cli {
    /// Settings file name under config/ (without extension)
    #[arg(long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a simulated 2D gate sweep against the mock rack
    Demo {
        /// Number of points on the outer (gate) axis
        #[arg(long, default_value_t = 5)]
        outer_points: usize,

        /// Number of points on the inner (bias) axis
        #[arg(long, default_value_t = 11)]
        inner_points: usize,

        /// Free-text comment appended to the run directory name
        #[arg(long, default_value = "demo")]
        comment: String,

        /// Open a native plot window (requires the plot_egui feature)
        #[arg(long)]
        plot: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::new(cli.config.as_deref()).context("loading settings")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&settings.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Commands::Demo {
            outer_points,
            inner_points,
            comment,
            plot,
        } => run_demo(
            &settings,
            cli.config.as_deref(),
            outer_points,
            inner_points,
            &comment,
            plot,
        ),
    }
}

fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    if n < 2 {
        return vec![start];
    }
    let step = (stop - start) / (n - 1) as f64;
    (0..n).map(|i| start + step * i as f64).collect()
}

fn run_demo(
    settings: &Settings,
    config_name: Option<&str>,
    outer_points: usize,
    inner_points: usize,
    comment: &str,
    plot: bool,
) -> Result<()> {
    let rack = MockRack::new();
    let gate = rack.source_param("V_gate", "V").with_long_name("Gate voltage");
    let bias = rack.source_param("V_bias", "mV").with_long_name("Bias voltage");
    let heater = rack.source_param("T_set", "K").with_long_name("Setpoint temperature");
    let current = rack
        .readout_param("I_sd", "nA", 0.05, |ch| {
            let vg = ch.get("V_gate").copied().unwrap_or(0.0);
            let vb = ch.get("V_bias").copied().unwrap_or(0.0);
            // A caricature of a pinched-off channel: conductance rises with gate.
            vb * (1.0 + vg).max(0.0)
        })
        .with_long_name("Source-drain current");

    let config = ScanConfig {
        sweep: vec![
            SweepAxis::new(gate, linspace(-1.0, 1.0, outer_points)),
            SweepAxis::new(bias, linspace(0.0, 5.0, inner_points)),
        ],
        constants: vec![(heater, Some(4.2))],
        measured: vec![current],
        plots: vec![PlotSpec::new("I_sd vs V_bias", "V_bias", "I_sd")],
    };

    let suffix = rundir::scan_suffix(&config, comment);
    let run_dir = rundir::create_run_dir(&settings.storage.data_dir, &suffix)?;
    info!(run_dir = %run_dir.display(), "starting demo scan");

    // Keep the settings that drove this run next to the data.
    let settings_file =
        std::path::Path::new("config").join(format!("{}.toml", config_name.unwrap_or("default")));
    if settings_file.is_file() {
        rundir::copy_provenance(&settings_file, &run_dir)?;
    }

    let surface: Box<dyn RenderSurface> = if plot {
        make_plot_surface()?
    } else {
        Box::new(NullSurface::new())
    };

    let mut store = make_store(&run_dir, settings)?;
    let result = run_scan(config, &settings.timing, store.as_mut(), Some(surface))?;

    info!(
        status = %result.status,
        points = result.points_completed,
        lines = result.lines_flushed,
        "demo scan finished"
    );
    println!(
        "{}: {} points, {} lines written to {}",
        result.status,
        result.points_completed,
        result.lines_flushed,
        run_dir.display()
    );
    Ok(())
}

#[cfg(feature = "plot_egui")]
fn make_plot_surface() -> Result<Box<dyn RenderSurface>> {
    Ok(Box::new(labscan::plot::egui::EguiSurface::new(
        "labscan demo",
    )))
}

#[cfg(not(feature = "plot_egui"))]
fn make_plot_surface() -> Result<Box<dyn RenderSurface>> {
    Err(labscan::ScanError::FeatureNotEnabled("plot_egui".to_string()).into())
}

#[cfg(feature = "storage_netcdf")]
fn make_store(
    run_dir: &std::path::Path,
    settings: &Settings,
) -> Result<Box<dyn StoreSink>> {
    let mut store = labscan::store::netcdf::NetcdfStore::new(run_dir);
    if let Some(remote) = &settings.storage.remote_dir {
        store = store.with_mirror(remote);
    }
    Ok(Box::new(store))
}

#[cfg(not(feature = "storage_netcdf"))]
fn make_store(
    _run_dir: &std::path::Path,
    _settings: &Settings,
) -> Result<Box<dyn StoreSink>> {
    Ok(Box::new(labscan::store::MemoryStore::new()))
}

//! netCDF backend for the structured-array store.
//!
//! Produces one `Measdata.nc` per scan: a `main_data` group with a
//! coordinate variable per sweep axis (full range written at creation) and
//! an `f64` data variable per measured parameter, dimensioned
//! `(sweep axes..., <label>_dimK...)` and annotated with `units` /
//! `long_name` attributes where the source parameter provides them. Data
//! variables are NaN-filled at creation, so a partially-written scan reads
//! back cleanly: never-flushed lines are NaN, flushed lines are exact.
//!
//! Each line flush reopens the file in append mode, patches the line's
//! contiguous block in the full array, and writes it back; the file on disk
//! is therefore consistent after every completed innermost line.

use crate::error::ScanError;
use crate::rundir::{self, DATA_FILE_NAME};
use crate::store::{AxisMeta, StoreLayout, StoreSink, VarMeta};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the group holding coordinates and data variables.
pub const MAIN_GROUP: &str = "main_data";

fn nc_err(e: netcdf::Error) -> ScanError {
    ScanError::Storage(e.to_string())
}

/// [`StoreSink`] writing a netCDF file inside a run directory.
pub struct NetcdfStore {
    path: PathBuf,
    run_dir: PathBuf,
    mirror_base: Option<PathBuf>,
    layout: Option<StoreLayout>,
    var_labels: Vec<String>,
    lines_flushed: usize,
}

impl NetcdfStore {
    /// A store that will create `Measdata.nc` in `run_dir` on first use.
    ///
    /// The file is not touched until [`StoreSink::create`], which the engine
    /// calls after the first scan point once every shape is known.
    pub fn new(run_dir: impl Into<PathBuf>) -> Self {
        let run_dir = run_dir.into();
        Self {
            path: run_dir.join(DATA_FILE_NAME),
            run_dir,
            mirror_base: None,
            layout: None,
            var_labels: Vec::new(),
            lines_flushed: 0,
        }
    }

    /// Also mirror the finished run directory under `remote_base`.
    /// Mirroring is best effort; failures are logged, never raised.
    pub fn with_mirror(mut self, remote_base: impl Into<PathBuf>) -> Self {
        self.mirror_base = Some(remote_base.into());
        self
    }

    /// Location of the data file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of innermost lines written to the file so far.
    pub fn lines_flushed(&self) -> usize {
        self.lines_flushed
    }
}

impl StoreSink for NetcdfStore {
    fn create(&mut self, axes: &[AxisMeta], vars: &[VarMeta]) -> Result<(), ScanError> {
        if self.layout.is_some() {
            return Err(ScanError::Storage("store already created".into()));
        }

        let mut file = netcdf::create(&self.path).map_err(nc_err)?;
        let mut group = file.add_group(MAIN_GROUP).map_err(nc_err)?;

        // Coordinate variables carry the full, pre-known sweep ranges.
        for axis in axes {
            group
                .add_dimension(&axis.label, axis.values.len())
                .map_err(nc_err)?;
            let mut coord = group
                .add_variable::<f64>(&axis.label, &[&axis.label])
                .map_err(nc_err)?;
            if let Some(units) = &axis.units {
                coord.put_attribute("units", units.as_str()).map_err(nc_err)?;
            }
            if let Some(long_name) = &axis.long_name {
                coord
                    .put_attribute("long_name", long_name.as_str())
                    .map_err(nc_err)?;
            }
            coord.put_values(&axis.values, ..).map_err(nc_err)?;
        }

        // Data variables: sweep dims then per-variable extra dims, NaN fill.
        for var in vars {
            let mut dim_names: Vec<String> =
                axes.iter().map(|a| a.label.clone()).collect();
            for (k, &len) in var.extra_shape.iter().enumerate() {
                let dim = format!("{}_dim{}", var.label, k);
                group.add_dimension(&dim, len).map_err(nc_err)?;
                dim_names.push(dim);
            }
            let dim_refs: Vec<&str> = dim_names.iter().map(String::as_str).collect();
            let mut data = group
                .add_variable::<f64>(&var.label, &dim_refs)
                .map_err(nc_err)?;
            data.set_fill_value(f64::NAN).map_err(nc_err)?;
            if let Some(units) = &var.units {
                data.put_attribute("units", units.as_str()).map_err(nc_err)?;
            }
            if let Some(long_name) = &var.long_name {
                data.put_attribute("long_name", long_name.as_str())
                    .map_err(nc_err)?;
            }
        }

        self.layout = Some(StoreLayout::new(axes, vars));
        self.var_labels = vars.iter().map(|v| v.label.clone()).collect();
        debug!(path = %self.path.display(), "netCDF store created");
        Ok(())
    }

    fn flush_line(&mut self, line_index: usize, lines: &[Vec<f64>]) -> Result<(), ScanError> {
        let layout = self
            .layout
            .as_ref()
            .ok_or_else(|| ScanError::Storage("flush before create".into()))?;
        layout.check_flush(line_index, lines)?;
        let inner = layout.inner_len();

        let mut file = netcdf::append(&self.path).map_err(nc_err)?;
        let mut group = file
            .group_mut(MAIN_GROUP)
            .map_err(nc_err)?
            .ok_or_else(|| ScanError::Storage(format!("group '{MAIN_GROUP}' missing")))?;

        for ((label, line), &sample_len) in self
            .var_labels
            .iter()
            .zip(lines)
            .zip(&layout.sample_lens)
        {
            let mut var = group
                .variable_mut(label)
                .ok_or_else(|| ScanError::Storage(format!("variable '{label}' missing")))?;
            // Read-modify-write of the whole array; the line's block is
            // contiguous in row-major order.
            let mut all: Vec<f64> = var.get_values(..).map_err(nc_err)?;
            let offset = line_index * inner * sample_len;
            all[offset..offset + line.len()].copy_from_slice(line);
            var.put_values(&all, ..).map_err(nc_err)?;
        }
        self.lines_flushed += 1;
        debug!(line_index, "line written to netCDF store");
        Ok(())
    }

    fn finish(&mut self) -> Result<(), ScanError> {
        // The file is closed after every flush; only mirroring remains.
        if let Some(remote) = &self.mirror_base {
            rundir::mirror_run_dir(&self.run_dir, remote);
        }
        Ok(())
    }
}

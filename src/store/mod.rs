//! Incremental structured-array persistence.
//!
//! A scan produces one self-describing array file: a coordinate variable per
//! sweep axis (full range, written once at creation) and a data variable per
//! measured parameter shaped `(sweep axes..., extra dims of that
//! parameter...)`. Data arrives one innermost line at a time and is written
//! in place, so a scan interrupted at step `k` leaves a valid file holding
//! exactly the lines completed before `k`.
//!
//! [`StoreSink`] is the engine-facing contract. [`MemoryStore`] implements
//! it against in-memory arrays for tests and headless demos;
//! [`netcdf::NetcdfStore`](crate::store::netcdf::NetcdfStore) persists to a
//! netCDF file when the `storage_netcdf` feature is enabled.

use crate::error::ScanError;

#[cfg(feature = "storage_netcdf")]
pub mod netcdf;

/// Creation-time description of one sweep axis.
#[derive(Debug, Clone)]
pub struct AxisMeta {
    /// Axis label, doubling as the dimension and coordinate-variable name.
    pub label: String,
    /// Unit attribute, if the parameter carries one.
    pub units: Option<String>,
    /// Description attribute, if the parameter carries one.
    pub long_name: Option<String>,
    /// Full pre-known coordinate range.
    pub values: Vec<f64>,
}

/// Creation-time description of one measured variable.
///
/// Shapes are fixed from the runtime-observed first reading; every
/// subsequent write must match.
#[derive(Debug, Clone)]
pub struct VarMeta {
    /// Variable name.
    pub label: String,
    /// Unit attribute, if the parameter carries one.
    pub units: Option<String>,
    /// Description attribute, if the parameter carries one.
    pub long_name: Option<String>,
    /// Per-reading dimensions beyond the sweep dimensions (empty for
    /// scalars).
    pub extra_shape: Vec<usize>,
}

impl VarMeta {
    /// Elements per reading.
    pub fn sample_len(&self) -> usize {
        self.extra_shape.iter().product()
    }
}

/// Sink for incrementally persisted scan data.
///
/// Call sequence: `create` exactly once (after the first scan point, when
/// every variable's shape is known), then `flush_line` once per completed
/// innermost line in any order, then `finish` once. Lines are indexed by
/// their row-major position over the outer axes; line `i` covers flat scan
/// indices `i * inner_len .. (i + 1) * inner_len`.
pub trait StoreSink: Send {
    /// Create the backing file and write the coordinate variables.
    fn create(&mut self, axes: &[AxisMeta], vars: &[VarMeta]) -> Result<(), ScanError>;

    /// Write one completed innermost line for every variable.
    ///
    /// `lines[v]` is the flattened buffer for variable `v`:
    /// `inner_len * vars[v].sample_len()` values in row-major order.
    fn flush_line(&mut self, line_index: usize, lines: &[Vec<f64>]) -> Result<(), ScanError>;

    /// Sync the file and run any best-effort post-processing (mirroring).
    fn finish(&mut self) -> Result<(), ScanError>;
}

/// Dimension layout shared by the store backends.
#[derive(Debug, Clone)]
pub(crate) struct StoreLayout {
    /// Length of every sweep axis, outermost first.
    pub sweep_lens: Vec<usize>,
    /// Elements per reading for every variable.
    pub sample_lens: Vec<usize>,
}

impl StoreLayout {
    pub fn new(axes: &[AxisMeta], vars: &[VarMeta]) -> Self {
        Self {
            sweep_lens: axes.iter().map(|a| a.values.len()).collect(),
            sample_lens: vars.iter().map(VarMeta::sample_len).collect(),
        }
    }

    /// Innermost (fastest-varying) axis length.
    pub fn inner_len(&self) -> usize {
        self.sweep_lens.last().copied().unwrap_or(1)
    }

    /// Number of innermost lines in the whole scan.
    pub fn line_count(&self) -> usize {
        self.sweep_lens[..self.sweep_lens.len().saturating_sub(1)]
            .iter()
            .product()
    }

    /// Validate a `flush_line` call against the locked-in layout.
    pub fn check_flush(&self, line_index: usize, lines: &[Vec<f64>]) -> Result<(), ScanError> {
        if line_index >= self.line_count() {
            return Err(ScanError::Storage(format!(
                "line index {} out of range (scan has {} lines)",
                line_index,
                self.line_count()
            )));
        }
        if lines.len() != self.sample_lens.len() {
            return Err(ScanError::Storage(format!(
                "flush carries {} variables, store was created with {}",
                lines.len(),
                self.sample_lens.len()
            )));
        }
        for (line, &sample_len) in lines.iter().zip(&self.sample_lens) {
            let expected = self.inner_len() * sample_len;
            if line.len() != expected {
                return Err(ScanError::Storage(format!(
                    "line buffer holds {} values, expected {}",
                    line.len(),
                    expected
                )));
            }
        }
        Ok(())
    }
}

/// In-memory [`StoreSink`] holding NaN-filled full-size arrays.
///
/// Used by the engine tests and the headless demo; never-flushed regions
/// read back as NaN, mirroring the netCDF backend's fill value.
#[derive(Debug, Default)]
pub struct MemoryStore {
    axes: Vec<AxisMeta>,
    vars: Vec<VarMeta>,
    arrays: Vec<Vec<f64>>,
    layout: Option<StoreLayout>,
    lines_flushed: usize,
    finished: bool,
}

impl MemoryStore {
    /// An empty, not-yet-created store.
    pub fn new() -> Self {
        Self::default()
    }

    /// True once `create` ran.
    pub fn is_created(&self) -> bool {
        self.layout.is_some()
    }

    /// Number of `flush_line` calls accepted.
    pub fn lines_flushed(&self) -> usize {
        self.lines_flushed
    }

    /// True once `finish` ran.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Coordinate values of the named axis.
    pub fn coord(&self, label: &str) -> Option<&[f64]> {
        self.axes
            .iter()
            .find(|a| a.label == label)
            .map(|a| a.values.as_slice())
    }

    /// Flat row-major contents of the named variable.
    pub fn values(&self, label: &str) -> Option<&[f64]> {
        self.vars
            .iter()
            .position(|v| v.label == label)
            .map(|i| self.arrays[i].as_slice())
    }

    /// Full shape of the named variable: sweep dims then extra dims.
    pub fn shape(&self, label: &str) -> Option<Vec<usize>> {
        let layout = self.layout.as_ref()?;
        let var = self.vars.iter().find(|v| v.label == label)?;
        let mut shape = layout.sweep_lens.clone();
        shape.extend_from_slice(&var.extra_shape);
        Some(shape)
    }

    /// Metadata of the named variable.
    pub fn var_meta(&self, label: &str) -> Option<&VarMeta> {
        self.vars.iter().find(|v| v.label == label)
    }
}

impl StoreSink for MemoryStore {
    fn create(&mut self, axes: &[AxisMeta], vars: &[VarMeta]) -> Result<(), ScanError> {
        if self.layout.is_some() {
            return Err(ScanError::Storage("store already created".into()));
        }
        let layout = StoreLayout::new(axes, vars);
        let total: usize = layout.sweep_lens.iter().product();
        self.arrays = layout
            .sample_lens
            .iter()
            .map(|&n| vec![f64::NAN; total * n])
            .collect();
        self.axes = axes.to_vec();
        self.vars = vars.to_vec();
        self.layout = Some(layout);
        Ok(())
    }

    fn flush_line(&mut self, line_index: usize, lines: &[Vec<f64>]) -> Result<(), ScanError> {
        let layout = self
            .layout
            .as_ref()
            .ok_or_else(|| ScanError::Storage("flush before create".into()))?;
        layout.check_flush(line_index, lines)?;
        let inner = layout.inner_len();
        for (array, (line, &sample_len)) in self
            .arrays
            .iter_mut()
            .zip(lines.iter().zip(&layout.sample_lens))
        {
            let offset = line_index * inner * sample_len;
            array[offset..offset + line.len()].copy_from_slice(line);
        }
        self.lines_flushed += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), ScanError> {
        self.finished = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axes_2x3() -> Vec<AxisMeta> {
        vec![
            AxisMeta {
                label: "x".into(),
                units: Some("V".into()),
                long_name: None,
                values: vec![0.0, 1.0],
            },
            AxisMeta {
                label: "y".into(),
                units: None,
                long_name: None,
                values: vec![5.0, 6.0, 7.0],
            },
        ]
    }

    fn scalar_var(label: &str) -> VarMeta {
        VarMeta {
            label: label.into(),
            units: None,
            long_name: None,
            extra_shape: Vec::new(),
        }
    }

    #[test]
    fn layout_counts_lines_over_the_outer_axes() {
        let layout = StoreLayout::new(
            &[
                AxisMeta {
                    label: "a".into(),
                    units: None,
                    long_name: None,
                    values: vec![0.0, 1.0],
                },
                AxisMeta {
                    label: "b".into(),
                    units: None,
                    long_name: None,
                    values: vec![0.0, 1.0, 2.0],
                },
                AxisMeta {
                    label: "c".into(),
                    units: None,
                    long_name: None,
                    values: vec![0.0; 4],
                },
            ],
            &[],
        );
        assert_eq!(layout.inner_len(), 4);
        assert_eq!(layout.line_count(), 6);
    }

    #[test]
    fn flush_writes_at_line_offset_and_leaves_nan_elsewhere() {
        let mut store = MemoryStore::new();
        store.create(&axes_2x3(), &[scalar_var("m")]).unwrap();

        store.flush_line(1, &[vec![10.0, 11.0, 12.0]]).unwrap();

        let values = store.values("m").unwrap();
        assert!(values[0..3].iter().all(|v| v.is_nan()));
        assert_eq!(&values[3..6], &[10.0, 11.0, 12.0]);
        assert_eq!(store.lines_flushed(), 1);
        assert_eq!(store.shape("m"), Some(vec![2, 3]));
    }

    #[test]
    fn flush_with_wrong_line_length_is_rejected() {
        let mut store = MemoryStore::new();
        store.create(&axes_2x3(), &[scalar_var("m")]).unwrap();
        let err = store.flush_line(0, &[vec![1.0, 2.0]]).unwrap_err();
        assert!(matches!(err, ScanError::Storage(_)));
        // Prior content untouched.
        assert!(store.values("m").unwrap().iter().all(|v| v.is_nan()));
    }

    #[test]
    fn double_create_is_rejected() {
        let mut store = MemoryStore::new();
        store.create(&axes_2x3(), &[scalar_var("m")]).unwrap();
        assert!(store.create(&axes_2x3(), &[scalar_var("m")]).is_err());
    }

    #[test]
    fn array_variable_carries_extra_dims() {
        let mut store = MemoryStore::new();
        let var = VarMeta {
            label: "frame".into(),
            units: Some("counts".into()),
            long_name: Some("Detector frame".into()),
            extra_shape: vec![2],
        };
        store.create(&axes_2x3(), &[var]).unwrap();
        assert_eq!(store.shape("frame"), Some(vec![2, 3, 2]));

        store
            .flush_line(0, &[vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]])
            .unwrap();
        assert_eq!(&store.values("frame").unwrap()[0..6], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }
}

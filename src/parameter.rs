//! `Param` - a named, unit-tagged handle around an instrument quantity.
//!
//! A `Param` wraps an optional getter and an optional setter closure together
//! with a cached last value. It generalizes "named gettable/settable
//! quantity" across otherwise unrelated instruments: a source-measure unit
//! voltage, a rotation-stage angle, and a spectrometer frame all present the
//! same surface to the scan engine.
//!
//! `measure()` deliberately returns nothing: it triggers a read and caches
//! the result, and multiple consumers (live plot, store) then read the same
//! cached sample without re-triggering hardware I/O.
//!
//! # Example
//!
//! ```rust,ignore
//! use labscan::parameter::Param;
//! use labscan::sample::Sample;
//!
//! let mut gate = Param::new("V_gate")
//!     .with_units("V")
//!     .with_long_name("Back-gate voltage")
//!     .with_setter(move |v| smu.set_voltage(v))
//!     .with_getter(move || Ok(Sample::scalar(smu.get_voltage()?)));
//!
//! gate.set(1.5)?;
//! gate.measure()?;
//! let v = gate.last_value().and_then(|s| s.as_scalar());
//! ```

use crate::error::ScanError;
use crate::sample::Sample;
use tracing::debug;

/// Hardware read closure. Mutable so drivers can keep per-handle state.
pub type Getter = Box<dyn FnMut() -> anyhow::Result<Sample> + Send>;
/// Hardware write closure.
pub type Setter = Box<dyn FnMut(f64) -> anyhow::Result<()> + Send>;

/// A named, unit-tagged gettable/settable quantity.
///
/// Created once at configuration time and mutated throughout a scan. The
/// cached `last_value` is owned exclusively by the `Param` and changes only
/// through [`Param::measure`], [`Param::set`], or [`Param::set_constant`].
pub struct Param {
    label: String,
    units: Option<String>,
    long_name: Option<String>,
    getter: Option<Getter>,
    setter: Option<Setter>,
    last_value: Option<Sample>,
    constant: Option<f64>,
}

impl Param {
    /// Create a parameter with neither getter nor setter attached.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            units: None,
            long_name: None,
            getter: None,
            setter: None,
            last_value: None,
            constant: None,
        }
    }

    /// Unit of measurement (e.g. "V", "nA", "deg").
    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }

    /// Human-readable description, stored as file metadata.
    pub fn with_long_name(mut self, long_name: impl Into<String>) -> Self {
        self.long_name = Some(long_name.into());
        self
    }

    /// Attach a hardware read function.
    pub fn with_getter(
        mut self,
        getter: impl FnMut() -> anyhow::Result<Sample> + Send + 'static,
    ) -> Self {
        self.getter = Some(Box::new(getter));
        self
    }

    /// Attach a hardware write function.
    pub fn with_setter(
        mut self,
        setter: impl FnMut(f64) -> anyhow::Result<()> + Send + 'static,
    ) -> Self {
        self.setter = Some(Box::new(setter));
        self
    }

    /// Parameter label (unique within a scan).
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Unit string, if any.
    pub fn units(&self) -> Option<&str> {
        self.units.as_deref()
    }

    /// Long description, if any.
    pub fn long_name(&self) -> Option<&str> {
        self.long_name.as_deref()
    }

    /// True if a getter is attached (required for measured parameters).
    pub fn has_getter(&self) -> bool {
        self.getter.is_some()
    }

    /// True if a setter is attached (required for sweep axes).
    pub fn has_setter(&self) -> bool {
        self.setter.is_some()
    }

    /// The most recently measured or set value.
    pub fn last_value(&self) -> Option<&Sample> {
        self.last_value.as_ref()
    }

    /// Trigger a fresh hardware read and cache the result.
    ///
    /// Always overwrites the cache with a new getter call; it never returns
    /// a stale reading. Consumers pick the value up via
    /// [`Param::last_value`].
    pub fn measure(&mut self) -> Result<(), ScanError> {
        let getter = self
            .getter
            .as_mut()
            .ok_or_else(|| ScanError::MissingGetter(self.label.clone()))?;
        let sample = getter().map_err(|source| ScanError::Hardware {
            label: self.label.clone(),
            source,
        })?;
        self.last_value = Some(sample);
        Ok(())
    }

    /// Write `value` to hardware, then cache it.
    ///
    /// Serializing concurrent hardware access is the caller's responsibility;
    /// the scan engine issues all sets and reads from a single thread.
    pub fn set(&mut self, value: f64) -> Result<(), ScanError> {
        let setter = self
            .setter
            .as_mut()
            .ok_or_else(|| ScanError::MissingSetter(self.label.clone()))?;
        setter(value).map_err(|source| ScanError::Hardware {
            label: self.label.clone(),
            source,
        })?;
        self.last_value = Some(Sample::scalar(value));
        Ok(())
    }

    /// Establish or re-apply this parameter's constant value.
    ///
    /// - With `Some(value)`: store it as the constant and `set` it.
    /// - With `None` and a stored constant: re-apply the stored constant
    ///   (same hardware write both times, no drift).
    /// - With `None`, no stored constant, and only a getter: read the
    ///   current value and adopt it as the constant. This covers read-only
    ///   quantities such as a cryostat temperature folded into the constant
    ///   list for book-keeping.
    pub fn set_constant(&mut self, value: Option<f64>) -> Result<(), ScanError> {
        if let Some(v) = value {
            self.constant = Some(v);
            if self.setter.is_some() {
                self.set(v)?;
            } else {
                self.last_value = Some(Sample::scalar(v));
            }
        } else if let (Some(c), true) = (self.constant, self.setter.is_some()) {
            self.set(c)?;
        } else if self.getter.is_some() {
            self.measure()?;
            self.constant = self.last_value.as_ref().and_then(Sample::as_scalar);
            debug!(
                param = %self.label,
                value = ?self.constant,
                "adopted current reading as constant"
            );
        } else {
            return Err(ScanError::ConstantUnset(self.label.clone()));
        }
        Ok(())
    }

    /// The stored constant value, if one was established.
    pub fn constant(&self) -> Option<f64> {
        self.constant
    }

    /// Label decorated with units, for plot axes: `V_gate (V)`.
    pub fn axis_label(&self) -> String {
        match &self.units {
            Some(u) => format!("{} ({})", self.label, u),
            None => self.label.clone(),
        }
    }
}

impl std::fmt::Debug for Param {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Param")
            .field("label", &self.label)
            .field("units", &self.units)
            .field("has_getter", &self.getter.is_some())
            .field("has_setter", &self.setter.is_some())
            .field("last_value", &self.last_value)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    fn shared_register() -> (Arc<AtomicU64>, Param) {
        let reg = Arc::new(AtomicU64::new(0));
        let r = reg.clone();
        let w = reg.clone();
        let param = Param::new("dac")
            .with_units("mV")
            .with_getter(move || Ok(Sample::scalar(r.load(Ordering::SeqCst) as f64)))
            .with_setter(move |v| {
                w.store(v as u64, Ordering::SeqCst);
                Ok(())
            });
        (reg, param)
    }

    #[test]
    fn measure_reflects_fresh_hardware_state() {
        let (reg, mut param) = shared_register();

        reg.store(5, Ordering::SeqCst);
        param.measure().unwrap();
        assert_eq!(param.last_value().unwrap().as_scalar(), Some(5.0));

        // Hardware changes behind the parameter's back; a second measure
        // must not return the cached 5.
        reg.store(9, Ordering::SeqCst);
        param.measure().unwrap();
        assert_eq!(param.last_value().unwrap().as_scalar(), Some(9.0));
    }

    #[test]
    fn set_writes_hardware_and_caches() {
        let (reg, mut param) = shared_register();
        param.set(250.0).unwrap();
        assert_eq!(reg.load(Ordering::SeqCst), 250);
        assert_eq!(param.last_value().unwrap().as_scalar(), Some(250.0));
    }

    #[test]
    fn measure_without_getter_fails() {
        let mut param = Param::new("write_only").with_setter(|_| Ok(()));
        assert!(matches!(
            param.measure(),
            Err(ScanError::MissingGetter(label)) if label == "write_only"
        ));
    }

    #[test]
    fn set_without_setter_fails() {
        let mut param = Param::new("read_only").with_getter(|| Ok(Sample::scalar(0.0)));
        assert!(matches!(
            param.set(1.0),
            Err(ScanError::MissingSetter(label)) if label == "read_only"
        ));
    }

    #[test]
    fn constant_reapplies_same_value() {
        let writes = Arc::new(AtomicU64::new(0));
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let w = writes.clone();
        let l = log.clone();
        let mut param = Param::new("heater").with_setter(move |v| {
            w.fetch_add(1, Ordering::SeqCst);
            l.lock().unwrap().push(v);
            Ok(())
        });

        param.set_constant(Some(4.2)).unwrap();
        param.set_constant(None).unwrap();
        param.set_constant(None).unwrap();

        assert_eq!(writes.load(Ordering::SeqCst), 3);
        assert_eq!(log.lock().unwrap().as_slice(), &[4.2, 4.2, 4.2]);
    }

    #[test]
    fn constant_adopted_from_getter_for_read_only_param() {
        let mut sensor = Param::new("T_sample")
            .with_units("K")
            .with_getter(|| Ok(Sample::scalar(1.6)));
        sensor.set_constant(None).unwrap();
        assert_eq!(sensor.constant(), Some(1.6));
        assert_eq!(sensor.last_value().unwrap().as_scalar(), Some(1.6));
    }

    #[test]
    fn constant_without_any_source_fails() {
        let mut bare = Param::new("nothing");
        assert!(matches!(
            bare.set_constant(None),
            Err(ScanError::ConstantUnset(label)) if label == "nothing"
        ));
    }

    #[test]
    fn hardware_error_propagates_with_label() {
        let mut param =
            Param::new("flaky").with_getter(|| Err(anyhow::anyhow!("bus timeout")));
        match param.measure() {
            Err(ScanError::Hardware { label, source }) => {
                assert_eq!(label, "flaky");
                assert!(source.to_string().contains("bus timeout"));
            }
            other => panic!("expected hardware error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn axis_label_includes_units() {
        let p = Param::new("angle").with_units("deg");
        assert_eq!(p.axis_label(), "angle (deg)");
        assert_eq!(Param::new("bare").axis_label(), "bare");
    }
}

//! A single reading from a measured parameter.

/// One reading: a scalar or an N-dimensional frame, stored flat in row-major
/// order.
///
/// Most parameters (voltages, powers, temperatures) produce scalars, where
/// `shape` is empty and `data` holds one element. Richer instruments such as
/// a spectrometer CCD produce frames with one or more extra dimensions; the
/// store appends those dimensions after the sweep dimensions.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl Sample {
    /// A scalar reading.
    pub fn scalar(value: f64) -> Self {
        Self {
            shape: Vec::new(),
            data: vec![value],
        }
    }

    /// A shaped reading from row-major data.
    ///
    /// # Panics
    ///
    /// Panics if `data.len()` does not equal the product of `shape` (an empty
    /// shape means scalar, product 1). Readings are built by instrument
    /// closures at configuration time, so a mismatch is a programming error.
    pub fn array(shape: Vec<usize>, data: Vec<f64>) -> Self {
        let expected: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            expected,
            "sample data length {} does not match shape {:?}",
            data.len(),
            shape
        );
        Self { shape, data }
    }

    /// Extra dimensions of this reading beyond the sweep dimensions.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of elements per reading.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True for a zero-element frame (possible when a shape axis is 0).
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Flat row-major data.
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// The value, if this reading is a scalar.
    pub fn as_scalar(&self) -> Option<f64> {
        if self.shape.is_empty() {
            self.data.first().copied()
        } else {
            None
        }
    }
}

impl From<f64> for Sample {
    fn from(value: f64) -> Self {
        Sample::scalar(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_roundtrip() {
        let s = Sample::scalar(3.5);
        assert!(s.shape().is_empty());
        assert_eq!(s.len(), 1);
        assert_eq!(s.as_scalar(), Some(3.5));
    }

    #[test]
    fn array_sample_is_not_scalar() {
        let s = Sample::array(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(s.shape(), &[2, 2]);
        assert_eq!(s.len(), 4);
        assert_eq!(s.as_scalar(), None);
    }

    #[test]
    #[should_panic]
    fn mismatched_shape_panics() {
        let _ = Sample::array(vec![3], vec![1.0, 2.0]);
    }
}

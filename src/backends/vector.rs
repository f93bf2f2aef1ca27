/// Contiguous f64 storage that compiled expressions can read inputs from and
/// write batch results to.
///
/// Implemented for `Vec<f64>`, fixed-size arrays, and behind the `ndarray` and
/// `nalgebra` features for `Array1<f64>` and `DVector<f64>`.
///
/// # Examples
///
/// ```rust
/// use exprc_jit::prelude::*;
///
/// let f = compile("x0 + x1", 2).unwrap();
/// assert_eq!(f.eval(&vec![1.0, 2.0]).unwrap(), 3.0);
///
/// let mut out = <[f64; 2]>::zeros(2);
/// f.evaluate_batch_into(&[1.0, 2.0, 3.0, 4.0], &mut out).unwrap();
/// assert_eq!(out, [3.0, 7.0]);
/// ```
pub trait Vector {
    /// The values as one contiguous slice.
    fn as_slice(&self) -> &[f64];

    fn as_mut_slice(&mut self) -> &mut [f64];

    /// Creates a vector of `len` zeros.
    fn zeros(len: usize) -> Self;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Vector for Vec<f64> {
    fn as_slice(&self) -> &[f64] {
        self
    }

    fn as_mut_slice(&mut self) -> &mut [f64] {
        self
    }

    fn zeros(len: usize) -> Self {
        vec![0.0; len]
    }

    fn len(&self) -> usize {
        self.len()
    }
}

/// Arrays whose memory is not in standard order present as empty slices, so a
/// compiled function rejects them with a length error instead of reading
/// strided memory.
///
/// ```rust
/// use exprc_jit::prelude::*;
/// use ndarray::array;
///
/// let f = compile("x0 * x1", 2).unwrap();
/// assert_eq!(f.eval(&array![3.0, 4.0]).unwrap(), 12.0);
/// ```
#[cfg(feature = "ndarray")]
impl Vector for ndarray::Array1<f64> {
    fn as_slice(&self) -> &[f64] {
        ndarray::Array1::as_slice(self).unwrap_or(&[])
    }

    fn as_mut_slice(&mut self) -> &mut [f64] {
        self.as_slice_mut().unwrap_or(&mut [])
    }

    fn zeros(len: usize) -> Self {
        ndarray::Array1::zeros(len)
    }

    fn len(&self) -> usize {
        ndarray::Array1::len(self)
    }
}

/// ```rust
/// use exprc_jit::prelude::*;
/// use nalgebra::DVector;
///
/// let f = compile("x0 - x1", 2).unwrap();
/// assert_eq!(f.eval(&DVector::from_vec(vec![5.0, 3.0])).unwrap(), 2.0);
/// ```
#[cfg(feature = "nalgebra")]
impl Vector for nalgebra::DVector<f64> {
    fn as_slice(&self) -> &[f64] {
        nalgebra::DVector::as_slice(self)
    }

    fn as_mut_slice(&mut self) -> &mut [f64] {
        nalgebra::DVector::as_mut_slice(self)
    }

    fn zeros(len: usize) -> Self {
        nalgebra::DVector::zeros(len)
    }

    fn len(&self) -> usize {
        nalgebra::DVector::len(self)
    }
}

impl<const N: usize> Vector for [f64; N] {
    fn as_slice(&self) -> &[f64] {
        self
    }

    fn as_mut_slice(&mut self) -> &mut [f64] {
        self
    }

    /// # Panics
    /// Panics if `len` is not `N`.
    fn zeros(len: usize) -> Self {
        assert_eq!(len, N, "Array length must match const generic size");
        [0.0; N]
    }

    fn len(&self) -> usize {
        N
    }
}

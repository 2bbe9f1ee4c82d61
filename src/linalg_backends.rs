// src/linalg_backends.rs

use ndarray::Array2;
use std::marker::PhantomData;

use crate::error::ThreadSafeStdError;

/// Dispatches factorisations to the backend selected by feature flags.
#[derive(Debug, Default, Copy, Clone)]
pub struct LinAlgBackendProvider<F: 'static + Copy + Send + Sync> {
    _phantom: PhantomData<F>,
}

impl<F: 'static + Copy + Send + Sync> LinAlgBackendProvider<F> {
    pub fn new() -> Self {
        Self { _phantom: PhantomData }
    }
}

// --- Trait Definitions ---

/// Trait for the Cholesky factorisation of a symmetric positive definite matrix.
/// Implementers read the lower triangle of `matrix` and return the lower
/// factor `L` with `L L^T = matrix` and zeros above the diagonal.
pub trait BackendCholesky<F: 'static + Copy + Send + Sync> {
    fn cholesky_lower(&self, matrix: &Array2<F>) -> Result<Array2<F>, ThreadSafeStdError>;
}

// --- NdarrayLinAlgBackend Implementation ---
use ndarray_linalg::{Cholesky as NdLinalgCholesky, UPLO};

#[derive(Debug, Default, Copy, Clone)]
pub struct NdarrayLinAlgBackend;

// Helper to convert ndarray-linalg's error to Box<dyn Error + Send + Sync>
fn to_dyn_error<E: std::error::Error + Send + Sync + 'static>(e: E) -> ThreadSafeStdError {
    Box::new(e)
}

impl BackendCholesky<f64> for NdarrayLinAlgBackend {
    fn cholesky_lower(&self, matrix: &Array2<f64>) -> Result<Array2<f64>, ThreadSafeStdError> {
        if matrix.nrows() != matrix.ncols() {
            return Err(format!(
                "Matrix must be square for Cholesky factorisation, got {}x{}.",
                matrix.nrows(),
                matrix.ncols()
            )
            .into());
        }
        if matrix.is_empty() {
            return Ok(Array2::zeros((0, 0)));
        }
        matrix.cholesky(UPLO::Lower).map_err(to_dyn_error)
    }
}

// --- FaerLinAlgBackend Implementation ---
#[cfg(feature = "backend_faer")]
mod faer_specific_code {
    use super::BackendCholesky;
    use crate::error::ThreadSafeStdError;
    use faer::{Mat, Side};
    use ndarray::Array2;

    #[derive(Debug, Default, Copy, Clone)]
    pub struct FaerLinAlgBackend;

    impl BackendCholesky<f64> for FaerLinAlgBackend {
        fn cholesky_lower(&self, matrix: &Array2<f64>) -> Result<Array2<f64>, ThreadSafeStdError> {
            let (nrows, ncols) = matrix.dim();
            if nrows != ncols {
                return Err(format!(
                    "Matrix must be square for Cholesky factorisation, got {}x{}.",
                    nrows, ncols
                )
                .into());
            }
            if nrows == 0 {
                return Ok(Array2::zeros((0, 0)));
            }
            // Copy so faer sees a contiguous column-major matrix regardless of the ndarray layout.
            let faer_mat = Mat::<f64>::from_fn(nrows, ncols, |i, j| matrix[[i, j]]);
            let llt = faer_mat
                .as_ref()
                .llt(Side::Lower)
                .map_err(|e| format!("Faer Cholesky factorisation failed: {:?}", e))?;
            let lower = llt.L();
            Ok(Array2::from_shape_fn((nrows, ncols), |(i, j)| {
                if j <= i {
                    unsafe { *lower.get_unchecked(i, j) }
                } else {
                    0.0
                }
            }))
        }
    }
}

// --- Implement BackendCholesky for Provider ---
#[cfg(feature = "backend_faer")]
impl<F> BackendCholesky<F> for LinAlgBackendProvider<F>
where
    F: 'static + Copy + Send + Sync,
    NdarrayLinAlgBackend: BackendCholesky<F>,
    faer_specific_code::FaerLinAlgBackend: BackendCholesky<F>,
{
    fn cholesky_lower(&self, matrix: &Array2<F>) -> Result<Array2<F>, ThreadSafeStdError> {
        faer_specific_code::FaerLinAlgBackend.cholesky_lower(matrix)
    }
}

#[cfg(not(feature = "backend_faer"))]
impl<F> BackendCholesky<F> for LinAlgBackendProvider<F>
where
    F: 'static + Copy + Send + Sync,
    NdarrayLinAlgBackend: BackendCholesky<F>,
{
    fn cholesky_lower(&self, matrix: &Array2<F>) -> Result<Array2<F>, ThreadSafeStdError> {
        NdarrayLinAlgBackend.cholesky_lower(matrix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_cholesky_reconstructs_input() {
        let a = array![[4.0, 2.0, 0.6], [2.0, 5.0, 1.0], [0.6, 1.0, 3.0]];
        let backend = LinAlgBackendProvider::<f64>::new();
        let l = backend.cholesky_lower(&a).unwrap();
        for i in 0..3 {
            for j in (i + 1)..3 {
                assert_eq!(l[[i, j]], 0.0, "upper triangle must be zero at ({}, {})", i, j);
            }
        }
        let reconstructed = l.dot(&l.t());
        for (x, y) in reconstructed.iter().zip(a.iter()) {
            assert_abs_diff_eq!(*x, *y, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_cholesky_rejects_indefinite_matrix() {
        let a = array![[1.0, 2.0], [2.0, 1.0]];
        let backend = LinAlgBackendProvider::<f64>::new();
        assert!(backend.cholesky_lower(&a).is_err());
    }

    #[test]
    fn test_cholesky_rejects_non_square() {
        let a = Array2::<f64>::zeros((2, 3));
        assert!(NdarrayLinAlgBackend.cholesky_lower(&a).is_err());
    }

    #[test]
    fn test_cholesky_of_empty_matrix_is_empty() {
        let a = Array2::<f64>::zeros((0, 0));
        let l = NdarrayLinAlgBackend.cholesky_lower(&a).unwrap();
        assert_eq!(l.dim(), (0, 0));
    }
}

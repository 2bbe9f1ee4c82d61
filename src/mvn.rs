//! Multivariate normal draws parameterised by a precision matrix.

use log::warn;
use ndarray::{Array1, Array2, ArrayView1};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::config::SamplerConfig;
use crate::error::{EqtlError, Result};
use crate::linalg_backends::BackendCholesky;

/// Draws `x ~ N(A^-1 b, A^-1)` for a symmetric positive definite precision `A`.
///
/// With `A = L L^T` the draw is `L^-T (L^-1 b + z)` where `z ~ N(0, I)`, so a
/// single factorisation serves both the mean and the noise.
///
/// # Errors
/// Returns [`EqtlError::NotPositiveDefinite`] when `A` cannot be factorised
/// (after the jitter retries allowed by `config`), and
/// [`EqtlError::InvalidConfiguration`] on a dimension mismatch.
pub fn sample_multivariate_normal<R, B>(
    b: ArrayView1<f64>,
    precision: &Array2<f64>,
    backend: &B,
    config: &SamplerConfig,
    rng: &mut R,
) -> Result<Array1<f64>>
where
    R: Rng + ?Sized,
    B: BackendCholesky<f64>,
{
    let dim = b.len();
    if precision.dim() != (dim, dim) {
        return Err(EqtlError::InvalidConfiguration(format!(
            "precision matrix is {:?} but the linear term has length {}",
            precision.dim(),
            dim
        )));
    }
    if dim == 0 {
        return Ok(Array1::zeros(0));
    }

    let lower = cholesky_with_jitter(precision, backend, config)?;

    let mut shifted = forward_solve_lower(&lower, b);
    for value in shifted.iter_mut() {
        let z: f64 = rng.sample(StandardNormal);
        *value += z;
    }
    Ok(back_solve_lower_transpose(&lower, shifted.view()))
}

/// Factorises `precision`, retrying with a growing diagonal jitter if allowed.
fn cholesky_with_jitter<B: BackendCholesky<f64>>(
    precision: &Array2<f64>,
    backend: &B,
    config: &SamplerConfig,
) -> Result<Array2<f64>> {
    let dim = precision.nrows();
    let mut last_error = match backend.cholesky_lower(precision) {
        Ok(lower) => return Ok(lower),
        Err(e) => e,
    };

    let diag_scale = precision.diag().mapv(f64::abs).mean().unwrap_or(1.0).max(f64::MIN_POSITIVE);
    let mut jitter = config.initial_jitter;
    for attempt in 1..=config.jitter_retries {
        warn!(
            "Cholesky factorisation of {}x{} precision failed; retry {} of {} with jitter {:e}.",
            dim, dim, attempt, config.jitter_retries, jitter
        );
        let mut jittered = precision.clone();
        jittered.diag_mut().mapv_inplace(|d| d + jitter * diag_scale);
        match backend.cholesky_lower(&jittered) {
            Ok(lower) => return Ok(lower),
            Err(e) => last_error = e,
        }
        jitter *= 10.0;
    }

    Err(EqtlError::NotPositiveDefinite {
        dim,
        source: last_error,
    })
}

/// Solves `L y = rhs` for lower triangular `L`.
pub(crate) fn forward_solve_lower(lower: &Array2<f64>, rhs: ArrayView1<f64>) -> Array1<f64> {
    let n = rhs.len();
    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut acc = rhs[i];
        for k in 0..i {
            acc -= lower[[i, k]] * y[k];
        }
        y[i] = acc / lower[[i, i]];
    }
    y
}

/// Solves `L^T x = rhs` for lower triangular `L`.
pub(crate) fn back_solve_lower_transpose(lower: &Array2<f64>, rhs: ArrayView1<f64>) -> Array1<f64> {
    let n = rhs.len();
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut acc = rhs[i];
        for k in (i + 1)..n {
            acc -= lower[[k, i]] * x[k];
        }
        x[i] = acc / lower[[i, i]];
    }
    x
}

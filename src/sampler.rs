//! Full-conditional draws of the Normal shrinkage model.
//!
//! Given the sufficient statistics of the active markers, one Gibbs step draws
//! the residual precision `tau`, then the coefficients `beta` from a
//! multivariate normal, then the per-marker shrinkage precisions `zeta`.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::Rng;
use rand_distr::{Distribution, Gamma};

use crate::config::SamplerConfig;
use crate::error::{EqtlError, Result};
use crate::linalg_backends::{BackendCholesky, LinAlgBackendProvider};
use crate::mvn::sample_multivariate_normal;

/// Draws `(beta, tau)` and `zeta` from their conditional posteriors.
#[derive(Debug, Clone, Default)]
pub struct GibbsSampler {
    backend: LinAlgBackendProvider<f64>,
    config: SamplerConfig,
}

impl GibbsSampler {
    pub fn new(config: SamplerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            backend: LinAlgBackendProvider::new(),
            config,
        })
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Draws the residual precision and the active coefficients.
    ///
    /// * `yty` - sum of squared trait values; must be finite and positive.
    /// * `gtg` - `p x p` covariance of the active markers.
    /// * `gty` - length `p` cross-product of the active markers with the trait.
    /// * `zeta` - length `p` shrinkage precisions of the active markers.
    /// * `n_samples` - number of samples behind the statistics.
    ///
    /// `tau ~ Gamma(0.5 (p + n), rate = 0.5 yty)` and
    /// `beta ~ N(A^-1 b, A^-1)` with `A = tau (gtg + diag(zeta))`, `b = tau gty`.
    ///
    /// # Errors
    /// [`EqtlError::NumericalDegeneracy`] for a non-positive `yty` or an invalid
    /// Gamma draw, [`EqtlError::NotPositiveDefinite`] if `A` cannot be factorised.
    pub fn sample_beta_tau<R: Rng + ?Sized>(
        &self,
        yty: f64,
        gtg: ArrayView2<f64>,
        gty: ArrayView1<f64>,
        zeta: ArrayView1<f64>,
        n_samples: usize,
        rng: &mut R,
    ) -> Result<(Array1<f64>, f64)> {
        let n_markers = zeta.len();
        if gtg.dim() != (n_markers, n_markers) || gty.len() != n_markers {
            return Err(EqtlError::InvalidConfiguration(format!(
                "GTG is {:?} and GTY has length {} for {} active markers",
                gtg.dim(),
                gty.len(),
                n_markers
            )));
        }
        if n_samples == 0 {
            return Err(EqtlError::InvalidConfiguration("n_samples must be positive".into()));
        }
        if !(yty.is_finite() && yty > 0.0) {
            return Err(EqtlError::NumericalDegeneracy(format!(
                "YTY must be finite and positive to draw tau, got {}",
                yty
            )));
        }

        // sample tau
        let shape = 0.5 * (n_markers + n_samples) as f64;
        let rate = 0.5 * yty;
        let tau = draw_gamma(shape, rate, rng)?;
        if !(tau.is_finite() && tau > 0.0) {
            return Err(EqtlError::NumericalDegeneracy(format!(
                "tau draw {} from Gamma(shape={}, rate={}) is not a positive finite precision",
                tau, shape, rate
            )));
        }

        // sample beta
        let mut precision: Array2<f64> = gtg.to_owned();
        precision.diag_mut().zip_mut_with(&zeta, |d, &z| *d += z);
        precision *= tau;
        let b = gty.mapv(|v| tau * v);
        let beta = sample_multivariate_normal(b.view(), &precision, &self.backend, &self.config, rng)?;

        Ok((beta, tau))
    }

    /// Draws one shrinkage precision per coefficient from
    /// `Gamma(0.5, rate = 0.5 beta^2 tau)`.
    ///
    /// A coefficient of exactly zero has rate zero and an unbounded draw; the
    /// rate is floored at the smallest positive double and the result clamped
    /// to `precision_ceiling`, so every returned value is finite and positive.
    pub fn sample_zeta<R: Rng + ?Sized>(
        &self,
        beta: ArrayView1<f64>,
        tau: f64,
        rng: &mut R,
    ) -> Result<Array1<f64>> {
        if !(tau.is_finite() && tau > 0.0) {
            return Err(EqtlError::NumericalDegeneracy(format!(
                "tau must be finite and positive to draw zeta, got {}",
                tau
            )));
        }
        let ceiling = self.config.precision_ceiling;
        let mut zeta = Array1::<f64>::zeros(beta.len());
        for (z, &b) in zeta.iter_mut().zip(beta.iter()) {
            if !b.is_finite() {
                return Err(EqtlError::NumericalDegeneracy(format!(
                    "coefficient {} is not finite",
                    b
                )));
            }
            let rate = (0.5 * b * b * tau).max(f64::MIN_POSITIVE);
            let draw = draw_gamma(0.5, rate, rng)?;
            *z = draw.min(ceiling).max(f64::MIN_POSITIVE);
        }
        Ok(zeta)
    }
}

fn draw_gamma<R: Rng + ?Sized>(shape: f64, rate: f64, rng: &mut R) -> Result<f64> {
    let gamma = Gamma::new(shape, 1.0 / rate).map_err(|e| {
        EqtlError::NumericalDegeneracy(format!(
            "invalid Gamma(shape={}, rate={}): {}",
            shape, rate, e
        ))
    })?;
    Ok(gamma.sample(rng))
}

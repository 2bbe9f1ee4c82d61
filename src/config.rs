// Tuning parameters for the Gibbs sampler and the multi-gene driver.

/// Numerical guards used by the conditional draws.
#[derive(Clone, Debug)]
pub struct SamplerConfig {
    /// How many times a failed Cholesky factorisation of the coefficient
    /// precision matrix is retried with diagonal jitter. `0` surfaces the
    /// first failure as an error.
    pub jitter_retries: usize,
    /// Jitter of the first retry, relative to the mean diagonal of the
    /// precision matrix. Each further retry multiplies it by ten.
    pub initial_jitter: f64,
    /// Upper bound on any drawn shrinkage precision `zeta`. A coefficient of
    /// exactly zero has a zero Gamma rate; the ceiling keeps the draw finite.
    pub precision_ceiling: f64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        SamplerConfig {
            jitter_retries: 0,
            initial_jitter: 1e-10,
            precision_ceiling: 1e20,
        }
    }
}

impl SamplerConfig {
    pub(crate) fn validate(&self) -> crate::Result<()> {
        if !(self.initial_jitter.is_finite() && self.initial_jitter > 0.0) {
            return Err(crate::EqtlError::InvalidConfiguration(format!(
                "initial_jitter must be finite and positive, got {}",
                self.initial_jitter
            )));
        }
        if !(self.precision_ceiling.is_finite() && self.precision_ceiling > 0.0) {
            return Err(crate::EqtlError::InvalidConfiguration(format!(
                "precision_ceiling must be finite and positive, got {}",
                self.precision_ceiling
            )));
        }
        Ok(())
    }
}

/// Configuration of a multi-gene run (see [`crate::driver::run`]).
#[derive(Clone, Debug)]
pub struct RunConfig {
    /// Number of Gibbs iterations per gene.
    pub n_iters: usize,
    /// Iterations discarded before accumulating posterior moments.
    /// `None` uses half of `n_iters`, rounded.
    pub n_burnin: Option<usize>,
    /// Markers with `|beta| <= beta_thr` are pruned from the next draw.
    pub beta_thr: f64,
    /// Scale each gene to unit variance after centering.
    pub scale: bool,
    /// Base seed; every gene model derives its own stream from it.
    pub seed: u64,
    pub sampler: SamplerConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            n_iters: 1000,
            n_burnin: None,
            beta_thr: 1e-6,
            scale: true,
            seed: 2025,
            sampler: SamplerConfig::default(),
        }
    }
}

impl RunConfig {
    /// Resolves the burn-in length, applying the half-run default.
    pub fn effective_burnin(&self) -> usize {
        self.n_burnin
            .unwrap_or_else(|| (self.n_iters as f64 * 0.5).round() as usize)
    }
}

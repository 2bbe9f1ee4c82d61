//! Single-trait Normal model with continuous shrinkage, estimated by Gibbs sampling.

use log::trace;
use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Open01, StandardNormal};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::config::SamplerConfig;
use crate::error::{EqtlError, Result};
use crate::sampler::GibbsSampler;

/// Inputs of one [`ModelNormalGibbs::update`] call.
///
/// `y` and `g` must be centered (and `g` scaled) by the caller; `yty`, `gtg`
/// and `gty` must be computed from those same arrays.
#[derive(Debug, Clone, Copy)]
pub struct UpdateArgs<'a> {
    /// Trait values, length `n_samples`.
    pub y: ArrayView1<'a, f64>,
    /// Marker matrix, `n_samples x n_markers`.
    pub g: ArrayView2<'a, f64>,
    /// `y . y`
    pub yty: f64,
    /// `g^T g`, `n_markers x n_markers`.
    pub gtg: ArrayView2<'a, f64>,
    /// `g^T y`, length `n_markers`.
    pub gty: ArrayView1<'a, f64>,
    /// Iterations `1..=n_burnin` are not accumulated. `0 <= n_burnin <= n_iters`.
    pub n_burnin: usize,
    /// Markers with `|beta| <= beta_thr` are left out of the draw. `>= 0`.
    pub beta_thr: f64,
}

/// Inputs of [`ModelNormalGibbs::get_estimates`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EstimateArgs {
    pub n_iters: usize,
    pub n_burnin: usize,
}

/// Posterior means and variances accumulated after burn-in.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PosteriorEstimates {
    pub tau: f64,
    pub tau_var: f64,
    /// Shape: (n_markers)
    pub zeta: Array1<f64>,
    /// Shape: (n_markers)
    pub zeta_var: Array1<f64>,
    /// Shape: (n_markers)
    pub beta: Array1<f64>,
    /// Shape: (n_markers)
    pub beta_var: Array1<f64>,
}

impl PosteriorEstimates {
    pub fn n_markers(&self) -> usize {
        self.beta.len()
    }

    /// Saves the estimates to a file using bincode.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path.as_ref())?;
        let mut writer = BufWriter::new(file);
        bincode::serde::encode_into_std_write(self, &mut writer, bincode::config::standard())?;
        Ok(())
    }

    /// Loads estimates previously written by [`PosteriorEstimates::save`].
    ///
    /// # Errors
    /// Returns an error on I/O or decoding failure, or if the per-marker
    /// vectors have different lengths.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let mut reader = BufReader::new(file);
        let estimates: PosteriorEstimates =
            bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())?;
        estimates.check_dimensions()?;
        Ok(estimates)
    }

    pub(crate) fn check_dimensions(&self) -> Result<()> {
        let n = self.beta.len();
        if [self.beta_var.len(), self.zeta.len(), self.zeta_var.len()]
            .iter()
            .any(|&len| len != n)
        {
            return Err(EqtlError::InvalidConfiguration(format!(
                "inconsistent estimate lengths: beta {}, beta_var {}, zeta {}, zeta_var {}",
                n,
                self.beta_var.len(),
                self.zeta.len(),
                self.zeta_var.len()
            )));
        }
        Ok(())
    }
}

/// Running sums and sums of squares of the sampled parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Accumulators {
    pub tau_sum: f64,
    pub tau2_sum: f64,
    pub zeta_sum: Array1<f64>,
    pub zeta2_sum: Array1<f64>,
    pub beta_sum: Array1<f64>,
    pub beta2_sum: Array1<f64>,
}

impl Accumulators {
    fn zeros(n_markers: usize) -> Self {
        Self {
            tau_sum: 0.0,
            tau2_sum: 0.0,
            zeta_sum: Array1::zeros(n_markers),
            zeta2_sum: Array1::zeros(n_markers),
            beta_sum: Array1::zeros(n_markers),
            beta2_sum: Array1::zeros(n_markers),
        }
    }

    fn add(&mut self, tau: f64, zeta: &Array1<f64>, beta: &Array1<f64>) {
        self.tau_sum += tau;
        self.zeta_sum += zeta;
        self.beta_sum += beta;

        self.tau2_sum += tau * tau;
        self.zeta2_sum.zip_mut_with(zeta, |acc, &z| *acc += z * z);
        self.beta2_sum.zip_mut_with(beta, |acc, &b| *acc += b * b);
    }

    /// `true` while nothing has been accumulated.
    pub fn is_empty(&self) -> bool {
        self.tau_sum == 0.0
            && self.tau2_sum == 0.0
            && [&self.zeta_sum, &self.zeta2_sum, &self.beta_sum, &self.beta2_sum]
                .iter()
                .all(|a| a.iter().all(|&v| v == 0.0))
    }
}

/// Normal model of Bayesian variable selection through shrinkage for a single
/// trait, estimated with a Gibbs sampler.
///
/// The state vectors always have length `n_markers`. Each iteration gathers the
/// active markers (`|beta| > beta_thr`), samples them, and scatters the draws
/// back; inactive markers keep their last `beta` and `zeta`, so once pruned a
/// marker stays pruned.
///
/// A model owns its random generator and shares nothing with other instances,
/// so independent genes can be fitted on separate threads.
#[derive(Debug, Clone)]
pub struct ModelNormalGibbs {
    n_markers: usize,
    n_iters: usize,
    tau: f64,
    zeta: Array1<f64>,
    beta: Array1<f64>,
    active: Vec<usize>,
    trace: Array1<f64>,
    accumulators: Accumulators,
    last_iteration: usize,
    sampler: GibbsSampler,
    rng: ChaCha8Rng,
}

impl ModelNormalGibbs {
    /// Creates a model with random initial conditions and the default sampler settings.
    ///
    /// # Examples
    ///
    /// ```
    /// use eqtlseq::ModelNormalGibbs;
    /// let model = ModelNormalGibbs::new(10, 100, 42).unwrap();
    /// assert_eq!(model.trace()[0], 0.0);
    /// ```
    pub fn new(n_markers: usize, n_iters: usize, seed: u64) -> Result<Self> {
        Self::with_config(n_markers, n_iters, seed, SamplerConfig::default())
    }

    /// Creates a model with explicit sampler settings.
    ///
    /// Initial conditions: `tau ~ U(0,1)`, `zeta_j ~ U(0,1)`, `beta_j ~ N(0,1)`.
    /// The uniform draws exclude zero.
    pub fn with_config(
        n_markers: usize,
        n_iters: usize,
        seed: u64,
        config: SamplerConfig,
    ) -> Result<Self> {
        if n_markers == 0 {
            return Err(EqtlError::InvalidConfiguration("n_markers must be positive".into()));
        }
        if n_iters == 0 {
            return Err(EqtlError::InvalidConfiguration("n_iters must be positive".into()));
        }
        let sampler = GibbsSampler::new(config)?;
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let tau: f64 = rng.sample(Open01);
        let zeta = Array1::from_shape_fn(n_markers, |_| rng.sample::<f64, _>(Open01));
        let beta = Array1::from_shape_fn(n_markers, |_| rng.sample::<f64, _>(StandardNormal));

        let mut trace = Array1::from_elem(n_iters + 1, f64::NAN);
        trace[0] = 0.0;

        Ok(Self {
            n_markers,
            n_iters,
            tau,
            zeta,
            beta,
            active: (0..n_markers).collect(),
            trace,
            accumulators: Accumulators::zeros(n_markers),
            last_iteration: 0,
            sampler,
            rng,
        })
    }

    pub fn n_markers(&self) -> usize {
        self.n_markers
    }

    pub fn n_iters(&self) -> usize {
        self.n_iters
    }

    pub fn tau(&self) -> f64 {
        self.tau
    }

    pub fn zeta(&self) -> ArrayView1<'_, f64> {
        self.zeta.view()
    }

    pub fn beta(&self) -> ArrayView1<'_, f64> {
        self.beta.view()
    }

    /// Markers sampled in the most recent iteration, ascending.
    pub fn active_markers(&self) -> &[usize] {
        &self.active
    }

    /// Joint log-likelihood per iteration; index 0 is 0 and unfilled entries are NaN.
    pub fn trace(&self) -> ArrayView1<'_, f64> {
        self.trace.view()
    }

    pub fn accumulators(&self) -> &Accumulators {
        &self.accumulators
    }

    /// Runs one Gibbs iteration.
    ///
    /// Iterations are numbered `1..=n_iters` and must be strictly increasing.
    /// After iteration `n_burnin` the state is added to the running moments.
    ///
    /// # Errors
    /// Invalid arguments fail before any state changes. A failed draw leaves the
    /// model state untouched but the chain should be abandoned.
    pub fn update(&mut self, itr: usize, args: &UpdateArgs<'_>) -> Result<()> {
        self.validate_update(itr, args)?;
        let n_samples = args.g.nrows();

        // prune
        let active: Vec<usize> = self
            .beta
            .iter()
            .enumerate()
            .filter(|(_, b)| b.abs() > args.beta_thr)
            .map(|(j, _)| j)
            .collect();

        // gather
        let g = args.g.select(Axis(1), &active);
        let gty = args.gty.select(Axis(0), &active);
        let gtg = args.gtg.select(Axis(0), &active).select(Axis(1), &active);
        let zeta = self.zeta.select(Axis(0), &active);

        // sample beta, tau and zeta
        let (beta, tau) = self.sampler.sample_beta_tau(
            args.yty,
            gtg.view(),
            gty.view(),
            zeta.view(),
            n_samples,
            &mut self.rng,
        )?;
        let zeta = self.sampler.sample_zeta(beta.view(), tau, &mut self.rng)?;

        let joint = joint_log_likelihood(args.y, g.view(), beta.view(), tau, zeta.view());
        self.trace[itr] = joint;
        trace!(
            "Iteration {}: {} of {} markers active, tau={:.4e}, joint log-likelihood={:.6}",
            itr,
            active.len(),
            self.n_markers,
            tau,
            joint
        );

        // scatter
        for (k, &j) in active.iter().enumerate() {
            self.beta[j] = beta[k];
            self.zeta[j] = zeta[k];
        }
        self.tau = tau;
        self.active = active;
        self.last_iteration = itr;

        if itr > args.n_burnin {
            self.accumulators.add(self.tau, &self.zeta, &self.beta);
        }
        Ok(())
    }

    fn validate_update(&self, itr: usize, args: &UpdateArgs<'_>) -> Result<()> {
        if itr == 0 || itr > self.n_iters {
            return Err(EqtlError::InvalidConfiguration(format!(
                "iteration {} is outside 1..={}",
                itr, self.n_iters
            )));
        }
        if itr <= self.last_iteration {
            return Err(EqtlError::InvalidConfiguration(format!(
                "iteration {} does not follow iteration {}",
                itr, self.last_iteration
            )));
        }
        let (n_samples, n_markers) = args.g.dim();
        if n_samples == 0 {
            return Err(EqtlError::InvalidConfiguration("marker matrix has no samples".into()));
        }
        if args.y.len() != n_samples {
            return Err(EqtlError::InvalidConfiguration(format!(
                "trait has {} samples but the marker matrix has {}",
                args.y.len(),
                n_samples
            )));
        }
        if n_markers != self.n_markers
            || args.gty.len() != self.n_markers
            || args.gtg.dim() != (self.n_markers, self.n_markers)
        {
            return Err(EqtlError::InvalidConfiguration(format!(
                "model has {} markers but G is {:?}, GTG is {:?} and GTY has length {}",
                self.n_markers,
                args.g.dim(),
                args.gtg.dim(),
                args.gty.len()
            )));
        }
        if args.n_burnin > self.n_iters {
            return Err(EqtlError::InvalidConfiguration(format!(
                "n_burnin ({}) exceeds n_iters ({})",
                args.n_burnin, self.n_iters
            )));
        }
        if !(args.beta_thr.is_finite() && args.beta_thr >= 0.0) {
            return Err(EqtlError::InvalidConfiguration(format!(
                "beta_thr must be finite and non-negative, got {}",
                args.beta_thr
            )));
        }
        Ok(())
    }

    /// Posterior means and variances over the `n_iters - n_burnin` accumulated iterations.
    ///
    /// Does not modify the model; repeated calls return identical results.
    ///
    /// # Errors
    /// [`EqtlError::NoPosteriorSamples`] if `n_iters <= n_burnin`.
    pub fn get_estimates(&self, args: &EstimateArgs) -> Result<PosteriorEstimates> {
        if args.n_iters <= args.n_burnin {
            return Err(EqtlError::NoPosteriorSamples {
                n_iters: args.n_iters,
                n_burnin: args.n_burnin,
            });
        }
        let n = (args.n_iters - args.n_burnin) as f64;
        let acc = &self.accumulators;

        let tau = acc.tau_sum / n;
        let zeta = &acc.zeta_sum / n;
        let beta = &acc.beta_sum / n;

        let tau_var = acc.tau2_sum / n - tau * tau;
        let zeta_var = &acc.zeta2_sum / n - &zeta.mapv(|m| m * m);
        let beta_var = &acc.beta2_sum / n - &beta.mapv(|m| m * m);

        Ok(PosteriorEstimates {
            tau,
            tau_var,
            zeta,
            zeta_var,
            beta,
            beta_var,
        })
    }
}

/// Unnormalised joint log density of the active subset, divided by the number
/// of active markers.
///
/// With no active markers the value is left undivided.
pub fn joint_log_likelihood(
    y: ArrayView1<f64>,
    g: ArrayView2<f64>,
    beta: ArrayView1<f64>,
    tau: f64,
    zeta: ArrayView1<f64>,
) -> f64 {
    let (n_samples, n_markers) = g.dim();

    let resid = &y - &g.dot(&beta);
    let a = (0.5 * n_samples as f64 + 0.5 * n_markers as f64 - 1.0) * tau.ln();
    let b = 0.5 * tau * resid.dot(&resid);
    let c = 0.5 * tau * beta.iter().zip(zeta.iter()).map(|(b, z)| b * b * z).sum::<f64>();
    let d = 0.5 * zeta.iter().map(|z| z.ln()).sum::<f64>();

    (a - b - c - d) / n_markers.max(1) as f64
}

//! Multi-gene driver for the Normal model.
//!
//! Standardizes the marker matrix once, derives the per-gene sufficient
//! statistics, and fits one independent [`ModelNormalGibbs`] per gene in
//! parallel.

use log::{debug, info};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::config::RunConfig;
use crate::error::{EqtlError, Result};
use crate::model::{EstimateArgs, ModelNormalGibbs, PosteriorEstimates, UpdateArgs};

/// Standard deviations below this are treated as zero (constant columns).
const MIN_STD_DEV: f64 = 1e-12;

/// Trace and posterior estimates of one gene.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GeneFit {
    /// Shape: (n_iters + 1)
    pub trace: Array1<f64>,
    pub estimates: PosteriorEstimates,
}

/// Results of a multi-gene run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RunResults {
    /// Per-gene fits, in the column order of the expression matrix.
    pub genes: Vec<GeneFit>,
    /// Posterior mean effects. Shape: (n_genes, n_markers)
    pub beta: Array2<f64>,
    /// Posterior effect variances. Shape: (n_genes, n_markers)
    pub beta_var: Array2<f64>,
    /// Posterior shrinkage precisions. Shape: (n_genes, n_markers)
    pub zeta: Array2<f64>,
    /// Posterior residual precisions. Shape: (n_genes)
    pub tau: Array1<f64>,
}

impl RunResults {
    pub fn n_genes(&self) -> usize {
        self.genes.len()
    }

    /// Saves the results to a file using bincode.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path.as_ref())?;
        let mut writer = BufWriter::new(file);
        bincode::serde::encode_into_std_write(self, &mut writer, bincode::config::standard())?;
        Ok(())
    }

    /// Loads results previously written by [`RunResults::save`] and checks
    /// that the summary matrices agree with the per-gene fits.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let mut reader = BufReader::new(file);
        let results: RunResults =
            bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())?;

        let n_genes = results.genes.len();
        let n_markers = results.beta.ncols();
        for fit in &results.genes {
            fit.estimates.check_dimensions()?;
            if fit.estimates.n_markers() != n_markers {
                return Err(EqtlError::InvalidConfiguration(format!(
                    "gene fit has {} markers but the summary has {}",
                    fit.estimates.n_markers(),
                    n_markers
                )));
            }
        }
        if results.beta.nrows() != n_genes
            || results.beta_var.dim() != results.beta.dim()
            || results.zeta.dim() != results.beta.dim()
            || results.tau.len() != n_genes
        {
            return Err(EqtlError::InvalidConfiguration(format!(
                "summary matrices do not match {} genes x {} markers",
                n_genes, n_markers
            )));
        }
        Ok(results)
    }
}

/// Centers every marker column and scales it to unit (population) variance.
///
/// # Errors
/// Monomorphic markers have no variance and are rejected; drop them first.
pub fn standardize_markers(genotypes: ArrayView2<f64>) -> Result<Array2<f64>> {
    let (n_samples, n_markers) = genotypes.dim();
    if n_samples == 0 || n_markers == 0 {
        return Err(EqtlError::InvalidConfiguration(
            "genotype matrix has zero samples or zero markers".into(),
        ));
    }
    let mean = genotypes
        .mean_axis(Axis(0))
        .ok_or_else(|| EqtlError::InvalidConfiguration("failed to compute marker means".into()))?;
    let std_dev = genotypes.std_axis(Axis(0), 0.0);
    if let Some(j) = std_dev.iter().position(|&s| !(s > MIN_STD_DEV)) {
        return Err(EqtlError::InvalidConfiguration(format!(
            "marker {} is monomorphic and cannot be standardized",
            j
        )));
    }
    Ok((&genotypes - &mean) / &std_dev)
}

/// Centers every gene column and optionally scales it to unit variance.
///
/// # Errors
/// Genes with no variance would give `YTY = 0` and are rejected.
pub fn prepare_traits(expression: ArrayView2<f64>, scale: bool) -> Result<Array2<f64>> {
    let (n_samples, n_genes) = expression.dim();
    if n_samples == 0 || n_genes == 0 {
        return Err(EqtlError::InvalidConfiguration(
            "expression matrix has zero samples or zero genes".into(),
        ));
    }
    let mean = expression
        .mean_axis(Axis(0))
        .ok_or_else(|| EqtlError::InvalidConfiguration("failed to compute gene means".into()))?;
    let std_dev = expression.std_axis(Axis(0), 0.0);
    if let Some(j) = std_dev.iter().position(|&s| !(s > MIN_STD_DEV)) {
        return Err(EqtlError::InvalidConfiguration(format!(
            "gene {} has zero variance",
            j
        )));
    }
    let centered = &expression - &mean;
    Ok(if scale { centered / &std_dev } else { centered })
}

/// Seed of the model for gene `gene` under base seed `seed`.
fn gene_seed(seed: u64, gene: usize) -> u64 {
    seed ^ 0x9E37_79B9_7F4A_7C15u64.wrapping_mul(gene as u64 + 1)
}

/// Fits the Normal shrinkage model to every gene.
///
/// * `expression` - trait matrix, shape (n_samples, n_genes).
/// * `genotypes` - raw marker matrix, shape (n_samples, n_markers).
/// * `config` - iterations, burn-in, pruning threshold, scaling and seed.
///
/// Genes are fitted in parallel; each gene's chain depends only on
/// `config.seed` and the gene index, so results do not depend on the thread
/// count.
///
/// # Errors
/// Fails on inconsistent dimensions or configuration, on constant markers or
/// genes, and with the first numerical failure of any gene's chain.
pub fn run(
    expression: ArrayView2<f64>,
    genotypes: ArrayView2<f64>,
    config: &RunConfig,
) -> Result<RunResults> {
    let (n_samples, n_genes) = expression.dim();
    let (n_samples_g, n_markers) = genotypes.dim();
    if n_samples != n_samples_g {
        return Err(EqtlError::InvalidConfiguration(format!(
            "expression has {} samples but genotypes have {}",
            n_samples, n_samples_g
        )));
    }
    let n_iters = config.n_iters;
    let n_burnin = config.effective_burnin();
    if n_iters == 0 {
        return Err(EqtlError::InvalidConfiguration("n_iters must be positive".into()));
    }
    if n_burnin >= n_iters {
        return Err(EqtlError::InvalidConfiguration(format!(
            "n_burnin ({}) must be smaller than n_iters ({})",
            n_burnin, n_iters
        )));
    }

    info!(
        "Starting Normal Gibbs run: {} samples, {} markers, {} genes, {} iterations ({} burn-in), beta_thr={:e}.",
        n_samples, n_markers, n_genes, n_iters, n_burnin, config.beta_thr
    );
    let overall_start_time = std::time::Instant::now();

    let g = standardize_markers(genotypes)?;
    let gtg = g.t().dot(&g);
    let y_all = prepare_traits(expression, config.scale)?;
    let gty_all = g.t().dot(&y_all);

    let genes: Vec<GeneFit> = (0..n_genes)
        .into_par_iter()
        .map(|gene| -> Result<GeneFit> {
            let y = y_all.column(gene);
            let gty = gty_all.column(gene);
            let args = UpdateArgs {
                y,
                g: g.view(),
                yty: y.dot(&y),
                gtg: gtg.view(),
                gty,
                n_burnin,
                beta_thr: config.beta_thr,
            };

            let mut model = ModelNormalGibbs::with_config(
                n_markers,
                n_iters,
                gene_seed(config.seed, gene),
                config.sampler.clone(),
            )?;
            for itr in 1..=n_iters {
                model.update(itr, &args)?;
            }
            let estimates = model.get_estimates(&EstimateArgs { n_iters, n_burnin })?;
            debug!(
                "Gene {}: {} of {} markers active after the final iteration.",
                gene,
                model.active_markers().len(),
                n_markers
            );
            Ok(GeneFit {
                trace: model.trace().to_owned(),
                estimates,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut beta = Array2::<f64>::zeros((n_genes, n_markers));
    let mut beta_var = Array2::<f64>::zeros((n_genes, n_markers));
    let mut zeta = Array2::<f64>::zeros((n_genes, n_markers));
    let mut tau = Array1::<f64>::zeros(n_genes);
    for (i, fit) in genes.iter().enumerate() {
        beta.row_mut(i).assign(&fit.estimates.beta);
        beta_var.row_mut(i).assign(&fit.estimates.beta_var);
        zeta.row_mut(i).assign(&fit.estimates.zeta);
        tau[i] = fit.estimates.tau;
    }

    info!(
        "Finished Normal Gibbs run for {} genes in {:?}.",
        n_genes,
        overall_start_time.elapsed()
    );
    Ok(RunResults {
        genes,
        beta,
        beta_var,
        zeta,
        tau,
    })
}

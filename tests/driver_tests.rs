// In tests/driver_tests.rs

use eqtlseq::{run, EqtlError, RunConfig, RunResults};
use ndarray::{Array, Array2};
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Genotypes (samples x markers) and expression (samples x genes) where gene 0
/// responds to marker 1, gene 1 to marker 4, and gene 2 to nothing.
fn generate_eqtl_data(n_samples: usize, seed: u64) -> (Array2<f64>, Array2<f64>) {
    let n_markers = 6;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let genotypes = Array2::from_shape_fn((n_samples, n_markers), |_| rng.gen_range(0..=2) as f64);

    let mut expression = Array::random_using((n_samples, 3), Normal::new(0.0, 1.0).unwrap(), &mut rng);
    for i in 0..n_samples {
        expression[[i, 0]] += 1.5 * genotypes[[i, 1]] + 5.0;
        expression[[i, 1]] -= 1.5 * genotypes[[i, 4]];
    }
    (expression, genotypes)
}

fn strongest_marker(results: &RunResults, gene: usize) -> usize {
    let row = results.beta.row(gene);
    (0..row.len())
        .max_by(|&a, &b| row[a].abs().partial_cmp(&row[b].abs()).unwrap())
        .unwrap()
}

#[test]
fn test_run_recovers_causal_markers_per_gene() {
    let (expression, genotypes) = generate_eqtl_data(80, 314);
    let config = RunConfig {
        n_iters: 300,
        seed: 1,
        ..RunConfig::default()
    };
    let results = run(expression.view(), genotypes.view(), &config).unwrap();

    assert_eq!(results.n_genes(), 3);
    assert_eq!(results.beta.dim(), (3, 6));
    assert_eq!(results.beta_var.dim(), (3, 6));
    assert_eq!(results.zeta.dim(), (3, 6));
    assert_eq!(results.tau.len(), 3);

    assert_eq!(strongest_marker(&results, 0), 1);
    assert_eq!(strongest_marker(&results, 1), 4);
    assert!(results.beta[[0, 1]] > 0.0);
    assert!(results.beta[[1, 4]] < 0.0);

    for fit in &results.genes {
        assert_eq!(fit.trace.len(), 301);
        assert_eq!(fit.trace[0], 0.0);
        assert!(fit.trace.iter().skip(1).all(|v| v.is_finite()));
        assert!(fit.estimates.tau > 0.0);
    }
    assert_eq!(results.beta.row(2), results.genes[2].estimates.beta);
}

#[test]
fn test_run_is_reproducible_for_a_seed() {
    let (expression, genotypes) = generate_eqtl_data(40, 5);
    let config = RunConfig {
        n_iters: 60,
        n_burnin: Some(20),
        seed: 77,
        ..RunConfig::default()
    };
    let a = run(expression.view(), genotypes.view(), &config).unwrap();
    let b = run(expression.view(), genotypes.view(), &config).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_run_rejects_sample_mismatch() {
    let (expression, genotypes) = generate_eqtl_data(40, 5);
    let truncated = genotypes.slice(ndarray::s![..39, ..]);
    let err = run(expression.view(), truncated, &RunConfig::default()).unwrap_err();
    assert!(matches!(err, EqtlError::InvalidConfiguration(_)));
}

#[test]
fn test_run_rejects_burnin_covering_all_iterations() {
    let (expression, genotypes) = generate_eqtl_data(40, 5);
    let config = RunConfig {
        n_iters: 10,
        n_burnin: Some(10),
        ..RunConfig::default()
    };
    let err = run(expression.view(), genotypes.view(), &config).unwrap_err();
    assert!(matches!(err, EqtlError::InvalidConfiguration(_)));
}

#[test]
fn test_run_results_survive_save_and_load() {
    let (expression, genotypes) = generate_eqtl_data(30, 9);
    let config = RunConfig {
        n_iters: 30,
        ..RunConfig::default()
    };
    let results = run(expression.view(), genotypes.view(), &config).unwrap();

    let file = tempfile::NamedTempFile::new().unwrap();
    results.save(file.path()).unwrap();
    let loaded = RunResults::load(file.path()).unwrap();
    assert_eq!(loaded, results);
}

// Bayesian eQTL mapping with a Gibbs-sampled Normal shrinkage model

#![doc = include_str!("../README.md")]

pub mod config;
pub mod driver;
pub mod error;
pub mod linalg_backends;
pub mod model;
pub mod mvn;
pub mod sampler;

pub use config::{RunConfig, SamplerConfig};
pub use driver::{run, GeneFit, RunResults};
pub use error::{EqtlError, Result, ThreadSafeStdError};
pub use model::{EstimateArgs, ModelNormalGibbs, PosteriorEstimates, UpdateArgs};
pub use sampler::GibbsSampler;

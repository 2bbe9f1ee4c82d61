use thiserror::Error;

/// A thread-safe wrapper for standard dynamic errors,
/// so they implement `Send` and `Sync`.
pub type ThreadSafeStdError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while configuring, running or persisting a Gibbs model.
///
/// Every variant is fatal for the model instance that produced it. Nothing is
/// zero-filled or silently corrected on the way out.
#[derive(Error, Debug)]
pub enum EqtlError {
    /// Dimensions, iteration indices or tuning parameters are inconsistent.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A conditional posterior could not be sampled (e.g. an invalid Gamma rate).
    #[error("Numerical degeneracy: {0}")]
    NumericalDegeneracy(String),

    /// The precision matrix of the coefficient draw could not be factorised.
    #[error("Precision matrix ({dim}x{dim}) is not positive definite")]
    NotPositiveDefinite {
        dim: usize,
        #[source]
        source: ThreadSafeStdError,
    },

    /// `get_estimates` was asked to average over zero post-burn-in iterations.
    #[error("No posterior samples: n_iters ({n_iters}) must exceed n_burnin ({n_burnin})")]
    NoPosteriorSamples { n_iters: usize, n_burnin: usize },

    #[error("Failed to serialize estimates: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("Failed to deserialize estimates: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EqtlError>;

//! Defines an `Estimator`, which re-estimates the parameters of a model from a dataset.
//!
//! Bayesian networks are fit in closed form from complete rows (`NetworkEstimator`); hidden
//! Markov models by expectation maximization over sequences (`BaumWelch`).

use crate::util::Result;
use crate::variable::Value;

mod baum_welch;
mod mle;

pub use self::baum_welch::{BaumWelch, TrainingAlgorithm, TrainingConfig, TrainingReport};
pub use self::mle::NetworkEstimator;

/// A trait that represents the ability to estimate the parameters of some model from weighted
/// data. The parameters are updated in place through the model's distribution handles.
pub trait Estimator {

    type Output;

    /// Estimate the value of the parameters from the given dataset
    fn estimate(&mut self, data: &[Vec<Value>], weights: Option<&[f64]>) -> Result<Self::Output>;
}

//! quince: probabilistic graphical models.
//!
//! Discrete and continuous distributions composed into Bayesian networks and hidden Markov
//! models, with exact and loopy inference, decoding, sampling and maximum likelihood or
//! expectation maximization learning.

pub mod classifier;
pub mod distribution;
pub mod estimators;
pub mod factor;
pub mod inference;
pub mod init;
pub mod model;
pub mod samplers;
pub mod state;
pub mod util;
pub mod variable;

pub use crate::classifier::NaiveBayes;
pub use crate::distribution::{
    Categorical, ConditionalTable, Distribution, DomainPolicy, Exponential, Normal,
    SharedDistribution, Uniform,
};
pub use crate::model::directed::{BayesianNetwork, BayesianNetworkBuilder};
pub use crate::model::hmm::{HiddenMarkovModel, HiddenMarkovModelBuilder};
pub use crate::model::{Model, Schema};
pub use crate::state::State;
pub use crate::util::{QuinceError, Result};
pub use crate::variable::{Symbol, Value};

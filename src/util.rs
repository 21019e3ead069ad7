//! Defines the `Error` type for the quince library, along with the log-space arithmetic shared by
//! the inference and learning routines.

use std::result;

use thiserror::Error;

pub type Result<T> = result::Result<T, QuinceError>;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum QuinceError {

    /// A value outside the support of a distribution or the domain of a variable
    #[error("value `{value}` is outside the domain of {context}")]
    Domain { value: String, context: String },

    /// A malformed graph, reported when a model is baked
    #[error("invalid structure at `{node}`: {reason}")]
    Structure { node: String, reason: String },

    /// The parents declared by a conditional table do not match the edges of the network
    #[error("parents of `{node}` do not match its table: {reason}")]
    ParentMismatch { node: String, reason: String },

    /// Input rows do not line up with the columns a model expects
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Parameters that do not describe a probability distribution
    #[error("invalid distribution: {0}")]
    InvalidDistribution(String),

    /// A conditional table was sampled without first resolving its parents
    #[error("conditional table requires resolved parent values")]
    UnresolvedParents,

    /// The observations have zero probability under the model
    #[error("the evidence has zero probability under the model")]
    ImpossibleEvidence,

    /// A configuration value out of its allowed range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Represents an incomplete assignment where a complete assignment was required.
    #[error("missing assignments to the required variables")]
    IncompleteAssignment,

    /// Represents an error where a certain constraint on a scope was not satisfied
    #[error("provided scope did not satisfy constraints")]
    InvalidScope,
}

impl QuinceError {

    pub(crate) fn domain(value: impl ToString, context: impl ToString) -> Self {
        QuinceError::Domain { value: value.to_string(), context: context.to_string() }
    }

    pub(crate) fn structure(node: impl ToString, reason: impl ToString) -> Self {
        QuinceError::Structure { node: node.to_string(), reason: reason.to_string() }
    }

    pub(crate) fn parent_mismatch(node: impl ToString, reason: impl ToString) -> Self {
        QuinceError::ParentMismatch { node: node.to_string(), reason: reason.to_string() }
    }
}

/// Tolerance used when checking that probabilities sum to one.
pub const PROBABILITY_TOLERANCE: f64 = 1e-6;

/// Stable `log(sum(exp(values)))`.
///
/// Returns `NEG_INFINITY` for an empty slice or when every entry is `NEG_INFINITY`.
pub fn log_sum_exp(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NEG_INFINITY;
    }
    if values.iter().any(|v| v.is_nan()) {
        return f64::NAN;
    }

    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    if max == f64::INFINITY {
        return f64::INFINITY;
    }

    let sum: f64 = values.iter().map(|v| (v - max).exp()).sum();
    max + sum.ln()
}

/// Stable `log(exp(a) + exp(b))`.
pub fn log_add_exp(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        return f64::NAN;
    }
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }
    if a == f64::INFINITY || b == f64::INFINITY {
        return f64::INFINITY;
    }

    let m = a.max(b);
    m + (-(a - b).abs()).exp().ln_1p()
}

/// Natural log of a probability, with `ln(0) = NEG_INFINITY`.
pub fn ln(p: f64) -> f64 {
    if p <= 0.0 {
        f64::NEG_INFINITY
    } else {
        p.ln()
    }
}

/// Normalize `values` in place so they sum to one.
///
/// # Returns
/// the sum before normalization. A zero sum leaves `values` untouched.
pub fn normalize(values: &mut [f64]) -> f64 {
    let z: f64 = values.iter().sum();
    if z > 0.0 {
        values.iter_mut().for_each(|v| *v /= z);
    }
    z
}

/// Index of the largest value, with ties resolved to the lowest index.
pub fn argmax(values: impl IntoIterator<Item = f64>) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, v) in values.into_iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => (),
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

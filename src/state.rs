//! A named node of a model.

use crate::distribution::SharedDistribution;

use std::fmt;

/// A named node wrapping a distribution handle.
///
/// A `State` without a distribution is *silent*: it emits nothing and only routes probability
/// mass (hidden Markov model start and end states, or pass-through states).
#[derive(Clone, Debug)]
pub struct State {
    name: String,
    distribution: Option<SharedDistribution>,
}

impl State {

    /// A state emitting from `distribution`. Pass a clone of an existing handle to tie states.
    pub fn new(distribution: impl Into<SharedDistribution>, name: &str) -> Self {
        State { name: String::from(name), distribution: Some(distribution.into()) }
    }

    /// A silent state
    pub fn silent(name: &str) -> Self {
        State { name: String::from(name), distribution: None }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn distribution(&self) -> Option<&SharedDistribution> {
        self.distribution.as_ref()
    }

    pub fn is_silent(&self) -> bool {
        self.distribution.is_none()
    }

    /// Whether both states hold the same distribution handle
    pub fn is_tied_to(&self, other: &State) -> bool {
        match (&self.distribution, &other.distribution) {
            (Some(a), Some(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.distribution {
            Some(d) => write!(f, "{}: {}", self.name, d),
            None => write!(f, "{} (silent)", self.name),
        }
    }
}

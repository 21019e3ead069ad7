//! Defines a `Sampler` that simulates a `HiddenMarkovModel` from its start state.

use crate::model::hmm::HiddenMarkovModel;
use crate::util::{QuinceError, Result};
use crate::variable::Value;
use super::Sampler;

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

/// A simulated run of a hidden Markov model.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {

    /// The emitted values, in order
    pub emissions: Vec<Value>,

    /// Every state visited, silent ones included, beginning at `start`
    pub path: Vec<usize>,
}

/// Walks the transition graph from `start`, emitting at every emitting state.
///
/// The walk stops on reaching `end`, or once `length` values have been emitted. Every step
/// draws from the normalized out-edges of the current state, so a start row declared with a
/// total below one is sampled as if it summed to one. Scoring keeps the declared row, which
/// scales every likelihood by the same constant.
pub struct ChainSampler<'a, R: Rng> {

    model: &'a HiddenMarkovModel,

    rng: R,

    length: Option<usize>,
}

impl<'a, R: Rng> ChainSampler<'a, R> {

    pub fn new(model: &'a HiddenMarkovModel, rng: R, length: Option<usize>) -> Self {
        ChainSampler { model, rng, length }
    }

    /// Choose a successor of `state`, or `None` if it has no outgoing mass
    fn step(&mut self, state: usize) -> Result<Option<usize>> {
        let a = self.model.log_transition_matrix();
        let targets = self.model.out_edges(state);
        let weights: Vec<f64> = targets.iter().map(|&j| a[[state, j]].exp()).collect();

        if !weights.iter().any(|&w| w > 0.0) {
            return Ok(None);
        }

        let index = WeightedIndex::new(&weights)
            .map_err(|e| QuinceError::InvalidDistribution(e.to_string()))?;
        Ok(Some(targets[index.sample(&mut self.rng)]))
    }
}

impl<'a, R: Rng> Sampler for ChainSampler<'a, R> {

    type Output = Sample;

    /// # Errors
    /// * `QuinceError::Structure` if no length is given and the model never reaches `end`
    fn sample(&mut self) -> Result<Sample> {
        if self.length.is_none() && self.model.is_infinite() {
            return Err(QuinceError::structure(
                self.model.name(),
                "an infinite model needs a sample length"
            ));
        }

        let mut state = self.model.start_index();
        let mut sample = Sample { emissions: Vec::new(), path: vec![state] };

        while self.length.map_or(true, |n| sample.emissions.len() < n) {
            state = match self.step(state)? {
                Some(next) => next,
                None => break,
            };
            sample.path.push(state);

            if state == self.model.end_index() {
                break;
            }
            if state < self.model.emitting() {
                let value = self.model.distribution(state)?.read().sample_one(&mut self.rng)?;
                sample.emissions.push(value);
            }
        }

        Ok(sample)
    }
}

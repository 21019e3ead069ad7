//! Defines a simple forward sampler for a `BayesianNetwork`
//!
//! Implementation of Koller & Friedman Algorithm 12.1 (pp 489)

use crate::distribution::Distribution;
use crate::model::directed::BayesianNetwork;
use crate::util::{QuinceError, Result};
use crate::variable::Symbol;
use super::Sampler;

use rand::Rng;

/// An ancestral `Sampler` for Bayesian networks
pub struct ForwardSampler<'a, R: Rng> {

    /// The `BayesianNetwork` to sample
    model: &'a BayesianNetwork,

    rng: R,
}

impl<'a, R: Rng> ForwardSampler<'a, R> {

    pub fn new(model: &'a BayesianNetwork, rng: R) -> Self {
        ForwardSampler { model, rng }
    }
}

impl<'a, R: Rng> Sampler for ForwardSampler<'a, R> {

    /// One symbol per node, in declaration order
    type Output = Vec<Symbol>;

    fn sample(&mut self) -> Result<Vec<Symbol>> {
        let mut values: Vec<Option<Symbol>> = vec![None; self.model.len()];

        // iterating in topological order, every parent is drawn before its children
        for &i in self.model.topological_order() {
            let d = self.model.distribution(i)?.read();
            let value = match &*d {
                Distribution::Categorical(c) => c.sample(&mut self.rng)?,
                Distribution::Table(t) => {
                    let parents = self.model
                                      .parents(i)
                                      .iter()
                                      .map(|&p| values[p].clone().ok_or(QuinceError::UnresolvedParents))
                                      .collect::<Result<Vec<Symbol>>>()?;
                    t.sample_given(&parents, &mut self.rng)?
                },
                other => return Err(QuinceError::structure(
                    self.model.node_name(i),
                    format!("cannot sample a {} distribution in a Bayesian network", other.family())
                )),
            };
            values[i] = Some(value);
        }

        values.into_iter().map(|v| v.ok_or(QuinceError::IncompleteAssignment)).collect()
    }
}

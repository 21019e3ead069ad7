//! Defines the `NetworkEstimator`, a Maximum Likelihood `Estimator` for the distributions of a
//! `BayesianNetwork` given complete data.
//!
//! Implementation of the MLE Parameter Estimation scheme for conditional probability
//! distributions described in Koller & Friedman Section 17.2. By the decomposability of the
//! likelihood function each distribution is estimated separately from the columns of its own
//! node and its parents; nodes sharing a distribution handle pool their counts.

use crate::distribution::{self, Distribution, DomainPolicy, SharedDistribution, SufficientStatistics};
use crate::model::directed::BayesianNetwork;
use crate::model::Schema;
use crate::util::{QuinceError, Result};
use crate::variable::Value;
use super::Estimator;

use indexmap::IndexMap;
use tracing::debug;

/// A Maximum Likelihood estimator for a `BayesianNetwork`.
pub struct NetworkEstimator<'a> {

    /// The model for which to estimate the parameters
    model: &'a BayesianNetwork,

    /// Weight of the old parameters in `[0, 1]`
    inertia: f64,

    policy: DomainPolicy,
}

impl<'a> NetworkEstimator<'a> {

    pub fn new(model: &'a BayesianNetwork) -> Self {
        NetworkEstimator { model, inertia: 0.0, policy: DomainPolicy::Strict }
    }

    /// Blend the old parameters into the estimate: ```new = inertia * old + (1 - inertia) * mle```
    pub fn inertia(mut self, inertia: f64) -> Self {
        self.inertia = inertia;
        self
    }

    /// How to treat symbols outside the current domains
    pub fn policy(mut self, policy: DomainPolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl<'a> Estimator for NetworkEstimator<'a> {

    type Output = ();

    /// # Errors
    /// * `QuinceError::InvalidConfig` if the inertia is outside `[0, 1]` or a weight is negative
    /// * `QuinceError::SchemaMismatch` if a row does not hold one value per node
    /// * `QuinceError::Domain` for an unseen symbol under `DomainPolicy::Strict`
    ///
    /// No distribution is changed unless every node could be re-estimated.
    fn estimate(&mut self, data: &[Vec<Value>], weights: Option<&[f64]>) -> Result<()> {
        if !(0.0..=1.0).contains(&self.inertia) {
            return Err(QuinceError::InvalidConfig(format!("inertia must be in [0, 1], got {}", self.inertia)));
        }

        let weights = distribution::resolve_weights(data.len(), weights)?;
        let schema = Schema::Columns(self.model.column_names());

        ///////////////////////////////////////////////////////////////////////
        // 1) sufficient statistics, pooled per distribution handle
        let mut pooled: IndexMap<usize, (SharedDistribution, SufficientStatistics)> = IndexMap::new();
        for i in 0..self.model.len() {
            let handle = self.model.distribution(i)?;
            pooled.entry(handle.id())
                  .or_insert_with(|| (handle.clone(), handle.read().blank_statistics()));
        }

        for (row, &w) in data.iter().zip(weights.iter()) {
            schema.check(row)?;

            for i in 0..self.model.len() {
                let handle = self.model.distribution(i)?;
                let is_table = matches!(&*handle.read(), Distribution::Table(_));
                if let Some((_, stats)) = pooled.get_mut(&handle.id()) {
                    if is_table {
                        stats.add_row(&self.model.node_row(i, row), w)?;
                    } else {
                        stats.add(&row[i], w)?;
                    }
                }
            }
        }

        ///////////////////////////////////////////////////////////////////////
        // 2) estimate every distribution on a copy, then commit them all
        let mut updates = Vec::with_capacity(pooled.len());
        for (handle, stats) in pooled.values() {
            let mut d = handle.snapshot();
            d.from_summary(stats, self.inertia, self.policy)?;
            updates.push((handle, d));
        }

        for (handle, d) in updates {
            *handle.write() = d;
        }

        debug!(
            network = %self.model.name(),
            rows = data.len(),
            distributions = pooled.len(),
            "fit bayesian network"
        );

        Ok(())
    }
}

//! Defines a `ConditionalInferenceEngine` that uses exact inference by variable elimination to
//! answer conditional inference queries.
//!
//! Implementation of Koller & Friedman Algorithm 9.1 - Sum-Product-VE

use crate::factor::Factor;
use crate::util::{QuinceError, Result};
use crate::variable::{Assignment, Variable};
use super::{ConditionalInferenceEngine, Convergence};

use itertools::Itertools;

use std::collections::{HashMap, HashSet};

pub struct VariableEliminationEngine {

    /// the bag of factors, reduced by the provided evidence, to use for the inference task
    factors: Vec<Factor>,

    /// the unobserved variables
    variables: Vec<Variable>,

    /// precomputed preferred elimination order based on max-cardinality heuristic
    order: Vec<Variable>,
}


impl VariableEliminationEngine {

    /// Reduce `factors` by the evidence and prepare the elimination order.
    ///
    /// # Errors
    /// * `QuinceError::ImpossibleEvidence` if a fully observed factor has value zero
    pub fn new(factors: Vec<Factor>, evidence: &Assignment) -> Result<Self> {
        let mut reduced = Vec::with_capacity(factors.len());

        for f in factors.iter() {
            match f.reduce(evidence) {
                (_, Some(v)) if v <= 0.0 => return Err(QuinceError::ImpossibleEvidence),
                // fully observed factors only scale the answer
                (Factor::Identity, _) => (),
                (phi, _) => reduced.push(phi),
            }
        }

        let variables: Vec<Variable> = reduced.iter()
                                              .flat_map(|f| f.scope().iter().cloned())
                                              .unique()
                                              .sorted()
                                              .collect();
        let order = max_cardinality_elimination_order(&reduced, &variables);

        Ok(VariableEliminationEngine { factors: reduced, variables, order })
    }

    /// The factors after reduction by the evidence
    pub fn factors(&self) -> &[Factor] {
        &self.factors
    }

    /// The largest table, in entries, created while eliminating every variable in order
    pub fn max_clique_size(&self) -> usize {
        max_clique_size(&self.factors, &self.order)
    }
}

/// Compute the preferred elimination order by the max-cardinality heuristic
fn max_cardinality_elimination_order(factors: &[Factor], vars: &[Variable]) -> Vec<Variable> {
    // since we do not explictly hold the graph structure, we need to determine the neighbors of
    // each variable.
    let mut neighbors: HashMap<Variable, HashSet<Variable>> = vars.iter()
                                                                  .map(|v| (*v, HashSet::new()))
                                                                  .collect();

    for f in factors.iter() {
        for (vi, vj) in f.scope().iter().tuple_combinations() {
            neighbors.entry(*vi).or_default().insert(*vj);
            neighbors.entry(*vj).or_default().insert(*vi);
        }
    }

    // set of marked variables
    let mut marked = HashSet::new();
    // the (reverse) elimination order
    let mut elimination = Vec::with_capacity(vars.len());

    for _ in 0..vars.len() {
        let mut idx: Option<(usize, usize)> = None;

        for (vidx, v) in vars.iter().enumerate() {
            // if we have already marked this variable, it is already in the elimination order so
            // we don't process it again
            if marked.contains(v) {
                continue;
            }

            // otherwise, count the number of marked neighbors
            let ct = neighbors.get(v).map_or(0, |n| n.iter().filter(|&n| marked.contains(n)).count());

            match idx {
                Some((_, max)) if ct <= max => (),
                _ => idx = Some((vidx, ct)),
            }
        }

        if let Some((i, _)) = idx {
            elimination.push(vars[i]);
            marked.insert(vars[i]);
        }
    }

    // we need to reverse the elimination order before returning
    elimination.reverse();
    elimination
}

/// Simulate elimination over the scopes of `factors` and report the largest intermediate table
fn max_clique_size(factors: &[Factor], order: &[Variable]) -> usize {
    let mut scopes: Vec<Vec<Variable>> = factors.iter().map(|f| f.scope().to_vec()).collect();
    let size = |scope: &[Variable]| {
        scope.iter().fold(1usize, |acc, v| acc.saturating_mul(v.cardinality()))
    };

    let mut largest = scopes.iter().map(|s| size(s)).max().unwrap_or(0);

    for var in order.iter() {
        let (with, without): (Vec<Vec<Variable>>, Vec<Vec<Variable>>) = scopes.into_iter()
                                                                              .partition(|s| s.contains(var));

        let clique: Vec<Variable> = with.into_iter().flatten().unique().collect();
        largest = largest.max(size(&clique));

        scopes = without;
        scopes.push(clique.into_iter().filter(|v| v != var).collect());
    }

    largest
}


impl ConditionalInferenceEngine for VariableEliminationEngine {

    fn infer(&mut self, var: Variable) -> Result<Factor> {
        // check input arguments
        if !self.variables.contains(&var) {
            // a variable requested is not found in the (reduced) model
            return Err(QuinceError::InvalidScope);
        }

        let mut phis = self.factors.clone();
        for &v in self.order.iter() {
            if v == var {
                // we are computing P(var | e), so do not eliminate the variable
                continue;
            }

            // Otherwise, time to get rid of v
            let (phi_1prime, phi_2prime): (Vec<Factor>, Vec<Factor>) = phis.into_iter()
                                                                          .partition(|f| f.contains(&v));

            // product step - multiply factors with v
            let psi = phi_1prime.into_iter()
                                .fold(Factor::Identity, |acc, phi| acc.product(&phi));

            // sum step - marginalize psi over v
            let (tau, mass) = psi.marginalize(v);
            if let Some(z) = mass {
                // a disconnected component was summed out entirely
                if z <= 0.0 {
                    return Err(QuinceError::ImpossibleEvidence);
                }
            }

            phis = phi_2prime;
            if !tau.is_identity() {
                phis.push(tau);
            }
        }

        // multiply together remaining phis
        let phi_star = phis.into_iter()
                           .fold(Factor::Identity, |acc, phi| acc.product(&phi));

        // now we have an unnormalized distribution. We need the partition function to return a
        // conditional probability.
        phi_star.normalize()
    }

    fn convergence(&self) -> Convergence {
        Convergence::Exact
    }
}

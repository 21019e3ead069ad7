//! Defines a `ConditionalInferenceEngine` that runs loopy sum-product belief propagation on the
//! factor graph of a bag of `Factor`s.
//!
//! Implementation of Koller & Friedman Algorithm 11.1 (synchronous, flooding schedule) with
//! messages kept normalized in probability space. On a tree the beliefs are exact once messages
//! have crossed the graph; on graphs with loops they are an approximation.

use crate::factor::Factor;
use crate::util::{self, QuinceError, Result};
use crate::variable::Variable;
use super::{BeliefConfig, ConditionalInferenceEngine, Convergence};

use ndarray::Array;
use tracing::{trace, warn};

use std::collections::HashMap;

pub struct BeliefPropagationEngine {

    /// the factors of the graph, reduced by any evidence
    factors: Vec<Factor>,

    /// for every variable, the ```(factor, position in scope)``` pairs it appears in
    incidence: HashMap<Variable, Vec<(usize, usize)>>,

    /// the converged beliefs, one table per variable
    beliefs: HashMap<Variable, Vec<f64>>,

    convergence: Convergence,
}

impl BeliefPropagationEngine {

    /// Run belief propagation to convergence or the iteration cap.
    ///
    /// # Errors
    /// * `QuinceError::ImpossibleEvidence` if a message loses all of its mass
    pub fn new(factors: Vec<Factor>, config: &BeliefConfig) -> Result<Self> {
        let mut incidence: HashMap<Variable, Vec<(usize, usize)>> = HashMap::new();
        for (a, f) in factors.iter().enumerate() {
            for (k, v) in f.scope().iter().enumerate() {
                incidence.entry(*v).or_default().push((a, k));
            }
        }

        let mut engine = BeliefPropagationEngine {
            factors,
            incidence,
            beliefs: HashMap::new(),
            convergence: Convergence::IterationsExhausted { iterations: 0 },
        };
        engine.run(config)?;

        Ok(engine)
    }

    fn run(&mut self, config: &BeliefConfig) -> Result<()> {
        // messages factor -> variable and variable -> factor, indexed [factor][position in scope]
        let uniform = |v: &Variable| vec![1.0 / v.cardinality() as f64; v.cardinality()];
        let mut to_var: Vec<Vec<Vec<f64>>> = self.factors
                                                 .iter()
                                                 .map(|f| f.scope().iter().map(uniform).collect())
                                                 .collect();
        let mut to_factor = to_var.clone();

        self.beliefs = self.incidence.keys().map(|v| (*v, uniform(v))).collect();

        for iteration in 1..=config.max_iterations {
            ///////////////////////////////////////////////////////////////////
            // 1) variable -> factor: product of the other incoming factor messages
            for (v, edges) in self.incidence.iter() {
                for &(a, k) in edges.iter() {
                    let mut msg = vec![1.0; v.cardinality()];
                    for &(b, l) in edges.iter().filter(|&&e| e != (a, k)) {
                        for (m, x) in msg.iter_mut().zip(to_var[b][l].iter()) {
                            *m *= x;
                        }
                    }
                    if util::normalize(&mut msg) <= 0.0 {
                        return Err(QuinceError::ImpossibleEvidence);
                    }
                    to_factor[a][k] = msg;
                }
            }

            ///////////////////////////////////////////////////////////////////
            // 2) factor -> variable: sum out every other variable of the factor
            for (a, f) in self.factors.iter().enumerate() {
                let table = match f.table() {
                    Some(t) => t,
                    None => continue,
                };

                let n = f.scope().len();
                for (k, v) in f.scope().iter().enumerate() {
                    let mut msg = vec![0.0; v.cardinality()];
                    for (idx, &val) in table.indexed_iter() {
                        let w = (0..n).filter(|&l| l != k)
                                      .fold(val, |acc, l| acc * to_factor[a][l][idx[l]]);
                        msg[idx[k]] += w;
                    }
                    if util::normalize(&mut msg) <= 0.0 {
                        return Err(QuinceError::ImpossibleEvidence);
                    }
                    to_var[a][k] = msg;
                }
            }

            ///////////////////////////////////////////////////////////////////
            // 3) beliefs, and how far they moved this sweep
            let mut delta = 0.0_f64;
            for (v, edges) in self.incidence.iter() {
                let mut belief = vec![1.0; v.cardinality()];
                for &(a, k) in edges.iter() {
                    for (b, x) in belief.iter_mut().zip(to_var[a][k].iter()) {
                        *b *= x;
                    }
                }
                if util::normalize(&mut belief) <= 0.0 {
                    return Err(QuinceError::ImpossibleEvidence);
                }

                if let Some(old) = self.beliefs.get(v) {
                    for (x, y) in old.iter().zip(belief.iter()) {
                        delta = delta.max((x - y).abs());
                    }
                }
                self.beliefs.insert(*v, belief);
            }

            trace!(iteration, delta, "belief propagation sweep");

            if iteration > 1 && delta < config.tolerance {
                self.convergence = Convergence::Converged { iterations: iteration };
                return Ok(());
            }
        }

        warn!(
            iterations = config.max_iterations,
            "belief propagation did not converge, returning the last beliefs"
        );
        self.convergence = Convergence::IterationsExhausted { iterations: config.max_iterations };
        Ok(())
    }
}

impl ConditionalInferenceEngine for BeliefPropagationEngine {

    fn infer(&mut self, var: Variable) -> Result<Factor> {
        let belief = self.beliefs.get(&var).ok_or(QuinceError::InvalidScope)?;
        Factor::new(vec![var], Array::from(belief.clone()).into_dyn())
    }

    fn convergence(&self) -> Convergence {
        self.convergence
    }
}

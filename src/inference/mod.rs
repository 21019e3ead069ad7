//! Defines the interface to inference engines.
//!
//! Bayesian networks are answered by variable elimination when the largest intermediate factor
//! stays under `BeliefConfig::max_exact_table_size`, and by loopy belief propagation otherwise.
//! Hidden Markov models have their own dynamic programs in `forward_backward` and `viterbi`.

use crate::distribution::Categorical;
use crate::factor::Factor;
use crate::util::{QuinceError, Result};
use crate::variable::{Assignment, Symbol, Variable};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

mod belief_propagation;
pub mod forward_backward;
mod variable_elimination;
pub mod viterbi;

pub use self::belief_propagation::BeliefPropagationEngine;
pub use self::forward_backward::ForwardBackward;
pub use self::variable_elimination::VariableEliminationEngine;
pub use self::viterbi::{MapPath, ViterbiPath};


/// Observed values, keyed by node name
pub type Evidence = IndexMap<String, Symbol>;


/// A `ConditionalInferenceEngine` is capable of answering Conditional Probability Queries of the form:
///     ```P(Y | E = e)```
///
/// `ConditionalInferenceEngine`s are stateful and must take the evidence `e` as an argument to whatever
/// construction mechanism they employ.
pub trait ConditionalInferenceEngine {

    /// Infer the normalized marginal ```P(var | evidence)``` as a `Factor` of scope `[var]`
    fn infer(&mut self, var: Variable) -> Result<Factor>;

    /// How the answers were obtained
    fn convergence(&self) -> Convergence;
}


/// How a set of beliefs was obtained.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Convergence {

    /// Exact variable elimination
    Exact,

    /// Loopy belief propagation that met the tolerance after `iterations` sweeps
    Converged { iterations: usize },

    /// Loopy belief propagation stopped by the iteration cap
    IterationsExhausted { iterations: usize },
}

impl Convergence {
    pub fn is_exact(&self) -> bool {
        matches!(self, Convergence::Exact)
    }
}


/// Posterior marginals of every node of a network.
#[derive(Clone, Debug)]
pub struct Beliefs {

    /// One distribution per node, in declaration order
    pub marginals: IndexMap<String, Categorical>,

    pub convergence: Convergence,
}

impl Beliefs {
    pub fn get(&self, name: &str) -> Option<&Categorical> {
        self.marginals.get(name)
    }
}


/// Settings for network inference.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeliefConfig {

    /// Maximum number of belief propagation sweeps
    pub max_iterations: usize,

    /// Belief propagation stops once no marginal moves by more than this in a sweep
    pub tolerance: f64,

    /// Largest intermediate table, in entries, that exact elimination may create
    pub max_exact_table_size: usize,
}

impl Default for BeliefConfig {
    fn default() -> Self {
        BeliefConfig {
            max_iterations: 100,
            tolerance: 1e-10,
            max_exact_table_size: 1 << 20,
        }
    }
}

impl BeliefConfig {

    /// # Errors
    /// * `QuinceError::InvalidConfig` if `max_iterations` is zero or `tolerance` is negative or
    ///   not finite
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(QuinceError::InvalidConfig(String::from("max_iterations must be positive")));
        }
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(QuinceError::InvalidConfig(
                format!("tolerance must be finite and non-negative, got {}", self.tolerance)
            ));
        }
        Ok(())
    }
}


/// Compute ```P(v | evidence)``` for each of `targets`.
///
/// # Returns
/// the marginal table of every target, in order, and how they were obtained
///
/// # Errors
/// * `QuinceError::ImpossibleEvidence` if the evidence has zero probability
pub fn infer_marginals(
    factors: Vec<Factor>,
    targets: &[Variable],
    evidence: &Assignment,
    config: &BeliefConfig,
) -> Result<(Vec<Vec<f64>>, Convergence)> {
    let mut exact = VariableEliminationEngine::new(factors, evidence)?;
    let size = exact.max_clique_size();

    if targets.is_empty() || size <= config.max_exact_table_size {
        debug!(largest_table = size, targets = targets.len(), "exact inference by variable elimination");
        let marginals = query(&mut exact, targets)?;
        return Ok((marginals, Convergence::Exact));
    }

    debug!(
        largest_table = size,
        limit = config.max_exact_table_size,
        "elimination too expensive, falling back to loopy belief propagation"
    );
    let mut loopy = BeliefPropagationEngine::new(exact.factors().to_vec(), config)?;
    let marginals = query(&mut loopy, targets)?;
    Ok((marginals, loopy.convergence()))
}

fn query<E: ConditionalInferenceEngine>(engine: &mut E, targets: &[Variable]) -> Result<Vec<Vec<f64>>> {
    targets.iter()
           .map(|&v| {
               let f = engine.infer(v)?;
               f.table()
                .map(|t| t.iter().cloned().collect())
                .ok_or(QuinceError::InvalidScope)
           })
           .collect()
}


#[cfg(test)]
/// Tests for the inference engines in this module. Tests are hoisted here to avoid duplication.
/// Any tests specific to the inference engine are held within that submodule's tests module.
///
/// Example derived from Koller & Friedman's student example. Example 6d of [1] provides the
/// results of exact inference of P(I | D=0, L=1, S=0) on a modified version of the K&F Student
/// example, which both engines must reproduce (the network is a polytree, so loopy belief
/// propagation is exact on it).
///
/// [1] https://www.uni-oldenburg.de/en/lcs/probabilistic-programming/webchurch-and-openbugs/
mod tests {
    use super::*;
    use crate::factor::Table;
    use ndarray::array;

    fn build_student_example() -> (Vec<Variable>, Vec<Factor>, Assignment) {
        let d = Variable::new(0, 2);
        let i = Variable::new(1, 2);
        let g = Variable::new(2, 2);
        let s = Variable::new(3, 2);
        let l = Variable::new(4, 2);

        let factors = vec![
            Factor::new(vec![d], array![0.6, 0.4].into_dyn()).unwrap(),
            Factor::new(vec![i], array![0.7, 0.3].into_dyn()).unwrap(),
            Factor::new(
                vec![i, d, g],
                array![[[0.3, 0.7], [0.05, 0.95]],
                       [[0.9, 0.1], [0.5, 0.5]]].into_dyn()
            ).unwrap(),
            Factor::new(vec![i, s], array![[0.95, 0.05], [0.2, 0.8]].into_dyn()).unwrap(),
            Factor::new(vec![g, l], array![[0.9, 0.1], [0.4, 0.6]].into_dyn()).unwrap(),
        ];

        let mut evidence = Assignment::new();
        evidence.set(&d, 0);
        evidence.set(&l, 1);
        evidence.set(&s, 0);

        (vec![d, i, g, s, l], factors, evidence)
    }

    fn check(marginal: &[f64], precision: f64) {
        let expected = 0.02919708;
        assert!((marginal[1] - expected).abs() < precision, "actual = {}", marginal[1]);
    }

    #[test]
    fn variable_elimination() {
        let (vars, factors, evidence) = build_student_example();
        let config = BeliefConfig::default();

        // the result should be the same on subsequent calls
        for _ in 0..10 {
            let (m, c) = infer_marginals(factors.clone(), &[vars[1]], &evidence, &config).unwrap();
            assert_eq!(c, Convergence::Exact);
            check(&m[0], 1e-8);
        }
    }

    #[test]
    fn belief_propagation() {
        let (vars, factors, evidence) = build_student_example();
        let config = BeliefConfig { max_exact_table_size: 0, ..BeliefConfig::default() };

        let (m, c) = infer_marginals(factors, &[vars[1], vars[2]], &evidence, &config).unwrap();
        assert!(matches!(c, Convergence::Converged { .. }));
        check(&m[0], 1e-8);
        assert!((m[1].iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn engines_agree_without_evidence() {
        let (vars, factors, _) = build_student_example();
        let exact = BeliefConfig::default();
        let loopy = BeliefConfig { max_exact_table_size: 0, ..BeliefConfig::default() };

        let (a, _) = infer_marginals(factors.clone(), &vars, &Assignment::new(), &exact).unwrap();
        let (b, _) = infer_marginals(factors, &vars, &Assignment::new(), &loopy).unwrap();

        for (x, y) in a.iter().flatten().zip(b.iter().flatten()) {
            assert!((x - y).abs() < 1e-9);
        }
    }

    #[test]
    fn impossible_evidence() {
        let a = Variable::new(0, 2);
        let b = Variable::new(1, 2);
        let factors = vec![
            Factor::new(vec![a], array![1.0, 0.0].into_dyn()).unwrap(),
            Factor::new(vec![a, b], Table::from_elem(ndarray::IxDyn(&[2, 2]), 0.5)).unwrap(),
        ];

        let mut evidence = Assignment::new();
        evidence.set(&a, 1);
        let result = infer_marginals(factors, &[b], &evidence, &BeliefConfig::default());
        assert_eq!(result, Err(QuinceError::ImpossibleEvidence));
    }

    #[test]
    fn config() {
        let c: BeliefConfig = serde_json::from_str(r#"{ "tolerance": 1e-6 }"#).unwrap();
        assert_eq!(c.max_iterations, 100);
        assert_eq!(c.tolerance, 1e-6);
        assert!(c.validate().is_ok());

        let bad = BeliefConfig { max_iterations: 0, ..BeliefConfig::default() };
        assert!(matches!(bad.validate(), Err(QuinceError::InvalidConfig(_))));
    }
}

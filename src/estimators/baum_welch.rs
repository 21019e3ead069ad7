//! Expectation maximization for a `HiddenMarkovModel`.
//!
//! Each pass runs forward-backward (or Viterbi decoding, for hard assignments) over every
//! sequence, pools the expected counts of tied states and tied edges, and re-estimates the
//! transition matrix and the emission distributions. Training stops once a pass improves the
//! total log likelihood by less than `stop_threshold`, or after `max_iterations` passes.

use crate::distribution::{self, Distribution, DomainPolicy, SharedDistribution, SufficientStatistics};
use crate::inference::{forward_backward, viterbi};
use crate::model::hmm::HiddenMarkovModel;
use crate::util::{self, QuinceError, Result};
use crate::variable::{Symbol, Value};
use super::Estimator;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;


/// Probability mass, before renormalizing, given to a symbol added to a categorical emission
/// under `DomainPolicy::Extend`
pub const UNSEEN_SYMBOL_MASS: f64 = 1e-3;


/// How hidden states are assigned to the observations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingAlgorithm {

    /// Soft assignments weighted by the forward-backward posteriors
    #[default]
    BaumWelch,

    /// Hard assignments along the Viterbi path
    Viterbi,
}


/// Settings for training a hidden Markov model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {

    pub algorithm: TrainingAlgorithm,

    /// Stop once a pass improves the log likelihood by less than this
    pub stop_threshold: f64,

    pub max_iterations: usize,

    /// Added to the expected count of every declared edge
    pub transition_pseudocount: f64,

    /// Weight of the old transition probabilities in `[0, 1]`
    pub edge_inertia: f64,

    /// Weight of the old emission parameters in `[0, 1]`
    pub distribution_inertia: f64,

    /// Under `DomainPolicy::Extend`, categorical emissions gain the symbols of the training
    /// sequences they do not know, at `UNSEEN_SYMBOL_MASS`, before the first pass
    pub domain_policy: DomainPolicy,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            algorithm: TrainingAlgorithm::BaumWelch,
            stop_threshold: 1e-9,
            max_iterations: 1000,
            transition_pseudocount: 0.0,
            edge_inertia: 0.0,
            distribution_inertia: 0.0,
            domain_policy: DomainPolicy::Strict,
        }
    }
}

impl TrainingConfig {

    /// # Errors
    /// * `QuinceError::InvalidConfig` if a threshold or pseudocount is negative or not finite, or
    ///   an inertia is outside `[0, 1]`
    pub fn validate(&self) -> Result<()> {
        if !self.stop_threshold.is_finite() || self.stop_threshold < 0.0 {
            return Err(QuinceError::InvalidConfig(
                format!("stop_threshold must be finite and non-negative, got {}", self.stop_threshold)
            ));
        }
        if !self.transition_pseudocount.is_finite() || self.transition_pseudocount < 0.0 {
            return Err(QuinceError::InvalidConfig(
                format!("transition_pseudocount must be finite and non-negative, got {}", self.transition_pseudocount)
            ));
        }
        for (name, inertia) in [("edge_inertia", self.edge_inertia), ("distribution_inertia", self.distribution_inertia)] {
            if !(0.0..=1.0).contains(&inertia) {
                return Err(QuinceError::InvalidConfig(format!("{} must be in [0, 1], got {}", name, inertia)));
            }
        }
        Ok(())
    }
}


/// The outcome of a training run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {

    /// Number of completed passes
    pub iterations: usize,

    pub initial_log_probability: f64,

    pub final_log_probability: f64,

    /// The log likelihood before training and after every pass
    pub history: Vec<f64>,

    /// Whether training stopped on the threshold rather than the iteration cap
    pub converged: bool,
}

impl TrainingReport {
    pub fn improvement(&self) -> f64 {
        self.final_log_probability - self.initial_log_probability
    }
}


/// Expected counts of a set of sequences
struct Expectation {

    /// Expected uses of every edge
    transitions: Array2<f64>,

    /// One summary per tie group of emitting states
    emissions: Vec<SufficientStatistics>,

    /// Weighted total log likelihood (or Viterbi path score) of the contributing sequences
    log_probability: f64,
}

impl Expectation {

    fn blank(model: &HiddenMarkovModel) -> Result<Self> {
        let emissions = model.ties()
                             .iter()
                             .map(|group| Ok(model.distribution(group[0])?.read().blank_statistics()))
                             .collect::<Result<Vec<_>>>()?;

        Ok(Expectation {
            transitions: Array2::zeros((model.len(), model.len())),
            emissions,
            log_probability: 0.0,
        })
    }

    fn merge(&mut self, other: Expectation) -> Result<()> {
        self.transitions += &other.transitions;
        for (mine, theirs) in self.emissions.iter_mut().zip(other.emissions.iter()) {
            mine.merge(theirs)?;
        }
        self.log_probability += other.log_probability;
        Ok(())
    }
}


/// Expected counts of one sequence, or `None` if the model cannot emit it
fn expected_counts(
    model: &HiddenMarkovModel,
    sequence: &[Value],
    weight: f64,
    algorithm: TrainingAlgorithm,
) -> Result<Option<Expectation>> {
    let mut expectation = Expectation::blank(model)?;

    match algorithm {
        TrainingAlgorithm::BaumWelch => {
            let fb = forward_backward::forward_backward(model, sequence)?;
            if fb.log_probability == f64::NEG_INFINITY {
                return Ok(None);
            }

            expectation.transitions = fb.transitions * weight;
            for (group, stats) in model.ties().iter().zip(expectation.emissions.iter_mut()) {
                for &k in group.iter() {
                    for (t, symbol) in sequence.iter().enumerate() {
                        stats.add(symbol, fb.emissions[[t, k]].exp() * weight)?;
                    }
                }
            }
            expectation.log_probability = weight * fb.log_probability;
        },
        TrainingAlgorithm::Viterbi => {
            let best = viterbi::viterbi(model, sequence)?;
            if best.path.is_empty() {
                return Ok(None);
            }

            for w in best.path.windows(2) {
                expectation.transitions[[w[0], w[1]]] += weight;
            }

            let group_of = tie_groups(model);
            let emitted = best.path.iter().filter(|&&s| s < model.emitting());
            for (&k, symbol) in emitted.zip(sequence.iter()) {
                expectation.emissions[group_of[k]].add(symbol, weight)?;
            }
            expectation.log_probability = weight * best.log_probability;
        },
    }

    Ok(Some(expectation))
}

/// The tie group of every emitting state
fn tie_groups(model: &HiddenMarkovModel) -> Vec<usize> {
    let mut group_of = vec![0; model.emitting()];
    for (g, group) in model.ties().iter().enumerate() {
        for &k in group.iter() {
            group_of[k] = g;
        }
    }
    group_of
}


/// Trains a `HiddenMarkovModel` in place.
pub struct BaumWelch<'a> {

    model: &'a mut HiddenMarkovModel,

    config: TrainingConfig,
}

impl<'a> BaumWelch<'a> {

    pub fn new(model: &'a mut HiddenMarkovModel, config: TrainingConfig) -> Self {
        BaumWelch { model, config }
    }

    /// E-step over every sequence. Sequences the model cannot emit are skipped.
    ///
    /// # Returns
    /// the pooled expectation and the positions of the sequences that contributed to it
    fn expectation(&self, sequences: &[&[Value]], weights: &[f64]) -> Result<(Expectation, Vec<usize>)> {
        let model: &HiddenMarkovModel = &*self.model;
        let algorithm = self.config.algorithm;

        #[cfg(feature = "parallel")]
        let parts: Vec<Option<Expectation>> = sequences.par_iter()
                                                       .zip(weights.par_iter())
                                                       .map(|(s, &w)| expected_counts(model, s, w, algorithm))
                                                       .collect::<Result<_>>()?;

        #[cfg(not(feature = "parallel"))]
        let parts: Vec<Option<Expectation>> = sequences.iter()
                                                       .zip(weights.iter())
                                                       .map(|(s, &w)| expected_counts(model, s, w, algorithm))
                                                       .collect::<Result<_>>()?;

        let mut total: Option<Expectation> = None;
        let mut used = Vec::with_capacity(parts.len());
        for (i, part) in parts.into_iter().enumerate() {
            match (part, total.as_mut()) {
                (None, _) => {
                    warn!(sequence = i, "sequence has zero probability under the model, skipping");
                    continue;
                },
                (Some(p), Some(t)) => t.merge(p)?,
                (Some(p), None) => total = Some(p),
            }
            used.push(i);
        }

        total.map(|t| (t, used)).ok_or(QuinceError::ImpossibleEvidence)
    }

    /// Add the symbols of `sequences` that a categorical emission does not know yet.
    ///
    /// # Returns
    /// the replaced distributions, to restore if training cannot start
    fn extend_domains(&self, sequences: &[Vec<Value>]) -> Result<Vec<(SharedDistribution, Distribution)>> {
        let model: &HiddenMarkovModel = &*self.model;
        let symbols: Vec<&Symbol> = sequences.iter().flatten().filter_map(Value::as_symbol).collect();

        let mut replaced = Vec::new();
        for group in model.ties() {
            let handle = model.distribution(group[0])?.clone();
            let mut d = handle.snapshot();
            let added = match &mut d {
                Distribution::Categorical(c) => c.extend(symbols.iter().cloned(), UNSEEN_SYMBOL_MASS),
                _ => 0,
            };

            if added > 0 {
                debug!(state = %model.states()[group[0]].name(), added, "extended emission domain");
                replaced.push((handle.clone(), handle.snapshot()));
                *handle.write() = d;
            }
        }

        Ok(replaced)
    }

    /// M-step: re-estimate the declared edges and the emission distributions
    fn maximize(&mut self, expectation: &Expectation) -> Result<()> {
        let model: &HiddenMarkovModel = &*self.model;
        let config = &self.config;

        ///////////////////////////////////////////////////////////////////////
        // 1) transitions, with tied edges sharing their pooled count
        let mut counts = expectation.transitions.clone();
        for group in model.edge_groups() {
            let pooled: f64 = group.iter().map(|&(a, b)| counts[[a, b]]).sum();
            for &(a, b) in group.iter() {
                counts[[a, b]] = pooled;
            }
        }

        let old = model.dense_transition_matrix();
        let mut transitions = model.log_transition_matrix().clone();
        for i in (0..model.len()).filter(|&i| i != model.end_index()) {
            let out = model.out_edges(i);
            let raw: f64 = out.iter().map(|&j| counts[[i, j]]).sum();
            if raw <= 0.0 {
                continue;
            }

            let total = raw + config.transition_pseudocount * out.len() as f64;
            for &j in out.iter() {
                let mle = (counts[[i, j]] + config.transition_pseudocount) / total;
                let p = config.edge_inertia * old[[i, j]] + (1.0 - config.edge_inertia) * mle;
                transitions[[i, j]] = util::ln(p);
            }
        }

        ///////////////////////////////////////////////////////////////////////
        // 2) emissions, one update per tie group
        let mut updates = Vec::with_capacity(model.ties().len());
        for (group, stats) in model.ties().iter().zip(expectation.emissions.iter()) {
            let handle = model.distribution(group[0])?.clone();
            let mut d = handle.snapshot();
            d.from_summary(stats, config.distribution_inertia, config.domain_policy)?;
            updates.push((handle, d));
        }

        ///////////////////////////////////////////////////////////////////////
        // 3) commit
        for (handle, d) in updates {
            *handle.write() = d;
        }
        self.model.set_transitions(transitions);

        Ok(())
    }
}

impl<'a> Estimator for BaumWelch<'a> {

    type Output = TrainingReport;

    /// # Errors
    /// * `QuinceError::InvalidConfig` for an invalid `TrainingConfig` or a negative weight
    /// * `QuinceError::SchemaMismatch` if there are no sequences, or weights and sequences
    ///   differ in length
    /// * `QuinceError::ImpossibleEvidence` if the model cannot emit any of the sequences
    fn estimate(&mut self, data: &[Vec<Value>], weights: Option<&[f64]>) -> Result<TrainingReport> {
        self.config.validate()?;
        if data.is_empty() {
            return Err(QuinceError::SchemaMismatch(String::from("no sequences to train on")));
        }

        let weights = distribution::resolve_weights(data.len(), weights)?;
        if let Some(w) = weights.iter().find(|w| !(w.is_finite() && **w >= 0.0)) {
            return Err(QuinceError::InvalidConfig(format!("invalid sequence weight {}", w)));
        }

        ///////////////////////////////////////////////////////////////////////
        // 1) grow the emission domains, if permitted
        let replaced = match self.config.domain_policy {
            DomainPolicy::Extend => self.extend_domains(data)?,
            DomainPolicy::Strict => Vec::new(),
        };

        ///////////////////////////////////////////////////////////////////////
        // 2) the first pass fixes which sequences take part in training
        let all: Vec<&[Value]> = data.iter().map(Vec::as_slice).collect();
        let (mut expectation, used) = match self.expectation(&all, &weights) {
            Ok(first) => first,
            Err(e) => {
                for (handle, d) in replaced {
                    *handle.write() = d;
                }
                return Err(e);
            }
        };

        if used.len() < data.len() {
            debug!(
                model = %self.model.name(),
                skipped = data.len() - used.len(),
                "sequences impossible under the initial model are left out of training"
            );
        }
        let sequences: Vec<&[Value]> = used.iter().map(|&i| all[i]).collect();
        let weights: Vec<f64> = used.iter().map(|&i| weights[i]).collect();

        ///////////////////////////////////////////////////////////////////////
        // 3) alternate maximization and expectation
        let initial = expectation.log_probability;
        let mut history = vec![initial];
        let mut iterations = 0;
        let mut converged = false;

        while iterations < self.config.max_iterations {
            self.maximize(&expectation)?;
            let (next, _) = self.expectation(&sequences, &weights)?;
            iterations += 1;

            let improvement = next.log_probability - expectation.log_probability;
            history.push(next.log_probability);
            debug!(
                model = %self.model.name(),
                iteration = iterations,
                log_probability = next.log_probability,
                improvement,
                "training pass"
            );

            expectation = next;
            if improvement < self.config.stop_threshold {
                converged = true;
                break;
            }
        }

        let report = TrainingReport {
            iterations,
            initial_log_probability: initial,
            final_log_probability: expectation.log_probability,
            history,
            converged,
        };

        if converged {
            info!(
                model = %self.model.name(),
                iterations,
                improvement = report.improvement(),
                "training converged"
            );
        } else {
            warn!(model = %self.model.name(), iterations, "training stopped at the iteration cap");
        }

        Ok(report)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::{Categorical, SharedDistribution};
    use crate::model::hmm::HiddenMarkovModelBuilder;
    use crate::state::State;

    fn coins() -> HiddenMarkovModel {
        let fair = Categorical::new(vec![("H", 0.5), ("T", 0.5)]).unwrap();
        let biased = Categorical::new(vec![("H", 0.8), ("T", 0.2)]).unwrap();

        HiddenMarkovModelBuilder::new("coins")
            .with_state(State::new(fair, "fair"))
            .with_state(State::new(biased, "biased"))
            .with_start_transition("fair", 0.5)
            .with_start_transition("biased", 0.5)
            .with_transition("fair", "fair", 0.8)
            .with_transition("fair", "biased", 0.1)
            .with_transition("biased", "biased", 0.8)
            .with_transition("biased", "fair", 0.1)
            .bake()
            .unwrap()
    }

    fn flips(s: &str) -> Vec<Value> {
        s.chars().map(|c| Value::from(c.to_string())).collect()
    }

    fn data() -> Vec<Vec<Value>> {
        vec![flips("HHHHTHHHHH"), flips("THTHTTHT"), flips("HHTHHHHTHH"), flips("TTHT")]
    }

    #[test]
    fn likelihood_never_decreases() {
        let mut model = coins();
        let config = TrainingConfig { max_iterations: 20, stop_threshold: 0.0, ..TrainingConfig::default() };
        let report = BaumWelch::new(&mut model, config).estimate(&data(), None).unwrap();

        assert_eq!(report.history.len(), report.iterations + 1);
        for w in report.history.windows(2) {
            assert!(w[1] >= w[0] - 1e-9, "{:?}", report.history);
        }

        let rows = model.dense_transition_matrix();
        for i in 0..model.end_index() {
            assert!((rows.row(i).sum() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn viterbi_training() {
        let mut model = coins();
        let config = TrainingConfig { algorithm: TrainingAlgorithm::Viterbi, ..TrainingConfig::default() };
        let report = BaumWelch::new(&mut model, config).estimate(&data(), None).unwrap();

        assert!(report.converged);
        assert!(report.final_log_probability >= report.initial_log_probability - 1e-9);
    }

    #[test]
    fn inertia_one_freezes_parameters() {
        let mut model = coins();
        let before = model.dense_transition_matrix();
        let config = TrainingConfig {
            edge_inertia: 1.0,
            distribution_inertia: 1.0,
            max_iterations: 3,
            ..TrainingConfig::default()
        };
        let report = BaumWelch::new(&mut model, config).estimate(&data(), None).unwrap();

        assert!(report.converged);
        let after = model.dense_transition_matrix();
        for (a, b) in before.iter().zip(after.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn impossible_sequences() {
        let mut model = coins();

        // one bad sequence is skipped
        let mut sequences = data();
        sequences.push(flips("HX"));
        assert!(BaumWelch::new(&mut model, TrainingConfig::default()).estimate(&sequences, None).is_ok());

        let mut model = coins();
        let result = BaumWelch::new(&mut model, TrainingConfig::default()).estimate(&[flips("X")], None);
        assert!(matches!(result, Err(QuinceError::ImpossibleEvidence)));
    }

    #[test]
    fn extend_policy_grows_emissions() {
        let build = || {
            let d = Categorical::new(vec![("H", 0.5), ("T", 0.5)]).unwrap();
            HiddenMarkovModelBuilder::new("coin")
                .with_state(State::new(d, "coin"))
                .with_start_transition("coin", 1.0)
                .with_transition("coin", "coin", 0.5)
                .bake()
                .unwrap()
        };
        let sequences = vec![flips("HX"), flips("HT")];

        let mut model = build();
        let config = TrainingConfig { domain_policy: DomainPolicy::Extend, ..TrainingConfig::default() };
        BaumWelch::new(&mut model, config).estimate(&sequences, None).unwrap();

        let d = model.distribution(0).unwrap().snapshot();
        let coin = d.as_categorical().unwrap();
        assert!((coin.probability(&"X".into()) - 0.25).abs() < 1e-9);
        assert!((coin.probability(&"H".into()) - 0.5).abs() < 1e-9);
        assert!(model.log_probability(&flips("HX")).unwrap().is_finite());

        // strict training leaves the unknown symbol out
        let mut model = build();
        BaumWelch::new(&mut model, TrainingConfig::default()).estimate(&sequences, None).unwrap();
        let d = model.distribution(0).unwrap().snapshot();
        let coin = d.as_categorical().unwrap();
        assert_eq!(coin.len(), 2);
        assert_eq!(coin.probability(&"X".into()), 0.0);
    }

    #[test]
    fn skipped_sequences_stay_out() {
        let x = Categorical::new(vec![("x", 1.0)]).unwrap();
        let y = Categorical::new(vec![("y", 1.0)]).unwrap();
        let mut model = HiddenMarkovModelBuilder::new("gate")
            .with_state(State::new(x, "a"))
            .with_state(State::new(y, "b"))
            .with_start_transition("a", 1.0)
            .with_transition("a", "a", 0.5)
            .with_transition("a", "b", 0.0)
            .with_transition("b", "b", 0.5)
            .bake()
            .unwrap();

        let sequences = vec![flips("xx"), flips("xy")];
        assert_eq!(model.log_probability(&sequences[1]).unwrap(), f64::NEG_INFINITY);

        let config = TrainingConfig { transition_pseudocount: 1.0, max_iterations: 5, ..TrainingConfig::default() };
        let report = BaumWelch::new(&mut model, config).estimate(&sequences, None).unwrap();

        // the pseudocount opens a -> b, but the likelihood still covers only the first sequence
        assert!(model.log_probability(&sequences[1]).unwrap().is_finite());
        let kept = model.log_probability(&sequences[0]).unwrap();
        assert!((report.final_log_probability - kept).abs() < 1e-9);
        assert_eq!(report.history.len(), report.iterations + 1);
    }

    #[test]
    fn tied_emissions_stay_tied() {
        let shared = SharedDistribution::new(Categorical::new(vec![("H", 0.6), ("T", 0.4)]).unwrap());
        let mut model = HiddenMarkovModelBuilder::new("tied")
            .with_state(State::new(shared.clone(), "a"))
            .with_state(State::new(shared.clone(), "b"))
            .with_start_transition("a", 1.0)
            .with_transition("a", "b", 0.9)
            .with_transition("b", "a", 0.9)
            .bake()
            .unwrap();

        model.fit_with(&data(), None, &TrainingConfig::default()).unwrap();

        // a single distribution fit to every flip
        let d = shared.read().as_categorical().cloned().unwrap();
        let heads = data().iter().flatten().filter(|v| **v == Value::from("H")).count() as f64;
        let total = data().iter().map(Vec::len).sum::<usize>() as f64;
        assert!((d.probability(&"H".into()) - heads / total).abs() < 1e-9);
        assert!(model.states()[0].is_tied_to(&model.states()[1]));
    }

    #[test]
    fn tied_edges_pool_counts() {
        let build = |tied: bool| {
            let fair = Categorical::new(vec![("H", 0.5), ("T", 0.5)]).unwrap();
            let biased = Categorical::new(vec![("H", 0.8), ("T", 0.2)]).unwrap();
            let b = HiddenMarkovModelBuilder::new("coins")
                .with_state(State::new(fair, "fair"))
                .with_state(State::new(biased, "biased"))
                .with_start_transition("fair", 0.5)
                .with_start_transition("biased", 0.5)
                .with_transition("fair", "fair", 0.8)
                .with_transition("biased", "biased", 0.8);
            if tied {
                b.with_tied_transition("fair", "biased", 0.1, "switch")
                 .with_tied_transition("biased", "fair", 0.1, "switch")
                 .bake()
                 .unwrap()
            } else {
                b.with_transition("fair", "biased", 0.1)
                 .with_transition("biased", "fair", 0.1)
                 .bake()
                 .unwrap()
            }
        };

        let config = TrainingConfig { max_iterations: 1, ..TrainingConfig::default() };
        let mut tied = build(true);
        let mut free = build(false);
        assert_eq!(tied.edge_groups(), &[vec![(0, 1), (1, 0)]]);
        assert!(free.edge_groups().is_empty());

        // one pass from identical starting points
        let sequences = data();
        let refs: Vec<&[Value]> = sequences.iter().map(Vec::as_slice).collect();
        let (expectation, _) = BaumWelch::new(&mut free, config.clone()).expectation(&refs, &[1.0; 4]).unwrap();
        BaumWelch::new(&mut tied, config.clone()).maximize(&expectation).unwrap();

        let pooled = expectation.transitions[[0, 1]] + expectation.transitions[[1, 0]];
        let p = tied.dense_transition_matrix();
        let row: f64 = tied.out_edges(0)
                           .iter()
                           .map(|&j| if j == 1 { pooled } else { expectation.transitions[[0, j]] })
                           .sum();
        assert!((p[[0, 1]] - pooled / row).abs() < 1e-9);
        for i in 0..2 {
            assert!((p.row(i).sum() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn config() {
        let c: TrainingConfig = serde_json::from_str(r#"{ "algorithm": "viterbi", "max_iterations": 5 }"#).unwrap();
        assert_eq!(c.algorithm, TrainingAlgorithm::Viterbi);
        assert_eq!(c.max_iterations, 5);
        assert_eq!(c.stop_threshold, 1e-9);

        assert!(TrainingConfig { edge_inertia: 1.5, ..TrainingConfig::default() }.validate().is_err());
        assert!(TrainingConfig { transition_pseudocount: -1.0, ..TrainingConfig::default() }.validate().is_err());
    }
}

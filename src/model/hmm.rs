//! Defines a `HiddenMarkovModel`, a latent chain of `State`s joined by weighted transitions.
//!
//! # Representation
//! A baked model orders its states as
//!
//! ```text
//! [ emitting states (declaration order) | silent states (topological order) | start | end ]
//! ```
//!
//! and keeps the transitions as a dense matrix of log probabilities alongside sparse in/out edge
//! lists. Silent states emit nothing: the dynamic programs move probability mass through them
//! within a single time step, which is why silent-to-silent edges must not form a cycle.

use crate::distribution::{Distribution, SharedDistribution};
use crate::estimators::{BaumWelch, Estimator, TrainingConfig, TrainingReport};
use crate::inference::{forward_backward, viterbi, ForwardBackward, MapPath, ViterbiPath};
use crate::samplers::{chain::Sample, ChainSampler, Sampler};
use crate::state::State;
use crate::util::{self, QuinceError, Result, PROBABILITY_TOLERANCE};
use crate::variable::Value;
use super::{Model, Schema};

use bidir_map::BidirMap;
use indexmap::IndexMap;
use ndarray::Array2;
use rand::Rng;
use tracing::debug;

use std::collections::BTreeSet;


/// A hidden Markov model with implicit `start` and `end` states.
#[derive(Debug)]
pub struct HiddenMarkovModel {

    name: String,

    /// Every state in baked order, `start` and `end` included
    states: Vec<State>,

    /// Two way lookup ```(index->Name)``` and ```(Name->index)```
    names: BidirMap<usize, String>,

    /// ```transitions[[i, j]]``` is the log probability of moving from state `i` to state `j`
    transitions: Array2<f64>,

    /// Sources of the declared edges into each state, ascending
    in_edges: Vec<Vec<usize>>,

    /// Targets of the declared edges out of each state, ascending
    out_edges: Vec<Vec<usize>>,

    /// Number of emitting states; they occupy indices `0..emitting`
    emitting: usize,

    /// Emitting states sharing one distribution handle
    ties: Vec<Vec<usize>>,

    /// Edges constrained to share one probability
    edge_groups: Vec<Vec<(usize, usize)>>,

    /// Whether no state has a positive transition into `end`
    infinite: bool,
}

impl HiddenMarkovModel {

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The states of the model in baked order
    pub fn states(&self) -> &[State] {
        &self.states
    }

    pub fn state(&self, idx: usize) -> Option<&State> {
        self.states.get(idx)
    }

    /// Number of states, `start` and `end` included
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// A baked model always holds at least `start` and `end`
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Lookup a state index by name
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.get_by_second(&String::from(name)).cloned()
    }

    pub fn start_index(&self) -> usize {
        self.states.len() - 2
    }

    pub fn end_index(&self) -> usize {
        self.states.len() - 1
    }

    /// Number of emitting states; they come first in the state order
    pub fn emitting(&self) -> usize {
        self.emitting
    }

    /// Whether the model has no transition into `end` with positive probability
    pub fn is_infinite(&self) -> bool {
        self.infinite
    }

    /// Groups of emitting states tied to one distribution
    pub fn ties(&self) -> &[Vec<usize>] {
        &self.ties
    }

    /// Transition probabilities as a dense `N x N` matrix
    pub fn dense_transition_matrix(&self) -> Array2<f64> {
        self.transitions.mapv(f64::exp)
    }

    /// Transition log probabilities as a dense `N x N` matrix
    pub fn log_transition_matrix(&self) -> &Array2<f64> {
        &self.transitions
    }

    pub(crate) fn in_edges(&self, idx: usize) -> &[usize] {
        &self.in_edges[idx]
    }

    pub(crate) fn out_edges(&self, idx: usize) -> &[usize] {
        &self.out_edges[idx]
    }

    pub(crate) fn edge_groups(&self) -> &[Vec<(usize, usize)>] {
        &self.edge_groups
    }

    pub(crate) fn set_transitions(&mut self, transitions: Array2<f64>) {
        self.transitions = transitions;
    }

    /// Silent states other than `start`, in topological order
    pub(crate) fn silent(&self) -> std::ops::Range<usize> {
        self.emitting..self.start_index()
    }

    /// The emission distribution of state `idx`
    pub(crate) fn distribution(&self, idx: usize) -> Result<&SharedDistribution> {
        self.states[idx]
            .distribution()
            .ok_or_else(|| QuinceError::structure(self.states[idx].name(), "state is silent"))
    }

    /// ```T x emitting``` matrix of emission log probabilities of `sequence`
    pub(crate) fn emission_log_probabilities(&self, sequence: &[Value]) -> Result<Array2<f64>> {
        let mut e = Array2::from_elem((sequence.len(), self.emitting), f64::NEG_INFINITY);

        for k in 0..self.emitting {
            let d = self.distribution(k)?.read();
            for (t, symbol) in sequence.iter().enumerate() {
                e[[t, k]] = d.log_probability(symbol)?;
            }
        }

        Ok(e)
    }


    ///////////////////////////////////////////////////////////////////////////
    // Inference

    /// `(T+1) x N` matrix of forward log probabilities
    pub fn forward(&self, sequence: &[Value]) -> Result<Array2<f64>> {
        forward_backward::forward(self, sequence)
    }

    /// `(T+1) x N` matrix of backward log probabilities
    pub fn backward(&self, sequence: &[Value]) -> Result<Array2<f64>> {
        forward_backward::backward(self, sequence)
    }

    /// Expected transition counts and emission posteriors of `sequence`
    pub fn forward_backward(&self, sequence: &[Value]) -> Result<ForwardBackward> {
        forward_backward::forward_backward(self, sequence)
    }

    /// Total log likelihood of `sequence`
    pub fn log_probability(&self, sequence: &[Value]) -> Result<f64> {
        let f = self.forward(sequence)?;
        Ok(forward_backward::total(self, &f, sequence.len()))
    }

    /// The most probable state path
    pub fn viterbi(&self, sequence: &[Value]) -> Result<ViterbiPath> {
        viterbi::viterbi(self, sequence)
    }

    /// The most probable state at each step, chosen independently
    pub fn maximum_a_posteriori(&self, sequence: &[Value]) -> Result<MapPath> {
        viterbi::maximum_a_posteriori(self, sequence)
    }

    /// Log probability of emitting `sequence` along `path`
    pub fn path_log_probability(&self, sequence: &[Value], path: &[usize]) -> Result<f64> {
        viterbi::path_log_probability(self, sequence, path)
    }

    /// Simulate the chain from `start`.
    ///
    /// # Args
    /// * `length`: the number of emissions to stop at. `None` runs until `end`.
    ///
    /// # Errors
    /// * `QuinceError::Structure` if `length` is `None` and the model is infinite
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, length: Option<usize>) -> Result<Sample> {
        ChainSampler::new(self, rng, length).sample()
    }

    /// Re-estimate the transitions and emissions from sequences with Baum-Welch.
    pub fn fit_with(
        &mut self,
        sequences: &[Vec<Value>],
        weights: Option<&[f64]>,
        config: &TrainingConfig,
    ) -> Result<TrainingReport> {
        BaumWelch::new(self, config.clone()).estimate(sequences, weights)
    }
}

impl Model for HiddenMarkovModel {

    fn schema(&self) -> Schema {
        Schema::Sequence
    }

    fn log_probability(&self, row: &[Value]) -> Result<f64> {
        HiddenMarkovModel::log_probability(self, row)
    }

    fn fit(&mut self, rows: &[Vec<Value>], weights: Option<&[f64]>) -> Result<()> {
        self.fit_with(rows, weights, &TrainingConfig::default()).map(|_| ())
    }

    /// The transition matrix and the emission distributions
    type Checkpoint = (Array2<f64>, Vec<(SharedDistribution, Distribution)>);

    fn checkpoint(&self) -> Self::Checkpoint {
        (self.transitions.clone(), super::capture(self.states.iter().filter_map(State::distribution)))
    }

    fn rollback(&mut self, checkpoint: Self::Checkpoint) {
        let (transitions, emissions) = checkpoint;
        self.transitions = transitions;
        super::restore(emissions);
    }
}


/// An endpoint of a declared transition
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Node {
    Start,
    End,
    State(usize),
}

#[derive(Clone, Debug)]
struct Edge {
    from: Node,
    to: Node,
    probability: f64,
    group: Option<String>,
}


/// An implementation of the [builder pattern] for creating a `HiddenMarkovModel`.
///
/// The implicit pseudo-states are addressed by the names ```"<model>-start"``` and
/// ```"<model>-end"```, or through `with_start_transition` and `with_end_transition`.
///
/// [builder pattern]: https://en.wikipedia.org/wiki/Builder_pattern
pub struct HiddenMarkovModelBuilder {

    name: String,

    /// The user states, in declaration order
    states: Vec<State>,

    names: BidirMap<usize, String>,

    edges: Vec<Edge>,

    /// The error state of the builder
    err: Option<QuinceError>,
}

impl HiddenMarkovModelBuilder {

    pub fn new(name: &str) -> Self {
        HiddenMarkovModelBuilder {
            name: String::from(name),
            states: Vec::new(),
            names: BidirMap::new(),
            edges: Vec::new(),
            err: None,
        }
    }

    fn start_name(&self) -> String {
        format!("{}-start", self.name)
    }

    fn end_name(&self) -> String {
        format!("{}-end", self.name)
    }

    /// Add a state. Pass states holding clones of one distribution handle to tie them.
    pub fn with_state(mut self, state: State) -> Self {
        if self.err.is_some() {
            return self;
        }

        let name = String::from(state.name());
        if self.names.get_by_second(&name).is_some() || name == self.start_name() || name == self.end_name() {
            self.err = Some(QuinceError::structure(&name, "duplicate state name"));
            return self;
        }

        self.names.insert(self.states.len(), name);
        self.states.push(state);
        self
    }

    /// Add several states at once
    pub fn with_states(self, states: impl IntoIterator<Item = State>) -> Self {
        states.into_iter().fold(self, |b, s| b.with_state(s))
    }

    /// Add a transition ```from -> to``` with the given probability
    pub fn with_transition(self, from: &str, to: &str, probability: f64) -> Self {
        self.add_edge(from, to, probability, None)
    }

    /// Add a transition out of the implicit start state
    pub fn with_start_transition(self, to: &str, probability: f64) -> Self {
        let start = self.start_name();
        self.add_edge(&start, to, probability, None)
    }

    /// Add a transition into the implicit end state
    pub fn with_end_transition(self, from: &str, probability: f64) -> Self {
        let end = self.end_name();
        self.add_edge(from, &end, probability, None)
    }

    /// Add a transition that shares its probability with every other transition of `group`.
    /// Learning pools the expected counts of the group.
    pub fn with_tied_transition(self, from: &str, to: &str, probability: f64, group: &str) -> Self {
        self.add_edge(from, to, probability, Some(String::from(group)))
    }

    fn resolve(&self, name: &str) -> Option<Node> {
        if name == self.start_name() {
            Some(Node::Start)
        } else if name == self.end_name() {
            Some(Node::End)
        } else {
            self.names.get_by_second(&String::from(name)).map(|&i| Node::State(i))
        }
    }

    fn add_edge(mut self, from: &str, to: &str, probability: f64, group: Option<String>) -> Self {
        if self.err.is_some() {
            return self;
        }

        if !(0.0..=1.0).contains(&probability) {
            self.err = Some(QuinceError::structure(from, format!("transition probability {}", probability)));
            return self;
        }

        let (a, b) = match (self.resolve(from), self.resolve(to)) {
            (Some(a), Some(b)) => (a, b),
            (None, _) => {
                self.err = Some(QuinceError::structure(from, "unknown state"));
                return self;
            },
            (_, None) => {
                self.err = Some(QuinceError::structure(to, "unknown state"));
                return self;
            },
        };

        if a == Node::End || b == Node::Start {
            self.err = Some(QuinceError::structure(from, format!("no transition may leave end or enter start (to `{}`)", to)));
        } else if self.edges.iter().any(|e| e.from == a && e.to == b) {
            self.err = Some(QuinceError::structure(from, format!("duplicate transition to `{}`", to)));
        } else {
            self.edges.push(Edge { from: a, to: b, probability, group });
        }

        self
    }


    /// Complete building the model.
    ///
    /// # Errors
    /// * `QuinceError::Structure` if silent states form a cycle, a state emits from a conditional
    ///   table, the declared transitions out of a state sum to more than one, or `start` has no
    ///   transition of positive probability
    ///
    /// # Postcondition
    /// This call consumes the `HiddenMarkovModelBuilder`
    pub fn bake(self) -> Result<HiddenMarkovModel> {
        if let Some(e) = self.err {
            return Err(e);
        }

        for s in self.states.iter() {
            if let Some(d) = s.distribution() {
                if let Distribution::Table(_) = &*d.read() {
                    return Err(QuinceError::structure(s.name(), "a conditional table cannot be an emission"));
                }
            }
        }

        ///////////////////////////////////////////////////////////////////////
        // 1) state order: emitting, silent (topological), start, end
        let emitting: Vec<usize> = (0..self.states.len()).filter(|&i| !self.states[i].is_silent()).collect();
        let silent = self.silent_order()?;

        let n = emitting.len() + silent.len() + 2;
        let (start, end) = (n - 2, n - 1);

        let mut position = vec![0; self.states.len()];
        for (baked, &user) in emitting.iter().chain(silent.iter()).enumerate() {
            position[user] = baked;
        }
        let index = |node: Node| match node {
            Node::Start => start,
            Node::End => end,
            Node::State(i) => position[i],
        };

        ///////////////////////////////////////////////////////////////////////
        // 2) outgoing sums, with the remainder of every user state going to end
        let mut probabilities: IndexMap<(usize, usize), f64> = IndexMap::new();
        let mut groups: IndexMap<String, Vec<(usize, usize)>> = IndexMap::new();
        for e in self.edges.iter() {
            let key = (index(e.from), index(e.to));
            probabilities.insert(key, e.probability);
            if let Some(g) = &e.group {
                groups.entry(g.clone()).or_default().push(key);
            }
        }

        for i in (0..n).filter(|&i| i != end) {
            let total: f64 = probabilities.iter().filter(|((a, _), _)| *a == i).map(|(_, p)| p).sum();
            let state_name = self.baked_name(i, &emitting, &silent);

            if total > 1.0 + PROBABILITY_TOLERANCE {
                return Err(QuinceError::structure(state_name, format!("outgoing transitions sum to {}", total)));
            }

            if i != start && 1.0 - total > PROBABILITY_TOLERANCE {
                *probabilities.entry((i, end)).or_insert(0.0) += 1.0 - total;
            }
        }

        if !probabilities.iter().any(|(&(a, _), &p)| a == start && p > 0.0) {
            return Err(QuinceError::structure(self.start_name(), "no transition out of start has positive probability"));
        }

        ///////////////////////////////////////////////////////////////////////
        // 3) index structures
        let mut transitions = Array2::from_elem((n, n), f64::NEG_INFINITY);
        let mut in_edges = vec![BTreeSet::new(); n];
        let mut out_edges = vec![BTreeSet::new(); n];
        for (&(a, b), &p) in probabilities.iter() {
            transitions[[a, b]] = util::ln(p);
            in_edges[b].insert(a);
            out_edges[a].insert(b);
        }

        let infinite = !probabilities.iter().any(|(&(_, b), &p)| b == end && p > 0.0);

        let mut states: Vec<Option<State>> = self.states.into_iter().map(Some).collect();
        let mut baked: Vec<State> = emitting.iter()
                                            .chain(silent.iter())
                                            .filter_map(|&i| states[i].take())
                                            .collect();
        baked.push(State::silent(&format!("{}-start", self.name)));
        baked.push(State::silent(&format!("{}-end", self.name)));

        let mut names = BidirMap::new();
        for (i, s) in baked.iter().enumerate() {
            names.insert(i, String::from(s.name()));
        }

        let mut ties: IndexMap<usize, Vec<usize>> = IndexMap::new();
        for (k, s) in baked.iter().enumerate().take(emitting.len()) {
            if let Some(d) = s.distribution() {
                ties.entry(d.id()).or_default().push(k);
            }
        }

        debug!(
            model = %self.name,
            states = n,
            edges = probabilities.len(),
            tied_groups = ties.values().filter(|g| g.len() > 1).count(),
            infinite,
            "baked hidden markov model"
        );

        Ok(HiddenMarkovModel {
            name: self.name,
            states: baked,
            names,
            transitions,
            in_edges: in_edges.into_iter().map(|s| s.into_iter().collect()).collect(),
            out_edges: out_edges.into_iter().map(|s| s.into_iter().collect()).collect(),
            emitting: emitting.len(),
            ties: ties.into_values().collect(),
            edge_groups: groups.into_values().collect(),
            infinite,
        })
    }

    /// Topological order of the silent user states over silent-to-silent edges
    fn silent_order(&self) -> Result<Vec<usize>> {
        let silent: Vec<usize> = (0..self.states.len()).filter(|&i| self.states[i].is_silent()).collect();

        let edges: Vec<(usize, usize)> = self.edges
                                             .iter()
                                             .filter_map(|e| match (e.from, e.to) {
                                                 (Node::State(a), Node::State(b))
                                                     if self.states[a].is_silent() && self.states[b].is_silent() => Some((a, b)),
                                                 _ => None,
                                             })
                                             .collect();

        let mut degree: Vec<usize> = vec![0; self.states.len()];
        for &(_, b) in edges.iter() {
            degree[b] += 1;
        }

        let mut ready: BTreeSet<usize> = silent.iter().cloned().filter(|&i| degree[i] == 0).collect();
        let mut order = Vec::with_capacity(silent.len());
        while let Some(i) = ready.pop_first() {
            order.push(i);
            for &(_, b) in edges.iter().filter(|&&(a, _)| a == i) {
                degree[b] -= 1;
                if degree[b] == 0 {
                    ready.insert(b);
                }
            }
        }

        match silent.iter().find(|i| !order.contains(i)) {
            Some(&i) => Err(QuinceError::structure(self.states[i].name(), "silent states form a cycle")),
            None => Ok(order),
        }
    }

    fn baked_name(&self, idx: usize, emitting: &[usize], silent: &[usize]) -> String {
        match emitting.iter().chain(silent.iter()).nth(idx) {
            Some(&user) => String::from(self.states[user].name()),
            None if idx == emitting.len() + silent.len() => self.start_name(),
            None => self.end_name(),
        }
    }
}

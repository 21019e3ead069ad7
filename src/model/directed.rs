//! Defines a `BayesianNetwork`, a directed model that represents the factorization of a
//! probability distribution P over discrete variables.

use crate::distribution::{self, Categorical, Distribution, DomainPolicy, SharedDistribution};
use crate::estimators::{Estimator, NetworkEstimator};
use crate::factor::{Factor, Table};
use crate::inference::{self, BeliefConfig, Beliefs, Evidence};
use crate::samplers::{ForwardSampler, Sampler};
use crate::state::State;
use crate::util::{QuinceError, Result};
use crate::variable::{Assignment, Domain, Symbol, Value, Variable};
use super::{Model, Schema};

use bidir_map::BidirMap;
use indexmap::IndexMap;
use ndarray::{Array, IxDyn};
use rand::Rng;
use tracing::debug;

use std::collections::{BTreeSet, HashMap};


/// Represents a Bayesian Network - a Directed Probabilistic Graphical Model.
///
/// # Representation
/// Every node is a `State` holding either a `Categorical` (a root) or a `ConditionalTable` whose
/// parent handles are the distributions of the node's parents. The edges are fixed at bake time
/// and stored as per-node parent index lists, in the column order of each node's table. The
/// nodes keep their declaration order; a topological order is kept alongside for sampling.
#[derive(Debug)]
pub struct BayesianNetwork {

    /// The name of the network
    name: String,

    /// The nodes, in declaration order
    states: Vec<State>,

    /// For each node, the indices of its parents in table column order
    parents: Vec<Vec<usize>>,

    /// A topological order of the node indices
    order: Vec<usize>,

    /// Two way lookup ```(index->Name)``` and ```(Name->index)```
    names: BidirMap<usize, String>,
}

impl BayesianNetwork {

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The nodes of the network in declaration order
    pub fn states(&self) -> &[State] {
        &self.states
    }

    pub fn state(&self, idx: usize) -> Option<&State> {
        self.states.get(idx)
    }

    /// Number of nodes in the network
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Lookup a node index based on the name
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.get_by_second(&String::from(name)).cloned()
    }

    /// Parent indices of node `idx`, in the column order of its table
    pub fn parents(&self, idx: usize) -> &[usize] {
        self.parents.get(idx).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Get a topological order of the `BayesianNetwork`
    pub fn topological_order(&self) -> &[usize] {
        &self.order
    }

    /// The distribution handle of node `idx`
    pub(crate) fn distribution(&self, idx: usize) -> Result<&SharedDistribution> {
        self.states
            .get(idx)
            .and_then(State::distribution)
            .ok_or_else(|| QuinceError::structure(idx, "node has no distribution"))
    }


    /// Determine the probability of a full assignment, given as one value per node in
    /// declaration order.
    ///
    /// # Errors
    /// * `QuinceError::SchemaMismatch` if the row does not hold one value per node
    /// * `QuinceError::Domain` if a value is outside the domain of a conditional table
    pub fn probability(&self, row: &[Value]) -> Result<f64> {
        self.log_probability(row).map(f64::exp)
    }

    /// Natural log of `probability`, by the chain rule
    pub fn log_probability(&self, row: &[Value]) -> Result<f64> {
        let row = self.symbols(row)?;

        let mut total = 0.0;
        for i in 0..self.states.len() {
            let d = self.distribution(i)?.read();
            total += match &*d {
                Distribution::Categorical(c) => c.log_probability(&row[i]),
                Distribution::Table(t) => t.log_probability(&self.node_row(i, &row))?,
                other => return Err(QuinceError::structure(
                    self.node_name(i),
                    format!("{} distribution in a Bayesian network", other.family())
                )),
            };
        }

        Ok(total)
    }


    /// Compute the posterior marginal of every node given `evidence`, with the default
    /// `BeliefConfig`.
    ///
    /// # Returns
    /// `Beliefs` holding one `Categorical` per node in declaration order. Observed nodes are
    /// point masses on their observed value.
    ///
    /// # Errors
    /// * `QuinceError::SchemaMismatch` if the evidence names an unknown node
    /// * `QuinceError::Domain` if an observed value is outside the node's domain
    /// * `QuinceError::ImpossibleEvidence` if the evidence has zero probability
    pub fn predict_proba(&self, evidence: &Evidence) -> Result<Beliefs> {
        self.predict_proba_with(evidence, &BeliefConfig::default())
    }

    /// As `predict_proba`, with explicit inference settings
    pub fn predict_proba_with(&self, evidence: &Evidence, config: &BeliefConfig) -> Result<Beliefs> {
        config.validate()?;

        let domains = self.domains()?;
        let variables = variables(&domains);
        let factors = self.factors(&domains, &variables)?;
        let assignment = self.assignment(evidence, &domains, &variables)?;

        let hidden: Vec<Variable> = variables.iter()
                                             .filter(|v| !assignment.contains(v))
                                             .cloned()
                                             .collect();

        let (posteriors, convergence) = inference::infer_marginals(factors, &hidden, &assignment, config)?;
        let mut posteriors: HashMap<Variable, Vec<f64>> = hidden.into_iter().zip(posteriors).collect();

        let mut marginals = IndexMap::new();
        for (i, state) in self.states.iter().enumerate() {
            let marginal = match assignment.get(&variables[i]) {
                Some(&idx) => Categorical::point_mass(&domains[i], idx),
                None => {
                    let p = posteriors.remove(&variables[i]).ok_or(QuinceError::InvalidScope)?;
                    Categorical::from_parts(&domains[i], &p)
                }
            };
            marginals.insert(String::from(state.name()), marginal);
        }

        Ok(Beliefs { marginals, convergence })
    }

    /// The unconditioned marginal of a single node
    pub fn marginal(&self, name: &str) -> Result<Categorical> {
        let mut beliefs = self.predict_proba(&Evidence::new())?;
        beliefs.marginals
               .swap_remove(name)
               .ok_or_else(|| QuinceError::SchemaMismatch(format!("no node named `{}`", name)))
    }

    /// Fill in the missing values of each row with the most probable value given the observed
    /// ones.
    ///
    /// # Args
    /// * `rows`: one entry per node in declaration order, `None` where the value is missing
    pub fn predict(&self, rows: &[Vec<Option<Symbol>>]) -> Result<Vec<Vec<Symbol>>> {
        rows.iter().map(|row| self.impute(row)).collect()
    }

    fn impute(&self, row: &[Option<Symbol>]) -> Result<Vec<Symbol>> {
        if row.len() != self.states.len() {
            return Err(QuinceError::SchemaMismatch(
                format!("expected {} values per row, found {}", self.states.len(), row.len())
            ));
        }

        let evidence: Evidence = self.states
                                     .iter()
                                     .zip(row.iter())
                                     .filter_map(|(s, v)| v.clone().map(|v| (String::from(s.name()), v)))
                                     .collect();

        if evidence.len() == row.len() {
            return Ok(row.iter().flatten().cloned().collect());
        }

        let beliefs = self.predict_proba(&evidence)?;
        self.states
            .iter()
            .zip(row.iter())
            .map(|(s, v)| match v {
                Some(v) => Ok(v.clone()),
                None => beliefs.marginals
                               .get(s.name())
                               .and_then(Categorical::mode)
                               .cloned()
                               .ok_or(QuinceError::ImpossibleEvidence),
            })
            .collect()
    }


    /// Re-estimate every node from complete rows, one value per node in declaration order.
    /// Tied nodes pool their statistics.
    pub fn fit_with(
        &self,
        rows: &[Vec<Value>],
        weights: Option<&[f64]>,
        inertia: f64,
        policy: DomainPolicy,
    ) -> Result<()> {
        NetworkEstimator::new(self).inertia(inertia).policy(policy).estimate(rows, weights)
    }

    /// Draw a complete assignment by ancestral sampling, one symbol per node in declaration
    /// order.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Vec<Symbol>> {
        ForwardSampler::new(self, rng).sample()
    }


    ///////////////////////////////////////////////////////////////////////////
    // Compilation into factors. Domains may grow when the network is fit, so the factors are
    // rebuilt from the current parameters on every query.

    /// Current domain of every node
    pub(crate) fn domains(&self) -> Result<Vec<Domain>> {
        (0..self.states.len())
            .map(|i| {
                self.distribution(i)?
                    .read()
                    .domain()
                    .ok_or_else(|| QuinceError::structure(self.node_name(i), "node is not discrete"))
            })
            .collect()
    }

    /// One factor per node, of scope ```Pa(X) U X``` in table column order
    fn factors(&self, domains: &[Domain], variables: &[Variable]) -> Result<Vec<Factor>> {
        let mut factors = Vec::with_capacity(self.states.len());

        for i in 0..self.states.len() {
            let d = self.distribution(i)?.read();

            let factor = match &*d {
                Distribution::Categorical(c) => {
                    let tbl: Vec<f64> = domains[i].iter().map(|s| c.probability(s)).collect();
                    Factor::new(vec![variables[i]], Array::from(tbl).into_dyn())?
                },
                Distribution::Table(t) => {
                    // the axes of the table follow the table's own domain order, which need not
                    // match the order of the parent node's domain
                    let remap = self.parents[i]
                        .iter()
                        .zip(t.parent_domains())
                        .map(|(&p, pd)| {
                            domains[p].iter()
                                      .map(|s| pd.index_of(s).ok_or_else(|| {
                                          QuinceError::domain(s, format!("the table of `{}`", self.node_name(i)))
                                      }))
                                      .collect::<Result<Vec<usize>>>()
                        })
                        .collect::<Result<Vec<Vec<usize>>>>()?;

                    let scope: Vec<Variable> = self.parents[i]
                                                   .iter()
                                                   .map(|&p| variables[p])
                                                   .chain(std::iter::once(variables[i]))
                                                   .collect();
                    let shape: Vec<usize> = scope.iter().map(Variable::cardinality).collect();

                    let k = remap.len();
                    let mut src = vec![0; k + 1];
                    let mut tbl = Table::zeros(IxDyn(&shape));
                    for (idx, cell) in tbl.indexed_iter_mut() {
                        for (a, m) in remap.iter().enumerate() {
                            src[a] = m[idx[a]];
                        }
                        src[k] = idx[k];
                        *cell = t.table()[IxDyn(&src)];
                    }

                    Factor::new(scope, tbl)?
                },
                other => return Err(QuinceError::structure(
                    self.node_name(i),
                    format!("{} distribution in a Bayesian network", other.family())
                )),
            };

            factors.push(factor);
        }

        Ok(factors)
    }

    /// Translate named evidence into an `Assignment`
    fn assignment(&self, evidence: &Evidence, domains: &[Domain], variables: &[Variable]) -> Result<Assignment> {
        let mut assignment = Assignment::new();

        for (name, value) in evidence.iter() {
            let i = self.index_of(name)
                        .ok_or_else(|| QuinceError::SchemaMismatch(format!("no node named `{}`", name)))?;
            let idx = domains[i].index_of(value)
                                .ok_or_else(|| QuinceError::domain(value, format!("node `{}`", name)))?;
            assignment.set(&variables[i], idx);
        }

        Ok(assignment)
    }

    /// Check the width of a row and project it onto symbols
    fn symbols(&self, row: &[Value]) -> Result<Vec<Symbol>> {
        Schema::Columns(self.column_names()).check(row)?;
        distribution::symbols(row, "a Bayesian network")
    }

    /// The `(parent values..., own value)` row of node `idx`
    pub(crate) fn node_row<T: Clone>(&self, idx: usize, row: &[T]) -> Vec<T> {
        self.parents[idx]
            .iter()
            .chain(std::iter::once(&idx))
            .map(|&j| row[j].clone())
            .collect()
    }

    pub(crate) fn node_name(&self, idx: usize) -> String {
        self.names.get_by_first(&idx).cloned().unwrap_or_else(|| idx.to_string())
    }

    pub(crate) fn column_names(&self) -> Vec<String> {
        self.states.iter().map(|s| String::from(s.name())).collect()
    }
}

fn variables(domains: &[Domain]) -> Vec<Variable> {
    domains.iter().enumerate().map(|(i, d)| Variable::new(i, d.len())).collect()
}

impl Model for BayesianNetwork {

    fn schema(&self) -> Schema {
        Schema::Columns(self.column_names())
    }

    fn log_probability(&self, row: &[Value]) -> Result<f64> {
        BayesianNetwork::log_probability(self, row)
    }

    fn fit(&mut self, rows: &[Vec<Value>], weights: Option<&[f64]>) -> Result<()> {
        self.fit_with(rows, weights, 0.0, DomainPolicy::Strict)
    }

    type Checkpoint = Vec<(SharedDistribution, Distribution)>;

    fn checkpoint(&self) -> Self::Checkpoint {
        super::capture(self.states.iter().filter_map(State::distribution))
    }

    fn rollback(&mut self, checkpoint: Self::Checkpoint) {
        super::restore(checkpoint)
    }
}


/// An implementation of the [builder pattern] for creating a `BayesianNetwork`.
///
/// Nodes and edges may be added in any order; the structure is only checked by `bake`. The
/// first error encountered while building is kept and returned by `bake`.
///
/// [builder pattern]: https://en.wikipedia.org/wiki/Builder_pattern
pub struct BayesianNetworkBuilder {

    name: String,

    /// The nodes, in declaration order
    states: Vec<State>,

    /// Directed edges ```(parent, child)``` by node index
    edges: Vec<(usize, usize)>,

    /// The names of each node
    names: BidirMap<usize, String>,

    /// The error state of the builder
    err: Option<QuinceError>,
}

impl BayesianNetworkBuilder {

    /// Construct a new `BayesianNetworkBuilder` representing an empty network
    pub fn new(name: &str) -> Self {
        BayesianNetworkBuilder {
            name: String::from(name),
            states: Vec::new(),
            edges: Vec::new(),
            names: BidirMap::new(),
            err: None,
        }
    }

    /// Add a node to the network. Names must be unique.
    pub fn with_state(mut self, state: State) -> Self {
        if self.err.is_some() {
            return self;
        }

        let name = String::from(state.name());
        if self.names.get_by_second(&name).is_some() {
            self.err = Some(QuinceError::structure(&name, "duplicate node name"));
            return self;
        }

        self.names.insert(self.states.len(), name);
        self.states.push(state);
        self
    }

    /// Add several nodes at once
    pub fn with_states(self, states: impl IntoIterator<Item = State>) -> Self {
        states.into_iter().fold(self, |b, s| b.with_state(s))
    }

    /// Add a directed edge ```parent -> child``` between two nodes already in the builder.
    pub fn with_edge(mut self, parent: &str, child: &str) -> Self {
        if self.err.is_some() {
            return self;
        }

        let p = self.names.get_by_second(&String::from(parent)).cloned();
        let c = self.names.get_by_second(&String::from(child)).cloned();

        match (p, c) {
            (Some(p), Some(c)) if self.edges.contains(&(p, c)) => {
                self.err = Some(QuinceError::structure(child, format!("duplicate edge from `{}`", parent)));
            },
            (Some(p), Some(c)) => self.edges.push((p, c)),
            (None, _) => self.err = Some(QuinceError::structure(parent, "unknown node")),
            (_, None) => self.err = Some(QuinceError::structure(child, "unknown node")),
        }

        self
    }


    /// Complete building the model.
    ///
    /// # Returns
    /// the `BayesianNetwork`, or an error if one was generated during the building process
    ///
    /// # Errors
    /// * `QuinceError::Structure` for a cycle, a silent node or a continuous distribution
    /// * `QuinceError::ParentMismatch` if the parents of a table differ from its incoming edges
    /// * `QuinceError::Domain` if a table's parent domain differs from its parent's domain
    ///
    /// # Postcondition
    /// This call consumes the `BayesianNetworkBuilder`
    pub fn bake(self) -> Result<BayesianNetwork> {
        if let Some(e) = self.err {
            return Err(e);
        }

        let n = self.states.len();

        ///////////////////////////////////////////////////////////////////////
        // 1) topological sort (Kahn), smallest ready index first for a stable order
        let mut incoming: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); n];
        for &(p, c) in self.edges.iter() {
            incoming[c].push(p);
            outgoing[p].push(c);
        }

        let mut degree: Vec<usize> = incoming.iter().map(Vec::len).collect();
        let mut ready: BTreeSet<usize> = (0..n).filter(|&i| degree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);

        while let Some(i) = ready.pop_first() {
            order.push(i);
            for &c in outgoing[i].iter() {
                degree[c] -= 1;
                if degree[c] == 0 {
                    ready.insert(c);
                }
            }
        }

        if order.len() < n {
            let stuck = (0..n).find(|i| !order.contains(i)).unwrap_or(0);
            return Err(QuinceError::structure(self.states[stuck].name(), "node is part of a cycle"));
        }

        ///////////////////////////////////////////////////////////////////////
        // 2) resolve the parents of every node against its incoming edges
        let mut parents = Vec::with_capacity(n);
        for (i, state) in self.states.iter().enumerate() {
            parents.push(self.resolve_parents(state, &incoming[i])?);
        }

        debug!(network = %self.name, nodes = n, edges = self.edges.len(), "baked bayesian network");

        Ok(BayesianNetwork {
            name: self.name,
            states: self.states,
            parents,
            order,
            names: self.names,
        })
    }

    /// Match the parent handles of a node's table with the sources of its incoming edges
    fn resolve_parents(&self, state: &State, incoming: &[usize]) -> Result<Vec<usize>> {
        let handle = state.distribution()
                          .ok_or_else(|| QuinceError::structure(state.name(), "silent nodes are not allowed"))?;
        let d = handle.read();

        match &*d {
            Distribution::Categorical(_) if incoming.is_empty() => Ok(Vec::new()),
            Distribution::Categorical(_) => Err(QuinceError::parent_mismatch(
                state.name(),
                "a categorical node cannot have incoming edges"
            )),
            Distribution::Table(t) => {
                let mut resolved: Vec<usize> = Vec::with_capacity(t.parents().len());

                for (k, p) in t.parents().iter().enumerate() {
                    let j = incoming.iter()
                                    .cloned()
                                    .find(|j| {
                                        !resolved.contains(j) &&
                                        self.states[*j].distribution().map_or(false, |d| d.ptr_eq(p))
                                    })
                                    .ok_or_else(|| QuinceError::parent_mismatch(
                                        state.name(),
                                        format!("table parent {} has no incoming edge", k)
                                    ))?;

                    let parent_domain = self.states[j]
                                            .distribution()
                                            .and_then(|d| d.read().domain())
                                            .unwrap_or_default();
                    let table_domain = &t.parent_domains()[k];
                    if !parent_domain.is_subset(table_domain) || !table_domain.is_subset(&parent_domain) {
                        let odd = parent_domain.iter()
                                               .find(|s| !table_domain.contains(s))
                                               .or_else(|| table_domain.iter().find(|s| !parent_domain.contains(s)))
                                               .map(Symbol::to_string)
                                               .unwrap_or_default();
                        return Err(QuinceError::domain(
                            odd,
                            format!("column {} of the table of `{}`", k, state.name())
                        ));
                    }

                    resolved.push(j);
                }

                if resolved.len() != incoming.len() {
                    let extra = incoming.iter()
                                        .find(|j| !resolved.contains(j))
                                        .map(|&j| self.states[j].name())
                                        .unwrap_or_default();
                    return Err(QuinceError::parent_mismatch(
                        state.name(),
                        format!("incoming edge from `{}` is not a parent of the table", extra)
                    ));
                }

                Ok(resolved)
            },
            other => Err(QuinceError::structure(
                state.name(),
                format!("{} distributions are not supported in a Bayesian network", other.family())
            )),
        }
    }
}

//! Definition of the factor module
//!
//! A `Factor` represents a relationship between some set of `Variable`s. Bayesian networks are
//! turned into a bag of `Factor`s (one per conditional table) for exact and approximate inference.

use crate::util::{QuinceError, Result};
use crate::variable::{Assignment, Variable};

use ndarray::{ArrayD, Axis, IxDyn};
use itertools::Itertools;

/// Alias f64 ndarray::Array as Table
pub type Table = ArrayD<f64>;


#[derive(Clone, Debug, PartialEq)]
pub enum Factor {
    /// The empty, identity `Factor` with no scope. This type exists for dealing with arithmetic
    /// operations of `Factor`s
    Identity,

    /// A `Factor` over some scope of variables. Represented as a table as described in Koller
    /// & Friedman.
    TableFactor {
        /// The scope of the `Factor`
        scope: Vec<Variable>,

        /// The values of the `Factor` table. Axis `i` is indexed by `scope[i]`.
        table: Table,
    }
}


impl Factor {

    /// Get the identity factor
    pub fn identity() -> Self {
        Factor::Identity
    }


    /// Create a new `Factor`
    ///
    /// # Errors
    /// * `QuinceError::InvalidScope` if the scope is empty, repeats a variable, or does not match
    ///   the shape of the table
    /// * `QuinceError::InvalidDistribution` if the table holds a negative or non-finite value
    pub fn new(scope: Vec<Variable>, table: Table) -> Result<Self> {
        if scope.is_empty() || scope.len() != table.ndim() {
            return Err(QuinceError::InvalidScope);
        }

        if scope.iter().unique().count() != scope.len() {
            return Err(QuinceError::InvalidScope);
        }

        if scope.iter().map(|v| v.cardinality()).ne(table.shape().iter().cloned()) {
            return Err(QuinceError::InvalidScope);
        }

        // factors may not have negative values
        if table.iter().any(|&v| v < 0.0 || !v.is_finite()) {
            return Err(QuinceError::InvalidDistribution(
                String::from("factor values must be finite and non-negative")
            ));
        }

        Ok(Factor::TableFactor { scope, table })
    }


    /// Check if the `Factor` is the identity `Factor`
    pub fn is_identity(&self) -> bool {
        matches!(self, Factor::Identity)
    }


    /// Retrieve the scope of the `Factor`.
    pub fn scope(&self) -> &[Variable] {
        match self {
            Factor::Identity => &[],
            Factor::TableFactor { scope, .. } => scope
        }
    }


    /// Check whether `var` is in the scope of this `Factor`
    pub fn contains(&self, var: &Variable) -> bool {
        self.scope().contains(var)
    }


    /// The raw table of the `Factor`, or `None` for the identity
    pub fn table(&self) -> Option<&Table> {
        match self {
            Factor::Identity => None,
            Factor::TableFactor { table, .. } => Some(table)
        }
    }


    /// Retrieve the value for a complete assignment over the scope of this `Factor`
    ///
    /// # Args
    /// assignment: a full assignment to the scope of a `Factor`. The assignment's scope may be a
    ///             superset of the `Factor`s scope.
    ///
    /// # Returns
    /// the value of the assignment, or an error. The identity has value one everywhere.
    ///
    /// # Errors
    /// * `QuinceError::IncompleteAssignment`, if assignment is not a complete assignment to the
    ///   scope of the `Factor`
    pub fn value(&self, assignment: &Assignment) -> Result<f64> {
        match self {
            Factor::Identity => Ok(1.0),
            Factor::TableFactor { scope, table } => {
                let idxs = scope.iter()
                                .map(|v| assignment.get(v).cloned())
                                .collect::<Option<Vec<usize>>>()
                                .ok_or(QuinceError::IncompleteAssignment)?;

                table.get(IxDyn(&idxs)).cloned().ok_or(QuinceError::InvalidScope)
            }
        }
    }


    /// Product of this `Factor` and another `Factor`.
    ///
    /// Defined in Koller & Friedman Section 4.2.1. Factors with disjoint scopes produce their
    /// outer product.
    ///
    /// # Returns
    /// A new `Factor` of scope union(self.scope(), other.scope())
    pub fn product(&self, other: &Self) -> Self {
        // Factor::Identity is the multiplicative identity
        let (my_scope, my_table, other_scope, other_table) = match (self, other) {
            (Factor::Identity, _) => return other.clone(),
            (_, Factor::Identity) => return self.clone(),
            (
                Factor::TableFactor { scope: s1, table: t1 },
                Factor::TableFactor { scope: s2, table: t2 }
            ) => (s1, t1, s2, t2)
        };

        // We are computing a new factor Psi(X, Y, Z) = phi1(X, Y) * phi2(Y, Z).
        // See Koller & Friedman Definition 4.2
        let new_scope: Vec<Variable> = my_scope.iter()
                                               .chain(other_scope.iter())
                                               .cloned()
                                               .unique()
                                               .collect();

        let position = |v: &Variable| new_scope.iter().position(|n| n == v).unwrap_or(0);
        let my_pos: Vec<usize> = my_scope.iter().map(position).collect();
        let other_pos: Vec<usize> = other_scope.iter().map(position).collect();

        let new_shape: Vec<usize> = new_scope.iter().map(|v| v.cardinality()).collect();
        let mut tbl = Table::zeros(IxDyn(&new_shape));

        let mut my_idx = vec![0; my_pos.len()];
        let mut other_idx = vec![0; other_pos.len()];

        for (idx, cell) in tbl.indexed_iter_mut() {
            for (k, &p) in my_pos.iter().enumerate() {
                my_idx[k] = idx[p];
            }
            for (k, &p) in other_pos.iter().enumerate() {
                other_idx[k] = idx[p];
            }

            *cell = my_table[IxDyn(&my_idx)] * other_table[IxDyn(&other_idx)];
        }

        Factor::TableFactor { scope: new_scope, table: tbl }
    }


    /// Reduce the `Factor` to over the given partial assignment
    ///
    /// Defined in Koller & Friedman 4.2.3
    ///
    /// # Args
    /// assignment: a partial assignment to the `Factor`
    ///
    /// # Returns
    /// A new `Factor` reduced over the given assignment, and the value of the factor when the
    /// assignment covers its whole scope (the factor then reduces to the identity).
    pub fn reduce(&self, assignment: &Assignment) -> (Self, Option<f64>) {
        match self {
            Factor::Identity => (Factor::Identity, None),
            Factor::TableFactor { scope, table } => {
                let mut view = table.view();
                let mut new_scope: Vec<Variable> = Vec::new();

                // collapse observed axes from the back so earlier axis numbers stay valid
                for (i, v) in scope.iter().enumerate().rev() {
                    if let Some(&val) = assignment.get(v) {
                        view.index_axis_inplace(Axis(i), val);
                    } else {
                        new_scope.push(*v);
                    }
                }
                new_scope.reverse();

                if new_scope.is_empty() {
                    // complete assignment
                    let value = view.iter().next().cloned();
                    (Factor::Identity, value)
                } else if new_scope.len() == scope.len() {
                    // empty assignment (relative to scope)
                    (self.clone(), None)
                } else {
                    (Factor::TableFactor { scope: new_scope, table: view.to_owned() }, None)
                }
            }
        }
    }


    /// Marginalize the `Factor` over the given `Variable`
    ///
    /// Defined in Koller & Friedman 9.3.1
    ///
    /// # Returns
    /// another `Factor`, marginalized over the given `Variable`, and the total mass when `other`
    /// was the last variable in scope.
    pub fn marginalize(&self, other: Variable) -> (Self, Option<f64>) {
        match self {
            // the identity factor marginalized over anything is the identity
            Factor::Identity => (Factor::Identity, None),

            Factor::TableFactor { scope, table } => {
                match scope.iter().position(|&v| v == other) {
                    Some(_) if scope.len() == 1 => (Factor::Identity, Some(table.sum())),
                    Some(idx) => {
                        let new_table = table.sum_axis(Axis(idx));
                        let new_scope = scope.iter().cloned().filter(|&v| v != other).collect();

                        (Factor::TableFactor { scope: new_scope, table: new_table }, None)
                    }
                    // variable not in the scope of this factor, so the factor is already
                    // marginalized over it
                    None => (self.clone(), None)
                }
            }
        }
    }


    /// Normalize the `Factor` so the entries of its table sum to one.
    ///
    /// # Errors
    /// * `QuinceError::ImpossibleEvidence` if the table has no mass
    pub fn normalize(&self) -> Result<Self> {
        match self {
            Factor::Identity => Ok(Factor::Identity),
            Factor::TableFactor { scope, table } => {
                let z = table.sum();
                if z <= 0.0 {
                    return Err(QuinceError::ImpossibleEvidence);
                }

                Ok(Factor::TableFactor { scope: scope.clone(), table: table / z })
            }
        }
    }
}

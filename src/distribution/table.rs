//! Conditional probability tables.

use super::categorical::Categorical;
use super::{DomainPolicy, SharedDistribution};
use crate::util::{self, QuinceError, Result, PROBABILITY_TOLERANCE};
use crate::variable::{Domain, Symbol};

use indexmap::IndexMap;
use itertools::Itertools;
use ndarray::{ArrayD, Axis, IxDyn};
use rand::Rng;

use std::fmt;
use std::iter;

/// `P(X | parents)`, tabulated over every combination of parent values.
///
/// The table has one axis per parent, in the order the parents were given, followed by an axis
/// for the own value. Each axis is laid out in the order of its `Domain`. Every *stratum* (a
/// fixed combination of parent values) sums to one.
#[derive(Clone, Debug)]
pub struct ConditionalTable {
    parents: Vec<SharedDistribution>,
    parent_domains: Vec<Domain>,
    domain: Domain,
    table: ArrayD<f64>,
}

impl ConditionalTable {

    /// Build a table from rows of `(parent values..., own value)` and their probability.
    ///
    /// # Args
    /// * `rows`: the full Cartesian product of parent domains and own domain. Domains are
    ///   collected from the rows in order of first appearance.
    /// * `parents`: handles to the parent distributions, one per leading column of the rows
    ///
    /// # Errors
    /// * `QuinceError::InvalidDistribution` if a row has the wrong width, a probability is out of
    ///   range, a row is missing or repeated, or a stratum does not sum to one
    pub fn new<S, I>(rows: I, parents: Vec<SharedDistribution>) -> Result<Self>
    where
        S: Into<Symbol>,
        I: IntoIterator<Item = (Vec<S>, f64)>,
    {
        let k = parents.len();
        let rows: Vec<(Vec<Symbol>, f64)> = rows.into_iter()
                                                .map(|(r, p)| (r.into_iter().map(Into::into).collect(), p))
                                                .collect();

        if rows.is_empty() {
            return Err(QuinceError::InvalidDistribution(String::from("table has no rows")));
        }

        ///////////////////////////////////////////////////////////////////////
        // 1) collect the domains
        let mut parent_domains = vec![Domain::new(); k];
        let mut domain = Domain::new();

        for (r, p) in rows.iter() {
            if r.len() != k + 1 {
                return Err(QuinceError::InvalidDistribution(
                    format!("row has {} symbols, expected {}", r.len(), k + 1)
                ));
            }
            if !p.is_finite() || *p < 0.0 || *p > 1.0 + PROBABILITY_TOLERANCE {
                return Err(QuinceError::InvalidDistribution(format!("row probability {}", p)));
            }

            for (d, s) in parent_domains.iter_mut().zip(r.iter()) {
                d.insert(s.clone());
            }
            domain.insert(r[k].clone());
        }

        ///////////////////////////////////////////////////////////////////////
        // 2) the rows must be exactly the Cartesian product
        let shape: Vec<usize> = parent_domains.iter()
                                              .map(Domain::len)
                                              .chain(iter::once(domain.len()))
                                              .collect();
        let expected: usize = shape.iter().product();
        if rows.len() != expected {
            return Err(QuinceError::InvalidDistribution(
                format!("{} rows given, the full product of domains has {}", rows.len(), expected)
            ));
        }

        let mut table = ArrayD::from_elem(IxDyn(&shape), f64::NAN);
        for (r, p) in rows.iter() {
            let idx: Vec<usize> = parent_domains.iter()
                                                .chain(iter::once(&domain))
                                                .zip(r.iter())
                                                .filter_map(|(d, s)| d.index_of(s))
                                                .collect();

            let cell = &mut table[IxDyn(&idx)];
            if !cell.is_nan() {
                return Err(QuinceError::InvalidDistribution(
                    format!("row ({}) repeats", r.iter().join(", "))
                ));
            }
            *cell = *p;
        }

        ///////////////////////////////////////////////////////////////////////
        // 3) every stratum is a distribution
        for lane in table.lanes(Axis(k)) {
            let total = lane.sum();
            if (total - 1.0).abs() > PROBABILITY_TOLERANCE {
                return Err(QuinceError::InvalidDistribution(
                    format!("a parent stratum sums to {}", total)
                ));
            }
        }

        Ok(ConditionalTable { parents, parent_domains, domain, table })
    }


    /// Assemble a table from pre-validated parts.
    pub(crate) fn from_parts(
        parents: Vec<SharedDistribution>,
        parent_domains: Vec<Domain>,
        domain: Domain,
        table: ArrayD<f64>,
    ) -> Self {
        ConditionalTable { parents, parent_domains, domain, table }
    }


    /// Handles to the parent distributions, in column order
    pub fn parents(&self) -> &[SharedDistribution] {
        &self.parents
    }

    pub fn parent_domains(&self) -> &[Domain] {
        &self.parent_domains
    }

    /// Domain of the own (last) column
    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub fn table(&self) -> &ArrayD<f64> {
        &self.table
    }


    /// Translate a `(parents..., own)` row into table indices.
    ///
    /// # Errors
    /// * `QuinceError::SchemaMismatch` if the row has the wrong width
    /// * `QuinceError::Domain` if any symbol is outside its column's domain
    pub fn index(&self, row: &[Symbol]) -> Result<Vec<usize>> {
        if row.len() != self.parents.len() + 1 {
            return Err(QuinceError::SchemaMismatch(
                format!("table expects {} values, got {}", self.parents.len() + 1, row.len())
            ));
        }

        self.parent_domains
            .iter()
            .chain(iter::once(&self.domain))
            .zip(row.iter())
            .enumerate()
            .map(|(i, (d, s))| {
                d.index_of(s).ok_or_else(|| {
                    QuinceError::domain(s, format!("column {} of the conditional table", i))
                })
            })
            .collect()
    }

    /// `P(own | parents)` for a full `(parents..., own)` row
    pub fn probability(&self, row: &[Symbol]) -> Result<f64> {
        let idx = self.index(row)?;
        Ok(self.table[IxDyn(&idx)])
    }

    pub fn log_probability(&self, row: &[Symbol]) -> Result<f64> {
        self.probability(row).map(util::ln)
    }

    /// The distribution of the own value for a fixed combination of parent values
    pub fn stratum(&self, parents: &[Symbol]) -> Result<Categorical> {
        if parents.len() != self.parents.len() {
            return Err(QuinceError::UnresolvedParents);
        }

        let mut view = self.table.view();
        for (i, (d, s)) in self.parent_domains.iter().zip(parents.iter()).enumerate().rev() {
            let idx = d.index_of(s).ok_or_else(|| {
                QuinceError::domain(s, format!("column {} of the conditional table", i))
            })?;
            view.index_axis_inplace(Axis(i), idx);
        }

        let probabilities: Vec<f64> = view.iter().cloned().collect();
        Ok(Categorical::from_parts(&self.domain, &probabilities))
    }

    /// Draw the own value given resolved parent values
    pub fn sample_given<R: Rng + ?Sized>(&self, parents: &[Symbol], rng: &mut R) -> Result<Symbol> {
        self.stratum(parents)?.sample(rng)
    }

    /// All rows of the table with their probabilities, last column varying fastest
    pub fn rows(&self) -> Vec<(Vec<Symbol>, f64)> {
        self.table
            .indexed_iter()
            .map(|(idx, &p)| {
                let row = self.parent_domains
                              .iter()
                              .chain(iter::once(&self.domain))
                              .enumerate()
                              .filter_map(|(i, d)| d.get(idx[i]).cloned())
                              .collect();
                (row, p)
            })
            .collect()
    }


    /// Re-estimate every stratum independently from weighted row counts.
    ///
    /// Strata that received no weight keep their previous parameters.
    ///
    /// # Errors
    /// * `QuinceError::SchemaMismatch` if a row has the wrong width
    /// * `QuinceError::Domain` under `DomainPolicy::Strict` if a row holds an unknown symbol
    pub fn from_summary(
        &mut self,
        counts: &IndexMap<Vec<Symbol>, f64>,
        inertia: f64,
        policy: DomainPolicy,
    ) -> Result<()> {
        let k = self.parents.len();

        ///////////////////////////////////////////////////////////////////////
        // 1) check the domains, extending them if permitted
        for row in counts.keys() {
            match self.index(row) {
                Ok(_) => (),
                Err(QuinceError::Domain { .. }) if policy == DomainPolicy::Extend => {
                    self.extend(row);
                }
                Err(e) => return Err(e),
            }
        }

        ///////////////////////////////////////////////////////////////////////
        // 2) tabulate the counts
        let mut observed = ArrayD::<f64>::zeros(self.table.raw_dim());
        for (row, w) in counts.iter() {
            let idx = self.index(row)?;
            observed[IxDyn(&idx)] += w;
        }

        ///////////////////////////////////////////////////////////////////////
        // 3) per-stratum maximum likelihood
        for (mut lane, seen) in self.table.lanes_mut(Axis(k)).into_iter().zip(observed.lanes(Axis(k))) {
            let total = seen.sum();
            if total <= 0.0 {
                continue;
            }

            for (p, c) in lane.iter_mut().zip(seen.iter()) {
                *p = inertia * *p + (1.0 - inertia) * (c / total);
            }
        }

        Ok(())
    }


    /// Grow the domains to include the symbols of `row`. New own values get zero probability in
    /// existing strata; new strata start uniform.
    fn extend(&mut self, row: &[Symbol]) {
        let k = self.parents.len();
        let old_shape = self.table.shape().to_vec();

        for (d, s) in self.parent_domains.iter_mut().zip(row.iter()) {
            d.insert(s.clone());
        }
        if let Some(s) = row.get(k) {
            self.domain.insert(s.clone());
        }

        let new_shape: Vec<usize> = self.parent_domains
                                        .iter()
                                        .map(Domain::len)
                                        .chain(iter::once(self.domain.len()))
                                        .collect();
        let uniform = 1.0 / self.domain.len() as f64;
        let old = &self.table;

        let table = ArrayD::from_shape_fn(IxDyn(&new_shape), |idx: IxDyn| {
            if (0..k).any(|i| idx[i] >= old_shape[i]) {
                uniform
            } else if idx[k] >= old_shape[k] {
                0.0
            } else {
                old[&idx]
            }
        });

        self.table = table;
    }
}

impl fmt::Display for ConditionalTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (row, p) in self.rows() {
            writeln!(f, "{}\t{}", row.iter().join("\t"), p)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::Distribution;

    fn coin() -> SharedDistribution {
        SharedDistribution::new(Categorical::new(vec![(true, 0.5), (false, 0.5)]).unwrap())
    }

    fn flat(parent: &SharedDistribution) -> ConditionalTable {
        ConditionalTable::new(
            vec![
                (vec![true, true], 0.5),
                (vec![true, false], 0.5),
                (vec![false, true], 0.5),
                (vec![false, false], 0.5),
            ],
            vec![parent.clone()]
        ).unwrap()
    }

    #[test]
    fn lookup() {
        let parent = coin();
        let t = ConditionalTable::new(
            vec![
                (vec!["a", "x"], 0.2),
                (vec!["a", "y"], 0.8),
                (vec!["b", "x"], 0.9),
                (vec!["b", "y"], 0.1),
            ],
            vec![parent]
        ).unwrap();

        assert_eq!(t.probability(&["b".into(), "x".into()]).unwrap(), 0.9);
        assert!(matches!(
            t.probability(&["c".into(), "x".into()]),
            Err(QuinceError::Domain { .. })
        ));
        assert!(matches!(t.probability(&["a".into()]), Err(QuinceError::SchemaMismatch(_))));

        let s = t.stratum(&["a".into()]).unwrap();
        assert_eq!(s.probability(&"y".into()), 0.8);
    }

    #[test]
    fn rejects_incomplete_tables() {
        let parent = coin();

        // missing (false, false)
        let missing = ConditionalTable::new(
            vec![(vec![true, true], 0.5), (vec![true, false], 0.5), (vec![false, true], 1.0)],
            vec![parent.clone()]
        );
        assert!(missing.is_err());

        // stratum does not sum to one
        let unnormalized = ConditionalTable::new(
            vec![
                (vec![true, true], 0.5),
                (vec![true, false], 0.6),
                (vec![false, true], 0.5),
                (vec![false, false], 0.5),
            ],
            vec![parent.clone()]
        );
        assert!(unnormalized.is_err());

        // repeated row
        let repeated = ConditionalTable::new(
            vec![
                (vec![true, true], 0.5),
                (vec![true, true], 0.5),
                (vec![false, true], 0.5),
                (vec![false, false], 0.5),
            ],
            vec![parent]
        );
        assert!(repeated.is_err());
    }

    #[test]
    /// Weight only on (True, True) re-estimates the True stratum and leaves False untouched.
    fn fit_untouched_stratum() {
        let parent = coin();
        let mut t = flat(&parent);

        let mut counts = IndexMap::new();
        counts.insert(vec![Symbol::from(true), Symbol::from(true)], 5.0);
        t.from_summary(&counts, 0.0, DomainPolicy::Strict).unwrap();

        assert_eq!(t.probability(&[true.into(), true.into()]).unwrap(), 1.0);
        assert_eq!(t.probability(&[true.into(), false.into()]).unwrap(), 0.0);
        assert_eq!(t.probability(&[false.into(), true.into()]).unwrap(), 0.5);
        assert_eq!(t.probability(&[false.into(), false.into()]).unwrap(), 0.5);
    }

    #[test]
    fn domain_policy() {
        let parent = coin();
        let mut t = flat(&parent);

        let mut counts = IndexMap::new();
        counts.insert(vec![Symbol::from(true), Symbol::from("maybe")], 1.0);
        counts.insert(vec![Symbol::from(true), Symbol::from(true)], 1.0);

        assert!(matches!(
            t.from_summary(&counts, 0.0, DomainPolicy::Strict),
            Err(QuinceError::Domain { .. })
        ));
        assert_eq!(t.domain().len(), 2);

        t.from_summary(&counts, 0.0, DomainPolicy::Extend).unwrap();
        assert_eq!(t.domain().len(), 3);
        assert_eq!(t.probability(&[true.into(), "maybe".into()]).unwrap(), 0.5);
        assert_eq!(t.probability(&[true.into(), true.into()]).unwrap(), 0.5);
        assert_eq!(t.probability(&[false.into(), "maybe".into()]).unwrap(), 0.0);
        assert_eq!(t.probability(&[false.into(), false.into()]).unwrap(), 0.5);
    }

    #[test]
    fn extend_adds_uniform_strata() {
        let parent = coin();
        let mut t = flat(&parent);

        let mut counts = IndexMap::new();
        counts.insert(vec![Symbol::from("neither"), Symbol::from(true)], 0.0);
        counts.insert(vec![Symbol::from(true), Symbol::from(true)], 1.0);
        t.from_summary(&counts, 0.0, DomainPolicy::Extend).unwrap();

        assert_eq!(t.parent_domains()[0].len(), 3);
        assert_eq!(t.probability(&["neither".into(), false.into()]).unwrap(), 0.5);
        assert_eq!(t.rows().len(), 6);
    }

    #[test]
    fn rows_round_trip() {
        let parent = coin();
        let t = flat(&parent);
        let again = ConditionalTable::new(t.rows(), vec![parent]).unwrap();
        assert_eq!(again.table(), t.table());
        assert!(Distribution::Table(again).is_discrete());
    }
}

//! Probability distributions.
//!
//! `Distribution` is a closed set of families sharing one capability surface: evaluate, sample,
//! summarize and re-estimate. Models never hold a `Distribution` directly, they hold a
//! `SharedDistribution` handle. Cloning the handle *ties* the parameters: every holder observes
//! re-estimation through any of them, and learners pool statistics by handle identity.

use crate::util::{QuinceError, Result};
use crate::variable::{Domain, Symbol, Value};

use rand::Rng;
use serde::{Deserialize, Serialize};

use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

mod categorical;
mod continuous;
mod stats;
mod table;

pub use self::categorical::Categorical;
pub use self::continuous::{Exponential, Normal, Uniform, MIN_STD};
pub use self::stats::SufficientStatistics;
pub use self::table::ConditionalTable;

/// What re-estimation does with symbols that are not part of a discrete domain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainPolicy {
    /// Fail with `QuinceError::Domain`
    #[default]
    Strict,

    /// Grow the domain. New symbols start with zero probability in existing strata and new
    /// strata start uniform, then the usual maximum likelihood update applies.
    Extend,
}

#[derive(Clone, Debug)]
pub enum Distribution {
    Categorical(Categorical),
    Normal(Normal),
    Uniform(Uniform),
    Exponential(Exponential),
    Table(ConditionalTable),
}

impl Distribution {

    /// Short name of the family
    pub fn family(&self) -> &'static str {
        match self {
            Distribution::Categorical(_) => "categorical",
            Distribution::Normal(_) => "normal",
            Distribution::Uniform(_) => "uniform",
            Distribution::Exponential(_) => "exponential",
            Distribution::Table(_) => "conditional table",
        }
    }

    /// Whether the distribution is over symbols
    pub fn is_discrete(&self) -> bool {
        matches!(self, Distribution::Categorical(_) | Distribution::Table(_))
    }

    /// The domain of a discrete distribution (for a table, of its own column)
    pub fn domain(&self) -> Option<Domain> {
        match self {
            Distribution::Categorical(c) => Some(c.domain()),
            Distribution::Table(t) => Some(t.domain().clone()),
            _ => None,
        }
    }

    /// Number of values a row for this distribution holds
    pub fn width(&self) -> usize {
        match self {
            Distribution::Table(t) => t.parents().len() + 1,
            _ => 1,
        }
    }

    pub fn as_categorical(&self) -> Option<&Categorical> {
        match self {
            Distribution::Categorical(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&ConditionalTable> {
        match self {
            Distribution::Table(t) => Some(t),
            _ => None,
        }
    }


    /// Probability (or density) of a single value.
    ///
    /// # Errors
    /// * `QuinceError::Domain` if the value is of the wrong kind for the family
    /// * `QuinceError::UnresolvedParents` for a conditional table, which needs a whole row
    pub fn probability(&self, value: &Value) -> Result<f64> {
        self.log_probability(value).map(f64::exp)
    }

    /// Natural log of `probability`, `NEG_INFINITY` where the probability is zero
    pub fn log_probability(&self, value: &Value) -> Result<f64> {
        let symbol = |context: &str| {
            value.as_symbol().ok_or_else(|| QuinceError::domain(value, context))
        };
        let real = |context: &str| {
            value.as_real().ok_or_else(|| QuinceError::domain(value, context))
        };

        match self {
            Distribution::Categorical(c) => Ok(c.log_probability(symbol("a categorical distribution")?)),
            Distribution::Normal(n) => Ok(n.log_probability(real("a normal distribution")?)),
            Distribution::Uniform(u) => Ok(u.log_probability(real("a uniform distribution")?)),
            Distribution::Exponential(e) => Ok(e.log_probability(real("an exponential distribution")?)),
            Distribution::Table(_) => Err(QuinceError::UnresolvedParents),
        }
    }

    /// Log probability of a row: `(parents..., own)` for a table, a single value otherwise
    pub fn row_log_probability(&self, row: &[Value]) -> Result<f64> {
        match (self, row) {
            (Distribution::Table(t), _) => t.log_probability(&symbols(row, "a conditional table")?),
            (_, [value]) => self.log_probability(value),
            _ => Err(QuinceError::SchemaMismatch(
                format!("expected a single value, found a row of {}", row.len())
            )),
        }
    }


    /// Draw `n` independent values.
    ///
    /// # Errors
    /// * `QuinceError::UnresolvedParents` for a conditional table; use
    ///   `ConditionalTable::sample_given` once the parents are known
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, n: usize) -> Result<Vec<Value>> {
        (0..n).map(|_| self.sample_one(rng)).collect()
    }

    pub fn sample_one<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Value> {
        match self {
            Distribution::Categorical(c) => c.sample(rng).map(Value::Symbol),
            Distribution::Normal(n) => n.sample(rng).map(Value::Real),
            Distribution::Uniform(u) => u.sample(rng).map(Value::Real),
            Distribution::Exponential(e) => e.sample(rng).map(Value::Real),
            Distribution::Table(_) => Err(QuinceError::UnresolvedParents),
        }
    }


    /// Empty statistics of the right family for this distribution
    pub fn blank_statistics(&self) -> SufficientStatistics {
        match self {
            Distribution::Categorical(_) => SufficientStatistics::categorical(),
            Distribution::Normal(_) => SufficientStatistics::normal(),
            Distribution::Uniform(_) => SufficientStatistics::uniform(),
            Distribution::Exponential(_) => SufficientStatistics::exponential(),
            Distribution::Table(_) => SufficientStatistics::table(),
        }
    }

    /// Summarize weighted rows. Univariate families take rows of length one.
    ///
    /// # Errors
    /// * `QuinceError::SchemaMismatch` if `weights` and `rows` differ in length
    pub fn summarize(&self, rows: &[Vec<Value>], weights: Option<&[f64]>) -> Result<SufficientStatistics> {
        let weights = resolve_weights(rows.len(), weights)?;

        let mut stats = self.blank_statistics();
        for (row, w) in rows.iter().zip(weights.iter()) {
            stats.add_row(row, *w)?;
        }
        Ok(stats)
    }

    /// Re-estimate the parameters from a summary.
    ///
    /// `inertia` in `[0, 1]` blends the old parameters with the maximum likelihood estimate.
    /// A summary (or, for tables, a stratum) with no weight leaves the parameters unchanged.
    pub fn from_summary(
        &mut self,
        stats: &SufficientStatistics,
        inertia: f64,
        policy: DomainPolicy,
    ) -> Result<()> {
        match (self, stats) {
            (Distribution::Categorical(c), SufficientStatistics::Categorical { counts }) => {
                c.from_summary(counts, inertia, policy)
            }
            (Distribution::Table(t), SufficientStatistics::Table { counts }) => {
                t.from_summary(counts, inertia, policy)
            }
            (Distribution::Normal(n), SufficientStatistics::Normal { weight, sum, sum_squares }) => {
                n.from_summary(*weight, *sum, *sum_squares, inertia);
                Ok(())
            }
            (Distribution::Uniform(u), SufficientStatistics::Uniform { min, max }) => {
                u.from_summary(*min, *max, inertia);
                Ok(())
            }
            (Distribution::Exponential(e), SufficientStatistics::Exponential { weight, sum }) => {
                e.from_summary(*weight, *sum, inertia);
                Ok(())
            }
            (d, _) => Err(QuinceError::InvalidDistribution(
                format!("statistics do not match a {} distribution", d.family())
            )),
        }
    }

    /// Weighted maximum likelihood re-estimation from univariate samples
    pub fn fit(&mut self, samples: &[Value], weights: Option<&[f64]>) -> Result<()> {
        let rows: Vec<Vec<Value>> = samples.iter().map(|v| vec![v.clone()]).collect();
        self.fit_rows(&rows, weights)
    }

    /// Weighted maximum likelihood re-estimation from rows
    pub fn fit_rows(&mut self, rows: &[Vec<Value>], weights: Option<&[f64]>) -> Result<()> {
        let stats = self.summarize(rows, weights)?;
        self.from_summary(&stats, 0.0, DomainPolicy::Strict)
    }
}

/// Unit weights when none are given; otherwise check the lengths agree.
pub(crate) fn resolve_weights(len: usize, weights: Option<&[f64]>) -> Result<Vec<f64>> {
    match weights {
        None => Ok(vec![1.0; len]),
        Some(w) if w.len() == len => Ok(w.to_vec()),
        Some(w) => Err(QuinceError::SchemaMismatch(
            format!("{} weights given for {} rows", w.len(), len)
        )),
    }
}

/// Project a row of values onto symbols
pub(crate) fn symbols(row: &[Value], context: &str) -> Result<Vec<Symbol>> {
    row.iter()
       .map(|v| v.as_symbol().cloned().ok_or_else(|| QuinceError::domain(v, context)))
       .collect()
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Distribution::Categorical(c) => write!(f, "{}", c),
            Distribution::Normal(n) => write!(f, "{}", n),
            Distribution::Uniform(u) => write!(f, "{}", u),
            Distribution::Exponential(e) => write!(f, "{}", e),
            Distribution::Table(t) => write!(f, "{}", t),
        }
    }
}

macro_rules! impl_from_family {
    ($($family:ident => $variant:ident),*) => {
        $(
            impl From<$family> for Distribution {
                fn from(d: $family) -> Self {
                    Distribution::$variant(d)
                }
            }

            impl From<$family> for SharedDistribution {
                fn from(d: $family) -> Self {
                    SharedDistribution::new(d)
                }
            }
        )*
    };
}

impl_from_family!(
    Categorical => Categorical,
    Normal => Normal,
    Uniform => Uniform,
    Exponential => Exponential,
    ConditionalTable => Table
);


/// A reference-counted, lock-protected handle to a `Distribution`.
///
/// Clones share the same parameters. Identity (`ptr_eq`, `id`) is what parameter tying and the
/// parent lists of conditional tables are keyed on.
#[derive(Clone, Debug)]
pub struct SharedDistribution(Arc<RwLock<Distribution>>);

impl SharedDistribution {

    pub fn new(distribution: impl Into<Distribution>) -> Self {
        SharedDistribution(Arc::new(RwLock::new(distribution.into())))
    }

    /// Shared access to the distribution. A poisoned lock is recovered, since no update leaves a
    /// distribution half-written across a panic boundary.
    pub fn read(&self) -> RwLockReadGuard<'_, Distribution> {
        self.0.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Exclusive access to the distribution
    pub fn write(&self) -> RwLockWriteGuard<'_, Distribution> {
        self.0.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether both handles refer to the same distribution
    pub fn ptr_eq(&self, other: &SharedDistribution) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// An identifier that is equal for exactly the handles that are `ptr_eq`
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    /// A copy of the current parameters
    pub fn snapshot(&self) -> Distribution {
        self.read().clone()
    }

    pub fn probability(&self, value: &Value) -> Result<f64> {
        self.read().probability(value)
    }

    pub fn log_probability(&self, value: &Value) -> Result<f64> {
        self.read().log_probability(value)
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, n: usize) -> Result<Vec<Value>> {
        self.read().sample(rng, n)
    }

    pub fn fit(&self, samples: &[Value], weights: Option<&[f64]>) -> Result<()> {
        self.write().fit(samples, weights)
    }

    pub fn fit_rows(&self, rows: &[Vec<Value>], weights: Option<&[f64]>) -> Result<()> {
        self.write().fit_rows(rows, weights)
    }
}

impl From<Distribution> for SharedDistribution {
    fn from(d: Distribution) -> Self {
        SharedDistribution::new(d)
    }
}

impl fmt::Display for SharedDistribution {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", &*self.read())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tying_shares_parameters() {
        let d = SharedDistribution::new(Normal::new(0.0, 1.0).unwrap());
        let tied = d.clone();
        let other = SharedDistribution::new(Normal::new(0.0, 1.0).unwrap());

        assert!(d.ptr_eq(&tied));
        assert_eq!(d.id(), tied.id());
        assert!(!d.ptr_eq(&other));

        tied.fit(&[Value::Real(4.0), Value::Real(6.0)], None).unwrap();
        match d.snapshot() {
            Distribution::Normal(n) => assert_eq!(n.mean(), 5.0),
            _ => panic!("wrong family"),
        }
    }

    #[test]
    fn wrong_value_kind() {
        let d = Distribution::from(Categorical::new(vec![("a", 1.0)]).unwrap());
        assert!(matches!(d.probability(&Value::Real(1.0)), Err(QuinceError::Domain { .. })));

        let n = Distribution::from(Normal::new(0.0, 1.0).unwrap());
        assert!(matches!(n.probability(&"a".into()), Err(QuinceError::Domain { .. })));
    }

    #[test]
    fn tables_need_parents() {
        let parent = SharedDistribution::new(Categorical::new(vec![("a", 1.0)]).unwrap());
        let table = Distribution::from(
            ConditionalTable::new(vec![(vec!["a", "x"], 1.0)], vec![parent]).unwrap()
        );
        let mut rng = rand::thread_rng();

        assert_eq!(table.sample(&mut rng, 1), Err(QuinceError::UnresolvedParents));
        assert_eq!(table.probability(&"x".into()), Err(QuinceError::UnresolvedParents));
        assert_eq!(table.row_log_probability(&["a".into(), "x".into()]), Ok(0.0));
        assert_eq!(table.width(), 2);
    }

    #[test]
    fn categorical_sums_to_one_after_fit() {
        let mut d = Distribution::from(Categorical::uniform(vec!["a", "b", "c"]).unwrap());
        d.fit(&["a".into(), "a".into(), "c".into()], Some(&[1.0, 2.0, 0.5])).unwrap();

        let c = d.as_categorical().unwrap();
        let total: f64 = c.iter().map(|(_, p)| p).sum();
        assert!((total - 1.0).abs() < 1e-12);
        assert_eq!(c.probability(&"b".into()), 0.0);
    }

    #[test]
    fn mismatched_weights() {
        let mut d = Distribution::from(Exponential::new(1.0).unwrap());
        assert!(matches!(
            d.fit(&[Value::Real(1.0)], Some(&[1.0, 1.0])),
            Err(QuinceError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn policy_config() {
        let p: DomainPolicy = serde_json::from_str("\"extend\"").unwrap();
        assert_eq!(p, DomainPolicy::Extend);
        assert_eq!(DomainPolicy::default(), DomainPolicy::Strict);
    }
}

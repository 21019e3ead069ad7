//! Additive sufficient statistics.
//!
//! Every learner in the crate works in two phases: observations are folded into a
//! `SufficientStatistics` value, and a distribution is then re-estimated from the summary. Since
//! summaries are additive, statistics from independent sequences or data partitions can be
//! computed separately and merged.

use crate::util::{QuinceError, Result};
use crate::variable::{Symbol, Value};

use indexmap::IndexMap;

#[derive(Clone, Debug, PartialEq)]
pub enum SufficientStatistics {

    /// Weighted symbol counts
    Categorical { counts: IndexMap<Symbol, f64> },

    /// Weighted moments `(sum w, sum wx, sum wx^2)`
    Normal { weight: f64, sum: f64, sum_squares: f64 },

    /// Range of the observations with positive weight
    Uniform { min: f64, max: f64 },

    /// Weighted moments `(sum w, sum wx)`
    Exponential { weight: f64, sum: f64 },

    /// Weighted counts of full `(parents..., own)` rows
    Table { counts: IndexMap<Vec<Symbol>, f64> },
}

fn expect_symbol<'a>(value: &'a Value, context: &str) -> Result<&'a Symbol> {
    value.as_symbol().ok_or_else(|| QuinceError::domain(value, context))
}

fn expect_real(value: &Value, context: &str) -> Result<f64> {
    value.as_real()
         .filter(|x| x.is_finite())
         .ok_or_else(|| QuinceError::domain(value, context))
}

impl SufficientStatistics {

    /// Empty categorical counts
    pub fn categorical() -> Self {
        SufficientStatistics::Categorical { counts: IndexMap::new() }
    }

    /// Empty normal moments
    pub fn normal() -> Self {
        SufficientStatistics::Normal { weight: 0.0, sum: 0.0, sum_squares: 0.0 }
    }

    /// Empty range
    pub fn uniform() -> Self {
        SufficientStatistics::Uniform { min: f64::INFINITY, max: f64::NEG_INFINITY }
    }

    /// Empty exponential moments
    pub fn exponential() -> Self {
        SufficientStatistics::Exponential { weight: 0.0, sum: 0.0 }
    }

    /// Empty table counts
    pub fn table() -> Self {
        SufficientStatistics::Table { counts: IndexMap::new() }
    }


    /// Fold a single weighted observation into the summary.
    ///
    /// Observations with zero weight are ignored.
    ///
    /// # Errors
    /// * `QuinceError::Domain` if the value does not fit the family (a real number for a
    ///   categorical, a symbol for a continuous family)
    /// * `QuinceError::SchemaMismatch` for table statistics, which need whole rows
    pub fn add(&mut self, value: &Value, weight: f64) -> Result<()> {
        if !(weight > 0.0) {
            return if weight == 0.0 {
                Ok(())
            } else {
                Err(QuinceError::InvalidConfig(format!("invalid sample weight {}", weight)))
            };
        }

        match self {
            SufficientStatistics::Categorical { counts } => {
                let symbol = expect_symbol(value, "a categorical distribution")?;
                *counts.entry(symbol.clone()).or_insert(0.0) += weight;
            }
            SufficientStatistics::Normal { weight: w, sum, sum_squares } => {
                let x = expect_real(value, "a normal distribution")?;
                *w += weight;
                *sum += weight * x;
                *sum_squares += weight * x * x;
            }
            SufficientStatistics::Uniform { min, max } => {
                let x = expect_real(value, "a uniform distribution")?;
                *min = min.min(x);
                *max = max.max(x);
            }
            SufficientStatistics::Exponential { weight: w, sum } => {
                let x = expect_real(value, "an exponential distribution")?;
                *w += weight;
                *sum += weight * x;
            }
            SufficientStatistics::Table { .. } => {
                return Err(QuinceError::SchemaMismatch(
                    String::from("conditional tables are summarized from whole rows")
                ));
            }
        }

        Ok(())
    }


    /// Fold a weighted row into the summary. Univariate statistics expect rows of length one.
    pub fn add_row(&mut self, row: &[Value], weight: f64) -> Result<()> {
        match self {
            SufficientStatistics::Table { counts } => {
                if !(weight >= 0.0) {
                    return Err(QuinceError::InvalidConfig(format!("invalid sample weight {}", weight)));
                }
                if weight == 0.0 {
                    return Ok(());
                }

                let key = row.iter()
                             .map(|v| expect_symbol(v, "a conditional table").map(Clone::clone))
                             .collect::<Result<Vec<Symbol>>>()?;
                *counts.entry(key).or_insert(0.0) += weight;
                Ok(())
            }
            _ => match row {
                [value] => self.add(value, weight),
                _ => Err(QuinceError::SchemaMismatch(
                    format!("expected a single value, found a row of {}", row.len())
                ))
            }
        }
    }


    /// Add the contents of `other` to `self`.
    ///
    /// # Errors
    /// * `QuinceError::InvalidDistribution` if the summaries describe different families
    pub fn merge(&mut self, other: &SufficientStatistics) -> Result<()> {
        match (self, other) {
            (
                SufficientStatistics::Categorical { counts },
                SufficientStatistics::Categorical { counts: more }
            ) => {
                for (symbol, w) in more {
                    *counts.entry(symbol.clone()).or_insert(0.0) += w;
                }
            }
            (
                SufficientStatistics::Table { counts },
                SufficientStatistics::Table { counts: more }
            ) => {
                for (row, w) in more {
                    *counts.entry(row.clone()).or_insert(0.0) += w;
                }
            }
            (
                SufficientStatistics::Normal { weight, sum, sum_squares },
                SufficientStatistics::Normal { weight: w2, sum: s2, sum_squares: q2 }
            ) => {
                *weight += w2;
                *sum += s2;
                *sum_squares += q2;
            }
            (
                SufficientStatistics::Uniform { min, max },
                SufficientStatistics::Uniform { min: m2, max: x2 }
            ) => {
                *min = min.min(*m2);
                *max = max.max(*x2);
            }
            (
                SufficientStatistics::Exponential { weight, sum },
                SufficientStatistics::Exponential { weight: w2, sum: s2 }
            ) => {
                *weight += w2;
                *sum += s2;
            }
            _ => {
                return Err(QuinceError::InvalidDistribution(
                    String::from("cannot merge statistics of different families")
                ));
            }
        }

        Ok(())
    }


    /// Total weight summarized so far. A range reports one when it has seen any observation.
    pub fn total_weight(&self) -> f64 {
        match self {
            SufficientStatistics::Categorical { counts } => counts.values().sum(),
            SufficientStatistics::Table { counts } => counts.values().sum(),
            SufficientStatistics::Normal { weight, .. } => *weight,
            SufficientStatistics::Exponential { weight, .. } => *weight,
            SufficientStatistics::Uniform { min, max } => if min <= max { 1.0 } else { 0.0 },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorical_counts() {
        let mut stats = SufficientStatistics::categorical();
        stats.add(&"a".into(), 1.0).unwrap();
        stats.add(&"b".into(), 2.0).unwrap();
        stats.add(&"a".into(), 0.5).unwrap();
        stats.add(&"c".into(), 0.0).unwrap();

        match &stats {
            SufficientStatistics::Categorical { counts } => {
                assert_eq!(counts.get(&Symbol::from("a")), Some(&1.5));
                assert_eq!(counts.get(&Symbol::from("b")), Some(&2.0));
                assert!(counts.get(&Symbol::from("c")).is_none());
            }
            _ => panic!("wrong statistics"),
        }
        assert_eq!(stats.total_weight(), 3.5);
    }

    #[test]
    fn family_mismatch() {
        let mut stats = SufficientStatistics::normal();
        assert!(matches!(stats.add(&"a".into(), 1.0), Err(QuinceError::Domain { .. })));
        assert!(stats.merge(&SufficientStatistics::categorical()).is_err());
        assert!(stats.add(&Value::Real(1.0), -1.0).is_err());
    }

    #[test]
    fn merge_is_additive() {
        let mut a = SufficientStatistics::normal();
        let mut b = SufficientStatistics::normal();
        let mut all = SufficientStatistics::normal();

        for (i, x) in [1.0, 2.0, 3.0, 4.0].iter().enumerate() {
            let v = Value::Real(*x);
            if i % 2 == 0 { a.add(&v, 1.0).unwrap() } else { b.add(&v, 2.0).unwrap() }
            all.add(&v, if i % 2 == 0 { 1.0 } else { 2.0 }).unwrap();
        }

        a.merge(&b).unwrap();
        assert_eq!(a, all);
    }

    #[test]
    fn table_rows() {
        let mut stats = SufficientStatistics::table();
        stats.add_row(&[true.into(), false.into()], 2.0).unwrap();
        stats.add_row(&[true.into(), false.into()], 1.0).unwrap();
        assert_eq!(stats.total_weight(), 3.0);
        assert!(stats.add(&true.into(), 1.0).is_err());
        assert!(stats.add_row(&[true.into(), Value::Real(0.5)], 1.0).is_err());
    }
}

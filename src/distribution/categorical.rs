//! Categorical (discrete) distributions over `Symbol`s.

use super::stats::SufficientStatistics;
use super::DomainPolicy;
use crate::util::{self, QuinceError, Result, PROBABILITY_TOLERANCE};
use crate::variable::{Domain, Symbol, Value};

use indexmap::IndexMap;
use rand::distributions::{Distribution as _, WeightedIndex};
use rand::Rng;

use std::fmt;

/// A probability mass function over an ordered set of symbols.
///
/// Symbols missing from the map have probability zero.
#[derive(Clone, Debug, PartialEq)]
pub struct Categorical {
    probabilities: IndexMap<Symbol, f64>,
}

impl Categorical {

    /// Build a `Categorical` from `(symbol, probability)` pairs.
    ///
    /// # Errors
    /// * `QuinceError::InvalidDistribution` if there are no symbols, a symbol repeats, a
    ///   probability is negative or not finite, or the probabilities do not sum to one
    pub fn new<S, I>(probabilities: I) -> Result<Self>
    where
        S: Into<Symbol>,
        I: IntoIterator<Item = (S, f64)>,
    {
        let mut map = IndexMap::new();
        for (s, p) in probabilities {
            let s = s.into();
            if !p.is_finite() || p < 0.0 {
                return Err(QuinceError::InvalidDistribution(
                    format!("probability of `{}` is {}", s, p)
                ));
            }
            if map.insert(s.clone(), p).is_some() {
                return Err(QuinceError::InvalidDistribution(format!("symbol `{}` repeats", s)));
            }
        }

        if map.is_empty() {
            return Err(QuinceError::InvalidDistribution(String::from("no symbols given")));
        }

        let total: f64 = map.values().sum();
        if (total - 1.0).abs() > PROBABILITY_TOLERANCE {
            return Err(QuinceError::InvalidDistribution(
                format!("probabilities sum to {}", total)
            ));
        }

        Ok(Categorical { probabilities: map })
    }

    /// The uniform distribution over `symbols`
    pub fn uniform<S, I>(symbols: I) -> Result<Self>
    where
        S: Into<Symbol>,
        I: IntoIterator<Item = S>,
    {
        let symbols: Vec<Symbol> = symbols.into_iter().map(Into::into).collect();
        let p = 1.0 / symbols.len() as f64;
        Categorical::new(symbols.into_iter().map(|s| (s, p)))
    }

    /// A point mass on `symbols[idx]`
    pub(crate) fn point_mass(domain: &Domain, idx: usize) -> Self {
        Categorical {
            probabilities: domain.iter()
                                 .enumerate()
                                 .map(|(i, s)| (s.clone(), if i == idx { 1.0 } else { 0.0 }))
                                 .collect()
        }
    }

    /// Pair a domain with already-normalized weights.
    pub(crate) fn from_parts(domain: &Domain, probabilities: &[f64]) -> Self {
        Categorical {
            probabilities: domain.iter().cloned().zip(probabilities.iter().cloned()).collect()
        }
    }

    /// Probability of `symbol`, zero if it was never seen
    pub fn probability(&self, symbol: &Symbol) -> f64 {
        self.probabilities.get(symbol).cloned().unwrap_or(0.0)
    }

    pub fn log_probability(&self, symbol: &Symbol) -> f64 {
        util::ln(self.probability(symbol))
    }

    /// The symbols of the distribution, in order
    pub fn domain(&self) -> Domain {
        self.probabilities.keys().cloned().collect()
    }

    /// The `(symbol, probability)` pairs, in order
    pub fn iter(&self) -> impl Iterator<Item = (&Symbol, f64)> {
        self.probabilities.iter().map(|(s, p)| (s, *p))
    }

    pub fn len(&self) -> usize {
        self.probabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probabilities.is_empty()
    }

    /// The most probable symbol, ties to the first in order
    pub fn mode(&self) -> Option<&Symbol> {
        util::argmax(self.probabilities.values().cloned())
            .and_then(|i| self.probabilities.get_index(i))
            .map(|(s, _)| s)
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Symbol> {
        let index = WeightedIndex::new(self.probabilities.values())
            .map_err(|e| QuinceError::InvalidDistribution(e.to_string()))?;

        self.probabilities
            .get_index(index.sample(rng))
            .map(|(s, _)| s.clone())
            .ok_or_else(|| QuinceError::InvalidDistribution(String::from("no symbols to sample")))
    }

    /// Weighted symbol counts of `samples`
    pub fn summarize(samples: &[Value], weights: &[f64]) -> Result<SufficientStatistics> {
        let mut stats = SufficientStatistics::categorical();
        for (value, &w) in samples.iter().zip(weights) {
            stats.add(value, w)?;
        }
        Ok(stats)
    }

    /// Re-estimate from a summary, blending with the current parameters by `inertia`.
    ///
    /// A summary with no weight leaves the distribution unchanged.
    ///
    /// # Errors
    /// * `QuinceError::Domain` under `DomainPolicy::Strict` if the summary holds a symbol the
    ///   distribution does not know
    pub fn from_summary(
        &mut self,
        counts: &IndexMap<Symbol, f64>,
        inertia: f64,
        policy: DomainPolicy,
    ) -> Result<()> {
        let total: f64 = counts.values().sum();
        if total <= 0.0 {
            return Ok(());
        }

        if let Some(unseen) = counts.keys().find(|s| !self.probabilities.contains_key(*s)) {
            match policy {
                DomainPolicy::Strict => {
                    return Err(QuinceError::domain(unseen, "a categorical distribution"));
                }
                DomainPolicy::Extend => {
                    for s in counts.keys() {
                        self.probabilities.entry(s.clone()).or_insert(0.0);
                    }
                }
            }
        }

        for (symbol, p) in self.probabilities.iter_mut() {
            let mle = counts.get(symbol).cloned().unwrap_or(0.0) / total;
            *p = inertia * *p + (1.0 - inertia) * mle;
        }

        Ok(())
    }

    /// Add every unknown symbol of `symbols` with probability `mass` before renormalizing.
    ///
    /// # Returns
    /// the number of symbols added
    pub(crate) fn extend<'s>(&mut self, symbols: impl IntoIterator<Item = &'s Symbol>, mass: f64) -> usize {
        let before = self.probabilities.len();
        for s in symbols {
            if !self.probabilities.contains_key(s) {
                self.probabilities.insert(s.clone(), mass);
            }
        }

        let added = self.probabilities.len() - before;
        if added > 0 {
            let total: f64 = self.probabilities.values().sum();
            for p in self.probabilities.values_mut() {
                *p /= total;
            }
        }
        added
    }
}

impl fmt::Display for Categorical {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (s, p)) in self.probabilities.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", s, p)?;
        }
        write!(f, "}}")
    }
}

//! Module containing initialization routines for the parameters of discrete distributions.
//!
//! Learning starts from *some* parameters; these are the usual choices for a categorical
//! distribution or a conditional table whose values will be re-estimated by
//! `estimators::BaumWelch` or `estimators::NetworkEstimator`.

use crate::distribution::{Categorical, ConditionalTable, SharedDistribution};
use crate::util::{QuinceError, Result, PROBABILITY_TOLERANCE};
use crate::variable::{Domain, Symbol};

use ndarray::{Array, ArrayD, Axis, IxDyn};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;

use std::iter;

/// Defines possible ways to initialize a discrete distribution.
#[derive(Clone, Copy, Debug)]
pub enum Initialization<'a> {
    /// A uniform distribution over all possibilities
    Uniform,

    /// Randomly initialize the weights of every stratum
    Random,

    /// Randomly initialize the weights from a seeded generator, for reproducible runs
    Seeded(u64),

    /// Explicit probabilities, in row-major order of the table (own value varying fastest)
    Probabilities(&'a [f64]),
}


impl<'a> Initialization<'a> {

    /// Construct a `Categorical` over `symbols`, initialized based on ```self```
    ///
    /// # Errors
    /// * `QuinceError::InvalidDistribution` if `symbols` is empty or repeats, or if explicit
    ///   probabilities have the wrong length or do not sum to one
    pub fn build_categorical<S: Into<Symbol>>(self, symbols: Vec<S>) -> Result<Categorical> {
        let domain = collect_domain(symbols)?;
        let table = self.build(&[domain.len()])?;
        let probabilities: Vec<f64> = table.iter().cloned().collect();

        Ok(Categorical::from_parts(&domain, &probabilities))
    }


    /// Construct a `ConditionalTable` over `symbols` given `parents`, initialized based on
    /// ```self```. The parent domains are read from the current parent distributions.
    ///
    /// # Errors
    /// * `QuinceError::InvalidDistribution` if a parent is not discrete, or as for
    ///   `build_categorical`
    pub fn build_table<S: Into<Symbol>>(
        self,
        parents: Vec<SharedDistribution>,
        symbols: Vec<S>,
    ) -> Result<ConditionalTable> {
        let domain = collect_domain(symbols)?;

        let parent_domains = parents.iter()
                                    .map(|p| {
                                        let p = p.read();
                                        p.domain().ok_or_else(|| QuinceError::InvalidDistribution(
                                            format!("a {} distribution cannot be a parent", p.family())
                                        ))
                                    })
                                    .collect::<Result<Vec<Domain>>>()?;

        let shape: Vec<usize> = parent_domains.iter()
                                              .map(Domain::len)
                                              .chain(iter::once(domain.len()))
                                              .collect();
        let table = self.build(&shape)?;

        Ok(ConditionalTable::from_parts(parents, parent_domains, domain, table))
    }


    /// Build a table of the given shape whose lanes along the last axis sum to one
    fn build(self, shape: &[usize]) -> Result<ArrayD<f64>> {
        let last = Axis(shape.len() - 1);

        let mut tbl = match self {
            Initialization::Uniform => {
                // normalizing constant is just the number of own values
                let val = 1. / (shape[shape.len() - 1] as f64);
                ArrayD::from_elem(IxDyn(shape), val)
            },
            Initialization::Random => {
                Array::random(IxDyn(shape), Uniform::new(1.0, 100.0))
            },
            Initialization::Seeded(seed) => {
                let mut rng = StdRng::seed_from_u64(seed);
                Array::random_using(IxDyn(shape), Uniform::new(1.0, 100.0), &mut rng)
            },
            Initialization::Probabilities(p) => {
                let tbl = ArrayD::from_shape_vec(IxDyn(shape), p.to_vec()).map_err(|_| {
                    QuinceError::InvalidDistribution(
                        format!("{} probabilities given for a table of shape {:?}", p.len(), shape)
                    )
                })?;

                if tbl.iter().any(|&v| !v.is_finite() || v < 0.0) {
                    return Err(QuinceError::InvalidDistribution(
                        String::from("probabilities must be finite and non-negative")
                    ));
                }
                for lane in tbl.lanes(last) {
                    if (lane.sum() - 1.0).abs() > PROBABILITY_TOLERANCE {
                        return Err(QuinceError::InvalidDistribution(
                            format!("a stratum sums to {}", lane.sum())
                        ));
                    }
                }

                return Ok(tbl);
            },
        };

        for mut lane in tbl.lanes_mut(last) {
            let z = lane.sum();
            lane.mapv_inplace(|v| v / z);
        }

        Ok(tbl)
    }
}

fn collect_domain<S: Into<Symbol>>(symbols: Vec<S>) -> Result<Domain> {
    let count = symbols.len();
    let domain: Domain = symbols.into_iter().map(Into::into).collect();

    if domain.is_empty() {
        return Err(QuinceError::InvalidDistribution(String::from("no symbols given")));
    }
    if domain.len() != count {
        return Err(QuinceError::InvalidDistribution(String::from("symbols repeat")));
    }

    Ok(domain)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parent() -> SharedDistribution {
        SharedDistribution::new(Categorical::uniform(vec!["a", "b", "c"]).unwrap())
    }

    #[test]
    fn uniform_init() {
        let c = Initialization::Uniform.build_categorical(vec!["x", "y", "z", "w"]).unwrap();
        for (_, p) in c.iter() {
            assert!((p - 0.25).abs() < std::f64::EPSILON);
        }

        let t = Initialization::Uniform.build_table(vec![parent()], vec![true, false]).unwrap();
        assert_eq!(t.table().shape(), &[3, 2]);
        assert!(t.table().iter().all(|&p| p == 0.5));
    }

    #[test]
    fn random_init() {
        let t = Initialization::Random.build_table(vec![parent(), parent()], vec![1, 2, 3]).unwrap();
        assert_eq!(t.table().shape(), &[3, 3, 3]);

        for lane in t.table().lanes(Axis(2)) {
            assert!((lane.sum() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn seeded_init_is_reproducible() {
        let a = Initialization::Seeded(3).build_categorical(vec!["x", "y"]).unwrap();
        let b = Initialization::Seeded(3).build_categorical(vec!["x", "y"]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn probabilities_init() {
        let c = Initialization::Probabilities(&[0.1, 0.7, 0.2])
            .build_categorical(vec!["x", "y", "z"])
            .unwrap();
        assert_eq!(c.probability(&"y".into()), 0.7);

        let wrong_len = Initialization::Probabilities(&[0.5, 0.5]).build_categorical(vec!["x", "y", "z"]);
        assert!(wrong_len.is_err());

        let unnormalized = Initialization::Probabilities(&[0.5, 0.6]).build_categorical(vec!["x", "y"]);
        assert!(unnormalized.is_err());
    }

    #[test]
    fn invalid_symbols() {
        assert!(Initialization::Uniform.build_categorical(Vec::<&str>::new()).is_err());
        assert!(Initialization::Uniform.build_categorical(vec!["x", "x"]).is_err());
    }

    #[test]
    fn continuous_parent() {
        let normal = SharedDistribution::new(crate::distribution::Normal::new(0.0, 1.0).unwrap());
        assert!(Initialization::Uniform.build_table(vec![normal], vec!["x"]).is_err());
    }
}

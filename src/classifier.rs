//! A Naive Bayes classifier whose class-conditional likelihoods are whole models.
//!
//! Each class is a `Model` (a distribution, a Bayesian network or a hidden Markov model) and the
//! posterior of a row is its prior-weighted likelihood under each class, normalized over classes.
//! Class labels are the indices of the models.

use crate::distribution;
use crate::model::{Model, Schema};
use crate::util::{self, QuinceError, Result};
use crate::variable::Value;

use ndarray::Array2;
use tracing::{debug, warn};

pub struct NaiveBayes<M: Model> {

    /// One model per class
    models: Vec<M>,

    /// Log prior of every class
    log_priors: Vec<f64>,

    /// The schema shared by every class model
    schema: Schema,
}

impl<M: Model> NaiveBayes<M> {

    /// Build a classifier with uniform priors.
    ///
    /// # Errors
    /// * `QuinceError::SchemaMismatch` if there are no models or they report different schemas
    pub fn new(models: Vec<M>) -> Result<Self> {
        let schema = match models.first() {
            Some(m) => m.schema(),
            None => return Err(QuinceError::SchemaMismatch(String::from("a classifier needs at least one class"))),
        };

        if let Some(i) = models.iter().position(|m| m.schema() != schema) {
            return Err(QuinceError::SchemaMismatch(
                format!("class {} reports {:?}, class 0 reports {:?}", i, models[i].schema(), schema)
            ));
        }

        let log_priors = vec![-(models.len() as f64).ln(); models.len()];
        Ok(NaiveBayes { models, log_priors, schema })
    }

    /// Replace the class priors. They are normalized to sum to one.
    ///
    /// # Errors
    /// * `QuinceError::SchemaMismatch` if there is not one prior per class
    /// * `QuinceError::InvalidDistribution` if a prior is negative or they sum to zero
    pub fn with_priors(mut self, priors: &[f64]) -> Result<Self> {
        if priors.len() != self.models.len() {
            return Err(QuinceError::SchemaMismatch(
                format!("{} priors given for {} classes", priors.len(), self.models.len())
            ));
        }
        if priors.iter().any(|p| !(p.is_finite() && *p >= 0.0)) {
            return Err(QuinceError::InvalidDistribution(format!("invalid class priors {:?}", priors)));
        }

        let mut p = priors.to_vec();
        if util::normalize(&mut p) <= 0.0 {
            return Err(QuinceError::InvalidDistribution(String::from("class priors sum to zero")));
        }

        self.log_priors = p.into_iter().map(util::ln).collect();
        Ok(self)
    }

    pub fn models(&self) -> &[M] {
        &self.models
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The prior probability of every class
    pub fn priors(&self) -> Vec<f64> {
        self.log_priors.iter().map(|p| p.exp()).collect()
    }

    /// `rows x classes` matrix of log posteriors.
    ///
    /// A row that every class assigns zero likelihood gets the priors.
    pub fn predict_log_proba(&self, rows: &[Vec<Value>]) -> Result<Array2<f64>> {
        let mut out = Array2::from_elem((rows.len(), self.models.len()), f64::NEG_INFINITY);

        for (r, row) in rows.iter().enumerate() {
            self.schema.check(row)?;

            let joint = self.models
                            .iter()
                            .zip(self.log_priors.iter())
                            .map(|(m, prior)| Ok(prior + m.log_probability(row)?))
                            .collect::<Result<Vec<f64>>>()?;

            let z = util::log_sum_exp(&joint);
            for (c, lp) in joint.iter().enumerate() {
                out[[r, c]] = if z == f64::NEG_INFINITY { self.log_priors[c] } else { lp - z };
            }
        }

        Ok(out)
    }

    /// `rows x classes` matrix of posteriors; every row sums to one
    pub fn predict_proba(&self, rows: &[Vec<Value>]) -> Result<Array2<f64>> {
        self.predict_log_proba(rows).map(|lp| lp.mapv(f64::exp))
    }

    /// The most probable class of every row, ties going to the lowest index
    pub fn predict(&self, rows: &[Vec<Value>]) -> Result<Vec<usize>> {
        let lp = self.predict_log_proba(rows)?;
        lp.rows()
          .into_iter()
          .map(|row| util::argmax(row.iter().cloned()).ok_or(QuinceError::InvalidScope))
          .collect()
    }

    /// Re-fit every class model on the rows labelled with it, and re-estimate the priors from
    /// the weighted label counts. Classes without rows keep their models.
    ///
    /// Either every class is fit or none is: on failure the models and priors are left as they
    /// were.
    ///
    /// # Errors
    /// * `QuinceError::SchemaMismatch` if rows, labels and weights differ in length, or a label
    ///   names no class
    /// * any error of a class model's `fit`
    pub fn fit(&mut self, rows: &[Vec<Value>], labels: &[usize], weights: Option<&[f64]>) -> Result<()> {
        if rows.len() != labels.len() {
            return Err(QuinceError::SchemaMismatch(
                format!("{} labels given for {} rows", labels.len(), rows.len())
            ));
        }
        let weights = distribution::resolve_weights(rows.len(), weights)?;

        if let Some(bad) = labels.iter().find(|&&l| l >= self.models.len()) {
            return Err(QuinceError::SchemaMismatch(
                format!("label {} for a classifier of {} classes", bad, self.models.len())
            ));
        }
        for row in rows.iter() {
            self.schema.check(row)?;
        }

        ///////////////////////////////////////////////////////////////////////
        // 1) fit each class, restoring every model if any class fails
        let checkpoints: Vec<M::Checkpoint> = self.models.iter().map(Model::checkpoint).collect();
        let mut totals = vec![0.0; self.models.len()];
        if let Err(e) = self.fit_classes(rows, labels, &weights, &mut totals) {
            for (model, checkpoint) in self.models.iter_mut().zip(checkpoints).rev() {
                model.rollback(checkpoint);
            }
            warn!(error = %e, "class fit failed, models restored");
            return Err(e);
        }

        ///////////////////////////////////////////////////////////////////////
        // 2) priors
        if util::normalize(&mut totals) > 0.0 {
            self.log_priors = totals.into_iter().map(util::ln).collect();
        }

        Ok(())
    }

    /// Fit each class on its rows, recording the weight of each class in `totals`
    fn fit_classes(&mut self, rows: &[Vec<Value>], labels: &[usize], weights: &[f64], totals: &mut [f64]) -> Result<()> {
        for (c, model) in self.models.iter_mut().enumerate() {
            let (part, w): (Vec<Vec<Value>>, Vec<f64>) = rows.iter()
                                                             .zip(labels.iter().zip(weights.iter()))
                                                             .filter(|(_, (&l, _))| l == c)
                                                             .map(|(row, (_, &w))| (row.clone(), w))
                                                             .unzip();
            if part.is_empty() {
                continue;
            }

            totals[c] = w.iter().sum();
            model.fit(&part, Some(&w))?;
            debug!(class = c, rows = part.len(), "fit class model");
        }
        Ok(())
    }
}

//! Defines a `Model`, a baked generative model that can score and be re-fit on data.
//!
//! Models are built in two phases. A builder collects states and edges and records the first
//! error it meets; `bake` consumes the builder, validates the structure and produces the
//! immutable, index-compiled model. A baked model exposes no way to add or remove states or
//! edges; only the parameters inside its distributions change when it is fit.

use crate::distribution::{Distribution, SharedDistribution};
use crate::util::{QuinceError, Result};
use crate::variable::Value;

pub mod directed;
pub mod hmm;

/// The shape of the rows a `Model` scores.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Schema {

    /// A single value per row
    Univariate,

    /// One value per named column
    Columns(Vec<String>),

    /// A sequence of any length
    Sequence,
}

impl Schema {

    /// Number of values a row must hold, if fixed
    pub fn width(&self) -> Option<usize> {
        match self {
            Schema::Univariate => Some(1),
            Schema::Columns(names) => Some(names.len()),
            Schema::Sequence => None,
        }
    }

    /// Check a row against the schema
    ///
    /// # Errors
    /// * `QuinceError::SchemaMismatch` if the row has the wrong width
    pub fn check(&self, row: &[Value]) -> Result<()> {
        match self.width() {
            Some(w) if w != row.len() => Err(QuinceError::SchemaMismatch(
                format!("expected {} values per row, found {}", w, row.len())
            )),
            _ => Ok(()),
        }
    }
}

/// The `Model` trait represents a generative model over fully observed rows.
pub trait Model {

    /// The shape of rows this model scores
    fn schema(&self) -> Schema;

    /// Natural log of the probability (or density) of a fully observed row
    fn log_probability(&self, row: &[Value]) -> Result<f64>;

    /// Re-estimate the parameters of the model from weighted rows
    fn fit(&mut self, rows: &[Vec<Value>], weights: Option<&[f64]>) -> Result<()>;

    /// The current parameters, to hand back to `rollback`
    type Checkpoint;

    fn checkpoint(&self) -> Self::Checkpoint;

    /// Restore the parameters taken by `checkpoint`, undoing any fit since
    fn rollback(&mut self, checkpoint: Self::Checkpoint);
}

/// The current contents of some distribution handles
pub(crate) fn capture<'a>(handles: impl IntoIterator<Item = &'a SharedDistribution>) -> Vec<(SharedDistribution, Distribution)> {
    handles.into_iter().map(|h| (h.clone(), h.snapshot())).collect()
}

pub(crate) fn restore(saved: Vec<(SharedDistribution, Distribution)>) {
    for (handle, d) in saved.into_iter().rev() {
        *handle.write() = d;
    }
}

impl Model for SharedDistribution {

    fn schema(&self) -> Schema {
        match self.read().width() {
            1 => Schema::Univariate,
            n => Schema::Columns((0..n).map(|i| format!("column {}", i)).collect()),
        }
    }

    fn log_probability(&self, row: &[Value]) -> Result<f64> {
        self.read().row_log_probability(row)
    }

    fn fit(&mut self, rows: &[Vec<Value>], weights: Option<&[f64]>) -> Result<()> {
        self.fit_rows(rows, weights)
    }

    type Checkpoint = Distribution;

    fn checkpoint(&self) -> Distribution {
        self.snapshot()
    }

    fn rollback(&mut self, checkpoint: Distribution) {
        *self.write() = checkpoint;
    }
}

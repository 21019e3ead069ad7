//! Defines the `Sampler` trait - an object that can randomly sample from a model.

use crate::util::Result;

pub mod chain;
pub mod forward;

pub use self::chain::ChainSampler;
pub use self::forward::ForwardSampler;

pub trait Sampler {

    type Output;

    /// Draw one sample from the associated model.
    fn sample(&mut self) -> Result<Self::Output>;
}

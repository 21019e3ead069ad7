//! Simple parametric families over the real line.

use crate::util::{QuinceError, Result};

use rand::Rng;
use rand_distr::{Distribution as _, Exp, Normal as NormalSampler, Uniform as UniformSampler};

use std::fmt;

/// Smallest standard deviation a fitted `Normal` may have.
pub const MIN_STD: f64 = 1e-8;

const LOG_SQRT_2PI: f64 = 0.918_938_533_204_672_8; // 0.5 * ln(2*pi)

/// The normal distribution `N(mean, std^2)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Normal {
    mean: f64,
    std: f64,
}

impl Normal {

    /// # Errors
    /// * `QuinceError::InvalidDistribution` unless `mean` is finite and `std` positive
    pub fn new(mean: f64, std: f64) -> Result<Self> {
        if !mean.is_finite() || !std.is_finite() || std <= 0.0 {
            return Err(QuinceError::InvalidDistribution(
                format!("normal distribution with mean {} and std {}", mean, std)
            ));
        }
        Ok(Normal { mean, std })
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn std(&self) -> f64 {
        self.std
    }

    pub fn log_probability(&self, x: f64) -> f64 {
        let z = (x - self.mean) / self.std;
        -0.5 * z * z - self.std.ln() - LOG_SQRT_2PI
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<f64> {
        NormalSampler::new(self.mean, self.std)
            .map(|n| n.sample(rng))
            .map_err(|e| QuinceError::InvalidDistribution(e.to_string()))
    }

    /// Weighted maximum likelihood from `(sum w, sum wx, sum wx^2)`
    pub fn from_summary(&mut self, weight: f64, sum: f64, sum_squares: f64, inertia: f64) {
        if weight <= 0.0 {
            return;
        }

        let mean = sum / weight;
        let variance = (sum_squares / weight - mean * mean).max(0.0);
        let std = variance.sqrt().max(MIN_STD);

        self.mean = inertia * self.mean + (1.0 - inertia) * mean;
        self.std = inertia * self.std + (1.0 - inertia) * std;
    }
}

impl fmt::Display for Normal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Normal({}, {})", self.mean, self.std)
    }
}

/// The continuous uniform distribution on `[low, high]`.
///
/// A degenerate range (`low == high`) is a point mass with unit density at `low`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Uniform {
    low: f64,
    high: f64,
}

impl Uniform {

    pub fn new(low: f64, high: f64) -> Result<Self> {
        if !low.is_finite() || !high.is_finite() || low > high {
            return Err(QuinceError::InvalidDistribution(
                format!("uniform distribution on [{}, {}]", low, high)
            ));
        }
        Ok(Uniform { low, high })
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.low, self.high)
    }

    pub fn log_probability(&self, x: f64) -> f64 {
        if x < self.low || x > self.high {
            f64::NEG_INFINITY
        } else if self.high == self.low {
            0.0
        } else {
            -(self.high - self.low).ln()
        }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<f64> {
        if self.high == self.low {
            return Ok(self.low);
        }
        Ok(UniformSampler::new_inclusive(self.low, self.high).sample(rng))
    }

    /// Maximum likelihood from the observed range. An empty range leaves the bounds unchanged.
    pub fn from_summary(&mut self, min: f64, max: f64, inertia: f64) {
        if min > max {
            return;
        }

        self.low = inertia * self.low + (1.0 - inertia) * min;
        self.high = inertia * self.high + (1.0 - inertia) * max;
    }
}

impl fmt::Display for Uniform {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Uniform({}, {})", self.low, self.high)
    }
}

/// The exponential distribution with the given rate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Exponential {
    rate: f64,
}

impl Exponential {

    pub fn new(rate: f64) -> Result<Self> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(QuinceError::InvalidDistribution(
                format!("exponential distribution with rate {}", rate)
            ));
        }
        Ok(Exponential { rate })
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn log_probability(&self, x: f64) -> f64 {
        if x < 0.0 {
            f64::NEG_INFINITY
        } else {
            self.rate.ln() - self.rate * x
        }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<f64> {
        Exp::new(self.rate)
            .map(|e| e.sample(rng))
            .map_err(|e| QuinceError::InvalidDistribution(e.to_string()))
    }

    /// Weighted maximum likelihood `rate = sum w / sum wx`
    pub fn from_summary(&mut self, weight: f64, sum: f64, inertia: f64) {
        if weight <= 0.0 || sum <= 0.0 {
            return;
        }

        self.rate = inertia * self.rate + (1.0 - inertia) * (weight / sum);
    }
}

impl fmt::Display for Exponential {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Exponential({})", self.rate)
    }
}

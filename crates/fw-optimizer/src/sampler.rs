//! Stateless samplers driven by a caller-supplied random generator.
//!
//! A sampler never creates or seeds its own RNG. Whoever calls `sample`
//! decides determinism: the same sampler run on many workers with identical
//! seeds yields identical values.

use fw_types::{validation_error, FwError, FwResult};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;

/// Draws one value of `T` from an explicit random generator.
pub trait RandomSampler<T>: Send + Sync {
    fn sample(&self, rng: &mut dyn RngCore) -> T;

    /// Post-process every sampled value with `f`.
    fn map<U, F>(self, f: F) -> Map<Self, F, T>
    where
        Self: Sized,
        F: Fn(T) -> U + Send + Sync,
    {
        Map {
            inner: self,
            f,
            _marker: PhantomData,
        }
    }
}

impl<T, F> RandomSampler<T> for F
where
    F: Fn(&mut dyn RngCore) -> T + Send + Sync,
{
    fn sample(&self, rng: &mut dyn RngCore) -> T {
        self(rng)
    }
}

/// Sampler adapter returned by [`RandomSampler::map`].
pub struct Map<S, F, T> {
    inner: S,
    f: F,
    _marker: PhantomData<fn() -> T>,
}

impl<S, F, T, U> RandomSampler<U> for Map<S, F, T>
where
    S: RandomSampler<T>,
    F: Fn(T) -> U + Send + Sync,
{
    fn sample(&self, rng: &mut dyn RngCore) -> U {
        (self.f)(self.inner.sample(rng))
    }
}

/// Always yields the same value and consumes no randomness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constant<T>(pub T);

impl<T: Clone + Send + Sync> RandomSampler<T> for Constant<T> {
    fn sample(&self, _rng: &mut dyn RngCore) -> T {
        self.0.clone()
    }
}

#[derive(Deserialize)]
struct Bounds<T> {
    low: T,
    high: T,
}

/// Uniform real in `[low, high]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Bounds<f64>")]
pub struct FloatRange {
    low: f64,
    high: f64,
}

impl FloatRange {
    pub fn new(low: f64, high: f64) -> FwResult<Self> {
        check_float_bounds(low, high)?;
        Ok(Self { low, high })
    }

    pub fn low(&self) -> f64 {
        self.low
    }

    pub fn high(&self) -> f64 {
        self.high
    }
}

impl TryFrom<Bounds<f64>> for FloatRange {
    type Error = FwError;

    fn try_from(bounds: Bounds<f64>) -> FwResult<Self> {
        Self::new(bounds.low, bounds.high)
    }
}

impl RandomSampler<f64> for FloatRange {
    fn sample(&self, rng: &mut dyn RngCore) -> f64 {
        sample_float(rng, self.low, self.high)
    }
}

/// Uniform integer in `[low, high]`, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Bounds<i64>")]
pub struct IntRange {
    low: i64,
    high: i64,
}

impl IntRange {
    pub fn new(low: i64, high: i64) -> FwResult<Self> {
        if low > high {
            return Err(validation_error!("int range is empty: {low} > {high}"));
        }
        Ok(Self { low, high })
    }

    pub fn low(&self) -> i64 {
        self.low
    }

    pub fn high(&self) -> i64 {
        self.high
    }
}

impl TryFrom<Bounds<i64>> for IntRange {
    type Error = FwError;

    fn try_from(bounds: Bounds<i64>) -> FwResult<Self> {
        Self::new(bounds.low, bounds.high)
    }
}

impl RandomSampler<i64> for IntRange {
    fn sample(&self, rng: &mut dyn RngCore) -> i64 {
        rng.gen_range(self.low..=self.high)
    }
}

/// Real in `[low, high]` drawn uniformly in log space.
///
/// Suited to learning rates and regularization strengths that span several
/// orders of magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Bounds<f64>")]
pub struct LogUniform {
    low: f64,
    high: f64,
}

impl LogUniform {
    pub fn new(low: f64, high: f64) -> FwResult<Self> {
        check_log_bounds(low, high)?;
        Ok(Self { low, high })
    }

    pub fn low(&self) -> f64 {
        self.low
    }

    pub fn high(&self) -> f64 {
        self.high
    }
}

impl TryFrom<Bounds<f64>> for LogUniform {
    type Error = FwError;

    fn try_from(bounds: Bounds<f64>) -> FwResult<Self> {
        Self::new(bounds.low, bounds.high)
    }
}

impl RandomSampler<f64> for LogUniform {
    fn sample(&self, rng: &mut dyn RngCore) -> f64 {
        sample_log_uniform(rng, self.low, self.high)
    }
}

#[derive(Deserialize)]
struct ChoiceValues<T> {
    values: Vec<T>,
}

/// Uniform pick from a fixed, non-empty set of values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "ChoiceValues<T>",
    bound(deserialize = "T: Deserialize<'de>")
)]
pub struct Choice<T> {
    values: Vec<T>,
}

impl<T> Choice<T> {
    pub fn new(values: Vec<T>) -> FwResult<Self> {
        if values.is_empty() {
            return Err(validation_error!("choice set must not be empty"));
        }
        Ok(Self { values })
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }
}

impl<T> TryFrom<ChoiceValues<T>> for Choice<T> {
    type Error = FwError;

    fn try_from(choices: ChoiceValues<T>) -> FwResult<Self> {
        Self::new(choices.values)
    }
}

impl<T: Clone + Send + Sync> RandomSampler<T> for Choice<T> {
    fn sample(&self, rng: &mut dyn RngCore) -> T {
        let idx = rng.gen_range(0..self.values.len());
        self.values[idx].clone()
    }
}

pub(crate) fn check_float_bounds(low: f64, high: f64) -> FwResult<()> {
    if !low.is_finite() || !high.is_finite() {
        return Err(validation_error!("range bounds must be finite: [{low}, {high}]"));
    }
    if low > high {
        return Err(validation_error!("float range is empty: {low} > {high}"));
    }
    // the uniform sampler divides the width by the largest unit draw (1 - EPSILON)
    if !((high - low) / (1.0 - f64::EPSILON)).is_finite() {
        return Err(validation_error!("range width overflows: [{low}, {high}]"));
    }
    Ok(())
}

pub(crate) fn check_log_bounds(low: f64, high: f64) -> FwResult<()> {
    check_float_bounds(low, high)?;
    if low <= 0.0 {
        return Err(validation_error!(
            "log-uniform bounds must be positive: [{low}, {high}]"
        ));
    }
    Ok(())
}

pub(crate) fn sample_float(rng: &mut dyn RngCore, low: f64, high: f64) -> f64 {
    if low == high {
        return low;
    }
    rng.gen_range(low..=high)
}

pub(crate) fn sample_log_uniform(rng: &mut dyn RngCore, low: f64, high: f64) -> f64 {
    let log_val = sample_float(rng, low.ln(), high.ln());
    // exp(ln(x)) can land a hair outside the bounds
    log_val.exp().clamp(low, high)
}

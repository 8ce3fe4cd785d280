//! # fw-optimizer
//!
//! Hyperparameter sampling for Foldwise.
//!
//! Provides the stateless [`RandomSampler`] abstraction, typed samplers for
//! common domains, serializable search spaces that can be shipped to workers,
//! and a seeded random search whose candidates replay exactly from a seed.

mod sampler;
mod search;

pub use sampler::{Choice, Constant, FloatRange, IntRange, LogUniform, Map, RandomSampler};
pub use search::{
    apply_parameters, ParameterDef, ParameterKind, ParameterSet, ParameterValue, RandomSearch,
    SearchSpace,
};

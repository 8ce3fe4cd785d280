//! # fw-data
//!
//! Turns a text dataset into per-fold trainer caches and hands them out by
//! logical name.
//!
//! A [`KFoldPartitioner`] splits the dataset into train/test sides per fold,
//! a [`DatasetCacheBuilder`] runs the external trainer over each side, and a
//! [`FileRegistry`] publishes the resulting files so evaluation code on any
//! worker can resolve them.

pub mod builder;
pub mod cleanup;
pub mod config;
pub mod kfold;
pub mod options;
pub mod registry;
pub mod source;
pub mod trainer;

#[cfg(test)]
mod test_support;

pub use builder::*;
pub use cleanup::*;
pub use config::*;
pub use kfold::*;
pub use options::*;
pub use registry::*;
pub use source::*;
pub use trainer::*;

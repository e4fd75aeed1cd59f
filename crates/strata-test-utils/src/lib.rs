//! Test fixtures for Strata development.
//!
//! Provides values that record their own construction and destruction, so
//! tests can check teardown order and that every constructed value is
//! destroyed exactly once.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;

pub use fixtures::{DefaultTracked, LifeCounter, Tracked};

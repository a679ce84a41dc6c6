//! `component-scan` — software composition analysis across package ecosystems.
//!
//! # Flow
//! 1. Discover manifests at the project root ([`detector::discover`]).
//! 2. Analyze each one concurrently into a per-file graph ([`analyzer`], [`scan`]).
//! 3. Seal each file graph and merge it into the global graph ([`graph`]).
//! 4. Merge container scanner reports layer by layer ([`container`]).
//! 5. Optionally enrich components from package registries ([`registry`]).
//! 6. Render the requested report ([`report`]).

pub mod analyzer;
pub mod cli;
pub mod config;
pub mod container;
pub mod detector;
pub mod error;
pub mod graph;
pub mod models;
pub mod registry;
pub mod report;
pub mod scan;
pub mod version;

//! Version ordering and constraint matching, one engine per ecosystem grammar.
//!
//! Both engines are pure; every entry point returns `Result` so that
//! unparsable input is never reported as a plain non-match.

pub mod cargo;
pub mod pep440;

pub use cargo::{CargoRange, DependencySpecification};
pub use pep440::{version_valid_for_spec, PythonSpecifier, PythonVersion, VersionRange};

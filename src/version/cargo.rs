//! Cargo-style semver requirements.
//!
//! Every term of a requirement desugars to plain comparators, and a
//! requirement is the conjunction of all of them. Unlike a Cargo manifest, a
//! bare `1.2.3` here means exactly `1.2.3`; callers reading `Cargo.toml`
//! add the caret themselves.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use semver::{Prerelease, Version};

use crate::error::VersionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Exact,
    Greater,
    GreaterEq,
    Less,
    LessEq,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Comparator {
    op: Op,
    version: Version,
}

impl Comparator {
    fn new(op: Op, version: Version) -> Self {
        Self { op, version }
    }

    fn matches(&self, candidate: &Version) -> bool {
        let ord = precedence(candidate, &self.version);
        match self.op {
            Op::Exact => ord == Ordering::Equal,
            Op::Greater => ord == Ordering::Greater,
            Op::GreaterEq => ord != Ordering::Less,
            Op::Less => ord == Ordering::Less,
            Op::LessEq => ord != Ordering::Greater,
        }
    }
}

/// Semver precedence: build metadata does not take part.
fn precedence(a: &Version, b: &Version) -> Ordering {
    (a.major, a.minor, a.patch, &a.pre).cmp(&(b.major, b.minor, b.patch, &b.pre))
}

/// A version with trailing components possibly missing (`1`, `1.2`) or
/// wildcarded (`1.*`, `1.2.x`).
#[derive(Debug, Clone)]
struct Partial {
    major: Option<u64>,
    minor: Option<u64>,
    patch: Option<u64>,
    pre: Prerelease,
    wildcard: bool,
}

impl Partial {
    fn parse(expr: &str, text: &str) -> Result<Self, VersionError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(VersionError::specifier(expr, "missing version"));
        }
        if let Ok(full) = Version::parse(text) {
            return Ok(Self {
                major: Some(full.major),
                minor: Some(full.minor),
                patch: Some(full.patch),
                pre: full.pre,
                wildcard: false,
            });
        }

        let parts: Vec<&str> = text.split('.').collect();
        if parts.len() > 3 {
            return Err(VersionError::specifier(expr, format!("{text:?} has too many components")));
        }
        let mut numbers = [None; 3];
        let mut wildcard_seen = false;
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            if matches!(*part, "*" | "x" | "X") {
                wildcard_seen = true;
                continue;
            }
            if wildcard_seen {
                return Err(VersionError::specifier(expr, "a number cannot follow a wildcard"));
            }
            let n = part
                .parse::<u64>()
                .map_err(|_| VersionError::specifier(expr, format!("{part:?} is not a version number")))?;
            *slot = Some(n);
        }

        Ok(Self {
            major: numbers[0],
            minor: numbers[1],
            patch: numbers[2],
            pre: Prerelease::EMPTY,
            wildcard: wildcard_seen,
        })
    }

    fn is_full(&self) -> bool {
        self.patch.is_some()
    }

    /// Missing components filled with zero.
    fn floor(&self) -> Version {
        let mut version = Version::new(
            self.major.unwrap_or(0),
            self.minor.unwrap_or(0),
            self.patch.unwrap_or(0),
        );
        version.pre = self.pre.clone();
        version
    }

    /// Smallest version above everything this partial covers, `None` for `*`.
    fn ceiling(&self, expr: &str) -> Result<Option<Version>, VersionError> {
        Ok(match (self.major, self.minor, self.patch) {
            (None, _, _) => None,
            (Some(major), None, _) => Some(Version::new(bump(expr, major)?, 0, 0)),
            (Some(major), Some(minor), None) => Some(Version::new(major, bump(expr, minor)?, 0)),
            (Some(major), Some(minor), Some(patch)) => {
                Some(Version::new(major, minor, bump(expr, patch)?))
            }
        })
    }
}

/// The next number up; a component at `u64::MAX` has no upper bound to form.
fn bump(expr: &str, n: u64) -> Result<u64, VersionError> {
    n.checked_add(1)
        .ok_or_else(|| VersionError::specifier(expr, format!("{n} is too large to bound")))
}

/// Comparators spanning `[floor, ceiling)` of a partial version.
fn span(expr: &str, partial: &Partial) -> Result<Vec<Comparator>, VersionError> {
    let mut comparators = vec![Comparator::new(Op::GreaterEq, partial.floor())];
    if let Some(ceiling) = partial.ceiling(expr)? {
        comparators.push(Comparator::new(Op::Less, ceiling));
    }
    Ok(comparators)
}

fn desugar(expr: &str, term: &str) -> Result<Vec<Comparator>, VersionError> {
    let term = term.trim();
    if term.is_empty() {
        return Err(VersionError::specifier(expr, "empty requirement term"));
    }

    if let Some((low, high)) = term.split_once(" - ") {
        return hyphen(expr, low, high);
    }

    if let Some(rest) = term.strip_prefix('^') {
        return caret(expr, rest);
    }
    if let Some(rest) = term.strip_prefix('~') {
        return tilde(expr, rest);
    }

    for (token, op) in [
        (">=", Op::GreaterEq),
        ("<=", Op::LessEq),
        (">", Op::Greater),
        ("<", Op::Less),
    ] {
        if let Some(rest) = term.strip_prefix(token) {
            return relational(expr, op, rest);
        }
    }

    let rest = term.strip_prefix('=').unwrap_or(term);
    let partial = Partial::parse(expr, rest)?;
    if partial.is_full() {
        Ok(vec![Comparator::new(Op::Exact, partial.floor())])
    } else {
        span(expr, &partial)
    }
}

fn no_wildcard(expr: &str, text: &str) -> Result<Partial, VersionError> {
    let partial = Partial::parse(expr, text)?;
    if partial.wildcard {
        return Err(VersionError::specifier(expr, "wildcards cannot be combined with an operator"));
    }
    Ok(partial)
}

fn relational(expr: &str, op: Op, text: &str) -> Result<Vec<Comparator>, VersionError> {
    let partial = no_wildcard(expr, text)?;
    if partial.is_full() {
        return Ok(vec![Comparator::new(op, partial.floor())]);
    }
    let floor = partial.floor();
    let ceiling = partial
        .ceiling(expr)?
        .ok_or_else(|| VersionError::specifier(expr, "missing version"))?;
    Ok(vec![match op {
        Op::GreaterEq | Op::Less => Comparator::new(op, floor),
        Op::Greater => Comparator::new(Op::GreaterEq, ceiling),
        Op::LessEq => Comparator::new(Op::Less, ceiling),
        Op::Exact => Comparator::new(Op::Exact, floor),
    }])
}

fn caret(expr: &str, text: &str) -> Result<Vec<Comparator>, VersionError> {
    let partial = no_wildcard(expr, text)?;
    let major = partial
        .major
        .ok_or_else(|| VersionError::specifier(expr, "missing version"))?;
    let ceiling = match (major, partial.minor, partial.patch) {
        (0, Some(0), Some(patch)) => Version::new(0, 0, bump(expr, patch)?),
        (0, Some(minor), _) => Version::new(0, bump(expr, minor)?, 0),
        (major, _, _) => Version::new(bump(expr, major)?, 0, 0),
    };
    Ok(vec![
        Comparator::new(Op::GreaterEq, partial.floor()),
        Comparator::new(Op::Less, ceiling),
    ])
}

fn tilde(expr: &str, text: &str) -> Result<Vec<Comparator>, VersionError> {
    let partial = no_wildcard(expr, text)?;
    let major = partial
        .major
        .ok_or_else(|| VersionError::specifier(expr, "missing version"))?;
    let ceiling = match partial.minor {
        Some(minor) => Version::new(major, bump(expr, minor)?, 0),
        None => Version::new(bump(expr, major)?, 0, 0),
    };
    Ok(vec![
        Comparator::new(Op::GreaterEq, partial.floor()),
        Comparator::new(Op::Less, ceiling),
    ])
}

fn hyphen(expr: &str, low: &str, high: &str) -> Result<Vec<Comparator>, VersionError> {
    let low = Partial::parse(expr, low)?;
    let high = Partial::parse(expr, high)?;

    let mut comparators = vec![Comparator::new(Op::GreaterEq, low.floor())];
    if high.is_full() {
        comparators.push(Comparator::new(Op::LessEq, high.floor()));
    } else if let Some(ceiling) = high.ceiling(expr)? {
        comparators.push(Comparator::new(Op::Less, ceiling));
    }
    Ok(comparators)
}

/// A comma-separated conjunction of requirement terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CargoRange {
    expression: String,
    comparators: Vec<Comparator>,
}

impl CargoRange {
    pub fn parse(expression: &str) -> Result<Self, VersionError> {
        let mut comparators = Vec::new();
        for term in expression.split(',') {
            comparators.extend(desugar(expression, term)?);
        }
        Ok(Self {
            expression: expression.trim().to_string(),
            comparators,
        })
    }

    /// A pre-release only matches when some comparator names the same
    /// `major.minor.patch` with a pre-release of its own.
    pub fn matches(&self, version: &Version) -> bool {
        let satisfied = self.comparators.iter().all(|c| c.matches(version));
        if !satisfied || version.pre.is_empty() {
            return satisfied;
        }
        self.comparators.iter().any(|c| {
            !c.version.pre.is_empty()
                && (c.version.major, c.version.minor, c.version.patch)
                    == (version.major, version.minor, version.patch)
        })
    }

    pub fn matches_str(&self, version: &str) -> Result<bool, VersionError> {
        Ok(self.matches(&parse_version(version)?))
    }
}

impl fmt::Display for CargoRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

fn parse_version(version: &str) -> Result<Version, VersionError> {
    Version::parse(version.trim()).map_err(|e| VersionError::version(version, e.to_string()))
}

/// Requirement expressions by dependency name.
#[derive(Debug, Clone, Default)]
pub struct DependencySpecification {
    dependencies: BTreeMap<String, Vec<CargoRange>>,
}

impl DependencySpecification {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a requirement for `name`. Adding the same name again keeps both
    /// expressions; either one may match.
    pub fn add(&mut self, name: &str, expression: &str) -> Result<(), VersionError> {
        let range = CargoRange::parse(expression)?;
        let ranges = self.dependencies.entry(name.to_string()).or_default();
        if !ranges.contains(&range) {
            ranges.push(range);
        }
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.dependencies.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    pub fn matches_package(&self, name: &str, version: &str) -> Result<bool, VersionError> {
        let Some(ranges) = self.dependencies.get(name) else {
            return Ok(false);
        };
        let version = parse_version(version)?;
        Ok(ranges.iter().any(|range| range.matches(&version)))
    }
}

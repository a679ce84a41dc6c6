//! PEP 440 versions, specifiers and ranges.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::VersionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PreStage {
    Alpha,
    Beta,
    Candidate,
}

/// A parsed version. Ordering and equality ignore the local label and the
/// original spelling; `1.0A1`, `v1.0a1` and `1.0-alpha.1` are all equal.
#[derive(Debug, Clone)]
pub struct PythonVersion {
    raw: String,
    epoch: u64,
    release: Vec<u64>,
    pre: Option<(PreStage, u64)>,
    post: Option<u64>,
    dev: Option<u64>,
    local: Option<String>,
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum StageKey {
    DevOnly,
    Pre(PreStage, u64),
    Final,
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum DevKey {
    Dev(u64),
    Release,
}

impl PythonVersion {
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        Parser::new(input).version()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn release(&self) -> &[u64] {
        &self.release
    }

    pub fn local(&self) -> Option<&str> {
        self.local.as_deref()
    }

    /// Pre-releases and development releases.
    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some() || self.dev.is_some()
    }

    fn stage_key(&self) -> StageKey {
        match self.pre {
            Some((stage, n)) => StageKey::Pre(stage, n),
            None if self.post.is_none() && self.dev.is_some() => StageKey::DevOnly,
            None => StageKey::Final,
        }
    }

    fn dev_key(&self) -> DevKey {
        self.dev.map_or(DevKey::Release, DevKey::Dev)
    }

    /// Release tuple with trailing zeros removed, so `1.0` and `1.0.0` compare equal.
    fn trimmed_release(&self) -> &[u64] {
        let end = self.release.iter().rposition(|&n| n != 0).map_or(0, |i| i + 1);
        &self.release[..end]
    }

    /// Whether the release tuple starts with `prefix`, padding with zeros.
    fn has_release_prefix(&self, epoch: u64, prefix: &[u64]) -> bool {
        self.epoch == epoch
            && prefix
                .iter()
                .enumerate()
                .all(|(i, p)| self.release.get(i).copied().unwrap_or(0) == *p)
    }
}

impl Ord for PythonVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| self.trimmed_release().cmp(other.trimmed_release()))
            .then_with(|| self.stage_key().cmp(&other.stage_key()))
            .then_with(|| self.post.cmp(&other.post))
            .then_with(|| self.dev_key().cmp(&other.dev_key()))
    }
}

impl PartialOrd for PythonVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PythonVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PythonVersion {}

impl FromStr for PythonVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PythonVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

struct Parser<'a> {
    input: &'a str,
    text: String,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            text: input.trim().to_ascii_lowercase(),
            pos: 0,
        }
    }

    fn error(&self, reason: &str) -> VersionError {
        VersionError::version(self.input, reason)
    }

    fn rest(&self) -> &str {
        &self.text[self.pos..]
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn eat_separator(&mut self) -> bool {
        self.eat(".") || self.eat("-") || self.eat("_")
    }

    fn number(&mut self) -> Result<Option<u64>, VersionError> {
        let digits = self.rest().bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            return Ok(None);
        }
        let value = self.rest()[..digits]
            .parse::<u64>()
            .map_err(|_| self.error("numeric component is too large"))?;
        self.pos += digits;
        Ok(Some(value))
    }

    /// Optional separator then an optional number; a missing number is 0.
    fn label_number(&mut self) -> Result<u64, VersionError> {
        let mark = self.pos;
        self.eat_separator();
        match self.number()? {
            Some(n) => Ok(n),
            None => {
                self.pos = mark;
                Ok(0)
            }
        }
    }

    /// Try `[sep]label` for each label; restores the position when none fits.
    fn label<T: Copy>(&mut self, labels: &[(&str, T)]) -> Option<T> {
        let mark = self.pos;
        self.eat_separator();
        for (token, value) in labels {
            if self.eat(token) {
                return Some(*value);
            }
        }
        self.pos = mark;
        None
    }

    fn version(mut self) -> Result<PythonVersion, VersionError> {
        if self.text.is_empty() {
            return Err(self.error("empty version"));
        }
        self.eat("v");

        let first = self
            .number()?
            .ok_or_else(|| self.error("expected a release number"))?;
        let epoch = if self.eat("!") {
            first
        } else {
            self.pos = 0;
            self.eat("v");
            0
        };

        let mut release = Vec::new();
        loop {
            let n = self
                .number()?
                .ok_or_else(|| self.error("expected a release number"))?;
            release.push(n);
            let mark = self.pos;
            if self.eat(".") && self.rest().starts_with(|c: char| c.is_ascii_digit()) {
                continue;
            }
            self.pos = mark;
            break;
        }

        const PRE: &[(&str, PreStage)] = &[
            ("alpha", PreStage::Alpha),
            ("beta", PreStage::Beta),
            ("preview", PreStage::Candidate),
            ("pre", PreStage::Candidate),
            ("rc", PreStage::Candidate),
            ("c", PreStage::Candidate),
            ("a", PreStage::Alpha),
            ("b", PreStage::Beta),
        ];
        let pre = match self.label(PRE) {
            Some(stage) => Some((stage, self.label_number()?)),
            None => None,
        };

        let post = if let Some(()) = self.label(&[("post", ()), ("rev", ()), ("r", ())]) {
            Some(self.label_number()?)
        } else {
            let mark = self.pos;
            if self.eat("-") {
                match self.number()? {
                    Some(n) => Some(n),
                    None => {
                        self.pos = mark;
                        None
                    }
                }
            } else {
                None
            }
        };

        let dev = match self.label(&[("dev", ())]) {
            Some(()) => Some(self.label_number()?),
            None => None,
        };

        let local = if self.eat("+") {
            Some(self.local_label()?)
        } else {
            None
        };

        if !self.rest().is_empty() {
            return Err(self.error(&format!("unexpected trailing {:?}", self.rest())));
        }

        Ok(PythonVersion {
            raw: self.input.trim().to_string(),
            epoch,
            release,
            pre,
            post,
            dev,
            local,
        })
    }

    fn local_label(&mut self) -> Result<String, VersionError> {
        let label = self.rest().to_string();
        let valid = !label.is_empty()
            && label
                .split(['.', '-', '_'])
                .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_alphanumeric()));
        if !valid {
            return Err(self.error("malformed local version label"));
        }
        self.pos = self.text.len();
        Ok(label.replace(['-', '_'], "."))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equal,
    NotEqual,
    GreaterEqual,
    LessEqual,
    Greater,
    Less,
    Compatible,
    Arbitrary,
}

impl Operator {
    fn from_token(token: &str) -> Option<Self> {
        Some(match token {
            "==" => Operator::Equal,
            "!=" => Operator::NotEqual,
            ">=" => Operator::GreaterEqual,
            "<=" => Operator::LessEqual,
            ">" => Operator::Greater,
            "<" => Operator::Less,
            "~=" => Operator::Compatible,
            "===" => Operator::Arbitrary,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
enum Operand {
    Version(PythonVersion),
    /// `==X.Y.*` / `!=X.Y.*`
    Prefix { epoch: u64, release: Vec<u64> },
    /// `===` compares spelling, not value.
    Literal(String),
}

/// One operator and operand, e.g. `>=2.0` or `==1.4.*`.
#[derive(Debug, Clone)]
pub struct PythonSpecifier {
    op: Operator,
    operand: Operand,
}

impl PythonSpecifier {
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let spec = input.trim();
        let op_len = spec
            .chars()
            .take(3)
            .take_while(|c| matches!(c, '=' | '<' | '>' | '~' | '!'))
            .count();
        let (token, operand) = spec.split_at(op_len);
        let operand = operand.trim();

        let op = Operator::from_token(token).ok_or_else(|| {
            VersionError::specifier(input, format!("unknown operator {token:?}"))
        })?;
        if operand.is_empty() {
            return Err(VersionError::specifier(input, "missing version"));
        }

        let operand = match (op, operand.strip_suffix(".*")) {
            (Operator::Arbitrary, _) => Operand::Literal(operand.to_string()),
            (Operator::Equal | Operator::NotEqual, Some(prefix)) => {
                let version = parse_operand(input, prefix)?;
                if version.pre.is_some() || version.post.is_some() || version.dev.is_some() || version.local.is_some() {
                    return Err(VersionError::specifier(input, "a wildcard prefix may only contain release numbers"));
                }
                Operand::Prefix {
                    epoch: version.epoch,
                    release: version.release,
                }
            }
            (_, Some(_)) => {
                return Err(VersionError::specifier(input, "wildcards are only allowed with == and !="));
            }
            (Operator::Compatible, None) => {
                let version = parse_operand(input, operand)?;
                if version.release.len() < 2 {
                    return Err(VersionError::specifier(input, "~= needs at least two release components"));
                }
                Operand::Version(version)
            }
            (_, None) => Operand::Version(parse_operand(input, operand)?),
        };

        Ok(Self { op, operand })
    }

    pub fn operator(&self) -> Operator {
        self.op
    }

    pub fn contains(&self, version: &PythonVersion) -> bool {
        match (&self.operand, self.op) {
            (Operand::Literal(literal), _) => version.as_str().eq_ignore_ascii_case(literal),
            (Operand::Prefix { epoch, release }, Operator::NotEqual) => {
                !version.has_release_prefix(*epoch, release)
            }
            (Operand::Prefix { epoch, release }, _) => version.has_release_prefix(*epoch, release),
            (Operand::Version(spec), op) => match op {
                Operator::Equal | Operator::Arbitrary => version == spec,
                Operator::NotEqual => version != spec,
                Operator::GreaterEqual => version >= spec,
                Operator::LessEqual => version <= spec,
                Operator::Greater => version > spec,
                Operator::Less => version < spec,
                Operator::Compatible => {
                    let fixed = &spec.release[..spec.release.len() - 1];
                    version >= spec && version.has_release_prefix(spec.epoch, fixed)
                }
            },
        }
    }
}

fn parse_operand(spec: &str, operand: &str) -> Result<PythonVersion, VersionError> {
    PythonVersion::parse(operand).map_err(|err| VersionError::specifier(spec, err.to_string()))
}

impl FromStr for PythonSpecifier {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A conjunction of specifiers.
#[derive(Debug, Clone, Default)]
pub struct VersionRange {
    specifiers: Vec<PythonSpecifier>,
}

impl VersionRange {
    /// Parse a comma-separated list; an empty string is the unconstrained range.
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let specifiers = input
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PythonSpecifier::parse)
            .collect::<Result<_, _>>()?;
        Ok(Self { specifiers })
    }

    pub fn from_specifiers<S: AsRef<str>>(specifiers: &[S]) -> Result<Self, VersionError> {
        let specifiers = specifiers
            .iter()
            .map(|s| PythonSpecifier::parse(s.as_ref()))
            .collect::<Result<_, _>>()?;
        Ok(Self { specifiers })
    }

    pub fn is_empty(&self) -> bool {
        self.specifiers.is_empty()
    }

    pub fn contains(&self, version: &PythonVersion) -> bool {
        self.specifiers.iter().all(|s| s.contains(version))
    }
}

/// Whether `version` satisfies every specifier.
///
/// The version is parsed before any specifier, so a malformed version is an
/// error even when the list is empty.
pub fn version_valid_for_spec<S: AsRef<str>>(version: &str, specifiers: &[S]) -> Result<bool, VersionError> {
    let version = PythonVersion::parse(version)?;
    let range = VersionRange::from_specifiers(specifiers)?;
    Ok(range.contains(&version))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const CHAIN: [&str; 19] = [
        "1.0.dev",
        "1.0.dev456",
        "1.0a1",
        "1.0a2.dev456",
        "1.0a12.dev456",
        "1.0a12",
        "1.0b1.dev456",
        "1.0b2",
        "1.0b2.post345.dev456",
        "1.0b2.post345",
        "1.0rc1.dev",
        "1.0rc1.dev456",
        "1.0rc1",
        "1.0",
        "1.0.post456.dev34",
        "1.0.post456",
        "1.1.dev",
        "1.1.dev1",
        "1.1",
    ];

    fn v(s: &str) -> PythonVersion {
        PythonVersion::parse(s).unwrap()
    }

    #[test]
    fn test_chain_is_strictly_increasing() {
        for pair in CHAIN.windows(2) {
            assert!(v(pair[0]) < v(pair[1]), "{} < {}", pair[0], pair[1]);
            assert!(v(pair[1]) > v(pair[0]), "{} > {}", pair[1], pair[0]);
        }
    }

    #[test]
    fn test_chain_is_a_strict_total_order() {
        for (i, a) in CHAIN.iter().enumerate() {
            for (j, b) in CHAIN.iter().enumerate() {
                assert_eq!(v(a).cmp(&v(b)), i.cmp(&j), "{a} vs {b}");
            }
        }
    }

    #[test]
    fn test_alternate_spellings_normalize() {
        assert_eq!(v("1.0alpha1"), v("1.0a1"));
        assert_eq!(v("1.0-beta.2"), v("1.0b2"));
        assert_eq!(v("1.0c1"), v("1.0rc1"));
        assert_eq!(v("1.0pre1"), v("1.0rc1"));
        assert_eq!(v("1.0preview1"), v("1.0rc1"));
        assert_eq!(v("1.0-1"), v("1.0.post1"));
        assert_eq!(v("1.0rev1"), v("1.0.post1"));
        assert_eq!(v("1.0r"), v("1.0.post0"));
        assert_eq!(v("1.0RC"), v("1.0rc0"));
        assert_eq!(v("V2.0"), v("2.0.0"));
        assert_eq!(v("1!1.0").epoch(), 1);
        assert!(v("1!0.1") > v("2.0"));
    }

    #[test]
    fn test_local_label_is_ignored_in_ordering() {
        let local = v("1.1.1.dev17+gcae73d8.d20200403");
        assert_eq!(local.local(), Some("gcae73d8.d20200403"));
        assert_eq!(local, v("1.1.1.dev17"));
    }

    #[test]
    fn test_malformed_versions() {
        for input in ["notvalid", "", "1.", "1..0", "1.0+", "1.0+a+b", "1.0 beta", "1.0.foo", "!1.0"] {
            assert!(
                matches!(PythonVersion::parse(input), Err(VersionError::MalformedVersion { .. })),
                "{input:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_wildcard_prefix() {
        let spec = ["==1.4.*"];
        for version in ["1.4", "1.4.1", "1.4.2", "1.4.3"] {
            assert!(version_valid_for_spec(version, &spec).unwrap(), "{version}");
        }
        for version in ["1.0.1", "2.0", "0.1", "1.5", "1.5.0"] {
            assert!(!version_valid_for_spec(version, &spec).unwrap(), "{version}");
        }
        assert!(version_valid_for_spec("1.5", &["!=1.4.*"]).unwrap());
        assert!(!version_valid_for_spec("1!1.4", &["==1.4.*"]).unwrap());
    }

    #[test]
    fn test_operators() {
        let cases: &[(&str, &[&str], bool)] = &[
            ("1.0", &["==1.0.0"], true),
            ("1.0", &["!=1.0"], false),
            ("2.0", &[">1.0", "<3.0"], true),
            ("3.0", &[">1.0", "<3.0"], false),
            ("1.0", &[">=1.0", "<=1.0"], true),
            ("1.0a1", &["<1.0"], true),
            ("2.2.5", &["~=2.2"], true),
            ("3.0", &["~=2.2"], false),
            ("1.4.5", &["~=1.4.2"], true),
            ("1.5.0", &["~=1.4.2"], false),
            ("1.1.1.dev17", &["==1.1.1.dev17+gcae73d8.d20200403"], true),
            ("v1.1.1.dev17", &["==1.1.1.dev17+gcae73d8.d20200403"], true),
            ("1.0.post1", &["===1.0.POST1"], true),
            ("1.0", &["===1.0.0"], false),
            ("0.9", &[], true),
        ];
        for (version, specs, expected) in cases {
            assert_eq!(
                version_valid_for_spec(version, *specs).unwrap(),
                *expected,
                "{version} against {specs:?}"
            );
        }
    }

    #[test]
    fn test_invalid_version_is_an_error_not_false() {
        let empty: [&str; 0] = [];
        assert!(matches!(
            version_valid_for_spec("notvalid", &empty),
            Err(VersionError::MalformedVersion { .. })
        ));
        assert!(matches!(
            version_valid_for_spec("notvalid", &[">=1.0"]),
            Err(VersionError::MalformedVersion { .. })
        ));
    }

    #[test]
    fn test_invalid_specifiers() {
        for spec in ["==1.1+gcae73d8.d20200403+1.0", "1.0", "=>1.0", "~=1", ">=1.*", "==", "==1.0a1.*"] {
            assert!(
                matches!(
                    version_valid_for_spec("1.0", &[spec]),
                    Err(VersionError::MalformedSpecifier { .. })
                ),
                "{spec:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_range_parse() {
        let range = VersionRange::parse(">=2.0, <3.0,!=2.5").unwrap();
        assert!(range.contains(&v("2.4")));
        assert!(!range.contains(&v("2.5")));
        assert!(!range.contains(&v("3.0")));
        assert!(VersionRange::parse("").unwrap().is_empty());
    }

    fn version_strategy() -> impl Strategy<Value = String> {
        (
            prop::collection::vec(0u64..4, 1..4),
            prop::option::of((prop::sample::select(vec!["a", "b", "rc"]), 0u64..3)),
            prop::option::of(0u64..3),
            prop::option::of(0u64..3),
        )
            .prop_map(|(release, pre, post, dev)| {
                let mut s = release.iter().map(u64::to_string).collect::<Vec<_>>().join(".");
                if let Some((label, n)) = pre {
                    s.push_str(&format!("{label}{n}"));
                }
                if let Some(n) = post {
                    s.push_str(&format!(".post{n}"));
                }
                if let Some(n) = dev {
                    s.push_str(&format!(".dev{n}"));
                }
                s
            })
    }

    fn specifier_strategy() -> impl Strategy<Value = String> {
        (
            prop::sample::select(vec!["==", "!=", ">=", "<=", ">", "<"]),
            version_strategy(),
        )
            .prop_map(|(op, version)| format!("{op}{version}"))
    }

    proptest! {
        #[test]
        fn prop_order_is_total_and_antisymmetric(a in version_strategy(), b in version_strategy()) {
            let (va, vb) = (v(&a), v(&b));
            prop_assert_eq!(va.cmp(&vb), vb.cmp(&va).reverse());
            prop_assert_eq!(va == vb, va.cmp(&vb) == Ordering::Equal);
        }

        #[test]
        fn prop_order_is_transitive(a in version_strategy(), b in version_strategy(), c in version_strategy()) {
            let (va, vb, vc) = (v(&a), v(&b), v(&c));
            if va <= vb && vb <= vc {
                prop_assert!(va <= vc);
            }
        }

        #[test]
        fn prop_list_is_conjunction(
            version in version_strategy(),
            specs in prop::collection::vec(specifier_strategy(), 0..4),
        ) {
            let all = version_valid_for_spec(&version, &specs).unwrap();
            let each = specs
                .iter()
                .all(|s| version_valid_for_spec(&version, std::slice::from_ref(s)).unwrap());
            prop_assert_eq!(all, each);
        }
    }
}

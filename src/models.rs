//! Component identity: one closed enum keyed by ecosystem, each variant holding
//! its own natural-key fields.

use serde::{Deserialize, Serialize};

use crate::error::IdentityError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Ecosystem {
    Pip,
    Cargo,
    Maven,
    Npm,
    NuGet,
    Go,
    Conda,
    RubyGems,
    Linux,
}

impl std::fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Ecosystem::Pip => write!(f, "Pip"),
            Ecosystem::Cargo => write!(f, "Cargo"),
            Ecosystem::Maven => write!(f, "Maven"),
            Ecosystem::Npm => write!(f, "Npm"),
            Ecosystem::NuGet => write!(f, "NuGet"),
            Ecosystem::Go => write!(f, "Go"),
            Ecosystem::Conda => write!(f, "Conda"),
            Ecosystem::RubyGems => write!(f, "RubyGems"),
            Ecosystem::Linux => write!(f, "Linux"),
        }
    }
}

/// Name + version, the whole natural key for pip, npm, NuGet and RubyGems.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Package {
    name: String,
    version: String,
}

/// A crate. `source` is recorded but is not part of the id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct CargoPackage {
    name: String,
    version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MavenArtifact {
    group_id: String,
    artifact_id: String,
    version: String,
}

/// A Go module. The `h1:` hash from `go.sum` is auxiliary: two modules with
/// the same path and version share an id whether or not a hash was seen.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct GoModule {
    name: String,
    version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct CondaPackage {
    name: String,
    version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    build: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    subdir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    md5: Option<String>,
}

/// Optional Conda key fields. `md5` is auxiliary and never part of the id.
#[derive(Debug, Clone, Default)]
pub struct CondaExtras<'a> {
    pub build: Option<&'a str>,
    pub channel: Option<&'a str>,
    pub subdir: Option<&'a str>,
    pub md5: Option<&'a str>,
}

/// A distro package (apk, deb, rpm) as reported by a container scanner.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct LinuxPackage {
    distribution: String,
    release: String,
    name: String,
    version: String,
}

/// A component as observed by an analyzer.
///
/// Constructed only through the validating constructors below, so every value
/// carries all of its required key fields. `PartialEq` is structural and
/// includes auxiliary fields; graph identity is [`Component::id`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "type")]
pub enum Component {
    Pip(Package),
    Cargo(CargoPackage),
    Maven(MavenArtifact),
    Npm(Package),
    NuGet(Package),
    Go(GoModule),
    Conda(CondaPackage),
    RubyGems(Package),
    Linux(LinuxPackage),
}

impl Component {
    pub fn pip(name: &str, version: &str) -> Result<Self, IdentityError> {
        Ok(Component::Pip(Package::new(Ecosystem::Pip, name, version)?))
    }

    pub fn npm(name: &str, version: &str) -> Result<Self, IdentityError> {
        Ok(Component::Npm(Package::new(Ecosystem::Npm, name, version)?))
    }

    pub fn nuget(name: &str, version: &str) -> Result<Self, IdentityError> {
        Ok(Component::NuGet(Package::new(Ecosystem::NuGet, name, version)?))
    }

    pub fn rubygems(name: &str, version: &str) -> Result<Self, IdentityError> {
        Ok(Component::RubyGems(Package::new(
            Ecosystem::RubyGems,
            name,
            version,
        )?))
    }

    pub fn cargo(name: &str, version: &str, source: Option<&str>) -> Result<Self, IdentityError> {
        let eco = Ecosystem::Cargo;
        Ok(Component::Cargo(CargoPackage {
            name: required(eco, "name", name)?,
            version: required(eco, "version", version)?,
            source: source.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string),
        }))
    }

    pub fn maven(group_id: &str, artifact_id: &str, version: &str) -> Result<Self, IdentityError> {
        let eco = Ecosystem::Maven;
        Ok(Component::Maven(MavenArtifact {
            group_id: required(eco, "group_id", group_id)?,
            artifact_id: required(eco, "artifact_id", artifact_id)?,
            version: required(eco, "version", version)?,
        }))
    }

    pub fn go(name: &str, version: &str, hash: Option<&str>) -> Result<Self, IdentityError> {
        let eco = Ecosystem::Go;
        Ok(Component::Go(GoModule {
            name: required(eco, "name", name)?,
            version: required(eco, "version", version)?,
            hash: optional(eco, "hash", hash)?,
        }))
    }

    pub fn conda(name: &str, version: &str, extras: CondaExtras<'_>) -> Result<Self, IdentityError> {
        let eco = Ecosystem::Conda;
        Ok(Component::Conda(CondaPackage {
            name: required(eco, "name", name)?,
            version: required(eco, "version", version)?,
            build: optional(eco, "build", extras.build)?,
            channel: optional(eco, "channel", extras.channel)?,
            subdir: optional(eco, "subdir", extras.subdir)?,
            md5: optional(eco, "md5", extras.md5)?,
        }))
    }

    pub fn linux(
        distribution: &str,
        release: &str,
        name: &str,
        version: &str,
    ) -> Result<Self, IdentityError> {
        let eco = Ecosystem::Linux;
        Ok(Component::Linux(LinuxPackage {
            distribution: required(eco, "distribution", distribution)?,
            release: required(eco, "release", release)?,
            name: required(eco, "name", name)?,
            version: required(eco, "version", version)?,
        }))
    }

    pub fn ecosystem(&self) -> Ecosystem {
        match self {
            Component::Pip(_) => Ecosystem::Pip,
            Component::Cargo(_) => Ecosystem::Cargo,
            Component::Maven(_) => Ecosystem::Maven,
            Component::Npm(_) => Ecosystem::Npm,
            Component::NuGet(_) => Ecosystem::NuGet,
            Component::Go(_) => Ecosystem::Go,
            Component::Conda(_) => Ecosystem::Conda,
            Component::RubyGems(_) => Ecosystem::RubyGems,
            Component::Linux(_) => Ecosystem::Linux,
        }
    }

    /// Canonical identity of the component within its ecosystem.
    ///
    /// Key fields are positional and whitespace-free, and the ecosystem tag is
    /// always the suffix, so distinct components cannot format to the same id.
    pub fn id(&self) -> String {
        let eco = self.ecosystem();
        match self {
            Component::Pip(p) => format!("{} {} - {}", p.name, p.version, eco).to_lowercase(),
            Component::Npm(p) | Component::NuGet(p) | Component::RubyGems(p) => {
                format!("{} {} - {}", p.name, p.version, eco)
            }
            Component::Cargo(c) => format!("{} {} - {}", c.name, c.version, eco),
            Component::Maven(m) => {
                format!("{} {} {} - {}", m.group_id, m.artifact_id, m.version, eco)
            }
            Component::Go(g) => format!("{} {} - {}", g.name, g.version, eco),
            Component::Conda(c) => format!(
                "{} {} {} {} {} - {}",
                c.name,
                c.version,
                c.build.as_deref().unwrap_or_default(),
                c.channel.as_deref().unwrap_or_default(),
                c.subdir.as_deref().unwrap_or_default(),
                eco
            ),
            Component::Linux(l) => format!(
                "{} {} {} {} - {}",
                l.distribution, l.release, l.name, l.version, eco
            ),
        }
    }

    /// Display name; Maven coordinates render as `group:artifact`.
    pub fn name(&self) -> String {
        match self {
            Component::Pip(p) | Component::Npm(p) | Component::NuGet(p) | Component::RubyGems(p) => {
                p.name.clone()
            }
            Component::Cargo(c) => c.name.clone(),
            Component::Maven(m) => format!("{}:{}", m.group_id, m.artifact_id),
            Component::Go(g) => g.name.clone(),
            Component::Conda(c) => c.name.clone(),
            Component::Linux(l) => l.name.clone(),
        }
    }

    pub fn version(&self) -> &str {
        match self {
            Component::Pip(p) | Component::Npm(p) | Component::NuGet(p) | Component::RubyGems(p) => {
                &p.version
            }
            Component::Cargo(c) => &c.version,
            Component::Maven(m) => &m.version,
            Component::Go(g) => &g.version,
            Component::Conda(c) => &c.version,
            Component::Linux(l) => &l.version,
        }
    }
}

impl Package {
    fn new(ecosystem: Ecosystem, name: &str, version: &str) -> Result<Self, IdentityError> {
        Ok(Package {
            name: required(ecosystem, "name", name)?,
            version: required(ecosystem, "version", version)?,
        })
    }
}

fn required(ecosystem: Ecosystem, field: &'static str, value: &str) -> Result<String, IdentityError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(IdentityError::MissingField { ecosystem, field });
    }
    reject_whitespace(ecosystem, field, value)?;
    Ok(value.to_string())
}

fn optional(
    ecosystem: Ecosystem,
    field: &'static str,
    value: Option<&str>,
) -> Result<Option<String>, IdentityError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => {
            reject_whitespace(ecosystem, field, v)?;
            Ok(Some(v.to_string()))
        }
        None => Ok(None),
    }
}

fn reject_whitespace(ecosystem: Ecosystem, field: &'static str, value: &str) -> Result<(), IdentityError> {
    if value.chars().any(char::is_whitespace) {
        return Err(IdentityError::InvalidField {
            ecosystem,
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// One node of the merged graph, as handed to reporting.
#[derive(Debug, Clone, Serialize)]
pub struct DetectedComponent {
    pub id: String,
    pub component: Component,
    pub explicit: bool,
    /// `None` when no analyzer said either way.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub development: Option<bool>,
    pub parent_ids: Vec<String>,
    /// Provenance: every file (or container layer) the component was seen in.
    pub locations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
}

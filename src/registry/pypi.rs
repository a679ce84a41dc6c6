use std::collections::BTreeMap;

use anyhow::Result;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::VersionError;
use crate::version::{PythonVersion, VersionRange};

/// One distribution file of a release, as listed by the PyPI JSON API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReleaseFile {
    pub filename: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub packagetype: String,
    #[serde(default)]
    pub yanked: bool,
}

#[derive(Debug, Deserialize)]
struct Project {
    info: ProjectInfo,
    #[serde(default)]
    releases: BTreeMap<String, Vec<ReleaseFile>>,
}

#[derive(Debug, Deserialize)]
struct ProjectInfo {
    license: Option<String>,
    license_expression: Option<String>,
    #[serde(default)]
    classifiers: Vec<String>,
}

impl ProjectInfo {
    /// `license_expression`, then `license`, then the trove classifiers
    /// (`License :: OSI Approved :: MIT License` gives `MIT License`).
    fn license(self) -> Option<String> {
        let declared = self
            .license_expression
            .into_iter()
            .chain(self.license)
            .map(|l| l.trim().to_string())
            .find(|l| !l.is_empty() && !l.eq_ignore_ascii_case("UNKNOWN"));
        if declared.is_some() {
            return declared;
        }

        let classifiers: Vec<&str> = self
            .classifiers
            .iter()
            .filter(|c| c.starts_with("License"))
            .filter_map(|c| c.rsplit(" :: ").next())
            .collect();
        (!classifiers.is_empty()).then(|| classifiers.join(", "))
    }
}

async fn fetch_project(client: &Client, url: &str) -> Result<Option<Project>> {
    let response = client.get(url).send().await?;
    match response.status() {
        StatusCode::NOT_FOUND => Ok(None),
        status if !status.is_success() => {
            warn!(url = %url, status = %status, "PyPI request failed");
            Ok(None)
        }
        _ => Ok(Some(response.json().await?)),
    }
}

/// Fetch the license of one release from PyPI.
pub async fn fetch_license(client: &Client, name: &str, version: &str) -> Result<Option<String>> {
    let url = format!("https://pypi.org/pypi/{name}/{version}/json");
    Ok(fetch_project(client, &url).await?.and_then(|p| p.info.license()))
}

/// Every release PyPI knows for `name`, keyed by the version as published.
/// An unknown project has no releases.
pub async fn fetch_releases(client: &Client, name: &str) -> Result<BTreeMap<String, Vec<ReleaseFile>>> {
    let url = format!("https://pypi.org/pypi/{name}/json");
    let releases = fetch_project(client, &url)
        .await?
        .map(|p| p.releases)
        .unwrap_or_default();
    debug!(name = %name, releases = releases.len(), "fetched PyPI releases");
    Ok(releases)
}

/// Releases satisfying every specifier, in ascending version order.
///
/// Published versions PyPI accepted long ago do not always parse; those,
/// and releases with no installable file left, are skipped with a warning.
/// Malformed specifiers are an error.
pub fn filter_releases<'a, S: AsRef<str>>(
    releases: &'a BTreeMap<String, Vec<ReleaseFile>>,
    specifiers: &[S],
) -> Result<Vec<(PythonVersion, &'a [ReleaseFile])>, VersionError> {
    let range = VersionRange::from_specifiers(specifiers)?;

    let mut matching = Vec::new();
    for (raw, files) in releases {
        let version = match PythonVersion::parse(raw) {
            Ok(version) => version,
            Err(err) => {
                warn!(version = %raw, error = %err, "skipping release");
                continue;
            }
        };
        if files.iter().all(|f| f.yanked) {
            warn!(version = %raw, "skipping release without installable files");
            continue;
        }
        if range.contains(&version) {
            matching.push((version, files.as_slice()));
        }
    }

    matching.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(matching)
}

/// The highest final release satisfying the specifiers.
pub fn resolve_latest<S: AsRef<str>>(
    releases: &BTreeMap<String, Vec<ReleaseFile>>,
    specifiers: &[S],
) -> Result<Option<PythonVersion>, VersionError> {
    Ok(filter_releases(releases, specifiers)?
        .into_iter()
        .map(|(version, _)| version)
        .filter(|version| !version.is_prerelease())
        .last())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str) -> ReleaseFile {
        ReleaseFile {
            filename: name.to_string(),
            url: String::new(),
            packagetype: "bdist_wheel".to_string(),
            yanked: false,
        }
    }

    fn releases() -> BTreeMap<String, Vec<ReleaseFile>> {
        let mut releases = BTreeMap::new();
        for version in ["1.9.0", "2.0.0", "2.10.0", "2.2.0", "3.0.0rc1", "0.1-beta-weird"] {
            releases.insert(version.to_string(), vec![file(&format!("pkg-{version}.whl"))]);
        }
        releases.insert("2.11.0".to_string(), vec![]);
        releases.insert(
            "2.12.0".to_string(),
            vec![ReleaseFile {
                yanked: true,
                ..file("pkg-2.12.0.whl")
            }],
        );
        releases
    }

    #[test]
    fn test_filter_releases_orders_by_version() {
        let releases = releases();
        let matching = filter_releases(&releases, &[">=2.0"]).unwrap();
        let versions: Vec<_> = matching.iter().map(|(v, _)| v.as_str()).collect();
        assert_eq!(versions, vec!["2.0.0", "2.2.0", "2.10.0", "3.0.0rc1"]);
    }

    #[test]
    fn test_resolve_latest_skips_prereleases() {
        let releases = releases();
        let latest = resolve_latest(&releases, &[">=2.0"]).unwrap();
        assert_eq!(latest.as_ref().map(PythonVersion::as_str), Some("2.10.0"));

        let none = resolve_latest(&releases, &[">=4"]).unwrap();
        assert_eq!(none, None);

        let any = resolve_latest::<&str>(&releases, &[]).unwrap();
        assert_eq!(any.as_ref().map(PythonVersion::as_str), Some("2.10.0"));
    }

    #[test]
    fn test_malformed_specifier_is_an_error() {
        assert!(filter_releases(&releases(), &["~=1"]).is_err());
    }

    #[test]
    fn test_project_info_license() {
        let info: ProjectInfo = serde_json::from_str(
            r#"{"license": "", "classifiers": [
                "Programming Language :: Python",
                "License :: OSI Approved :: MIT License"
            ]}"#,
        )
        .unwrap();
        assert_eq!(info.license().as_deref(), Some("MIT License"));

        let info: ProjectInfo =
            serde_json::from_str(r#"{"license": "BSD", "license_expression": "Apache-2.0"}"#).unwrap();
        assert_eq!(info.license().as_deref(), Some("Apache-2.0"));
    }
}

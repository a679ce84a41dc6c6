//! Components reported by an external container scanner (Syft JSON output).
//!
//! The scanner is never run from here; its JSON report is read and each
//! artifact is mapped onto a component, with the image layers it was found
//! in as provenance.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::Result;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{read_manifest, IdentityError, ScanError};
use crate::graph::{FileGraph, SealedFileGraph};
use crate::models::{CondaExtras, Component};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyftOutput {
    pub distro: Option<Distro>,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Distro {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "versionID", default)]
    pub version_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Artifact {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub locations: Vec<ArtifactLocation>,
    /// Scanner-specific details, only read for a few artifact types.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArtifactLocation {
    #[serde(default)]
    pub path: String,
    #[serde(rename = "layerID")]
    pub layer_id: Option<String>,
}

/// An artifact that maps onto a known ecosystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedArtifact {
    pub component: Component,
    /// Layers the artifact was found in, deduplicated and sorted.
    pub layers: Vec<String>,
}

/// Read a Syft JSON report from disk.
pub fn load(path: &Path) -> Result<SyftOutput> {
    let content = read_manifest(path)?;
    Ok(serde_json::from_str(&content).map_err(|e| ScanError::parse(path, e))?)
}

/// Map every artifact with a known type onto a component.
///
/// Artifacts with a blank name or version, an unknown type, or (for distro
/// packages) a report without distro information are skipped.
pub fn map_artifacts(output: &SyftOutput) -> Vec<MappedArtifact> {
    output
        .artifacts
        .iter()
        .filter_map(|artifact| {
            if artifact.name.trim().is_empty() || artifact.version.trim().is_empty() {
                debug!(kind = %artifact.kind, name = %artifact.name, "artifact without name or version");
                return None;
            }
            let component = match to_component(artifact, output.distro.as_ref()) {
                Some(Ok(component)) => component,
                Some(Err(err)) => {
                    debug!(kind = %artifact.kind, name = %artifact.name, error = %err, "skipping artifact");
                    return None;
                }
                None => {
                    debug!(kind = %artifact.kind, name = %artifact.name, "unsupported artifact type");
                    return None;
                }
            };
            let layers: BTreeSet<String> = artifact
                .locations
                .iter()
                .filter_map(|l| l.layer_id.clone())
                .filter(|l| !l.is_empty())
                .collect();
            Some(MappedArtifact {
                component,
                layers: layers.into_iter().collect(),
            })
        })
        .collect()
}

fn to_component(artifact: &Artifact, distro: Option<&Distro>) -> Option<Result<Component, IdentityError>> {
    let name = artifact.name.as_str();
    let version = artifact.version.as_str();
    let metadata = |key: &str| artifact.metadata.get(key).and_then(|v| v.as_str());

    let component = match artifact.kind.as_str() {
        "apk" | "deb" | "rpm" => {
            let distro = distro?;
            Component::linux(&distro.id, &distro.version_id, name, version)
        }
        "rust-crate" => Component::cargo(name, version, metadata("source")),
        "go-module" => Component::go(name, version, metadata("h1Digest")),
        "npm" => Component::npm(name, version),
        "python" => Component::pip(name, version),
        "gem" => Component::rubygems(name, version),
        "conda" => Component::conda(name, version, CondaExtras::default()),
        "java-archive" => {
            let group_id = artifact
                .metadata
                .get("pomProperties")
                .and_then(|p| p.get("groupId"))
                .and_then(|g| g.as_str());
            match (name.split_once(':'), group_id) {
                (Some((group_id, artifact_id)), _) => Component::maven(group_id, artifact_id, version),
                (None, Some(group_id)) => Component::maven(group_id, name, version),
                (None, None) => return None,
            }
        }
        _ => return None,
    };
    Some(component)
}

/// One sealed graph per image layer, every artifact an explicit usage.
/// Locations read `"{source}#{layerID}"`; artifacts without layer
/// information are recorded under `source` alone.
pub fn record(output: &SyftOutput, source: &str) -> Vec<SealedFileGraph> {
    let mut graphs: BTreeMap<String, FileGraph> = BTreeMap::new();

    for artifact in map_artifacts(output) {
        let locations = if artifact.layers.is_empty() {
            vec![source.to_string()]
        } else {
            artifact
                .layers
                .iter()
                .map(|layer| format!("{source}#{layer}"))
                .collect()
        };
        for location in locations {
            graphs
                .entry(location.clone())
                .or_insert_with(|| FileGraph::new(location))
                .register_usage(artifact.component.clone(), true, None);
        }
    }

    let sealed = seal_layers(graphs.into_values(), source);
    info!(source = %source, layers = sealed.len(), "container scan recorded");
    sealed
}

/// Seal each layer graph; a layer that fails to seal is logged and dropped.
fn seal_layers(graphs: impl IntoIterator<Item = FileGraph>, source: &str) -> Vec<SealedFileGraph> {
    graphs
        .into_iter()
        .filter_map(|graph| match graph.seal() {
            Ok(sealed) => Some(sealed),
            Err(err) => {
                warn!(source = %source, error = %err, "dropping layer");
                None
            }
        })
        .collect()
}

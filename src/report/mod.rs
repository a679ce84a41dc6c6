//! Report renderers for the merged dependency graph.
//!
//! - [`terminal`] — colored summary box and component table; respects `--verbose` / `--quiet`.
//! - [`json`] — the full graph as one JSON document on stdout.

pub mod terminal;

use anyhow::Result;
use serde::Serialize;

use crate::models::DetectedComponent;

/// What every renderer receives.
#[derive(Debug, Serialize)]
pub struct Report<'a> {
    pub components: &'a [DetectedComponent],
    /// Entries that could not be turned into components.
    pub skipped: &'a [String],
    /// Explicit components nothing else depends on.
    pub roots: &'a [String],
}

pub mod json {
    use super::*;

    pub fn render(report: &Report<'_>) -> Result<String> {
        Ok(serde_json::to_string_pretty(report)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Component;

    #[test]
    fn test_json_report_shape() {
        let components = vec![DetectedComponent {
            id: "serde 1.0.150 - Cargo".to_string(),
            component: Component::cargo("serde", "1.0.150", None).unwrap(),
            explicit: true,
            development: None,
            parent_ids: vec![],
            locations: vec!["Cargo.lock".to_string()],
            license: Some("MIT OR Apache-2.0".to_string()),
        }];
        let skipped = vec!["flask>=2".to_string()];
        let roots = vec!["serde 1.0.150 - Cargo".to_string()];
        let json = json::render(&Report {
            components: &components,
            skipped: &skipped,
            roots: &roots,
        })
        .unwrap();

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["components"][0]["component"]["type"], "Cargo");
        assert_eq!(value["components"][0]["component"]["name"], "serde");
        assert_eq!(value["components"][0]["license"], "MIT OR Apache-2.0");
        assert!(value["components"][0].get("development").is_none());
        assert_eq!(value["skipped"][0], "flask>=2");
        assert_eq!(value["roots"][0], "serde 1.0.150 - Cargo");
    }
}

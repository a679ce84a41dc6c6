use anyhow::Result;
use reqwest::Client;

/// Scoped names keep their scope: `@scope/pkg` becomes `@scope%2Fpkg`.
fn package_path(name: &str) -> String {
    name.replace('/', "%2F")
}

/// Fetch the license of one package version from the npm registry.
///
/// Old packages publish `license` as an object (`{"type": "MIT"}`) or as a
/// `licenses` array; both are read.
pub async fn fetch_license(client: &Client, name: &str, version: &str) -> Result<Option<String>> {
    let url = format!("https://registry.npmjs.org/{}/{version}", package_path(name));

    let response = client
        .get(&url)
        .header("Accept", "application/json")
        .send()
        .await?;
    if !response.status().is_success() {
        return Ok(None);
    }

    let data: serde_json::Value = response.json().await?;
    Ok(license_of(&data))
}

fn license_of(manifest: &serde_json::Value) -> Option<String> {
    let declared = manifest.get("license").or_else(|| {
        manifest
            .get("licenses")
            .and_then(|l| l.as_array())
            .and_then(|l| l.first())
    })?;
    declared
        .as_str()
        .or_else(|| declared.get("type").and_then(|t| t.as_str()))
        .filter(|l| !l.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_license_forms() {
        assert_eq!(license_of(&json!({"license": "MIT"})).as_deref(), Some("MIT"));
        assert_eq!(
            license_of(&json!({"license": {"type": "ISC", "url": "x"}})).as_deref(),
            Some("ISC")
        );
        assert_eq!(
            license_of(&json!({"licenses": [{"type": "BSD-3-Clause"}]})).as_deref(),
            Some("BSD-3-Clause")
        );
        assert_eq!(license_of(&json!({"name": "x"})), None);
    }

    #[test]
    fn test_scoped_package_path() {
        assert_eq!(package_path("@types/node"), "@types%2Fnode");
        assert_eq!(package_path("lodash"), "lodash");
    }
}

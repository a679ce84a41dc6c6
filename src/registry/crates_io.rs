use anyhow::Result;
use reqwest::Client;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct VersionResponse {
    version: CrateVersion,
}

#[derive(Debug, Deserialize)]
struct CrateVersion {
    license: Option<String>,
}

/// Fetch the license of one crate version from crates.io.
pub async fn fetch_license(client: &Client, name: &str, version: &str) -> Result<Option<String>> {
    let url = format!("https://crates.io/api/v1/crates/{name}/{version}");

    let response = client.get(&url).send().await?;
    if !response.status().is_success() {
        return Ok(None);
    }

    let data: VersionResponse = response.json().await?;
    Ok(data.version.license.filter(|l| !l.is_empty()))
}

//! Package index lookups, only made with `--online`.
//!
//! Every lookup answers `Ok(None)` when the index has nothing for the
//! package and `Err` on transport failures. Callers treat both as "no
//! result" for that component.

pub mod crates_io;
pub mod maven;
pub mod npm;
pub mod pypi;

use std::time::Duration;

use anyhow::Result;
use reqwest::Client;

use crate::models::Component;

pub(crate) const USER_AGENT: &str = concat!("component-scan/", env!("CARGO_PKG_VERSION"));

/// Shared HTTP client; the timeout applies to each request.
pub fn client(timeout: Duration) -> Result<Client> {
    Ok(Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()?)
}

/// Look up the declared license of a component in its ecosystem's index.
/// Ecosystems without a queryable index answer `Ok(None)`.
pub async fn fetch_license(client: &Client, component: &Component) -> Result<Option<String>> {
    let name = component.name();
    let version = component.version();
    match component {
        Component::Cargo(_) => crates_io::fetch_license(client, &name, version).await,
        Component::Pip(_) => pypi::fetch_license(client, &name, version).await,
        Component::Maven(_) => maven::fetch_license(client, &name, version).await,
        Component::Npm(_) => npm::fetch_license(client, &name, version).await,
        _ => Ok(None),
    }
}

use anyhow::Result;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client;

/// Fetch the license of an artifact from its POM on Maven Central.
///
/// `name` is the `groupId:artifactId` display name of a Maven component.
pub async fn fetch_license(client: &Client, name: &str, version: &str) -> Result<Option<String>> {
    let Some((group_id, artifact_id)) = name.split_once(':') else {
        return Ok(None);
    };

    let url = format!(
        "https://repo1.maven.org/maven2/{}/{artifact_id}/{version}/{artifact_id}-{version}.pom",
        group_id.replace('.', "/"),
    );

    let response = client.get(&url).send().await?;
    if !response.status().is_success() {
        return Ok(None);
    }

    let pom = response.text().await?;
    Ok(license_from_pom(&pom))
}

/// The first `project/licenses/license/name` of a POM. Unreadable XML has none.
fn license_from_pom(xml: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut path: Vec<String> = Vec::new();
    loop {
        match reader.read_event().ok()? {
            Event::Start(e) => {
                path.push(String::from_utf8_lossy(e.name().local_name().as_ref()).into_owned());
            }
            Event::End(_) => {
                path.pop();
            }
            Event::Text(e) if is_license_name(&path) => {
                let text = e.unescape().ok()?;
                return Some(text.trim().to_string()).filter(|t| !t.is_empty());
            }
            Event::Eof => return None,
            _ => {}
        }
    }
}

fn is_license_name(path: &[String]) -> bool {
    path.iter()
        .rev()
        .take(3)
        .map(String::as_str)
        .eq(["name", "license", "licenses"])
}

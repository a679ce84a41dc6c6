use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use colored::*;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};

use crate::models::{DetectedComponent, Ecosystem};

use super::Report;

#[derive(Debug, Default, PartialEq, Eq)]
struct Summary {
    total: usize,
    explicit: usize,
    development: usize,
    skipped: usize,
    by_ecosystem: BTreeMap<Ecosystem, usize>,
}

impl Summary {
    fn new(report: &Report<'_>) -> Self {
        let mut summary = Summary {
            total: report.components.len(),
            skipped: report.skipped.len(),
            ..Summary::default()
        };
        for detected in report.components {
            summary.explicit += usize::from(detected.explicit);
            summary.development += usize::from(detected.development == Some(true));
            *summary
                .by_ecosystem
                .entry(detected.component.ecosystem())
                .or_insert(0) += 1;
        }
        summary
    }

    fn ecosystems(&self) -> String {
        self.by_ecosystem
            .iter()
            .map(|(ecosystem, count)| format!("{ecosystem} ({count})"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Render a colored terminal report.
///
/// Only direct dependencies are listed unless `verbose` is set; `quiet`
/// prints the summary line alone.
pub fn render(report: &Report<'_>, path: &Path, verbose: bool, quiet: bool) -> Result<()> {
    let summary = Summary::new(report);

    if quiet {
        println!(
            "Total: {}  Explicit: {}  Transitive: {}  Skipped: {}",
            summary.total,
            summary.explicit.to_string().green(),
            (summary.total - summary.explicit).to_string().cyan(),
            summary.skipped.to_string().yellow(),
        );
        return Ok(());
    }

    println!(
        "\n {} v{}",
        "component-scan".bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!(" Scanning: {}\n", path.display());

    println!(" ┌────────────────────────────────────────────────────┐");
    println!(" │  {:<48} │", "SUMMARY".bold());
    println!(" │  {:<48} │", format!("Components         : {:>5}", summary.total));
    println!(" │  {:<48} │", format!("Explicit           : {:>5}", summary.explicit));
    println!(
        " │  {:<48} │",
        format!("Transitive         : {:>5}", summary.total - summary.explicit)
    );
    println!(" │  {:<48} │", format!("Development only   : {:>5}", summary.development));
    println!(" │  {:<48} │", format!("Skipped entries    : {:>5}", summary.skipped));
    println!(" └────────────────────────────────────────────────────┘");
    if !summary.by_ecosystem.is_empty() {
        println!(" {}\n", summary.ecosystems());
    }

    let listed: Vec<&DetectedComponent> = report
        .components
        .iter()
        .filter(|d| verbose || d.explicit)
        .collect();
    if !listed.is_empty() {
        let heading = if verbose { "All components:" } else { "Direct dependencies:" };
        println!(" {} {}\n", "[COMPONENTS]".cyan().bold(), heading);
        println!("{}", component_table(&listed, verbose));
        println!();
    }

    if summary.skipped > 0 {
        println!(
            " {} {} entries could not be parsed or resolved",
            "[SKIPPED]".yellow().bold(),
            summary.skipped
        );
        if verbose {
            for entry in report.skipped {
                println!("   {} {}", "⚠".yellow(), entry);
            }
        }
        println!();
    }

    Ok(())
}

fn component_table(components: &[&DetectedComponent], verbose: bool) -> Table {
    let mut header = vec!["Name", "Version", "Ecosystem", "Kind", "License"];
    if verbose {
        header.push("Found in");
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            header
                .into_iter()
                .map(|h| Cell::new(h).add_attribute(Attribute::Bold)),
        );

    for detected in components {
        let (kind, color) = match (detected.explicit, detected.development) {
            (true, Some(true)) => ("direct (dev)", Color::Yellow),
            (true, _) => ("direct", Color::Green),
            (false, Some(true)) => ("transitive (dev)", Color::DarkYellow),
            (false, _) => ("transitive", Color::Cyan),
        };
        let license = match detected.license.as_deref() {
            Some(license) => Cell::new(license),
            None => Cell::new("unknown").fg(Color::DarkGrey),
        };

        let mut row = vec![
            Cell::new(detected.component.name()),
            Cell::new(detected.component.version()),
            Cell::new(detected.component.ecosystem().to_string()),
            Cell::new(kind).fg(color).set_alignment(CellAlignment::Center),
            license,
        ];
        if verbose {
            row.push(Cell::new(detected.locations.join("\n")));
        }
        table.add_row(row);
    }

    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Component;

    fn detected(component: Component, explicit: bool, development: Option<bool>) -> DetectedComponent {
        DetectedComponent {
            id: component.id(),
            component,
            explicit,
            development,
            parent_ids: vec![],
            locations: vec!["requirements.txt".to_string()],
            license: None,
        }
    }

    #[test]
    fn test_summary_counts() {
        let components = vec![
            detected(Component::pip("requests", "2.31.0").unwrap(), true, Some(false)),
            detected(Component::pip("pytest", "8.0.0").unwrap(), true, Some(true)),
            detected(Component::npm("left-pad", "1.3.0").unwrap(), false, None),
        ];
        let skipped = vec!["flask>=2".to_string()];
        let report = Report {
            components: &components,
            skipped: &skipped,
            roots: &[],
        };

        let summary = Summary::new(&report);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.explicit, 2);
        assert_eq!(summary.development, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.ecosystems(), "Pip (2), Npm (1)");
    }

    #[test]
    fn test_table_lists_locations_when_verbose() {
        let component = detected(Component::pip("requests", "2.31.0").unwrap(), true, None);
        let table = component_table(&[&component], true).to_string();
        assert!(table.contains("requests"));
        assert!(table.contains("requirements.txt"));
        assert!(table.contains("direct"));
    }
}

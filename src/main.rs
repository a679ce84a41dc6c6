use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use component_scan::analyzer::{self, Analyzer, Language};
use component_scan::cli::{Cli, ReportFormat};
use component_scan::config::{load_config, Config};
use component_scan::detector::discover;
use component_scan::models::DetectedComponent;
use component_scan::registry;
use component_scan::report::{self, Report};
use component_scan::scan::Scanner;

const LOG_ENV: &str = "COMPONENT_SCAN_LOG";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Resolve project path
    let path = cli
        .path
        .canonicalize()
        .unwrap_or_else(|_| cli.path.clone());

    let config = load_config(&path, cli.config.as_deref())?;
    init_tracing(&cli, &config);

    let excluded: Vec<Language> = cli
        .exclude_lang
        .iter()
        .chain(&config.scan.exclude)
        .copied()
        .collect();
    let analyzers: Vec<_> = analyzer::all(&config.scan.ignore_packages)
        .into_iter()
        .filter(|a| !excluded.contains(&a.language()))
        .collect();

    let client = if cli.online {
        Some(registry::client(config.registry.timeout())?)
    } else {
        None
    };

    let scanner = Scanner::new(analyzers, client.clone());
    let manifests = discover(&path, scanner.analyzers());

    if manifests.is_empty() && cli.container_scan.is_empty() {
        eprintln!(
            "No supported project manifests found in {}",
            path.display()
        );
        std::process::exit(1);
    }

    if !cli.quiet {
        for manifest in &manifests {
            let analyzer = &scanner.analyzers()[manifest.detector];
            eprintln!(
                "  {} {} {}",
                "→".cyan(),
                analyzer.language(),
                manifest.path.display()
            );
        }
    }

    let outcome = scanner.scan(&manifests).await;
    if !cli.quiet && !outcome.failed.is_empty() {
        eprintln!(
            "  {} {} of {} files could not be analyzed",
            "⚠".yellow(),
            outcome.failed.len(),
            manifests.len()
        );
    }

    for syft in &cli.container_scan {
        let layers = scanner
            .merge_container_scan(syft)
            .with_context(|| format!("container scan {}", syft.display()))?;
        if !cli.quiet {
            eprintln!(
                "  {} container {} ({} layers)",
                "→".cyan(),
                syft.display(),
                layers
            );
        }
    }

    let aggregator = scanner.into_aggregator();
    let mut components = aggregator.detected_components();
    let skipped = aggregator.skipped_components();
    let roots = aggregator.roots();

    if let Some(client) = &client {
        enrich_online(client, &mut components, config.registry.batch_size, cli.quiet).await?;
    }

    let report = Report {
        components: &components,
        skipped: &skipped,
        roots: &roots,
    };
    match cli.report {
        ReportFormat::Terminal => {
            report::terminal::render(&report, &path, cli.verbose, cli.quiet)?;
        }
        ReportFormat::Json => {
            println!("{}", report::json::render(&report)?);
        }
    }

    Ok(())
}

/// `COMPONENT_SCAN_LOG` wins; otherwise `-v` / `-q`, then the config file.
fn init_tracing(cli: &Cli, config: &Config) {
    let fallback = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        config.logging.level.as_deref().unwrap_or("warn")
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Attach licenses from the package registries, `batch_size` lookups at a
/// time. A failed lookup leaves the component without a license.
async fn enrich_online(
    client: &Client,
    components: &mut [DetectedComponent],
    batch_size: usize,
    quiet: bool,
) -> Result<()> {
    let pb = if !quiet {
        let pb = ProgressBar::new(components.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
                )?
                .progress_chars("#>-"),
        );
        Some(pb)
    } else {
        None
    };

    for batch in components.chunks_mut(batch_size.max(1)) {
        let lookups = batch
            .iter()
            .map(|detected| registry::fetch_license(client, &detected.component));
        let results = join_all(lookups).await;

        for (detected, result) in batch.iter_mut().zip(results) {
            match result {
                Ok(Some(license)) => detected.license = Some(license),
                Ok(None) => debug!(id = %detected.id, "no license published"),
                Err(err) => warn!(id = %detected.id, "license lookup failed: {err:#}"),
            }
            if let Some(pb) = &pb {
                pb.inc(1);
            }
        }
    }

    if let Some(pb) = pb {
        pb.finish_with_message("Done");
    }

    Ok(())
}

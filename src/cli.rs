use std::path::PathBuf;

use clap::Parser;

use crate::analyzer::Language;

#[derive(Parser, Debug)]
#[command(
    name = "component-scan",
    about = "Scan project manifests and container reports into one dependency graph",
    version
)]
pub struct Cli {
    /// Project path to scan
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Resolve unpinned requirements and fetch license data from package registries
    #[arg(long)]
    pub online: bool,

    /// Config file [default: ./.component-scan/config.toml, fallback ~/.config/component-scan/config.toml]
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Report format
    #[arg(long, default_value = "terminal", value_name = "FORMAT")]
    pub report: ReportFormat,

    /// Syft JSON report of a container image to merge (repeatable)
    #[arg(long = "container-scan", value_name = "SYFT_JSON")]
    pub container_scan: Vec<PathBuf>,

    /// Exclude a language family from scanning (repeatable)
    #[arg(long = "exclude-lang", value_name = "LANG")]
    pub exclude_lang: Vec<Language>,

    /// List every component, not just direct dependencies, and log at debug level
    #[arg(short, long)]
    pub verbose: bool,

    /// Only print the summary line
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ReportFormat {
    Terminal,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["component-scan"]).unwrap();
        assert_eq!(cli.path, PathBuf::from("."));
        assert_eq!(cli.report, ReportFormat::Terminal);
        assert!(!cli.online);
        assert!(cli.container_scan.is_empty());
    }

    #[test]
    fn test_repeatable_flags() {
        let cli = Cli::try_parse_from([
            "component-scan",
            "project",
            "--report",
            "json",
            "--exclude-lang",
            "go",
            "--exclude-lang",
            "dotnet",
            "--container-scan",
            "a.json",
            "--container-scan",
            "b.json",
        ])
        .unwrap();
        assert_eq!(cli.report, ReportFormat::Json);
        assert_eq!(cli.exclude_lang, vec![Language::Go, Language::Dotnet]);
        assert_eq!(cli.container_scan.len(), 2);
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["component-scan", "-q", "-v"]).is_err());
    }
}

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::analyzer::Analyzer;

/// A manifest found at the project root, with the analyzer that claims it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestFile {
    pub path: PathBuf,
    /// The pattern that matched, as listed by the analyzer.
    pub pattern: &'static str,
    /// Index of the analyzer in the slice given to [`discover`].
    pub detector: usize,
}

/// Find the files each analyzer understands in `root` itself.
///
/// Subdirectories are never visited. Results are sorted by path, then by
/// analyzer, so scans over the same tree always see the same order.
pub fn discover(root: &Path, analyzers: &[Box<dyn Analyzer>]) -> Vec<ManifestFile> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(err) => {
            debug!(root = %root.display(), error = %err, "cannot list project directory");
            return Vec::new();
        }
    };

    let mut found = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        for (detector, analyzer) in analyzers.iter().enumerate() {
            if let Some(pattern) = analyzer
                .patterns()
                .iter()
                .copied()
                .find(|pattern| matches_pattern(pattern, file_name))
            {
                debug!(path = %path.display(), detector = analyzer.id(), "manifest found");
                found.push(ManifestFile {
                    path: path.clone(),
                    pattern,
                    detector,
                });
            }
        }
    }

    found.sort_by(|a, b| a.path.cmp(&b.path).then(a.detector.cmp(&b.detector)));
    found
}

/// `*suffix` matches by suffix (the suffix alone does not count), anything
/// else by exact file name.
pub fn matches_pattern(pattern: &str, file_name: &str) -> bool {
    match pattern.strip_prefix('*') {
        Some(suffix) => file_name.len() > suffix.len() && file_name.ends_with(suffix),
        None => file_name == pattern,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_pattern() {
        assert!(matches_pattern("Cargo.lock", "Cargo.lock"));
        assert!(!matches_pattern("Cargo.lock", "cargo.lock"));
        assert!(matches_pattern("*.csproj", "App.csproj"));
        assert!(!matches_pattern("*.csproj", ".csproj"));
        assert!(matches_pattern("*.conda-lock.yml", "env.conda-lock.yml"));
        assert!(!matches_pattern("*.conda-lock.yml", "conda-lock.yml"));
    }

    #[test]
    fn test_discover_root_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Cargo.lock"), "").unwrap();
        std::fs::write(dir.path().join("go.mod"), "").unwrap();
        std::fs::write(dir.path().join("App.csproj"), "").unwrap();
        std::fs::write(dir.path().join("README.md"), "").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested").join("package-lock.json"), "{}").unwrap();

        let analyzers = crate::analyzer::all(&[]);
        let found = discover(dir.path(), &analyzers);

        let names: Vec<_> = found
            .iter()
            .map(|m| m.path.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["App.csproj", "Cargo.lock", "go.mod"]);
        assert_eq!(found[0].pattern, "*.csproj");
        assert_eq!(analyzers[found[0].detector].id(), "nuget");
        assert_eq!(analyzers[found[2].detector].id(), "go");
    }

    #[test]
    fn test_missing_root_finds_nothing() {
        let analyzers = crate::analyzer::all(&[]);
        assert!(discover(Path::new("/nonexistent/project"), &analyzers).is_empty());
    }
}

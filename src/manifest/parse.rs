//! Manifest discovery, parsing and import resolution

use crate::error::{ImportError, ManifestError, ManifestResult, Result};
use crate::manifest::import::{DefaultFetcher, ImportFetcher, ImportSource};
use crate::manifest::schema::validate_manifest;
use crate::manifest::types::Manifest;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// File name patterns recognised during discovery
const MANIFEST_PATTERNS: &[&str] = &[
    "*.runbook.yml",
    "*.runbook.yaml",
    "runbook.yml",
    "runbook.yaml",
];

/// Find the manifest by searching the current and parent directories
pub fn find_manifest() -> ManifestResult<PathBuf> {
    find_manifest_from(env::current_dir().map_err(|e| {
        ManifestError::Invalid(format!("Failed to get current directory: {}", e))
    })?)
}

/// Find the manifest starting from a specific directory.
///
/// The nearest directory holding a candidate wins. Several candidates in
/// that directory is an error.
pub fn find_manifest_from(start_dir: PathBuf) -> ManifestResult<PathBuf> {
    let mut current_dir = start_dir;
    let mut searched = Vec::new();

    loop {
        let mut candidates = candidates_in(&current_dir);
        searched.push(current_dir.display().to_string());

        match candidates.len() {
            0 => {}
            1 => return Ok(candidates.remove(0)),
            _ => {
                return Err(ManifestError::Ambiguous(
                    candidates
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect(),
                ))
            }
        }

        match current_dir.parent() {
            Some(parent) => current_dir = parent.to_path_buf(),
            None => return Err(ManifestError::NotDiscovered(searched.join(", "))),
        }
    }
}

fn candidates_in(dir: &Path) -> Vec<PathBuf> {
    let escaped = glob::Pattern::escape(&dir.display().to_string());
    let mut found: Vec<PathBuf> = MANIFEST_PATTERNS
        .iter()
        .filter_map(|pattern| glob::glob(&format!("{}/{}", escaped, pattern)).ok())
        .flat_map(|paths| paths.filter_map(|p| p.ok()))
        .filter(|p| p.is_file())
        .collect();
    found.sort();
    found.dedup();
    found
}

/// Parse and validate a manifest document. `origin` only labels errors.
pub fn parse_manifest(yaml: &str, origin: &Path) -> ManifestResult<Manifest> {
    let manifest: Manifest = serde_yaml::from_str(yaml).map_err(|e| ManifestError::Parse {
        path: origin.to_path_buf(),
        message: e.to_string(),
    })?;

    validate_manifest(&manifest)?;
    Ok(manifest)
}

/// Load a manifest from disk with the default import fetcher
pub fn load_manifest(path: &Path) -> Result<Manifest> {
    ManifestLoader::new()?.load(path)
}

/// Loads manifests and merges their imports
pub struct ManifestLoader {
    fetcher: Box<dyn ImportFetcher>,
}

impl ManifestLoader {
    /// A loader fetching remote imports with a 30 second timeout
    pub fn new() -> Result<Self> {
        let fetcher = DefaultFetcher::new(Duration::from_secs(30))?;
        Ok(Self::with_fetcher(fetcher))
    }

    /// Use a custom fetcher for remote imports
    pub fn with_fetcher(fetcher: impl ImportFetcher + 'static) -> Self {
        ManifestLoader {
            fetcher: Box::new(fetcher),
        }
    }

    /// Load `path` and every manifest it imports, transitively.
    ///
    /// Tasks from imports never replace a task that is already defined.
    pub fn load(&self, path: &Path) -> Result<Manifest> {
        let mut stack = vec![ImportSource::Local(path.to_path_buf()).key()];
        self.load_file(path, &mut stack)
    }

    fn load_file(&self, path: &Path, stack: &mut Vec<String>) -> Result<Manifest> {
        if !path.is_file() {
            return Err(ManifestError::NotFound(path.to_path_buf()).into());
        }

        let contents = fs::read_to_string(path)?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        self.load_document(&contents, path, &base_dir, stack)
    }

    fn load_document(
        &self,
        contents: &str,
        origin: &Path,
        base_dir: &Path,
        stack: &mut Vec<String>,
    ) -> Result<Manifest> {
        let mut manifest = parse_manifest(contents, origin)?;

        for raw in manifest.imports.clone() {
            let source = ImportSource::classify(&raw, base_dir);
            let key = source.key();
            if stack.contains(&key) {
                return Err(ImportError::Cycle(raw).into());
            }

            stack.push(key);
            let imported = self.resolve(&raw, source, base_dir, stack);
            stack.pop();

            let added = manifest.merge_imported(imported?);
            tracing::debug!(import = %raw, tasks = ?added, "merged imported tasks");
        }

        Ok(manifest)
    }

    fn resolve(
        &self,
        raw: &str,
        source: ImportSource,
        base_dir: &Path,
        stack: &mut Vec<String>,
    ) -> Result<Manifest> {
        match source {
            ImportSource::Local(path) => self.load_file(&path, stack),
            ImportSource::Http(url) => {
                let contents = self.fetcher.fetch_http(&url)?;
                // Relative imports of a remote document resolve next to the importer
                self.load_document(&contents, Path::new(&url), base_dir, stack)
            }
            ImportSource::Git { repo, path } => {
                let scratch = TempDir::new().map_err(|e| ImportError::Fetch {
                    source_ref: raw.to_string(),
                    reason: format!("failed to create scratch directory: {}", e),
                })?;
                self.fetcher.clone_repo(&repo, scratch.path())?;

                let file = scratch.path().join(&path);
                if !file.is_file() {
                    return Err(ImportError::FileMissing {
                        source_ref: raw.to_string(),
                        path,
                    }
                    .into());
                }
                self.load_file(&file, stack)
            }
        }
    }
}

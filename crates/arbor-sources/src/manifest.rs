//! Where each import source lives: a local directory or a manifest of URLs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use arbor_storage::{HttpFetcher, ProbeOutcome, SourceCache};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::{check_contract, SourceError, SourceKind};

/// YAML manifest mapping source kinds to URLs.
///
/// ```yaml
/// sources:
///   localities: https://data.example.org/json/localities.json
///   biodiversity: https://data.example.org/csv/biodiversity.csv
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceManifest {
    #[serde(default)]
    pub sources: BTreeMap<SourceKind, String>,
}

impl SourceManifest {
    pub fn load(path: &Path) -> Result<Self, SourceError> {
        let text = std::fs::read_to_string(path).map_err(|source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&text).map_err(|source| SourceError::Manifest {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    Local(PathBuf),
    Remote(String),
}

impl SourceLocation {
    pub fn describe(&self) -> String {
        match self {
            SourceLocation::Local(path) => path.display().to_string(),
            SourceLocation::Remote(url) => url.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SourceSet {
    locations: BTreeMap<SourceKind, SourceLocation>,
}

impl SourceSet {
    pub fn local(dir: &Path) -> Self {
        let locations = SourceKind::ALL
            .into_iter()
            .map(|kind| (kind, SourceLocation::Local(kind.local_path(dir))))
            .collect();
        Self { locations }
    }

    pub fn remote(manifest: &SourceManifest) -> Self {
        let locations = manifest
            .sources
            .iter()
            .map(|(kind, url)| (*kind, SourceLocation::Remote(url.trim().to_string())))
            .collect();
        Self { locations }
    }

    pub fn location(&self, kind: SourceKind) -> Option<&SourceLocation> {
        self.locations.get(&kind)
    }

    /// Every source that cannot be reached, checked without stopping at the first.
    pub async fn unavailable(&self, fetcher: &HttpFetcher, run_id: Uuid) -> Vec<String> {
        let mut missing = Vec::new();
        for kind in SourceKind::ALL {
            match self.locations.get(&kind) {
                None => missing.push(format!("{} (no URL in source manifest)", kind.file_name())),
                Some(SourceLocation::Local(path)) => {
                    let is_file = tokio::fs::metadata(path)
                        .await
                        .map(|meta| meta.is_file())
                        .unwrap_or(false);
                    if !is_file {
                        missing.push(path.display().to_string());
                    }
                }
                Some(SourceLocation::Remote(url)) => {
                    if let ProbeOutcome::Unreachable { reason } =
                        fetcher.probe(run_id, kind.name(), url).await
                    {
                        missing.push(format!("{url} ({reason})"));
                    }
                }
            }
        }
        missing
    }

    /// Local paths for every source, downloading remote ones into `cache`.
    pub async fn materialize(
        &self,
        cache: &SourceCache,
        fetcher: &HttpFetcher,
        run_id: Uuid,
    ) -> Result<SourcePaths, SourceError> {
        let mut paths = Vec::with_capacity(SourceKind::ALL.len());
        for kind in SourceKind::ALL {
            let path = match self.locations.get(&kind) {
                Some(SourceLocation::Local(path)) => path.clone(),
                Some(SourceLocation::Remote(url)) => {
                    let cached = cache
                        .download(fetcher, run_id, kind.name(), kind.extension(), url)
                        .await
                        .map_err(|err| SourceError::Download {
                            kind,
                            reason: format!("{err:#}"),
                        })?;
                    info!(
                        source = kind.name(),
                        bytes = cached.byte_size,
                        reused = cached.reused,
                        "remote source ready"
                    );
                    cached.path
                }
                None => {
                    return Err(SourceError::Download {
                        kind,
                        reason: "no URL in source manifest".to_string(),
                    })
                }
            };
            paths.push(path);
        }
        Ok(SourcePaths { paths })
    }
}

/// A readable local file for every source kind.
#[derive(Debug, Clone)]
pub struct SourcePaths {
    paths: Vec<PathBuf>,
}

impl SourcePaths {
    pub fn path(&self, kind: SourceKind) -> &Path {
        &self.paths[kind as usize]
    }

    /// Shape problems across all sources, aggregated.
    pub fn contract_problems(&self) -> Result<Vec<String>, SourceError> {
        let mut problems = Vec::new();
        for kind in SourceKind::ALL {
            problems.extend(check_contract(kind, self.path(kind))?);
        }
        Ok(problems)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_storage::{BackoffPolicy, HttpClientConfig};
    use std::time::Duration;
    use tempfile::tempdir;

    fn offline_fetcher() -> HttpFetcher {
        HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_millis(200),
            user_agent: None,
            backoff: BackoffPolicy {
                max_retries: 0,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
            },
        })
        .expect("client")
    }

    #[test]
    fn manifest_maps_kinds_to_urls() {
        let manifest: SourceManifest = serde_yaml::from_str(
            "sources:\n  sites: https://example.org/sites.csv\n  hoods: https://example.org/hoods.json\n",
        )
        .expect("yaml");
        let set = SourceSet::remote(&manifest);
        assert_eq!(
            set.location(SourceKind::Sites),
            Some(&SourceLocation::Remote("https://example.org/sites.csv".to_string()))
        );
        assert!(set.location(SourceKind::Climate).is_none());
    }

    #[tokio::test]
    async fn every_missing_local_file_is_listed() {
        let dir = tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("csv")).expect("mkdir");
        std::fs::write(dir.path().join("csv").join("sites.csv"), "id\n").expect("write");

        let missing = SourceSet::local(dir.path())
            .unavailable(&offline_fetcher(), Uuid::new_v4())
            .await;
        assert_eq!(missing.len(), SourceKind::ALL.len() - 1);
        assert!(missing.iter().any(|m| m.ends_with("localities.json")));
        assert!(!missing.iter().any(|m| m.ends_with("sites.csv")));
    }

    #[tokio::test]
    async fn manifest_gaps_count_as_unavailable() {
        let set = SourceSet::remote(&SourceManifest::default());
        let missing = set.unavailable(&offline_fetcher(), Uuid::new_v4()).await;
        assert_eq!(missing.len(), SourceKind::ALL.len());
        assert_eq!(missing[0], "localities.json (no URL in source manifest)");
    }
}

//! Vendored SDK discovery
//!
//! Walks from a starting directory up to the filesystem root looking for
//! `<dir>/node_modules/aws-sdk`, then tries each entry of an auxiliary
//! search path. The first candidate that exists wins.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

pub const DEFAULT_ROOT_DIR_NAME: &str = "node_modules";
pub const DEFAULT_DEPENDENCY: &str = "aws-sdk";

/// Locates a named dependency directory
#[derive(Debug, Clone)]
pub struct SdkLocator {
    root_dir_name: String,
    dependency: String,
}

impl Default for SdkLocator {
    fn default() -> Self {
        Self::new(DEFAULT_ROOT_DIR_NAME, DEFAULT_DEPENDENCY)
    }
}

impl SdkLocator {
    pub fn new(root_dir_name: impl Into<String>, dependency: impl Into<String>) -> Self {
        Self {
            root_dir_name: root_dir_name.into(),
            dependency: dependency.into(),
        }
    }

    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    /// Candidate paths in probe order
    pub fn candidates(&self, basedir: &Path, search_path: Option<&OsStr>) -> Vec<PathBuf> {
        let basedir = absolutize(basedir);

        let mut candidates: Vec<PathBuf> = basedir
            .ancestors()
            .map(|dir| dir.join(&self.root_dir_name).join(&self.dependency))
            .collect();

        if let Some(search_path) = search_path {
            candidates.extend(
                std::env::split_paths(search_path)
                    .filter(|entry| !entry.as_os_str().is_empty())
                    .map(|entry| entry.join(&self.dependency)),
            );
        }

        candidates
    }

    /// Probe candidates in order and return the first that exists.
    ///
    /// Probing stops at the first hit. An I/O error on a candidate only rules
    /// out that candidate.
    pub async fn locate(&self, basedir: &Path, search_path: Option<&OsStr>) -> Option<PathBuf> {
        for candidate in self.candidates(basedir, search_path) {
            match tokio::fs::try_exists(&candidate).await {
                Ok(true) => {
                    debug!(path = %candidate.display(), dependency = %self.dependency, "Found dependency");
                    return Some(candidate);
                }
                Ok(false) => trace!(path = %candidate.display(), "Candidate does not exist"),
                Err(e) => trace!(path = %candidate.display(), error = %e, "Candidate not accessible"),
            }
        }

        debug!(basedir = %basedir.display(), dependency = %self.dependency, "Dependency not found");
        None
    }
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;

    #[test]
    fn test_candidates_ascend_to_root() {
        let locator = SdkLocator::default();
        let candidates = locator.candidates(Path::new("/a/b"), None);

        assert_eq!(
            candidates,
            vec![
                PathBuf::from("/a/b/node_modules/aws-sdk"),
                PathBuf::from("/a/node_modules/aws-sdk"),
                PathBuf::from("/node_modules/aws-sdk"),
            ]
        );
    }

    #[test]
    fn test_candidates_append_search_path_in_order() {
        let locator = SdkLocator::default();
        let search_path = OsString::from("/opt/one::/opt/two");
        let candidates = locator.candidates(Path::new("/x"), Some(&search_path));

        assert_eq!(
            candidates,
            vec![
                PathBuf::from("/x/node_modules/aws-sdk"),
                PathBuf::from("/node_modules/aws-sdk"),
                PathBuf::from("/opt/one/aws-sdk"),
                PathBuf::from("/opt/two/aws-sdk"),
            ]
        );
    }

    #[test]
    fn test_relative_basedir_is_absolutized() {
        let locator = SdkLocator::default();
        let candidates = locator.candidates(Path::new("relative/dir"), None);

        assert!(candidates.iter().all(|c| c.is_absolute()));
        assert!(candidates[0].ends_with("relative/dir/node_modules/aws-sdk"));
    }

    #[tokio::test]
    async fn test_locate_in_grandparent() {
        let root = tempfile::tempdir().unwrap();
        let sdk = root.path().join("node_modules").join("aws-sdk");
        std::fs::create_dir_all(&sdk).unwrap();

        let child = root.path().join("parent").join("child");
        std::fs::create_dir_all(&child).unwrap();

        let found = SdkLocator::default().locate(&child, None).await;
        assert_eq!(found, Some(sdk));
    }

    #[tokio::test]
    async fn test_nearest_candidate_wins() {
        let root = tempfile::tempdir().unwrap();
        let outer = root.path().join("node_modules").join("aws-sdk");
        let inner = root.path().join("app").join("node_modules").join("aws-sdk");
        std::fs::create_dir_all(&outer).unwrap();
        std::fs::create_dir_all(&inner).unwrap();

        let found = SdkLocator::default()
            .locate(&root.path().join("app"), None)
            .await;
        assert_eq!(found, Some(inner));
    }

    #[tokio::test]
    async fn test_locate_from_search_path() {
        let root = tempfile::tempdir().unwrap();
        let extra = root.path().join("extra");
        std::fs::create_dir_all(extra.join("my-sdk")).unwrap();
        let app = root.path().join("app");
        std::fs::create_dir_all(&app).unwrap();

        let locator = SdkLocator::new("vendor", "my-sdk");
        let search_path = std::env::join_paths([root.path().join("missing"), extra.clone()]).unwrap();

        let found = locator.locate(&app, Some(&search_path)).await;
        assert_eq!(found, Some(extra.join("my-sdk")));
    }

    #[tokio::test]
    async fn test_not_found_is_none() {
        let root = tempfile::tempdir().unwrap();
        let locator = SdkLocator::new("vendor", "lambdaspawn-test-sdk-that-does-not-exist");
        let search_path = OsString::from(root.path().join("nowhere"));

        let found = locator.locate(root.path(), Some(&search_path)).await;
        assert_eq!(found, None);
    }
}

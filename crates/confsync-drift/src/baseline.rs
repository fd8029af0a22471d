//! Baseline loading and caching
//!
//! The baseline tree lives at `{baseline_root}/{plugin}/{relative file}`.
//! Only structured formats are loaded; anything else in the tree is
//! ignored. Parsed baselines are cached with a TTL so every scan does not
//! re-read the directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use confsync_model::{ConfigTree, FileFormat};
use moka::future::Cache;
use tokio::fs;
use tracing::{debug, warn};

use crate::error::DriftError;

/// One parsed baseline file
#[derive(Debug, Clone, PartialEq)]
pub struct BaselineFile {
    pub plugin: String,
    /// Path below the plugin directory, `/`-separated
    pub file: String,
    pub format: FileFormat,
    pub tree: ConfigTree,
}

impl BaselineFile {
    #[must_use]
    pub fn new(plugin: impl Into<String>, file: impl Into<String>, tree: ConfigTree) -> Self {
        let file = file.into();
        Self {
            plugin: plugin.into(),
            format: FileFormat::from_path(&file),
            file,
            tree,
        }
    }

    /// Where the counterpart lives inside an instance directory
    #[must_use]
    pub fn instance_path(&self) -> String {
        format!("plugins/{}/{}", self.plugin, self.file)
    }
}

/// All baseline files, ordered by `(plugin, file)`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Baseline {
    files: Vec<BaselineFile>,
}

impl Baseline {
    #[must_use]
    pub fn from_files(mut files: Vec<BaselineFile>) -> Self {
        files.sort_by(|a, b| (&a.plugin, &a.file).cmp(&(&b.plugin, &b.file)));
        Self { files }
    }

    #[inline]
    #[must_use]
    pub fn files(&self) -> &[BaselineFile] {
        &self.files
    }

    #[must_use]
    pub fn plugins(&self) -> Vec<&str> {
        let mut plugins: Vec<&str> = self.files.iter().map(|f| f.plugin.as_str()).collect();
        plugins.dedup();
        plugins
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Reads a baseline directory
#[derive(Debug, Clone)]
pub struct BaselineLoader {
    root: PathBuf,
}

impl BaselineLoader {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Walk and parse the baseline tree
    ///
    /// Files that fail to parse are skipped with a warning.
    ///
    /// # Errors
    /// `DriftError::Baseline` when a directory cannot be listed
    pub async fn load(&self) -> Result<Baseline, DriftError> {
        let mut files = Vec::new();
        let mut plugins = read_dir_sorted(&self.root).await?;
        plugins.retain(|p| p.is_dir());

        for plugin_dir in plugins {
            let Some(plugin) = file_name(&plugin_dir) else {
                continue;
            };
            let mut stack = vec![plugin_dir.clone()];
            while let Some(dir) = stack.pop() {
                for path in read_dir_sorted(&dir).await? {
                    if path.is_dir() {
                        stack.push(path);
                        continue;
                    }
                    let Some(rel) = relative(&plugin_dir, &path) else {
                        continue;
                    };
                    let format = FileFormat::from_path(&path);
                    if !format.is_structured() {
                        continue;
                    }
                    match parse_file(&path, format).await {
                        Ok(tree) => files.push(BaselineFile::new(plugin.clone(), rel, tree)),
                        Err(reason) => {
                            warn!(path = %path.display(), reason = %reason, "Skipping unparsable baseline file");
                        }
                    }
                }
            }
        }

        debug!(root = %self.root.display(), files = files.len(), "Baseline loaded");
        Ok(Baseline::from_files(files))
    }
}

async fn read_dir_sorted(dir: &Path) -> Result<Vec<PathBuf>, DriftError> {
    let err = |source| DriftError::Baseline {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = fs::read_dir(dir).await.map_err(err)?;
    let mut out = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(err)? {
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if !hidden {
            out.push(entry.path());
        }
    }
    out.sort();
    Ok(out)
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

fn relative(base: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(base).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

async fn parse_file(path: &Path, format: FileFormat) -> Result<ConfigTree, String> {
    let bytes = fs::read(path).await.map_err(|e| e.to_string())?;
    let text = String::from_utf8(bytes).map_err(|_| "not valid UTF-8".to_string())?;
    format.parse(&text).map_err(|e| e.to_string())
}

/// TTL cache of parsed baselines keyed by root directory
#[derive(Debug, Clone)]
pub struct BaselineCache {
    inner: Cache<PathBuf, Arc<Baseline>>,
}

impl BaselineCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Cache::builder().max_capacity(16).time_to_live(ttl).build(),
        }
    }

    /// Cached baseline for the loader's root, loading it on a miss
    ///
    /// # Errors
    /// Whatever [`BaselineLoader::load`] returns; failures are not cached
    pub async fn get_or_load(&self, loader: &BaselineLoader) -> Result<Arc<Baseline>, DriftError> {
        let key = loader.root().to_path_buf();
        if let Some(cached) = self.inner.get(&key).await {
            return Ok(cached);
        }
        let baseline = Arc::new(loader.load().await?);
        self.inner.insert(key, Arc::clone(&baseline)).await;
        Ok(baseline)
    }

    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confsync_test_utils::NodeFixture;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn loads_structured_files_per_plugin() {
        let node = NodeFixture::new()
            .with_baseline("Essentials", "config.yml", "x: 1\n")
            .with_baseline("Essentials", "kits/starter.json", "{\"items\": 3}")
            .with_baseline("Essentials", "README.txt", "ignored")
            .with_baseline("Shop", "broken.yml", "a: [1\n");

        let baseline = BaselineLoader::new(node.baseline_root()).load().await.unwrap();
        let names: Vec<(String, String)> = baseline
            .files()
            .iter()
            .map(|f| (f.plugin.clone(), f.file.clone()))
            .collect();
        assert_eq!(
            names,
            vec![
                ("Essentials".to_string(), "config.yml".to_string()),
                ("Essentials".to_string(), "kits/starter.json".to_string()),
            ]
        );
        assert_eq!(baseline.files()[1].instance_path(), "plugins/Essentials/kits/starter.json");
        assert_eq!(baseline.plugins(), vec!["Essentials"]);
    }

    #[tokio::test]
    async fn missing_root_is_an_error() {
        let loader = BaselineLoader::new("/nonexistent/confsync/baseline");
        assert!(matches!(loader.load().await, Err(DriftError::Baseline { .. })));
    }

    #[tokio::test]
    async fn cache_serves_until_invalidated() {
        let node = NodeFixture::new().with_baseline("Essentials", "config.yml", "x: 1\n");
        let loader = BaselineLoader::new(node.baseline_root());
        let cache = BaselineCache::new(Duration::from_secs(60));

        let first = cache.get_or_load(&loader).await.unwrap();
        std::fs::write(node.baseline_root().join("Essentials/config.yml"), "x: 2\n").unwrap();
        let second = cache.get_or_load(&loader).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        cache.invalidate_all();
        let third = cache.get_or_load(&loader).await.unwrap();
        assert_eq!(
            third.files()[0].tree.get(&"x".parse().unwrap()),
            Some(&ConfigTree::int(2))
        );
    }
}

//! State of one source unit while it is preprocessed and compiled.

use ahash::AHashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::config::BuildConfig;
use crate::diagnostics::{Diagnostics, Phase};
use crate::indexer::{ConvertProgress, Indexer, LogProgress, StagingArea};

pub struct Unit {
    name: String,
    path: PathBuf,
    dir: PathBuf,
    config: Arc<BuildConfig>,
    pub(crate) staging: Arc<StagingArea>,
    pub(crate) progress: Arc<dyn ConvertProgress>,
    pub diag: Diagnostics,
    pub indexer: Indexer,
    /// Extensions the compiled text dispatched to.
    required: AHashSet<String>,
    /// Heading level open at the point the preprocessor has reached.
    pub(crate) heading_level: usize,
}

impl std::fmt::Debug for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unit")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("indexer", &self.indexer)
            .field("required", &self.required)
            .finish()
    }
}

impl Unit {
    pub fn new(path: impl Into<PathBuf>, config: Arc<BuildConfig>, staging: Arc<StagingArea>) -> Self {
        let path = path.into();
        let name = unit_name(&path);
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let dir = std::path::absolute(&dir).unwrap_or(dir);
        Self {
            indexer: Indexer::new(name.clone()),
            diag: Diagnostics::for_file(Phase::Init, path.clone()),
            name,
            path,
            dir,
            config,
            staging,
            progress: Arc::new(LogProgress),
            required: AHashSet::new(),
            heading_level: 0,
        }
    }

    /// A unit with its own copy of `config` and a staging area at the
    /// configured directory.
    pub fn for_source(path: impl Into<PathBuf>, config: &BuildConfig) -> Self {
        let staging = Arc::new(StagingArea::new(config.staging_dir.clone()));
        Self::new(path, Arc::new(config.clone()), staging)
    }

    pub fn with_progress(mut self, progress: Arc<dyn ConvertProgress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Absolute directory that relative paths in this unit resolve against.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `path` relative to [`Unit::dir`], absolute and with `.` and `..`
    /// folded away. The file does not have to exist.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        normalize(&self.dir.join(path))
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    pub fn progress(&self) -> &dyn ConvertProgress {
        self.progress.as_ref()
    }

    pub fn requires(&self, extension: &str) -> bool {
        self.required.contains(extension)
    }

    /// Names of the extensions this unit needed, sorted.
    pub fn required_extensions(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.required.iter().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub(crate) fn require(&mut self, extension: &str) {
        if !self.required.contains(extension) {
            self.required.insert(extension.to_string());
        }
    }
}

/// Unit name: the file name without its extension.
pub fn unit_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_and_dir() {
        let unit = Unit::for_source("shaders/water.pspl", &BuildConfig::default());
        assert_eq!(unit.name(), "water");
        assert!(unit.dir().is_absolute());
        assert!(unit.dir().ends_with("shaders"));
        assert_eq!(unit.indexer.unit_name(), "water");

        let bare = Unit::for_source("main.pspl", &BuildConfig::default());
        assert_eq!(bare.dir(), std::env::current_dir().unwrap().join("."));
    }

    #[test]
    fn test_resolve_is_lexical() {
        let unit = Unit::for_source("shaders/water.pspl", &BuildConfig::default());
        let resolved = unit.resolve(Path::new("./missing/../textures/grass.png"));
        assert!(resolved.is_absolute());
        assert_eq!(resolved, unit.dir().join("textures").join("grass.png"));
        assert!(!resolved.exists());
    }

    #[test]
    fn test_required_extensions_are_a_set() {
        let mut unit = Unit::for_source("main.pspl", &BuildConfig::default());
        unit.require("Shader");
        unit.require("Embed");
        unit.require("Shader");
        assert!(unit.requires("Embed"));
        assert!(!unit.requires("GX"));
        assert_eq!(unit.required_extensions(), ["Embed", "Shader"]);
    }
}

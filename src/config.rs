//! Build configuration.
//!
//! A [`BuildConfig`] is assembled once by the driver (from the command line
//! and an optional `pspl.json`) and is immutable afterwards.
//!
//! # Example
//!
//! ```rust
//! use pspl::binary::Endianness;
//! use pspl::config::{BuildConfig, BuildMode};
//!
//! let config = BuildConfig::builder()
//!     .input("shaders/main.pspl")
//!     .output("out/shaders.psplp")
//!     .define("HIGH_QUALITY", "")
//!     .endianness(Endianness::Bi)
//!     .build();
//!
//! assert_eq!(config.mode, BuildMode::Package);
//! assert!(config.is_defined("HIGH_QUALITY"));
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::binary::{ByteOrder, Endianness};
use crate::diagnostics::{Phase, Where};
use crate::error::{Error, Result};

/// Default staging directory, relative to the working directory.
pub const DEFAULT_STAGING_DIR: &str = ".pspl-staging";

/// Default number of spaces that make up one indent level.
pub const DEFAULT_TAB_WIDTH: usize = 4;

/// What the driver should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildMode {
    /// Write the preprocessed text of a single source.
    PreprocessOnly,
    /// Write one PSPLC per source.
    CompileOnly,
    /// Write one PSPLP for all inputs.
    #[default]
    Package,
}

/// A target platform named on the command line or in `pspl.json`.
///
/// Written as `NAME`, `NAME:le` or `NAME:be`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformSpec {
    pub name: String,
    /// Byte order the platform's consumer demands, if any.
    #[serde(default)]
    pub byte_order: Option<ByteOrder>,
}

impl FromStr for PlatformSpec {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (name, order) = match s.split_once(':') {
            Some((name, order)) => (name, Some(order)),
            None => (s, None),
        };
        if name.is_empty() {
            return Err(format!("empty platform name in '{s}'"));
        }
        let byte_order = match order {
            None | Some("") | Some("any") => None,
            Some(order) => Some(order.parse::<ByteOrder>()?),
        };
        Ok(PlatformSpec {
            name: name.to_string(),
            byte_order,
        })
    }
}

/// Immutable build configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// `.pspl` sources or compiled `.psplc` units, in package order.
    pub inputs: Vec<PathBuf>,
    /// Output path for the preprocessed text, PSPLC or PSPLP.
    pub output: PathBuf,
    /// Content-addressed staging area for referenced files.
    pub staging_dir: PathBuf,
    /// Named defines visible to preprocessor hooks. Bare defines map to "".
    pub defines: BTreeMap<String, String>,
    /// Target platforms.
    pub platforms: Vec<PlatformSpec>,
    /// Requested output byte order when platforms do not decide it.
    pub endianness: Option<Endianness>,
    pub mode: BuildMode,
    /// Spaces per indent level.
    pub tab_width: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            output: PathBuf::new(),
            staging_dir: PathBuf::from(DEFAULT_STAGING_DIR),
            defines: BTreeMap::new(),
            platforms: Vec::new(),
            endianness: None,
            mode: BuildMode::default(),
            tab_width: DEFAULT_TAB_WIDTH,
        }
    }
}

impl BuildConfig {
    pub fn builder() -> BuildConfigBuilder {
        BuildConfigBuilder::default()
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.defines.contains_key(name)
    }

    pub fn define(&self, name: &str) -> Option<&str> {
        self.defines.get(name).map(String::as_str)
    }
}

/// Defaults read from a `pspl.json` next to the sources.
///
/// Every field is optional; command-line values take precedence.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
    #[serde(default)]
    pub defines: BTreeMap<String, String>,
    #[serde(default)]
    pub platforms: Vec<PlatformSpec>,
    #[serde(default)]
    pub endianness: Option<Endianness>,
    #[serde(default)]
    pub tab_width: Option<usize>,
}

impl ConfigFile {
    pub fn read(path: &Path) -> Result<Self> {
        let at = Where::file(Phase::Init, path);
        let data = std::fs::read_to_string(path)
            .map_err(|e| Error::io(at.clone(), "failed to read config", path, e))?;
        serde_json::from_str(&data).map_err(|e| Error::config(at, format!("invalid config file: {e}")))
    }
}

#[derive(Debug, Default)]
pub struct BuildConfigBuilder {
    config: BuildConfig,
}

impl BuildConfigBuilder {
    pub fn input(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.inputs.push(path.into());
        self
    }

    pub fn inputs(mut self, paths: Vec<PathBuf>) -> Self {
        self.config.inputs = paths;
        self
    }

    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.output = path.into();
        self
    }

    pub fn staging_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.staging_dir = path.into();
        self
    }

    pub fn define(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.defines.insert(name.into(), value.into());
        self
    }

    pub fn platform(mut self, platform: PlatformSpec) -> Self {
        // a later spec for the same name replaces the earlier one
        self.config.platforms.retain(|p| p.name != platform.name);
        self.config.platforms.push(platform);
        self
    }

    pub fn endianness(mut self, value: Endianness) -> Self {
        self.config.endianness = Some(value);
        self
    }

    pub fn mode(mut self, mode: BuildMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn tab_width(mut self, width: usize) -> Self {
        self.config.tab_width = width.max(1);
        self
    }

    /// Apply defaults from a config file. Call before the command-line
    /// setters so they win.
    pub fn config_file(mut self, file: ConfigFile) -> Self {
        if let Some(dir) = file.staging_dir {
            self.config.staging_dir = dir;
        }
        self.config.defines.extend(file.defines);
        for platform in file.platforms {
            self = self.platform(platform);
        }
        if let Some(endianness) = file.endianness {
            self.config.endianness = Some(endianness);
        }
        if let Some(width) = file.tab_width {
            self = self.tab_width(width);
        }
        self
    }

    pub fn build(self) -> BuildConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BuildConfig::default();
        assert_eq!(config.mode, BuildMode::Package);
        assert_eq!(config.tab_width, DEFAULT_TAB_WIDTH);
        assert_eq!(config.staging_dir, PathBuf::from(DEFAULT_STAGING_DIR));
        assert!(config.endianness.is_none());
    }

    #[test]
    fn test_platform_spec_parse() {
        let spec: PlatformSpec = "GX:be".parse().unwrap();
        assert_eq!(spec.name, "GX");
        assert_eq!(spec.byte_order, Some(ByteOrder::Big));

        let spec: PlatformSpec = "GL2".parse().unwrap();
        assert_eq!(spec.byte_order, None);

        assert!(":le".parse::<PlatformSpec>().is_err());
        assert!("D3D11:middle".parse::<PlatformSpec>().is_err());
    }

    #[test]
    fn test_config_file_then_overrides() {
        let file: ConfigFile = serde_json::from_str(
            r#"{
                "stagingDir": "cache",
                "defines": { "A": "1" },
                "platforms": [ { "name": "GX", "byteOrder": "big" } ],
                "endianness": "little",
                "tabWidth": 2
            }"#,
        )
        .unwrap();

        let config = BuildConfig::builder()
            .config_file(file)
            .define("B", "")
            .endianness(Endianness::Bi)
            .build();

        assert_eq!(config.staging_dir, PathBuf::from("cache"));
        assert_eq!(config.define("A"), Some("1"));
        assert!(config.is_defined("B"));
        assert_eq!(config.platforms.len(), 1);
        assert_eq!(config.endianness, Some(Endianness::Bi));
        assert_eq!(config.tab_width, 2);
    }

    #[test]
    fn test_config_file_rejects_unknown_fields() {
        assert!(serde_json::from_str::<ConfigFile>(r#"{ "bogus": true }"#).is_err());
    }

    #[test]
    fn test_config_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<BuildConfig>();
    }
}

//! Build driver.
//!
//! Runs every input through the pipeline and writes what the configured
//! [`BuildMode`] asks for:
//!
//! ```text
//! source ──▶ init ──▶ preprocess ──▶ compile ──▶ finish ──▶ Indexer
//!                         │                                   │
//!              preprocess-only: text        compile-only: PSPLC per source
//!                                           package: PSPLP of all units
//! ```
//!
//! Package inputs may mix `.pspl` sources with compiled PSPLC units; the two
//! are told apart by the container magic.

use serde::Serialize;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::binary::{FIXED_HEADER_LEN, compiled};
use crate::config::{BuildConfig, BuildMode};
use crate::diagnostics::{Phase, Warning, Where};
use crate::error::{Error, Result};
use crate::extension::embed::Embed;
use crate::extension::platform::TargetPlatform;
use crate::extension::{ExtensionRegistry, RegistryBuilder};
use crate::indexer::{ConvertProgress, Indexer, LogProgress, StagingArea};
use crate::package::{Packager, resolve_endianness, write_output};
use crate::preprocess::{Preprocessed, preprocess};
use crate::unit::Unit;

/// Registry builder holding the built-in `Embed` extension and one
/// [`TargetPlatform`] per configured platform. Callers may register more
/// extensions before building it.
pub fn default_registry(config: &BuildConfig) -> RegistryBuilder {
    config
        .platforms
        .iter()
        .fold(ExtensionRegistry::builder().register(Embed::new()), |builder, platform| {
            builder.register(TargetPlatform::from(platform))
        })
}

/// What a finished build produced.
#[derive(Debug, Default, Serialize)]
pub struct BuildReport {
    pub outputs: Vec<PathBuf>,
    /// Units compiled from source.
    pub compiled: usize,
    /// Units read from PSPLC inputs.
    pub loaded: usize,
    pub warnings: Vec<Warning>,
}

pub struct Pipeline {
    config: Arc<BuildConfig>,
    staging: Arc<StagingArea>,
    progress: Arc<dyn ConvertProgress>,
    registry: ExtensionRegistry,
}

impl Pipeline {
    pub fn new(config: BuildConfig, registry: ExtensionRegistry) -> Self {
        let staging = Arc::new(StagingArea::new(config.staging_dir.clone()));
        Self {
            config: Arc::new(config),
            staging,
            progress: Arc::new(LogProgress),
            registry,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ConvertProgress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn registry(&self) -> &ExtensionRegistry {
        &self.registry
    }

    pub fn run(&mut self) -> Result<BuildReport> {
        let at = Where::phase(Phase::Init);
        if self.config.inputs.is_empty() {
            return Err(Error::config(at, "no input files"));
        }
        if self.config.output.as_os_str().is_empty() {
            return Err(Error::config(at, "no output path"));
        }

        let mut report = BuildReport {
            warnings: self.registry.claim_warnings().to_vec(),
            ..Default::default()
        };
        match self.config.mode {
            BuildMode::PreprocessOnly => self.preprocess_only(&mut report)?,
            BuildMode::CompileOnly => self.compile_only(&mut report)?,
            BuildMode::Package => self.package(&mut report)?,
        }
        Ok(report)
    }

    fn unit(&self, path: &Path) -> Unit {
        Unit::new(path, self.config.clone(), self.staging.clone()).with_progress(self.progress.clone())
    }

    /// Preprocess and compile one source into its index.
    pub fn compile_source(&mut self, path: &Path) -> Result<Unit> {
        let mut unit = self.unit(path);
        log::debug!("compiling {}", path.display());
        let registry = &mut self.registry;
        let result = registry
            .begin_unit(&mut unit)
            .and_then(|_| preprocess(registry, &mut unit))
            .and_then(|pre| crate::compiler::compile(registry, &mut unit, &pre));
        // finish runs even when the unit failed
        let finished = registry.finish_unit(&mut unit);
        result?;
        finished?;
        Ok(unit)
    }

    fn preprocess_source(&mut self, path: &Path) -> Result<(Preprocessed, Unit)> {
        let mut unit = self.unit(path);
        let registry = &mut self.registry;
        let result = registry
            .begin_unit(&mut unit)
            .and_then(|_| preprocess(registry, &mut unit));
        let finished = registry.finish_unit(&mut unit);
        let preprocessed = result?;
        finished?;
        Ok((preprocessed, unit))
    }

    fn preprocess_only(&mut self, report: &mut BuildReport) -> Result<()> {
        let [input] = self.config.inputs.as_slice() else {
            return Err(Error::config(
                Where::phase(Phase::Init),
                format!(
                    "preprocessing takes exactly one input, got {}",
                    self.config.inputs.len()
                ),
            ));
        };
        let input = input.clone();
        let (preprocessed, mut unit) = self.preprocess_source(&input)?;
        let output = self.config.output.clone();
        write_output(&output, preprocessed.text.as_bytes(), &Where::file(Phase::Preprocess, &output))?;
        log::info!("preprocessed {} into {}", input.display(), output.display());
        report.compiled += 1;
        report.warnings.extend(unit.diag.take_warnings());
        report.outputs.push(output);
        Ok(())
    }

    fn compile_only(&mut self, report: &mut BuildReport) -> Result<()> {
        let inputs = self.config.inputs.clone();
        for input in &inputs {
            let mut unit = self.compile_source(input)?;
            let at = Where::file(Phase::Compile, input);
            let endianness = resolve_endianness(
                &self.registry,
                unit.indexer.platforms(),
                unit.indexer.uses_all_platforms(),
                self.config.endianness,
                &at,
            )?;
            let bytes = compiled::encode(&unit.indexer, endianness)?;
            let output = self.compiled_output(&unit);
            write_output(&output, &bytes, &at)?;
            log::info!("compiled {} into {} ({endianness}-endian)", input.display(), output.display());
            report.compiled += 1;
            report.warnings.extend(unit.diag.take_warnings());
            report.outputs.push(output);
        }
        Ok(())
    }

    /// The output itself for a single input, `<output>/<unit>.psplc` otherwise.
    fn compiled_output(&self, unit: &Unit) -> PathBuf {
        if self.config.inputs.len() == 1 {
            self.config.output.clone()
        } else {
            self.config.output.join(format!("{}.psplc", unit.name()))
        }
    }

    fn package(&mut self, report: &mut BuildReport) -> Result<()> {
        let mut packager = Packager::new();
        let inputs = self.config.inputs.clone();
        for input in &inputs {
            let indexer = if is_compiled_file(input)? {
                report.loaded += 1;
                self.load_compiled(input)?
            } else {
                let mut unit = self.compile_source(input)?;
                report.compiled += 1;
                report.warnings.extend(unit.diag.take_warnings());
                unit.indexer
            };
            packager.add_unit(indexer)?;
        }

        let endianness = packager.endianness(&self.registry, self.config.endianness)?;
        let output = self.config.output.clone();
        packager.write(&output, endianness, &self.staging)?;
        report.outputs.push(output);
        Ok(())
    }

    fn load_compiled(&self, path: &Path) -> Result<Indexer> {
        let at = Where::file(Phase::Package, path);
        let bytes = std::fs::read(path).map_err(|e| Error::io(at, "failed to read", path, e))?;
        compiled::decode(&bytes, path, &self.registry)
    }
}

/// Whether `path` holds a compiled unit rather than source text.
fn is_compiled_file(path: &Path) -> Result<bool> {
    let at = Where::file(Phase::Init, path);
    let mut file = File::open(path).map_err(|e| Error::io(at.clone(), "failed to open", path, e))?;
    let mut head = Vec::with_capacity(FIXED_HEADER_LEN);
    file.by_ref()
        .take(FIXED_HEADER_LEN as u64)
        .read_to_end(&mut head)
        .map_err(|e| Error::io(at, "failed to read", path, e))?;
    Ok(compiled::is_compiled(&head))
}

/// Build with the default registry.
pub fn build(config: BuildConfig, progress: Arc<dyn ConvertProgress>) -> Result<BuildReport> {
    let registry = default_registry(&config).build()?;
    Pipeline::new(config, registry).with_progress(progress).run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::{ByteOrder, Endianness};
    use crate::config::PlatformSpec;
    use crate::diagnostics::WarningKind;
    use crate::hash::ObjectHash;
    use crate::indexer::ObjectData;
    use crate::package::PackageContents;
    use std::fs;
    use std::time::{Duration, SystemTime};

    fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, text).unwrap();
        path
    }

    fn config(dir: &Path, inputs: Vec<PathBuf>, output: &str) -> crate::config::BuildConfigBuilder {
        BuildConfig::builder()
            .inputs(inputs)
            .output(dir.join(output))
            .staging_dir(dir.join("stage"))
            .platform("GX:be".parse::<PlatformSpec>().unwrap())
            .platform("GL2".parse::<PlatformSpec>().unwrap())
    }

    fn run(config: BuildConfig) -> Result<BuildReport> {
        build(config, Arc::new(LogProgress))
    }

    #[test]
    fn test_package_two_units_sharing_a_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("grass.png"), b"not really a png").unwrap();
        let a = write(
            dir.path(),
            "a.pspl",
            "Materials\n=========\n# Embed\nFILE(grass.png)\nTEXT(greeting, \"hello, world\")\nU32(7, 0x10, GX)\n",
        );
        let b = write(dir.path(), "b.pspl", "[EMBED_TEXT motd hi]\n# Embed\nFILE(./grass.png, GL2)\n");

        let report = run(config(dir.path(), vec![a, b], "out.psplp").build()).unwrap();
        assert_eq!(report.compiled, 2);
        assert!(report.warnings.is_empty());

        let bytes = fs::read(dir.path().join("out.psplp")).unwrap();
        let contents = PackageContents::decode(&bytes, Path::new("out.psplp")).unwrap();
        // GX demands big endian, GL2 has no demand
        assert_eq!(contents.endianness, Endianness::Big);
        assert_eq!(contents.blobs.len(), 1);
        assert_eq!(contents.blobs[0].data, b"not really a png");
        assert_eq!(contents.extensions, ["Embed"]);

        let a = contents.unit("a").unwrap();
        let greeting = &a.hash_objects[0];
        assert_eq!(greeting.key, ObjectHash::of_str("greeting"));
        assert_eq!(greeting.data, ObjectData::Neutral(b"hello, world".to_vec()));
        assert_eq!(a.integer_objects[0].key, 7);
        assert_eq!(a.integer_objects[0].data.in_order(ByteOrder::Big), Some(&[0, 0, 0, 0x10][..]));
        let gx = contents.platforms.iter().position(|p| p == "GX").unwrap();
        assert_eq!(a.integer_objects[0].platforms, 1 << gx);

        let b = contents.unit("b").unwrap();
        assert_eq!(b.hash_objects[0].key, ObjectHash::of_str("motd"));
        assert_eq!(a.stubs[0].index, b.stubs[0].index);
    }

    #[test]
    fn test_embed_text_inside_open_heading_keeps_it_active() {
        let dir = tempfile::tempdir().unwrap();
        let input = write(
            dir.path(),
            "main.pspl",
            "# Embed\nTEXT(one, 1)\n[EMBED_TEXT two 2]\nTEXT(three, 3)\n",
        );
        let report = run(config(dir.path(), vec![input], "out.psplp").build()).unwrap();
        assert!(report.warnings.is_empty());

        let bytes = fs::read(dir.path().join("out.psplp")).unwrap();
        let contents = PackageContents::decode(&bytes, Path::new("out.psplp")).unwrap();
        let keys: Vec<ObjectHash> = contents.unit("main").unwrap().hash_objects.iter().map(|o| o.key).collect();
        assert_eq!(
            keys,
            [ObjectHash::of_str("one"), ObjectHash::of_str("two"), ObjectHash::of_str("three")]
        );
    }

    #[test]
    fn test_compiled_units_package_like_sources() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "a.pspl", "# Embed\nU32(1, 2)\n");
        let b = write(dir.path(), "b.pspl", "# Embed\nTEXT(k, v)\n");

        let compiled = config(dir.path(), vec![a.clone()], "a.psplc")
            .mode(BuildMode::CompileOnly)
            .endianness(Endianness::Bi)
            .build();
        run(compiled).unwrap();
        assert!(is_compiled_file(&dir.path().join("a.psplc")).unwrap());
        assert!(!is_compiled_file(&a).unwrap());

        let mixed = config(dir.path(), vec![dir.path().join("a.psplc"), b.clone()], "mixed.psplp")
            .endianness(Endianness::Bi)
            .build();
        let report = run(mixed).unwrap();
        assert_eq!((report.loaded, report.compiled), (1, 1));

        let direct = config(dir.path(), vec![a, b], "direct.psplp").endianness(Endianness::Bi).build();
        run(direct).unwrap();
        assert_eq!(
            fs::read(dir.path().join("mixed.psplp")).unwrap(),
            fs::read(dir.path().join("direct.psplp")).unwrap()
        );
    }

    #[test]
    fn test_single_endian_unit_cannot_feed_bi_endian_package() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "a.pspl", "# Embed\nU32(1, 2)\n");
        let base = |inputs: Vec<PathBuf>, output: &str| {
            BuildConfig::builder()
                .inputs(inputs)
                .output(dir.path().join(output))
                .staging_dir(dir.path().join("stage"))
        };
        run(base(vec![a], "a.psplc")
            .mode(BuildMode::CompileOnly)
            .endianness(Endianness::Little)
            .build())
        .unwrap();

        let err = run(base(vec![dir.path().join("a.psplc")], "out.psplp")
            .endianness(Endianness::Bi)
            .build())
        .unwrap_err();
        assert!(matches!(err, Error::Dependency { .. }));
        assert!(!dir.path().join("out.psplp").exists());
    }

    #[test]
    fn test_preprocess_only_writes_text() {
        let dir = tempfile::tempdir().unwrap();
        let input = write(dir.path(), "main.pspl", "[EMBED_TEXT a b] // note\n[UNKNOWN]\nplain\n");
        let report = run(config(dir.path(), vec![input], "main.txt").mode(BuildMode::PreprocessOnly).build()).unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("main.txt")).unwrap(),
            "# Embed\nTEXT(a, b)\n#^\nplain\n"
        );
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_source_error_reports_location_and_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let input = write(dir.path(), "bad.pspl", "# Embed\n\nU32(1, lots)\n");
        let err = run(config(dir.path(), vec![input], "out.psplp").build()).unwrap_err();
        let at = err.location();
        assert_eq!(at.phase, Phase::Compile);
        assert_eq!(at.line, Some(3));
        assert!(err.to_string().contains("'lots'"));
        assert!(!dir.path().join("out.psplp").exists());
    }

    #[test]
    fn test_modified_source_reuses_stale_object_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        let asset = dir.path().join("data.bin");
        fs::write(&asset, b"v1").unwrap();
        let input = write(dir.path(), "main.pspl", "# Embed\nFILE(data.bin)\n");
        let build_config = config(dir.path(), vec![input], "out.psplp").build();

        run(build_config.clone()).unwrap();
        fs::write(&asset, b"v2").unwrap();
        File::options()
            .write(true)
            .open(&asset)
            .unwrap()
            .set_modified(SystemTime::now() + Duration::from_secs(3600))
            .unwrap();

        let report = run(build_config).unwrap();
        assert!(matches!(
            report.warnings.as_slice(),
            [Warning { kind: WarningKind::StaleStagedObject { .. }, .. }]
        ));
        let bytes = fs::read(dir.path().join("out.psplp")).unwrap();
        let contents = PackageContents::decode(&bytes, Path::new("out.psplp")).unwrap();
        assert_eq!(contents.blobs[0].data, b"v1");
    }

    #[test]
    fn test_requested_order_against_platform_demand() {
        let dir = tempfile::tempdir().unwrap();
        let input = write(dir.path(), "main.pspl", "# Embed\nTEXT(k, v, GX)\n");
        let err = run(config(dir.path(), vec![input], "out.psplp")
            .endianness(Endianness::Little)
            .build())
        .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_missing_inputs_and_output() {
        let dir = tempfile::tempdir().unwrap();
        assert!(run(config(dir.path(), vec![], "out.psplp").build()).is_err());
        let input = write(dir.path(), "main.pspl", "");
        let config = BuildConfig::builder().input(input).build();
        assert!(matches!(run(config), Err(Error::Config { .. })));
    }
}

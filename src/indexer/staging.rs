//! Content-addressed staging area for referenced files.
//!
//! ```text
//! <staging>/
//!   objects/<hash>     staged bytes, named by their content hash
//!   records/<key>      "<hash> <length> <converter>" for one source path
//! ```
//!
//! A record remembers what a source path staged to last time. It is reused
//! while its object exists; a source modified after the record was written
//! still reuses it, with a staleness warning raised by the caller. Every
//! write goes to a temporary file in the target directory and is renamed into
//! place, so two writers racing on the same hash leave one intact object.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tempfile::NamedTempFile;

use crate::diagnostics::Where;
use crate::error::{Error, Result};
use crate::hash::ObjectHash;

const OBJECTS_DIR: &str = "objects";
const RECORDS_DIR: &str = "records";
const RAW_CONVERTER: &str = "raw";

/// Progress callbacks handed to file converters.
pub trait ConvertProgress {
    fn status(&self, message: &str);

    /// `fraction` in `0.0..=1.0`.
    fn progress(&self, fraction: f64);
}

/// Reports progress to the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ConvertProgress for LogProgress {
    fn status(&self, message: &str) {
        log::debug!("{message}");
    }

    fn progress(&self, fraction: f64) {
        log::trace!("conversion {:.0}%", fraction * 100.0);
    }
}

/// Turns a source file into the bytes that get staged.
pub trait FileConverter {
    /// Stable name; part of the staging record key.
    fn name(&self) -> &str;

    /// Write the converted form of `source` to `output`. A nonzero status is
    /// reported as a conversion failure.
    fn convert(&self, source: &Path, output: &Path, progress: &dyn ConvertProgress) -> Result<(), i32>;
}

/// A staged object: its content hash and size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagedObject {
    pub hash: ObjectHash,
    pub length: u64,
}

/// Result of [`StagingArea::stage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutcome {
    pub object: StagedObject,
    /// An earlier record was reused instead of converting again.
    pub reused: bool,
    /// The reused record predates the last modification of its source.
    pub stale: bool,
}

#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    /// The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn object_path(&self, hash: &ObjectHash) -> PathBuf {
        self.root.join(OBJECTS_DIR).join(hash.to_hex())
    }

    fn record_path(&self, source: &Path, converter: &str) -> PathBuf {
        let mut hasher = blake3::Hasher::new();
        hasher.update(source.to_string_lossy().as_bytes());
        hasher.update(&[0]);
        hasher.update(converter.as_bytes());
        let key = ObjectHash::from_hasher(&hasher);
        self.root.join(RECORDS_DIR).join(key.to_hex())
    }

    pub fn contains(&self, hash: &ObjectHash) -> bool {
        self.object_path(hash).is_file()
    }

    /// Read a staged object back.
    pub fn read_object(&self, hash: &ObjectHash, at: &Where) -> Result<Vec<u8>> {
        let path = self.object_path(hash);
        fs::read(&path).map_err(|e| Error::io(at.clone(), "staged object is missing", path, e))
    }

    /// Stage `source` (an absolute path), converting it first when a
    /// converter is given. With `move_output` the raw source, or the
    /// converter's output, is moved instead of copied.
    pub fn stage(
        &self,
        source: &Path,
        converter: Option<&dyn FileConverter>,
        move_output: bool,
        progress: &dyn ConvertProgress,
        at: &Where,
    ) -> Result<StageOutcome> {
        let converter_name = converter.map_or(RAW_CONVERTER, |c| c.name());
        let record_path = self.record_path(source, converter_name);

        if let Some(object) = self.read_record(&record_path) {
            let stale = match (modified(source), modified(&record_path)) {
                (Some(source_time), Some(record_time)) => source_time > record_time,
                // a moved source is gone; the record is all there is
                (None, _) if move_output && converter.is_none() => false,
                (None, _) => {
                    let err = io::Error::new(io::ErrorKind::NotFound, "no such file");
                    return Err(Error::io(at.clone(), "failed to read", source, err));
                }
                (Some(_), None) => false,
            };
            log::debug!("reusing staged {} for {}", object.hash, source.display());
            return Ok(StageOutcome {
                object,
                reused: true,
                stale,
            });
        }

        let objects_dir = self.root.join(OBJECTS_DIR);
        create_dir(&objects_dir, at)?;
        let temp = NamedTempFile::new_in(&objects_dir)
            .map_err(|e| Error::io(at.clone(), "failed to create staging file", &objects_dir, e))?;

        match converter {
            Some(converter) => {
                progress.status(&format!("{} {}", converter.name(), source.display()));
                converter
                    .convert(source, temp.path(), progress)
                    .map_err(|code| Error::Conversion {
                        at: at.clone(),
                        converter: converter.name().to_string(),
                        code,
                        path: source.to_path_buf(),
                    })?;
                progress.progress(1.0);
            }
            None => {
                fs::copy(source, temp.path())
                    .map_err(|e| Error::io(at.clone(), "failed to copy", source, e))?;
            }
        }

        let hash = ObjectHash::of_file(temp.path())
            .map_err(|e| Error::io(at.clone(), "failed to hash", temp.path(), e))?;
        let length = fs::metadata(temp.path())
            .map_err(|e| Error::io(at.clone(), "failed to read", temp.path(), e))?
            .len();

        let object_path = self.object_path(&hash);
        if object_path.is_file() {
            log::debug!("{} already staged as {hash}", source.display());
        } else {
            temp.persist(&object_path)
                .map_err(|e| Error::io(at.clone(), "failed to stage", &object_path, e.error))?;
        }

        if move_output && converter.is_none() {
            fs::remove_file(source).map_err(|e| Error::io(at.clone(), "failed to move", source, e))?;
        }

        let object = StagedObject { hash, length };
        self.write_record(&record_path, &object, converter_name, at)?;
        log::debug!("staged {} as {hash} ({length} bytes)", source.display());
        Ok(StageOutcome {
            object,
            reused: false,
            stale: false,
        })
    }

    fn read_record(&self, record_path: &Path) -> Option<StagedObject> {
        let text = fs::read_to_string(record_path).ok()?;
        let mut fields = text.split_whitespace();
        let hash = ObjectHash::from_hex(fields.next()?)?;
        let length = fields.next()?.parse().ok()?;
        if !self.contains(&hash) {
            return None;
        }
        Some(StagedObject { hash, length })
    }

    fn write_record(&self, record_path: &Path, object: &StagedObject, converter: &str, at: &Where) -> Result<()> {
        let dir = self.root.join(RECORDS_DIR);
        create_dir(&dir, at)?;
        let mut temp = NamedTempFile::new_in(&dir)
            .map_err(|e| Error::io(at.clone(), "failed to create staging record", &dir, e))?;
        writeln!(temp, "{} {} {}", object.hash, object.length, converter)
            .map_err(|e| Error::io(at.clone(), "failed to write staging record", temp.path(), e))?;
        temp.persist(record_path)
            .map_err(|e| Error::io(at.clone(), "failed to write staging record", record_path, e.error))?;
        Ok(())
    }
}

fn create_dir(dir: &Path, at: &Where) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| Error::io(at.clone(), "failed to create staging directory", dir, e))
}

fn modified(path: &Path) -> Option<SystemTime> {
    path.metadata().and_then(|m| m.modified()).ok()
}

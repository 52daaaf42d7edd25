//! Per-unit object index.
//!
//! An [`Indexer`] collects everything one compiled unit contributes to a
//! package: keyed data objects and file stubs. Objects are namespaced by the
//! extension that defined them; the index keeps its own extension and
//! platform tables and refers to them by local ordinal, so units can be
//! compiled independently and merged later.
//!
//! - hash objects: a string key hashed to an [`ObjectHash`]
//! - integer objects: a caller-chosen `u32` key
//! - file stubs: a staged file, identified by the hash of its staged bytes
//!
//! - [`staging`] - content-addressed staging area and file converters

pub mod staging;

use ahash::AHashMap;
use std::path::{Path, PathBuf};

use crate::binary::{ByteOrder, Endianness};
use crate::diagnostics::Where;
use crate::error::{Error, Result};
use crate::hash::ObjectHash;

pub use staging::{ConvertProgress, FileConverter, LogProgress, StageOutcome, StagedObject, StagingArea};

/// Platform mask meaning "every platform".
pub const ALL_PLATFORMS: u32 = u32::MAX;

/// Platforms one unit, or one package, may reference. The top mask bit stays
/// clear so an explicit mask never reads as [`ALL_PLATFORMS`].
pub const MAX_PLATFORMS: usize = 31;

/// Platforms an entry applies to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Platforms {
    #[default]
    All,
    Only(Vec<String>),
}

impl Platforms {
    pub fn only<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Platforms::Only(names.into_iter().map(Into::into).collect())
    }

    /// An empty list means every platform.
    pub fn from_names(names: Vec<String>) -> Self {
        if names.is_empty() {
            Platforms::All
        } else {
            Platforms::Only(names)
        }
    }

    pub fn names(&self) -> &[String] {
        match self {
            Platforms::All => &[],
            Platforms::Only(names) => names,
        }
    }
}

/// Payload of a data object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectData {
    /// Same bytes for every byte order.
    Neutral(Vec<u8>),
    /// One copy per byte order. Objects decoded from a single-order unit hold
    /// only that order's copy.
    Sensitive {
        little: Option<Vec<u8>>,
        big: Option<Vec<u8>>,
    },
}

impl ObjectData {
    /// Data in host byte order, plus the byte-swapped copy for
    /// endian-sensitive objects.
    pub fn from_native(native: &[u8], swapped: Option<&[u8]>) -> Self {
        match swapped {
            None => ObjectData::Neutral(native.to_vec()),
            Some(swapped) => {
                let (little, big) = match ByteOrder::native() {
                    ByteOrder::Little => (native, swapped),
                    ByteOrder::Big => (swapped, native),
                };
                ObjectData::Sensitive {
                    little: Some(little.to_vec()),
                    big: Some(big.to_vec()),
                }
            }
        }
    }

    pub fn is_sensitive(&self) -> bool {
        matches!(self, ObjectData::Sensitive { .. })
    }

    pub fn len(&self) -> usize {
        match self {
            ObjectData::Neutral(data) => data.len(),
            ObjectData::Sensitive { little, big } => little.as_ref().or(big.as_ref()).map_or(0, Vec::len),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The copy readers of `order` see, if present.
    pub fn in_order(&self, order: ByteOrder) -> Option<&[u8]> {
        match (self, order) {
            (ObjectData::Neutral(data), _) => Some(data),
            (ObjectData::Sensitive { little, .. }, ByteOrder::Little) => little.as_deref(),
            (ObjectData::Sensitive { big, .. }, ByteOrder::Big) => big.as_deref(),
        }
    }

    /// Whether every copy `endianness` needs is present.
    pub fn covers(&self, endianness: Endianness) -> bool {
        endianness.orders().iter().all(|order| self.in_order(*order).is_some())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashObject {
    pub hash: ObjectHash,
    /// Local extension ordinal.
    pub extension: u32,
    /// Mask over local platform ordinals.
    pub platforms: u32,
    pub data: ObjectData,
    /// Source key, when defined from source text.
    pub key: Option<String>,
    pub defined_at: Where,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegerObject {
    pub key: u32,
    pub extension: u32,
    pub platforms: u32,
    pub data: ObjectData,
    pub defined_at: Where,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStub {
    /// Absolute path of the referenced file.
    pub path: PathBuf,
    pub hash: ObjectHash,
    pub length: u64,
    pub platforms: u32,
}

#[derive(Debug, Default)]
pub struct Indexer {
    unit_name: String,
    extensions: Vec<String>,
    platforms: Vec<String>,
    hash_objects: Vec<HashObject>,
    integer_objects: Vec<IntegerObject>,
    stubs: Vec<FileStub>,
    hash_index: AHashMap<(u32, ObjectHash), usize>,
    integer_index: AHashMap<(u32, u32), usize>,
    stub_index: AHashMap<PathBuf, usize>,
}

impl Indexer {
    pub fn new(unit_name: impl Into<String>) -> Self {
        Self {
            unit_name: unit_name.into(),
            ..Default::default()
        }
    }

    pub fn unit_name(&self) -> &str {
        &self.unit_name
    }

    /// Identity of the unit inside a package.
    pub fn unit_hash(&self) -> ObjectHash {
        ObjectHash::of_str(&self.unit_name)
    }

    /// Extensions that defined something, by local ordinal.
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Platforms referenced by some entry, by local ordinal.
    pub fn platforms(&self) -> &[String] {
        &self.platforms
    }

    pub fn hash_objects(&self) -> &[HashObject] {
        &self.hash_objects
    }

    pub fn integer_objects(&self) -> &[IntegerObject] {
        &self.integer_objects
    }

    pub fn stubs(&self) -> &[FileStub] {
        &self.stubs
    }

    pub fn is_empty(&self) -> bool {
        self.hash_objects.is_empty() && self.integer_objects.is_empty() && self.stubs.is_empty()
    }

    /// Whether some entry applies to every platform.
    pub fn uses_all_platforms(&self) -> bool {
        self.hash_objects.iter().any(|o| o.platforms == ALL_PLATFORMS)
            || self.integer_objects.iter().any(|o| o.platforms == ALL_PLATFORMS)
            || self.stubs.iter().any(|s| s.platforms == ALL_PLATFORMS)
    }

    pub fn extension_ordinal(&mut self, name: &str) -> u32 {
        match self.extensions.iter().position(|e| e == name) {
            Some(index) => index as u32,
            None => {
                self.extensions.push(name.to_string());
                (self.extensions.len() - 1) as u32
            }
        }
    }

    /// Map a platform set onto a mask over local ordinals, growing the local
    /// table as needed.
    pub fn platform_mask(&mut self, platforms: &Platforms, at: &Where) -> Result<u32> {
        let names = match platforms {
            Platforms::All => return Ok(ALL_PLATFORMS),
            Platforms::Only(names) => names,
        };
        let mut mask = 0u32;
        for name in names {
            let index = match self.platforms.iter().position(|p| p == name) {
                Some(index) => index,
                None => {
                    if self.platforms.len() == MAX_PLATFORMS {
                        return Err(Error::config(
                            at.clone(),
                            format!("unit '{}' references more than {MAX_PLATFORMS} platforms", self.unit_name),
                        ));
                    }
                    self.platforms.push(name.clone());
                    self.platforms.len() - 1
                }
            };
            mask |= 1 << index;
        }
        Ok(mask)
    }

    pub fn add_hash_object(
        &mut self,
        extension: &str,
        platforms: &Platforms,
        key: &str,
        data: ObjectData,
        at: Where,
    ) -> Result<ObjectHash> {
        let hash = ObjectHash::of_str(key);
        let object = HashObject {
            hash,
            extension: self.extension_ordinal(extension),
            platforms: self.platform_mask(platforms, &at)?,
            data,
            key: Some(key.to_string()),
            defined_at: at,
        };
        self.insert_hash_object(object)?;
        Ok(hash)
    }

    pub fn add_integer_object(
        &mut self,
        extension: &str,
        platforms: &Platforms,
        key: u32,
        data: ObjectData,
        at: Where,
    ) -> Result<()> {
        let object = IntegerObject {
            key,
            extension: self.extension_ordinal(extension),
            platforms: self.platform_mask(platforms, &at)?,
            data,
            defined_at: at,
        };
        self.insert_integer_object(object)
    }

    /// Add a hash object whose ordinals already refer to this index.
    pub(crate) fn insert_hash_object(&mut self, object: HashObject) -> Result<()> {
        let slot = (object.extension, object.hash);
        if let Some(existing) = self.hash_index.get(&slot) {
            let existing = &self.hash_objects[*existing];
            let key = object.key.clone().unwrap_or_else(|| object.hash.to_hex());
            return Err(Error::Duplicate {
                at: object.defined_at.clone(),
                message: format!(
                    "object '{key}' of extension '{}' is defined twice",
                    self.extensions[object.extension as usize]
                ),
                first: existing.defined_at.short(),
                second: object.defined_at.short(),
            });
        }
        self.hash_index.insert(slot, self.hash_objects.len());
        self.hash_objects.push(object);
        Ok(())
    }

    pub(crate) fn insert_integer_object(&mut self, object: IntegerObject) -> Result<()> {
        let slot = (object.extension, object.key);
        if let Some(existing) = self.integer_index.get(&slot) {
            let existing = &self.integer_objects[*existing];
            return Err(Error::Duplicate {
                at: object.defined_at.clone(),
                message: format!(
                    "integer object {} of extension '{}' is defined twice",
                    object.key, self.extensions[object.extension as usize]
                ),
                first: existing.defined_at.short(),
                second: object.defined_at.short(),
            });
        }
        self.integer_index.insert(slot, self.integer_objects.len());
        self.integer_objects.push(object);
        Ok(())
    }

    pub fn find_stub(&self, path: &Path) -> Option<&FileStub> {
        self.stub_index.get(path).map(|index| &self.stubs[*index])
    }

    /// Reference a file. A path that already has a stub is returned as is,
    /// with its platform bits widened; otherwise `stage` is called once to
    /// produce the staged object.
    pub fn add_file_stub(
        &mut self,
        platforms: &Platforms,
        path: PathBuf,
        at: &Where,
        stage: impl FnOnce(&Path) -> Result<StagedObject>,
    ) -> Result<StagedObject> {
        let mask = self.platform_mask(platforms, at)?;
        if let Some(index) = self.stub_index.get(&path) {
            let stub = &mut self.stubs[*index];
            stub.platforms |= mask;
            log::debug!("{} already referenced by {}", path.display(), self.unit_name);
            return Ok(StagedObject {
                hash: stub.hash,
                length: stub.length,
            });
        }
        let staged = stage(&path)?;
        self.insert_stub(FileStub {
            path,
            hash: staged.hash,
            length: staged.length,
            platforms: mask,
        });
        Ok(staged)
    }

    /// Add a stub whose mask already refers to this index.
    pub(crate) fn insert_stub(&mut self, stub: FileStub) {
        match self.stub_index.get(&stub.path) {
            Some(index) => self.stubs[*index].platforms |= stub.platforms,
            None => {
                self.stub_index.insert(stub.path.clone(), self.stubs.len());
                self.stubs.push(stub);
            }
        }
    }

    /// Install decoded extension and platform tables verbatim.
    pub(crate) fn set_tables(&mut self, extensions: Vec<String>, platforms: Vec<String>) {
        self.extensions = extensions;
        self.platforms = platforms;
    }
}

//! Merging compiled units into one PSPLP archive.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │ fixed header "PSPLP"                                       │
//! │ offset header                                              │
//! │   unit count | unit index | stub count | stub table        │
//! │   extension count | extension names                        │
//! │   platform count | platform names                          │
//! ├────────────────────────────────────────────────────────────┤
//! │ unit index: unit hash (20) | section offset                │
//! │ unit sections, one per unit:                               │
//! │   hash count | hash records | integer count | records      │
//! │   stub ref count | stub refs (stub index | platforms)      │
//! │   records, stub refs, data (4-byte aligned)                │
//! │ stub table: hash (20) | length | blob offset               │
//! │ blobs, each padded to 32 bytes                             │
//! │ extension names, platform names, padded to 32 bytes        │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Units refer to extensions and platforms by local ordinal. The packager
//! builds package-wide tables in first-seen order and rewrites every
//! ordinal and platform mask through per-unit maps. File stubs are merged by
//! content hash, so identical staged bytes land in the archive once no
//! matter how many units or paths referenced them.
//!
//! - [`reader`] - decoding archives back into their tables

pub mod reader;

use ahash::AHashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::binary::compiled::length_field;
use crate::binary::records::{hash_record_len, integer_record_len, place_data, write_fields};
use crate::binary::{
    BLOB_ALIGNMENT, ByteOrder, ContainerKind, DATA_ALIGNMENT, Endianness, FIXED_HEADER_LEN, FieldWriter,
    FixedHeader, Region, align_up, to_u32,
};
use crate::diagnostics::{Phase, Where};
use crate::error::{Error, Result};
use crate::extension::ExtensionRegistry;
use crate::hash::{HASH_LEN, ObjectHash};
use crate::indexer::{ALL_PLATFORMS, Indexer, MAX_PLATFORMS, StagingArea};

pub use reader::{PackageContents, PackagedBlob, PackagedObject, PackagedUnit, StubRef};

const OFFSET_FIELDS: usize = 8;
const UNIT_HEADER_FIELDS: usize = 6;

/// A file stub shared by every unit referencing its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageStub {
    pub hash: ObjectHash,
    pub length: u64,
    /// First path that referenced the content.
    pub path: PathBuf,
}

#[derive(Debug, Default)]
pub struct Packager {
    units: Vec<Indexer>,
    extensions: Vec<String>,
    platforms: Vec<String>,
    /// Per unit: local extension ordinal to global.
    extension_maps: Vec<Vec<u32>>,
    /// Per unit: local platform ordinal to global.
    platform_maps: Vec<Vec<u32>>,
    stubs: Vec<PackageStub>,
    stub_index: AHashMap<ObjectHash, usize>,
    /// Per unit: global stub index and global platform mask.
    stub_refs: Vec<Vec<(usize, u32)>>,
}

impl Packager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn units(&self) -> &[Indexer] {
        &self.units
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn platforms(&self) -> &[String] {
        &self.platforms
    }

    pub fn stubs(&self) -> &[PackageStub] {
        &self.stubs
    }

    /// Append a unit, merging its tables and stubs into the package's.
    pub fn add_unit(&mut self, indexer: Indexer) -> Result<()> {
        let at = Where::phase(Phase::Package);
        if self.units.iter().any(|u| u.unit_name() == indexer.unit_name()) {
            return Err(Error::config(
                at,
                format!(
                    "two units are named '{}'; unit names must be unique within a package",
                    indexer.unit_name()
                ),
            ));
        }

        let extension_map = indexer
            .extensions()
            .iter()
            .map(|name| global_ordinal(&mut self.extensions, name))
            .collect::<Vec<_>>();
        let mut platform_map = Vec::with_capacity(indexer.platforms().len());
        for name in indexer.platforms() {
            let ordinal = global_ordinal(&mut self.platforms, name);
            if self.platforms.len() > MAX_PLATFORMS {
                return Err(Error::config(
                    at,
                    format!("package references more than {MAX_PLATFORMS} platforms"),
                ));
            }
            platform_map.push(ordinal);
        }

        let mut refs: Vec<(usize, u32)> = Vec::with_capacity(indexer.stubs().len());
        for stub in indexer.stubs() {
            let index = *self.stub_index.entry(stub.hash).or_insert_with(|| {
                self.stubs.push(PackageStub {
                    hash: stub.hash,
                    length: stub.length,
                    path: stub.path.clone(),
                });
                self.stubs.len() - 1
            });
            let mask = remap_mask(stub.platforms, &platform_map);
            // two paths with identical content inside one unit
            match refs.iter_mut().find(|(existing, _)| *existing == index) {
                Some((_, existing_mask)) => *existing_mask |= mask,
                None => refs.push((index, mask)),
            }
        }

        log::debug!(
            "packaging unit '{}': {} object(s), {} integer object(s), {} file(s)",
            indexer.unit_name(),
            indexer.hash_objects().len(),
            indexer.integer_objects().len(),
            refs.len()
        );
        self.extension_maps.push(extension_map);
        self.platform_maps.push(platform_map);
        self.stub_refs.push(refs);
        self.units.push(indexer);
        Ok(())
    }

    /// Whether some unit has an entry for every platform.
    pub fn uses_all_platforms(&self) -> bool {
        self.units.iter().any(Indexer::uses_all_platforms)
    }

    /// Byte order of the archive, see [`resolve_endianness`].
    pub fn endianness(&self, registry: &ExtensionRegistry, requested: Option<Endianness>) -> Result<Endianness> {
        resolve_endianness(
            registry,
            &self.platforms,
            self.uses_all_platforms(),
            requested,
            &Where::phase(Phase::Package),
        )
    }

    /// Lay out and encode the archive. Staged blobs are read back from
    /// `staging` and checked against their hash.
    pub fn encode(&self, endianness: Endianness, staging: &StagingArea) -> Result<Vec<u8>> {
        let at = Where::phase(Phase::Package);
        let width = endianness.field_width();

        let index_off = FIXED_HEADER_LEN + OFFSET_FIELDS * width;
        let mut pos = index_off + self.units.len() * (HASH_LEN + width);

        let mut sections = Vec::with_capacity(self.units.len());
        for (unit_index, unit) in self.units.iter().enumerate() {
            let section = UnitSection::lay_out(unit, &self.stub_refs[unit_index], pos, endianness)?;
            pos = section.end;
            sections.push(section);
        }

        let stub_table_off = pos;
        let blobs_off = align_up(stub_table_off + self.stubs.len() * (HASH_LEN + 2 * width), BLOB_ALIGNMENT);
        let mut blobs = Region::new(BLOB_ALIGNMENT);
        let mut blob_offsets = Vec::with_capacity(self.stubs.len());
        for stub in &self.stubs {
            let bytes = staging.read_object(&stub.hash, &at)?;
            if ObjectHash::of(&bytes) != stub.hash {
                return Err(Error::Dependency {
                    at: at.clone(),
                    message: format!(
                        "staged object {} for '{}' no longer matches its hash",
                        stub.hash,
                        stub.path.display()
                    ),
                });
            }
            blob_offsets.push((blobs.place(&bytes)?, bytes.len()));
        }

        let names_off = align_up(blobs_off + blobs.len(), BLOB_ALIGNMENT);
        let mut names = Region::new(1);
        for name in &self.extensions {
            names.place_cstr(name)?;
        }
        let plat_names_off = names_off + names.len();
        for name in &self.platforms {
            names.place_cstr(name)?;
        }
        let total = align_up(names_off + names.len(), BLOB_ALIGNMENT);

        let mut out = FieldWriter::with_capacity(endianness, total)?;
        out.bytes(&FixedHeader::new(ContainerKind::Package, endianness).encode())?;
        let header = [
            self.units.len(),
            index_off,
            self.stubs.len(),
            stub_table_off,
            self.extensions.len(),
            names_off,
            self.platforms.len(),
            plat_names_off,
        ];
        for value in header {
            out.u32(to_u32(value, "offset header field", &at)?)?;
        }

        out.check_position(index_off, "unit index");
        for (unit, section) in self.units.iter().zip(&sections) {
            out.hash(&unit.unit_hash())?;
            out.u32(to_u32(section.base, "unit offset", &at)?)?;
        }

        for (unit_index, section) in sections.iter().enumerate() {
            self.write_section(&mut out, unit_index, section, &at)?;
        }

        out.check_position(stub_table_off, "stub table");
        for (stub, (offset, length)) in self.stubs.iter().zip(&blob_offsets) {
            out.hash(&stub.hash)?;
            out.u32(length_field(*length as u64, &stub.path, &at)?)?;
            out.u32(to_u32(blobs_off + offset, "blob offset", &at)?)?;
        }
        out.pad_to(BLOB_ALIGNMENT)?;

        out.check_position(blobs_off, "blobs");
        out.bytes(blobs.as_bytes())?;
        out.pad_to(BLOB_ALIGNMENT)?;
        out.check_position(names_off, "names");
        out.bytes(names.as_bytes())?;
        out.pad_to(BLOB_ALIGNMENT)?;
        Ok(out.finish())
    }

    fn write_section(&self, out: &mut FieldWriter, unit_index: usize, section: &UnitSection, at: &Where) -> Result<()> {
        let unit = &self.units[unit_index];
        let extensions = &self.extension_maps[unit_index];
        let platforms = &self.platform_maps[unit_index];
        let refs = &self.stub_refs[unit_index];

        out.check_position(section.base, "unit section");
        let header = [
            unit.hash_objects().len(),
            section.hash_off,
            unit.integer_objects().len(),
            section.int_off,
            refs.len(),
            section.ref_off,
        ];
        for value in header {
            out.u32(to_u32(value, "unit header field", at)?)?;
        }

        for (object, copies) in unit.hash_objects().iter().zip(&section.hash_copies) {
            out.hash(&object.hash)?;
            let extension = extensions[object.extension as usize];
            let mask = remap_mask(object.platforms, platforms);
            write_fields(out, extension, mask, &object.data, copies, section.data_off, at)?;
        }
        for (object, copies) in unit.integer_objects().iter().zip(&section.int_copies) {
            out.u32(object.key)?;
            let extension = extensions[object.extension as usize];
            let mask = remap_mask(object.platforms, platforms);
            write_fields(out, extension, mask, &object.data, copies, section.data_off, at)?;
        }
        out.check_position(section.ref_off, "stub refs");
        for (stub, mask) in refs {
            out.u32(to_u32(*stub, "stub index", at)?)?;
            out.u32(*mask)?;
        }
        out.check_position(section.data_off, "unit data");
        out.bytes(section.data.as_bytes())?;
        out.pad_to(DATA_ALIGNMENT)?;
        Ok(())
    }

    /// Encode and write the archive to `path`. Nothing is written unless
    /// encoding succeeds.
    pub fn write(&self, path: &Path, endianness: Endianness, staging: &StagingArea) -> Result<()> {
        let bytes = self.encode(endianness, staging)?;
        write_output(path, &bytes, &Where::file(Phase::Package, path))?;
        log::info!(
            "wrote {} ({} unit(s), {} file(s), {} bytes, {endianness}-endian)",
            path.display(),
            self.units.len(),
            self.stubs.len(),
            bytes.len()
        );
        Ok(())
    }
}

/// Offsets of one unit section, and its data region.
#[derive(Debug)]
struct UnitSection {
    base: usize,
    hash_off: usize,
    int_off: usize,
    ref_off: usize,
    data_off: usize,
    end: usize,
    data: Region,
    hash_copies: Vec<Vec<usize>>,
    int_copies: Vec<Vec<usize>>,
}

impl UnitSection {
    fn lay_out(unit: &Indexer, refs: &[(usize, u32)], base: usize, endianness: Endianness) -> Result<Self> {
        let width = endianness.field_width();
        let hash_off = base + UNIT_HEADER_FIELDS * width;
        let int_off = hash_off + unit.hash_objects().len() * hash_record_len(endianness);
        let ref_off = int_off + unit.integer_objects().len() * integer_record_len(endianness);
        let data_off = ref_off + refs.len() * 2 * width;

        let mut data = Region::new(DATA_ALIGNMENT);
        let name = unit.unit_name();
        let hash_copies = unit
            .hash_objects()
            .iter()
            .map(|o| {
                let describe = || {
                    let key = o.key.clone().unwrap_or_else(|| o.hash.to_hex());
                    format!("object '{key}' of unit '{name}'")
                };
                place_data(&mut data, &o.data, endianness, describe, &o.defined_at)
            })
            .collect::<Result<Vec<_>>>()?;
        let int_copies = unit
            .integer_objects()
            .iter()
            .map(|o| {
                let describe = || format!("integer object {} of unit '{name}'", o.key);
                place_data(&mut data, &o.data, endianness, describe, &o.defined_at)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            base,
            hash_off,
            int_off,
            ref_off,
            data_off,
            end: align_up(data_off + data.len(), DATA_ALIGNMENT),
            data,
            hash_copies,
            int_copies,
        })
    }
}

fn global_ordinal(table: &mut Vec<String>, name: &str) -> u32 {
    match table.iter().position(|existing| existing == name) {
        Some(index) => index as u32,
        None => {
            table.push(name.to_string());
            (table.len() - 1) as u32
        }
    }
}

/// Rewrite a mask over local platform ordinals into global ordinals.
fn remap_mask(mask: u32, map: &[u32]) -> u32 {
    if mask == ALL_PLATFORMS {
        return ALL_PLATFORMS;
    }
    map.iter()
        .enumerate()
        .filter(|(local, _)| mask & (1 << local) != 0)
        .fold(0, |acc, (_, global)| acc | (1 << global))
}

/// Pick the byte order of a container.
///
/// The platforms that matter are the ones referenced, plus every registered
/// platform when some entry applies to all of them. Their demands decide:
/// one order gives that order, both give bi-endian, none gives `requested`
/// or the host order. A requested single order that leaves out a demanded
/// one is a configuration error.
pub fn resolve_endianness(
    registry: &ExtensionRegistry,
    referenced: &[String],
    all_platforms: bool,
    requested: Option<Endianness>,
    at: &Where,
) -> Result<Endianness> {
    let mut demands: Vec<(String, ByteOrder)> = Vec::new();
    let mut consider = |name: &str, order: Option<ByteOrder>| {
        if let Some(order) = order {
            if !demands.iter().any(|(n, _)| n == name) {
                demands.push((name.to_string(), order));
            }
        }
    };
    for name in referenced {
        consider(name, registry.platform_demand(name).flatten());
    }
    if all_platforms {
        for (_, descriptor) in registry.platforms() {
            consider(&descriptor.name, descriptor.platform.and_then(|role| role.byte_order));
        }
    }

    let little = demands.iter().any(|(_, o)| *o == ByteOrder::Little);
    let big = demands.iter().any(|(_, o)| *o == ByteOrder::Big);
    let demanded = match (little, big) {
        (true, true) => Some(Endianness::Bi),
        (true, false) => Some(Endianness::Little),
        (false, true) => Some(Endianness::Big),
        (false, false) => None,
    };

    let resolved = match (demanded, requested) {
        (None, requested) => requested.unwrap_or(Endianness::native()),
        (Some(demanded), None) => demanded,
        (Some(_), Some(Endianness::Bi)) => Endianness::Bi,
        (Some(demanded), Some(requested)) if demanded == requested => demanded,
        (Some(_), Some(requested)) => {
            let conflicting: Vec<String> = demands
                .iter()
                .filter(|(_, order)| Endianness::single(*order) != requested)
                .map(|(name, order)| format!("{name} ({order})"))
                .collect();
            return Err(Error::config(
                at.clone(),
                format!(
                    "{requested}-endian output was requested, but {} demand{} otherwise",
                    conflicting.join(", "),
                    if conflicting.len() == 1 { "s" } else { "" }
                ),
            ));
        }
    };
    log::debug!("resolved output byte order: {resolved}");
    Ok(resolved)
}

/// Write `bytes` to `path` through a temporary file in the same directory.
pub fn write_output(path: &Path, bytes: &[u8], at: &Where) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(|e| Error::io(at.clone(), "failed to create directory", &dir, e))?;
    let mut temp =
        NamedTempFile::new_in(&dir).map_err(|e| Error::io(at.clone(), "failed to create temporary file in", &dir, e))?;
    temp.write_all(bytes)
        .and_then(|_| temp.flush())
        .map_err(|e| Error::io(at.clone(), "failed to write", temp.path(), e))?;
    temp.persist(path)
        .map_err(|e| Error::io(at.clone(), "failed to write", path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::platform::TargetPlatform;
    use crate::indexer::staging::tests::Upper;
    use crate::indexer::{LogProgress, ObjectData, Platforms};

    fn at() -> Where {
        Where::phase(Phase::Compile)
    }

    fn registry(platforms: &[(&str, Option<ByteOrder>)]) -> ExtensionRegistry {
        let mut builder = ExtensionRegistry::builder();
        for (name, order) in platforms {
            builder = builder.register(TargetPlatform::new(*name, *order));
        }
        builder.build().unwrap()
    }

    fn stage(staging: &StagingArea, source: &Path) -> crate::indexer::StagedObject {
        staging.stage(source, Some(&Upper), false, &LogProgress, &at()).unwrap().object
    }

    #[test]
    fn test_cross_unit_dedup_and_remapping() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingArea::new(dir.path().join("stage"));
        // different sources whose converted bytes are identical
        fs::write(dir.path().join("a.txt"), "same").unwrap();
        fs::write(dir.path().join("b.txt"), "SAME").unwrap();
        let a = stage(&staging, &dir.path().join("a.txt"));
        let b = stage(&staging, &dir.path().join("b.txt"));
        assert_eq!(a.hash, b.hash);

        let mut first = Indexer::new("first");
        first
            .add_hash_object("Embed", &Platforms::only(["GL2"]), "k", ObjectData::Neutral(vec![1]), at())
            .unwrap();
        first
            .add_file_stub(&Platforms::only(["GL2"]), dir.path().join("a.txt"), &at(), |_| Ok(a))
            .unwrap();

        let mut second = Indexer::new("second");
        second
            .add_hash_object("Other", &Platforms::only(["GX", "GL2"]), "k", ObjectData::Neutral(vec![2]), at())
            .unwrap();
        second
            .add_file_stub(&Platforms::only(["GX"]), dir.path().join("b.txt"), &at(), |_| Ok(b))
            .unwrap();

        let mut packager = Packager::new();
        packager.add_unit(first).unwrap();
        packager.add_unit(second).unwrap();
        assert_eq!(packager.extensions(), ["Embed", "Other"]);
        assert_eq!(packager.platforms(), ["GL2", "GX"]);
        assert_eq!(packager.stubs().len(), 1);

        let bytes = packager.encode(Endianness::Bi, &staging).unwrap();
        assert_eq!(bytes.len() % BLOB_ALIGNMENT, 0);
        let contents = PackageContents::decode(&bytes, Path::new("test.psplp")).unwrap();
        assert_eq!(contents.blobs.len(), 1);
        assert_eq!(contents.blobs[0].data, b"SAME");

        let second = contents.unit("second").unwrap();
        // local "GX" (bit 0) and "GL2" (bit 1) swap places globally
        assert_eq!(second.hash_objects[0].platforms, 0b11);
        assert_eq!(second.hash_objects[0].extension, 1);
        assert_eq!(second.stubs, vec![StubRef { index: 0, platforms: 0b10 }]);
        let first = contents.unit("first").unwrap();
        assert_eq!(first.stubs, vec![StubRef { index: 0, platforms: 0b01 }]);
    }

    #[test]
    fn test_missing_blob_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingArea::new(dir.path().join("stage"));
        let mut unit = Indexer::new("unit");
        unit.add_file_stub(&Platforms::All, dir.path().join("gone.png"), &at(), |_| {
            Ok(crate::indexer::StagedObject {
                hash: ObjectHash::of(b"never staged"),
                length: 12,
            })
        })
        .unwrap();
        let mut packager = Packager::new();
        packager.add_unit(unit).unwrap();

        let output = dir.path().join("out.psplp");
        let err = packager.write(&output, Endianness::Little, &staging).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
        assert!(!output.exists());
    }

    #[test]
    fn test_duplicate_unit_names_are_rejected() {
        let mut packager = Packager::new();
        packager.add_unit(Indexer::new("main")).unwrap();
        assert!(matches!(packager.add_unit(Indexer::new("main")), Err(Error::Config { .. })));
    }

    #[test]
    fn test_endianness_from_demands() {
        let registry = registry(&[
            ("GX", Some(ByteOrder::Big)),
            ("D3D", Some(ByteOrder::Little)),
            ("GL2", None),
        ]);
        let names = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let place = Where::phase(Phase::Package);

        let resolve = |referenced: &[&str], all: bool, requested| {
            resolve_endianness(&registry, &names(referenced), all, requested, &place)
        };
        assert_eq!(resolve(&["GX"], false, None).unwrap(), Endianness::Big);
        assert_eq!(resolve(&["GX", "D3D"], false, None).unwrap(), Endianness::Bi);
        assert_eq!(resolve(&["GL2"], false, None).unwrap(), Endianness::native());
        assert_eq!(resolve(&["GL2"], false, Some(Endianness::Big)).unwrap(), Endianness::Big);
        assert_eq!(resolve(&[], true, None).unwrap(), Endianness::Bi);
        assert_eq!(resolve(&["GX"], false, Some(Endianness::Bi)).unwrap(), Endianness::Bi);

        let err = resolve(&["GX"], false, Some(Endianness::Little)).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains("GX (big)"));
    }

    #[test]
    fn test_remap_mask() {
        assert_eq!(remap_mask(ALL_PLATFORMS, &[3]), ALL_PLATFORMS);
        assert_eq!(remap_mask(0b101, &[4, 0, 1]), 0b10010);
        assert_eq!(remap_mask(0, &[1, 2]), 0);
        // every local platform set, mapped in reverse
        let reversed: Vec<u32> = (0..MAX_PLATFORMS as u32).rev().collect();
        assert_eq!(remap_mask(ALL_PLATFORMS >> 1, &reversed), ALL_PLATFORMS >> 1);
        assert_eq!(remap_mask(0b1, &reversed), 1 << (MAX_PLATFORMS - 1));
    }
}

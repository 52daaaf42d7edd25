//! PSPLC: one compiled unit.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ fixed header "PSPLC"                                    │
//! │ offset header                                           │
//! │   unit name | extension count | extension names         │
//! │   platform count | platform names                       │
//! │   hash count | hash records | integer count | records   │
//! │   stub count | stub records                             │
//! ├─────────────────────────────────────────────────────────┤
//! │ hash records, integer records                           │
//! │ stub records: hash (20) | platforms | length | path     │
//! │ data: object copies, 4-byte aligned                     │
//! │ strings: unit name, extensions, platforms, stub paths   │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Decoding rebuilds the unit's [`Indexer`] so it can be packaged with units
//! compiled in the same run.

use std::path::{Path, PathBuf};

use super::records::{self, hash_record_len, integer_record_len, place_data, read_fields, write_fields};
use super::{
    ContainerKind, DATA_ALIGNMENT, Endianness, FIXED_HEADER_LEN, FieldReader, FieldWriter, FixedHeader, Region,
    align_up, to_u32,
};
use crate::diagnostics::{Phase, Where};
use crate::error::{Error, Result};
use crate::extension::ExtensionRegistry;
use crate::hash::HASH_LEN;
use crate::indexer::{FileStub, HashObject, Indexer, IntegerObject, MAX_PLATFORMS};

const NAME: &str = "PSPLC";
const OFFSET_FIELDS: usize = 11;

fn stub_record_len(endianness: Endianness) -> usize {
    HASH_LEN + 3 * endianness.field_width()
}

/// Whether `bytes` start like a compiled unit.
pub fn is_compiled(bytes: &[u8]) -> bool {
    bytes.len() >= FIXED_HEADER_LEN && bytes[..5] == super::MAGIC_COMPILED
}

pub fn encode(indexer: &Indexer, endianness: Endianness) -> Result<Vec<u8>> {
    let at = Where::phase(Phase::Compile);
    let hash_off = FIXED_HEADER_LEN + OFFSET_FIELDS * endianness.field_width();
    let int_off = hash_off + indexer.hash_objects().len() * hash_record_len(endianness);
    let stub_off = int_off + indexer.integer_objects().len() * integer_record_len(endianness);
    let data_off = stub_off + indexer.stubs().len() * stub_record_len(endianness);

    let mut data = Region::new(DATA_ALIGNMENT);
    let hash_copies = indexer
        .hash_objects()
        .iter()
        .map(|o| {
            let describe = || format!("object {}", o.key.clone().unwrap_or_else(|| o.hash.to_hex()));
            place_data(&mut data, &o.data, endianness, describe, &o.defined_at)
        })
        .collect::<Result<Vec<_>>>()?;
    let int_copies = indexer
        .integer_objects()
        .iter()
        .map(|o| place_data(&mut data, &o.data, endianness, || format!("integer object {}", o.key), &o.defined_at))
        .collect::<Result<Vec<_>>>()?;

    let strings_off = align_up(data_off + data.len(), DATA_ALIGNMENT);
    let mut strings = Region::new(1);
    let unit_name = strings.place_cstr(indexer.unit_name())?;
    let ext_names = strings.len();
    for name in indexer.extensions() {
        strings.place_cstr(name)?;
    }
    let plat_names = strings.len();
    for name in indexer.platforms() {
        strings.place_cstr(name)?;
    }
    let stub_paths = indexer
        .stubs()
        .iter()
        .map(|stub| strings.place_cstr(&stub.path.to_string_lossy()))
        .collect::<Result<Vec<_>>>()?;

    let total = align_up(strings_off + strings.len(), DATA_ALIGNMENT);
    let mut out = FieldWriter::with_capacity(endianness, total)?;
    out.bytes(&FixedHeader::new(ContainerKind::Compiled, endianness).encode())?;
    let header = [
        strings_off + unit_name,
        indexer.extensions().len(),
        strings_off + ext_names,
        indexer.platforms().len(),
        strings_off + plat_names,
        indexer.hash_objects().len(),
        hash_off,
        indexer.integer_objects().len(),
        int_off,
        indexer.stubs().len(),
        stub_off,
    ];
    for value in header {
        out.u32(to_u32(value, "offset header field", &at)?)?;
    }

    out.check_position(hash_off, "hash records");
    for (object, copies) in indexer.hash_objects().iter().zip(&hash_copies) {
        out.hash(&object.hash)?;
        write_fields(&mut out, object.extension, object.platforms, &object.data, copies, data_off, &at)?;
    }
    out.check_position(int_off, "integer records");
    for (object, copies) in indexer.integer_objects().iter().zip(&int_copies) {
        out.u32(object.key)?;
        write_fields(&mut out, object.extension, object.platforms, &object.data, copies, data_off, &at)?;
    }
    out.check_position(stub_off, "stub records");
    for (stub, path) in indexer.stubs().iter().zip(&stub_paths) {
        out.hash(&stub.hash)?;
        out.u32(stub.platforms)?;
        out.u32(length_field(stub.length, &stub.path, &at)?)?;
        out.u32(to_u32(strings_off + path, "string offset", &at)?)?;
    }

    out.check_position(data_off, "data");
    out.bytes(data.as_bytes())?;
    out.pad_to(DATA_ALIGNMENT)?;
    out.check_position(strings_off, "strings");
    out.bytes(strings.as_bytes())?;
    out.pad_to(DATA_ALIGNMENT)?;
    Ok(out.finish())
}

pub(crate) fn length_field(length: u64, path: &Path, at: &Where) -> Result<u32> {
    u32::try_from(length).map_err(|_| {
        Error::config(
            at.clone(),
            format!("'{}' ({length} bytes) is too large for the container format", path.display()),
        )
    })
}

/// Decode a compiled unit. Every extension and platform it names must be
/// registered.
pub fn decode(bytes: &[u8], path: &Path, registry: &ExtensionRegistry) -> Result<Indexer> {
    let at = Where::file(Phase::Package, path);
    let header = FixedHeader::decode(bytes, &at)?;
    if header.kind != ContainerKind::Compiled {
        return Err(Error::decode(at, NAME, "not a compiled unit"));
    }
    let reader = FieldReader::new(bytes, header.endianness, NAME, at.clone());

    let mut cursor = reader.cursor(FIXED_HEADER_LEN);
    let unit_name_off = cursor.usize()?;
    let ext_count = cursor.usize()?;
    let ext_names_off = cursor.usize()?;
    let plat_count = cursor.usize()?;
    let plat_names_off = cursor.usize()?;
    let hash_count = cursor.usize()?;
    let hash_off = cursor.usize()?;
    let int_count = cursor.usize()?;
    let int_off = cursor.usize()?;
    let stub_count = cursor.usize()?;
    let stub_off = cursor.usize()?;

    if plat_count > MAX_PLATFORMS {
        return Err(reader.error(format!("{plat_count} platforms exceed the limit of {MAX_PLATFORMS}")));
    }
    let (unit_name, _) = reader.cstr_at(unit_name_off)?;
    let extensions = reader.cstrs_at(ext_names_off, ext_count)?;
    let platforms = reader.cstrs_at(plat_names_off, plat_count)?;

    for name in &extensions {
        if registry.find(name).is_none() {
            return Err(Error::Dependency {
                at: at.clone(),
                message: format!("compiled unit '{unit_name}' needs extension '{name}', which is not registered"),
            });
        }
    }
    for name in &platforms {
        if registry.platform_demand(name).is_none() {
            return Err(Error::Dependency {
                at: at.clone(),
                message: format!("compiled unit '{unit_name}' targets platform '{name}', which is not configured"),
            });
        }
    }

    let mut indexer = Indexer::new(unit_name);
    indexer.set_tables(extensions, platforms);

    let mut cursor = reader.cursor(hash_off);
    for _ in 0..hash_count {
        let hash = cursor.hash()?;
        let fields = read_fields(&reader, &mut cursor)?;
        fields.check_ordinals(&reader, ext_count, plat_count)?;
        indexer.insert_hash_object(HashObject {
            hash,
            extension: fields.extension,
            platforms: fields.platforms,
            data: fields.data,
            key: None,
            defined_at: at.clone(),
        })?;
    }

    let mut cursor = reader.cursor(int_off);
    for _ in 0..int_count {
        let key = cursor.u32()?;
        let fields = read_fields(&reader, &mut cursor)?;
        fields.check_ordinals(&reader, ext_count, plat_count)?;
        indexer.insert_integer_object(IntegerObject {
            key,
            extension: fields.extension,
            platforms: fields.platforms,
            data: fields.data,
            defined_at: at.clone(),
        })?;
    }

    let mut cursor = reader.cursor(stub_off);
    for _ in 0..stub_count {
        let hash = cursor.hash()?;
        let platforms = cursor.u32()?;
        records::check_mask(&reader, platforms, plat_count)?;
        let length = cursor.u32()?;
        let (path, _) = reader.cstr_at(cursor.usize()?)?;
        indexer.insert_stub(FileStub {
            path: PathBuf::from(path),
            hash,
            length: u64::from(length),
            platforms,
        });
    }

    log::debug!(
        "decoded compiled unit '{}' from {} ({} mode)",
        indexer.unit_name(),
        path.display(),
        header.endianness
    );
    Ok(indexer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::ByteOrder;
    use crate::extension::embed::Embed;
    use crate::extension::platform::TargetPlatform;
    use crate::hash::ObjectHash;
    use crate::indexer::{ObjectData, Platforms};

    fn at(line: usize) -> Where {
        Where {
            phase: Phase::Compile,
            file: Some(PathBuf::from("/src/unit.pspl")),
            line: Some(line),
        }
    }

    fn sample() -> Indexer {
        let mut index = Indexer::new("unit");
        index
            .add_hash_object("Embed", &Platforms::All, "greeting", ObjectData::Neutral(b"hello".to_vec()), at(2))
            .unwrap();
        let value = 0x0102_0304u32;
        let data = ObjectData::from_native(&value.to_ne_bytes(), Some(&value.swap_bytes().to_ne_bytes()));
        index
            .add_integer_object("Embed", &Platforms::only(["GX"]), 9, data, at(3))
            .unwrap();
        index
            .add_file_stub(&Platforms::only(["GL2"]), PathBuf::from("/src/grass.png"), &at(4), |_| {
                Ok(crate::indexer::StagedObject {
                    hash: ObjectHash::of(b"png bytes"),
                    length: 9,
                })
            })
            .unwrap();
        index
    }

    fn registry() -> ExtensionRegistry {
        ExtensionRegistry::builder()
            .register(Embed::new())
            .register(TargetPlatform::new("GX", Some(ByteOrder::Big)))
            .register(TargetPlatform::new("GL2", None))
            .build()
            .unwrap()
    }

    #[test]
    fn test_bi_endian_round_trip() {
        let original = sample();
        let bytes = encode(&original, Endianness::Bi).unwrap();
        assert!(is_compiled(&bytes));
        assert_eq!(bytes.len() % DATA_ALIGNMENT, 0);

        let decoded = decode(&bytes, Path::new("unit.psplc"), &registry()).unwrap();
        assert_eq!(decoded.unit_name(), "unit");
        assert_eq!(decoded.extensions(), original.extensions());
        assert_eq!(decoded.platforms(), original.platforms());
        assert_eq!(decoded.hash_objects()[0].hash, original.hash_objects()[0].hash);
        assert_eq!(decoded.hash_objects()[0].data, original.hash_objects()[0].data);
        assert_eq!(decoded.integer_objects()[0].data, original.integer_objects()[0].data);
        assert_eq!(decoded.integer_objects()[0].platforms, 0b1);
        assert_eq!(decoded.stubs(), original.stubs());
    }

    #[test]
    fn test_single_order_keeps_only_that_copy() {
        let bytes = encode(&sample(), Endianness::Big).unwrap();
        let decoded = decode(&bytes, Path::new("unit.psplc"), &registry()).unwrap();
        assert_eq!(
            decoded.integer_objects()[0].data,
            ObjectData::Sensitive {
                little: None,
                big: Some(0x0102_0304u32.to_be_bytes().to_vec()),
            }
        );
        // re-encoding for the other order needs a copy that no longer exists
        assert!(matches!(
            encode(&decoded, Endianness::Little),
            Err(Error::Dependency { .. })
        ));
    }

    #[test]
    fn test_unknown_extension_is_a_dependency_error() {
        let bytes = encode(&sample(), Endianness::Little).unwrap();
        let registry = ExtensionRegistry::builder()
            .register(TargetPlatform::new("GX", None))
            .register(TargetPlatform::new("GL2", None))
            .build()
            .unwrap();
        let err = decode(&bytes, Path::new("unit.psplc"), &registry).unwrap_err();
        assert!(matches!(err, Error::Dependency { .. }));
        assert!(err.to_string().contains("'Embed'"));
    }

    #[test]
    fn test_truncated_input_is_a_decode_error() {
        let bytes = encode(&sample(), Endianness::Little).unwrap();
        for len in [4, FIXED_HEADER_LEN + 3, bytes.len() / 2] {
            let err = decode(&bytes[..len], Path::new("unit.psplc"), &registry()).unwrap_err();
            assert!(matches!(err, Error::Decode { .. }), "length {len}: {err}");
        }
    }

    #[test]
    fn test_package_magic_is_rejected() {
        let header = FixedHeader::new(ContainerKind::Package, Endianness::Little).encode();
        assert!(!is_compiled(&header));
        assert!(decode(&header, Path::new("x.psplp"), &registry()).is_err());
    }
}

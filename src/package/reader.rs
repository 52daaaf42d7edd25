//! Decoding PSPLP archives.
//!
//! The runtime loader lives elsewhere; this reader exists to inspect
//! archives and to check what the packager wrote.

use std::path::Path;

use crate::binary::records::{check_mask, read_fields};
use crate::binary::{ContainerKind, Endianness, FIXED_HEADER_LEN, FieldReader, FixedHeader};
use crate::diagnostics::{Phase, Where};
use crate::error::{Error, Result};
use crate::hash::ObjectHash;
use crate::indexer::{MAX_PLATFORMS, ObjectData};

const NAME: &str = "PSPLP";

/// An object in a unit section. Ordinals refer to the package tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagedObject<K> {
    pub key: K,
    pub extension: u32,
    pub platforms: u32,
    pub data: ObjectData,
}

/// A unit's reference to a package-wide file blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StubRef {
    pub index: usize,
    pub platforms: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagedUnit {
    pub hash: ObjectHash,
    pub hash_objects: Vec<PackagedObject<ObjectHash>>,
    pub integer_objects: Vec<PackagedObject<u32>>,
    pub stubs: Vec<StubRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagedBlob {
    pub hash: ObjectHash,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageContents {
    pub endianness: Endianness,
    pub extensions: Vec<String>,
    pub platforms: Vec<String>,
    pub units: Vec<PackagedUnit>,
    pub blobs: Vec<PackagedBlob>,
}

impl PackageContents {
    pub fn decode(bytes: &[u8], path: &Path) -> Result<Self> {
        let at = Where::file(Phase::Package, path);
        let header = FixedHeader::decode(bytes, &at)?;
        if header.kind != ContainerKind::Package {
            return Err(Error::decode(at, NAME, "not a package"));
        }
        let reader = FieldReader::new(bytes, header.endianness, NAME, at);

        let mut cursor = reader.cursor(FIXED_HEADER_LEN);
        let unit_count = cursor.usize()?;
        let index_off = cursor.usize()?;
        let stub_count = cursor.usize()?;
        let stub_table_off = cursor.usize()?;
        let ext_count = cursor.usize()?;
        let ext_names_off = cursor.usize()?;
        let plat_count = cursor.usize()?;
        let plat_names_off = cursor.usize()?;

        if plat_count > MAX_PLATFORMS {
            return Err(reader.error(format!("{plat_count} platforms exceed the limit of {MAX_PLATFORMS}")));
        }
        let extensions = reader.cstrs_at(ext_names_off, ext_count)?;
        let platforms = reader.cstrs_at(plat_names_off, plat_count)?;

        let mut blobs = Vec::new();
        let mut cursor = reader.cursor(stub_table_off);
        for _ in 0..stub_count {
            let hash = cursor.hash()?;
            let length = cursor.usize()?;
            let offset = cursor.usize()?;
            let data = reader.bytes_at(offset, length)?.to_vec();
            if ObjectHash::of(&data) != hash {
                return Err(reader.error(format!("blob {hash} does not match its hash")));
            }
            blobs.push(PackagedBlob { hash, data });
        }

        let mut units = Vec::new();
        let mut index = reader.cursor(index_off);
        for _ in 0..unit_count {
            let hash = index.hash()?;
            let base = index.usize()?;
            units.push(read_unit(&reader, hash, base, ext_count, plat_count, stub_count)?);
        }

        Ok(Self {
            endianness: header.endianness,
            extensions,
            platforms,
            units,
            blobs,
        })
    }

    /// The unit compiled from a source named `name`.
    pub fn unit(&self, name: &str) -> Option<&PackagedUnit> {
        let hash = ObjectHash::of_str(name);
        self.units.iter().find(|unit| unit.hash == hash)
    }
}

fn read_unit(
    reader: &FieldReader<'_>,
    hash: ObjectHash,
    base: usize,
    ext_count: usize,
    plat_count: usize,
    stub_count: usize,
) -> Result<PackagedUnit> {
    let mut header = reader.cursor(base);
    let hash_count = header.usize()?;
    let hash_off = header.usize()?;
    let int_count = header.usize()?;
    let int_off = header.usize()?;
    let ref_count = header.usize()?;
    let ref_off = header.usize()?;

    let mut hash_objects = Vec::new();
    let mut cursor = reader.cursor(hash_off);
    for _ in 0..hash_count {
        let key = cursor.hash()?;
        let fields = read_fields(reader, &mut cursor)?;
        fields.check_ordinals(reader, ext_count, plat_count)?;
        hash_objects.push(PackagedObject {
            key,
            extension: fields.extension,
            platforms: fields.platforms,
            data: fields.data,
        });
    }

    let mut integer_objects = Vec::new();
    let mut cursor = reader.cursor(int_off);
    for _ in 0..int_count {
        let key = cursor.u32()?;
        let fields = read_fields(reader, &mut cursor)?;
        fields.check_ordinals(reader, ext_count, plat_count)?;
        integer_objects.push(PackagedObject {
            key,
            extension: fields.extension,
            platforms: fields.platforms,
            data: fields.data,
        });
    }

    let mut stubs = Vec::new();
    let mut cursor = reader.cursor(ref_off);
    for _ in 0..ref_count {
        let index = cursor.usize()?;
        let platforms = cursor.u32()?;
        if index >= stub_count {
            return Err(reader.error(format!("stub index {index} out of range ({stub_count} stubs)")));
        }
        check_mask(reader, platforms, plat_count)?;
        stubs.push(StubRef { index, platforms });
    }

    Ok(PackagedUnit {
        hash,
        hash_objects,
        integer_objects,
        stubs,
    })
}

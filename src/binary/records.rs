//! Object records shared by PSPLC units and PSPLP unit sections.
//!
//! ```text
//! hash record     hash (20) | ext | platforms | flags | length | offset × copies
//! integer record  key       | ext | platforms | flags | length | offset × copies
//! ```
//!
//! `copies` is the number of byte orders the container stores. A neutral
//! object stores its data once and repeats the offset for every copy.

use super::reader::Cursor;
use super::{Endianness, FieldReader, FieldWriter, Region, to_u32};
use crate::diagnostics::Where;
use crate::error::{Error, Result};
use crate::hash::HASH_LEN;
use crate::indexer::{ALL_PLATFORMS, ObjectData};

/// The object holds one copy per byte order.
pub(crate) const FLAG_SENSITIVE: u32 = 1;

pub(crate) fn hash_record_len(endianness: Endianness) -> usize {
    HASH_LEN + endianness.field_width() * (4 + endianness.orders().len())
}

pub(crate) fn integer_record_len(endianness: Endianness) -> usize {
    endianness.field_width() * (5 + endianness.orders().len())
}

/// Place the copies `endianness` needs into `region`; offsets are relative
/// to the region, one per stored byte order.
pub(crate) fn place_data(
    region: &mut Region,
    data: &ObjectData,
    endianness: Endianness,
    describe: impl Fn() -> String,
    at: &Where,
) -> Result<Vec<usize>> {
    if let ObjectData::Neutral(bytes) = data {
        let offset = region.place(bytes)?;
        return Ok(vec![offset; endianness.orders().len()]);
    }
    endianness
        .orders()
        .iter()
        .map(|order| {
            let bytes = data.in_order(*order).ok_or_else(|| Error::Dependency {
                at: at.clone(),
                message: format!(
                    "{} has no {order}-endian copy and cannot be stored in a {endianness}-endian container",
                    describe()
                ),
            })?;
            region.place(bytes)
        })
        .collect()
}

/// Write the fields following a record's key.
pub(crate) fn write_fields(
    out: &mut FieldWriter,
    extension: u32,
    platforms: u32,
    data: &ObjectData,
    offsets: &[usize],
    base: usize,
    at: &Where,
) -> Result<()> {
    out.u32(extension)?;
    out.u32(platforms)?;
    out.u32(if data.is_sensitive() { FLAG_SENSITIVE } else { 0 })?;
    out.u32(to_u32(data.len(), "object length", at)?)?;
    for offset in offsets {
        out.u32(to_u32(base + offset, "data offset", at)?)?;
    }
    Ok(())
}

/// Fields of a record read back from a container.
#[derive(Debug)]
pub(crate) struct DecodedFields {
    pub extension: u32,
    pub platforms: u32,
    pub data: ObjectData,
}

impl DecodedFields {
    /// Check the ordinals refer to the container's tables.
    pub(crate) fn check_ordinals(&self, reader: &FieldReader<'_>, extensions: usize, platforms: usize) -> Result<()> {
        if self.extension as usize >= extensions {
            return Err(reader.error(format!(
                "extension ordinal {} out of range ({extensions} extensions)",
                self.extension
            )));
        }
        check_mask(reader, self.platforms, platforms)
    }
}

/// Check a platform mask only sets bits for known platforms.
pub(crate) fn check_mask(reader: &FieldReader<'_>, mask: u32, platforms: usize) -> Result<()> {
    if mask == ALL_PLATFORMS || platforms >= 32 || mask >> platforms == 0 {
        return Ok(());
    }
    Err(reader.error(format!("platform mask {mask:#x} refers to unknown platforms ({platforms} known)")))
}

pub(crate) fn read_fields(reader: &FieldReader<'_>, cursor: &mut Cursor<'_, '_>) -> Result<DecodedFields> {
    let extension = cursor.u32()?;
    let platforms = cursor.u32()?;
    let flags = cursor.u32()?;
    if flags & !FLAG_SENSITIVE != 0 {
        return Err(reader.error(format!("unknown object flags {flags:#x}")));
    }
    let length = cursor.usize()?;

    let orders = reader.endianness().orders();
    let mut copies = Vec::with_capacity(orders.len());
    for _ in orders {
        let offset = cursor.usize()?;
        copies.push(reader.bytes_at(offset, length)?.to_vec());
    }

    let data = if flags & FLAG_SENSITIVE == 0 {
        let first = copies
            .into_iter()
            .next()
            .ok_or_else(|| reader.error("object has no data copy"))?;
        ObjectData::Neutral(first)
    } else {
        let mut little = None;
        let mut big = None;
        for (order, copy) in orders.iter().zip(copies) {
            match order {
                super::ByteOrder::Little => little = Some(copy),
                super::ByteOrder::Big => big = Some(copy),
            }
        }
        ObjectData::Sensitive { little, big }
    };
    Ok(DecodedFields {
        extension,
        platforms,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::{ByteOrder, DATA_ALIGNMENT};
    use crate::diagnostics::Phase;

    #[test]
    fn test_neutral_data_is_stored_once() {
        let mut region = Region::new(DATA_ALIGNMENT);
        let data = ObjectData::Neutral(vec![1, 2, 3]);
        let offsets = place_data(&mut region, &data, Endianness::Bi, || "x".into(), &Where::default()).unwrap();
        assert_eq!(offsets, vec![0, 0]);
        assert_eq!(region.len(), 3);
    }

    #[test]
    fn test_missing_order_is_a_dependency_error() {
        let mut region = Region::new(DATA_ALIGNMENT);
        let data = ObjectData::Sensitive {
            little: Some(vec![1, 0, 0, 0]),
            big: None,
        };
        let at = Where::phase(Phase::Package);
        let err = place_data(&mut region, &data, Endianness::Bi, || "integer 1".into(), &at).unwrap_err();
        assert!(matches!(err, Error::Dependency { .. }));
        assert!(err.to_string().contains("integer 1 has no big-endian copy"));
    }

    #[test]
    fn test_fields_round_trip_sensitive_copies() {
        let data = ObjectData::from_native(&5u32.to_ne_bytes(), Some(&5u32.swap_bytes().to_ne_bytes()));
        let mut region = Region::new(DATA_ALIGNMENT);
        let offsets = place_data(&mut region, &data, Endianness::Bi, String::new, &Where::default()).unwrap();

        let record_len = integer_record_len(Endianness::Bi) - 8;
        let mut out = FieldWriter::new(Endianness::Bi);
        write_fields(&mut out, 0, 0b10, &data, &offsets, record_len, &Where::default()).unwrap();
        out.bytes(region.as_bytes()).unwrap();
        let bytes = out.finish();

        let reader = FieldReader::new(&bytes, Endianness::Bi, "test", Where::default());
        let mut cursor = reader.cursor(0);
        let fields = read_fields(&reader, &mut cursor).unwrap();
        assert_eq!(fields.platforms, 0b10);
        assert_eq!(fields.data.in_order(ByteOrder::Big), Some(&5u32.to_be_bytes()[..]));
        assert_eq!(fields.data.in_order(ByteOrder::Little), Some(&5u32.to_le_bytes()[..]));
        assert!(fields.check_ordinals(&reader, 1, 2).is_ok());
        assert!(fields.check_ordinals(&reader, 1, 1).is_err());
        assert!(fields.check_ordinals(&reader, 0, 2).is_err());
    }
}

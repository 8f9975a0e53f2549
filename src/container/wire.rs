//! The on-disk envelope of a container.
//!
//! Little-endian throughout. The file is a magic-tagged object table; every
//! dataset payload is written chunk by chunk in row-major chunk order, each
//! chunk deflated at the dataset's compression level. Unchunked payloads are
//! stored raw.

use super::{Attribute, DatasetData, DatasetStorage, Extent, Node, NodeBody};
use crate::container::{
    AttrType, AttributeValue, CompoundLayout, ElementType, FieldDef, FieldKind, ScalarType,
};
use crate::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use std::collections::BTreeMap;
use std::io::{Read, Write};

const MAGIC: &[u8; 4] = b"BAGC";
const FORMAT_VERSION: u16 = 1;

pub(super) fn save<W: Write>(nodes: &[Node], writer: &mut W) -> Result<()> {
    writer.write_all(MAGIC)?;
    writer.write_u16::<LittleEndian>(FORMAT_VERSION)?;
    writer.write_u32::<LittleEndian>(nodes.len() as u32)?;
    for node in nodes {
        write_str(writer, &node.path)?;
        match &node.body {
            NodeBody::Group => writer.write_u8(0)?,
            NodeBody::Dataset(storage) => writer.write_u8(match storage.data {
                DatasetData::Fixed(_) => 1,
                DatasetData::Records(_) => 2,
            })?,
        }
        write_attrs(writer, &node.attrs)?;
        if let NodeBody::Dataset(storage) = &node.body {
            write_storage(writer, storage)?;
        }
    }
    Ok(())
}

pub(super) fn load<R: Read>(reader: &mut R) -> Result<Vec<Node>> {
    let mut magic = [0; 4];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(Error::CorruptContainer("bad magic".to_string()));
    }
    let version = reader.read_u16::<LittleEndian>()?;
    if version != FORMAT_VERSION {
        return Err(Error::CorruptContainer(format!(
            "unsupported envelope version {version}"
        )));
    }
    let count = reader.read_u32::<LittleEndian>()?;
    let mut nodes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let path = read_str(reader)?;
        let kind = reader.read_u8()?;
        let attrs = read_attrs(reader)?;
        let body = match kind {
            0 => NodeBody::Group,
            1 | 2 => NodeBody::Dataset(read_storage(reader, kind == 2)?),
            other => {
                return Err(Error::CorruptContainer(format!(
                    "unknown object kind {other}"
                )));
            }
        };
        nodes.push(Node { path, attrs, body });
    }
    Ok(nodes)
}

// Strings.

fn write_str<W: Write>(writer: &mut W, s: &str) -> Result<()> {
    writer.write_u16::<LittleEndian>(s.len() as u16)?;
    writer.write_all(s.as_bytes())?;
    Ok(())
}

fn read_str<R: Read>(reader: &mut R) -> Result<String> {
    let len = reader.read_u16::<LittleEndian>()?;
    let mut bytes = vec![0; len as usize];
    reader.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|_| Error::CorruptContainer("non-utf8 name".to_string()))
}

// Attributes.

fn write_attrs<W: Write>(writer: &mut W, attrs: &BTreeMap<String, Attribute>) -> Result<()> {
    writer.write_u16::<LittleEndian>(attrs.len() as u16)?;
    for (name, attr) in attrs {
        write_str(writer, name)?;
        match attr.declared {
            AttrType::F32 => writer.write_u8(0)?,
            AttrType::F64 => writer.write_u8(1)?,
            AttrType::U8 => writer.write_u8(2)?,
            AttrType::U32 => writer.write_u8(3)?,
            AttrType::U64 => writer.write_u8(4)?,
            AttrType::String(max) => {
                writer.write_u8(5)?;
                writer.write_u32::<LittleEndian>(max as u32)?;
            }
        }
        match &attr.value {
            AttributeValue::F32(value) => writer.write_f32::<LittleEndian>(*value)?,
            AttributeValue::F64(value) => writer.write_f64::<LittleEndian>(*value)?,
            AttributeValue::U8(value) => writer.write_u8(*value)?,
            AttributeValue::U32(value) => writer.write_u32::<LittleEndian>(*value)?,
            AttributeValue::U64(value) => writer.write_u64::<LittleEndian>(*value)?,
            AttributeValue::String(value) => {
                writer.write_u32::<LittleEndian>(value.len() as u32)?;
                writer.write_all(value.as_bytes())?;
            }
        }
    }
    Ok(())
}

fn read_attrs<R: Read>(reader: &mut R) -> Result<BTreeMap<String, Attribute>> {
    let count = reader.read_u16::<LittleEndian>()?;
    let mut attrs = BTreeMap::new();
    for _ in 0..count {
        let name = read_str(reader)?;
        let declared = match reader.read_u8()? {
            0 => AttrType::F32,
            1 => AttrType::F64,
            2 => AttrType::U8,
            3 => AttrType::U32,
            4 => AttrType::U64,
            5 => AttrType::String(reader.read_u32::<LittleEndian>()? as usize),
            other => {
                return Err(Error::CorruptContainer(format!(
                    "unknown attribute type {other}"
                )));
            }
        };
        let value = match declared {
            AttrType::F32 => AttributeValue::F32(reader.read_f32::<LittleEndian>()?),
            AttrType::F64 => AttributeValue::F64(reader.read_f64::<LittleEndian>()?),
            AttrType::U8 => AttributeValue::U8(reader.read_u8()?),
            AttrType::U32 => AttributeValue::U32(reader.read_u32::<LittleEndian>()?),
            AttrType::U64 => AttributeValue::U64(reader.read_u64::<LittleEndian>()?),
            AttrType::String(_) => {
                let len = reader.read_u32::<LittleEndian>()?;
                let mut bytes = vec![0; len as usize];
                reader.read_exact(&mut bytes)?;
                AttributeValue::String(String::from_utf8(bytes).map_err(|_| {
                    Error::CorruptContainer("non-utf8 attribute".to_string())
                })?)
            }
        };
        attrs.insert(name, Attribute { declared, value });
    }
    Ok(attrs)
}

// Element types.

fn write_element<W: Write>(writer: &mut W, element: &ElementType) -> Result<()> {
    match element {
        ElementType::Scalar(scalar) => {
            writer.write_u8(0)?;
            writer.write_u8(match scalar {
                ScalarType::F32 => 0,
                ScalarType::F64 => 1,
                ScalarType::U8 => 2,
                ScalarType::U16 => 3,
                ScalarType::U32 => 4,
                ScalarType::U64 => 5,
            })?;
        }
        ElementType::Compound(layout) => {
            writer.write_u8(1)?;
            writer.write_u16::<LittleEndian>(layout.fields().len() as u16)?;
            for field in layout.fields() {
                write_str(writer, &field.name)?;
                match field.kind {
                    FieldKind::Bool => writer.write_u8(0)?,
                    FieldKind::F32 => writer.write_u8(1)?,
                    FieldKind::F64 => writer.write_u8(2)?,
                    FieldKind::U8 => writer.write_u8(3)?,
                    FieldKind::U16 => writer.write_u8(4)?,
                    FieldKind::U32 => writer.write_u8(5)?,
                    FieldKind::U64 => writer.write_u8(6)?,
                    FieldKind::String => writer.write_u8(7)?,
                    FieldKind::F32Array(n) => {
                        writer.write_u8(8)?;
                        writer.write_u32::<LittleEndian>(n)?;
                    }
                }
            }
        }
    }
    Ok(())
}

fn read_element<R: Read>(reader: &mut R) -> Result<ElementType> {
    match reader.read_u8()? {
        0 => {
            let scalar = match reader.read_u8()? {
                0 => ScalarType::F32,
                1 => ScalarType::F64,
                2 => ScalarType::U8,
                3 => ScalarType::U16,
                4 => ScalarType::U32,
                5 => ScalarType::U64,
                other => {
                    return Err(Error::CorruptContainer(format!(
                        "unknown scalar type {other}"
                    )));
                }
            };
            Ok(ElementType::Scalar(scalar))
        }
        1 => {
            let count = reader.read_u16::<LittleEndian>()?;
            let mut fields = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let name = read_str(reader)?;
                let kind = match reader.read_u8()? {
                    0 => FieldKind::Bool,
                    1 => FieldKind::F32,
                    2 => FieldKind::F64,
                    3 => FieldKind::U8,
                    4 => FieldKind::U16,
                    5 => FieldKind::U32,
                    6 => FieldKind::U64,
                    7 => FieldKind::String,
                    8 => FieldKind::F32Array(reader.read_u32::<LittleEndian>()?),
                    other => {
                        return Err(Error::CorruptContainer(format!(
                            "unknown field kind {other}"
                        )));
                    }
                };
                fields.push(FieldDef { name, kind });
            }
            Ok(ElementType::Compound(CompoundLayout::new(fields)))
        }
        other => Err(Error::CorruptContainer(format!(
            "unknown element tag {other}"
        ))),
    }
}

// Dataset storage.

fn write_storage<W: Write>(writer: &mut W, storage: &DatasetStorage) -> Result<()> {
    write_element(writer, &storage.element)?;
    writer.write_u8(storage.dims.len() as u8)?;
    for &dim in &storage.dims {
        writer.write_u64::<LittleEndian>(dim)?;
    }
    for max in &storage.max_dims {
        match max {
            Extent::Fixed(len) => {
                writer.write_u8(0)?;
                writer.write_u64::<LittleEndian>(*len)?;
            }
            Extent::Unlimited => {
                writer.write_u8(1)?;
                writer.write_u64::<LittleEndian>(0)?;
            }
        }
    }
    match &storage.chunk {
        Some(chunk) => {
            writer.write_u8(1)?;
            for &dim in chunk {
                writer.write_u64::<LittleEndian>(dim)?;
            }
        }
        None => writer.write_u8(0)?,
    }
    writer.write_u8(storage.compression)?;
    match &storage.fill {
        Some(fill) => {
            writer.write_u8(1)?;
            writer.write_u32::<LittleEndian>(fill.len() as u32)?;
            writer.write_all(fill)?;
        }
        None => writer.write_u8(0)?,
    }
    match &storage.data {
        DatasetData::Fixed(data) => {
            write_fixed_payload(writer, storage, data)?;
        }
        DatasetData::Records(records) => {
            writer.write_u64::<LittleEndian>(records.len() as u64)?;
            for record in records {
                writer.write_u32::<LittleEndian>(record.len() as u32)?;
                writer.write_all(record)?;
            }
        }
    }
    Ok(())
}

fn read_storage<R: Read>(reader: &mut R, var_len: bool) -> Result<DatasetStorage> {
    let element = read_element(reader)?;
    let rank = reader.read_u8()? as usize;
    if rank == 0 || rank > 2 {
        return Err(Error::CorruptContainer(format!("dataset rank {rank}")));
    }
    let mut dims = Vec::with_capacity(rank);
    for _ in 0..rank {
        dims.push(reader.read_u64::<LittleEndian>()?);
    }
    let mut max_dims = Vec::with_capacity(rank);
    for _ in 0..rank {
        let unlimited = reader.read_u8()? == 1;
        let len = reader.read_u64::<LittleEndian>()?;
        max_dims.push(if unlimited {
            Extent::Unlimited
        } else {
            Extent::Fixed(len)
        });
    }
    let chunk = if reader.read_u8()? == 1 {
        let mut chunk = Vec::with_capacity(rank);
        for _ in 0..rank {
            chunk.push(reader.read_u64::<LittleEndian>()?);
        }
        Some(chunk)
    } else {
        None
    };
    let compression = reader.read_u8()?;
    let fill = if reader.read_u8()? == 1 {
        let len = reader.read_u32::<LittleEndian>()?;
        let mut bytes = vec![0; len as usize];
        reader.read_exact(&mut bytes)?;
        Some(bytes)
    } else {
        None
    };

    let mut storage = DatasetStorage {
        element,
        dims,
        max_dims,
        chunk,
        compression,
        fill,
        data: DatasetData::Records(Vec::new()),
    };
    if var_len {
        let count = reader.read_u64::<LittleEndian>()?;
        let mut records = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let len = reader.read_u32::<LittleEndian>()?;
            let mut bytes = vec![0; len as usize];
            reader.read_exact(&mut bytes)?;
            records.push(bytes);
        }
        storage.data = DatasetData::Records(records);
    } else {
        storage.data = DatasetData::Fixed(read_fixed_payload(reader, &storage)?);
    }
    Ok(storage)
}

// Chunked payloads.

/// The byte ranges of one stored chunk, as (start, len) pairs per row run.
fn chunk_runs(dims: &[u64], chunk: &[u64], element_size: usize, index: u64) -> Vec<(usize, usize)> {
    match dims.len() {
        1 => {
            let start = index * chunk[0];
            let end = (start + chunk[0]).min(dims[0]);
            vec![(
                start as usize * element_size,
                (end - start) as usize * element_size,
            )]
        }
        _ => {
            let chunk_cols = dims[1].div_ceil(chunk[1]);
            let (ci, cj) = (index / chunk_cols, index % chunk_cols);
            let row_start = ci * chunk[0];
            let row_end = (row_start + chunk[0]).min(dims[0]);
            let col_start = cj * chunk[1];
            let col_end = (col_start + chunk[1]).min(dims[1]);
            (row_start..row_end)
                .map(|row| {
                    (
                        (row * dims[1] + col_start) as usize * element_size,
                        (col_end - col_start) as usize * element_size,
                    )
                })
                .collect()
        }
    }
}

fn chunk_count(dims: &[u64], chunk: &[u64]) -> u64 {
    dims.iter()
        .zip(chunk)
        .map(|(&dim, &c)| dim.div_ceil(c))
        .product()
}

fn write_fixed_payload<W: Write>(
    writer: &mut W,
    storage: &DatasetStorage,
    data: &[u8],
) -> Result<()> {
    match &storage.chunk {
        Some(chunk) => {
            let element_size = storage.element_size();
            let count = chunk_count(&storage.dims, chunk);
            writer.write_u32::<LittleEndian>(count as u32)?;
            for index in 0..count {
                let mut raw = Vec::new();
                for (start, len) in chunk_runs(&storage.dims, chunk, element_size, index) {
                    raw.extend_from_slice(&data[start..start + len]);
                }
                let stored = if storage.compression > 0 {
                    deflate(&raw, storage.compression)?
                } else {
                    raw.clone()
                };
                writer.write_u32::<LittleEndian>(raw.len() as u32)?;
                writer.write_u32::<LittleEndian>(stored.len() as u32)?;
                writer.write_all(&stored)?;
            }
        }
        None => {
            writer.write_u64::<LittleEndian>(data.len() as u64)?;
            writer.write_all(data)?;
        }
    }
    Ok(())
}

fn read_fixed_payload<R: Read>(reader: &mut R, storage: &DatasetStorage) -> Result<Vec<u8>> {
    let element_size = storage.element_size();
    let total: u64 = storage.dims.iter().product::<u64>() * element_size as u64;
    let mut data = vec![0; total as usize];
    match &storage.chunk {
        Some(chunk) => {
            let expected = chunk_count(&storage.dims, chunk);
            let count = reader.read_u32::<LittleEndian>()?;
            if u64::from(count) != expected {
                return Err(Error::CorruptContainer(format!(
                    "expected {expected} chunks, found {count}"
                )));
            }
            for index in 0..expected {
                let raw_len = reader.read_u32::<LittleEndian>()? as usize;
                let stored_len = reader.read_u32::<LittleEndian>()? as usize;
                let mut stored = vec![0; stored_len];
                reader.read_exact(&mut stored)?;
                let raw = if storage.compression > 0 {
                    inflate(&stored, raw_len)?
                } else {
                    stored
                };
                if raw.len() != raw_len {
                    return Err(Error::CorruptContainer("chunk length mismatch".to_string()));
                }
                let mut cursor = 0;
                for (start, len) in chunk_runs(&storage.dims, chunk, element_size, index) {
                    data[start..start + len].copy_from_slice(&raw[cursor..cursor + len]);
                    cursor += len;
                }
            }
        }
        None => {
            let len = reader.read_u64::<LittleEndian>()?;
            if len != total {
                return Err(Error::CorruptContainer(format!(
                    "payload holds {len} bytes, dataset needs {total}"
                )));
            }
            reader.read_exact(&mut data)?;
        }
    }
    Ok(data)
}

fn deflate(bytes: &[u8], level: u8) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(u32::from(level)));
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

fn inflate(bytes: &[u8], expected: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(expected);
    ZlibDecoder::new(bytes).read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_runs_cover_partial_chunks() {
        // 3x4 of 1-byte elements in 2x2 chunks -> chunk grid is 2x2.
        let runs = chunk_runs(&[3, 4], &[2, 2], 1, 3);
        // Bottom-right chunk: row 2, columns 2..4.
        assert_eq!(vec![(10, 2)], runs);
        assert_eq!(4, chunk_count(&[3, 4], &[2, 2]));
    }

    #[test]
    fn deflate_round_trip() {
        let bytes: Vec<u8> = (0..=255).cycle().take(10_000).collect();
        let stored = deflate(&bytes, 6).unwrap();
        assert!(stored.len() < bytes.len());
        assert_eq!(bytes, inflate(&stored, bytes.len()).unwrap());
    }
}

//! Georeferenced metadata lookup layers.
//!
//! A georef metadata layer attaches per-cell survey metadata to one simple
//! layer: a `u16` index grid (`keys`) pointing into a table of compound
//! records (`values`) that conform to a named profile. Index 0 is reserved
//! for the well-known "no data" record, and records are append-only, so
//! existing indices never shift.

use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::container::{
    AttrType, AttributeValue, CompoundLayout, Container, DatasetHandle, DatasetSpec, ElementType,
    Extent, FieldDef, FieldKind, ScalarType,
};
use crate::descriptor::{GeorefMetadataDescriptor, LayerDescriptor};
use crate::layer::{check_read_region, check_write_region};
use crate::{Error, Result};

const METADATA_PROFILE: &str = "metadata_profile";

/// The type of one compound record field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueKind {
    /// A boolean field.
    Bool,
    /// An unsigned 32-bit field.
    UInt32,
    /// A 32-bit float field.
    Float32,
    /// A string field.
    String,
}

/// One field value of a compound record.
#[derive(Clone, Debug, PartialEq)]
pub enum CompoundValue {
    /// A boolean value.
    Bool(bool),
    /// An unsigned 32-bit value.
    UInt32(u32),
    /// A 32-bit float value.
    Float32(f32),
    /// A string value.
    String(String),
}

impl CompoundValue {
    /// Returns the kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            CompoundValue::Bool(_) => ValueKind::Bool,
            CompoundValue::UInt32(_) => ValueKind::UInt32,
            CompoundValue::Float32(_) => ValueKind::Float32,
            CompoundValue::String(_) => ValueKind::String,
        }
    }

    /// The profile-defined zero value of a kind.
    pub fn zero(kind: ValueKind) -> CompoundValue {
        match kind {
            ValueKind::Bool => CompoundValue::Bool(false),
            ValueKind::UInt32 => CompoundValue::UInt32(0),
            ValueKind::Float32 => CompoundValue::Float32(0.),
            ValueKind::String => CompoundValue::String(String::new()),
        }
    }

    /// Returns the value as a bool.
    ///
    /// # Examples
    ///
    /// ```
    /// # use bag::layer::CompoundValue;
    /// assert!(CompoundValue::Bool(true).as_bool().unwrap());
    /// assert!(CompoundValue::Float32(1.).as_bool().is_err());
    /// ```
    pub fn as_bool(&self) -> Result<bool> {
        match *self {
            CompoundValue::Bool(value) => Ok(value),
            _ => Err(Error::InvalidCast("value is not a bool".to_string())),
        }
    }

    /// Returns the value as a `u32`.
    pub fn as_u32(&self) -> Result<u32> {
        match *self {
            CompoundValue::UInt32(value) => Ok(value),
            _ => Err(Error::InvalidCast("value is not a u32".to_string())),
        }
    }

    /// Returns the value as an `f32`.
    pub fn as_f32(&self) -> Result<f32> {
        match *self {
            CompoundValue::Float32(value) => Ok(value),
            _ => Err(Error::InvalidCast("value is not an f32".to_string())),
        }
    }

    /// Returns the value as a string slice.
    pub fn as_string(&self) -> Result<&str> {
        match self {
            CompoundValue::String(value) => Ok(value),
            _ => Err(Error::InvalidCast("value is not a string".to_string())),
        }
    }
}

/// One field of a record definition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDefinition {
    /// The field name.
    pub name: String,
    /// The field type.
    pub kind: ValueKind,
}

impl FieldDefinition {
    /// Creates a field definition.
    pub fn new(name: &str, kind: ValueKind) -> FieldDefinition {
        FieldDefinition {
            name: name.to_string(),
            kind,
        }
    }
}

/// An ordered list of field values forming one record.
pub type Record = Vec<CompoundValue>;

/// The ordered field list a profile fixes for its records.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordDefinition {
    fields: Vec<FieldDefinition>,
}

impl RecordDefinition {
    /// Creates a definition from its fields.
    pub fn new(fields: Vec<FieldDefinition>) -> RecordDefinition {
        RecordDefinition { fields }
    }

    /// Returns the fields in order.
    pub fn fields(&self) -> &[FieldDefinition] {
        &self.fields
    }

    /// Returns the index of the named field.
    pub fn field_index(&self, name: &str) -> Result<usize> {
        self.fields
            .iter()
            .position(|field| field.name == name)
            .ok_or_else(|| Error::NotFound(format!("record field {name}")))
    }

    /// Checks a record against this definition.
    pub fn validate(&self, record: &Record) -> Result<()> {
        if record.len() != self.fields.len() {
            return Err(Error::InvalidCast(format!(
                "record holds {} fields, the profile defines {}",
                record.len(),
                self.fields.len()
            )));
        }
        for (value, field) in record.iter().zip(&self.fields) {
            if value.kind() != field.kind {
                return Err(Error::InvalidCast(format!(
                    "field {} holds the wrong type",
                    field.name
                )));
            }
        }
        Ok(())
    }

    /// Returns the profile-defined zero record stored at index 0.
    pub fn zero_record(&self) -> Record {
        self.fields
            .iter()
            .map(|field| CompoundValue::zero(field.kind))
            .collect()
    }

    fn to_layout(&self) -> CompoundLayout {
        CompoundLayout::new(
            self.fields
                .iter()
                .map(|field| {
                    FieldDef::new(
                        &field.name,
                        match field.kind {
                            ValueKind::Bool => FieldKind::Bool,
                            ValueKind::UInt32 => FieldKind::U32,
                            ValueKind::Float32 => FieldKind::F32,
                            ValueKind::String => FieldKind::String,
                        },
                    )
                })
                .collect(),
        )
    }

    fn from_layout(layout: &CompoundLayout) -> Result<RecordDefinition> {
        let fields = layout
            .fields()
            .iter()
            .map(|field| {
                let kind = match field.kind {
                    FieldKind::Bool => ValueKind::Bool,
                    FieldKind::U32 => ValueKind::UInt32,
                    FieldKind::F32 => ValueKind::Float32,
                    FieldKind::String => ValueKind::String,
                    _ => {
                        return Err(Error::TypeMismatch(format!(
                            "record field {} has an unsupported type",
                            field.name
                        )));
                    }
                };
                Ok(FieldDefinition {
                    name: field.name.clone(),
                    kind,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(RecordDefinition { fields })
    }
}

/// A known record profile.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Profile {
    /// The NOAA Office of Coast Survey 2022-10 profile.
    NoaaOcs2022_10,
    /// A caller-defined profile with the given name.
    Custom(String),
}

impl Profile {
    /// Returns the profile name stored in the file.
    pub fn name(&self) -> &str {
        match self {
            Profile::NoaaOcs2022_10 => "NOAA_OCS_2022_10",
            Profile::Custom(name) => name,
        }
    }

    /// Parses a stored profile name.
    pub fn from_name(name: &str) -> Profile {
        match name {
            "NOAA_OCS_2022_10" => Profile::NoaaOcs2022_10,
            other => Profile::Custom(other.to_string()),
        }
    }

    /// Returns the record definition of a known profile.
    pub fn definition(&self) -> Option<RecordDefinition> {
        match self {
            Profile::NoaaOcs2022_10 => Some(noaa_ocs_2022_10_definition()),
            Profile::Custom(_) => None,
        }
    }
}

/// The field list of the NOAA_OCS_2022_10 profile.
pub fn noaa_ocs_2022_10_definition() -> RecordDefinition {
    RecordDefinition::new(vec![
        FieldDefinition::new("significant_features", ValueKind::Bool),
        FieldDefinition::new("feature_least_depth", ValueKind::Bool),
        FieldDefinition::new("feature_size", ValueKind::Float32),
        FieldDefinition::new("feature_size_var", ValueKind::Float32),
        FieldDefinition::new("coverage", ValueKind::Bool),
        FieldDefinition::new("bathy_coverage", ValueKind::Bool),
        FieldDefinition::new("horizontal_uncert_fixed", ValueKind::Float32),
        FieldDefinition::new("horizontal_uncert_var", ValueKind::Float32),
        FieldDefinition::new("survey_date_start", ValueKind::String),
        FieldDefinition::new("survey_date_end", ValueKind::String),
        FieldDefinition::new("source_institution", ValueKind::String),
        FieldDefinition::new("source_survey_id", ValueKind::String),
        FieldDefinition::new("source_survey_index", ValueKind::UInt32),
        FieldDefinition::new("license_name", ValueKind::String),
        FieldDefinition::new("license_url", ValueKind::String),
    ])
}

/// Builds a NOAA_OCS_2022_10 record in profile field order.
#[allow(clippy::too_many_arguments)]
pub fn create_record_noaa_ocs_2022_10(
    significant_features: bool,
    feature_least_depth: bool,
    feature_size: f32,
    feature_size_var: f32,
    coverage: bool,
    bathy_coverage: bool,
    horizontal_uncert_fixed: f32,
    horizontal_uncert_var: f32,
    survey_date_start: &str,
    survey_date_end: &str,
    source_institution: &str,
    source_survey_id: &str,
    source_survey_index: u32,
    license_name: &str,
    license_url: &str,
) -> Record {
    vec![
        CompoundValue::Bool(significant_features),
        CompoundValue::Bool(feature_least_depth),
        CompoundValue::Float32(feature_size),
        CompoundValue::Float32(feature_size_var),
        CompoundValue::Bool(coverage),
        CompoundValue::Bool(bathy_coverage),
        CompoundValue::Float32(horizontal_uncert_fixed),
        CompoundValue::Float32(horizontal_uncert_var),
        CompoundValue::String(survey_date_start.to_string()),
        CompoundValue::String(survey_date_end.to_string()),
        CompoundValue::String(source_institution.to_string()),
        CompoundValue::String(source_survey_id.to_string()),
        CompoundValue::UInt32(source_survey_index),
        CompoundValue::String(license_name.to_string()),
        CompoundValue::String(license_url.to_string()),
    ]
}

fn serialize_record(record: &Record) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    for value in record {
        match value {
            CompoundValue::Bool(v) => bytes.write_u8(u8::from(*v))?,
            CompoundValue::UInt32(v) => bytes.write_u32::<NativeEndian>(*v)?,
            CompoundValue::Float32(v) => bytes.write_f32::<NativeEndian>(*v)?,
            CompoundValue::String(v) => {
                bytes.write_u32::<NativeEndian>(v.len() as u32)?;
                bytes.write_all(v.as_bytes())?;
            }
        }
    }
    Ok(bytes)
}

fn deserialize_record(definition: &RecordDefinition, mut bytes: &[u8]) -> Result<Record> {
    let mut record = Vec::with_capacity(definition.fields().len());
    for field in definition.fields() {
        let value = match field.kind {
            ValueKind::Bool => CompoundValue::Bool(bytes.read_u8()? != 0),
            ValueKind::UInt32 => CompoundValue::UInt32(bytes.read_u32::<NativeEndian>()?),
            ValueKind::Float32 => CompoundValue::Float32(bytes.read_f32::<NativeEndian>()?),
            ValueKind::String => {
                let len = bytes.read_u32::<NativeEndian>()? as usize;
                let mut buffer = vec![0; len];
                bytes.read_exact(&mut buffer)?;
                CompoundValue::String(String::from_utf8(buffer).map_err(|_| {
                    Error::CorruptContainer(format!("record field {} is not utf-8", field.name))
                })?)
            }
        };
        record.push(value);
    }
    Ok(record)
}

/// The record table of a georef metadata layer.
#[derive(Debug)]
pub struct ValueTable {
    definition: RecordDefinition,
    records: Vec<Record>,
    handle: DatasetHandle,
}

impl ValueTable {
    /// Returns the record definition.
    pub fn definition(&self) -> &RecordDefinition {
        &self.definition
    }

    /// Returns every record, index 0 first.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Returns the index of the named field.
    pub fn field_index(&self, name: &str) -> Result<usize> {
        self.definition.field_index(name)
    }

    /// Validates a record against the profile and appends it, returning the
    /// new record index (never 0).
    pub fn add_record(&mut self, container: &mut Container, record: Record) -> Result<u16> {
        self.definition.validate(&record)?;
        if self.records.len() > usize::from(u16::MAX) {
            return Err(Error::BoundsExceeded("value table is full".to_string()));
        }
        container.append_record(self.handle, serialize_record(&record)?)?;
        self.records.push(record);
        Ok((self.records.len() - 1) as u16)
    }

    /// Returns one field of one record, by field index.
    pub fn get_value(&self, record_index: u16, field_index: usize) -> Result<&CompoundValue> {
        let record = self
            .records
            .get(usize::from(record_index))
            .ok_or_else(|| Error::BoundsExceeded(format!("record {record_index}")))?;
        record
            .get(field_index)
            .ok_or_else(|| Error::NotFound(format!("record field #{field_index}")))
    }

    /// Returns one field of one record, by field name.
    pub fn get_value_by_name(&self, record_index: u16, name: &str) -> Result<&CompoundValue> {
        self.get_value(record_index, self.field_index(name)?)
    }
}

/// A georeferenced metadata lookup layer.
#[derive(Debug)]
pub struct GeorefMetadataLayer {
    descriptor: LayerDescriptor,
    keys: DatasetHandle,
    value_table: ValueTable,
}

impl GeorefMetadataLayer {
    /// Creates the `keys` grid and `values` table under the layer's group.
    pub(crate) fn create(
        container: &mut Container,
        descriptor: GeorefMetadataDescriptor,
        definition: RecordDefinition,
    ) -> Result<GeorefMetadataLayer> {
        let group = descriptor.core.internal_path.clone();
        let dims = descriptor.core.dims;
        container.create_group(&group)?;

        let keys_path = format!("{group}/keys");
        let mut spec = DatasetSpec::new(
            ElementType::Scalar(ScalarType::U16),
            vec![dims.0, dims.1],
            vec![Extent::Fixed(dims.0), Extent::Fixed(dims.1)],
        );
        if descriptor.core.chunk_size > 0 {
            spec = spec.chunked(
                vec![descriptor.core.chunk_size, descriptor.core.chunk_size],
                descriptor.core.compression_level,
            );
        }
        let keys = container.create_dataset(&keys_path, spec)?;
        container.create_attr(&keys_path, METADATA_PROFILE, AttrType::String(256))?;
        container.write_attr(
            &keys_path,
            METADATA_PROFILE,
            AttributeValue::String(descriptor.profile.clone()),
        )?;

        let values_path = format!("{group}/values");
        let mut values_spec = DatasetSpec::new(
            ElementType::Compound(definition.to_layout()),
            vec![0],
            vec![Extent::Unlimited],
        );
        values_spec.var_len = true;
        let values = container.create_dataset(&values_path, values_spec)?;

        let mut value_table = ValueTable {
            definition,
            records: Vec::new(),
            handle: values,
        };
        // Index 0 is the well-known "no data" record.
        let zero = value_table.definition.zero_record();
        container.append_record(values, serialize_record(&zero)?)?;
        value_table.records.push(zero);

        Ok(GeorefMetadataLayer {
            descriptor: LayerDescriptor::GeorefMetadata(descriptor),
            keys,
            value_table,
        })
    }

    /// Opens the layer of the named host from the container.
    pub(crate) fn open(
        container: &Container,
        id: u32,
        host_layer: &str,
    ) -> Result<GeorefMetadataLayer> {
        let group = format!("/BAG_root/georef_metadata/{host_layer}");
        let keys_path = format!("{group}/keys");
        let values_path = format!("{group}/values");
        let keys = container.open_dataset(&keys_path)?;
        let values = container.open_dataset(&values_path)?;

        let dims = container.dataset_dims(keys)?;
        if dims.len() != 2 {
            return Err(Error::RankMismatch {
                expected: 2,
                actual: dims.len() as u8,
            });
        }
        let profile = container
            .read_attr(&keys_path, METADATA_PROFILE)
            .and_then(|value| Ok(value.as_str()?.to_string()))
            .unwrap_or_default();
        let chunk = container.dataset_chunk(keys)?.map(|c| c[0]).unwrap_or(0);
        let compression = container.dataset_compression(keys)?;
        let mut descriptor = GeorefMetadataDescriptor::new(
            id,
            &profile,
            host_layer,
            chunk,
            compression,
            (dims[0], dims[1]),
        )?;
        descriptor.core.internal_path = group;

        let definition = RecordDefinition::from_layout(
            container
                .dataset_element(values)?
                .as_compound()
                .ok_or_else(|| {
                    Error::TypeMismatch(format!("{values_path} is not a compound dataset"))
                })?,
        )?;
        let count = container.record_count(values)?;
        let mut records = Vec::with_capacity(count as usize);
        for index in 0..count {
            records.push(deserialize_record(
                &definition,
                container.read_record(values, index)?,
            )?);
        }
        if records.is_empty() {
            return Err(Error::CorruptContainer(format!(
                "{values_path} is missing the reserved record 0"
            )));
        }

        Ok(GeorefMetadataLayer {
            descriptor: LayerDescriptor::GeorefMetadata(descriptor),
            keys,
            value_table: ValueTable {
                definition,
                records,
                handle: values,
            },
        })
    }

    /// Returns the descriptor.
    pub fn descriptor(&self) -> &LayerDescriptor {
        &self.descriptor
    }

    /// Returns the descriptor for mutation.
    pub fn descriptor_mut(&mut self) -> &mut LayerDescriptor {
        &mut self.descriptor
    }

    /// Returns the value table.
    pub fn value_table(&self) -> &ValueTable {
        &self.value_table
    }

    /// Returns the value table for record insertion.
    pub fn value_table_mut(&mut self) -> &mut ValueTable {
        &mut self.value_table
    }

    /// Reads a region of the `u16` index grid as packed bytes.
    pub fn read(
        &self,
        container: &Container,
        row_start: u32,
        column_start: u32,
        row_end: u32,
        column_end: u32,
    ) -> Result<Vec<u8>> {
        let dims = container.dataset_dims(self.keys)?;
        let (rows, cols) = check_read_region(
            (dims[0], dims[1]),
            row_start,
            column_start,
            row_end,
            column_end,
        )?;
        container.read_hyperslab(
            self.keys,
            &[u64::from(row_start), u64::from(column_start)],
            &[rows, cols],
        )
    }

    /// Writes a region of the `u16` index grid; index 0 means "no record".
    pub fn write(
        &mut self,
        container: &mut Container,
        row_start: u32,
        column_start: u32,
        row_end: u32,
        column_end: u32,
        buffer: &[u8],
    ) -> Result<()> {
        let (rows, cols) = check_write_region(row_start, column_start, row_end, column_end)?;
        if buffer.len() as u64 != rows * cols * 2 {
            return Err(Error::InvalidReadSize);
        }
        container.write_hyperslab(
            self.keys,
            &[u64::from(row_start), u64::from(column_start)],
            &[rows, cols],
            buffer,
        )
    }

    /// Writes the descriptor's attributes to the container.
    pub fn flush_attributes(&self, container: &mut Container) -> Result<()> {
        let LayerDescriptor::GeorefMetadata(descriptor) = &self.descriptor else {
            return Err(Error::UnexpectedLayerDescriptorType);
        };
        let keys_path = format!("{}/keys", descriptor.core.internal_path);
        container.write_attr(
            &keys_path,
            METADATA_PROFILE,
            AttributeValue::String(descriptor.profile.clone()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> Record {
        create_record_noaa_ocs_2022_10(
            false,
            true,
            1234.5,
            765.4,
            true,
            false,
            9.87,
            1.23,
            "2019-04-01 00:00:00.0Z",
            "2019-04-01 12:00:00.0Z",
            "NOAA",
            "CD71EB77",
            42,
            "CC0",
            "https://creativecommons.org/publicdomain/zero/1.0/",
        )
    }

    #[test]
    fn record_serialization_round_trips() {
        let definition = noaa_ocs_2022_10_definition();
        let record = sample_record();
        let bytes = serialize_record(&record).unwrap();
        assert_eq!(record, deserialize_record(&definition, &bytes).unwrap());
    }

    #[test]
    fn validation_rejects_wrong_types() {
        let definition = noaa_ocs_2022_10_definition();
        let mut record = sample_record();
        record[2] = CompoundValue::Bool(true);
        assert!(matches!(
            definition.validate(&record),
            Err(Error::InvalidCast(_))
        ));
        record.truncate(3);
        assert!(definition.validate(&record).is_err());
    }

    #[test]
    fn add_record_never_returns_zero() {
        let mut container = Container::scratch();
        let descriptor =
            GeorefMetadataDescriptor::new(0, "NOAA_OCS_2022_10", "Elevation", 0, 0, (2, 2))
                .unwrap();
        let mut layer =
            GeorefMetadataLayer::create(&mut container, descriptor, noaa_ocs_2022_10_definition())
                .unwrap();
        let index = layer
            .value_table_mut()
            .add_record(&mut container, sample_record())
            .unwrap();
        assert_eq!(1, index);
        assert_eq!(2, layer.value_table().records().len());
        assert_eq!(
            1234.5,
            layer
                .value_table()
                .get_value_by_name(1, "feature_size")
                .unwrap()
                .as_f32()
                .unwrap()
        );
        // The reserved record decodes to zero values.
        assert_eq!(
            0.,
            layer
                .value_table()
                .get_value_by_name(0, "feature_size")
                .unwrap()
                .as_f32()
                .unwrap()
        );
    }

    #[test]
    fn unwritten_keys_read_as_zero() {
        let mut container = Container::scratch();
        let descriptor =
            GeorefMetadataDescriptor::new(0, "NOAA_OCS_2022_10", "Elevation", 0, 0, (2, 2))
                .unwrap();
        let layer =
            GeorefMetadataLayer::create(&mut container, descriptor, noaa_ocs_2022_10_definition())
                .unwrap();
        let bytes = layer.read(&container, 0, 0, 1, 1).unwrap();
        assert!(bytes.iter().all(|&b| b == 0));
    }
}

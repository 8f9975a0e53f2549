//! Pre-2.0 interleaved legacy layers.
//!
//! Early files stored several surfaces as one compound dataset per group
//! (NODE and ELEVATION). Each member surface is exposed as its own
//! read-only layer by projecting a single field out of the group records.
//! Writes are refused in every profile.

use crate::container::{AttributeValue, Container, DatasetHandle};
use crate::descriptor::{InterleavedLegacyLayerDescriptor, LayerDescriptor, MinMax};
use crate::layer::check_read_region;
use crate::{Error, Result};

/// One member surface of a pre-2.0 interleaved group.
#[derive(Debug)]
pub struct InterleavedLegacyLayer {
    descriptor: LayerDescriptor,
    handle: DatasetHandle,
    field_offset: usize,
    record_size: usize,
}

impl InterleavedLegacyLayer {
    /// Opens a member surface of an existing group dataset.
    pub(crate) fn open(
        container: &Container,
        mut descriptor: InterleavedLegacyLayerDescriptor,
    ) -> Result<InterleavedLegacyLayer> {
        let path = descriptor.core.internal_path.clone();
        let handle = container.open_dataset(&path)?;
        let dims = container.dataset_dims(handle)?;
        if dims.len() != 2 {
            return Err(Error::RankMismatch {
                expected: 2,
                actual: dims.len() as u8,
            });
        }
        descriptor.core.dims = (dims[0], dims[1]);

        let field = descriptor
            .group_type
            .field_name(descriptor.core.layer_type)
            .ok_or(Error::UnexpectedLayerDescriptorType)?;
        let layout = container
            .dataset_element(handle)?
            .as_compound()
            .ok_or_else(|| Error::TypeMismatch(format!("{path} is not a compound dataset")))?;
        let index = layout
            .field_index(field)
            .ok_or_else(|| Error::NotFound(format!("{path} field {field}")))?;
        let field_offset = layout.field_offset(index)?;
        let record_size = layout
            .packed_size()
            .ok_or_else(|| Error::TypeMismatch(format!("{path} records are not packed")))?;

        let min_name = format!("min_{field}");
        let max_name = format!("max_{field}");
        if container.attr_exists(&path, &min_name) && container.attr_exists(&path, &max_name) {
            let min = attr_as_f32(container.read_attr(&path, &min_name)?)?;
            let max = attr_as_f32(container.read_attr(&path, &max_name)?)?;
            descriptor.min_max = MinMax::new(min, max);
        }

        Ok(InterleavedLegacyLayer {
            descriptor: LayerDescriptor::InterleavedLegacy(descriptor),
            handle,
            field_offset,
            record_size,
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

    /// Reads a region, projecting this layer's field out of each record.
    pub fn read(
        &self,
        container: &Container,
        row_start: u32,
        column_start: u32,
        row_end: u32,
        column_end: u32,
    ) -> Result<Vec<u8>> {
        let dims = container.dataset_dims(self.handle)?;
        let (rows, cols) = check_read_region(
            (dims[0], dims[1]),
            row_start,
            column_start,
            row_end,
            column_end,
        )?;
        let records = container.read_hyperslab(
            self.handle,
            &[u64::from(row_start), u64::from(column_start)],
            &[rows, cols],
        )?;
        let element_size = self.descriptor.element_size();
        let mut out = Vec::with_capacity((rows * cols) as usize * element_size);
        for record in records.chunks_exact(self.record_size) {
            out.extend_from_slice(&record[self.field_offset..self.field_offset + element_size]);
        }
        Ok(out)
    }
}

/// Legacy min/max attributes appear as f32 even on integer fields.
fn attr_as_f32(value: AttributeValue) -> Result<f32> {
    match value {
        AttributeValue::F32(v) => Ok(v),
        AttributeValue::U32(v) => Ok(v as f32),
        _ => Err(Error::TypeMismatch("legacy min/max attribute".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{
        AttrType, CompoundLayout, DatasetSpec, ElementType, Extent, FieldDef, FieldKind,
    };
    use crate::layer::{GroupType, LayerType};
    use byteorder::{NativeEndian, WriteBytesExt};

    fn node_group(container: &mut Container, rows: u64, cols: u64) {
        let layout = CompoundLayout::new(vec![
            FieldDef::new("hyp_strength", FieldKind::F32),
            FieldDef::new("num_hypotheses", FieldKind::U32),
        ]);
        let mut records = Vec::new();
        for i in 0..rows * cols {
            records.write_f32::<NativeEndian>(i as f32 / 2.).unwrap();
            records.write_u32::<NativeEndian>(i as u32).unwrap();
        }
        let spec = DatasetSpec::new(
            ElementType::Compound(layout),
            vec![rows, cols],
            vec![Extent::Fixed(rows), Extent::Fixed(cols)],
        );
        let handle = container
            .create_dataset("/BAG_root/node", spec)
            .unwrap();
        let path = container.dataset_path(handle).unwrap().to_string();
        container
            .write_hyperslab(handle, &[0, 0], &[rows, cols], &records)
            .unwrap();
        container
            .create_attr(&path, "min_hyp_strength", AttrType::F32)
            .unwrap();
        container
            .create_attr(&path, "max_hyp_strength", AttrType::F32)
            .unwrap();
        container
            .write_attr(&path, "max_hyp_strength", AttributeValue::F32(1.5))
            .unwrap();
    }

    #[test]
    fn projects_a_single_field() {
        let mut container = Container::scratch();
        node_group(&mut container, 2, 2);
        let descriptor = InterleavedLegacyLayerDescriptor::new(
            0,
            LayerType::NumHypotheses,
            GroupType::Node,
            (2, 2),
        )
        .unwrap();
        let layer = InterleavedLegacyLayer::open(&container, descriptor).unwrap();
        let bytes = layer.read(&container, 0, 0, 1, 1).unwrap();
        let counts: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(vec![0, 1, 2, 3], counts);
    }

    #[test]
    fn min_max_attributes_are_loaded() {
        let mut container = Container::scratch();
        node_group(&mut container, 2, 2);
        let descriptor = InterleavedLegacyLayerDescriptor::new(
            0,
            LayerType::HypothesisStrength,
            GroupType::Node,
            (2, 2),
        )
        .unwrap();
        let layer = InterleavedLegacyLayer::open(&container, descriptor).unwrap();
        let LayerDescriptor::InterleavedLegacy(descriptor) = layer.descriptor() else {
            panic!("not interleaved");
        };
        assert_eq!(1.5, descriptor.min_max().max);
    }

    #[test]
    fn membership_is_checked() {
        assert!(InterleavedLegacyLayerDescriptor::new(
            0,
            LayerType::Elevation,
            GroupType::Node,
            (2, 2),
        )
        .is_err());
    }
}

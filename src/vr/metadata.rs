//! The variable resolution metadata layer.

use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::container::{
    AttrType, AttributeValue, CompoundLayout, Container, DatasetHandle, DatasetSpec, ElementType,
    Extent, FieldDef, FieldKind,
};
use crate::descriptor::{LayerDescriptor, VRMetadataDescriptor};
use crate::layer::{check_read_region, check_write_region};
use crate::vr::check_window_overlap;
use crate::{Error, NULL_VARRES_INDEX, Result};

const MIN_DIMS_X: &str = "min_dimensions_x";
const MIN_DIMS_Y: &str = "min_dimensions_y";
const MAX_DIMS_X: &str = "max_dimensions_x";
const MAX_DIMS_Y: &str = "max_dimensions_y";
const MIN_RES_X: &str = "min_resolution_x";
const MIN_RES_Y: &str = "min_resolution_y";
const MAX_RES_X: &str = "max_resolution_x";
const MAX_RES_Y: &str = "max_resolution_y";

/// The per-coarse-cell record of the variable resolution metadata layer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VRMetadataItem {
    /// The starting position of this cell's window in the refinement
    /// array, or [NULL_VARRES_INDEX](crate::NULL_VARRES_INDEX).
    pub index: u32,
    /// Refined nodes east.
    pub dimensions_x: u32,
    /// Refined nodes north.
    pub dimensions_y: u32,
    /// Node spacing east.
    pub resolution_x: f32,
    /// Node spacing north.
    pub resolution_y: f32,
    /// Offset east from the cell's SW corner to the SW-most node.
    pub sw_corner_x: f32,
    /// Offset north from the cell's SW corner to the SW-most node.
    pub sw_corner_y: f32,
}

impl VRMetadataItem {
    /// The packed size of one item in bytes.
    pub const SIZE: usize = 28;

    /// The sentinel item of a coarse cell with no refinement.
    pub fn no_refinement() -> VRMetadataItem {
        VRMetadataItem {
            index: NULL_VARRES_INDEX,
            dimensions_x: 0,
            dimensions_y: 0,
            resolution_x: -1.,
            resolution_y: -1.,
            sw_corner_x: -1.,
            sw_corner_y: -1.,
        }
    }

    /// Returns true when this cell has a refinement window.
    pub fn has_refinement(&self) -> bool {
        self.index != NULL_VARRES_INDEX
    }

    /// Writes the packed item.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<NativeEndian>(self.index)?;
        writer.write_u32::<NativeEndian>(self.dimensions_x)?;
        writer.write_u32::<NativeEndian>(self.dimensions_y)?;
        writer.write_f32::<NativeEndian>(self.resolution_x)?;
        writer.write_f32::<NativeEndian>(self.resolution_y)?;
        writer.write_f32::<NativeEndian>(self.sw_corner_x)?;
        writer.write_f32::<NativeEndian>(self.sw_corner_y)?;
        Ok(())
    }

    /// Reads a packed item.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<VRMetadataItem> {
        Ok(VRMetadataItem {
            index: reader.read_u32::<NativeEndian>()?,
            dimensions_x: reader.read_u32::<NativeEndian>()?,
            dimensions_y: reader.read_u32::<NativeEndian>()?,
            resolution_x: reader.read_f32::<NativeEndian>()?,
            resolution_y: reader.read_f32::<NativeEndian>()?,
            sw_corner_x: reader.read_f32::<NativeEndian>()?,
            sw_corner_y: reader.read_f32::<NativeEndian>()?,
        })
    }

    /// Returns the packed item as bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::SIZE);
        // Writing into a Vec cannot fail.
        let _ = self.write_to(&mut bytes);
        bytes
    }
}

fn record_layout() -> CompoundLayout {
    CompoundLayout::new(vec![
        FieldDef::new("index", FieldKind::U32),
        FieldDef::new("dimensions_x", FieldKind::U32),
        FieldDef::new("dimensions_y", FieldKind::U32),
        FieldDef::new("resolution_x", FieldKind::F32),
        FieldDef::new("resolution_y", FieldKind::F32),
        FieldDef::new("sw_corner_x", FieldKind::F32),
        FieldDef::new("sw_corner_y", FieldKind::F32),
    ])
}

/// The variable resolution metadata layer.
#[derive(Debug)]
pub struct VRMetadata {
    descriptor: LayerDescriptor,
    handle: DatasetHandle,
}

impl VRMetadata {
    /// Creates the backing dataset and its min/max attributes.
    pub(crate) fn create(
        container: &mut Container,
        descriptor: VRMetadataDescriptor,
    ) -> Result<VRMetadata> {
        let path = descriptor.core.internal_path.clone();
        let dims = descriptor.core.dims;
        let mut spec = DatasetSpec::new(
            ElementType::Compound(record_layout()),
            vec![dims.0, dims.1],
            vec![Extent::Fixed(dims.0), Extent::Fixed(dims.1)],
        )
        .with_fill(VRMetadataItem::no_refinement().to_bytes());
        if descriptor.core.chunk_size > 0 {
            spec = spec.chunked(
                vec![descriptor.core.chunk_size, descriptor.core.chunk_size],
                descriptor.core.compression_level,
            );
        }
        let handle = container.create_dataset(&path, spec)?;

        for name in [MIN_DIMS_X, MIN_DIMS_Y, MAX_DIMS_X, MAX_DIMS_Y] {
            container.create_attr(&path, name, AttrType::U32)?;
        }
        for name in [MIN_RES_X, MIN_RES_Y, MAX_RES_X, MAX_RES_Y] {
            container.create_attr(&path, name, AttrType::F32)?;
        }
        for name in [MIN_DIMS_X, MIN_DIMS_Y] {
            container.write_attr(&path, name, AttributeValue::U32(u32::MAX))?;
        }
        for name in [MIN_RES_X, MIN_RES_Y] {
            container.write_attr(&path, name, AttributeValue::F32(f32::MAX))?;
        }
        for name in [MAX_RES_X, MAX_RES_Y] {
            container.write_attr(&path, name, AttributeValue::F32(f32::MIN))?;
        }

        Ok(VRMetadata {
            descriptor: LayerDescriptor::VRMetadata(descriptor),
            handle,
        })
    }

    /// Opens the backing dataset and reads its min/max attributes.
    pub(crate) fn open(
        container: &Container,
        mut descriptor: VRMetadataDescriptor,
    ) -> Result<VRMetadata> {
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
        if let Some(chunk) = container.dataset_chunk(handle)? {
            descriptor.core.chunk_size = chunk[0];
        }
        descriptor.core.compression_level = container.dataset_compression(handle)?;
        descriptor.min_dimensions = (
            container.read_attr(&path, MIN_DIMS_X)?.as_u32()?,
            container.read_attr(&path, MIN_DIMS_Y)?.as_u32()?,
        );
        descriptor.max_dimensions = (
            container.read_attr(&path, MAX_DIMS_X)?.as_u32()?,
            container.read_attr(&path, MAX_DIMS_Y)?.as_u32()?,
        );
        descriptor.min_resolution = (
            container.read_attr(&path, MIN_RES_X)?.as_f32()?,
            container.read_attr(&path, MIN_RES_Y)?.as_f32()?,
        );
        descriptor.max_resolution = (
            container.read_attr(&path, MAX_RES_X)?.as_f32()?,
            container.read_attr(&path, MAX_RES_Y)?.as_f32()?,
        );
        Ok(VRMetadata {
            descriptor: LayerDescriptor::VRMetadata(descriptor),
            handle,
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

    fn vr_descriptor(&self) -> Result<&VRMetadataDescriptor> {
        match &self.descriptor {
            LayerDescriptor::VRMetadata(descriptor) => Ok(descriptor),
            _ => Err(Error::UnexpectedLayerDescriptorType),
        }
    }

    fn vr_descriptor_mut(&mut self) -> Result<&mut VRMetadataDescriptor> {
        match &mut self.descriptor {
            LayerDescriptor::VRMetadata(descriptor) => Ok(descriptor),
            _ => Err(Error::UnexpectedLayerDescriptorType),
        }
    }

    /// Reads a region of packed metadata items.
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
        container.read_hyperslab(
            self.handle,
            &[u64::from(row_start), u64::from(column_start)],
            &[rows, cols],
        )
    }

    /// Returns the metadata item of one coarse cell.
    pub fn item(&self, container: &Container, row: u32, col: u32) -> Result<VRMetadataItem> {
        let bytes = self.read(container, row, col, row, col)?;
        VRMetadataItem::read_from(&mut bytes.as_slice())
    }

    /// Writes a region of packed metadata items, folding min/max.
    ///
    /// Sentinel entries (zero dimensions, negative resolutions) never enter
    /// the folds.
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
        if buffer.len() as u64 != rows * cols * VRMetadataItem::SIZE as u64 {
            return Err(Error::InvalidReadSize);
        }
        container.write_hyperslab(
            self.handle,
            &[u64::from(row_start), u64::from(column_start)],
            &[rows, cols],
            buffer,
        )?;

        let descriptor = self.vr_descriptor_mut()?;
        let mut reader = buffer;
        for _ in 0..rows * cols {
            let item = VRMetadataItem::read_from(&mut reader)?;
            if item.dimensions_x > 0 && item.dimensions_y > 0 {
                descriptor.min_dimensions.0 = descriptor.min_dimensions.0.min(item.dimensions_x);
                descriptor.min_dimensions.1 = descriptor.min_dimensions.1.min(item.dimensions_y);
                descriptor.max_dimensions.0 = descriptor.max_dimensions.0.max(item.dimensions_x);
                descriptor.max_dimensions.1 = descriptor.max_dimensions.1.max(item.dimensions_y);
            }
            if item.resolution_x >= 0. && item.resolution_y >= 0. {
                descriptor.min_resolution.0 = descriptor.min_resolution.0.min(item.resolution_x);
                descriptor.min_resolution.1 = descriptor.min_resolution.1.min(item.resolution_y);
                descriptor.max_resolution.0 = descriptor.max_resolution.0.max(item.resolution_x);
                descriptor.max_resolution.1 = descriptor.max_resolution.1.max(item.resolution_y);
            }
        }
        Ok(())
    }

    /// Writes the descriptor's min/max attributes to the container.
    pub fn flush_attributes(&self, container: &mut Container) -> Result<()> {
        let descriptor = self.vr_descriptor()?;
        let path = &descriptor.core.internal_path;
        container.write_attr(path, MIN_DIMS_X, AttributeValue::U32(descriptor.min_dimensions.0))?;
        container.write_attr(path, MIN_DIMS_Y, AttributeValue::U32(descriptor.min_dimensions.1))?;
        container.write_attr(path, MAX_DIMS_X, AttributeValue::U32(descriptor.max_dimensions.0))?;
        container.write_attr(path, MAX_DIMS_Y, AttributeValue::U32(descriptor.max_dimensions.1))?;
        container.write_attr(path, MIN_RES_X, AttributeValue::F32(descriptor.min_resolution.0))?;
        container.write_attr(path, MIN_RES_Y, AttributeValue::F32(descriptor.min_resolution.1))?;
        container.write_attr(path, MAX_RES_X, AttributeValue::F32(descriptor.max_resolution.0))?;
        container.write_attr(path, MAX_RES_Y, AttributeValue::F32(descriptor.max_resolution.1))?;
        Ok(())
    }

    /// Verifies that no two coarse cells' windows overlap and that every
    /// window fits within a refinement array of `refinement_len` nodes.
    pub fn validate_windows(&self, container: &Container, refinement_len: u64) -> Result<()> {
        let dims = container.dataset_dims(self.handle)?;
        if dims[0] == 0 || dims[1] == 0 {
            return Ok(());
        }
        let bytes = self.read(container, 0, 0, dims[0] as u32 - 1, dims[1] as u32 - 1)?;
        let mut reader = bytes.as_slice();
        let mut windows = Vec::new();
        for _ in 0..dims[0] * dims[1] {
            let item = VRMetadataItem::read_from(&mut reader)?;
            if item.has_refinement() {
                windows.push((
                    u64::from(item.index),
                    u64::from(item.dimensions_x) * u64::from(item.dimensions_y),
                ));
            }
        }
        check_window_overlap(windows, refinement_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(container: &mut Container) -> VRMetadata {
        let descriptor = VRMetadataDescriptor::new(0, 0, 0, (2, 2)).unwrap();
        VRMetadata::create(container, descriptor).unwrap()
    }

    #[test]
    fn unwritten_cells_hold_the_sentinel() {
        let mut container = Container::scratch();
        let layer = layer(&mut container);
        let item = layer.item(&container, 1, 1).unwrap();
        assert!(!item.has_refinement());
        assert_eq!(0, item.dimensions_x);
    }

    #[test]
    fn fold_skips_sentinel_items() {
        let mut container = Container::scratch();
        let mut layer = layer(&mut container);
        let real = VRMetadataItem {
            index: 0,
            dimensions_x: 4,
            dimensions_y: 2,
            resolution_x: 0.5,
            resolution_y: 0.25,
            sw_corner_x: 0.,
            sw_corner_y: 0.,
        };
        let mut buffer = real.to_bytes();
        buffer.extend_from_slice(&VRMetadataItem::no_refinement().to_bytes());
        layer.write(&mut container, 0, 0, 0, 1, &buffer).unwrap();
        let LayerDescriptor::VRMetadata(descriptor) = layer.descriptor() else {
            panic!("not VR metadata");
        };
        assert_eq!((4, 2), descriptor.min_dimensions());
        assert_eq!((4, 2), descriptor.max_dimensions());
        assert_eq!((0.5, 0.25), descriptor.min_resolution());
    }

    #[test]
    fn window_validation_catches_overlap() {
        let mut container = Container::scratch();
        let mut layer = layer(&mut container);
        let first = VRMetadataItem {
            index: 0,
            dimensions_x: 2,
            dimensions_y: 2,
            resolution_x: 1.,
            resolution_y: 1.,
            sw_corner_x: 0.,
            sw_corner_y: 0.,
        };
        let second = VRMetadataItem {
            index: 3,
            ..first
        };
        let mut buffer = first.to_bytes();
        buffer.extend_from_slice(&second.to_bytes());
        layer.write(&mut container, 0, 0, 0, 1, &buffer).unwrap();
        assert!(layer.validate_windows(&container, 16).is_err());

        let disjoint = VRMetadataItem {
            index: 4,
            ..first
        };
        layer
            .write(&mut container, 0, 1, 0, 1, &disjoint.to_bytes())
            .unwrap();
        assert!(layer.validate_windows(&container, 8).is_ok());
        assert!(layer.validate_windows(&container, 7).is_err());
    }
}

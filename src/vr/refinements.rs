//! The variable resolution refinement layer.

use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::container::{
    AttrType, AttributeValue, CompoundLayout, Container, DatasetHandle, DatasetSpec, ElementType,
    Extent, FieldDef, FieldKind,
};
use crate::descriptor::{LayerDescriptor, VRRefinementsDescriptor};
use crate::{Error, NULL_GENERIC, Result};

const MIN_DEPTH: &str = "min_depth";
const MAX_DEPTH: &str = "max_depth";
const MIN_UNCRT: &str = "min_uncrt";
const MAX_UNCRT: &str = "max_uncrt";

/// One refined node of the refinement array.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct VRRefinementItem {
    /// The depth at the refined node.
    pub depth: f32,
    /// The depth uncertainty at the refined node.
    pub depth_uncrt: f32,
}

impl VRRefinementItem {
    /// The packed size of one item in bytes.
    pub const SIZE: usize = 8;

    /// Writes the packed item.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_f32::<NativeEndian>(self.depth)?;
        writer.write_f32::<NativeEndian>(self.depth_uncrt)?;
        Ok(())
    }

    /// Reads a packed item.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<VRRefinementItem> {
        Ok(VRRefinementItem {
            depth: reader.read_f32::<NativeEndian>()?,
            depth_uncrt: reader.read_f32::<NativeEndian>()?,
        })
    }

    /// Returns the packed item as bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::SIZE);
        let _ = self.write_to(&mut bytes);
        bytes
    }
}

fn record_layout() -> CompoundLayout {
    CompoundLayout::new(vec![
        FieldDef::new("depth", FieldKind::F32),
        FieldDef::new("depth_uncrt", FieldKind::F32),
    ])
}

/// The 1-D variable resolution refinement array.
///
/// Grows by whole windows: a new window is allocated at the current length
/// and the array becomes `length + dimensions_x * dimensions_y` long. The
/// layer is required to be chunked.
#[derive(Debug)]
pub struct VRRefinements {
    descriptor: LayerDescriptor,
    handle: DatasetHandle,
    /// Set when the file stores the array as a `(1, N)` 2-D dataset.
    two_dimensional: bool,
}

impl VRRefinements {
    /// Creates the backing dataset and its min/max attributes.
    pub(crate) fn create(
        container: &mut Container,
        descriptor: VRRefinementsDescriptor,
    ) -> Result<VRRefinements> {
        let path = descriptor.core.internal_path.clone();
        let spec = DatasetSpec::new(
            ElementType::Compound(record_layout()),
            vec![0],
            vec![Extent::Unlimited],
        )
        .chunked(
            vec![descriptor.core.chunk_size],
            descriptor.core.compression_level,
        );
        let handle = container.create_dataset(&path, spec)?;

        for name in [MIN_DEPTH, MAX_DEPTH, MIN_UNCRT, MAX_UNCRT] {
            container.create_attr(&path, name, AttrType::F32)?;
        }
        for name in [MIN_DEPTH, MIN_UNCRT] {
            container.write_attr(&path, name, AttributeValue::F32(f32::MAX))?;
        }
        for name in [MAX_DEPTH, MAX_UNCRT] {
            container.write_attr(&path, name, AttributeValue::F32(f32::MIN))?;
        }

        Ok(VRRefinements {
            descriptor: LayerDescriptor::VRRefinements(descriptor),
            handle,
            two_dimensional: false,
        })
    }

    /// Opens the backing dataset, reconstructing the descriptor from the
    /// file.
    ///
    /// The array is declared 1-D; a 2-D dataset of shape `(1, N)` is
    /// accepted for compatibility and read as length N.
    pub(crate) fn open(container: &Container, id: u32) -> Result<VRRefinements> {
        let path = crate::layer::LayerType::VarResRefinement
            .internal_path()
            .unwrap_or("")
            .to_string();
        let handle = container.open_dataset(&path)?;
        let dims = container.dataset_dims(handle)?;
        let (two_dimensional, len) = match dims.as_slice() {
            [len] => (false, *len),
            [1, len] => (true, *len),
            other => {
                return Err(Error::InvalidVRRefinementDimensions(format!(
                    "refinement array has shape {other:?}"
                )));
            }
        };
        let chunk = container
            .dataset_chunk(handle)?
            .and_then(|chunk| chunk.last().copied())
            .unwrap_or(0);
        let compression = container.dataset_compression(handle)?;
        let mut descriptor = VRRefinementsDescriptor::new(id, chunk, compression)?;
        descriptor.core.dims = (1, len);
        descriptor.depth.min = container.read_attr(&path, MIN_DEPTH)?.as_f32()?;
        descriptor.depth.max = container.read_attr(&path, MAX_DEPTH)?.as_f32()?;
        descriptor.uncertainty.min = container.read_attr(&path, MIN_UNCRT)?.as_f32()?;
        descriptor.uncertainty.max = container.read_attr(&path, MAX_UNCRT)?.as_f32()?;
        Ok(VRRefinements {
            descriptor: LayerDescriptor::VRRefinements(descriptor),
            handle,
            two_dimensional,
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

    fn vr_descriptor_mut(&mut self) -> Result<&mut VRRefinementsDescriptor> {
        match &mut self.descriptor {
            LayerDescriptor::VRRefinements(descriptor) => Ok(descriptor),
            _ => Err(Error::UnexpectedLayerDescriptorType),
        }
    }

    /// Returns the current length of the array.
    pub fn len(&self, container: &Container) -> Result<u64> {
        let dims = container.dataset_dims(self.handle)?;
        Ok(*dims.last().unwrap_or(&0))
    }

    /// Returns true when the array is empty.
    pub fn is_empty(&self, container: &Container) -> Result<bool> {
        Ok(self.len(container)? == 0)
    }

    fn slab(&self, index: u64, count: u64) -> (Vec<u64>, Vec<u64>) {
        if self.two_dimensional {
            (vec![0, index], vec![1, count])
        } else {
            (vec![index], vec![count])
        }
    }

    /// Reads the packed items in `[index_start, index_end]`.
    pub fn read(
        &self,
        container: &Container,
        index_start: u32,
        index_end: u32,
    ) -> Result<Vec<u8>> {
        let len = self.len(container)?;
        if index_start > index_end || u64::from(index_end) >= len {
            return Err(Error::InvalidReadSize);
        }
        let (offset, count) = self.slab(
            u64::from(index_start),
            u64::from(index_end - index_start) + 1,
        );
        container.read_hyperslab(self.handle, &offset, &count)
    }

    /// Returns the item at `index`.
    pub fn item(&self, container: &Container, index: u64) -> Result<VRRefinementItem> {
        let len = self.len(container)?;
        if index >= len {
            return Err(Error::BoundsExceeded(format!(
                "refinement {index} outside array of {len}"
            )));
        }
        let (offset, count) = self.slab(index, 1);
        let bytes = container.read_hyperslab(self.handle, &offset, &count)?;
        VRRefinementItem::read_from(&mut bytes.as_slice())
    }

    /// Writes packed items over `[index_start, index_end]`, extending the
    /// array when needed and folding min/max.
    pub fn write(
        &mut self,
        container: &mut Container,
        index_start: u32,
        index_end: u32,
        buffer: &[u8],
    ) -> Result<()> {
        if index_start > index_end {
            return Err(Error::InvalidReadSize);
        }
        let count = u64::from(index_end - index_start) + 1;
        if buffer.len() as u64 != count * VRRefinementItem::SIZE as u64 {
            return Err(Error::InvalidReadSize);
        }
        let len = self.len(container)?;
        let needed = u64::from(index_end) + 1;
        if needed > len {
            let new_dims = if self.two_dimensional {
                vec![1, needed]
            } else {
                vec![needed]
            };
            container.extend(self.handle, &new_dims)?;
        }
        let (offset, counts) = self.slab(u64::from(index_start), count);
        container.write_hyperslab(self.handle, &offset, &counts, buffer)?;

        let new_len = self.len(container)?;
        let descriptor = self.vr_descriptor_mut()?;
        descriptor.core.dims = (1, new_len);
        let mut reader = buffer;
        while let Ok(item) = VRRefinementItem::read_from(&mut reader) {
            if !item.depth.is_nan() && item.depth != NULL_GENERIC {
                descriptor.depth.update(item.depth);
            }
            if !item.depth_uncrt.is_nan() && item.depth_uncrt != NULL_GENERIC {
                descriptor.uncertainty.update(item.depth_uncrt);
            }
        }
        Ok(())
    }

    /// Allocates a fresh `dimensions_x * dimensions_y` window at the end of
    /// the array, returning its starting index.
    pub fn allocate_window(
        &mut self,
        container: &mut Container,
        dimensions_x: u32,
        dimensions_y: u32,
    ) -> Result<u64> {
        if dimensions_x == 0 || dimensions_y == 0 {
            return Err(Error::InvalidVRRefinementDimensions(format!(
                "window of {dimensions_x} x {dimensions_y} nodes"
            )));
        }
        let start = self.len(container)?;
        let new_len = start + u64::from(dimensions_x) * u64::from(dimensions_y);
        let new_dims = if self.two_dimensional {
            vec![1, new_len]
        } else {
            vec![new_len]
        };
        container.extend(self.handle, &new_dims)?;
        self.vr_descriptor_mut()?.core.dims = (1, new_len);
        Ok(start)
    }

    /// Writes the descriptor's min/max attributes to the container.
    pub fn flush_attributes(&self, container: &mut Container) -> Result<()> {
        let LayerDescriptor::VRRefinements(descriptor) = &self.descriptor else {
            return Err(Error::UnexpectedLayerDescriptorType);
        };
        let path = &descriptor.core.internal_path;
        container.write_attr(path, MIN_DEPTH, AttributeValue::F32(descriptor.depth.min))?;
        container.write_attr(path, MAX_DEPTH, AttributeValue::F32(descriptor.depth.max))?;
        container.write_attr(path, MIN_UNCRT, AttributeValue::F32(descriptor.uncertainty.min))?;
        container.write_attr(path, MAX_UNCRT, AttributeValue::F32(descriptor.uncertainty.max))?;
        Ok(())
    }
}

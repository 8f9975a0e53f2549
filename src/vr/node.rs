//! The variable resolution node layer.

use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::container::{
    AttrType, AttributeValue, CompoundLayout, Container, DatasetHandle, DatasetSpec, ElementType,
    Extent, FieldDef, FieldKind,
};
use crate::descriptor::{LayerDescriptor, VRNodeDescriptor};
use crate::{Error, NULL_GENERIC, Result};

const MIN_HYP_STRENGTH: &str = "min_hyp_strength";
const MAX_HYP_STRENGTH: &str = "max_hyp_strength";
const MIN_NUM_HYPOTHESES: &str = "min_num_hypotheses";
const MAX_NUM_HYPOTHESES: &str = "max_num_hypotheses";
const MIN_N_SAMPLES: &str = "min_n_samples";
const MAX_N_SAMPLES: &str = "max_n_samples";

/// Per-node hypothesis statistics, parallel to the refinement array.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct VRNodeItem {
    /// The hypothesis strength at the refined node.
    pub hyp_strength: f32,
    /// The number of hypotheses at the refined node.
    pub num_hypotheses: u32,
    /// The number of samples at the refined node.
    pub n_samples: u32,
}

impl VRNodeItem {
    /// The packed size of one item in bytes.
    pub const SIZE: usize = 12;

    /// Writes the packed item.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_f32::<NativeEndian>(self.hyp_strength)?;
        writer.write_u32::<NativeEndian>(self.num_hypotheses)?;
        writer.write_u32::<NativeEndian>(self.n_samples)?;
        Ok(())
    }

    /// Reads a packed item.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<VRNodeItem> {
        Ok(VRNodeItem {
            hyp_strength: reader.read_f32::<NativeEndian>()?,
            num_hypotheses: reader.read_u32::<NativeEndian>()?,
            n_samples: reader.read_u32::<NativeEndian>()?,
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
        FieldDef::new("hyp_strength", FieldKind::F32),
        FieldDef::new("num_hypotheses", FieldKind::U32),
        FieldDef::new("n_samples", FieldKind::U32),
    ])
}

/// The 1-D variable resolution node layer.
///
/// Shares the refinement array's index space and extension rules; required
/// to be chunked.
#[derive(Debug)]
pub struct VRNode {
    descriptor: LayerDescriptor,
    handle: DatasetHandle,
    two_dimensional: bool,
}

impl VRNode {
    /// Creates the backing dataset and its min/max attributes.
    pub(crate) fn create(container: &mut Container, descriptor: VRNodeDescriptor) -> Result<VRNode> {
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

        for name in [MIN_HYP_STRENGTH, MAX_HYP_STRENGTH] {
            container.create_attr(&path, name, AttrType::F32)?;
        }
        for name in [
            MIN_NUM_HYPOTHESES,
            MAX_NUM_HYPOTHESES,
            MIN_N_SAMPLES,
            MAX_N_SAMPLES,
        ] {
            container.create_attr(&path, name, AttrType::U32)?;
        }
        container.write_attr(&path, MIN_HYP_STRENGTH, AttributeValue::F32(f32::MAX))?;
        container.write_attr(&path, MAX_HYP_STRENGTH, AttributeValue::F32(f32::MIN))?;
        container.write_attr(&path, MIN_NUM_HYPOTHESES, AttributeValue::U32(u32::MAX))?;
        container.write_attr(&path, MIN_N_SAMPLES, AttributeValue::U32(u32::MAX))?;

        Ok(VRNode {
            descriptor: LayerDescriptor::VRNode(descriptor),
            handle,
            two_dimensional: false,
        })
    }

    /// Opens the backing dataset, reconstructing the descriptor from the
    /// file and accepting a `(1, N)` shape.
    pub(crate) fn open(container: &Container, id: u32) -> Result<VRNode> {
        let path = crate::layer::LayerType::VarResNode
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
                    "node array has shape {other:?}"
                )));
            }
        };
        let chunk = container
            .dataset_chunk(handle)?
            .and_then(|chunk| chunk.last().copied())
            .unwrap_or(0);
        let compression = container.dataset_compression(handle)?;
        let mut descriptor = VRNodeDescriptor::new(id, chunk, compression)?;
        descriptor.core.dims = (1, len);
        descriptor.hyp_strength.min = container.read_attr(&path, MIN_HYP_STRENGTH)?.as_f32()?;
        descriptor.hyp_strength.max = container.read_attr(&path, MAX_HYP_STRENGTH)?.as_f32()?;
        descriptor.num_hypotheses.min =
            container.read_attr(&path, MIN_NUM_HYPOTHESES)?.as_u32()?;
        descriptor.num_hypotheses.max =
            container.read_attr(&path, MAX_NUM_HYPOTHESES)?.as_u32()?;
        descriptor.n_samples.min = container.read_attr(&path, MIN_N_SAMPLES)?.as_u32()?;
        descriptor.n_samples.max = container.read_attr(&path, MAX_N_SAMPLES)?.as_u32()?;
        Ok(VRNode {
            descriptor: LayerDescriptor::VRNode(descriptor),
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

    fn vr_descriptor_mut(&mut self) -> Result<&mut VRNodeDescriptor> {
        match &mut self.descriptor {
            LayerDescriptor::VRNode(descriptor) => Ok(descriptor),
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
    pub fn item(&self, container: &Container, index: u64) -> Result<VRNodeItem> {
        let len = self.len(container)?;
        if index >= len {
            return Err(Error::BoundsExceeded(format!(
                "node {index} outside array of {len}"
            )));
        }
        let (offset, count) = self.slab(index, 1);
        let bytes = container.read_hyperslab(self.handle, &offset, &count)?;
        VRNodeItem::read_from(&mut bytes.as_slice())
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
        if buffer.len() as u64 != count * VRNodeItem::SIZE as u64 {
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
        while let Ok(item) = VRNodeItem::read_from(&mut reader) {
            if !item.hyp_strength.is_nan() && item.hyp_strength != NULL_GENERIC {
                descriptor.hyp_strength.update(item.hyp_strength);
            }
            descriptor.num_hypotheses.update(item.num_hypotheses);
            descriptor.n_samples.update(item.n_samples);
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
        let LayerDescriptor::VRNode(descriptor) = &self.descriptor else {
            return Err(Error::UnexpectedLayerDescriptorType);
        };
        let path = &descriptor.core.internal_path;
        container.write_attr(
            path,
            MIN_HYP_STRENGTH,
            AttributeValue::F32(descriptor.hyp_strength.min),
        )?;
        container.write_attr(
            path,
            MAX_HYP_STRENGTH,
            AttributeValue::F32(descriptor.hyp_strength.max),
        )?;
        container.write_attr(
            path,
            MIN_NUM_HYPOTHESES,
            AttributeValue::U32(descriptor.num_hypotheses.min),
        )?;
        container.write_attr(
            path,
            MAX_NUM_HYPOTHESES,
            AttributeValue::U32(descriptor.num_hypotheses.max),
        )?;
        container.write_attr(
            path,
            MIN_N_SAMPLES,
            AttributeValue::U32(descriptor.n_samples.min),
        )?;
        container.write_attr(
            path,
            MAX_N_SAMPLES,
            AttributeValue::U32(descriptor.n_samples.max),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_extends_and_folds() {
        let mut container = Container::scratch();
        let descriptor = VRNodeDescriptor::new(0, 10, 0).unwrap();
        let mut nodes = VRNode::create(&mut container, descriptor).unwrap();
        let mut buffer = Vec::new();
        for item in [
            VRNodeItem {
                hyp_strength: 0.5,
                num_hypotheses: 3,
                n_samples: 9,
            },
            VRNodeItem {
                hyp_strength: 1.5,
                num_hypotheses: 1,
                n_samples: 4,
            },
        ] {
            item.write_to(&mut buffer).unwrap();
        }
        nodes.write(&mut container, 0, 1, &buffer).unwrap();
        assert_eq!(2, nodes.len(&container).unwrap());
        let LayerDescriptor::VRNode(descriptor) = nodes.descriptor() else {
            panic!("not a node layer");
        };
        assert_eq!((1, 3), (descriptor.num_hypotheses().min, descriptor.num_hypotheses().max));
        assert_eq!((4, 9), (descriptor.n_samples().min, descriptor.n_samples().max));
        assert_eq!(0.5, descriptor.hyp_strength().min);
    }
}

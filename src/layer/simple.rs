//! Simple layers: one scalar per cell.

use byteorder::{NativeEndian, ReadBytesExt};

use crate::container::{
    AttrType, AttributeValue, Container, DatasetHandle, DatasetSpec, ElementType, Extent,
    ScalarType,
};
use crate::descriptor::{LayerDescriptor, SimpleLayerDescriptor, simple_min_max_attr_names};
use crate::layer::{DataType, LayerType, check_read_region, check_write_region};
use crate::{Error, NULL_ELEVATION, NULL_GENERIC, NULL_UNCERTAINTY, Result};

/// A layer holding one `f32` or `u32` per cell in its own dataset.
#[derive(Debug)]
pub struct SimpleLayer {
    descriptor: LayerDescriptor,
    handle: DatasetHandle,
}

impl SimpleLayer {
    /// Creates the backing dataset and its min/max attributes.
    pub(crate) fn create(
        container: &mut Container,
        descriptor: SimpleLayerDescriptor,
    ) -> Result<SimpleLayer> {
        let layer_type = descriptor.core.layer_type;
        let dims = descriptor.core.dims;
        let scalar = match layer_type.data_type() {
            DataType::U32 => ScalarType::U32,
            _ => ScalarType::F32,
        };
        let mut spec = DatasetSpec::new(
            ElementType::Scalar(scalar),
            vec![dims.0, dims.1],
            vec![Extent::Fixed(dims.0), Extent::Fixed(dims.1)],
        );
        if descriptor.core.chunk_size > 0 {
            spec = spec.chunked(
                vec![descriptor.core.chunk_size, descriptor.core.chunk_size],
                descriptor.core.compression_level,
            );
        }
        if let Some(null) = fill_value(layer_type) {
            spec = spec.with_fill(null.to_ne_bytes().to_vec());
        }
        let path = descriptor.core.internal_path.clone();
        let handle = container.create_dataset(&path, spec)?;

        let (min_name, max_name) = simple_min_max_attr_names(layer_type);
        container.create_attr(&path, min_name, AttrType::F32)?;
        container.create_attr(&path, max_name, AttrType::F32)?;
        container.write_attr(&path, min_name, AttributeValue::F32(f32::MAX))?;
        container.write_attr(&path, max_name, AttributeValue::F32(f32::MIN))?;

        Ok(SimpleLayer {
            descriptor: LayerDescriptor::Simple(descriptor),
            handle,
        })
    }

    /// Opens the backing dataset and reads the min/max attributes.
    pub(crate) fn open(
        container: &Container,
        mut descriptor: SimpleLayerDescriptor,
    ) -> Result<SimpleLayer> {
        let handle = container.open_dataset(&descriptor.core.internal_path)?;
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

        let (min_name, max_name) = simple_min_max_attr_names(descriptor.core.layer_type);
        let path = &descriptor.core.internal_path;
        if container.attr_exists(path, min_name) && container.attr_exists(path, max_name) {
            let min = container.read_attr(path, min_name)?.as_f32()?;
            let max = container.read_attr(path, max_name)?.as_f32()?;
            descriptor.set_min_max(min, max);
        }
        Ok(SimpleLayer {
            descriptor: LayerDescriptor::Simple(descriptor),
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

    fn simple_descriptor(&self) -> Result<&SimpleLayerDescriptor> {
        match &self.descriptor {
            LayerDescriptor::Simple(descriptor) => Ok(descriptor),
            _ => Err(Error::UnexpectedLayerDescriptorType),
        }
    }

    fn simple_descriptor_mut(&mut self) -> Result<&mut SimpleLayerDescriptor> {
        match &mut self.descriptor {
            LayerDescriptor::Simple(descriptor) => Ok(descriptor),
            _ => Err(Error::UnexpectedLayerDescriptorType),
        }
    }

    /// Reads a region as packed bytes.
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

    /// Writes a region of packed bytes and folds the values into the
    /// descriptor's min/max.
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
        if buffer.len() as u64 != rows * cols * 4 {
            return Err(Error::InvalidReadSize);
        }
        // Simple layers have fixed extents; an out-of-range region fails in
        // the hyperslab bounds check below.
        container.write_hyperslab(
            self.handle,
            &[u64::from(row_start), u64::from(column_start)],
            &[rows, cols],
            buffer,
        )?;
        self.update_min_max(buffer)?;
        Ok(())
    }

    fn update_min_max(&mut self, mut buffer: &[u8]) -> Result<()> {
        let data_type = self.descriptor.layer_type().data_type();
        let descriptor = self.simple_descriptor_mut()?;
        match data_type {
            DataType::U32 => {
                while let Ok(value) = buffer.read_u32::<NativeEndian>() {
                    descriptor.min_max.update(value as f32);
                }
            }
            _ => {
                while let Ok(value) = buffer.read_f32::<NativeEndian>() {
                    if value.is_nan() || value == NULL_GENERIC {
                        continue;
                    }
                    descriptor.min_max.update(value);
                }
            }
        }
        Ok(())
    }

    /// Writes the descriptor's min/max attributes to the container.
    pub fn flush_attributes(&self, container: &mut Container) -> Result<()> {
        let descriptor = self.simple_descriptor()?;
        let (min_name, max_name) = simple_min_max_attr_names(descriptor.core.layer_type);
        let path = &descriptor.core.internal_path;
        container.write_attr(path, min_name, AttributeValue::F32(descriptor.min_max.min))?;
        container.write_attr(path, max_name, AttributeValue::F32(descriptor.min_max.max))?;
        Ok(())
    }
}

/// The fill written into unwritten cells, per layer type.
fn fill_value(layer_type: LayerType) -> Option<f32> {
    match layer_type.data_type() {
        DataType::U32 => None,
        _ => Some(match layer_type {
            LayerType::Elevation => NULL_ELEVATION,
            LayerType::Uncertainty => NULL_UNCERTAINTY,
            _ => NULL_GENERIC,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn elevation_layer(container: &mut Container, rows: u64, cols: u64) -> SimpleLayer {
        let descriptor =
            SimpleLayerDescriptor::new(0, LayerType::Elevation, 0, 0, (rows, cols)).unwrap();
        SimpleLayer::create(container, descriptor).unwrap()
    }

    fn packed(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_ne_bytes()).collect()
    }

    #[test]
    fn round_trip() {
        let mut container = Container::scratch();
        let mut layer = elevation_layer(&mut container, 3, 4);
        let buffer = packed(&[1., 2., 3., 4., 5., 6.]);
        layer.write(&mut container, 1, 0, 2, 2, &buffer).unwrap();
        assert_eq!(buffer, layer.read(&container, 1, 0, 2, 2).unwrap());
    }

    #[test]
    fn unwritten_cells_read_as_null() {
        let mut container = Container::scratch();
        let layer = elevation_layer(&mut container, 2, 2);
        let bytes = layer.read(&container, 0, 0, 0, 0).unwrap();
        assert_eq!(NULL_ELEVATION, f32::from_ne_bytes(bytes.try_into().unwrap()));
    }

    #[test]
    fn min_max_folds_and_skips_nulls() {
        let mut container = Container::scratch();
        let mut layer = elevation_layer(&mut container, 2, 2);
        let buffer = packed(&[3., NULL_ELEVATION, -2., f32::NAN]);
        layer.write(&mut container, 0, 0, 1, 1, &buffer).unwrap();
        let LayerDescriptor::Simple(descriptor) = layer.descriptor() else {
            panic!("not simple");
        };
        assert_eq!((-2., 3.), (descriptor.min_max().min, descriptor.min_max().max));
    }

    #[test]
    fn writes_outside_fixed_extents_fail() {
        let mut container = Container::scratch();
        let mut layer = elevation_layer(&mut container, 2, 2);
        let buffer = packed(&[1., 2., 3.]);
        assert!(layer.write(&mut container, 0, 0, 0, 2, &buffer).is_err());
    }
}

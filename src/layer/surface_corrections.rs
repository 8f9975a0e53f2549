//! The vertical datum surface corrections layer and its resampler.
//!
//! Each corrector record carries up to ten Z offsets lifting a surface into
//! another vertical datum. Gridded correctors span the surface extents on
//! their own origin and spacing; irregular correctors carry explicit
//! positions. Corrected reads interpolate a separation value per cell with
//! an inverse distance weighting over the surrounding corrector nodes.

use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::container::{
    AttrType, AttributeValue, Container, DatasetHandle, DatasetSpec, ElementType, Extent,
    FieldDef, FieldKind,
};
use crate::descriptor::{
    LayerDescriptor, MAX_DATUMS_LENGTH, SurfaceCorrectionsDescriptor,
};
use crate::layer::{
    Layer, Topography, check_read_region, check_write_region, ensure_extent,
};
use crate::transform::GridTransform;
use crate::{
    Error, NULL_ELEVATION, NULL_GENERIC, NULL_UNCERTAINTY, Result,
};

const SURFACE_TYPE: &str = "surface_type";
const VERTICAL_DATUM: &str = "vertical_datum";
const SW_CORNER_X: &str = "sw_corner_x";
const SW_CORNER_Y: &str = "sw_corner_y";
const NODE_SPACING_X: &str = "node_spacing_x";
const NODE_SPACING_Y: &str = "node_spacing_y";

/// The search radius, in corrector cells, around the last hit node when
/// correcting against irregularly spaced correctors.
const SEARCH_RADIUS: i64 = 3;

/// One gridded corrector record.
#[derive(Clone, Debug, PartialEq)]
pub struct GriddedCorrector {
    /// The Z offsets, one per corrector channel.
    pub z: Vec<f32>,
}

impl GriddedCorrector {
    /// Writes the packed record.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        for &z in &self.z {
            writer.write_f32::<NativeEndian>(z)?;
        }
        Ok(())
    }

    /// Reads a packed record with `num_correctors` channels.
    pub fn read_from<R: Read>(reader: &mut R, num_correctors: u8) -> Result<GriddedCorrector> {
        let mut z = vec![0.; num_correctors as usize];
        reader.read_f32_into::<NativeEndian>(&mut z)?;
        Ok(GriddedCorrector { z })
    }
}

/// One irregularly spaced corrector record.
#[derive(Clone, Debug, PartialEq)]
pub struct IrregularCorrector {
    /// The projected easting of the corrector node.
    pub x: f64,
    /// The projected northing of the corrector node.
    pub y: f64,
    /// The Z offsets, one per corrector channel.
    pub z: Vec<f32>,
}

impl IrregularCorrector {
    /// Writes the packed record.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_f64::<NativeEndian>(self.x)?;
        writer.write_f64::<NativeEndian>(self.y)?;
        for &z in &self.z {
            writer.write_f32::<NativeEndian>(z)?;
        }
        Ok(())
    }

    /// Reads a packed record with `num_correctors` channels.
    pub fn read_from<R: Read>(reader: &mut R, num_correctors: u8) -> Result<IrregularCorrector> {
        let x = reader.read_f64::<NativeEndian>()?;
        let y = reader.read_f64::<NativeEndian>()?;
        let mut z = vec![0.; num_correctors as usize];
        reader.read_f32_into::<NativeEndian>(&mut z)?;
        Ok(IrregularCorrector { x, y, z })
    }
}

/// The surface corrections layer.
#[derive(Debug)]
pub struct SurfaceCorrections {
    descriptor: LayerDescriptor,
    handle: DatasetHandle,
}

impl SurfaceCorrections {
    /// Creates the correctors dataset and its attributes.
    pub(crate) fn create(
        container: &mut Container,
        descriptor: SurfaceCorrectionsDescriptor,
    ) -> Result<SurfaceCorrections> {
        let path = descriptor.core.internal_path.clone();
        let mut fields = Vec::new();
        if descriptor.topography == Topography::IrregularlySpaced {
            fields.push(FieldDef::new("x", FieldKind::F64));
            fields.push(FieldDef::new("y", FieldKind::F64));
        }
        fields.push(FieldDef::new(
            "z",
            FieldKind::F32Array(u32::from(descriptor.num_correctors)),
        ));
        let chunk = descriptor.core.chunk_size;
        let spec = DatasetSpec::new(
            ElementType::Compound(crate::container::CompoundLayout::new(fields)),
            vec![0, 0],
            vec![Extent::Unlimited, Extent::Unlimited],
        )
        .chunked(vec![chunk, chunk], descriptor.core.compression_level);
        let handle = container.create_dataset(&path, spec)?;

        container.create_attr(&path, SURFACE_TYPE, AttrType::U8)?;
        container.write_attr(
            &path,
            SURFACE_TYPE,
            AttributeValue::U8(descriptor.topography.as_u8()),
        )?;
        container.create_attr(&path, VERTICAL_DATUM, AttrType::String(MAX_DATUMS_LENGTH))?;
        if descriptor.topography == Topography::GridExtents {
            for name in [SW_CORNER_X, SW_CORNER_Y, NODE_SPACING_X, NODE_SPACING_Y] {
                container.create_attr(&path, name, AttrType::F64)?;
            }
        }

        Ok(SurfaceCorrections {
            descriptor: LayerDescriptor::SurfaceCorrections(descriptor),
            handle,
        })
    }

    /// Opens the correctors dataset, reconstructing the descriptor from the
    /// file.
    pub(crate) fn open(container: &Container, id: u32) -> Result<SurfaceCorrections> {
        let path = crate::layer::LayerType::SurfaceCorrection
            .internal_path()
            .unwrap_or("");
        let handle = container.open_dataset(path)?;
        let topography =
            Topography::from_u8(container.read_attr(path, SURFACE_TYPE)?.as_u8()?)?;
        let layout = container
            .dataset_element(handle)?
            .as_compound()
            .ok_or(Error::CannotReadNumCorrectors)?;
        let num_correctors = match layout
            .field_index("z")
            .map(|i| layout.fields()[i].kind)
        {
            Some(FieldKind::F32Array(n)) => u8::try_from(n)
                .map_err(|_| Error::TooManyCorrectors(u8::MAX))?,
            _ => return Err(Error::CannotReadNumCorrectors),
        };

        let chunk = container
            .dataset_chunk(handle)?
            .map(|c| c[0])
            .unwrap_or(0);
        let compression = container.dataset_compression(handle)?;
        let mut descriptor =
            SurfaceCorrectionsDescriptor::new(id, topography, num_correctors, chunk, compression)?;
        let dims = container.dataset_dims(handle)?;
        descriptor.core.dims = (dims[0], dims[1]);
        descriptor.vertical_datums = container
            .read_attr(path, VERTICAL_DATUM)?
            .as_str()?
            .to_string();
        if topography == Topography::GridExtents {
            descriptor.origin = (
                container.read_attr(path, SW_CORNER_X)?.as_f64()?,
                container.read_attr(path, SW_CORNER_Y)?.as_f64()?,
            );
            descriptor.spacing = (
                container.read_attr(path, NODE_SPACING_X)?.as_f64()?,
                container.read_attr(path, NODE_SPACING_Y)?.as_f64()?,
            );
        }

        Ok(SurfaceCorrections {
            descriptor: LayerDescriptor::SurfaceCorrections(descriptor),
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

    fn corrections_descriptor(&self) -> Result<&SurfaceCorrectionsDescriptor> {
        match &self.descriptor {
            LayerDescriptor::SurfaceCorrections(descriptor) => Ok(descriptor),
            _ => Err(Error::UnexpectedLayerDescriptorType),
        }
    }

    fn corrections_descriptor_mut(&mut self) -> Result<&mut SurfaceCorrectionsDescriptor> {
        match &mut self.descriptor {
            LayerDescriptor::SurfaceCorrections(descriptor) => Ok(descriptor),
            _ => Err(Error::UnexpectedLayerDescriptorType),
        }
    }

    /// Reads a region of packed corrector records.
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

    /// Writes a region of packed corrector records, growing the dataset as
    /// needed.
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
        if buffer.len() as u64 != rows * cols * self.descriptor.element_size() as u64 {
            return Err(Error::InvalidReadSize);
        }
        let new_dims = ensure_extent(
            container,
            self.handle,
            u64::from(row_end) + 1,
            u64::from(column_end) + 1,
        )?;
        container.write_hyperslab(
            self.handle,
            &[u64::from(row_start), u64::from(column_start)],
            &[rows, cols],
            buffer,
        )?;
        self.corrections_descriptor_mut()?.core.dims = new_dims;
        Ok(())
    }

    /// Writes the descriptor's attributes to the container.
    pub fn flush_attributes(&self, container: &mut Container) -> Result<()> {
        let descriptor = self.corrections_descriptor()?;
        let path = &descriptor.core.internal_path;
        container.write_attr(
            path,
            SURFACE_TYPE,
            AttributeValue::U8(descriptor.topography.as_u8()),
        )?;
        container.write_attr(
            path,
            VERTICAL_DATUM,
            AttributeValue::String(descriptor.vertical_datums.clone()),
        )?;
        if descriptor.topography == Topography::GridExtents {
            container.write_attr(path, SW_CORNER_X, AttributeValue::F64(descriptor.origin.0))?;
            container.write_attr(path, SW_CORNER_Y, AttributeValue::F64(descriptor.origin.1))?;
            container.write_attr(
                path,
                NODE_SPACING_X,
                AttributeValue::F64(descriptor.spacing.0),
            )?;
            container.write_attr(
                path,
                NODE_SPACING_Y,
                AttributeValue::F64(descriptor.spacing.1),
            )?;
        }
        Ok(())
    }

    /// Reads a region of `base`, corrected into the target vertical datum.
    ///
    /// The output has the same packed `f32` layout as `base.read`; cells
    /// holding a null keep [NULL_GENERIC](crate::NULL_GENERIC).
    #[allow(clippy::too_many_arguments)]
    pub fn read_corrected(
        &self,
        container: &Container,
        row_start: u32,
        column_start: u32,
        row_end: u32,
        column_end: u32,
        corrector: u8,
        base: &Layer,
        grid: &GridTransform,
        dataset_dims: (u32, u32),
        geographic: bool,
    ) -> Result<Vec<u8>> {
        check_read_region(
            (u64::from(dataset_dims.0), u64::from(dataset_dims.1)),
            row_start,
            column_start,
            row_end,
            column_end,
        )?;
        let mut out = Vec::with_capacity(
            (row_end - row_start + 1) as usize * (column_end - column_start + 1) as usize * 4,
        );
        let mut last_hit = None;
        for row in row_start..=row_end {
            let sep = self.read_corrected_row_inner(
                container,
                row,
                column_start,
                column_end,
                corrector,
                base,
                grid,
                geographic,
                &mut last_hit,
            )?;
            out.extend_from_slice(&sep);
        }
        Ok(out)
    }

    /// Reads one corrected row of `base`.
    #[allow(clippy::too_many_arguments)]
    pub fn read_corrected_row(
        &self,
        container: &Container,
        row: u32,
        column_start: u32,
        column_end: u32,
        corrector: u8,
        base: &Layer,
        grid: &GridTransform,
        geographic: bool,
    ) -> Result<Vec<u8>> {
        let mut last_hit = None;
        self.read_corrected_row_inner(
            container,
            row,
            column_start,
            column_end,
            corrector,
            base,
            grid,
            geographic,
            &mut last_hit,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn read_corrected_row_inner(
        &self,
        container: &Container,
        row: u32,
        column_start: u32,
        column_end: u32,
        corrector: u8,
        base: &Layer,
        grid: &GridTransform,
        geographic: bool,
        last_hit: &mut Option<(u64, u64)>,
    ) -> Result<Vec<u8>> {
        let descriptor = self.corrections_descriptor()?;
        if corrector < 1 || corrector > descriptor.num_correctors {
            return Err(Error::InvalidCorrector(corrector));
        }
        let corrector = usize::from(corrector - 1);

        let row_bytes = base.read(container, row, column_start, row, column_end)?;
        let mut values: Vec<f32> = row_bytes
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        let corrector_dims = container.dataset_dims(self.handle)?;
        let (nrows, ncols) = (corrector_dims[0], corrector_dims[1]);
        if nrows == 0 || ncols == 0 {
            return Err(Error::InvalidReadSize);
        }

        match descriptor.topography {
            Topography::GridExtents => self.correct_gridded(
                container,
                descriptor,
                row,
                column_start,
                &mut values,
                corrector,
                grid,
                geographic,
                (nrows, ncols),
            )?,
            Topography::IrregularlySpaced => self.correct_irregular(
                container,
                descriptor,
                row,
                column_start,
                &mut values,
                corrector,
                grid,
                geographic,
                (nrows, ncols),
                last_hit,
            )?,
        }

        let mut out = Vec::with_capacity(values.len() * 4);
        for value in values {
            out.write_f32::<NativeEndian>(value)?;
        }
        Ok(out)
    }

    #[allow(clippy::too_many_arguments)]
    fn correct_gridded(
        &self,
        container: &Container,
        descriptor: &SurfaceCorrectionsDescriptor,
        row: u32,
        column_start: u32,
        values: &mut [f32],
        corrector: usize,
        grid: &GridTransform,
        geographic: bool,
        (nrows, ncols): (u64, u64),
    ) -> Result<()> {
        let (sw_x, sw_y) = descriptor.origin;
        let (ns_x, ns_y) = descriptor.spacing;
        if ns_x == 0. || ns_y == 0. {
            return Err(Error::InvalidDescriptor(
                "gridded correctors without node spacing".to_string(),
            ));
        }
        let resratio = if geographic { ns_x / ns_y } else { 1.0 };
        let element_size = descriptor.element_size();

        for (index, value) in values.iter_mut().enumerate() {
            if *value == NULL_GENERIC || *value == NULL_ELEVATION || *value == NULL_UNCERTAINTY {
                continue;
            }
            let column = column_start + index as u32;
            let (node_x, node_y) = grid.grid_to_projected(row, column);

            // The four surrounding corrector nodes.
            let mut col_range = [
                ((node_x - sw_x) / ns_x).floor().abs() as u64,
                ((node_x - sw_x) / ns_x).ceil().abs() as u64,
            ];
            let mut row_range = [
                ((node_y - sw_y) / ns_y).floor().abs() as u64,
                ((node_y - sw_y) / ns_y).ceil().abs() as u64,
            ];
            clamp_and_expand(&mut col_range, ncols);
            clamp_and_expand(&mut row_range, nrows);

            let mut exact_hit = false;
            let mut sum_sep = 0.0_f64;
            let mut sum = 0.0_f64;

            'rows: for q in row_range[0]..=row_range[1] {
                let buffer = self.read(
                    container,
                    q as u32,
                    col_range[0] as u32,
                    q as u32,
                    col_range[1] as u32,
                )?;
                let y1 = sw_y + q as f64 * ns_y;
                for (u, record) in (col_range[0]..=col_range[1]).zip(buffer.chunks_exact(element_size))
                {
                    let z1 = read_z(record, 0, corrector);
                    let x1 = sw_x + u as f64 * ns_x;
                    if node_x == x1 && node_y == y1 {
                        exact_hit = true;
                        *value += z1;
                        break 'rows;
                    }
                    let dist_sq = (node_x - x1).abs().powi(2)
                        + (resratio * (node_y - y1).abs()).powi(2);
                    sum_sep += f64::from(z1) / dist_sq;
                    sum += 1.0 / dist_sq;
                }
            }

            if !exact_hit {
                if sum != 0.0 {
                    *value += (sum_sep / sum) as f32;
                } else {
                    *value = NULL_GENERIC;
                }
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn correct_irregular(
        &self,
        container: &Container,
        descriptor: &SurfaceCorrectionsDescriptor,
        row: u32,
        column_start: u32,
        values: &mut [f32],
        corrector: usize,
        grid: &GridTransform,
        geographic: bool,
        (nrows, ncols): (u64, u64),
        last_hit: &mut Option<(u64, u64)>,
    ) -> Result<()> {
        let element_size = descriptor.element_size();
        let (dx, dy) = grid.spacing();
        let resratio = if geographic && dy != 0. { dx / dy } else { 1.0 };

        for (index, value) in values.iter_mut().enumerate() {
            if *value == NULL_GENERIC || *value == NULL_ELEVATION || *value == NULL_UNCERTAINTY {
                continue;
            }
            let column = column_start + index as u32;
            let (node_x, node_y) = grid.grid_to_projected(row, column);

            // Search the whole table until a node has been hit, then only a
            // window around the last hit.
            let (row_range, col_range) = match *last_hit {
                None => ([0, nrows - 1], [0, ncols - 1]),
                Some((hit_row, hit_col)) => (
                    search_window(hit_row, nrows),
                    search_window(hit_col, ncols),
                ),
            };

            let mut exact_hit = false;
            let mut sum_sep = 0.0_f64;
            let mut sum = 0.0_f64;
            let mut least_dist_sq = f64::MAX;

            'rows: for q in row_range[0]..=row_range[1] {
                let buffer = self.read(
                    container,
                    q as u32,
                    col_range[0] as u32,
                    q as u32,
                    col_range[1] as u32,
                )?;
                for (u, record) in (col_range[0]..=col_range[1]).zip(buffer.chunks_exact(element_size))
                {
                    let x1 = read_f64(record, 0);
                    let y1 = read_f64(record, 8);
                    let z1 = read_z(record, 16, corrector);
                    if node_x == x1 && node_y == y1 {
                        exact_hit = true;
                        *value += z1;
                        *last_hit = Some((q, u));
                        break 'rows;
                    }
                    let dist_sq = (node_x - x1).abs().powi(2)
                        + (resratio * (node_y - y1).abs()).powi(2);
                    if dist_sq < least_dist_sq {
                        least_dist_sq = dist_sq;
                        *last_hit = Some((q, u));
                    }
                    sum_sep += f64::from(z1) / dist_sq;
                    sum += 1.0 / dist_sq;
                }
            }

            if !exact_hit {
                if sum != 0.0 {
                    *value += (sum_sep / sum) as f32;
                } else {
                    *value = NULL_GENERIC;
                }
            }
        }
        Ok(())
    }
}

/// Reads a packed f64 at `offset` out of one record.
fn read_f64(record: &[u8], offset: usize) -> f64 {
    record
        .get(offset..offset + 8)
        .map(|b| f64::from_ne_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
        .unwrap_or(0.)
}

/// Reads the packed Z channel at `corrector` out of one record.
fn read_z(record: &[u8], z_offset: usize, corrector: usize) -> f32 {
    let start = z_offset + corrector * 4;
    record
        .get(start..start + 4)
        .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
        .unwrap_or(0.)
}

/// Clamps a node range to the dataset and widens degenerate pairs by one.
fn clamp_and_expand(range: &mut [u64; 2], len: u64) {
    if range[0] > range[1] {
        range.swap(0, 1);
    }
    range[0] = range[0].min(len - 1);
    range[1] = range[1].min(len - 1);
    if range[0] == range[1] {
        if range[0] > 0 {
            range[0] -= 1;
        }
        if range[1] + 1 < len {
            range[1] += 1;
        }
    }
}

/// The inclusive search window of `SEARCH_RADIUS` cells around `center`.
fn search_window(center: u64, len: u64) -> [u64; 2] {
    let start = (center as i64 - SEARCH_RADIUS).max(0) as u64;
    let end = (center + SEARCH_RADIUS as u64).min(len - 1);
    [start, end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_expands_degenerate_ranges() {
        let mut range = [0, 0];
        clamp_and_expand(&mut range, 4);
        assert_eq!([0, 1], range);

        let mut range = [3, 3];
        clamp_and_expand(&mut range, 4);
        assert_eq!([2, 3], range);

        let mut range = [9, 9];
        clamp_and_expand(&mut range, 4);
        assert_eq!([2, 3], range);
    }

    #[test]
    fn search_window_is_clamped() {
        assert_eq!([0, 4], search_window(1, 100));
        assert_eq!([96, 99], search_window(99, 100));
    }

    #[test]
    fn corrector_records_round_trip() {
        let record = IrregularCorrector {
            x: 1.5,
            y: -2.5,
            z: vec![0.5, 1.5],
        };
        let mut bytes = Vec::new();
        record.write_to(&mut bytes).unwrap();
        assert_eq!(24, bytes.len());
        let read = IrregularCorrector::read_from(&mut bytes.as_slice(), 2).unwrap();
        assert_eq!(record, read);
    }
}

//! Layers and the shared layer engine.
//!
//! A [Layer] wraps a descriptor and a typed dataset handle. The descriptor
//! is the single source of truth for attributes; the container dataset is
//! the single source of truth for cells. All cell buffers are packed,
//! native-endian, row-major byte arrays of the descriptor's element size.

pub use self::georef::{
    CompoundValue, FieldDefinition, GeorefMetadataLayer, Profile, Record, RecordDefinition,
    ValueKind, ValueTable, create_record_noaa_ocs_2022_10, noaa_ocs_2022_10_definition,
};
pub use self::interleaved::InterleavedLegacyLayer;
pub use self::simple::SimpleLayer;
pub use self::surface_corrections::SurfaceCorrections;

use crate::container::{Container, DatasetHandle};
use crate::descriptor::LayerDescriptor;
use crate::vr::{VRMetadata, VRNode, VRRefinements};
use crate::{Error, Result};

pub mod georef;
pub mod surface_corrections;

mod interleaved;
mod simple;

/// The closed set of layer types a BAG may hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LayerType {
    /// The mandatory elevation surface.
    Elevation,
    /// The mandatory uncertainty surface.
    Uncertainty,
    /// Hypothesis strength (pre-2.0 NODE group).
    HypothesisStrength,
    /// Number of hypotheses.
    NumHypotheses,
    /// Shoal elevation (pre-2.0 ELEVATION group).
    ShoalElevation,
    /// Standard deviation.
    StdDev,
    /// Number of soundings (pre-2.0 ELEVATION group).
    NumSoundings,
    /// Average elevation.
    AverageElevation,
    /// Nominal elevation.
    NominalElevation,
    /// The vertical datum surface corrections layer.
    SurfaceCorrection,
    /// A georeferenced metadata lookup layer.
    GeorefMetadata,
    /// The variable resolution metadata layer.
    VarResMetadata,
    /// The variable resolution refinement layer.
    VarResRefinement,
    /// The variable resolution node layer.
    VarResNode,
}

/// The numeric type a layer stores per cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataType {
    /// 32-bit float cells.
    F32,
    /// Unsigned 32-bit cells.
    U32,
    /// Unsigned 8-bit cells.
    U8,
    /// Unsigned 16-bit cells.
    U16,
    /// Unsigned 64-bit cells.
    U64,
    /// Boolean cells.
    Bool,
    /// String cells.
    String,
    /// Compound record cells.
    Compound,
}

impl LayerType {
    /// Returns the numeric data type derived from this layer type.
    pub fn data_type(&self) -> DataType {
        match *self {
            LayerType::NumHypotheses | LayerType::NumSoundings => DataType::U32,
            LayerType::SurfaceCorrection
            | LayerType::GeorefMetadata
            | LayerType::VarResMetadata
            | LayerType::VarResRefinement
            | LayerType::VarResNode => DataType::Compound,
            _ => DataType::F32,
        }
    }

    /// Returns true for layers holding one scalar per cell in their own
    /// dataset.
    pub fn is_simple(&self) -> bool {
        matches!(
            *self,
            LayerType::Elevation
                | LayerType::Uncertainty
                | LayerType::NumHypotheses
                | LayerType::StdDev
                | LayerType::AverageElevation
                | LayerType::NominalElevation
        )
    }

    /// Returns the container path of this layer's own dataset.
    ///
    /// Layers that live inside another dataset (the legacy interleaved
    /// members and georef metadata layers) have none.
    pub fn internal_path(&self) -> Option<&'static str> {
        match *self {
            LayerType::Elevation => Some("/BAG_root/elevation"),
            LayerType::Uncertainty => Some("/BAG_root/uncertainty"),
            LayerType::NumHypotheses => Some("/BAG_root/num_hypotheses"),
            LayerType::StdDev => Some("/BAG_root/standard_dev"),
            LayerType::AverageElevation => Some("/BAG_root/average"),
            LayerType::NominalElevation => Some("/BAG_root/nominal_elevation"),
            LayerType::SurfaceCorrection => Some("/BAG_root/vertical_datum_corrections"),
            LayerType::VarResMetadata => Some("/BAG_root/varres_metadata"),
            LayerType::VarResRefinement => Some("/BAG_root/varres_refinement"),
            LayerType::VarResNode => Some("/BAG_root/varres_node"),
            LayerType::HypothesisStrength
            | LayerType::ShoalElevation
            | LayerType::NumSoundings
            | LayerType::GeorefMetadata => None,
        }
    }

    /// Returns the standard name of this layer type.
    pub fn standard_name(&self) -> &'static str {
        match *self {
            LayerType::Elevation => "Elevation",
            LayerType::Uncertainty => "Uncertainty",
            LayerType::HypothesisStrength => "Hypothesis_Strength",
            LayerType::NumHypotheses => "Num_Hypotheses",
            LayerType::ShoalElevation => "Shoal_Elevation",
            LayerType::StdDev => "Std_Dev",
            LayerType::NumSoundings => "Num_Soundings",
            LayerType::AverageElevation => "Average_Elevation",
            LayerType::NominalElevation => "Nominal_Elevation",
            LayerType::SurfaceCorrection => "Surface_Correction",
            LayerType::GeorefMetadata => "Georef_Metadata",
            LayerType::VarResMetadata => "VarRes_Metadata",
            LayerType::VarResRefinement => "VarRes_Refinement",
            LayerType::VarResNode => "VarRes_Node",
        }
    }
}

/// The kind of pre-2.0 interleaved group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupType {
    /// The NODE group: hypothesis strength and hypothesis count.
    Node,
    /// The ELEVATION group: shoal elevation, standard deviation, soundings.
    Elevation,
}

impl GroupType {
    /// Returns the container path of the group's compound dataset.
    pub fn internal_path(&self) -> &'static str {
        match *self {
            GroupType::Node => "/BAG_root/node",
            GroupType::Elevation => "/BAG_root/elevation_solution",
        }
    }

    /// Returns the layer types interleaved into this group, in field order.
    pub fn layer_types(&self) -> &'static [LayerType] {
        match *self {
            GroupType::Node => &[LayerType::HypothesisStrength, LayerType::NumHypotheses],
            GroupType::Elevation => &[
                LayerType::ShoalElevation,
                LayerType::StdDev,
                LayerType::NumSoundings,
            ],
        }
    }

    /// Returns the record field name backing the given member layer.
    pub fn field_name(&self, layer_type: LayerType) -> Option<&'static str> {
        match (*self, layer_type) {
            (GroupType::Node, LayerType::HypothesisStrength) => Some("hyp_strength"),
            (GroupType::Node, LayerType::NumHypotheses) => Some("num_hypotheses"),
            (GroupType::Elevation, LayerType::ShoalElevation) => Some("shoal_elevation"),
            (GroupType::Elevation, LayerType::StdDev) => Some("stddev"),
            (GroupType::Elevation, LayerType::NumSoundings) => Some("num_soundings"),
            _ => None,
        }
    }
}

/// The topography of the surface corrections layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Topography {
    /// Correctors form a regular grid spanning the surface extents.
    GridExtents,
    /// Correctors carry their own positions.
    IrregularlySpaced,
}

impl Topography {
    /// Returns the wire value of the `surface_type` attribute.
    pub fn as_u8(&self) -> u8 {
        match *self {
            Topography::GridExtents => 1,
            Topography::IrregularlySpaced => 2,
        }
    }

    /// Parses the wire value of the `surface_type` attribute.
    pub fn from_u8(value: u8) -> Result<Topography> {
        match value {
            1 => Ok(Topography::GridExtents),
            2 => Ok(Topography::IrregularlySpaced),
            other => Err(Error::UnsupportedSurfaceType(other)),
        }
    }
}

/// Any layer of a BAG dataset.
#[derive(Debug)]
pub enum Layer {
    /// A simple layer.
    Simple(SimpleLayer),
    /// A read-only interleaved legacy layer.
    InterleavedLegacy(InterleavedLegacyLayer),
    /// The surface corrections layer.
    SurfaceCorrections(SurfaceCorrections),
    /// The variable resolution metadata layer.
    VRMetadata(VRMetadata),
    /// The variable resolution refinement layer.
    VRRefinements(VRRefinements),
    /// The variable resolution node layer.
    VRNode(VRNode),
    /// A georeferenced metadata lookup layer.
    GeorefMetadata(GeorefMetadataLayer),
}

impl Layer {
    /// Returns this layer's descriptor.
    pub fn descriptor(&self) -> &LayerDescriptor {
        match self {
            Layer::Simple(layer) => layer.descriptor(),
            Layer::InterleavedLegacy(layer) => layer.descriptor(),
            Layer::SurfaceCorrections(layer) => layer.descriptor(),
            Layer::VRMetadata(layer) => layer.descriptor(),
            Layer::VRRefinements(layer) => layer.descriptor(),
            Layer::VRNode(layer) => layer.descriptor(),
            Layer::GeorefMetadata(layer) => layer.descriptor(),
        }
    }

    /// Returns this layer's descriptor for mutation.
    pub fn descriptor_mut(&mut self) -> &mut LayerDescriptor {
        match self {
            Layer::Simple(layer) => layer.descriptor_mut(),
            Layer::InterleavedLegacy(layer) => layer.descriptor_mut(),
            Layer::SurfaceCorrections(layer) => layer.descriptor_mut(),
            Layer::VRMetadata(layer) => layer.descriptor_mut(),
            Layer::VRRefinements(layer) => layer.descriptor_mut(),
            Layer::VRNode(layer) => layer.descriptor_mut(),
            Layer::GeorefMetadata(layer) => layer.descriptor_mut(),
        }
    }

    /// Returns this layer's type.
    pub fn layer_type(&self) -> LayerType {
        self.descriptor().layer_type()
    }

    /// Reads a region as packed bytes.
    ///
    /// For the 1-D variable resolution arrays the row indices are ignored
    /// and only the column range selects data.
    pub fn read(
        &self,
        container: &Container,
        row_start: u32,
        column_start: u32,
        row_end: u32,
        column_end: u32,
    ) -> Result<Vec<u8>> {
        match self {
            Layer::Simple(layer) => {
                layer.read(container, row_start, column_start, row_end, column_end)
            }
            Layer::InterleavedLegacy(layer) => {
                layer.read(container, row_start, column_start, row_end, column_end)
            }
            Layer::SurfaceCorrections(layer) => {
                layer.read(container, row_start, column_start, row_end, column_end)
            }
            Layer::VRMetadata(layer) => {
                layer.read(container, row_start, column_start, row_end, column_end)
            }
            Layer::VRRefinements(layer) => layer.read(container, column_start, column_end),
            Layer::VRNode(layer) => layer.read(container, column_start, column_end),
            Layer::GeorefMetadata(layer) => {
                layer.read(container, row_start, column_start, row_end, column_end)
            }
        }
    }

    /// Writes a region of packed bytes, extending the dataset when its
    /// maximum extents permit.
    pub fn write(
        &mut self,
        container: &mut Container,
        row_start: u32,
        column_start: u32,
        row_end: u32,
        column_end: u32,
        buffer: &[u8],
    ) -> Result<()> {
        match self {
            Layer::Simple(layer) => layer.write(
                container,
                row_start,
                column_start,
                row_end,
                column_end,
                buffer,
            ),
            Layer::InterleavedLegacy(_) => Err(Error::UnsupportedOperation(
                "write to an interleaved legacy layer",
            )),
            Layer::SurfaceCorrections(layer) => layer.write(
                container,
                row_start,
                column_start,
                row_end,
                column_end,
                buffer,
            ),
            Layer::VRMetadata(layer) => layer.write(
                container,
                row_start,
                column_start,
                row_end,
                column_end,
                buffer,
            ),
            Layer::VRRefinements(layer) => {
                layer.write(container, column_start, column_end, buffer)
            }
            Layer::VRNode(layer) => layer.write(container, column_start, column_end, buffer),
            Layer::GeorefMetadata(layer) => layer.write(
                container,
                row_start,
                column_start,
                row_end,
                column_end,
                buffer,
            ),
        }
    }

    /// Writes this layer's descriptor attributes to the container.
    pub fn flush_attributes(&self, container: &mut Container) -> Result<()> {
        match self {
            Layer::Simple(layer) => layer.flush_attributes(container),
            Layer::InterleavedLegacy(_) => Ok(()),
            Layer::SurfaceCorrections(layer) => layer.flush_attributes(container),
            Layer::VRMetadata(layer) => layer.flush_attributes(container),
            Layer::VRRefinements(layer) => layer.flush_attributes(container),
            Layer::VRNode(layer) => layer.flush_attributes(container),
            Layer::GeorefMetadata(layer) => layer.flush_attributes(container),
        }
    }

    /// Returns the surface corrections layer, if that is what this is.
    pub fn as_surface_corrections(&self) -> Option<&SurfaceCorrections> {
        match self {
            Layer::SurfaceCorrections(layer) => Some(layer),
            _ => None,
        }
    }

    /// Returns the georef metadata layer, if that is what this is.
    pub fn as_georef_metadata(&self) -> Option<&GeorefMetadataLayer> {
        match self {
            Layer::GeorefMetadata(layer) => Some(layer),
            _ => None,
        }
    }

    /// Returns the georef metadata layer for mutation, if that is what this
    /// is.
    pub fn as_georef_metadata_mut(&mut self) -> Option<&mut GeorefMetadataLayer> {
        match self {
            Layer::GeorefMetadata(layer) => Some(layer),
            _ => None,
        }
    }
}

/// Checks a 2-D read region against the current extents.
pub(crate) fn check_read_region(
    dims: (u64, u64),
    row_start: u32,
    column_start: u32,
    row_end: u32,
    column_end: u32,
) -> Result<(u64, u64)> {
    if row_start > row_end
        || column_start > column_end
        || u64::from(row_end) >= dims.0
        || u64::from(column_end) >= dims.1
    {
        return Err(Error::InvalidReadSize);
    }
    Ok((
        u64::from(row_end - row_start) + 1,
        u64::from(column_end - column_start) + 1,
    ))
}

/// Checks the ordering of a write region; extents are handled by extension.
pub(crate) fn check_write_region(
    row_start: u32,
    column_start: u32,
    row_end: u32,
    column_end: u32,
) -> Result<(u64, u64)> {
    if row_start > row_end || column_start > column_end {
        return Err(Error::InvalidReadSize);
    }
    Ok((
        u64::from(row_end - row_start) + 1,
        u64::from(column_end - column_start) + 1,
    ))
}

/// Grows a 2-D dataset to cover the write region, when needed.
///
/// Returns the dataset's dimensions afterwards.
pub(crate) fn ensure_extent(
    container: &mut Container,
    handle: DatasetHandle,
    rows_needed: u64,
    cols_needed: u64,
) -> Result<(u64, u64)> {
    let dims = container.dataset_dims(handle)?;
    let new_dims = [dims[0].max(rows_needed), dims[1].max(cols_needed)];
    if new_dims != dims.as_slice() {
        container.extend(handle, &new_dims)?;
    }
    Ok((new_dims[0], new_dims[1]))
}

/// The default square chunk side for a grid of the given size.
///
/// Grids over 100 in both axes chunk at 100, over 10 at 10; anything
/// smaller is unchunked (and therefore stored uncompressed).
pub(crate) fn default_chunk_size(rows: u64, cols: u64) -> u64 {
    if rows > 100 && cols > 100 {
        100
    } else if rows > 10 && cols > 10 {
        10
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_types_derive_from_layer_types() {
        assert_eq!(DataType::F32, LayerType::Elevation.data_type());
        assert_eq!(DataType::U32, LayerType::NumHypotheses.data_type());
        assert_eq!(DataType::Compound, LayerType::VarResMetadata.data_type());
    }

    #[test]
    fn read_region_is_validated() {
        assert!(check_read_region((3, 4), 0, 0, 2, 3).is_ok());
        assert!(matches!(
            check_read_region((3, 4), 0, 0, 3, 3),
            Err(Error::InvalidReadSize)
        ));
        assert!(matches!(
            check_read_region((3, 4), 2, 0, 1, 3),
            Err(Error::InvalidReadSize)
        ));
    }

    #[test]
    fn default_chunking_tiers() {
        assert_eq!(100, default_chunk_size(101, 101));
        assert_eq!(10, default_chunk_size(50, 101));
        assert_eq!(0, default_chunk_size(10, 500));
    }

    #[test]
    fn group_membership() {
        assert_eq!(
            Some("stddev"),
            GroupType::Elevation.field_name(LayerType::StdDev)
        );
        assert_eq!(None, GroupType::Node.field_name(LayerType::StdDev));
    }

    #[test]
    fn topography_wire_values() {
        assert_eq!(1, Topography::GridExtents.as_u8());
        assert_eq!(
            Topography::IrregularlySpaced,
            Topography::from_u8(2).unwrap()
        );
        assert!(matches!(
            Topography::from_u8(0),
            Err(Error::UnsupportedSurfaceType(0))
        ));
    }
}

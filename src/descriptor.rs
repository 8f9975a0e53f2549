//! Layer descriptors.
//!
//! A descriptor is the in-memory record of a layer's metadata: identity,
//! container path, chunking and compression, dimensions, and the attribute
//! values (min/max and family-specific settings) that mirror on-disk
//! attributes. Setters only touch memory; a layer's `flush_attributes`
//! propagates them to the container.

use crate::layer::{GroupType, LayerType, Topography};
use crate::{Error, Result};
use num_traits::Bounded;

/// The maximum number of correctors a surface corrections layer may carry.
pub const MAX_CORRECTORS: u8 = 10;

/// The maximum stored length of the vertical datums string.
pub const MAX_DATUMS_LENGTH: usize = 256;

/// A min/max pair folded from written data.
///
/// Starts out inverted (`min > max`) so the first folded value sets both
/// ends.
///
/// # Examples
///
/// ```
/// # use bag::descriptor::MinMax;
/// let mut minmax = MinMax::<f32>::unset();
/// assert!(!minmax.is_set());
/// minmax.update(3.0);
/// minmax.update(-1.0);
/// assert_eq!((-1.0, 3.0), (minmax.min, minmax.max));
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MinMax<T> {
    /// The smallest folded value.
    pub min: T,
    /// The largest folded value.
    pub max: T,
}

impl<T: Bounded + PartialOrd + Copy> MinMax<T> {
    /// An inverted pair that no value has been folded into yet.
    pub fn unset() -> MinMax<T> {
        MinMax {
            min: T::max_value(),
            max: T::min_value(),
        }
    }

    /// Creates a pair from explicit bounds.
    pub fn new(min: T, max: T) -> MinMax<T> {
        MinMax { min, max }
    }

    /// Folds one value in, narrowing `min` and widening `max`.
    ///
    /// Unordered values (NaN) never update either end.
    pub fn update(&mut self, value: T) {
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
    }

    /// Returns true once at least one value has been folded in.
    pub fn is_set(&self) -> bool {
        self.min <= self.max
    }
}

/// Checks a chunk size / compression level combination.
pub(crate) fn validate_chunking(chunk_size: u64, compression_level: u8) -> Result<()> {
    if compression_level > 9 {
        return Err(Error::InvalidCompressionLevel(compression_level));
    }
    if compression_level > 0 && chunk_size == 0 {
        return Err(Error::CompressionNeedsChunkingSet);
    }
    Ok(())
}

/// The metadata shared by every layer family.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct DescriptorCore {
    pub(crate) id: u32,
    pub(crate) layer_type: LayerType,
    pub(crate) internal_path: String,
    pub(crate) name: String,
    pub(crate) chunk_size: u64,
    pub(crate) compression_level: u8,
    pub(crate) dims: (u64, u64),
}

impl DescriptorCore {
    pub(crate) fn new(
        id: u32,
        layer_type: LayerType,
        internal_path: &str,
        name: &str,
        chunk_size: u64,
        compression_level: u8,
        dims: (u64, u64),
    ) -> Result<DescriptorCore> {
        validate_chunking(chunk_size, compression_level)?;
        Ok(DescriptorCore {
            id,
            layer_type,
            internal_path: internal_path.to_string(),
            name: name.to_string(),
            chunk_size,
            compression_level,
            dims,
        })
    }
}

/// A descriptor for a simple (single-scalar-per-cell) layer.
#[derive(Clone, Debug, PartialEq)]
pub struct SimpleLayerDescriptor {
    pub(crate) core: DescriptorCore,
    pub(crate) min_max: MinMax<f32>,
}

impl SimpleLayerDescriptor {
    /// Creates a descriptor for a simple layer.
    pub fn new(
        id: u32,
        layer_type: LayerType,
        chunk_size: u64,
        compression_level: u8,
        dims: (u64, u64),
    ) -> Result<SimpleLayerDescriptor> {
        let path = layer_type
            .internal_path()
            .ok_or_else(|| Error::InvalidLayerDescriptor(format!("{layer_type:?} is not simple")))?;
        Ok(SimpleLayerDescriptor {
            core: DescriptorCore::new(
                id,
                layer_type,
                path,
                layer_type.standard_name(),
                chunk_size,
                compression_level,
                dims,
            )?,
            min_max: MinMax::unset(),
        })
    }

    /// Returns the min/max pair.
    pub fn min_max(&self) -> MinMax<f32> {
        self.min_max
    }

    /// Sets the min/max pair; in memory only until flushed.
    pub fn set_min_max(&mut self, min: f32, max: f32) {
        self.min_max = MinMax::new(min, max);
    }
}

/// A descriptor for a read-only pre-2.0 interleaved layer.
#[derive(Clone, Debug, PartialEq)]
pub struct InterleavedLegacyLayerDescriptor {
    pub(crate) core: DescriptorCore,
    pub(crate) group_type: GroupType,
    pub(crate) min_max: MinMax<f32>,
}

impl InterleavedLegacyLayerDescriptor {
    /// Creates a descriptor for one projected field of a legacy group.
    pub fn new(
        id: u32,
        layer_type: LayerType,
        group_type: GroupType,
        dims: (u64, u64),
    ) -> Result<InterleavedLegacyLayerDescriptor> {
        if !group_type.layer_types().contains(&layer_type) {
            return Err(Error::InvalidLayerDescriptor(format!(
                "{layer_type:?} is not a member of the {group_type:?} group"
            )));
        }
        Ok(InterleavedLegacyLayerDescriptor {
            core: DescriptorCore::new(
                id,
                layer_type,
                group_type.internal_path(),
                layer_type.standard_name(),
                0,
                0,
                dims,
            )?,
            group_type,
            min_max: MinMax::unset(),
        })
    }

    /// Returns the group this layer is interleaved into.
    pub fn group_type(&self) -> GroupType {
        self.group_type
    }

    /// Returns the min/max pair.
    pub fn min_max(&self) -> MinMax<f32> {
        self.min_max
    }
}

/// A descriptor for the surface corrections layer.
#[derive(Clone, Debug, PartialEq)]
pub struct SurfaceCorrectionsDescriptor {
    pub(crate) core: DescriptorCore,
    pub(crate) topography: Topography,
    pub(crate) num_correctors: u8,
    pub(crate) vertical_datums: String,
    pub(crate) origin: (f64, f64),
    pub(crate) spacing: (f64, f64),
}

impl SurfaceCorrectionsDescriptor {
    /// Creates a descriptor for a surface corrections layer.
    pub fn new(
        id: u32,
        topography: Topography,
        num_correctors: u8,
        chunk_size: u64,
        compression_level: u8,
    ) -> Result<SurfaceCorrectionsDescriptor> {
        if num_correctors == 0 || num_correctors > MAX_CORRECTORS {
            return Err(Error::TooManyCorrectors(num_correctors));
        }
        if chunk_size == 0 {
            // The correctors dataset starts empty and grows, so it must be
            // chunked even when stored uncompressed.
            return Err(if compression_level > 0 {
                Error::CompressionNeedsChunkingSet
            } else {
                Error::LayerRequiresChunkingSet
            });
        }
        Ok(SurfaceCorrectionsDescriptor {
            core: DescriptorCore::new(
                id,
                LayerType::SurfaceCorrection,
                LayerType::SurfaceCorrection.internal_path().unwrap_or(""),
                LayerType::SurfaceCorrection.standard_name(),
                chunk_size,
                compression_level,
                (0, 0),
            )?,
            topography,
            num_correctors,
            vertical_datums: String::new(),
            origin: (0., 0.),
            spacing: (0., 0.),
        })
    }

    /// Returns the topography kind.
    pub fn topography(&self) -> Topography {
        self.topography
    }

    /// Returns the number of Z channels per corrector record.
    pub fn num_correctors(&self) -> u8 {
        self.num_correctors
    }

    /// Returns the comma-separated vertical datum names.
    pub fn vertical_datums(&self) -> &str {
        &self.vertical_datums
    }

    /// Sets the vertical datum names, truncated to the stored maximum.
    pub fn set_vertical_datums(&mut self, datums: &str) {
        let mut datums = datums.to_string();
        datums.truncate(MAX_DATUMS_LENGTH);
        self.vertical_datums = datums;
    }

    /// Returns the corrector grid origin (grid extents only).
    pub fn origin(&self) -> (f64, f64) {
        self.origin
    }

    /// Sets the corrector grid origin.
    pub fn set_origin(&mut self, origin: (f64, f64)) {
        self.origin = origin;
    }

    /// Returns the corrector grid spacing (grid extents only).
    pub fn spacing(&self) -> (f64, f64) {
        self.spacing
    }

    /// Returns the packed size of one corrector record.
    pub fn element_size(&self) -> usize {
        match self.topography {
            Topography::GridExtents => 4 * self.num_correctors as usize,
            Topography::IrregularlySpaced => 16 + 4 * self.num_correctors as usize,
        }
    }

    /// Sets the corrector grid spacing.
    pub fn set_spacing(&mut self, spacing: (f64, f64)) {
        self.spacing = spacing;
    }
}

/// A descriptor for the variable resolution metadata layer.
#[derive(Clone, Debug, PartialEq)]
pub struct VRMetadataDescriptor {
    pub(crate) core: DescriptorCore,
    pub(crate) min_dimensions: (u32, u32),
    pub(crate) max_dimensions: (u32, u32),
    pub(crate) min_resolution: (f32, f32),
    pub(crate) max_resolution: (f32, f32),
}

impl VRMetadataDescriptor {
    /// Creates a descriptor for the variable resolution metadata layer.
    pub fn new(
        id: u32,
        chunk_size: u64,
        compression_level: u8,
        dims: (u64, u64),
    ) -> Result<VRMetadataDescriptor> {
        Ok(VRMetadataDescriptor {
            core: DescriptorCore::new(
                id,
                LayerType::VarResMetadata,
                LayerType::VarResMetadata.internal_path().unwrap_or(""),
                LayerType::VarResMetadata.standard_name(),
                chunk_size,
                compression_level,
                dims,
            )?,
            min_dimensions: (u32::MAX, u32::MAX),
            max_dimensions: (0, 0),
            min_resolution: (f32::MAX, f32::MAX),
            max_resolution: (f32::MIN, f32::MIN),
        })
    }

    /// Returns the minimum refinement dimensions `(x, y)`.
    pub fn min_dimensions(&self) -> (u32, u32) {
        self.min_dimensions
    }

    /// Returns the maximum refinement dimensions `(x, y)`.
    pub fn max_dimensions(&self) -> (u32, u32) {
        self.max_dimensions
    }

    /// Returns the minimum refinement resolution `(x, y)`.
    pub fn min_resolution(&self) -> (f32, f32) {
        self.min_resolution
    }

    /// Returns the maximum refinement resolution `(x, y)`.
    pub fn max_resolution(&self) -> (f32, f32) {
        self.max_resolution
    }
}

/// A descriptor for the variable resolution refinement layer.
#[derive(Clone, Debug, PartialEq)]
pub struct VRRefinementsDescriptor {
    pub(crate) core: DescriptorCore,
    pub(crate) depth: MinMax<f32>,
    pub(crate) uncertainty: MinMax<f32>,
}

impl VRRefinementsDescriptor {
    /// Creates a descriptor for the variable resolution refinement layer.
    pub fn new(
        id: u32,
        chunk_size: u64,
        compression_level: u8,
    ) -> Result<VRRefinementsDescriptor> {
        if chunk_size == 0 {
            return Err(if compression_level > 0 {
                Error::CompressionNeedsChunkingSet
            } else {
                Error::LayerRequiresChunkingSet
            });
        }
        Ok(VRRefinementsDescriptor {
            core: DescriptorCore::new(
                id,
                LayerType::VarResRefinement,
                LayerType::VarResRefinement.internal_path().unwrap_or(""),
                LayerType::VarResRefinement.standard_name(),
                chunk_size,
                compression_level,
                (1, 0),
            )?,
            depth: MinMax::unset(),
            uncertainty: MinMax::unset(),
        })
    }

    /// Returns the depth min/max.
    pub fn depth(&self) -> MinMax<f32> {
        self.depth
    }

    /// Returns the depth uncertainty min/max.
    pub fn uncertainty(&self) -> MinMax<f32> {
        self.uncertainty
    }
}

/// A descriptor for the variable resolution node layer.
#[derive(Clone, Debug, PartialEq)]
pub struct VRNodeDescriptor {
    pub(crate) core: DescriptorCore,
    pub(crate) hyp_strength: MinMax<f32>,
    pub(crate) num_hypotheses: MinMax<u32>,
    pub(crate) n_samples: MinMax<u32>,
}

impl VRNodeDescriptor {
    /// Creates a descriptor for the variable resolution node layer.
    pub fn new(id: u32, chunk_size: u64, compression_level: u8) -> Result<VRNodeDescriptor> {
        if chunk_size == 0 {
            return Err(if compression_level > 0 {
                Error::CompressionNeedsChunkingSet
            } else {
                Error::LayerRequiresChunkingSet
            });
        }
        Ok(VRNodeDescriptor {
            core: DescriptorCore::new(
                id,
                LayerType::VarResNode,
                LayerType::VarResNode.internal_path().unwrap_or(""),
                LayerType::VarResNode.standard_name(),
                chunk_size,
                compression_level,
                (1, 0),
            )?,
            hyp_strength: MinMax::unset(),
            num_hypotheses: MinMax::unset(),
            n_samples: MinMax::unset(),
        })
    }

    /// Returns the hypothesis strength min/max.
    pub fn hyp_strength(&self) -> MinMax<f32> {
        self.hyp_strength
    }

    /// Returns the hypothesis count min/max.
    pub fn num_hypotheses(&self) -> MinMax<u32> {
        self.num_hypotheses
    }

    /// Returns the sample count min/max.
    pub fn n_samples(&self) -> MinMax<u32> {
        self.n_samples
    }
}

/// A descriptor for a georeferenced metadata lookup layer.
#[derive(Clone, Debug, PartialEq)]
pub struct GeorefMetadataDescriptor {
    pub(crate) core: DescriptorCore,
    pub(crate) profile: String,
    pub(crate) host_layer: String,
}

impl GeorefMetadataDescriptor {
    /// Creates a descriptor for a georef metadata layer hosted by the named
    /// simple layer.
    pub fn new(
        id: u32,
        profile: &str,
        host_layer: &str,
        chunk_size: u64,
        compression_level: u8,
        dims: (u64, u64),
    ) -> Result<GeorefMetadataDescriptor> {
        let path = format!("/BAG_root/georef_metadata/{host_layer}");
        Ok(GeorefMetadataDescriptor {
            core: DescriptorCore::new(
                id,
                LayerType::GeorefMetadata,
                &path,
                host_layer,
                chunk_size,
                compression_level,
                dims,
            )?,
            profile: profile.to_string(),
            host_layer: host_layer.to_string(),
        })
    }

    /// Returns the profile name.
    pub fn profile(&self) -> &str {
        &self.profile
    }

    /// Returns the name of the hosting simple layer.
    pub fn host_layer(&self) -> &str {
        &self.host_layer
    }
}

/// The descriptor of any layer.
#[derive(Clone, Debug, PartialEq)]
pub enum LayerDescriptor {
    /// A simple layer.
    Simple(SimpleLayerDescriptor),
    /// A read-only interleaved legacy layer.
    InterleavedLegacy(InterleavedLegacyLayerDescriptor),
    /// The surface corrections layer.
    SurfaceCorrections(SurfaceCorrectionsDescriptor),
    /// The variable resolution metadata layer.
    VRMetadata(VRMetadataDescriptor),
    /// The variable resolution refinement layer.
    VRRefinements(VRRefinementsDescriptor),
    /// The variable resolution node layer.
    VRNode(VRNodeDescriptor),
    /// A georeferenced metadata lookup layer.
    GeorefMetadata(GeorefMetadataDescriptor),
}

impl LayerDescriptor {
    pub(crate) fn core(&self) -> &DescriptorCore {
        match self {
            LayerDescriptor::Simple(d) => &d.core,
            LayerDescriptor::InterleavedLegacy(d) => &d.core,
            LayerDescriptor::SurfaceCorrections(d) => &d.core,
            LayerDescriptor::VRMetadata(d) => &d.core,
            LayerDescriptor::VRRefinements(d) => &d.core,
            LayerDescriptor::VRNode(d) => &d.core,
            LayerDescriptor::GeorefMetadata(d) => &d.core,
        }
    }

    /// Returns the unique id assigned by the dataset.
    pub fn id(&self) -> u32 {
        self.core().id
    }

    /// Returns the layer type.
    pub fn layer_type(&self) -> LayerType {
        self.core().layer_type
    }

    /// Returns the container path of the backing dataset.
    pub fn internal_path(&self) -> &str {
        &self.core().internal_path
    }

    /// Returns the human name of the layer.
    pub fn name(&self) -> &str {
        &self.core().name
    }

    /// Returns the chunk size, 0 when unchunked.
    pub fn chunk_size(&self) -> u64 {
        self.core().chunk_size
    }

    /// Returns the deflate level, 0 when stored.
    pub fn compression_level(&self) -> u8 {
        self.core().compression_level
    }

    /// Returns the dimensions `(rows, cols)`.
    ///
    /// The 1-D variable resolution arrays report `(1, length)`.
    pub fn dims(&self) -> (u64, u64) {
        self.core().dims
    }

    /// Returns the packed element size in bytes.
    pub fn element_size(&self) -> usize {
        match self {
            // Every simple and projected interleaved element is a 4-byte
            // f32 or u32.
            LayerDescriptor::Simple(_) | LayerDescriptor::InterleavedLegacy(_) => 4,
            LayerDescriptor::SurfaceCorrections(d) => d.element_size(),
            LayerDescriptor::VRMetadata(_) => 28,
            LayerDescriptor::VRRefinements(_) => 8,
            LayerDescriptor::VRNode(_) => 12,
            LayerDescriptor::GeorefMetadata(_) => 2,
        }
    }
}

/// Returns the on-disk min/max attribute names for a simple layer.
///
/// The two mandatory layers keep the human-phrased pre-2.0 names; every
/// other simple layer uses the snake-cased pair.
pub(crate) fn simple_min_max_attr_names(layer_type: LayerType) -> (&'static str, &'static str) {
    match layer_type {
        LayerType::Elevation => ("Minimum Elevation Value", "Maximum Elevation Value"),
        LayerType::Uncertainty => ("Minimum Uncertainty Value", "Maximum Uncertainty Value"),
        _ => ("min_value", "max_value"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compression_needs_chunking() {
        assert!(matches!(
            SimpleLayerDescriptor::new(0, LayerType::Elevation, 0, 1, (10, 10)),
            Err(Error::CompressionNeedsChunkingSet)
        ));
        assert!(matches!(
            SimpleLayerDescriptor::new(0, LayerType::Elevation, 100, 10, (10, 10)),
            Err(Error::InvalidCompressionLevel(10))
        ));
    }

    #[test]
    fn refinements_require_chunking() {
        assert!(matches!(
            VRRefinementsDescriptor::new(0, 0, 0),
            Err(Error::LayerRequiresChunkingSet)
        ));
    }

    #[test]
    fn corrector_count_is_bounded() {
        assert!(matches!(
            SurfaceCorrectionsDescriptor::new(0, Topography::GridExtents, 11, 100, 0),
            Err(Error::TooManyCorrectors(11))
        ));
        assert!(matches!(
            SurfaceCorrectionsDescriptor::new(0, Topography::GridExtents, 0, 100, 0),
            Err(Error::TooManyCorrectors(0))
        ));
    }

    #[test]
    fn element_sizes() {
        let gridded = SurfaceCorrectionsDescriptor::new(0, Topography::GridExtents, 3, 100, 0)
            .map(LayerDescriptor::SurfaceCorrections)
            .unwrap();
        assert_eq!(12, gridded.element_size());
        let irregular =
            SurfaceCorrectionsDescriptor::new(0, Topography::IrregularlySpaced, 3, 100, 0)
                .map(LayerDescriptor::SurfaceCorrections)
                .unwrap();
        assert_eq!(28, irregular.element_size());
        let vr = VRMetadataDescriptor::new(1, 10, 0, (2, 2))
            .map(LayerDescriptor::VRMetadata)
            .unwrap();
        assert_eq!(28, vr.element_size());
    }

    #[test]
    fn mandatory_attr_names_are_human_phrased() {
        assert_eq!(
            ("Minimum Elevation Value", "Maximum Elevation Value"),
            simple_min_max_attr_names(LayerType::Elevation)
        );
        assert_eq!(
            ("min_value", "max_value"),
            simple_min_max_attr_names(LayerType::NominalElevation)
        );
    }

    #[test]
    fn min_max_ignores_nan() {
        let mut minmax = MinMax::<f32>::unset();
        minmax.update(2.0);
        minmax.update(f32::NAN);
        assert_eq!((2.0, 2.0), (minmax.min, minmax.max));
    }

    #[test]
    fn datums_are_truncated() {
        let mut descriptor =
            SurfaceCorrectionsDescriptor::new(0, Topography::GridExtents, 1, 100, 0).unwrap();
        descriptor.set_vertical_datums(&"x".repeat(300));
        assert_eq!(MAX_DATUMS_LENGTH, descriptor.vertical_datums().len());
    }
}

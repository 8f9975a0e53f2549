//! The BAG dataset façade.

use log::warn;
use std::path::Path;

use crate::container::{AttrType, AttributeValue, Container, DatasetSpec, ElementType, Extent, ScalarType};
use crate::crs::{CrsTranslator, IdentityTranslator};
use crate::descriptor::{
    GeorefMetadataDescriptor, InterleavedLegacyLayerDescriptor, LayerDescriptor,
    SimpleLayerDescriptor, SurfaceCorrectionsDescriptor, VRMetadataDescriptor,
    VRNodeDescriptor, VRRefinementsDescriptor,
};
use crate::layer::{
    GeorefMetadataLayer, GroupType, InterleavedLegacyLayer, Layer, LayerType, Profile,
    RecordDefinition, SimpleLayer, SurfaceCorrections, Topography, default_chunk_size,
};
use crate::metadata::{EmbeddedXmlProvider, Metadata, MetadataProvider};
use crate::tracking_list::{TrackingItem, TrackingList};
use crate::transform::GridTransform;
use crate::vr::{
    VRMetadata, VRMetadataItem, VRNode, VRNodeItem, VRRefinementItem, VRRefinements,
    VRTrackingItem, VRTrackingList, refinement_index,
};
use crate::{BAG_VERSION, Error, OpenMode, Result};

const ROOT_PATH: &str = "/BAG_root";
const METADATA_PATH: &str = "/BAG_root/metadata";
const BAG_VERSION_NAME: &str = "Bag Version";
const BAG_VERSION_LENGTH: usize = 32;

/// An open BAG dataset.
///
/// The dataset exclusively owns the container and every layer; releasing it
/// flushes all layer attributes and closes the container. Use
/// [Dataset::close] to observe flush failures instead of relying on `Drop`.
#[derive(Debug)]
pub struct Dataset {
    container: Container,
    metadata: Metadata,
    version: String,
    dims: (u32, u32),
    transform: GridTransform,
    layers: Vec<Layer>,
    tracking_list: TrackingList,
    vr_tracking_list: Option<VRTrackingList>,
    crs: Box<dyn CrsTranslator>,
    next_id: u32,
    closed: bool,
}

impl Dataset {
    /// Opens an existing BAG with the default capabilities.
    pub fn open<P: AsRef<Path>>(path: P, mode: OpenMode) -> Result<Dataset> {
        Dataset::open_with(path, mode, Box::new(IdentityTranslator), &EmbeddedXmlProvider)
    }

    /// Opens an existing BAG with explicit CRS and metadata capabilities.
    pub fn open_with<P: AsRef<Path>>(
        path: P,
        mode: OpenMode,
        crs: Box<dyn CrsTranslator>,
        provider: &dyn MetadataProvider,
    ) -> Result<Dataset> {
        let mut container = Container::open(path, mode)?;

        let version = container
            .read_attr(ROOT_PATH, BAG_VERSION_NAME)?
            .as_str()?
            .trim_end_matches('\0')
            .to_string();

        let metadata_handle = container.open_dataset(METADATA_PATH)?;
        let metadata_len = container.dataset_dims(metadata_handle)?[0];
        let xml = if metadata_len > 0 {
            container.read_hyperslab(metadata_handle, &[0], &[metadata_len])?
        } else {
            Vec::new()
        };
        let metadata = provider.parse(&xml)?;

        for layer_type in [LayerType::Elevation, LayerType::Uncertainty] {
            let path = layer_type.internal_path().unwrap_or("");
            if !container.dataset_exists(path) {
                return Err(Error::MissingMandatoryLayer(
                    layer_type.standard_name().to_string(),
                ));
            }
        }

        let tracking_list = TrackingList::open(&mut container)?;
        let vr_tracking_list = if container.dataset_exists("/BAG_root/varres_tracking_list") {
            Some(VRTrackingList::open(&mut container)?)
        } else {
            None
        };

        let mut dataset = Dataset {
            container,
            transform: GridTransform::new(metadata.origin(), metadata.spacing()),
            metadata,
            version,
            dims: (0, 0),
            layers: Vec::new(),
            tracking_list,
            vr_tracking_list,
            crs,
            next_id: 0,
            closed: false,
        };
        dataset.probe_layers()?;
        Ok(dataset)
    }

    fn probe_layers(&mut self) -> Result<()> {
        // Simple layers, mandatory first.
        for layer_type in [
            LayerType::Elevation,
            LayerType::Uncertainty,
            LayerType::AverageElevation,
            LayerType::NominalElevation,
            LayerType::NumHypotheses,
            LayerType::StdDev,
        ] {
            let Some(path) = layer_type.internal_path() else {
                continue;
            };
            if !self.container.dataset_exists(path) {
                continue;
            }
            let id = self.next_id();
            let descriptor = SimpleLayerDescriptor::new(id, layer_type, 0, 0, (0, 0))?;
            let layer = SimpleLayer::open(&self.container, descriptor)?;
            if layer_type == LayerType::Elevation {
                let dims = layer.descriptor().dims();
                self.dims = (dims.0 as u32, dims.1 as u32);
            }
            self.layers.push(Layer::Simple(layer));
        }

        // Interleaved legacy groups, 1.5+ files only; a standalone dataset
        // for the same layer type wins.
        if numeric_version(&self.version) >= 1_005_000 {
            for group in [GroupType::Node, GroupType::Elevation] {
                if !self.container.dataset_exists(group.internal_path()) {
                    continue;
                }
                for &layer_type in group.layer_types() {
                    if self.find_layer(layer_type).is_some() {
                        continue;
                    }
                    let id = self.next_id();
                    let descriptor =
                        InterleavedLegacyLayerDescriptor::new(id, layer_type, group, (0, 0))?;
                    let layer = InterleavedLegacyLayer::open(&self.container, descriptor)?;
                    self.layers.push(Layer::InterleavedLegacy(layer));
                }
            }
        }

        // Surface corrections.
        if let Some(path) = LayerType::SurfaceCorrection.internal_path() {
            if self.container.dataset_exists(path) {
                let id = self.next_id();
                let layer = SurfaceCorrections::open(&self.container, id)?;
                self.layers.push(Layer::SurfaceCorrections(layer));
            }
        }

        // The variable resolution bundle.
        if let Some(path) = LayerType::VarResMetadata.internal_path() {
            if self.container.dataset_exists(path) {
                let id = self.next_id();
                let descriptor = VRMetadataDescriptor::new(id, 0, 0, (0, 0))?;
                let layer = VRMetadata::open(&self.container, descriptor)?;
                self.layers.push(Layer::VRMetadata(layer));
            }
        }
        if let Some(path) = LayerType::VarResRefinement.internal_path() {
            if self.container.dataset_exists(path) {
                let id = self.next_id();
                let layer = VRRefinements::open(&self.container, id)?;
                self.layers.push(Layer::VRRefinements(layer));
            }
        }
        if let Some(path) = LayerType::VarResNode.internal_path() {
            if self.container.dataset_exists(path) {
                let id = self.next_id();
                let layer = VRNode::open(&self.container, id)?;
                self.layers.push(Layer::VRNode(layer));
            }
        }

        // Georef metadata layers, one per hosting simple layer.
        for host in self.container.list_children("/BAG_root/georef_metadata") {
            let id = self.next_id();
            let layer = GeorefMetadataLayer::open(&self.container, id, &host)?;
            self.layers.push(Layer::GeorefMetadata(layer));
        }
        Ok(())
    }

    /// Creates a new BAG with the default capabilities.
    ///
    /// `chunk_size` of 0 selects the default chunking for the grid shape;
    /// compression is a deflate level 0 through 9.
    pub fn create<P: AsRef<Path>>(
        path: P,
        metadata: Metadata,
        chunk_size: u64,
        compression_level: u8,
    ) -> Result<Dataset> {
        Dataset::create_with(path, metadata, chunk_size, compression_level, Box::new(IdentityTranslator))
    }

    /// Creates a new BAG with an explicit CRS capability.
    pub fn create_with<P: AsRef<Path>>(
        path: P,
        metadata: Metadata,
        chunk_size: u64,
        compression_level: u8,
        crs: Box<dyn CrsTranslator>,
    ) -> Result<Dataset> {
        if compression_level > 9 {
            return Err(Error::InvalidCompressionLevel(compression_level));
        }
        let (rows, cols) = metadata.dims();
        let (chunk_size, compression_level) =
            effective_chunking(chunk_size, compression_level, rows, cols);

        let mut container = Container::create(path, true)?;
        container.create_group(ROOT_PATH)?;
        container.create_attr(ROOT_PATH, BAG_VERSION_NAME, AttrType::String(BAG_VERSION_LENGTH))?;
        container.write_attr(
            ROOT_PATH,
            BAG_VERSION_NAME,
            AttributeValue::String(BAG_VERSION.to_string()),
        )?;

        let xml = metadata.to_xml();
        let metadata_handle = container.create_dataset(
            METADATA_PATH,
            DatasetSpec::new(
                ElementType::Scalar(ScalarType::U8),
                vec![xml.len() as u64],
                vec![Extent::Unlimited],
            ),
        )?;
        if !xml.is_empty() {
            container.write_hyperslab(metadata_handle, &[0], &[xml.len() as u64], &xml)?;
        }

        let mut layers = Vec::new();
        let mut next_id = 0;
        for layer_type in [LayerType::Elevation, LayerType::Uncertainty] {
            let descriptor = SimpleLayerDescriptor::new(
                next_id,
                layer_type,
                chunk_size,
                compression_level,
                (u64::from(rows), u64::from(cols)),
            )?;
            next_id += 1;
            layers.push(Layer::Simple(SimpleLayer::create(&mut container, descriptor)?));
        }
        let tracking_list = TrackingList::create(&mut container)?;
        container.flush()?;

        Ok(Dataset {
            transform: GridTransform::new(metadata.origin(), metadata.spacing()),
            metadata,
            version: BAG_VERSION.to_string(),
            dims: (rows, cols),
            layers,
            tracking_list,
            vr_tracking_list: None,
            crs,
            next_id,
            closed: false,
            container,
        })
    }

    pub(crate) fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Returns the grid dimensions `(rows, cols)`.
    pub fn dims(&self) -> (u32, u32) {
        self.dims
    }

    /// Returns the file's version string.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns true when the file was opened read-only.
    pub fn read_only(&self) -> bool {
        self.container.mode() == OpenMode::ReadOnly
    }

    /// Returns the interpreted metadata.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Returns the grid transform.
    pub fn transform(&self) -> &GridTransform {
        &self.transform
    }

    /// Returns the node-centered projected cover `(llx, lly, urx, ury)`.
    pub fn projected_cover(&self) -> (f64, f64, f64, f64) {
        self.transform.projected_cover(self.dims.0, self.dims.1)
    }

    /// Converts a grid position to geographic coordinates.
    pub fn grid_to_geo(&self, row: u32, col: u32) -> Result<(f64, f64)> {
        let (x, y) = self.transform.grid_to_projected(row, col);
        self.crs.projected_to_geographic(x, y)
    }

    /// Converts geographic coordinates to the enclosing grid position.
    pub fn geo_to_grid(&self, longitude: f64, latitude: f64) -> Result<(u32, u32)> {
        let (x, y) = self.crs.geographic_to_projected(longitude, latitude)?;
        let (row, col) = self.transform.projected_to_grid(x, y);
        if row < 0 || col < 0 || row >= i64::from(self.dims.0) || col >= i64::from(self.dims.1) {
            return Err(Error::BoundsExceeded(format!(
                "({longitude}, {latitude}) lies outside the grid"
            )));
        }
        Ok((row as u32, col as u32))
    }

    fn find_layer(&self, layer_type: LayerType) -> Option<&Layer> {
        self.layers
            .iter()
            .find(|layer| layer.layer_type() == layer_type)
    }

    fn layer_index(&self, layer_type: LayerType) -> Result<usize> {
        self.layers
            .iter()
            .position(|layer| layer.layer_type() == layer_type)
            .ok_or_else(|| Error::LayerNotFound(layer_type.standard_name().to_string()))
    }

    /// Returns the layer of the given type.
    ///
    /// Georef metadata layers are keyed by host name; use
    /// [Dataset::georef_metadata_layer] for a specific one.
    pub fn layer(&self, layer_type: LayerType) -> Result<&Layer> {
        self.find_layer(layer_type)
            .ok_or_else(|| Error::LayerNotFound(layer_type.standard_name().to_string()))
    }

    /// Returns the georef metadata layer attached to the named simple
    /// layer.
    pub fn georef_metadata_layer(&self, host_layer: &str) -> Result<&Layer> {
        self.layers
            .iter()
            .find(|layer| match layer {
                Layer::GeorefMetadata(georef) => layer_host(georef) == host_layer,
                _ => false,
            })
            .ok_or_else(|| Error::LayerNotFound(format!("georef metadata for {host_layer}")))
    }

    /// Returns the types of every attached layer, in id order.
    pub fn layer_types(&self) -> Vec<LayerType> {
        self.layers.iter().map(|layer| layer.layer_type()).collect()
    }

    /// Returns every layer descriptor, in id order.
    pub fn descriptors(&self) -> impl Iterator<Item = &LayerDescriptor> {
        self.layers.iter().map(|layer| layer.descriptor())
    }

    /// Returns the persisted min/max pair of a layer, when it keeps one.
    pub fn layer_min_max(&self, layer_type: LayerType) -> Result<Option<(f32, f32)>> {
        Ok(match self.layer(layer_type)?.descriptor() {
            LayerDescriptor::Simple(descriptor) => {
                Some((descriptor.min_max().min, descriptor.min_max().max))
            }
            LayerDescriptor::InterleavedLegacy(descriptor) => {
                Some((descriptor.min_max().min, descriptor.min_max().max))
            }
            _ => None,
        })
    }

    // Reads and writes.

    /// Reads a region of a layer as packed bytes.
    pub fn read(
        &self,
        layer_type: LayerType,
        row_start: u32,
        column_start: u32,
        row_end: u32,
        column_end: u32,
    ) -> Result<Vec<u8>> {
        self.layer(layer_type)?
            .read(&self.container, row_start, column_start, row_end, column_end)
    }

    /// Reads one row of a layer.
    pub fn read_row(
        &self,
        layer_type: LayerType,
        row: u32,
        column_start: u32,
        column_end: u32,
    ) -> Result<Vec<u8>> {
        self.read(layer_type, row, column_start, row, column_end)
    }

    /// Reads one node of a layer.
    pub fn read_node(&self, layer_type: LayerType, row: u32, col: u32) -> Result<Vec<u8>> {
        self.read(layer_type, row, col, row, col)
    }

    /// Writes a region of packed bytes to a layer and flushes its
    /// attributes.
    pub fn write(
        &mut self,
        layer_type: LayerType,
        row_start: u32,
        column_start: u32,
        row_end: u32,
        column_end: u32,
        buffer: &[u8],
    ) -> Result<()> {
        if self.read_only() {
            return Err(Error::ReadOnlyError);
        }
        let index = self.layer_index(layer_type)?;
        let layer = &mut self.layers[index];
        layer.write(
            &mut self.container,
            row_start,
            column_start,
            row_end,
            column_end,
            buffer,
        )?;
        layer.flush_attributes(&mut self.container)?;

        // A grown 2-D layer grows the dataset; the 1-D arrays only grow
        // themselves.
        let grown = layer.descriptor().dims();
        if !matches!(
            layer_type,
            LayerType::VarResRefinement | LayerType::VarResNode
        ) {
            self.dims = (
                self.dims.0.max(grown.0 as u32),
                self.dims.1.max(grown.1 as u32),
            );
        }
        if layer_type == LayerType::VarResMetadata {
            self.validate_vr_windows()?;
        }
        Ok(())
    }

    /// Writes indices into a georef metadata layer's index grid.
    pub fn write_georef_indices(
        &mut self,
        host_layer: &str,
        row_start: u32,
        column_start: u32,
        row_end: u32,
        column_end: u32,
        buffer: &[u8],
    ) -> Result<()> {
        if self.read_only() {
            return Err(Error::ReadOnlyError);
        }
        let index = self
            .layers
            .iter()
            .position(|layer| match layer {
                Layer::GeorefMetadata(georef) => layer_host(georef) == host_layer,
                _ => false,
            })
            .ok_or_else(|| Error::LayerNotFound(format!("georef metadata for {host_layer}")))?;
        let Layer::GeorefMetadata(layer) = &mut self.layers[index] else {
            return Err(Error::UnexpectedLayerDescriptorType);
        };
        layer.write(
            &mut self.container,
            row_start,
            column_start,
            row_end,
            column_end,
            buffer,
        )
    }

    /// Appends a record to a georef metadata layer's value table.
    pub fn add_georef_record(
        &mut self,
        host_layer: &str,
        record: crate::layer::Record,
    ) -> Result<u16> {
        if self.read_only() {
            return Err(Error::ReadOnlyError);
        }
        let index = self
            .layers
            .iter()
            .position(|layer| match layer {
                Layer::GeorefMetadata(georef) => layer_host(georef) == host_layer,
                _ => false,
            })
            .ok_or_else(|| Error::LayerNotFound(format!("georef metadata for {host_layer}")))?;
        let Layer::GeorefMetadata(layer) = &mut self.layers[index] else {
            return Err(Error::UnexpectedLayerDescriptorType);
        };
        layer
            .value_table_mut()
            .add_record(&mut self.container, record)
    }

    /// Reads a region of a simple layer corrected into the vertical datum
    /// of the given corrector.
    pub fn read_corrected(
        &self,
        row_start: u32,
        column_start: u32,
        row_end: u32,
        column_end: u32,
        corrector: u8,
        layer_type: LayerType,
    ) -> Result<Vec<u8>> {
        let corrections = self
            .layer(LayerType::SurfaceCorrection)?
            .as_surface_corrections()
            .ok_or(Error::UnexpectedLayerDescriptorType)?;
        let base = self.layer(layer_type)?;
        let geographic = self.crs.is_geographic(self.metadata.horizontal_crs());
        corrections.read_corrected(
            &self.container,
            row_start,
            column_start,
            row_end,
            column_end,
            corrector,
            base,
            &self.transform,
            self.dims,
            geographic,
        )
    }

    /// Reads one row of a simple layer corrected into the vertical datum
    /// of the given corrector.
    pub fn read_corrected_row(
        &self,
        row: u32,
        column_start: u32,
        column_end: u32,
        corrector: u8,
        layer_type: LayerType,
    ) -> Result<Vec<u8>> {
        let corrections = self
            .layer(LayerType::SurfaceCorrection)?
            .as_surface_corrections()
            .ok_or(Error::UnexpectedLayerDescriptorType)?;
        let base = self.layer(layer_type)?;
        let geographic = self.crs.is_geographic(self.metadata.horizontal_crs());
        corrections.read_corrected_row(
            &self.container,
            row,
            column_start,
            column_end,
            corrector,
            base,
            &self.transform,
            geographic,
        )
    }

    // Layer creation.

    /// Creates an optional simple layer.
    pub fn create_simple_layer(
        &mut self,
        layer_type: LayerType,
        chunk_size: u64,
        compression_level: u8,
    ) -> Result<&Layer> {
        if self.read_only() {
            return Err(Error::ReadOnlyError);
        }
        if !layer_type.is_simple() {
            return Err(Error::InvalidLayerDescriptor(format!(
                "{} is not a simple layer",
                layer_type.standard_name()
            )));
        }
        if self.find_layer(layer_type).is_some() {
            return Err(Error::LayerExists(layer_type.standard_name().to_string()));
        }
        if compression_level > 9 {
            return Err(Error::InvalidCompressionLevel(compression_level));
        }
        let (chunk_size, compression_level) =
            effective_chunking(chunk_size, compression_level, self.dims.0, self.dims.1);
        let id = self.next_id();
        let descriptor = SimpleLayerDescriptor::new(
            id,
            layer_type,
            chunk_size,
            compression_level,
            (u64::from(self.dims.0), u64::from(self.dims.1)),
        )?;
        let layer = SimpleLayer::create(&mut self.container, descriptor)?;
        self.layers.push(Layer::Simple(layer));
        Ok(&self.layers[self.layers.len() - 1])
    }

    /// Creates the surface corrections layer.
    pub fn create_surface_corrections(
        &mut self,
        topography: Topography,
        num_correctors: u8,
        chunk_size: u64,
        compression_level: u8,
    ) -> Result<&Layer> {
        if self.read_only() {
            return Err(Error::ReadOnlyError);
        }
        if self.find_layer(LayerType::SurfaceCorrection).is_some() {
            return Err(Error::LayerExists(
                LayerType::SurfaceCorrection.standard_name().to_string(),
            ));
        }
        let id = self.next_id();
        let descriptor =
            SurfaceCorrectionsDescriptor::new(id, topography, num_correctors, chunk_size, compression_level)?;
        let layer = SurfaceCorrections::create(&mut self.container, descriptor)?;
        self.layers.push(Layer::SurfaceCorrections(layer));
        Ok(&self.layers[self.layers.len() - 1])
    }

    /// Sets the surface corrections georeferencing (grid extents only).
    pub fn set_surface_corrections_grid(
        &mut self,
        origin: (f64, f64),
        spacing: (f64, f64),
        vertical_datums: &str,
    ) -> Result<()> {
        if self.read_only() {
            return Err(Error::ReadOnlyError);
        }
        let index = self.layer_index(LayerType::SurfaceCorrection)?;
        let Layer::SurfaceCorrections(layer) = &mut self.layers[index] else {
            return Err(Error::UnexpectedLayerDescriptorType);
        };
        let LayerDescriptor::SurfaceCorrections(descriptor) = layer.descriptor_mut() else {
            return Err(Error::UnexpectedLayerDescriptorType);
        };
        descriptor.set_origin(origin);
        descriptor.set_spacing(spacing);
        descriptor.set_vertical_datums(vertical_datums);
        layer.flush_attributes(&mut self.container)
    }

    /// Creates the four variable resolution components.
    ///
    /// The refinement and node arrays require `chunk_size > 0`.
    pub fn create_vr_layers(&mut self, chunk_size: u64, compression_level: u8) -> Result<()> {
        if self.read_only() {
            return Err(Error::ReadOnlyError);
        }
        if self.find_layer(LayerType::VarResMetadata).is_some() {
            return Err(Error::LayerExists(
                LayerType::VarResMetadata.standard_name().to_string(),
            ));
        }
        let id = self.next_id();
        let descriptor = VRMetadataDescriptor::new(
            id,
            chunk_size,
            compression_level,
            (u64::from(self.dims.0), u64::from(self.dims.1)),
        )?;
        let metadata = VRMetadata::create(&mut self.container, descriptor)?;
        self.layers.push(Layer::VRMetadata(metadata));

        let id = self.next_id();
        let descriptor = VRRefinementsDescriptor::new(id, chunk_size, compression_level)?;
        let refinements = VRRefinements::create(&mut self.container, descriptor)?;
        self.layers.push(Layer::VRRefinements(refinements));

        let id = self.next_id();
        let descriptor = VRNodeDescriptor::new(id, chunk_size, compression_level)?;
        let node = VRNode::create(&mut self.container, descriptor)?;
        self.layers.push(Layer::VRNode(node));

        self.vr_tracking_list = Some(VRTrackingList::create(&mut self.container)?);
        Ok(())
    }

    /// Creates a georef metadata layer attached to the named simple layer.
    ///
    /// A [Profile::Custom] profile needs
    /// [Dataset::create_georef_metadata_layer_with_definition].
    pub fn create_georef_metadata_layer(
        &mut self,
        profile: Profile,
        host_layer: &str,
        chunk_size: u64,
        compression_level: u8,
    ) -> Result<&Layer> {
        let definition = profile.definition().ok_or_else(|| {
            Error::InvalidLayerDescriptor(format!(
                "profile {} has no built-in record definition",
                profile.name()
            ))
        })?;
        self.create_georef_metadata_layer_with_definition(
            profile,
            definition,
            host_layer,
            chunk_size,
            compression_level,
        )
    }

    /// Creates a georef metadata layer with an explicit record definition.
    pub fn create_georef_metadata_layer_with_definition(
        &mut self,
        profile: Profile,
        definition: RecordDefinition,
        host_layer: &str,
        chunk_size: u64,
        compression_level: u8,
    ) -> Result<&Layer> {
        if self.read_only() {
            return Err(Error::ReadOnlyError);
        }
        let hosts_exists = self.layers.iter().any(|layer| {
            matches!(layer, Layer::Simple(_) | Layer::InterleavedLegacy(_))
                && layer.descriptor().name() == host_layer
        });
        if !hosts_exists {
            return Err(Error::LayerNotFound(host_layer.to_string()));
        }
        if self.georef_metadata_layer(host_layer).is_ok() {
            return Err(Error::LayerExists(format!("georef metadata for {host_layer}")));
        }
        if compression_level > 9 {
            return Err(Error::InvalidCompressionLevel(compression_level));
        }
        let (chunk_size, compression_level) =
            effective_chunking(chunk_size, compression_level, self.dims.0, self.dims.1);
        let id = self.next_id();
        let descriptor = GeorefMetadataDescriptor::new(
            id,
            profile.name(),
            host_layer,
            chunk_size,
            compression_level,
            (u64::from(self.dims.0), u64::from(self.dims.1)),
        )?;
        let layer = GeorefMetadataLayer::create(&mut self.container, descriptor, definition)?;
        self.layers.push(Layer::GeorefMetadata(layer));
        Ok(&self.layers[self.layers.len() - 1])
    }

    // The tracking list.

    /// Returns the number of tracking list items.
    pub fn tracking_list_len(&self) -> Result<u32> {
        self.tracking_list.len(&self.container)
    }

    /// Returns the tracking list item at `index`.
    pub fn tracking_list_get(&self, index: u32) -> Result<TrackingItem> {
        self.tracking_list.get(&self.container, index)
    }

    /// Appends a tracking list item.
    pub fn push_tracking_item(&mut self, item: TrackingItem) -> Result<()> {
        if self.read_only() {
            return Err(Error::ReadOnlyError);
        }
        self.tracking_list.push(&mut self.container, item)
    }

    /// Returns the tracking list items recorded against one node.
    pub fn tracking_items_by_node(&self, row: u32, col: u32) -> Result<Vec<TrackingItem>> {
        self.tracking_list.read_by_node(&self.container, row, col)
    }

    /// Returns the tracking list items of one list series.
    pub fn tracking_items_by_series(&self, series: u16) -> Result<Vec<TrackingItem>> {
        self.tracking_list.read_by_series(&self.container, series)
    }

    /// Returns the tracking list items with one track code.
    pub fn tracking_items_by_code(&self, code: u8) -> Result<Vec<TrackingItem>> {
        self.tracking_list.read_by_code(&self.container, code)
    }

    /// Rewrites the tracking list ordered by `(row, col)`.
    pub fn sort_tracking_list_by_node(&mut self) -> Result<()> {
        if self.read_only() {
            return Err(Error::ReadOnlyError);
        }
        self.tracking_list.sort_by_node(&mut self.container)
    }

    /// Rewrites the tracking list ordered by list series.
    pub fn sort_tracking_list_by_series(&mut self) -> Result<()> {
        if self.read_only() {
            return Err(Error::ReadOnlyError);
        }
        self.tracking_list.sort_by_series(&mut self.container)
    }

    /// Rewrites the tracking list ordered by track code.
    pub fn sort_tracking_list_by_code(&mut self) -> Result<()> {
        if self.read_only() {
            return Err(Error::ReadOnlyError);
        }
        self.tracking_list.sort_by_code(&mut self.container)
    }

    // The variable resolution subsystem.

    /// Returns true when the file carries the variable resolution bundle.
    pub fn has_vr(&self) -> bool {
        self.find_layer(LayerType::VarResMetadata).is_some()
    }

    /// Returns the metadata item of one coarse cell.
    pub fn vr_metadata_item(&self, row: u32, col: u32) -> Result<VRMetadataItem> {
        match self.layer(LayerType::VarResMetadata)? {
            Layer::VRMetadata(layer) => layer.item(&self.container, row, col),
            _ => Err(Error::UnexpectedLayerDescriptorType),
        }
    }

    /// Returns the current length of the refinement array.
    pub fn vr_refinements_len(&self) -> Result<u64> {
        match self.layer(LayerType::VarResRefinement)? {
            Layer::VRRefinements(layer) => layer.len(&self.container),
            _ => Err(Error::UnexpectedLayerDescriptorType),
        }
    }

    /// Reads the refined node `(sub_row, sub_col)` of coarse cell
    /// `(row, col)`.
    pub fn read_refined_node(
        &self,
        row: u32,
        col: u32,
        sub_row: u32,
        sub_col: u32,
    ) -> Result<VRRefinementItem> {
        let meta = self.vr_metadata_item(row, col)?;
        let index = refinement_index(&meta, row, col, sub_row, sub_col)?;
        match self.layer(LayerType::VarResRefinement)? {
            Layer::VRRefinements(layer) => layer.item(&self.container, index),
            _ => Err(Error::UnexpectedLayerDescriptorType),
        }
    }

    /// Reads the VR node statistics of refined node `(sub_row, sub_col)`
    /// of coarse cell `(row, col)`.
    pub fn read_refined_node_stats(
        &self,
        row: u32,
        col: u32,
        sub_row: u32,
        sub_col: u32,
    ) -> Result<VRNodeItem> {
        let meta = self.vr_metadata_item(row, col)?;
        let index = refinement_index(&meta, row, col, sub_row, sub_col)?;
        match self.layer(LayerType::VarResNode)? {
            Layer::VRNode(layer) => layer.item(&self.container, index),
            _ => Err(Error::UnexpectedLayerDescriptorType),
        }
    }

    /// Allocates a refinement window of `dimensions_x * dimensions_y`
    /// nodes at the end of the refinement and node arrays, returning its
    /// starting index.
    pub fn allocate_refinement_window(
        &mut self,
        dimensions_x: u32,
        dimensions_y: u32,
    ) -> Result<u64> {
        if self.read_only() {
            return Err(Error::ReadOnlyError);
        }
        let index = self.layer_index(LayerType::VarResRefinement)?;
        let Layer::VRRefinements(refinements) = &mut self.layers[index] else {
            return Err(Error::UnexpectedLayerDescriptorType);
        };
        let start = refinements.allocate_window(&mut self.container, dimensions_x, dimensions_y)?;
        if let Ok(index) = self.layer_index(LayerType::VarResNode) {
            let Layer::VRNode(node) = &mut self.layers[index] else {
                return Err(Error::UnexpectedLayerDescriptorType);
            };
            node.allocate_window(&mut self.container, dimensions_x, dimensions_y)?;
        }
        Ok(start)
    }

    /// Returns the number of VR tracking list items.
    pub fn vr_tracking_list_len(&self) -> Result<u32> {
        self.vr_tracking_list
            .as_ref()
            .ok_or_else(|| Error::LayerNotFound("VR tracking list".to_string()))?
            .len(&self.container)
    }

    /// Appends a VR tracking list item.
    pub fn push_vr_tracking_item(&mut self, item: VRTrackingItem) -> Result<()> {
        if self.read_only() {
            return Err(Error::ReadOnlyError);
        }
        self.vr_tracking_list
            .as_mut()
            .ok_or_else(|| Error::LayerNotFound("VR tracking list".to_string()))?
            .push(&mut self.container, item)
    }

    /// Returns the VR tracking list items recorded against one coarse
    /// cell.
    pub fn vr_tracking_items_by_node(&self, row: u32, col: u32) -> Result<Vec<VRTrackingItem>> {
        self.vr_tracking_list
            .as_ref()
            .ok_or_else(|| Error::LayerNotFound("VR tracking list".to_string()))?
            .read_by_node(&self.container, row, col)
    }

    fn validate_vr_windows(&self) -> Result<()> {
        let refinement_len = match self.find_layer(LayerType::VarResRefinement) {
            Some(Layer::VRRefinements(refinements)) => refinements.len(&self.container)?,
            _ => return Ok(()),
        };
        if let Some(Layer::VRMetadata(metadata)) = self.find_layer(LayerType::VarResMetadata) {
            metadata.validate_windows(&self.container, refinement_len)?;
        }
        Ok(())
    }

    // Lifecycle.

    fn flush(&mut self) -> Result<()> {
        if self.read_only() {
            return Ok(());
        }
        for index in 0..self.layers.len() {
            let layer = &self.layers[index];
            layer.flush_attributes(&mut self.container)?;
        }
        self.container.flush()
    }

    /// Flushes all layer attributes and the container, consuming the
    /// dataset.
    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        self.closed = true;
        Ok(())
    }
}

impl Drop for Dataset {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(err) = self.flush() {
                warn!("failed to flush dataset on drop: {err}");
            }
        }
    }
}

fn layer_host(georef: &GeorefMetadataLayer) -> &str {
    match georef.descriptor() {
        LayerDescriptor::GeorefMetadata(descriptor) => descriptor.host_layer(),
        _ => "",
    }
}

/// Applies the default chunking tiers when the caller passed 0, and forces
/// compression off when the grid stays unchunked.
fn effective_chunking(chunk_size: u64, compression_level: u8, rows: u32, cols: u32) -> (u64, u8) {
    if chunk_size > 0 {
        return (chunk_size, compression_level);
    }
    let chunk = default_chunk_size(u64::from(rows), u64::from(cols));
    if chunk == 0 {
        (0, 0)
    } else {
        (chunk, compression_level)
    }
}

/// Parses "major", "major.minor", or "major.minor.patch" into
/// `major * 1_000_000 + minor * 1_000 + patch`.
fn numeric_version(version: &str) -> u32 {
    let mut value = 0;
    let mut multiplier = 1_000_000;
    for part in version.split('.').take(3) {
        value += part.trim().parse::<u32>().unwrap_or(0) * multiplier;
        multiplier /= 1000;
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_parsing() {
        assert_eq!(1_005_000, numeric_version("1.5.0"));
        assert_eq!(2_000_000, numeric_version("2"));
        assert_eq!(1_006_002, numeric_version("1.6.2"));
        assert_eq!(0, numeric_version("junk"));
    }

    #[test]
    fn chunking_defaults() {
        assert_eq!((100, 3), effective_chunking(0, 3, 512, 512));
        assert_eq!((10, 3), effective_chunking(0, 3, 64, 64));
        assert_eq!((0, 0), effective_chunking(0, 3, 4, 4));
        assert_eq!((42, 3), effective_chunking(42, 3, 4, 4));
    }
}

//! The physical BAG container.
//!
//! A container is a tree of named groups and typed datasets, each carrying
//! typed attributes. Datasets are 1-D or 2-D arrays of fixed-width elements
//! (scalars or packed compound records) or, for value tables and the XML
//! metadata stream, 1-D lists of variable-length records. Dataset payloads
//! are stored chunk by chunk and deflated at the dataset's compression
//! level.
//!
//! The whole tree is parsed into memory on open; hyperslab reads and writes
//! run against memory, and the tree is serialized back by [Container::flush]
//! or [Container::close]. Every higher layer of the crate consumes only this
//! surface, so a different physical envelope can be swapped in behind it.

pub use self::attribute::{AttrType, AttributeValue};
pub use self::datatype::{CompoundLayout, ElementType, FieldDef, FieldKind, ScalarType};

use crate::{Error, Result};
use log::{debug, warn};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

mod attribute;
mod datatype;
mod wire;

/// Access mode for an opened container.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenMode {
    /// The file may only be read.
    ReadOnly,
    /// The file may be read and written.
    ReadWrite,
}

/// One axis of a dataset's maximum extent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Extent {
    /// The axis can never grow beyond this length.
    Fixed(u64),
    /// The axis may grow without bound.
    Unlimited,
}

impl Extent {
    fn allows(&self, len: u64) -> bool {
        match *self {
            Extent::Fixed(max) => len <= max,
            Extent::Unlimited => true,
        }
    }
}

/// A handle to an open dataset within a container.
///
/// Handles stay valid for the life of the container that issued them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DatasetHandle(pub(crate) usize);

/// Everything needed to create a dataset.
#[derive(Clone, Debug)]
pub struct DatasetSpec {
    /// The element type.
    pub element: ElementType,
    /// Initial dimensions, rank 1 or 2.
    pub dims: Vec<u64>,
    /// Maximum extent per axis; must match the rank of `dims`.
    pub max_dims: Vec<Extent>,
    /// Chunk dimensions, if the dataset is chunked.
    pub chunk: Option<Vec<u64>>,
    /// Deflate level, 0 (store) through 9.
    pub compression: u8,
    /// One packed element used to fill unwritten cells.
    pub fill: Option<Vec<u8>>,
    /// True for a 1-D list of variable-length records.
    pub var_len: bool,
}

impl DatasetSpec {
    /// Creates a spec for a fixed-element dataset with no chunking.
    pub fn new(element: ElementType, dims: Vec<u64>, max_dims: Vec<Extent>) -> DatasetSpec {
        DatasetSpec {
            element,
            dims,
            max_dims,
            chunk: None,
            compression: 0,
            fill: None,
            var_len: false,
        }
    }

    /// Sets square chunking and a deflate level.
    pub fn chunked(mut self, chunk: Vec<u64>, compression: u8) -> DatasetSpec {
        self.chunk = Some(chunk);
        self.compression = compression;
        self
    }

    /// Sets the fill element.
    pub fn with_fill(mut self, fill: Vec<u8>) -> DatasetSpec {
        self.fill = Some(fill);
        self
    }
}

#[derive(Clone, Debug)]
pub(crate) struct Attribute {
    pub(crate) declared: AttrType,
    pub(crate) value: AttributeValue,
}

#[derive(Clone, Debug)]
pub(crate) enum DatasetData {
    Fixed(Vec<u8>),
    Records(Vec<Vec<u8>>),
}

#[derive(Clone, Debug)]
pub(crate) struct DatasetStorage {
    pub(crate) element: ElementType,
    pub(crate) dims: Vec<u64>,
    pub(crate) max_dims: Vec<Extent>,
    pub(crate) chunk: Option<Vec<u64>>,
    pub(crate) compression: u8,
    pub(crate) fill: Option<Vec<u8>>,
    pub(crate) data: DatasetData,
}

impl DatasetStorage {
    pub(crate) fn element_size(&self) -> usize {
        // Fixed datasets are validated to have a packed size at creation.
        self.element.packed_size().unwrap_or(0)
    }
}

#[derive(Clone, Debug)]
pub(crate) enum NodeBody {
    Group,
    Dataset(DatasetStorage),
}

#[derive(Clone, Debug)]
pub(crate) struct Node {
    pub(crate) path: String,
    pub(crate) attrs: BTreeMap<String, Attribute>,
    pub(crate) body: NodeBody,
}

/// An open BAG container file.
#[derive(Debug)]
pub struct Container {
    path: PathBuf,
    mode: OpenMode,
    pub(crate) nodes: Vec<Node>,
    dirty: bool,
}

impl Container {
    /// Creates a new container file.
    ///
    /// With `excl` set, fails with [Error::AlreadyExists] when the path is
    /// already taken.
    pub fn create<P: AsRef<Path>>(path: P, excl: bool) -> Result<Container> {
        let path = path.as_ref().to_path_buf();
        if excl && path.exists() {
            return Err(Error::AlreadyExists(path.display().to_string()));
        }
        let mut container = Container {
            path,
            mode: OpenMode::ReadWrite,
            nodes: Vec::new(),
            dirty: true,
        };
        container.flush()?;
        Ok(container)
    }

    /// Opens an existing container file.
    pub fn open<P: AsRef<Path>>(path: P, mode: OpenMode) -> Result<Container> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(path.display().to_string()),
            std::io::ErrorKind::PermissionDenied => {
                Error::PermissionDenied(path.display().to_string())
            }
            _ => Error::Io(err),
        })?;
        let nodes = wire::load(&mut BufReader::new(file))?;
        debug!("opened container {} with {} objects", path.display(), nodes.len());
        Ok(Container {
            path,
            mode,
            nodes,
            dirty: false,
        })
    }

    /// Returns the open mode.
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Serializes the tree back to disk.
    ///
    /// A read-only container never writes; flushing it is a no-op.
    pub fn flush(&mut self) -> Result<()> {
        if self.mode == OpenMode::ReadOnly {
            return Ok(());
        }
        let file = File::create(&self.path)?;
        let mut writer = BufWriter::new(file);
        wire::save(&self.nodes, &mut writer)?;
        debug!("flushed container {}", self.path.display());
        self.dirty = false;
        Ok(())
    }

    /// Flushes and consumes the container.
    pub fn close(mut self) -> Result<()> {
        self.flush()
    }

    fn check_writable(&self) -> Result<()> {
        if self.mode == OpenMode::ReadOnly {
            Err(Error::ReadOnlyError)
        } else {
            Ok(())
        }
    }

    fn find(&self, path: &str) -> Option<usize> {
        self.nodes.iter().position(|node| node.path == path)
    }

    fn node(&self, path: &str) -> Result<&Node> {
        self.find(path)
            .map(|i| &self.nodes[i])
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }

    fn node_mut(&mut self, path: &str) -> Result<&mut Node> {
        let index = self
            .find(path)
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        Ok(&mut self.nodes[index])
    }

    fn storage(&self, handle: DatasetHandle) -> Result<&DatasetStorage> {
        match self.nodes.get(handle.0).map(|node| &node.body) {
            Some(NodeBody::Dataset(storage)) => Ok(storage),
            _ => Err(Error::InternalError("stale dataset handle".to_string())),
        }
    }

    fn storage_mut(&mut self, handle: DatasetHandle) -> Result<&mut DatasetStorage> {
        match self.nodes.get_mut(handle.0).map(|node| &mut node.body) {
            Some(NodeBody::Dataset(storage)) => Ok(storage),
            _ => Err(Error::InternalError("stale dataset handle".to_string())),
        }
    }

    /// Returns the container path of the dataset behind `handle`.
    pub fn dataset_path(&self, handle: DatasetHandle) -> Result<&str> {
        self.storage(handle)?;
        Ok(&self.nodes[handle.0].path)
    }

    // Groups.

    /// Creates a group, along with any missing parent groups.
    pub fn create_group(&mut self, path: &str) -> Result<()> {
        self.check_writable()?;
        if self.find(path).is_some() {
            return Err(Error::AlreadyExists(path.to_string()));
        }
        self.ensure_parents(path)?;
        self.nodes.push(Node {
            path: path.to_string(),
            attrs: BTreeMap::new(),
            body: NodeBody::Group,
        });
        self.dirty = true;
        Ok(())
    }

    fn ensure_parents(&mut self, path: &str) -> Result<()> {
        let mut prefix = String::new();
        let mut components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        components.pop(); // the object itself
        for component in components {
            prefix.push('/');
            prefix.push_str(component);
            match self.find(&prefix) {
                Some(index) => {
                    if let NodeBody::Dataset(_) = self.nodes[index].body {
                        return Err(Error::TypeMismatch(format!("{prefix} is a dataset")));
                    }
                }
                None => {
                    self.nodes.push(Node {
                        path: prefix.clone(),
                        attrs: BTreeMap::new(),
                        body: NodeBody::Group,
                    });
                    self.dirty = true;
                }
            }
        }
        Ok(())
    }

    /// Returns true when a group exists at `path`.
    pub fn group_exists(&self, path: &str) -> bool {
        matches!(
            self.find(path).map(|i| &self.nodes[i].body),
            Some(NodeBody::Group)
        )
    }

    /// Returns true when a dataset exists at `path`.
    pub fn dataset_exists(&self, path: &str) -> bool {
        matches!(
            self.find(path).map(|i| &self.nodes[i].body),
            Some(NodeBody::Dataset(_))
        )
    }

    /// Returns the names of the direct children of the group at `path`.
    pub fn list_children(&self, path: &str) -> Vec<String> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let mut children: Vec<String> = self
            .nodes
            .iter()
            .filter_map(|node| node.path.strip_prefix(&prefix))
            .filter(|rest| !rest.is_empty() && !rest.contains('/'))
            .map(|rest| rest.to_string())
            .collect();
        children.sort();
        children
    }

    // Datasets.

    /// Creates a dataset at `path`, creating missing parent groups.
    pub fn create_dataset(&mut self, path: &str, spec: DatasetSpec) -> Result<DatasetHandle> {
        self.check_writable()?;
        if self.find(path).is_some() {
            return Err(Error::AlreadyExists(path.to_string()));
        }
        let rank = spec.dims.len();
        if rank == 0 || rank > 2 {
            return Err(Error::RankMismatch {
                expected: 2,
                actual: rank as u8,
            });
        }
        if spec.max_dims.len() != rank {
            return Err(Error::RankMismatch {
                expected: rank as u8,
                actual: spec.max_dims.len() as u8,
            });
        }
        for (dim, max) in spec.dims.iter().zip(&spec.max_dims) {
            if !max.allows(*dim) {
                return Err(Error::BoundsExceeded(format!(
                    "initial extent {dim} exceeds the maximum for {path}"
                )));
            }
        }
        if spec.compression > 9 {
            return Err(Error::InvalidCompressionLevel(spec.compression));
        }
        if spec.compression > 0 && spec.chunk.is_none() {
            return Err(Error::CompressionNeedsChunkingSet);
        }
        if let Some(chunk) = &spec.chunk {
            if chunk.len() != rank || chunk.iter().any(|&c| c == 0) {
                return Err(Error::InvalidLayerDescriptor(format!(
                    "bad chunk dimensions for {path}"
                )));
            }
        }

        let data = if spec.var_len {
            if rank != 1 {
                return Err(Error::RankMismatch {
                    expected: 1,
                    actual: rank as u8,
                });
            }
            DatasetData::Records(Vec::new())
        } else {
            let element_size = spec.element.packed_size().ok_or_else(|| {
                Error::TypeMismatch(format!(
                    "variable-length element in fixed dataset {path}"
                ))
            })?;
            let cells: u64 = spec.dims.iter().product();
            DatasetData::Fixed(filled(cells as usize, element_size, spec.fill.as_deref()))
        };

        self.ensure_parents(path)?;
        self.nodes.push(Node {
            path: path.to_string(),
            attrs: BTreeMap::new(),
            body: NodeBody::Dataset(DatasetStorage {
                element: spec.element,
                dims: spec.dims,
                max_dims: spec.max_dims,
                chunk: spec.chunk,
                compression: spec.compression,
                fill: spec.fill,
                data,
            }),
        });
        self.dirty = true;
        Ok(DatasetHandle(self.nodes.len() - 1))
    }

    /// Opens the dataset at `path`.
    pub fn open_dataset(&self, path: &str) -> Result<DatasetHandle> {
        let index = self
            .find(path)
            .ok_or_else(|| Error::DatasetNotFound(path.to_string()))?;
        match self.nodes[index].body {
            NodeBody::Dataset(_) => Ok(DatasetHandle(index)),
            NodeBody::Group => Err(Error::TypeMismatch(format!("{path} is a group"))),
        }
    }

    /// Returns the current dimensions of a dataset.
    pub fn dataset_dims(&self, handle: DatasetHandle) -> Result<Vec<u64>> {
        Ok(self.storage(handle)?.dims.clone())
    }

    /// Returns the element type of a dataset.
    pub fn dataset_element(&self, handle: DatasetHandle) -> Result<&ElementType> {
        Ok(&self.storage(handle)?.element)
    }

    /// Returns the chunk dimensions of a dataset, if chunked.
    pub fn dataset_chunk(&self, handle: DatasetHandle) -> Result<Option<Vec<u64>>> {
        Ok(self.storage(handle)?.chunk.clone())
    }

    /// Returns the deflate level of a dataset.
    pub fn dataset_compression(&self, handle: DatasetHandle) -> Result<u8> {
        Ok(self.storage(handle)?.compression)
    }

    /// Reads a hyperslab of a fixed-element dataset as packed bytes.
    pub fn read_hyperslab(
        &self,
        handle: DatasetHandle,
        offset: &[u64],
        count: &[u64],
    ) -> Result<Vec<u8>> {
        let storage = self.storage(handle)?;
        let DatasetData::Fixed(data) = &storage.data else {
            return Err(Error::TypeMismatch(
                "hyperslab read of a variable-length dataset".to_string(),
            ));
        };
        check_slab(&storage.dims, offset, count)?;
        let element_size = storage.element_size();
        match storage.dims.len() {
            1 => {
                let start = offset[0] as usize * element_size;
                let end = start + count[0] as usize * element_size;
                Ok(data[start..end].to_vec())
            }
            _ => {
                let cols = storage.dims[1] as usize;
                let row_bytes = count[1] as usize * element_size;
                let mut out = Vec::with_capacity(count[0] as usize * row_bytes);
                for r in 0..count[0] as usize {
                    let start =
                        ((offset[0] as usize + r) * cols + offset[1] as usize) * element_size;
                    out.extend_from_slice(&data[start..start + row_bytes]);
                }
                Ok(out)
            }
        }
    }

    /// Writes a hyperslab of packed bytes into a fixed-element dataset.
    ///
    /// The target region must lie within the current dimensions; extension
    /// is a separate, explicit step ([Container::extend]).
    pub fn write_hyperslab(
        &mut self,
        handle: DatasetHandle,
        offset: &[u64],
        count: &[u64],
        bytes: &[u8],
    ) -> Result<()> {
        self.check_writable()?;
        let storage = self.storage_mut(handle)?;
        let element_size = storage.element_size();
        check_slab(&storage.dims, offset, count)?;
        let expected: u64 = count.iter().product::<u64>() * element_size as u64;
        if expected != bytes.len() as u64 {
            return Err(Error::InternalError(format!(
                "hyperslab buffer holds {} bytes, region needs {expected}",
                bytes.len()
            )));
        }
        let rank = storage.dims.len();
        let cols = if rank == 2 { storage.dims[1] as usize } else { 0 };
        let DatasetData::Fixed(data) = &mut storage.data else {
            return Err(Error::TypeMismatch(
                "hyperslab write of a variable-length dataset".to_string(),
            ));
        };
        match rank {
            1 => {
                let start = offset[0] as usize * element_size;
                data[start..start + bytes.len()].copy_from_slice(bytes);
            }
            _ => {
                let row_bytes = count[1] as usize * element_size;
                for r in 0..count[0] as usize {
                    let dst =
                        ((offset[0] as usize + r) * cols + offset[1] as usize) * element_size;
                    let src = r * row_bytes;
                    data[dst..dst + row_bytes].copy_from_slice(&bytes[src..src + row_bytes]);
                }
            }
        }
        self.dirty = true;
        Ok(())
    }

    /// Grows a dataset in place to `new_dims`.
    ///
    /// Only legal along axes whose maximum extent permits the new length;
    /// shrinking is never performed.
    pub fn extend(&mut self, handle: DatasetHandle, new_dims: &[u64]) -> Result<()> {
        self.check_writable()?;
        let storage = self.storage_mut(handle)?;
        if new_dims.len() != storage.dims.len() {
            return Err(Error::RankMismatch {
                expected: storage.dims.len() as u8,
                actual: new_dims.len() as u8,
            });
        }
        for ((old, new), max) in storage.dims.iter().zip(new_dims).zip(&storage.max_dims) {
            if new < old || !max.allows(*new) {
                return Err(Error::BoundsExceeded(format!(
                    "cannot extend axis from {old} to {new}"
                )));
            }
        }
        if new_dims == storage.dims.as_slice() {
            return Ok(());
        }
        let element_size = storage.element_size();
        let fill = storage.fill.clone();
        match &mut storage.data {
            DatasetData::Fixed(data) => match storage.dims.len() {
                1 => {
                    let mut grown = filled(new_dims[0] as usize, element_size, fill.as_deref());
                    grown[..data.len()].copy_from_slice(data);
                    *data = grown;
                }
                _ => {
                    let (old_rows, old_cols) =
                        (storage.dims[0] as usize, storage.dims[1] as usize);
                    let (new_rows, new_cols) = (new_dims[0] as usize, new_dims[1] as usize);
                    let mut grown =
                        filled(new_rows * new_cols, element_size, fill.as_deref());
                    for r in 0..old_rows {
                        let src = r * old_cols * element_size;
                        let dst = r * new_cols * element_size;
                        grown[dst..dst + old_cols * element_size]
                            .copy_from_slice(&data[src..src + old_cols * element_size]);
                    }
                    *data = grown;
                }
            },
            DatasetData::Records(_) => {
                // Record datasets grow by appending, not by extension.
                return Err(Error::UnsupportedOperation(
                    "extend of a variable-length dataset",
                ));
            }
        }
        debug!(
            "extended dataset {} from {:?} to {:?}",
            self.nodes[handle.0].path, self.storage(handle)?.dims, new_dims
        );
        self.storage_mut(handle)?.dims = new_dims.to_vec();
        self.dirty = true;
        Ok(())
    }

    // Variable-length record datasets.

    /// Appends one record to a variable-length dataset, returning its index.
    pub fn append_record(&mut self, handle: DatasetHandle, bytes: Vec<u8>) -> Result<u64> {
        self.check_writable()?;
        let storage = self.storage_mut(handle)?;
        let DatasetData::Records(records) = &mut storage.data else {
            return Err(Error::TypeMismatch(
                "record append to a fixed dataset".to_string(),
            ));
        };
        records.push(bytes);
        storage.dims[0] = records.len() as u64;
        self.dirty = true;
        Ok(self.storage(handle)?.dims[0] - 1)
    }

    /// Returns the number of records in a variable-length dataset.
    pub fn record_count(&self, handle: DatasetHandle) -> Result<u64> {
        match &self.storage(handle)?.data {
            DatasetData::Records(records) => Ok(records.len() as u64),
            DatasetData::Fixed(_) => Err(Error::TypeMismatch(
                "record count of a fixed dataset".to_string(),
            )),
        }
    }

    /// Reads one record from a variable-length dataset.
    pub fn read_record(&self, handle: DatasetHandle, index: u64) -> Result<&[u8]> {
        match &self.storage(handle)?.data {
            DatasetData::Records(records) => records
                .get(index as usize)
                .map(|r| r.as_slice())
                .ok_or_else(|| Error::BoundsExceeded(format!("record {index}"))),
            DatasetData::Fixed(_) => Err(Error::TypeMismatch(
                "record read of a fixed dataset".to_string(),
            )),
        }
    }

    // Attributes.

    /// Creates a typed attribute on the object at `path`.
    ///
    /// The attribute starts out holding the zero value of its type.
    pub fn create_attr(&mut self, path: &str, name: &str, attr_type: AttrType) -> Result<()> {
        self.check_writable()?;
        let node = self.node_mut(path)?;
        if node.attrs.contains_key(name) {
            return Err(Error::AlreadyExists(format!("{path}@{name}")));
        }
        node.attrs.insert(
            name.to_string(),
            Attribute {
                declared: attr_type,
                value: AttributeValue::default_for(attr_type),
            },
        );
        self.dirty = true;
        Ok(())
    }

    /// Writes an attribute value; the attribute must have been created.
    pub fn write_attr(&mut self, path: &str, name: &str, value: AttributeValue) -> Result<()> {
        self.check_writable()?;
        let node = self.node_mut(path)?;
        let attr = node
            .attrs
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(format!("{path}@{name}")))?;
        if !value.matches(attr.declared) {
            return Err(Error::UnsupportedAttributeType(format!("{path}@{name}")));
        }
        attr.value = value;
        self.dirty = true;
        Ok(())
    }

    /// Reads an attribute value.
    pub fn read_attr(&self, path: &str, name: &str) -> Result<AttributeValue> {
        let node = self.node(path)?;
        node.attrs
            .get(name)
            .map(|attr| attr.value.clone())
            .ok_or_else(|| Error::NotFound(format!("{path}@{name}")))
    }

    /// Returns true when the object at `path` carries the attribute.
    pub fn attr_exists(&self, path: &str, name: &str) -> bool {
        self.find(path)
            .map(|i| self.nodes[i].attrs.contains_key(name))
            .unwrap_or(false)
    }
}

impl Container {
    /// A writable scratch container for unit tests; its backing path lives
    /// in the system temp directory and its contents are never read back.
    #[cfg(test)]
    pub(crate) fn scratch() -> Container {
        Container {
            path: std::env::temp_dir().join(format!("bag-scratch-{}.bagc", std::process::id())),
            mode: OpenMode::ReadWrite,
            nodes: Vec::new(),
            dirty: false,
        }
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        if self.dirty && self.mode == OpenMode::ReadWrite {
            if let Err(err) = self.flush() {
                warn!("failed to flush container on drop: {err}");
            }
        }
    }
}

fn filled(cells: usize, element_size: usize, fill: Option<&[u8]>) -> Vec<u8> {
    match fill {
        Some(element) if element.len() == element_size && element.iter().any(|&b| b != 0) => {
            let mut data = Vec::with_capacity(cells * element_size);
            for _ in 0..cells {
                data.extend_from_slice(element);
            }
            data
        }
        _ => vec![0; cells * element_size],
    }
}

fn check_slab(dims: &[u64], offset: &[u64], count: &[u64]) -> Result<()> {
    if offset.len() != dims.len() || count.len() != dims.len() {
        return Err(Error::RankMismatch {
            expected: dims.len() as u8,
            actual: offset.len() as u8,
        });
    }
    for ((dim, off), cnt) in dims.iter().zip(offset).zip(count) {
        if *cnt == 0 || off.checked_add(*cnt).is_none_or(|end| end > *dim) {
            return Err(Error::BoundsExceeded(format!(
                "hyperslab [{off}, {}) outside extent {dim}",
                off.saturating_add(*cnt)
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f32_dataset(dims: Vec<u64>) -> DatasetSpec {
        let max_dims = dims.iter().map(|&d| Extent::Fixed(d)).collect();
        DatasetSpec::new(ElementType::Scalar(ScalarType::F32), dims, max_dims)
    }

    #[test]
    fn hyperslab_round_trip() {
        let mut container = Container::scratch();
        let handle = container
            .create_dataset("/grid", f32_dataset(vec![3, 4]))
            .unwrap();
        let values: Vec<u8> = [5.0_f32, 6.0, 7.0, 8.0]
            .iter()
            .flat_map(|f| f.to_le_bytes())
            .collect();
        container
            .write_hyperslab(handle, &[1, 1], &[2, 2], &values)
            .unwrap();
        let read = container.read_hyperslab(handle, &[1, 1], &[2, 2]).unwrap();
        assert_eq!(values, read);
        // An untouched cell keeps the (zero) fill.
        let corner = container.read_hyperslab(handle, &[0, 0], &[1, 1]).unwrap();
        assert_eq!(vec![0; 4], corner);
    }

    #[test]
    fn out_of_bounds_slab_is_rejected() {
        let mut container = Container::scratch();
        let handle = container
            .create_dataset("/grid", f32_dataset(vec![2, 2]))
            .unwrap();
        assert!(matches!(
            container.read_hyperslab(handle, &[0, 1], &[1, 2]),
            Err(Error::BoundsExceeded(_))
        ));
    }

    #[test]
    fn extension_respects_max_dims() {
        let mut container = Container::scratch();
        let spec = DatasetSpec::new(
            ElementType::Scalar(ScalarType::U32),
            vec![0],
            vec![Extent::Unlimited],
        );
        let handle = container.create_dataset("/list", spec).unwrap();
        container.extend(handle, &[5]).unwrap();
        assert_eq!(vec![5], container.dataset_dims(handle).unwrap());

        let fixed = container
            .create_dataset("/fixed", f32_dataset(vec![2, 2]))
            .unwrap();
        assert!(container.extend(fixed, &[3, 2]).is_err());
    }

    #[test]
    fn extension_preserves_rows_when_columns_grow() {
        let mut container = Container::scratch();
        let spec = DatasetSpec::new(
            ElementType::Scalar(ScalarType::U8),
            vec![2, 2],
            vec![Extent::Unlimited, Extent::Unlimited],
        );
        let handle = container.create_dataset("/grid", spec).unwrap();
        container
            .write_hyperslab(handle, &[0, 0], &[2, 2], &[1, 2, 3, 4])
            .unwrap();
        container.extend(handle, &[2, 3]).unwrap();
        let all = container.read_hyperslab(handle, &[0, 0], &[2, 3]).unwrap();
        assert_eq!(vec![1, 2, 0, 3, 4, 0], all);
    }

    #[test]
    fn attributes_are_typed() {
        let mut container = Container::scratch();
        container.create_group("/BAG_root").unwrap();
        container
            .create_attr("/BAG_root", "Bag Version", AttrType::String(32))
            .unwrap();
        container
            .write_attr(
                "/BAG_root",
                "Bag Version",
                AttributeValue::String("2.0.0".to_string()),
            )
            .unwrap();
        assert_eq!(
            "2.0.0",
            container
                .read_attr("/BAG_root", "Bag Version")
                .unwrap()
                .as_str()
                .unwrap()
        );
        assert!(container
            .write_attr("/BAG_root", "Bag Version", AttributeValue::U32(1))
            .is_err());
    }

    #[test]
    fn children_are_listed() {
        let mut container = Container::scratch();
        container.create_group("/BAG_root/georef_metadata/Elevation").unwrap();
        container.create_group("/BAG_root/georef_metadata/Uncertainty").unwrap();
        assert_eq!(
            vec!["Elevation".to_string(), "Uncertainty".to_string()],
            container.list_children("/BAG_root/georef_metadata")
        );
    }
}

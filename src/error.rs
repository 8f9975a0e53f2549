//! Our error.

use thiserror::Error;

/// Crate-specific errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Wraps `std::io::Error`.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A container object (group, dataset, or attribute) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The file cannot be opened with the requested access.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The file (or container object) already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The container envelope is damaged or not a BAG container at all.
    #[error("corrupt container: {0}")]
    CorruptContainer(String),

    /// A dataset or attribute holds a different type than requested.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// A dataset has a different rank than requested.
    #[error("rank mismatch: expected rank {expected}, found rank {actual}")]
    RankMismatch {
        /// The rank the caller asked for.
        expected: u8,
        /// The rank the dataset actually has.
        actual: u8,
    },

    /// The container failed in a way that should not happen.
    #[error("internal container error: {0}")]
    InternalError(String),

    /// A mandatory layer is missing from the file.
    #[error("missing mandatory layer: {0}")]
    MissingMandatoryLayer(String),

    /// The surface correction topography is not a known kind.
    #[error("unsupported surface correction type: {0}")]
    UnsupportedSurfaceType(u8),

    /// More correctors were requested than the format allows.
    #[error("too many correctors: {0} (limit is 10)")]
    TooManyCorrectors(u8),

    /// The number of correctors could not be determined from the file.
    #[error("cannot read the number of correctors")]
    CannotReadNumCorrectors,

    /// The variable resolution refinement dataset has unusable dimensions.
    #[error("invalid variable resolution refinement dimensions: {0}")]
    InvalidVRRefinementDimensions(String),

    /// The layer descriptor is malformed.
    #[error("invalid layer descriptor: {0}")]
    InvalidLayerDescriptor(String),

    /// A layer was paired with a descriptor of a different family.
    #[error("unexpected layer descriptor type")]
    UnexpectedLayerDescriptorType,

    /// The descriptor is not usable for the requested operation.
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    /// The requested read region is not a valid sub-rectangle of the layer.
    #[error("invalid read size")]
    InvalidReadSize,

    /// An index or region lies outside the dataset and it cannot grow there.
    #[error("bounds exceeded: {0}")]
    BoundsExceeded(String),

    /// The dataset backing a layer has gone missing.
    #[error("dataset not found: {0}")]
    DatasetNotFound(String),

    /// The compression level is outside 0..=9.
    #[error("invalid compression level: {0}")]
    InvalidCompressionLevel(u8),

    /// Compression was requested without chunking.
    #[error("compression requires a chunk size to be set")]
    CompressionNeedsChunkingSet,

    /// The layer kind requires chunking and none was set.
    #[error("this layer requires a chunk size to be set")]
    LayerRequiresChunkingSet,

    /// A layer with this key already exists.
    #[error("layer exists: {0}")]
    LayerExists(String),

    /// No layer with this key exists.
    #[error("layer not found: {0}")]
    LayerNotFound(String),

    /// The corrector index is outside `1..=num_correctors`.
    #[error("invalid corrector: {0}")]
    InvalidCorrector(u8),

    /// A compound value was read as a different type than it holds.
    #[error("invalid cast: {0}")]
    InvalidCast(String),

    /// The attribute type is not supported by the container.
    #[error("unsupported attribute type: {0}")]
    UnsupportedAttributeType(String),

    /// The coarse cell has no refinement grid.
    #[error("no refinement at coarse cell ({row}, {col})")]
    NoRefinement {
        /// The coarse row.
        row: u32,
        /// The coarse column.
        col: u32,
    },

    /// The dataset was opened read-only.
    #[error("the dataset is read-only")]
    ReadOnlyError,

    /// The operation is not supported by this layer kind.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(&'static str),
}

//! Native library for reading and writing the [Bathymetric Attributed
//! Grid](https://github.com/OpenNavigationSurface/BAG) (BAG) data exchange
//! format.
//!
//! A BAG file is a self-describing container of co-registered raster
//! surfaces: a mandatory elevation and uncertainty pair, optional auxiliary
//! surfaces, a tracking list of survey edits, an XML metadata block, and
//! (optionally) a variable-resolution refinement grid, a vertical datum
//! separation model, and georeferenced metadata lookup layers.
//!
//! # Reading
//!
//! Use a [Dataset] to open a file and read layer data:
//!
//! ```no_run
//! use bag::{Dataset, LayerType, OpenMode};
//!
//! let dataset = Dataset::open("data/survey.bag", OpenMode::ReadOnly).unwrap();
//! let (rows, cols) = dataset.dims();
//! let bytes = dataset.read(LayerType::Elevation, 0, 0, rows - 1, cols - 1).unwrap();
//! ```
//!
//! # Writing
//!
//! A new BAG is created from interpreted [Metadata]:
//!
//! ```no_run
//! use bag::{Dataset, LayerType, Metadata};
//!
//! let metadata = Metadata::new(100, 100, (0., 0.), (1., 1.));
//! let mut dataset = Dataset::create("new.bag", metadata, 100, 1).unwrap();
//! let row = vec![42.0_f32; 100];
//! let buffer: Vec<u8> = row.iter().flat_map(|f| f.to_ne_bytes()).collect();
//! dataset.write(LayerType::Elevation, 0, 0, 0, 99, &buffer).unwrap();
//! dataset.close().unwrap();
//! ```
//!
//! A [Dataset] implements `Drop`, which it uses to flush layer attributes
//! and the container when the dataset goes out of scope. If this final
//! flush fails, an error is printed to the logs but the thread will not
//! panic. If that is unacceptable, call [Dataset::close] yourself.

#![deny(unsafe_code)]
#![warn(missing_docs, trivial_casts, trivial_numeric_casts, unused_qualifications)]

pub mod container;
pub mod crs;
pub mod descriptor;
pub mod layer;
pub mod metadata;
pub mod vr;

mod dataset;
mod error;
mod tracking_list;
mod transform;

pub use crate::container::{Container, OpenMode};
pub use crate::crs::CrsTranslator;
pub use crate::dataset::Dataset;
pub use crate::descriptor::LayerDescriptor;
pub use crate::error::Error;
pub use crate::layer::{GroupType, Layer, LayerType};
pub use crate::metadata::Metadata;
pub use crate::tracking_list::{TrackingItem, TrackingList};
pub use crate::transform::GridTransform;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, Error>;

/// The value stored in an elevation cell that holds no data.
pub const NULL_ELEVATION: f32 = 1_000_000.0;

/// The value stored in an uncertainty cell that holds no data.
pub const NULL_UNCERTAINTY: f32 = 1_000_000.0;

/// The no-data value for every other floating point surface.
pub const NULL_GENERIC: f32 = 1_000_000.0;

/// The refinement index marking a coarse cell without a refinement grid.
pub const NULL_VARRES_INDEX: u32 = 0xFFFF_FFFF;

/// The version written into newly created files.
pub const BAG_VERSION: &str = "2.0.0";

//! Surface corrections and the SEP resampler end to end.

use bag::layer::surface_corrections::GriddedCorrector;
use bag::layer::Topography;
use bag::{Dataset, Error, LayerType, Metadata, NULL_ELEVATION, NULL_GENERIC};
use tempfile::TempDir;

fn packed(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_ne_bytes()).collect()
}

fn unpacked(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// A 3x4 surface with a 2x2 corrector grid on the same origin and unit
/// spacing; every corrector holds the given Z offsets.
fn corrected_dataset(path: &std::path::Path, z: &[f32]) -> Dataset {
    let metadata = Metadata::new(3, 4, (0., 0.), (1., 1.));
    let mut dataset = Dataset::create(path, metadata, 10, 0).unwrap();
    dataset
        .create_surface_corrections(Topography::GridExtents, z.len() as u8, 10, 0)
        .unwrap();
    dataset
        .set_surface_corrections_grid((0., 0.), (1., 1.), "MLLW,NAVD88")
        .unwrap();

    let mut buffer = Vec::new();
    for _ in 0..4 {
        GriddedCorrector { z: z.to_vec() }
            .write_to(&mut buffer)
            .unwrap();
    }
    dataset
        .write(LayerType::SurfaceCorrection, 0, 0, 1, 1, &buffer)
        .unwrap();
    dataset
}

#[test]
fn exact_hits_add_the_corrector_value() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sep.bag");
    let mut dataset = corrected_dataset(&path, &[2.0]);

    dataset
        .write(LayerType::Elevation, 0, 0, 0, 0, &packed(&[5.0]))
        .unwrap();

    let out = dataset
        .read_corrected(0, 0, 0, 0, 1, LayerType::Elevation)
        .unwrap();
    assert_eq!(vec![7.0], unpacked(&out));
}

#[test]
fn zero_separation_is_the_identity() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sep.bag");
    let mut dataset = corrected_dataset(&path, &[0.0]);

    let values: Vec<f32> = (0..12).map(|i| i as f32 / 2.).collect();
    dataset
        .write(LayerType::Elevation, 0, 0, 2, 3, &packed(&values))
        .unwrap();

    let out = dataset
        .read_corrected(0, 0, 2, 3, 1, LayerType::Elevation)
        .unwrap();
    assert_eq!(values, unpacked(&out));
}

#[test]
fn interpolation_between_equal_nodes_is_flat() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sep.bag");
    let mut dataset = corrected_dataset(&path, &[1.5, -0.5]);

    // A cell between and beyond the corrector nodes still sees a constant
    // separation field.
    dataset
        .write(LayerType::Elevation, 2, 3, 2, 3, &packed(&[10.0]))
        .unwrap();
    let out = dataset
        .read_corrected(2, 3, 2, 3, 2, LayerType::Elevation)
        .unwrap();
    let corrected = unpacked(&out)[0];
    assert!((corrected - 9.5).abs() < 1e-5, "got {corrected}");
}

#[test]
fn null_cells_stay_null() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sep.bag");
    let dataset = corrected_dataset(&path, &[2.0]);

    // Elevation was never written; every cell holds the null fill.
    let out = dataset
        .read_corrected(0, 0, 0, 1, 1, LayerType::Elevation)
        .unwrap();
    assert_eq!(vec![NULL_ELEVATION, NULL_GENERIC], unpacked(&out));
}

#[test]
fn corrector_index_is_validated() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sep.bag");
    let mut dataset = corrected_dataset(&path, &[2.0]);
    dataset
        .write(LayerType::Elevation, 0, 0, 0, 0, &packed(&[5.0]))
        .unwrap();

    assert!(matches!(
        dataset.read_corrected(0, 0, 0, 0, 0, LayerType::Elevation),
        Err(Error::InvalidCorrector(0))
    ));
    assert!(matches!(
        dataset.read_corrected(0, 0, 0, 0, 2, LayerType::Elevation),
        Err(Error::InvalidCorrector(2))
    ));
}

#[test]
fn corrections_require_chunking() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sep.bag");
    let metadata = Metadata::new(3, 4, (0., 0.), (1., 1.));
    let mut dataset = Dataset::create(&path, metadata, 10, 0).unwrap();
    assert!(matches!(
        dataset.create_surface_corrections(Topography::GridExtents, 1, 0, 0),
        Err(Error::LayerRequiresChunkingSet)
    ));
    assert!(matches!(
        dataset.create_surface_corrections(Topography::GridExtents, 11, 10, 0),
        Err(Error::TooManyCorrectors(11))
    ));
}

#[test]
fn corrections_survive_a_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sep.bag");
    {
        let mut dataset = corrected_dataset(&path, &[2.0]);
        dataset
            .write(LayerType::Elevation, 0, 0, 0, 0, &packed(&[5.0]))
            .unwrap();
        dataset.close().unwrap();
    }

    let dataset = Dataset::open(&path, bag::OpenMode::ReadOnly).unwrap();
    let layer = dataset.layer(LayerType::SurfaceCorrection).unwrap();
    let bag::LayerDescriptor::SurfaceCorrections(descriptor) = layer.descriptor() else {
        panic!("not surface corrections");
    };
    assert_eq!(Topography::GridExtents, descriptor.topography());
    assert_eq!(1, descriptor.num_correctors());
    assert_eq!("MLLW,NAVD88", descriptor.vertical_datums());
    assert_eq!((1., 1.), descriptor.spacing());

    let out = dataset
        .read_corrected(0, 0, 0, 0, 1, LayerType::Elevation)
        .unwrap();
    assert_eq!(vec![7.0], unpacked(&out));
}

//! Create a BAG, write the mandatory layers, re-open, and read back.

use bag::{Dataset, LayerType, Metadata, NULL_ELEVATION, OpenMode};
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

#[test]
fn create_write_reopen_read() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tmp.bag");
    let metadata = Metadata::new(3, 4, (0., 0.), (1., 1.));

    let values: Vec<f32> = (0..12).map(|i| i as f32).collect();
    {
        let mut dataset = Dataset::create(&path, metadata, 100, 1).unwrap();
        assert_eq!((3, 4), dataset.dims());
        dataset
            .write(LayerType::Elevation, 0, 0, 2, 3, &packed(&values))
            .unwrap();
        dataset.close().unwrap();
    }

    let dataset = Dataset::open(&path, OpenMode::ReadOnly).unwrap();
    assert_eq!((3, 4), dataset.dims());
    assert!(dataset.read_only());
    let read = dataset.read(LayerType::Elevation, 0, 0, 2, 3).unwrap();
    assert_eq!(values, unpacked(&read));

    let (min, max) = dataset
        .layer_min_max(LayerType::Elevation)
        .unwrap()
        .unwrap();
    assert_eq!((0.0, 11.0), (min, max));
}

#[test]
fn null_values_do_not_move_min_max() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tmp.bag");
    let metadata = Metadata::new(3, 4, (0., 0.), (1., 1.));

    let values: Vec<f32> = (0..12).map(|i| i as f32).collect();
    {
        let mut dataset = Dataset::create(&path, metadata, 100, 1).unwrap();
        dataset
            .write(LayerType::Elevation, 0, 0, 2, 3, &packed(&values))
            .unwrap();
        dataset
            .write(LayerType::Elevation, 1, 1, 1, 1, &packed(&[NULL_ELEVATION]))
            .unwrap();
        dataset.close().unwrap();
    }

    let dataset = Dataset::open(&path, OpenMode::ReadOnly).unwrap();
    // The null reappears verbatim...
    let cell = dataset.read_node(LayerType::Elevation, 1, 1).unwrap();
    assert_eq!(vec![NULL_ELEVATION], unpacked(&cell));
    // ...and never entered the fold.
    let (min, max) = dataset
        .layer_min_max(LayerType::Elevation)
        .unwrap()
        .unwrap();
    assert_eq!((0.0, 11.0), (min, max));
}

#[test]
fn unwritten_cells_hold_fill_values() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fill.bag");
    let metadata = Metadata::new(3, 4, (0., 0.), (1., 1.));
    let dataset = Dataset::create(&path, metadata, 0, 0).unwrap();
    let cell = dataset.read_node(LayerType::Elevation, 2, 3).unwrap();
    assert_eq!(vec![NULL_ELEVATION], unpacked(&cell));
}

#[test]
fn projected_cover_is_node_centered() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cover.bag");
    let metadata = Metadata::new(3, 4, (10., 20.), (2., 2.));
    let dataset = Dataset::create(&path, metadata, 0, 0).unwrap();
    assert_eq!((10., 20., 16., 24.), dataset.projected_cover());
    assert_eq!((10., 20.), dataset.grid_to_geo(0, 0).unwrap());
    assert_eq!((2, 3), dataset.geo_to_grid(16., 24.).unwrap());
}

#[test]
fn out_of_bounds_reads_fail() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bounds.bag");
    let metadata = Metadata::new(3, 4, (0., 0.), (1., 1.));
    let dataset = Dataset::create(&path, metadata, 0, 0).unwrap();
    assert!(dataset.read(LayerType::Elevation, 0, 0, 3, 3).is_err());
    assert!(dataset.read(LayerType::Elevation, 2, 0, 1, 3).is_err());
}

#[test]
fn writes_to_read_only_files_are_refused() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ro.bag");
    let metadata = Metadata::new(3, 4, (0., 0.), (1., 1.));
    Dataset::create(&path, metadata, 0, 0)
        .unwrap()
        .close()
        .unwrap();

    let mut dataset = Dataset::open(&path, OpenMode::ReadOnly).unwrap();
    let result = dataset.write(LayerType::Elevation, 0, 0, 0, 0, &packed(&[1.0]));
    assert!(matches!(result, Err(bag::Error::ReadOnlyError)));
}

#[test]
fn creating_over_an_existing_file_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("dup.bag");
    let metadata = Metadata::new(2, 2, (0., 0.), (1., 1.));
    Dataset::create(&path, metadata.clone(), 0, 0)
        .unwrap()
        .close()
        .unwrap();
    assert!(matches!(
        Dataset::create(&path, metadata, 0, 0),
        Err(bag::Error::AlreadyExists(_))
    ));
}

#[test]
fn optional_simple_layers_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("optional.bag");
    let metadata = Metadata::new(3, 4, (0., 0.), (1., 1.));
    {
        let mut dataset = Dataset::create(&path, metadata, 0, 0).unwrap();
        dataset
            .create_simple_layer(LayerType::NominalElevation, 0, 0)
            .unwrap();
        dataset
            .write(LayerType::NominalElevation, 0, 0, 0, 1, &packed(&[4.5, 5.5]))
            .unwrap();
        assert!(matches!(
            dataset.create_simple_layer(LayerType::NominalElevation, 0, 0),
            Err(bag::Error::LayerExists(_))
        ));
        dataset.close().unwrap();
    }

    let dataset = Dataset::open(&path, OpenMode::ReadOnly).unwrap();
    let read = dataset.read(LayerType::NominalElevation, 0, 0, 0, 1).unwrap();
    assert_eq!(vec![4.5, 5.5], unpacked(&read));
    let (min, max) = dataset
        .layer_min_max(LayerType::NominalElevation)
        .unwrap()
        .unwrap();
    assert_eq!((4.5, 5.5), (min, max));
    assert!(matches!(
        dataset.layer(LayerType::AverageElevation),
        Err(bag::Error::LayerNotFound(_))
    ));
}

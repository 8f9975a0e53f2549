//! Georeferenced metadata layers end to end.

use bag::layer::{CompoundValue, FieldDefinition, Profile, RecordDefinition, ValueKind};
use bag::layer::create_record_noaa_ocs_2022_10;
use bag::{Dataset, Error, LayerType, Metadata, OpenMode};
use tempfile::TempDir;

fn sample_record() -> Vec<CompoundValue> {
    create_record_noaa_ocs_2022_10(
        false,
        true,
        1234.5,
        765.4321,
        true,
        false,
        9.87,
        1.23,
        "2019-04-01 00:00:00.0Z",
        "2019-04-01 12:00:00.0Z",
        "NOAA",
        "CD71EB77-5812-4735-B728-0DC1AE2A2F3B",
        42,
        "Creative Commons Zero Public Domain Dedication (CC0)",
        "https://creativecommons.org/publicdomain/zero/1.0/",
    )
}

#[test]
fn noaa_profile_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("georef.bag");
    {
        let metadata = Metadata::new(3, 4, (0., 0.), (1., 1.));
        let mut dataset = Dataset::create(&path, metadata, 100, 1).unwrap();
        dataset
            .create_georef_metadata_layer(Profile::NoaaOcs2022_10, "Elevation", 100, 1)
            .unwrap();

        let index = dataset
            .add_georef_record("Elevation", sample_record())
            .unwrap();
        assert_eq!(1, index);

        dataset
            .write_georef_indices("Elevation", 0, 0, 0, 0, &index.to_ne_bytes())
            .unwrap();
        dataset.close().unwrap();
    }

    let dataset = Dataset::open(&path, OpenMode::ReadOnly).unwrap();
    let bytes = dataset.read(LayerType::GeorefMetadata, 0, 0, 0, 0).unwrap();
    assert_eq!(1, u16::from_ne_bytes([bytes[0], bytes[1]]));

    // Never-written cells point at the reserved record.
    let bytes = dataset.read(LayerType::GeorefMetadata, 2, 3, 2, 3).unwrap();
    assert_eq!(0, u16::from_ne_bytes([bytes[0], bytes[1]]));

    let layer = dataset.georef_metadata_layer("Elevation").unwrap();
    let table = layer.as_georef_metadata().unwrap().value_table();
    assert_eq!(
        1234.5,
        table
            .get_value_by_name(1, "feature_size")
            .unwrap()
            .as_f32()
            .unwrap()
    );
    assert_eq!(
        "2019-04-01 00:00:00.0Z",
        table
            .get_value_by_name(1, "survey_date_start")
            .unwrap()
            .as_string()
            .unwrap()
    );
    // The reserved record holds profile zero values.
    assert_eq!(
        0.0,
        table
            .get_value_by_name(0, "feature_size")
            .unwrap()
            .as_f32()
            .unwrap()
    );
    // Field lookups work by index too.
    let field = table.field_index("source_survey_index").unwrap();
    assert_eq!(42, table.get_value(1, field).unwrap().as_u32().unwrap());
}

#[test]
fn records_must_match_the_profile() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("georef.bag");
    let metadata = Metadata::new(3, 4, (0., 0.), (1., 1.));
    let mut dataset = Dataset::create(&path, metadata, 0, 0).unwrap();
    dataset
        .create_georef_metadata_layer(Profile::NoaaOcs2022_10, "Elevation", 0, 0)
        .unwrap();

    let mut record = sample_record();
    record[0] = CompoundValue::Float32(1.0);
    assert!(matches!(
        dataset.add_georef_record("Elevation", record),
        Err(Error::InvalidCast(_))
    ));
}

#[test]
fn layers_are_keyed_by_host() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("georef.bag");
    let metadata = Metadata::new(3, 4, (0., 0.), (1., 1.));
    let mut dataset = Dataset::create(&path, metadata, 0, 0).unwrap();
    dataset
        .create_georef_metadata_layer(Profile::NoaaOcs2022_10, "Elevation", 0, 0)
        .unwrap();
    dataset
        .create_georef_metadata_layer(Profile::NoaaOcs2022_10, "Uncertainty", 0, 0)
        .unwrap();

    assert!(matches!(
        dataset.create_georef_metadata_layer(Profile::NoaaOcs2022_10, "Elevation", 0, 0),
        Err(Error::LayerExists(_))
    ));
    assert!(matches!(
        dataset.create_georef_metadata_layer(Profile::NoaaOcs2022_10, "Std_Dev", 0, 0),
        Err(Error::LayerNotFound(_))
    ));
    assert!(dataset.georef_metadata_layer("Uncertainty").is_ok());
}

#[test]
fn custom_profiles_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("georef.bag");
    let definition = RecordDefinition::new(vec![
        FieldDefinition::new("surveyed", ValueKind::Bool),
        FieldDefinition::new("quality", ValueKind::UInt32),
        FieldDefinition::new("operator", ValueKind::String),
    ]);
    {
        let metadata = Metadata::new(2, 2, (0., 0.), (1., 1.));
        let mut dataset = Dataset::create(&path, metadata, 0, 0).unwrap();
        dataset
            .create_georef_metadata_layer_with_definition(
                Profile::Custom("SURVEY_QA".to_string()),
                definition.clone(),
                "Elevation",
                0,
                0,
            )
            .unwrap();
        dataset
            .add_georef_record(
                "Elevation",
                vec![
                    CompoundValue::Bool(true),
                    CompoundValue::UInt32(3),
                    CompoundValue::String("RV Example".to_string()),
                ],
            )
            .unwrap();
        dataset.close().unwrap();
    }

    let dataset = Dataset::open(&path, OpenMode::ReadOnly).unwrap();
    let layer = dataset.georef_metadata_layer("Elevation").unwrap();
    let table = layer.as_georef_metadata().unwrap().value_table();
    assert_eq!(definition, *table.definition());
    assert_eq!(
        "RV Example",
        table
            .get_value_by_name(1, "operator")
            .unwrap()
            .as_string()
            .unwrap()
    );
    let bag::LayerDescriptor::GeorefMetadata(descriptor) = layer.descriptor() else {
        panic!("not georef metadata");
    };
    assert_eq!("SURVEY_QA", descriptor.profile());
}

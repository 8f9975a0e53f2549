//! The variable resolution subsystem end to end.

use bag::vr::{VRMetadataItem, VRNodeItem, VRRefinementItem, VRTrackingItem};
use bag::{Dataset, Error, LayerType, Metadata, OpenMode};
use tempfile::TempDir;

fn vr_dataset(path: &std::path::Path) -> Dataset {
    let metadata = Metadata::new(2, 2, (0., 0.), (1., 1.));
    let mut dataset = Dataset::create(path, metadata, 10, 0).unwrap();
    dataset.create_vr_layers(10, 0).unwrap();
    dataset
}

fn refinement_buffer(depths: &[f32]) -> Vec<u8> {
    let mut buffer = Vec::new();
    for &depth in depths {
        buffer.extend_from_slice(
            &VRRefinementItem {
                depth,
                depth_uncrt: 0.5,
            }
            .to_bytes(),
        );
    }
    buffer
}

#[test]
fn refined_nodes_resolve_through_the_metadata_window() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("vr.bag");
    let mut dataset = vr_dataset(&path);

    let start = dataset.allocate_refinement_window(2, 2).unwrap();
    assert_eq!(0, start);

    let meta = VRMetadataItem {
        index: 0,
        dimensions_x: 2,
        dimensions_y: 2,
        resolution_x: 0.5,
        resolution_y: 0.5,
        sw_corner_x: 0.,
        sw_corner_y: 0.,
    };
    dataset
        .write(LayerType::VarResMetadata, 0, 1, 0, 1, &meta.to_bytes())
        .unwrap();
    dataset
        .write(
            LayerType::VarResRefinement,
            0,
            0,
            0,
            3,
            &refinement_buffer(&[10., 11., 12., 13.]),
        )
        .unwrap();

    let node = dataset.read_refined_node(0, 1, 1, 1).unwrap();
    assert_eq!(13.0, node.depth);
    let node = dataset.read_refined_node(0, 1, 0, 1).unwrap();
    assert_eq!(11.0, node.depth);
}

#[test]
fn unrefined_cells_report_no_refinement() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("vr.bag");
    let dataset = vr_dataset(&path);
    assert!(matches!(
        dataset.read_refined_node(1, 1, 0, 0),
        Err(Error::NoRefinement { row: 1, col: 1 })
    ));
}

#[test]
fn overlapping_windows_are_rejected_at_flush() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("vr.bag");
    let mut dataset = vr_dataset(&path);

    dataset.allocate_refinement_window(2, 2).unwrap();
    dataset.allocate_refinement_window(2, 2).unwrap();

    let first = VRMetadataItem {
        index: 0,
        dimensions_x: 2,
        dimensions_y: 2,
        resolution_x: 1.,
        resolution_y: 1.,
        sw_corner_x: 0.,
        sw_corner_y: 0.,
    };
    dataset
        .write(LayerType::VarResMetadata, 0, 0, 0, 0, &first.to_bytes())
        .unwrap();

    // A second window starting inside the first one.
    let overlapping = VRMetadataItem { index: 2, ..first };
    let result = dataset.write(LayerType::VarResMetadata, 0, 1, 0, 1, &overlapping.to_bytes());
    assert!(matches!(
        result,
        Err(Error::InvalidVRRefinementDimensions(_))
    ));

    // Rewriting the cell with a disjoint window clears the conflict.
    let disjoint = VRMetadataItem { index: 4, ..first };
    dataset
        .write(LayerType::VarResMetadata, 0, 1, 0, 1, &disjoint.to_bytes())
        .unwrap();
}

#[test]
fn node_layer_parallels_the_refinement_array() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("vr.bag");
    let mut dataset = vr_dataset(&path);

    dataset.allocate_refinement_window(2, 1).unwrap();
    let meta = VRMetadataItem {
        index: 0,
        dimensions_x: 2,
        dimensions_y: 1,
        resolution_x: 0.5,
        resolution_y: 0.5,
        sw_corner_x: 0.,
        sw_corner_y: 0.,
    };
    dataset
        .write(LayerType::VarResMetadata, 0, 0, 0, 0, &meta.to_bytes())
        .unwrap();

    let mut buffer = Vec::new();
    for item in [
        VRNodeItem {
            hyp_strength: 0.25,
            num_hypotheses: 2,
            n_samples: 11,
        },
        VRNodeItem {
            hyp_strength: 0.75,
            num_hypotheses: 5,
            n_samples: 3,
        },
    ] {
        buffer.extend_from_slice(&item.to_bytes());
    }
    dataset
        .write(LayerType::VarResNode, 0, 0, 0, 1, &buffer)
        .unwrap();

    let stats = dataset.read_refined_node_stats(0, 0, 0, 1).unwrap();
    assert_eq!(5, stats.num_hypotheses);
    assert_eq!(3, stats.n_samples);
}

#[test]
fn vr_state_survives_a_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("vr.bag");
    {
        let mut dataset = vr_dataset(&path);
        dataset.allocate_refinement_window(2, 2).unwrap();
        let meta = VRMetadataItem {
            index: 0,
            dimensions_x: 2,
            dimensions_y: 2,
            resolution_x: 0.5,
            resolution_y: 0.5,
            sw_corner_x: 0.,
            sw_corner_y: 0.,
        };
        dataset
            .write(LayerType::VarResMetadata, 0, 1, 0, 1, &meta.to_bytes())
            .unwrap();
        dataset
            .write(
                LayerType::VarResRefinement,
                0,
                0,
                0,
                3,
                &refinement_buffer(&[10., 11., 12., 13.]),
            )
            .unwrap();
        dataset
            .push_vr_tracking_item(VRTrackingItem {
                row: 0,
                col: 1,
                sub_row: 1,
                sub_col: 1,
                depth: 13.,
                uncertainty: 0.5,
                track_code: 2,
                list_series: 0,
            })
            .unwrap();
        dataset.close().unwrap();
    }

    let dataset = Dataset::open(&path, OpenMode::ReadOnly).unwrap();
    assert!(dataset.has_vr());
    assert_eq!(4, dataset.vr_refinements_len().unwrap());
    assert_eq!(13.0, dataset.read_refined_node(0, 1, 1, 1).unwrap().depth);
    assert_eq!(1, dataset.vr_tracking_list_len().unwrap());
    let edits = dataset.vr_tracking_items_by_node(0, 1).unwrap();
    assert_eq!((1, 1), (edits[0].sub_row, edits[0].sub_col));
}

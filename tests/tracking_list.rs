//! The tracking list end to end.

use bag::{Dataset, Metadata, OpenMode, TrackingItem};
use tempfile::TempDir;

fn new_dataset(dir: &TempDir) -> Dataset {
    let metadata = Metadata::new(3, 4, (0., 0.), (1., 1.));
    Dataset::create(dir.path().join("track.bag"), metadata, 0, 0).unwrap()
}

#[test]
fn push_and_read_by_node() {
    let dir = TempDir::new().unwrap();
    let mut dataset = new_dataset(&dir);

    dataset
        .push_tracking_item(TrackingItem {
            row: 1,
            col: 2,
            depth: 3.0,
            uncertainty: 0.1,
            track_code: 7,
            list_series: 0,
        })
        .unwrap();
    dataset
        .push_tracking_item(TrackingItem {
            row: 1,
            col: 2,
            depth: 4.0,
            uncertainty: 0.2,
            track_code: 7,
            list_series: 1,
        })
        .unwrap();

    assert_eq!(2, dataset.tracking_list_len().unwrap());
    let items = dataset.tracking_items_by_node(1, 2).unwrap();
    assert_eq!(2, items.len());
    assert_eq!(3.0, items[0].depth);
    assert_eq!(4.0, items[1].depth);
}

#[test]
fn length_survives_a_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("track.bag");
    {
        let metadata = Metadata::new(3, 4, (0., 0.), (1., 1.));
        let mut dataset = Dataset::create(&path, metadata, 0, 0).unwrap();
        for series in 0..3 {
            dataset
                .push_tracking_item(TrackingItem {
                    row: 0,
                    col: 0,
                    depth: 1.0,
                    uncertainty: 0.0,
                    track_code: 1,
                    list_series: series,
                })
                .unwrap();
        }
        dataset.close().unwrap();
    }

    let dataset = Dataset::open(&path, OpenMode::ReadOnly).unwrap();
    assert_eq!(3, dataset.tracking_list_len().unwrap());
    assert_eq!(2, dataset.tracking_list_get(2).unwrap().list_series);
}

#[test]
fn filtered_reads_and_sorts() {
    let dir = TempDir::new().unwrap();
    let mut dataset = new_dataset(&dir);

    for (row, col, code, series) in [(2, 2, 9, 0), (0, 0, 3, 1), (2, 2, 3, 2)] {
        dataset
            .push_tracking_item(TrackingItem {
                row,
                col,
                depth: 0.0,
                uncertainty: 0.0,
                track_code: code,
                list_series: series,
            })
            .unwrap();
    }

    assert_eq!(2, dataset.tracking_items_by_code(3).unwrap().len());
    assert_eq!(1, dataset.tracking_items_by_series(1).unwrap().len());

    dataset.sort_tracking_list_by_node().unwrap();
    assert_eq!(1, dataset.tracking_list_get(0).unwrap().list_series);
    // Equal nodes keep their insertion order.
    assert_eq!(0, dataset.tracking_list_get(1).unwrap().list_series);
    assert_eq!(2, dataset.tracking_list_get(2).unwrap().list_series);

    dataset.sort_tracking_list_by_code().unwrap();
    assert_eq!(9, dataset.tracking_list_get(2).unwrap().track_code);
}

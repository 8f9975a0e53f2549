//! The variable resolution subsystem.
//!
//! A variable resolution BAG refines coarse cells with denser sub-grids.
//! Each coarse cell of the [metadata layer](VRMetadata) either carries the
//! sentinel index (no refinement) or names a window of `dimensions_x *
//! dimensions_y` refined nodes starting at its `index` in the 1-D
//! [refinement array](VRRefinements). The [node layer](VRNode) parallels the
//! refinement array with per-node hypothesis statistics, and the
//! [VR tracking list](VRTrackingList) records edits of refined nodes.
//!
//! Refinement windows of distinct coarse cells never overlap, and their
//! union must fit within the refinement array; both are verified when the
//! metadata layer flushes.

pub use self::metadata::{VRMetadata, VRMetadataItem};
pub use self::node::{VRNode, VRNodeItem};
pub use self::refinements::{VRRefinementItem, VRRefinements};
pub use self::tracking_list::{VRTrackingItem, VRTrackingList};

mod metadata;
mod node;
mod refinements;
mod tracking_list;

use crate::{Error, NULL_VARRES_INDEX, Result};

/// Resolves a refined node to its index in the refinement array.
///
/// Given the metadata item of coarse cell `(row, col)` and a sub-cell
/// `(sub_row, sub_col)` inside its window, the refined node lives at
/// `index + sub_row * dimensions_x + sub_col`.
///
/// # Examples
///
/// ```
/// # use bag::vr::{refinement_index, VRMetadataItem};
/// let meta = VRMetadataItem {
///     index: 6,
///     dimensions_x: 2,
///     dimensions_y: 2,
///     ..VRMetadataItem::no_refinement()
/// };
/// assert_eq!(9, refinement_index(&meta, 0, 1, 1, 1).unwrap());
/// ```
pub fn refinement_index(
    meta: &VRMetadataItem,
    row: u32,
    col: u32,
    sub_row: u32,
    sub_col: u32,
) -> Result<u64> {
    if meta.index == NULL_VARRES_INDEX {
        return Err(Error::NoRefinement { row, col });
    }
    if sub_row >= meta.dimensions_y || sub_col >= meta.dimensions_x {
        return Err(Error::BoundsExceeded(format!(
            "sub-cell ({sub_row}, {sub_col}) outside a {} x {} window",
            meta.dimensions_y, meta.dimensions_x
        )));
    }
    Ok(u64::from(meta.index)
        + u64::from(sub_row) * u64::from(meta.dimensions_x)
        + u64::from(sub_col))
}

/// Verifies that refinement windows are pairwise disjoint and lie within
/// the refinement array.
///
/// `windows` holds `(index, dimensions_x * dimensions_y)` pairs of every
/// non-sentinel metadata cell.
pub(crate) fn check_window_overlap(
    mut windows: Vec<(u64, u64)>,
    refinement_len: u64,
) -> Result<()> {
    windows.sort_unstable();
    let mut previous_end = 0;
    for (start, len) in windows {
        if start < previous_end {
            return Err(Error::InvalidVRRefinementDimensions(format!(
                "refinement window at {start} overlaps the previous window"
            )));
        }
        previous_end = start
            .checked_add(len)
            .ok_or_else(|| {
                Error::InvalidVRRefinementDimensions("refinement window wraps".to_string())
            })?;
        if previous_end > refinement_len {
            return Err(Error::InvalidVRRefinementDimensions(format!(
                "refinement window [{start}, {previous_end}) outside array of {refinement_len}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locator_rejects_sentinels_and_bad_subcells() {
        let meta = VRMetadataItem::no_refinement();
        assert!(matches!(
            refinement_index(&meta, 3, 4, 0, 0),
            Err(Error::NoRefinement { row: 3, col: 4 })
        ));

        let meta = VRMetadataItem {
            index: 0,
            dimensions_x: 2,
            dimensions_y: 2,
            ..VRMetadataItem::no_refinement()
        };
        assert!(refinement_index(&meta, 0, 0, 2, 0).is_err());
        assert_eq!(3, refinement_index(&meta, 0, 0, 1, 1).unwrap());
    }

    #[test]
    fn overlap_detection() {
        assert!(check_window_overlap(vec![(0, 4), (4, 4)], 8).is_ok());
        assert!(check_window_overlap(vec![(4, 4), (0, 5)], 9).is_err());
        assert!(check_window_overlap(vec![(0, 4), (4, 5)], 8).is_err());
        assert!(check_window_overlap(Vec::new(), 0).is_ok());
    }
}

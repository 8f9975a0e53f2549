//! The variable resolution tracking list.

use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use log::warn;
use std::io::{Read, Write};

use crate::container::{
    AttrType, AttributeValue, CompoundLayout, Container, DatasetHandle, DatasetSpec, ElementType,
    Extent, FieldDef, FieldKind,
};
use crate::Result;

const VR_TRACKING_LIST_PATH: &str = "/BAG_root/varres_tracking_list";
const VR_TRACKING_LIST_LENGTH: &str = "VR Tracking List Length";
const VR_TRACKING_LIST_BLOCK_SIZE: u64 = 10;

/// One recorded edit of a refined node.
///
/// `sub_row` and `sub_col` locate the edited node inside the refinement
/// window of coarse cell `(row, col)`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct VRTrackingItem {
    /// The coarse row of the edited node.
    pub row: u32,
    /// The coarse column of the edited node.
    pub col: u32,
    /// The row inside the refinement window.
    pub sub_row: u32,
    /// The column inside the refinement window.
    pub sub_col: u32,
    /// The depth before the edit.
    pub depth: f32,
    /// The uncertainty before the edit.
    pub uncertainty: f32,
    /// The reason code for the edit.
    pub track_code: u8,
    /// The opaque batch tag.
    pub list_series: u16,
}

impl VRTrackingItem {
    /// The packed size of one item in bytes.
    pub const SIZE: usize = 27;

    /// Writes the packed item.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<NativeEndian>(self.row)?;
        writer.write_u32::<NativeEndian>(self.col)?;
        writer.write_u32::<NativeEndian>(self.sub_row)?;
        writer.write_u32::<NativeEndian>(self.sub_col)?;
        writer.write_f32::<NativeEndian>(self.depth)?;
        writer.write_f32::<NativeEndian>(self.uncertainty)?;
        writer.write_u8(self.track_code)?;
        writer.write_u16::<NativeEndian>(self.list_series)?;
        Ok(())
    }

    /// Reads a packed item.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<VRTrackingItem> {
        Ok(VRTrackingItem {
            row: reader.read_u32::<NativeEndian>()?,
            col: reader.read_u32::<NativeEndian>()?,
            sub_row: reader.read_u32::<NativeEndian>()?,
            sub_col: reader.read_u32::<NativeEndian>()?,
            depth: reader.read_f32::<NativeEndian>()?,
            uncertainty: reader.read_f32::<NativeEndian>()?,
            track_code: reader.read_u8()?,
            list_series: reader.read_u16::<NativeEndian>()?,
        })
    }
}

fn record_layout() -> CompoundLayout {
    CompoundLayout::new(vec![
        FieldDef::new("row", FieldKind::U32),
        FieldDef::new("col", FieldKind::U32),
        FieldDef::new("sub_row", FieldKind::U32),
        FieldDef::new("sub_col", FieldKind::U32),
        FieldDef::new("depth", FieldKind::F32),
        FieldDef::new("uncertainty", FieldKind::F32),
        FieldDef::new("track_code", FieldKind::U8),
        FieldDef::new("list_series", FieldKind::U16),
    ])
}

/// The tracking list of refined node edits.
///
/// Same append-only contract as the coarse tracking list; the dataset
/// extent is the truth and the length attribute is repaired on open.
#[derive(Debug)]
pub struct VRTrackingList {
    handle: DatasetHandle,
}

impl VRTrackingList {
    /// Creates the VR tracking list dataset with a zero length attribute.
    pub(crate) fn create(container: &mut Container) -> Result<VRTrackingList> {
        let spec = DatasetSpec::new(
            ElementType::Compound(record_layout()),
            vec![0],
            vec![Extent::Unlimited],
        )
        .chunked(vec![VR_TRACKING_LIST_BLOCK_SIZE], 0);
        let handle = container.create_dataset(VR_TRACKING_LIST_PATH, spec)?;
        container.create_attr(VR_TRACKING_LIST_PATH, VR_TRACKING_LIST_LENGTH, AttrType::U32)?;
        Ok(VRTrackingList { handle })
    }

    /// Opens the VR tracking list, repairing a stale length attribute.
    pub(crate) fn open(container: &mut Container) -> Result<VRTrackingList> {
        let handle = container.open_dataset(VR_TRACKING_LIST_PATH)?;
        let extent = container.dataset_dims(handle)?[0] as u32;
        let recorded = container
            .read_attr(VR_TRACKING_LIST_PATH, VR_TRACKING_LIST_LENGTH)
            .and_then(|value| value.as_u32())
            .unwrap_or(extent);
        if recorded != extent {
            warn!(
                "VR tracking list length attribute says {recorded}, dataset holds {extent}; \
                 repairing"
            );
            if container.mode() == crate::OpenMode::ReadWrite {
                container.write_attr(
                    VR_TRACKING_LIST_PATH,
                    VR_TRACKING_LIST_LENGTH,
                    AttributeValue::U32(extent),
                )?;
            }
        }
        Ok(VRTrackingList { handle })
    }

    /// Returns the number of items.
    pub fn len(&self, container: &Container) -> Result<u32> {
        Ok(container.dataset_dims(self.handle)?[0] as u32)
    }

    /// Returns true when the list holds no items.
    pub fn is_empty(&self, container: &Container) -> Result<bool> {
        Ok(self.len(container)? == 0)
    }

    /// Returns the item at `index`.
    pub fn get(&self, container: &Container, index: u32) -> Result<VRTrackingItem> {
        let bytes = container.read_hyperslab(self.handle, &[u64::from(index)], &[1])?;
        VRTrackingItem::read_from(&mut bytes.as_slice())
    }

    /// Appends an item, growing the dataset and the length attribute
    /// together.
    pub fn push(&mut self, container: &mut Container, item: VRTrackingItem) -> Result<()> {
        let length = u64::from(self.len(container)?);
        container.extend(self.handle, &[length + 1])?;
        let mut bytes = Vec::with_capacity(VRTrackingItem::SIZE);
        item.write_to(&mut bytes)?;
        container.write_hyperslab(self.handle, &[length], &[1], &bytes)?;
        container.write_attr(
            VR_TRACKING_LIST_PATH,
            VR_TRACKING_LIST_LENGTH,
            AttributeValue::U32(length as u32 + 1),
        )?;
        Ok(())
    }

    /// Reads every item, in stored order.
    pub fn items(&self, container: &Container) -> Result<Vec<VRTrackingItem>> {
        let length = u64::from(self.len(container)?);
        if length == 0 {
            return Ok(Vec::new());
        }
        let bytes = container.read_hyperslab(self.handle, &[0], &[length])?;
        let mut reader = bytes.as_slice();
        (0..length)
            .map(|_| VRTrackingItem::read_from(&mut reader))
            .collect()
    }

    /// Returns the items recorded against one refined node, in stored
    /// order.
    pub fn read_by_node(
        &self,
        container: &Container,
        row: u32,
        col: u32,
    ) -> Result<Vec<VRTrackingItem>> {
        let mut items = self.items(container)?;
        items.retain(|item| item.row == row && item.col == col);
        Ok(items)
    }

    /// Returns the items of one list series, in stored order.
    pub fn read_by_series(
        &self,
        container: &Container,
        series: u16,
    ) -> Result<Vec<VRTrackingItem>> {
        let mut items = self.items(container)?;
        items.retain(|item| item.list_series == series);
        Ok(items)
    }

    /// Returns the items with one track code, in stored order.
    pub fn read_by_code(&self, container: &Container, code: u8) -> Result<Vec<VRTrackingItem>> {
        let mut items = self.items(container)?;
        items.retain(|item| item.track_code == code);
        Ok(items)
    }

    /// Rewrites the list ordered by `(row, col, sub_row, sub_col)`.
    pub fn sort_by_node(&mut self, container: &mut Container) -> Result<()> {
        self.sort_by(container, |item| {
            (item.row, item.col, item.sub_row, item.sub_col)
        })
    }

    /// Rewrites the list ordered by list series.
    pub fn sort_by_series(&mut self, container: &mut Container) -> Result<()> {
        self.sort_by(container, |item| (item.list_series, 0, 0, 0))
    }

    /// Rewrites the list ordered by track code.
    pub fn sort_by_code(&mut self, container: &mut Container) -> Result<()> {
        self.sort_by(container, |item| (u16::from(item.track_code), 0, 0, 0))
    }

    fn sort_by<K: Ord, F: Fn(&VRTrackingItem) -> K>(
        &mut self,
        container: &mut Container,
        key: F,
    ) -> Result<()> {
        let mut items = self.items(container)?;
        if items.len() < 2 {
            return Ok(());
        }
        items.sort_by_key(key);
        let mut bytes = Vec::with_capacity(items.len() * VRTrackingItem::SIZE);
        for item in &items {
            item.write_to(&mut bytes)?;
        }
        container.write_hyperslab(self.handle, &[0], &[items.len() as u64], &bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_size() {
        let mut bytes = Vec::new();
        VRTrackingItem::default().write_to(&mut bytes).unwrap();
        assert_eq!(VRTrackingItem::SIZE, bytes.len());
    }

    #[test]
    fn push_and_filter_by_node() {
        let mut container = Container::scratch();
        let mut list = VRTrackingList::create(&mut container).unwrap();
        list.push(
            &mut container,
            VRTrackingItem {
                row: 0,
                col: 1,
                sub_row: 1,
                sub_col: 1,
                depth: 13.,
                ..Default::default()
            },
        )
        .unwrap();
        list.push(
            &mut container,
            VRTrackingItem {
                row: 2,
                col: 2,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(2, list.len(&container).unwrap());
        let found = list.read_by_node(&container, 0, 1).unwrap();
        assert_eq!(1, found.len());
        assert_eq!(13., found[0].depth);
    }

    #[test]
    fn sort_by_node_orders_sub_cells() {
        let mut container = Container::scratch();
        let mut list = VRTrackingList::create(&mut container).unwrap();
        for (sub_row, sub_col) in [(1, 0), (0, 1), (0, 0)] {
            list.push(
                &mut container,
                VRTrackingItem {
                    row: 0,
                    col: 0,
                    sub_row,
                    sub_col,
                    ..Default::default()
                },
            )
            .unwrap();
        }
        list.sort_by_node(&mut container).unwrap();
        let items = list.items(&container).unwrap();
        assert_eq!((0, 0), (items[0].sub_row, items[0].sub_col));
        assert_eq!((0, 1), (items[1].sub_row, items[1].sub_col));
        assert_eq!((1, 0), (items[2].sub_row, items[2].sub_col));
    }
}

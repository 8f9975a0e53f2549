//! The tracking list: an append-only ledger of survey edits.

use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use log::warn;
use std::io::{Read, Write};

use crate::container::{
    AttrType, AttributeValue, CompoundLayout, Container, DatasetHandle, DatasetSpec, ElementType,
    Extent, FieldDef, FieldKind,
};
use crate::Result;

const TRACKING_LIST_PATH: &str = "/BAG_root/tracking_list";
const TRACKING_LIST_LENGTH: &str = "Tracking List Length";
const TRACKING_LIST_BLOCK_SIZE: u64 = 10;

/// One recorded edit of a surface node.
///
/// Items are immutable once written; `list_series` is an opaque tag naming
/// the batch the edit belongs to.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TrackingItem {
    /// The row of the edited node.
    pub row: u32,
    /// The column of the edited node.
    pub col: u32,
    /// The depth before the edit.
    pub depth: f32,
    /// The uncertainty before the edit.
    pub uncertainty: f32,
    /// The reason code for the edit.
    pub track_code: u8,
    /// The opaque batch tag.
    pub list_series: u16,
}

impl TrackingItem {
    /// The packed size of one item in bytes.
    pub const SIZE: usize = 19;

    /// Writes the packed item.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<NativeEndian>(self.row)?;
        writer.write_u32::<NativeEndian>(self.col)?;
        writer.write_f32::<NativeEndian>(self.depth)?;
        writer.write_f32::<NativeEndian>(self.uncertainty)?;
        writer.write_u8(self.track_code)?;
        writer.write_u16::<NativeEndian>(self.list_series)?;
        Ok(())
    }

    /// Reads a packed item.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<TrackingItem> {
        Ok(TrackingItem {
            row: reader.read_u32::<NativeEndian>()?,
            col: reader.read_u32::<NativeEndian>()?,
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
        FieldDef::new("depth", FieldKind::F32),
        FieldDef::new("uncertainty", FieldKind::F32),
        FieldDef::new("track_code", FieldKind::U8),
        FieldDef::new("list_series", FieldKind::U16),
    ])
}

/// The tracking list of a BAG dataset.
///
/// The list is append-only: [TrackingList::push] grows the dataset and the
/// `Tracking List Length` attribute together. The dataset extent is the
/// truth; an attribute that disagrees on open is repaired.
#[derive(Debug)]
pub struct TrackingList {
    handle: DatasetHandle,
}

impl TrackingList {
    /// Creates the tracking list dataset with a zero length attribute.
    pub(crate) fn create(container: &mut Container) -> Result<TrackingList> {
        let spec = DatasetSpec::new(
            ElementType::Compound(record_layout()),
            vec![0],
            vec![Extent::Unlimited],
        )
        .chunked(vec![TRACKING_LIST_BLOCK_SIZE], 0);
        let handle = container.create_dataset(TRACKING_LIST_PATH, spec)?;
        container.create_attr(TRACKING_LIST_PATH, TRACKING_LIST_LENGTH, AttrType::U32)?;
        Ok(TrackingList { handle })
    }

    /// Opens the tracking list, repairing a stale length attribute.
    pub(crate) fn open(container: &mut Container) -> Result<TrackingList> {
        let handle = container.open_dataset(TRACKING_LIST_PATH)?;
        let extent = container.dataset_dims(handle)?[0] as u32;
        let recorded = container
            .read_attr(TRACKING_LIST_PATH, TRACKING_LIST_LENGTH)
            .and_then(|value| value.as_u32())
            .unwrap_or(extent);
        if recorded != extent {
            warn!(
                "tracking list length attribute says {recorded}, dataset holds {extent}; \
                 repairing"
            );
            if container.mode() == crate::OpenMode::ReadWrite {
                container.write_attr(
                    TRACKING_LIST_PATH,
                    TRACKING_LIST_LENGTH,
                    AttributeValue::U32(extent),
                )?;
            }
        }
        Ok(TrackingList { handle })
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
    pub fn get(&self, container: &Container, index: u32) -> Result<TrackingItem> {
        let bytes = container.read_hyperslab(self.handle, &[u64::from(index)], &[1])?;
        TrackingItem::read_from(&mut bytes.as_slice())
    }

    /// Appends an item, growing the dataset and the length attribute
    /// together.
    pub fn push(&mut self, container: &mut Container, item: TrackingItem) -> Result<()> {
        let length = u64::from(self.len(container)?);
        container.extend(self.handle, &[length + 1])?;
        let mut bytes = Vec::with_capacity(TrackingItem::SIZE);
        item.write_to(&mut bytes)?;
        container.write_hyperslab(self.handle, &[length], &[1], &bytes)?;
        container.write_attr(
            TRACKING_LIST_PATH,
            TRACKING_LIST_LENGTH,
            AttributeValue::U32(length as u32 + 1),
        )?;
        Ok(())
    }

    /// Reads every item, in stored order.
    pub fn items(&self, container: &Container) -> Result<Vec<TrackingItem>> {
        let length = u64::from(self.len(container)?);
        if length == 0 {
            return Ok(Vec::new());
        }
        let bytes = container.read_hyperslab(self.handle, &[0], &[length])?;
        let mut reader = bytes.as_slice();
        (0..length)
            .map(|_| TrackingItem::read_from(&mut reader))
            .collect()
    }

    /// Returns the items recorded against one node, in stored order.
    pub fn read_by_node(
        &self,
        container: &Container,
        row: u32,
        col: u32,
    ) -> Result<Vec<TrackingItem>> {
        let mut items = self.items(container)?;
        items.retain(|item| item.row == row && item.col == col);
        Ok(items)
    }

    /// Returns the items of one list series, in stored order.
    pub fn read_by_series(&self, container: &Container, series: u16) -> Result<Vec<TrackingItem>> {
        let mut items = self.items(container)?;
        items.retain(|item| item.list_series == series);
        Ok(items)
    }

    /// Returns the items with one track code, in stored order.
    pub fn read_by_code(&self, container: &Container, code: u8) -> Result<Vec<TrackingItem>> {
        let mut items = self.items(container)?;
        items.retain(|item| item.track_code == code);
        Ok(items)
    }

    /// Rewrites the list ordered by `(row, col)`.
    pub fn sort_by_node(&mut self, container: &mut Container) -> Result<()> {
        self.sort_by(container, |item| (u64::from(item.row) << 32) | u64::from(item.col))
    }

    /// Rewrites the list ordered by list series.
    pub fn sort_by_series(&mut self, container: &mut Container) -> Result<()> {
        self.sort_by(container, |item| u64::from(item.list_series))
    }

    /// Rewrites the list ordered by track code.
    pub fn sort_by_code(&mut self, container: &mut Container) -> Result<()> {
        self.sort_by(container, |item| u64::from(item.track_code))
    }

    fn sort_by<K: Ord, F: Fn(&TrackingItem) -> K>(
        &mut self,
        container: &mut Container,
        key: F,
    ) -> Result<()> {
        let mut items = self.items(container)?;
        if items.len() < 2 {
            return Ok(());
        }
        // Stable, so equal keys keep insertion order.
        items.sort_by_key(key);
        let mut bytes = Vec::with_capacity(items.len() * TrackingItem::SIZE);
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

    fn item(row: u32, col: u32, code: u8, series: u16) -> TrackingItem {
        TrackingItem {
            row,
            col,
            depth: 1.0,
            uncertainty: 0.1,
            track_code: code,
            list_series: series,
        }
    }

    #[test]
    fn packed_size() {
        let mut bytes = Vec::new();
        TrackingItem::default().write_to(&mut bytes).unwrap();
        assert_eq!(TrackingItem::SIZE, bytes.len());
    }

    #[test]
    fn push_updates_extent_and_attribute() {
        let mut container = Container::scratch();
        let mut list = TrackingList::create(&mut container).unwrap();
        list.push(&mut container, item(1, 2, 7, 0)).unwrap();
        list.push(&mut container, item(1, 2, 7, 1)).unwrap();
        assert_eq!(2, list.len(&container).unwrap());
        assert_eq!(
            2,
            container
                .read_attr(TRACKING_LIST_PATH, TRACKING_LIST_LENGTH)
                .unwrap()
                .as_u32()
                .unwrap()
        );
    }

    #[test]
    fn filtered_reads_keep_insertion_order() {
        let mut container = Container::scratch();
        let mut list = TrackingList::create(&mut container).unwrap();
        list.push(&mut container, item(1, 2, 7, 0)).unwrap();
        list.push(&mut container, item(3, 4, 8, 0)).unwrap();
        list.push(&mut container, item(1, 2, 7, 1)).unwrap();
        let found = list.read_by_node(&container, 1, 2).unwrap();
        assert_eq!(2, found.len());
        assert_eq!(0, found[0].list_series);
        assert_eq!(1, found[1].list_series);
    }

    #[test]
    fn sort_by_node_is_stable() {
        let mut container = Container::scratch();
        let mut list = TrackingList::create(&mut container).unwrap();
        list.push(&mut container, item(5, 5, 1, 0)).unwrap();
        list.push(&mut container, item(1, 1, 2, 0)).unwrap();
        list.push(&mut container, item(5, 5, 3, 0)).unwrap();
        list.sort_by_node(&mut container).unwrap();
        let items = list.items(&container).unwrap();
        assert_eq!(2, items[0].track_code);
        assert_eq!(1, items[1].track_code);
        assert_eq!(3, items[2].track_code);
    }

    #[test]
    fn stale_length_attribute_is_repaired_on_open() {
        let mut container = Container::scratch();
        let mut list = TrackingList::create(&mut container).unwrap();
        list.push(&mut container, item(0, 0, 0, 0)).unwrap();
        // Simulate a crash between extension and the attribute write.
        container
            .write_attr(
                TRACKING_LIST_PATH,
                TRACKING_LIST_LENGTH,
                AttributeValue::U32(9),
            )
            .unwrap();
        let list = TrackingList::open(&mut container).unwrap();
        assert_eq!(1, list.len(&container).unwrap());
        assert_eq!(
            1,
            container
                .read_attr(TRACKING_LIST_PATH, TRACKING_LIST_LENGTH)
                .unwrap()
                .as_u32()
                .unwrap()
        );
    }
}

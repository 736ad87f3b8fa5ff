//! The slotted heap page: a header bitmap of occupied slots followed by
//! fixed-width tuple bodies. Pages also carry the bookkeeping the buffer
//! pool and log need: a dirty flag annotated with the dirtying transaction
//! and a before-image snapshot for undo.

use crate::error::{DbError, DbResult};
use crate::transaction::TransactionId;
use crate::tuple::{Tuple, TupleDesc};
use crate::{PageId, RecordId};
use std::sync::Arc;

/// A fixed-size page of tuples. The on-disk image is exactly `page_size`
/// bytes: `ceil(num_slots / 8)` header bytes, then `num_slots` tuple bodies
/// of `tuple_size` bytes each, then zero padding. Within a header byte,
/// slot 0 is bit 7 (the most significant bit).
#[derive(Debug, Clone)]
pub struct HeapPage {
    pid: PageId,
    desc: Arc<TupleDesc>,
    page_size: usize,
    num_slots: usize,
    header: Vec<u8>,
    slots: Vec<Option<Tuple>>,
    before_image: Vec<u8>,
    dirty: Option<TransactionId>,
}

impl HeapPage {
    /// Parse a page from its on-disk image. An all-zero image yields an
    /// empty page. The raw bytes are retained as the before-image.
    pub fn new(pid: PageId, data: &[u8], desc: Arc<TupleDesc>) -> DbResult<Self> {
        let page_size = data.len();
        let num_slots = Self::slot_count(page_size, desc.tuple_size());
        if num_slots == 0 {
            return Err(DbError::InvalidState(format!(
                "page size {} cannot hold a single tuple of {} bytes",
                page_size,
                desc.tuple_size()
            )));
        }
        let header_len = Self::header_len(num_slots);
        let header = data[0..header_len].to_vec();

        let tuple_size = desc.tuple_size();
        let mut slots = Vec::with_capacity(num_slots);
        for slot in 0..num_slots {
            if header[slot / 8] & Self::slot_mask(slot) != 0 {
                let start = header_len + slot * tuple_size;
                let mut tuple = Tuple::parse(&desc, &data[start..start + tuple_size])?;
                tuple.set_record_id(Some(RecordId::new(pid, slot)));
                slots.push(Some(tuple));
            } else {
                slots.push(None);
            }
        }

        Ok(Self {
            pid,
            desc,
            page_size,
            num_slots,
            header,
            slots,
            before_image: data.to_vec(),
            dirty: None,
        })
    }

    /// An empty page image of `page_size` bytes.
    pub fn empty_page_data(page_size: usize) -> Vec<u8> {
        vec![0; page_size]
    }

    /// `floor(page_size * 8 / (tuple_size * 8 + 1))`: each slot costs its
    /// tuple bytes plus one header bit.
    pub fn slot_count(page_size: usize, tuple_size: usize) -> usize {
        (page_size * 8) / (tuple_size * 8 + 1)
    }

    fn header_len(num_slots: usize) -> usize {
        num_slots.div_ceil(8)
    }

    fn slot_mask(slot: usize) -> u8 {
        0x80 >> (slot % 8)
    }

    pub fn pid(&self) -> PageId {
        self.pid
    }

    pub fn desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn num_slots(&self) -> usize {
        self.num_slots
    }

    pub fn num_empty_slots(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_none()).count()
    }

    pub fn is_slot_occupied(&self, slot: usize) -> bool {
        slot < self.num_slots && self.header[slot / 8] & Self::slot_mask(slot) != 0
    }

    /// The tuple in `slot`, or `None` if the slot is free or out of range.
    pub fn tuple(&self, slot: usize) -> Option<&Tuple> {
        self.slots.get(slot).and_then(|slot| slot.as_ref())
    }

    /// Occupied tuples in ascending slot order. Not restartable across a
    /// page mutation; callers re-request the iterator instead.
    pub fn iter(&self) -> impl Iterator<Item = &Tuple> {
        self.slots.iter().filter_map(|slot| slot.as_ref())
    }

    /// Store `tuple` in the lowest-index empty slot, set the header bit and
    /// point the tuple's record id at this page.
    pub fn insert_tuple(&mut self, tuple: &mut Tuple) -> DbResult<()> {
        if **tuple.desc() != *self.desc {
            return Err(DbError::SchemaMismatch(format!(
                "tuple schema ({}) does not match page schema ({})",
                tuple.desc(),
                self.desc
            )));
        }
        let slot = self
            .slots
            .iter()
            .position(|slot| slot.is_none())
            .ok_or(DbError::NotEnoughSpace)?;

        tuple.set_record_id(Some(RecordId::new(self.pid, slot)));
        self.header[slot / 8] |= Self::slot_mask(slot);
        self.slots[slot] = Some(tuple.clone());
        Ok(())
    }

    /// Remove `tuple` from the slot its record id names. The record id must
    /// reference this page and an occupied slot whose stored contents match.
    pub fn delete_tuple(&mut self, tuple: &mut Tuple) -> DbResult<()> {
        let rid = tuple.record_id().ok_or(DbError::TupleNotOnPage)?;
        if rid.pid != self.pid || rid.slot >= self.num_slots {
            return Err(DbError::TupleNotOnPage);
        }
        match &self.slots[rid.slot] {
            Some(stored) if *stored == *tuple => {}
            _ => return Err(DbError::TupleNotOnPage),
        }
        self.header[rid.slot / 8] &= !Self::slot_mask(rid.slot);
        self.slots[rid.slot] = None;
        tuple.set_record_id(None);
        Ok(())
    }

    pub fn mark_dirty(&mut self, dirty: bool, tid: TransactionId) {
        self.dirty = dirty.then_some(tid);
    }

    /// The transaction that last dirtied this page, if it is dirty.
    pub fn is_dirty(&self) -> Option<TransactionId> {
        self.dirty
    }

    /// The page as of the last `set_before_image` (or load), reconstructed
    /// from the retained bytes.
    pub fn before_image(&self) -> DbResult<HeapPage> {
        HeapPage::new(self.pid, &self.before_image, self.desc.clone())
    }

    /// Snapshot the current bytes as the new undo baseline. Called when the
    /// owning transaction commits.
    pub fn set_before_image(&mut self) {
        self.before_image = self.serialize();
    }

    /// The exact `page_size`-byte on-disk image.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.page_size);
        out.extend_from_slice(&self.header);
        let tuple_size = self.desc.tuple_size();
        for slot in &self.slots {
            match slot {
                Some(tuple) => tuple.serialize_into(&mut out),
                None => out.resize(out.len() + tuple_size, 0),
            }
        }
        out.resize(self.page_size, 0);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::{Field, Type};

    fn int_desc() -> Arc<TupleDesc> {
        Arc::new(TupleDesc::unnamed(vec![Type::Int]))
    }

    fn int_tuple(desc: &Arc<TupleDesc>, v: i32) -> Tuple {
        Tuple::new(desc.clone(), vec![Field::Int(v)]).unwrap()
    }

    fn tid() -> TransactionId {
        TransactionId::new()
    }

    #[test]
    fn zeroed_image_is_an_empty_page() {
        let desc = int_desc();
        let page = HeapPage::new(
            PageId::new(1, 0),
            &HeapPage::empty_page_data(64),
            desc,
        )
        .unwrap();
        assert_eq!(page.num_empty_slots(), page.num_slots());
        assert_eq!(page.iter().count(), 0);
    }

    #[test]
    fn slot_count_accounts_for_header_bits() {
        // 64 bytes, 4-byte tuples: 512 bits / 33 bits per slot = 15 slots.
        assert_eq!(HeapPage::slot_count(64, 4), 15);
        assert_eq!(HeapPage::slot_count(4096, 8), 504);
    }

    #[test]
    fn insert_uses_lowest_slot_and_sets_header_bit() {
        let desc = int_desc();
        let pid = PageId::new(1, 0);
        let mut page = HeapPage::new(pid, &HeapPage::empty_page_data(64), desc.clone()).unwrap();

        let mut t = int_tuple(&desc, 42);
        page.insert_tuple(&mut t).unwrap();
        assert_eq!(t.record_id(), Some(RecordId::new(pid, 0)));
        // Slot 0 lives in bit 7 of header byte 0.
        assert_eq!(page.serialize()[0] & 0x80, 0x80);

        let mut t2 = int_tuple(&desc, 43);
        page.insert_tuple(&mut t2).unwrap();
        assert_eq!(t2.record_id(), Some(RecordId::new(pid, 1)));
    }

    #[test]
    fn serialize_round_trips_bit_exactly() {
        let desc = Arc::new(TupleDesc::unnamed(vec![Type::Int, Type::String(6)]));
        let pid = PageId::new(7, 3);
        let mut page =
            HeapPage::new(pid, &HeapPage::empty_page_data(128), desc.clone()).unwrap();
        for i in 0..3 {
            let mut t = Tuple::new(
                desc.clone(),
                vec![Field::Int(i), Field::string(format!("t{i}"), 6)],
            )
            .unwrap();
            page.insert_tuple(&mut t).unwrap();
        }

        let image = page.serialize();
        assert_eq!(image.len(), 128);
        let reparsed = HeapPage::new(pid, &image, desc).unwrap();
        assert_eq!(reparsed.serialize(), image);
        assert_eq!(reparsed.num_empty_slots(), page.num_empty_slots());
        for slot in 0..page.num_slots() {
            assert_eq!(reparsed.tuple(slot), page.tuple(slot));
        }
    }

    #[test]
    fn slot_conservation_under_inserts_and_deletes() {
        let desc = int_desc();
        let mut page =
            HeapPage::new(PageId::new(1, 0), &HeapPage::empty_page_data(64), desc.clone())
                .unwrap();
        let total = page.num_slots();

        let mut tuples = Vec::new();
        for i in 0..5 {
            let mut t = int_tuple(&desc, i);
            page.insert_tuple(&mut t).unwrap();
            tuples.push(t);
        }
        page.delete_tuple(&mut tuples[2]).unwrap();
        page.delete_tuple(&mut tuples[4]).unwrap();

        let occupied = (0..total).filter(|&s| page.is_slot_occupied(s)).count();
        assert_eq!(page.num_empty_slots() + occupied, total);
        assert_eq!(occupied, 3);

        // Freed slot 2 is the lowest again.
        let mut t = int_tuple(&desc, 9);
        page.insert_tuple(&mut t).unwrap();
        assert_eq!(t.record_id().unwrap().slot, 2);
    }

    #[test]
    fn full_page_rejects_insert() {
        let desc = int_desc();
        // 4 bytes: 32 bits / 33 -> 0 slots is invalid; 5 bytes -> 1 slot.
        let mut page =
            HeapPage::new(PageId::new(1, 0), &HeapPage::empty_page_data(5), desc.clone()).unwrap();
        assert_eq!(page.num_slots(), 1);
        let mut t = int_tuple(&desc, 1);
        page.insert_tuple(&mut t).unwrap();
        let mut t2 = int_tuple(&desc, 2);
        assert!(matches!(
            page.insert_tuple(&mut t2),
            Err(DbError::NotEnoughSpace)
        ));
    }

    #[test]
    fn delete_requires_matching_page_and_contents() {
        let desc = int_desc();
        let mut page =
            HeapPage::new(PageId::new(1, 0), &HeapPage::empty_page_data(64), desc.clone())
                .unwrap();
        let mut other_page =
            HeapPage::new(PageId::new(1, 1), &HeapPage::empty_page_data(64), desc.clone())
                .unwrap();

        let mut t = int_tuple(&desc, 5);
        assert!(matches!(
            page.delete_tuple(&mut t),
            Err(DbError::TupleNotOnPage)
        ));

        page.insert_tuple(&mut t).unwrap();
        assert!(matches!(
            other_page.delete_tuple(&mut t),
            Err(DbError::TupleNotOnPage)
        ));
        page.delete_tuple(&mut t).unwrap();
        assert_eq!(t.record_id(), None);
    }

    #[test]
    fn before_image_tracks_commit_points() {
        let desc = int_desc();
        let mut page =
            HeapPage::new(PageId::new(1, 0), &HeapPage::empty_page_data(64), desc.clone())
                .unwrap();

        let mut t = int_tuple(&desc, 11);
        page.insert_tuple(&mut t).unwrap();
        // Still the load-time snapshot.
        assert_eq!(page.before_image().unwrap().iter().count(), 0);

        page.set_before_image();
        assert_eq!(page.before_image().unwrap().iter().count(), 1);
    }

    #[test]
    fn dirty_flag_carries_the_dirtier() {
        let desc = int_desc();
        let mut page =
            HeapPage::new(PageId::new(1, 0), &HeapPage::empty_page_data(64), desc).unwrap();
        assert_eq!(page.is_dirty(), None);
        let t = tid();
        page.mark_dirty(true, t);
        assert_eq!(page.is_dirty(), Some(t));
        page.mark_dirty(false, t);
        assert_eq!(page.is_dirty(), None);
    }
}

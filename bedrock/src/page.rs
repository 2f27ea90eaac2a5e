//! The layout of a heap page on disk.
//!
//! ```text
//! | header bitmap: ceil(num_slots / 8) bytes | slot 0 | slot 1 | ... | zero padding |
//! ```
//!
//! Bit `i` of the header (LSB-first within each byte) is set iff slot `i`
//! holds a tuple. Every slot is exactly `TupleDesc::size()` bytes, so
//! `num_slots = floor(PAGE_SIZE * 8 / (tuple_size * 8 + 1))`.

use std::fmt;
use std::sync::Arc;

use bytes::{Buf, BufMut};

use crate::error::{DbError, DbResult};
use crate::transaction::TransactionId;
use crate::tuple::{Tuple, TupleDesc};
use crate::{PageId, RecordId, PAGE_SIZE};

pub struct HeapPage {
    pid: PageId,
    desc: Arc<TupleDesc>,
    header: Vec<u8>,
    tuples: Vec<Option<Tuple>>,
    dirty: Option<TransactionId>,
    /// Bytes as of load or the last commit.
    before_image: Vec<u8>,
}

impl HeapPage {
    /// Number of tuple slots a page holds for this schema.
    pub fn slots_per_page(desc: &TupleDesc) -> usize {
        (PAGE_SIZE * 8) / (desc.size() * 8 + 1)
    }

    fn header_size(num_slots: usize) -> usize {
        num_slots.div_ceil(8)
    }

    /// Bytes of a page with every slot empty.
    pub fn empty_page_data() -> Vec<u8> {
        vec![0; PAGE_SIZE]
    }

    pub fn new(pid: PageId, desc: Arc<TupleDesc>, data: &[u8]) -> DbResult<Self> {
        if data.len() != PAGE_SIZE {
            return Err(DbError::Db(format!(
                "page {} image is {} bytes, expected {}",
                pid,
                data.len(),
                PAGE_SIZE
            )));
        }
        let num_slots = Self::slots_per_page(&desc);
        let tuple_size = desc.size();
        let header_size = Self::header_size(num_slots);
        let header = data[..header_size].to_vec();

        let mut body = &data[header_size..];
        let mut tuples = Vec::with_capacity(num_slots);
        for slot in 0..num_slots {
            if header[slot / 8] & (1 << (slot % 8)) != 0 {
                let mut tuple = Tuple::parse(desc.clone(), &mut body)?;
                tuple.set_record_id(Some(RecordId::new(pid, slot as u16)));
                tuples.push(Some(tuple));
            } else {
                body.advance(tuple_size);
                tuples.push(None);
            }
        }

        Ok(Self {
            pid,
            desc,
            header,
            tuples,
            dirty: None,
            before_image: data.to_vec(),
        })
    }

    pub fn id(&self) -> PageId {
        self.pid
    }

    pub fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    /// Exactly `PAGE_SIZE` bytes that `HeapPage::new` reads back.
    pub fn serialize(&self) -> Vec<u8> {
        let tuple_size = self.desc.size();
        let mut buf = Vec::with_capacity(PAGE_SIZE);
        buf.put_slice(&self.header);
        for slot in &self.tuples {
            match slot {
                Some(tuple) => tuple.serialize(&mut buf),
                None => buf.put_bytes(0, tuple_size),
            }
        }
        buf.put_bytes(0, PAGE_SIZE - buf.len());
        buf
    }

    pub fn num_slots(&self) -> usize {
        self.tuples.len()
    }

    pub fn num_empty_slots(&self) -> usize {
        (0..self.num_slots()).filter(|&i| !self.is_slot_used(i)).count()
    }

    pub fn is_slot_used(&self, slot: usize) -> bool {
        slot < self.num_slots() && self.header[slot / 8] & (1 << (slot % 8)) != 0
    }

    fn mark_slot_used(&mut self, slot: usize, used: bool) {
        if used {
            self.header[slot / 8] |= 1 << (slot % 8);
        } else {
            self.header[slot / 8] &= !(1 << (slot % 8));
        }
    }

    /// Stores `tuple` in the lowest free slot and stamps its record id.
    pub fn insert_tuple(&mut self, tuple: &mut Tuple) -> DbResult<RecordId> {
        if **tuple.tuple_desc() != *self.desc {
            return Err(DbError::SchemaMismatch(format!(
                "tuple ({}) does not match page schema ({})",
                tuple.tuple_desc(),
                self.desc
            )));
        }
        let slot = (0..self.num_slots())
            .find(|&i| !self.is_slot_used(i))
            .ok_or(DbError::NoSpace(self.pid))?;

        let rid = RecordId::new(self.pid, slot as u16);
        self.mark_slot_used(slot, true);
        tuple.set_record_id(Some(rid));
        self.tuples[slot] = Some(tuple.clone());
        Ok(rid)
    }

    pub fn delete_tuple(&mut self, tuple: &Tuple) -> DbResult<()> {
        let rid = tuple
            .record_id()
            .ok_or_else(|| DbError::NotPresent("tuple has no record id".to_string()))?;
        if rid.page_id != self.pid {
            return Err(DbError::NotPresent(format!(
                "record {} is not on page {}",
                rid, self.pid
            )));
        }
        let slot = rid.slot as usize;
        if !self.is_slot_used(slot) {
            return Err(DbError::NotPresent(format!("slot {} is empty", rid)));
        }
        self.mark_slot_used(slot, false);
        self.tuples[slot] = None;
        Ok(())
    }

    pub fn tuple_at(&self, slot: usize) -> Option<&Tuple> {
        self.tuples.get(slot).and_then(|t| t.as_ref())
    }

    /// First occupied slot at or after `from`.
    pub fn next_used_slot(&self, from: usize) -> Option<usize> {
        (from..self.num_slots()).find(|&i| self.is_slot_used(i))
    }

    /// Occupied slots in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = &Tuple> + '_ {
        self.tuples.iter().flatten()
    }

    pub fn mark_dirty(&mut self, dirty: bool, tid: TransactionId) {
        self.dirty = dirty.then_some(tid);
    }

    /// The transaction that dirtied this page, if any.
    pub fn is_dirty(&self) -> Option<TransactionId> {
        self.dirty
    }

    pub fn before_image(&self) -> DbResult<HeapPage> {
        HeapPage::new(self.pid, self.desc.clone(), &self.before_image)
    }

    pub fn set_before_image(&mut self) {
        self.before_image = self.serialize();
    }
}

impl PartialEq for HeapPage {
    fn eq(&self, other: &Self) -> bool {
        self.pid == other.pid && self.header == other.header && self.tuples == other.tuples
    }
}

impl fmt::Debug for HeapPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapPage")
            .field("pid", &self.pid)
            .field("slots", &self.num_slots())
            .field("used", &(self.num_slots() - self.num_empty_slots()))
            .field("dirty", &self.dirty)
            .finish()
    }
}

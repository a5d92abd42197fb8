use std::fmt;
use std::io::Cursor;

use crate::error::{DbError, Result};
use crate::transaction::TransactionId;
use crate::tuple::{RecordId, Tuple, TupleDesc};

/// Identifies a page: the table it belongs to plus its position in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageId {
    table_id: u32,
    page_no: usize,
}

impl PageId {
    pub fn new(table_id: u32, page_no: usize) -> Self {
        PageId { table_id, page_no }
    }

    pub fn table_id(&self) -> u32 {
        self.table_id
    }

    pub fn page_no(&self) -> usize {
        self.page_no
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page {}:{}", self.table_id, self.page_no)
    }
}

/// A slotted page of fixed-width tuples.
///
/// On disk a page is a header bitmap of `ceil(N/8)` bytes (slot `i` lives at
/// byte `i/8`, bit `i%8`, LSB first), followed by `N` slots of `td.size()`
/// bytes each, followed by zero padding, where
/// `N = floor(page_size * 8 / (td.size() * 8 + 1))`.
///
/// `HeapPage::new(pid, p.serialize(), td)` reproduces `p` byte for byte.
#[derive(Debug)]
pub struct HeapPage {
    pid: PageId,
    td: TupleDesc,
    header: Vec<u8>,
    tuples: Vec<Option<Tuple>>,
    num_slots: usize,
    page_size: usize,
    dirty: Option<TransactionId>,
    before_image: Vec<u8>,
}

impl HeapPage {
    /// How many tuple slots fit on a page of `page_size` bytes: each slot
    /// costs `td.size()` bytes plus one header bit.
    pub fn num_tuples(td: &TupleDesc, page_size: usize) -> usize {
        (page_size * 8) / (td.size() * 8 + 1)
    }

    /// Header bytes needed to carry one bit per slot.
    pub fn header_size(num_slots: usize) -> usize {
        num_slots.div_ceil(8)
    }

    /// The byte image of a page with no occupied slots.
    pub fn empty_page_data(page_size: usize) -> Vec<u8> {
        vec![0; page_size]
    }

    /// Parses a page from its byte image. The page size is the image length.
    /// Occupied slots are parsed field by field in schema order; empty slots
    /// are skipped. The image becomes the page's initial before-image.
    pub fn new(pid: PageId, data: &[u8], td: TupleDesc) -> Result<Self> {
        let page_size = data.len();
        let num_slots = Self::num_tuples(&td, page_size);
        let header_len = Self::header_size(num_slots);
        if header_len + num_slots * td.size() > page_size {
            return Err(DbError::BadPageData(format!(
                "page of {} bytes cannot hold {} slots of {} bytes",
                page_size,
                num_slots,
                td.size()
            )));
        }

        let header = data[..header_len].to_vec();
        let mut cursor = Cursor::new(&data[header_len..]);
        let mut tuples = Vec::with_capacity(num_slots);
        for slot in 0..num_slots {
            if (header[slot / 8] & (1 << (slot % 8))) == 0 {
                cursor.set_position(cursor.position() + td.size() as u64);
                tuples.push(None);
                continue;
            }
            let mut tuple = Tuple::new(td.clone());
            for i in 0..td.num_fields() {
                let field = td.field_type(i)?.parse(&mut cursor)?;
                tuple.set_field(i, field)?;
            }
            tuple.set_record_id(Some(RecordId::new(pid, slot)));
            tuples.push(Some(tuple));
        }

        Ok(HeapPage {
            pid,
            td,
            header,
            tuples,
            num_slots,
            page_size,
            dirty: None,
            before_image: data.to_vec(),
        })
    }

    pub fn id(&self) -> PageId {
        self.pid
    }

    pub fn tuple_desc(&self) -> &TupleDesc {
        &self.td
    }

    pub fn num_slots(&self) -> usize {
        self.num_slots
    }

    pub fn is_slot_used(&self, slot: usize) -> bool {
        slot < self.num_slots && (self.header[slot / 8] & (1 << (slot % 8))) != 0
    }

    fn set_slot_used(&mut self, slot: usize, used: bool) {
        if used {
            self.header[slot / 8] |= 1 << (slot % 8);
        } else {
            self.header[slot / 8] &= !(1 << (slot % 8));
        }
    }

    /// Counts the cleared bits among the first `num_slots` header bits;
    /// trailing bits in the last header byte are ignored.
    pub fn num_empty_slots(&self) -> usize {
        (0..self.num_slots).filter(|&i| !self.is_slot_used(i)).count()
    }

    /// Emits the page's byte image: header, then each slot (occupied slots as
    /// their serialized fields, empty slots zero-filled), padded with zeros.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.page_size);
        out.extend_from_slice(&self.header);
        for slot in 0..self.num_slots {
            match &self.tuples[slot] {
                Some(tuple) if self.is_slot_used(slot) => {
                    for i in 0..self.td.num_fields() {
                        match tuple.field(i) {
                            Some(f) => f.write_to(&mut out),
                            // An unset field serializes as zeros, like an
                            // empty slot's bytes.
                            None => out.resize(
                                out.len()
                                    + self.td.field_type(i).map(|t| t.len()).unwrap_or(0),
                                0,
                            ),
                        }
                    }
                }
                _ => out.resize(out.len() + self.td.size(), 0),
            }
        }
        out.resize(self.page_size, 0);
        out
    }

    /// Stores `t` in the lowest-index empty slot, setting the header bit and
    /// stamping the tuple's record id.
    pub fn insert_tuple(&mut self, t: &mut Tuple) -> Result<()> {
        if t.desc() != &self.td {
            return Err(DbError::SchemaMismatch);
        }
        let slot = (0..self.num_slots)
            .find(|&i| !self.is_slot_used(i))
            .ok_or(DbError::PageFull)?;
        t.set_record_id(Some(RecordId::new(self.pid, slot)));
        self.set_slot_used(slot, true);
        self.tuples[slot] = Some(t.clone());
        Ok(())
    }

    /// Removes `t` from its slot and clears the tuple's record id. Fails when
    /// the tuple was never stored here, its slot is already empty, or the
    /// stored value differs.
    pub fn delete_tuple(&mut self, t: &mut Tuple) -> Result<()> {
        let rid = t.record_id().ok_or(DbError::TupleNotFound)?;
        if rid.page_id() != self.pid || rid.slot() >= self.num_slots {
            return Err(DbError::TupleNotFound);
        }
        if !self.is_slot_used(rid.slot()) {
            return Err(DbError::TupleNotFound);
        }
        match &self.tuples[rid.slot()] {
            Some(stored) if stored.fields_eq(t) => {}
            _ => return Err(DbError::TupleNotFound),
        }
        self.set_slot_used(rid.slot(), false);
        self.tuples[rid.slot()] = None;
        t.set_record_id(None);
        Ok(())
    }

    pub fn mark_dirty(&mut self, dirty: bool, tid: TransactionId) {
        self.dirty = dirty.then_some(tid);
    }

    /// The transaction that last dirtied this page, if it is dirty.
    pub fn dirty_tid(&self) -> Option<TransactionId> {
        self.dirty
    }

    /// Re-snapshots the current contents as the committed image.
    pub fn set_before_image(&mut self) {
        self.before_image = self.serialize();
    }

    /// The page as of the last committed image.
    pub fn before_image(&self) -> Result<HeapPage> {
        HeapPage::new(self.pid, &self.before_image, self.td.clone())
    }

    pub fn before_image_data(&self) -> &[u8] {
        &self.before_image
    }

    /// The tuples of occupied slots, in ascending slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Tuple> {
        self.tuples.iter().filter_map(|t| t.as_ref())
    }
}

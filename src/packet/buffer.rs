use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::slice;

use crate::error::{Error, Result};
use crate::packet::meta::PacketId;
use crate::packet::pool::PacketSlot;

/// Handle on a pooled, ref-counted, fragmentable byte buffer.
///
/// Cloning the handle takes a reference; dropping it releases one. When the
/// last reference goes, the buffer returns to its pool together with the
/// fragment chain it heads. This makes the acquire/release bookkeeping of
/// the fabric automatic: the copy a sink owns is a clone, and releasing it
/// is dropping it.
///
/// Mutation (`append`, `clear`) requires a unique handle, the same rule
/// `Arc::get_mut` enforces: with one reference there is exactly one handle,
/// so the `&mut self` receiver proves exclusive access to the bytes. Shared
/// handles may read concurrently.
pub struct Packet {
    slot: &'static PacketSlot,
}

// Safety: the slot header is all atomics, and data-byte access follows the
// unique-writer/shared-reader refcount protocol documented above.
unsafe impl Send for Packet {}
unsafe impl Sync for Packet {}

impl Packet {
    pub(crate) fn from_slot(slot: &'static PacketSlot) -> Self {
        Self { slot }
    }

    /// Current reference count, counting this handle.
    pub fn ref_count(&self) -> u32 {
        self.slot.ref_count()
    }

    /// Bytes written into this fragment (not the chain).
    pub fn len(&self) -> usize {
        self.slot.len() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Capacity of this fragment's backing buffer.
    pub fn capacity(&self) -> usize {
        self.slot.capacity() as usize
    }

    /// Total length of the logical packet: this fragment plus its chain.
    pub fn total_len(&self) -> usize {
        let mut total = 0;
        let mut cur = Some(self.slot);
        while let Some(slot) = cur {
            total += slot.len() as usize;
            cur = slot.frag_next();
        }
        total
    }

    /// Bytes of this fragment.
    pub fn data(&self) -> &[u8] {
        let len = self.slot.len() as usize;
        // Safety: the slot stays out of the free list while this handle
        // holds a reference, and writes require a unique handle, so no
        // writer races these bytes.
        unsafe { slice::from_raw_parts(self.slot.data_ptr(), len) }
    }

    /// Appends bytes to this fragment.
    ///
    /// Requires a unique handle; fails with `InvalidArgument` when the
    /// buffer is shared and with `NoMemory` when the capacity is exceeded.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        if self.slot.ref_count() != 1 {
            return Err(Error::InvalidArgument);
        }
        let len = self.len();
        if len + bytes.len() > self.capacity() {
            return Err(Error::NoMemory);
        }
        // Safety: refcount 1 plus `&mut self` makes this the only access to
        // the buffer bytes; the Release in set_len publishes them.
        unsafe {
            self.slot
                .data_ptr()
                .add(len)
                .copy_from_nonoverlapping(bytes.as_ptr(), bytes.len());
        }
        self.slot.set_len((len + bytes.len()) as u32);
        Ok(())
    }

    /// Resets this fragment's length to zero. Requires a unique handle.
    pub fn clear(&mut self) -> Result<()> {
        if self.slot.ref_count() != 1 {
            return Err(Error::InvalidArgument);
        }
        self.slot.set_len(0);
        Ok(())
    }

    /// Links `tail` onto the end of this packet's fragment chain.
    ///
    /// Ownership transfers: the chain takes over the reference held by the
    /// `tail` handle, and releasing the head releases the whole chain. To
    /// keep a fragment alive beyond the chain, clone it first.
    pub fn frag_add(&self, tail: Packet) {
        let tail_slot = tail.slot;
        // The chain inherits tail's reference instead of dropping it.
        mem::forget(tail);
        self.slot.push_frag(tail_slot);
    }

    /// Number of buffers forming the logical packet (at least one).
    pub fn frag_count(&self) -> usize {
        let mut count = 0;
        let mut cur = Some(self.slot);
        while let Some(slot) = cur {
            count += 1;
            cur = slot.frag_next();
        }
        count
    }

    /// Iterates the data of every fragment, head first. Zero-copy: each item
    /// borrows the fragment's bytes.
    pub fn frags(&self) -> Frags<'_> {
        Frags {
            cur: Some(self.slot),
            _packet: PhantomData,
        }
    }

    /// Whether this buffer carries a stamped metadata block.
    pub fn has_metadata(&self) -> bool {
        self.slot.meta.is_stamped()
    }

    pub fn id(&self) -> Result<PacketId> {
        self.slot.meta.id()
    }

    pub fn set_id(&self, id: PacketId) -> Result<()> {
        self.slot.meta.set_id(id)
    }

    pub fn client_id(&self) -> Result<u8> {
        self.slot.meta.client_id()
    }

    pub fn set_client_id(&self, client: u8) -> Result<()> {
        self.slot.meta.set_client_id(client)
    }

    pub fn counter(&self) -> Result<u16> {
        self.slot.meta.counter()
    }

    pub fn set_counter(&self, counter: u16) -> Result<()> {
        self.slot.meta.set_counter(counter)
    }

    pub fn timestamp(&self) -> Result<u64> {
        self.slot.meta.timestamp()
    }

    pub fn set_timestamp(&self, ticks: u64) -> Result<()> {
        self.slot.meta.set_timestamp(ticks)
    }
}

impl Clone for Packet {
    /// Takes a reference on the buffer.
    fn clone(&self) -> Self {
        self.slot.inc_ref();
        Self { slot: self.slot }
    }
}

impl Drop for Packet {
    /// Releases one reference; the buffer (and its fragment chain) returns
    /// to the pool when the count hits zero.
    fn drop(&mut self) {
        self.slot.unref();
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("len", &self.len())
            .field("total_len", &self.total_len())
            .field("frags", &self.frag_count())
            .field("refs", &self.ref_count())
            .finish()
    }
}

/// Iterator over the byte slices of a fragment chain.
pub struct Frags<'a> {
    cur: Option<&'static PacketSlot>,
    _packet: PhantomData<&'a Packet>,
}

impl<'a> Iterator for Frags<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let slot = self.cur?;
        self.cur = slot.frag_next();
        let len = slot.len() as usize;
        // Safety: the head handle borrowed for 'a keeps the whole chain out
        // of the free list.
        Some(unsafe { slice::from_raw_parts(slot.data_ptr(), len) })
    }
}

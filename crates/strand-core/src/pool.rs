//! Packet pool: a fixed-block slab allocator for packet-sized buffers.
//!
//! The pool manages a growable list of blocks, each owning a contiguous
//! region of `block_capacity * packet_size` bytes carved into slots. A
//! freelist tracks blocks that still have free slots, so allocation is
//! O(1) amortized: pop a slot from the head block, growing the pool by a
//! fresh block when every block is full.
//!
//! Allocation hands out [`Slot`] handles. Handles are reference counted;
//! when the last handle for a slot is dropped, the slot returns to its
//! block's freelist automatically. Empty blocks are kept around for
//! future allocations and released only by an explicit [`PacketPool::prune`].
//!
//! The pool takes an optional lock handle at construction; all mutating
//! entry points and slot releases acquire it. Supplying no lock (the
//! single-threaded default) leaves nothing to acquire.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::error::{Error, Result};

/// Serialization strategy for pool access.
///
/// The null strategy is expressed by supplying no lock at all, so the
/// default configuration pays for no synchronization.
pub trait LockPolicy {
    /// Acquire the lock.
    fn lock(&self);
    /// Release the lock.
    fn unlock(&self);
}

/// Scoped lock acquisition over an optional lock handle.
struct LockGuard<'a> {
    lock: Option<&'a dyn LockPolicy>,
}

impl<'a> LockGuard<'a> {
    fn acquire(lock: Option<&'a Rc<dyn LockPolicy>>) -> Self {
        let lock = lock.map(Rc::as_ref);
        if let Some(lock) = lock {
            lock.lock();
        }
        Self { lock }
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Some(lock) = self.lock {
            lock.unlock();
        }
    }
}

/// Per-slot freelist node inside a block.
#[derive(Debug, Clone, Copy)]
struct Chunk {
    next_free: Option<usize>,
}

/// One block of `capacity` packet-sized slots.
struct Block {
    data: Rc<RefCell<Box<[u8]>>>,
    chunks: Vec<Chunk>,
    free_head: Option<usize>,
    used: usize,
}

impl Block {
    fn new(packet_size: usize, capacity: usize) -> Self {
        let data = vec![0u8; packet_size * capacity].into_boxed_slice();
        let mut chunks = Vec::with_capacity(capacity);
        for index in 0..capacity {
            let next_free = if index + 1 < capacity { Some(index + 1) } else { None };
            chunks.push(Chunk { next_free });
        }
        Self {
            data: Rc::new(RefCell::new(data)),
            chunks,
            free_head: if capacity > 0 { Some(0) } else { None },
            used: 0,
        }
    }

    fn allocate(&mut self) -> Option<usize> {
        let index = self.free_head?;
        self.free_head = self.chunks[index].next_free;
        self.chunks[index].next_free = None;
        self.used += 1;
        Some(index)
    }

    fn free(&mut self, index: usize) {
        self.chunks[index].next_free = self.free_head;
        self.free_head = Some(index);
        self.used -= 1;
    }

    fn full(&self) -> bool {
        self.free_head.is_none()
    }

    fn empty(&self) -> bool {
        self.used == 0
    }
}

struct PoolInner {
    packet_size: usize,
    block_capacity: usize,
    blocks: HashMap<u64, Block>,
    /// All block ids, most recently allocated first.
    order: Vec<u64>,
    /// Ids of blocks with at least one free slot; the tail is the head
    /// of the freelist.
    freelist: Vec<u64>,
    next_block_id: u64,
}

impl PoolInner {
    fn allocate_block(&mut self) -> u64 {
        let id = self.next_block_id;
        self.next_block_id += 1;
        self.blocks.insert(id, Block::new(self.packet_size, self.block_capacity));
        self.order.insert(0, id);
        self.freelist.push(id);
        id
    }

    fn free_slot(&mut self, block_id: u64, index: usize) {
        let Some(block) = self.blocks.get_mut(&block_id) else {
            // The block was pruned; that can only happen once all its
            // slots were already free, so there is nothing to do.
            return;
        };
        let was_full = block.full();
        block.free(index);
        if was_full {
            self.freelist.push(block_id);
        }
    }
}

/// Reference-counted handle onto one packet-sized slot.
///
/// The handle can be cloned freely; the slot returns to the pool when
/// the last clone is dropped. An empty handle (after an explicit
/// [`PacketPool::free`]) reports a length of zero and yields no data.
///
/// Slot data is mutable through the handle; callers must not mutate a
/// slot that has multiple live references.
#[derive(Clone, Default)]
pub struct Slot {
    inner: Option<Rc<SlotInner>>,
}

struct SlotInner {
    pool: Rc<RefCell<PoolInner>>,
    lock: Option<Rc<dyn LockPolicy>>,
    data: Rc<RefCell<Box<[u8]>>>,
    block_id: u64,
    index: usize,
    packet_size: usize,
}

impl Drop for SlotInner {
    fn drop(&mut self) {
        let _guard = LockGuard::acquire(self.lock.as_ref());
        self.pool.borrow_mut().free_slot(self.block_id, self.index);
    }
}

impl Slot {
    /// An empty handle referencing no slot.
    pub fn empty() -> Self {
        Self { inner: None }
    }

    /// Size of the referenced slot in bytes; zero for an empty handle.
    pub fn len(&self) -> usize {
        self.inner.as_ref().map_or(0, |inner| inner.packet_size)
    }

    /// Whether this handle references no slot.
    pub fn is_empty(&self) -> bool {
        self.inner.is_none()
    }

    /// Number of live handles for this slot, including this one.
    pub fn ref_count(&self) -> usize {
        self.inner.as_ref().map_or(0, Rc::strong_count)
    }

    /// Borrow the slot bytes for reading.
    pub fn data(&self) -> Option<Ref<'_, [u8]>> {
        let inner = self.inner.as_ref()?;
        let start = inner.index * inner.packet_size;
        let end = start + inner.packet_size;
        Some(Ref::map(inner.data.borrow(), |data| &data[start..end]))
    }

    /// Borrow the slot bytes for writing.
    pub fn data_mut(&self) -> Option<RefMut<'_, [u8]>> {
        let inner = self.inner.as_ref()?;
        let start = inner.index * inner.packet_size;
        let end = start + inner.packet_size;
        Some(RefMut::map(inner.data.borrow_mut(), |data| &mut data[start..end]))
    }

    /// Copy `bytes` into the slot starting at offset zero.
    ///
    /// # Errors
    ///
    /// `InvalidReference` for an empty handle,
    /// `InsufficientBufferSize` if `bytes` exceeds the slot.
    pub fn fill(&self, bytes: &[u8]) -> Result<()> {
        let mut data = self.data_mut().ok_or(Error::InvalidReference)?;
        if bytes.len() > data.len() {
            return Err(Error::InsufficientBufferSize {
                needed: bytes.len(),
                available: data.len(),
            });
        }
        data[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn same_pool(&self, pool: &Rc<RefCell<PoolInner>>) -> bool {
        self.inner.as_ref().is_some_and(|inner| Rc::ptr_eq(&inner.pool, pool))
    }
}

impl PartialEq for Slot {
    fn eq(&self, other: &Self) -> bool {
        match (&self.inner, &other.inner) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl Eq for Slot {}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Some(inner) => f
                .debug_struct("Slot")
                .field("block", &inner.block_id)
                .field("index", &inner.index)
                .field("len", &inner.packet_size)
                .field("refs", &Rc::strong_count(inner))
                .finish(),
            None => f.write_str("Slot(empty)"),
        }
    }
}

/// The packet pool itself. Cloning yields another handle onto the same
/// pool.
#[derive(Clone)]
pub struct PacketPool {
    inner: Rc<RefCell<PoolInner>>,
    lock: Option<Rc<dyn LockPolicy>>,
}

impl PacketPool {
    /// Create a pool of `packet_size`-byte slots, `block_capacity` slots
    /// per block, with no lock.
    pub fn new(packet_size: usize, block_capacity: usize) -> Self {
        Self::build(packet_size, block_capacity, None)
    }

    /// Create a pool whose mutating entry points acquire `lock`.
    pub fn with_lock(
        packet_size: usize,
        block_capacity: usize,
        lock: Rc<dyn LockPolicy>,
    ) -> Self {
        Self::build(packet_size, block_capacity, Some(lock))
    }

    fn build(
        packet_size: usize,
        block_capacity: usize,
        lock: Option<Rc<dyn LockPolicy>>,
    ) -> Self {
        debug_assert!(packet_size > 0 && block_capacity > 0);
        Self {
            inner: Rc::new(RefCell::new(PoolInner {
                packet_size,
                block_capacity,
                blocks: HashMap::new(),
                order: Vec::new(),
                freelist: Vec::new(),
                next_block_id: 0,
            })),
            lock,
        }
    }

    /// The fixed slot size of this pool.
    pub fn packet_size(&self) -> usize {
        self.inner.borrow().packet_size
    }

    /// Allocate a slot, growing the pool by a block if necessary.
    ///
    /// Allocation never fails.
    pub fn allocate(&self) -> Slot {
        let _guard = LockGuard::acquire(self.lock.as_ref());

        let mut pool = self.inner.borrow_mut();
        let block_id = match pool.freelist.last().copied() {
            Some(id) => id,
            None => pool.allocate_block(),
        };

        // A block on the freelist always has a free slot.
        let Some(block) = pool.blocks.get_mut(&block_id) else {
            return Slot::empty();
        };
        let Some(index) = block.allocate() else {
            return Slot::empty();
        };
        let now_full = block.full();
        let data = Rc::clone(&block.data);
        if now_full {
            pool.freelist.pop();
        }
        let packet_size = pool.packet_size;
        drop(pool);

        Slot {
            inner: Some(Rc::new(SlotInner {
                pool: Rc::clone(&self.inner),
                lock: self.lock.clone(),
                data,
                block_id,
                index,
                packet_size,
            })),
        }
    }

    /// Release `slot`'s handle explicitly.
    ///
    /// The slot returns to the pool once no other handles remain. The
    /// handle is cleared either way, so a second call cannot double
    /// free.
    ///
    /// # Errors
    ///
    /// `InvalidReference` if the handle is empty or belongs to another
    /// pool.
    pub fn free(&self, slot: &mut Slot) -> Result<()> {
        if !slot.same_pool(&self.inner) {
            return Err(Error::InvalidReference);
        }
        // Dropping the handle releases the slot if this was the last
        // reference; the drop path takes the lock itself.
        slot.inner = None;
        Ok(())
    }

    /// Release every block whose slots are all free.
    pub fn prune(&self) {
        let _guard = LockGuard::acquire(self.lock.as_ref());
        let mut pool = self.inner.borrow_mut();

        let pruned: Vec<u64> = pool
            .blocks
            .iter()
            .filter(|(_, block)| block.empty())
            .map(|(id, _)| *id)
            .collect();
        for id in &pruned {
            pool.blocks.remove(id);
        }
        pool.order.retain(|id| !pruned.contains(id));
        pool.freelist.retain(|id| !pruned.contains(id));
    }

    /// Number of slots currently allocated.
    pub fn size(&self) -> usize {
        let _guard = LockGuard::acquire(self.lock.as_ref());
        let pool = self.inner.borrow();
        pool.blocks.values().map(|block| block.used).sum()
    }

    /// Total number of slots across all blocks.
    pub fn capacity(&self) -> usize {
        let _guard = LockGuard::acquire(self.lock.as_ref());
        let pool = self.inner.borrow();
        pool.blocks.len() * pool.block_capacity
    }

    /// Whether no slot is currently allocated.
    pub fn is_empty(&self) -> bool {
        let _guard = LockGuard::acquire(self.lock.as_ref());
        let pool = self.inner.borrow();
        pool.blocks.values().all(Block::empty)
    }
}

impl fmt::Debug for PacketPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pool = self.inner.borrow();
        f.debug_struct("PacketPool")
            .field("packet_size", &pool.packet_size)
            .field("block_capacity", &pool.block_capacity)
            .field("blocks", &pool.blocks.len())
            .finish()
    }
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Lock-free, batched, single-producer/single-consumer ring buffer.
//!
//! State is split in three cache lines: the producer-local view (owned by [Producer]), the shared control block
//! (`read` and `write` indexes), and the consumer-local view (owned by [Consumer]). Each side works against a stale
//! copy of the peer's index and only publishes its own index every `batch_size` operations or on an explicit flush.
//! As a consequence, the consumer may lag behind the producer by up to one batch.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fail::Fail;
use ::std::{
    cell::UnsafeCell,
    mem::MaybeUninit,
    sync::{
        atomic::{
            AtomicUsize,
            Ordering,
        },
        Arc,
    },
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Default number of operations between two publications of an index.
pub const DEFAULT_BATCH_SIZE: usize = 64;

/// Size of a cache line.
pub const CACHE_LINE_SIZE: usize = 64;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Indexes shared by both ends of the ring.
#[repr(align(64))]
struct ControlBlock {
    /// Index of the first slot not yet released by the consumer.
    read: AtomicUsize,
    /// Index of the first slot not yet published by the producer.
    write: AtomicUsize,
}

/// Memory shared by both ends of the ring.
struct Shared<T> {
    control: ControlBlock,
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    /// Pre-computed capacity mask.
    mask: usize,
    batch_size: usize,
}

/// Producer end of a ring buffer.
#[repr(align(64))]
pub struct Producer<T> {
    /// Last known consumer position.
    local_read: usize,
    /// Slot of the next element to produce.
    next_write: usize,
    /// Number of produced elements not yet published.
    pending: usize,
    shared: Arc<Shared<T>>,
}

/// Consumer end of a ring buffer.
#[repr(align(64))]
pub struct Consumer<T> {
    /// Last known producer position.
    local_write: usize,
    /// Slot of the next element to consume.
    next_read: usize,
    /// Number of consumed slots not yet released to the producer.
    pending: usize,
    shared: Arc<Shared<T>>,
}

/// Constructor for ring buffers.
pub struct RingBuffer;

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl RingBuffer {
    /// Creates a ring buffer with `capacity` slots, of which `capacity - 1` are usable. The capacity must be a power of
    /// two and the batch size must lie in `1..capacity`.
    pub fn new<T>(capacity: usize, batch_size: usize) -> Result<(Producer<T>, Consumer<T>), Fail> {
        if !capacity.is_power_of_two() || capacity < 2 {
            let cause: String = format!("ring buffer capacity must be a power of two (capacity={:?})", capacity);
            error!("new(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        if batch_size == 0 || batch_size >= capacity {
            let cause: String = format!(
                "ring buffer batch size is out of range (batch_size={:?}, capacity={:?})",
                batch_size, capacity
            );
            error!("new(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }

        let slots: Box<[UnsafeCell<MaybeUninit<T>>]> =
            (0..capacity).map(|_| UnsafeCell::new(MaybeUninit::uninit())).collect();
        let shared: Arc<Shared<T>> = Arc::new(Shared {
            control: ControlBlock {
                read: AtomicUsize::new(0),
                write: AtomicUsize::new(0),
            },
            slots,
            mask: capacity - 1,
            batch_size,
        });

        let producer: Producer<T> = Producer {
            local_read: 0,
            next_write: 0,
            pending: 0,
            shared: shared.clone(),
        };
        let consumer: Consumer<T> = Consumer {
            local_write: 0,
            next_read: 0,
            pending: 0,
            shared,
        };
        Ok((producer, consumer))
    }
}

impl<T> Producer<T> {
    /// Attempts to insert `item` at the back of the ring. Fails, handing `item` back, if the ring is full as seen from
    /// the last position published by the consumer.
    pub fn produce(&mut self, item: T) -> Result<(), T> {
        let mask: usize = self.shared.mask;
        let next: usize = (self.next_write + 1) & mask;

        if next == self.local_read {
            self.local_read = self.shared.control.read.load(Ordering::Acquire);
            if next == self.local_read {
                // Let the consumer see everything we have so far, so that it can make room.
                self.flush();
                return Err(item);
            }
        }

        unsafe { (*self.shared.slots[self.next_write].get()).write(item) };
        self.next_write = next;
        self.pending += 1;

        if self.pending >= self.shared.batch_size {
            self.flush();
        }
        Ok(())
    }

    /// Publishes all produced elements to the consumer.
    pub fn flush(&mut self) {
        if self.pending > 0 {
            self.shared.control.write.store(self.next_write, Ordering::Release);
            self.pending = 0;
        }
    }

    /// Number of produced elements that the consumer cannot see yet.
    pub fn unpublished(&self) -> usize {
        self.pending
    }

    /// Returns the effective capacity of the target ring buffer.
    pub fn capacity(&self) -> usize {
        self.shared.mask
    }
}

impl<T> Consumer<T> {
    /// Attempts to remove the element at the front of the ring. Returns `None` if no published element is left.
    pub fn consume(&mut self) -> Option<T> {
        if self.next_read == self.local_write {
            self.local_write = self.shared.control.write.load(Ordering::Acquire);
            if self.next_read == self.local_write {
                // Nothing left to consume, so hand consumed slots back to the producer.
                self.flush();
                return None;
            }
        }

        let item: T = unsafe { (*self.shared.slots[self.next_read].get()).assume_init_read() };
        self.next_read = (self.next_read + 1) & self.shared.mask;
        self.pending += 1;

        if self.pending >= self.shared.batch_size {
            self.flush();
        }
        Some(item)
    }

    /// Releases all consumed slots to the producer.
    pub fn flush(&mut self) {
        if self.pending > 0 {
            self.shared.control.read.store(self.next_read, Ordering::Release);
            self.pending = 0;
        }
    }

    /// Returns the effective capacity of the target ring buffer.
    pub fn capacity(&self) -> usize {
        self.shared.mask
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Drop for Producer<T> {
    fn drop(&mut self) {
        self.flush();
    }
}

impl<T> Drop for Consumer<T> {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Drops the elements left between the published read and write indexes. Both ends flush when dropped, so these are
/// exactly the elements that were produced but never consumed.
impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        let write: usize = *self.control.write.get_mut();
        let mut read: usize = *self.control.read.get_mut();
        while read != write {
            unsafe { self.slots[read].get_mut().assume_init_drop() };
            read = (read + 1) & self.mask;
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

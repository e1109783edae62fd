// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::std::{
    marker::PhantomData,
    mem::ManuallyDrop,
    ptr::NonNull,
    rc::Rc,
};

//======================================================================================================================
// Traits
//======================================================================================================================

/// An element that carries its own `next` link, so that it can sit in an [IntrusiveQueue] without extra allocation.
/// An element may be linked into at most one queue at a time.
pub trait IntrusivelyQueueable {
    /// Returns the element linked after this one.
    fn get_queue_next(&self) -> Option<NonNull<Self>>;

    /// Links `element` after this one.
    fn set_queue_next(&self, element: Option<NonNull<Self>>);
}

//======================================================================================================================
// Structures
//======================================================================================================================

/// A FIFO queue threaded through its elements. Each linked element owns one strong reference, held as a raw pointer.
/// Invariant: `back` is valid iff the queue is non-empty.
#[derive(Debug)]
pub struct IntrusiveQueue<T: IntrusivelyQueueable> {
    front: Option<NonNull<T>>,
    back: Option<NonNull<T>>,
    len: usize,
    phantom: PhantomData<Rc<T>>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl<T: IntrusivelyQueueable> IntrusiveQueue<T> {
    pub const fn new() -> Self {
        Self {
            front: None,
            back: None,
            len: 0,
            phantom: PhantomData,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.front.is_none()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Appends `element` at the back of the target queue.
    pub fn push_back(&mut self, element: Rc<T>) {
        element.set_queue_next(None);
        // Rc::into_raw() keeps the strong reference alive while the element is linked.
        let link: NonNull<T> = unsafe { NonNull::new_unchecked(Rc::into_raw(element) as *mut T) };

        match self.back {
            None => {
                debug_assert!(self.front.is_none());
                self.front = Some(link);
            },
            Some(back) => {
                // Borrow the old back element without touching its reference count.
                let old_back: ManuallyDrop<Rc<T>> = ManuallyDrop::new(unsafe { Rc::from_raw(back.as_ptr()) });
                old_back.set_queue_next(Some(link));
            },
        }

        self.back = Some(link);
        self.len += 1;
    }

    /// Unlinks and returns the element at the front of the target queue.
    pub fn pop_front(&mut self) -> Option<Rc<T>> {
        let front: NonNull<T> = self.front?;
        // Take back the strong reference handed over by push_back().
        let element: Rc<T> = unsafe { Rc::from_raw(front.as_ptr()) };

        self.front = element.get_queue_next();
        if self.front.is_none() {
            self.back = None;
        }
        element.set_queue_next(None);
        self.len -= 1;

        Some(element)
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl<T: IntrusivelyQueueable> Default for IntrusiveQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Linked elements are held through raw pointers, so they must be released by hand.
impl<T: IntrusivelyQueueable> Drop for IntrusiveQueue<T> {
    fn drop(&mut self) {
        while self.pop_front().is_some() {}
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::{
        IntrusiveQueue,
        IntrusivelyQueueable,
    };
    use ::anyhow::Result;
    use ::std::{
        cell::Cell,
        ptr::NonNull,
        rc::Rc,
    };

    struct Entry {
        next: Cell<Option<NonNull<Entry>>>,
        id: usize,
    }

    impl Entry {
        fn new(id: usize) -> Rc<Self> {
            Rc::new(Self {
                next: Cell::new(None),
                id,
            })
        }
    }

    impl IntrusivelyQueueable for Entry {
        fn get_queue_next(&self) -> Option<NonNull<Self>> {
            self.next.get()
        }

        fn set_queue_next(&self, element: Option<NonNull<Self>>) {
            self.next.set(element);
        }
    }

    #[test]
    fn pops_in_push_order() -> Result<()> {
        let mut queue: IntrusiveQueue<Entry> = IntrusiveQueue::new();
        crate::ensure_eq!(queue.is_empty(), true);

        for id in 0..8 {
            queue.push_back(Entry::new(id));
        }
        crate::ensure_eq!(queue.len(), 8);

        for expected in 0..8 {
            let entry: Rc<Entry> = match queue.pop_front() {
                Some(entry) => entry,
                None => anyhow::bail!("queue drained too early"),
            };
            crate::ensure_eq!(entry.id, expected);
            crate::ensure_eq!(Rc::strong_count(&entry), 1);
        }
        crate::ensure_eq!(queue.is_empty(), true);
        crate::ensure_eq!(queue.pop_front().is_none(), true);

        Ok(())
    }

    #[test]
    fn interleaved_push_pop_keeps_back_consistent() -> Result<()> {
        let mut queue: IntrusiveQueue<Entry> = IntrusiveQueue::new();

        // Drain to empty in between, so that the back link has to be rebuilt.
        queue.push_back(Entry::new(1));
        crate::ensure_eq!(queue.pop_front().map(|e| e.id), Some(1));
        queue.push_back(Entry::new(2));
        queue.push_back(Entry::new(3));
        crate::ensure_eq!(queue.pop_front().map(|e| e.id), Some(2));
        queue.push_back(Entry::new(4));
        crate::ensure_eq!(queue.pop_front().map(|e| e.id), Some(3));
        crate::ensure_eq!(queue.pop_front().map(|e| e.id), Some(4));
        crate::ensure_eq!(queue.len(), 0);

        Ok(())
    }

    #[test]
    fn drop_releases_linked_elements() -> Result<()> {
        let first: Rc<Entry> = Entry::new(1);
        let second: Rc<Entry> = Entry::new(2);
        {
            let mut queue: IntrusiveQueue<Entry> = IntrusiveQueue::new();
            queue.push_back(first.clone());
            queue.push_back(second.clone());
            crate::ensure_eq!(Rc::strong_count(&first), 2);
        }
        crate::ensure_eq!(Rc::strong_count(&first), 1);
        crate::ensure_eq!(Rc::strong_count(&second), 1);

        Ok(())
    }
}

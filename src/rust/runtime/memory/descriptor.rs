// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    memory::{
        GlobalAddress,
        Operation,
    },
    types::{
        NodeId,
        Word,
    },
};
use ::std::{
    convert::TryFrom,
    sync::{
        atomic::{
            AtomicBool,
            AtomicI64,
            AtomicU16,
            AtomicU8,
            AtomicUsize,
            Ordering,
        },
        Arc,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// One outstanding memory operation.
///
/// The issuing task writes the request fields before handing the descriptor over through a ring buffer, whose
/// publication orders them. Whoever serves the request writes the result and then sets `full` with a release store;
/// the issuing task reads the result only after observing `full` with an acquire load. Hence, request and result
/// fields are never written concurrently and relaxed accesses suffice for them.
#[derive(Debug, Default)]
pub struct MemoryDescriptor {
    operation: AtomicU8,
    node: AtomicU16,
    offset: AtomicUsize,
    data: AtomicI64,
    /// Expected value of a compare-and-swap.
    aux: AtomicI64,
    full: AtomicBool,
    in_use: AtomicBool,
}

/// Free list of descriptors owned by one delegate client.
pub struct DescriptorPool {
    free: Vec<Arc<MemoryDescriptor>>,
    /// Number of descriptors ever created by this pool.
    allocated: usize,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl MemoryDescriptor {
    /// Fills in a new request and marks the descriptor as empty.
    pub fn fill_request(&self, operation: Operation, address: GlobalAddress, data: Word, aux: Word) {
        self.full.store(false, Ordering::Relaxed);
        self.operation.store(operation.into(), Ordering::Relaxed);
        self.node.store(address.get_node().into(), Ordering::Relaxed);
        self.offset.store(address.get_offset(), Ordering::Relaxed);
        self.data.store(data, Ordering::Relaxed);
        self.aux.store(aux, Ordering::Relaxed);
    }

    /// Returns the requested operation. An unknown tag means that the descriptor was corrupted.
    pub fn get_operation(&self) -> Operation {
        let tag: u8 = self.operation.load(Ordering::Relaxed);
        match Operation::try_from(tag) {
            Ok(operation) => operation,
            Err(e) => panic!("get_operation(): {:?}", e),
        }
    }

    pub fn get_address(&self) -> GlobalAddress {
        GlobalAddress::new(
            NodeId(self.node.load(Ordering::Relaxed)),
            self.offset.load(Ordering::Relaxed),
        )
    }

    pub fn get_data(&self) -> Word {
        self.data.load(Ordering::Relaxed)
    }

    pub fn get_aux(&self) -> Word {
        self.aux.load(Ordering::Relaxed)
    }

    /// Stores the result of the request and marks the descriptor as full.
    pub fn fill_result(&self, value: Word) {
        self.data.store(value, Ordering::Relaxed);
        self.full.store(true, Ordering::Release);
    }

    pub fn is_full(&self) -> bool {
        self.full.load(Ordering::Acquire)
    }

    /// Returns the result of a full descriptor.
    pub fn get_result(&self) -> Word {
        debug_assert!(self.is_full());
        self.data.load(Ordering::Relaxed)
    }

    pub fn is_in_use(&self) -> bool {
        self.in_use.load(Ordering::Relaxed)
    }
}

impl DescriptorPool {
    pub fn new() -> Self {
        Self {
            free: Vec::new(),
            allocated: 0,
        }
    }

    /// Claims a descriptor for exclusive use, allocating one if the pool is empty.
    pub fn claim(&mut self) -> Arc<MemoryDescriptor> {
        let descriptor: Arc<MemoryDescriptor> = match self.free.pop() {
            Some(descriptor) => descriptor,
            None => {
                self.allocated += 1;
                Arc::new(MemoryDescriptor::default())
            },
        };
        if descriptor.in_use.swap(true, Ordering::Relaxed) {
            panic!("claim(): descriptor is already in use");
        }
        descriptor
    }

    /// Hands a descriptor back to the pool. Releasing a descriptor that is not in use is fatal.
    pub fn release(&mut self, descriptor: Arc<MemoryDescriptor>) {
        if !descriptor.in_use.swap(false, Ordering::Relaxed) {
            panic!("release(): descriptor released twice");
        }
        self.free.push(descriptor);
    }

    /// Number of descriptors ever created by the target pool.
    pub fn num_allocated(&self) -> usize {
        self.allocated
    }

    pub fn num_free(&self) -> usize {
        self.free.len()
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for DescriptorPool {
    fn default() -> Self {
        Self::new()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

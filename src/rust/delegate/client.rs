// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    delegate::RequestProducer,
    runtime::{
        memory::{
            DescriptorPool,
            GlobalAddress,
            MemoryDescriptor,
            Operation,
            Segment,
        },
        scheduler::SharedScheduler,
        types::{
            NodeId,
            Word,
        },
        SharedObject,
    },
};
use ::std::{
    ops::{
        Deref,
        DerefMut,
        Range,
    },
    sync::Arc,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Handle on an issued memory operation, redeemed by [SharedDelegateClient::complete].
#[derive(Debug)]
pub enum Ticket {
    /// The target word is in the local region. Nothing was queued.
    Local {
        operation: Operation,
        offset: usize,
        data: Word,
        aux: Word,
    },
    /// The operation sits in the request queue or with some delegate server.
    Remote { descriptor: Arc<MemoryDescriptor> },
}

/// Client side of a request queue, shared by the tasks of one scheduler.
pub struct DelegateClient {
    node: NodeId,
    scheduler: SharedScheduler,
    segment: Segment,
    /// Offsets of the local segment that tasks access in place.
    local_region: Range<usize>,
    producer: RequestProducer,
    pool: DescriptorPool,
    /// Number of tasks sharing this client.
    num_registered: usize,
    /// Number of tasks that started waiting since the last flush.
    num_unflushed_waiters: usize,
}

#[derive(Clone)]
pub struct SharedDelegateClient(SharedObject<DelegateClient>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl SharedDelegateClient {
    pub fn new(
        node: NodeId,
        scheduler: SharedScheduler,
        segment: Segment,
        local_region: Range<usize>,
        producer: RequestProducer,
    ) -> Self {
        Self(SharedObject::new(DelegateClient {
            node,
            scheduler,
            segment,
            local_region,
            producer,
            pool: DescriptorPool::new(),
            num_registered: 0,
            num_unflushed_waiters: 0,
        }))
    }

    /// Checks whether `address` is served in place.
    pub fn is_local(&self, address: GlobalAddress) -> bool {
        address.get_node() == self.node && self.local_region.contains(&address.get_offset())
    }

    /// First phase of a memory operation. Local addresses are only prefetched. Other addresses are handed to the
    /// delegate server, yielding for as long as the request queue is full.
    pub async fn issue(&mut self, operation: Operation, address: GlobalAddress, data: Word, aux: Word) -> Ticket {
        if operation != Operation::Quit && self.is_local(address) {
            self.segment.prefetch(address.get_offset());
            return Ticket::Local {
                operation,
                offset: address.get_offset(),
                data,
                aux,
            };
        }

        let descriptor: Arc<MemoryDescriptor> = self.pool.claim();
        descriptor.fill_request(operation, address, data, aux);

        let mut request: Arc<MemoryDescriptor> = descriptor.clone();
        let scheduler: SharedScheduler = self.scheduler.clone();
        loop {
            match self.producer.produce(request) {
                Ok(()) => break,
                Err(rejected) => {
                    trace!("issue(): request queue is full, yielding");
                    request = rejected;
                    scheduler.yield_now().await;
                },
            }
        }

        Ticket::Remote { descriptor }
    }

    /// Second phase of a memory operation. Yields until the result is available, then returns it.
    pub async fn complete(&mut self, ticket: Ticket) -> Word {
        let descriptor: Arc<MemoryDescriptor> = match ticket {
            Ticket::Local {
                operation,
                offset,
                data,
                aux,
            } => return self.segment.execute(operation, offset, data, aux),
            Ticket::Remote { descriptor } => descriptor,
        };

        if !descriptor.is_full() {
            self.num_unflushed_waiters += 1;
            if self.num_unflushed_waiters >= self.num_registered.max(1) {
                self.flush();
            }

            let scheduler: SharedScheduler = self.scheduler.clone();
            while !descriptor.is_full() {
                scheduler.yield_now().await;
                // A whole round went by without progress: do not wait behind an unpublished batch.
                if !descriptor.is_full() && self.producer.unpublished() > 0 {
                    self.flush();
                }
            }
        }

        let value: Word = descriptor.get_result();
        self.pool.release(descriptor);
        value
    }

    /// Publishes every queued request to the delegate server.
    pub fn flush(&mut self) {
        self.producer.flush();
        self.num_unflushed_waiters = 0;
    }

    pub async fn read(&mut self, address: GlobalAddress) -> Word {
        let ticket: Ticket = self.issue(Operation::Read, address, 0, 0).await;
        self.complete(ticket).await
    }

    pub async fn write(&mut self, address: GlobalAddress, value: Word) {
        let ticket: Ticket = self.issue(Operation::Write, address, value, 0).await;
        self.complete(ticket).await;
    }

    /// Adds `delta` to the target word, returning its previous value.
    pub async fn fetch_and_add(&mut self, address: GlobalAddress, delta: Word) -> Word {
        let ticket: Ticket = self.issue(Operation::FetchAdd, address, delta, 0).await;
        self.complete(ticket).await
    }

    /// Replaces the target word with `new` if it holds `expected`. Returns whether the swap happened.
    pub async fn compare_and_swap(&mut self, address: GlobalAddress, expected: Word, new: Word) -> bool {
        let ticket: Ticket = self.issue(Operation::CompareSwap, address, new, expected).await;
        self.complete(ticket).await == expected
    }

    /// Shuts down the request queue of the target client on the delegate server.
    pub async fn quit(&mut self) {
        let address: GlobalAddress = GlobalAddress::new(self.node, 0);
        let ticket: Ticket = self.issue(Operation::Quit, address, 0, 0).await;
        self.complete(ticket).await;
    }

    /// Announces one more task sharing the target client.
    pub fn register_task(&mut self) {
        self.num_registered += 1;
    }

    pub fn unregister_task(&mut self) {
        assert!(self.num_registered > 0, "unregister_task(): no task is registered");
        self.num_registered -= 1;
    }

    pub fn get_node_id(&self) -> NodeId {
        self.node
    }

    pub fn num_descriptors(&self) -> usize {
        self.pool.num_allocated()
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Deref for SharedDelegateClient {
    type Target = DelegateClient;

    fn deref(&self) -> &Self::Target {
        self.0.deref()
    }
}

impl DerefMut for SharedDelegateClient {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.deref_mut()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    delegate::RequestConsumer,
    runtime::{
        memory::{
            GlobalAddress,
            MemoryDescriptor,
            Operation,
            Segment,
        },
        network::{
            Endpoint,
            Envelope,
            Message,
        },
        scheduler::SharedScheduler,
        types::{
            NodeId,
            Word,
        },
        SharedObject,
    },
};
use ::slab::{
    Slab,
    VacantEntry,
};
use ::std::{
    ops::{
        Deref,
        DerefMut,
    },
    sync::Arc,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Serves the request queues of one node and the requests that peers forward to it.
pub struct DelegateServer {
    node: NodeId,
    /// Runs one task per request queue.
    scheduler: SharedScheduler,
    segment: Segment,
    endpoint: Endpoint,
    /// Requests forwarded to other nodes, waiting for their response.
    pending: Slab<Arc<MemoryDescriptor>>,
    /// Number of request queues that did not quit yet.
    num_active: usize,
    /// Number of memory operations performed on the local segment.
    num_served: u64,
}

#[derive(Clone)]
pub struct SharedDelegateServer(SharedObject<DelegateServer>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl SharedDelegateServer {
    /// Creates a delegate server and spawns one task per request queue on its own scheduler.
    pub fn new(node: NodeId, segment: Segment, endpoint: Endpoint, queues: Vec<RequestConsumer>) -> Self {
        let mut scheduler: SharedScheduler = SharedScheduler::new(&format!("delegate-{}", node));
        let me: Self = Self(SharedObject::new(DelegateServer {
            node,
            scheduler: scheduler.clone(),
            segment,
            endpoint,
            pending: Slab::new(),
            num_active: queues.len(),
            num_served: 0,
        }));

        for (i, consumer) in queues.into_iter().enumerate() {
            let server: Self = me.clone();
            scheduler.spawn(&format!("delegate-{}-queue-{}", node, i), server.drain(consumer));
        }
        me
    }

    /// Drains one request queue until it quits.
    async fn drain(mut self, mut consumer: RequestConsumer) {
        let scheduler: SharedScheduler = self.scheduler.clone();
        loop {
            match consumer.consume() {
                Some(descriptor) => {
                    if !self.serve(descriptor) {
                        break;
                    }
                },
                None => scheduler.yield_now().await,
            }
        }
        consumer.flush();
        debug!("drain(): request queue quit ({} left active)", self.num_active);
    }

    /// Serves one request. Returns false if the request closes its queue.
    fn serve(&mut self, descriptor: Arc<MemoryDescriptor>) -> bool {
        let operation: Operation = descriptor.get_operation();
        if operation == Operation::Quit {
            assert!(self.num_active > 0, "serve(): quit on an inactive server");
            self.num_active -= 1;
            descriptor.fill_result(0);
            return false;
        }

        let address: GlobalAddress = descriptor.get_address();
        if address.get_node() == self.node {
            let value: Word = self.execute(operation, address.get_offset(), descriptor.get_data(), descriptor.get_aux());
            descriptor.fill_result(value);
        } else {
            let entry: VacantEntry<Arc<MemoryDescriptor>> = self.pending.vacant_entry();
            let message: Message = Message::DelegateRequest {
                id: entry.key(),
                operation,
                offset: address.get_offset(),
                data: descriptor.get_data(),
                aux: descriptor.get_aux(),
            };
            entry.insert(descriptor);
            trace!("serve(): forwarding {:?} to {}", operation, address);
            if let Err(e) = self.endpoint.send(address.get_node(), message) {
                panic!("serve(): failed to forward request ({:?})", e);
            }
        }
        true
    }

    fn execute(&mut self, operation: Operation, offset: usize, data: Word, aux: Word) -> Word {
        self.num_served += 1;
        self.segment.execute(operation, offset, data, aux)
    }

    /// Handles a message received on the delegate port.
    pub fn handle_message(&mut self, envelope: Envelope) {
        match envelope.message {
            Message::DelegateRequest {
                id,
                operation,
                offset,
                data,
                aux,
            } => {
                let value: Word = self.execute(operation, offset, data, aux);
                let response: Message = Message::DelegateResponse { id, value };
                if let Err(e) = self.endpoint.send(envelope.source, response) {
                    panic!("handle_message(): failed to answer {} ({:?})", envelope.source, e);
                }
            },
            Message::DelegateResponse { id, value } => match self.pending.try_remove(id) {
                Some(descriptor) => descriptor.fill_result(value),
                None => panic!("handle_message(): response to unknown request (id={})", id),
            },
            other => panic!("handle_message(): unexpected message on delegate port ({:?})", other),
        }
    }

    /// Runs one pass over the request queues.
    pub fn poll(&mut self) {
        self.scheduler.run_once();
    }

    /// Checks whether some request queue is still open.
    pub fn is_active(&self) -> bool {
        self.num_active > 0
    }

    /// Number of requests forwarded to peers and not yet answered.
    pub fn num_pending(&self) -> usize {
        self.pending.len()
    }

    pub fn num_served(&self) -> u64 {
        self.num_served
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Deref for SharedDelegateServer {
    type Target = DelegateServer;

    fn deref(&self) -> &Self::Target {
        self.0.deref()
    }
}

impl DerefMut for SharedDelegateServer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.deref_mut()
    }
}

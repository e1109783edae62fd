// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

pub mod cluster;
pub mod config;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    collections::ring::RingBuffer,
    delegate::{
        RequestConsumer,
        RequestProducer,
        SharedDelegateClient,
        SharedDelegateServer,
    },
    node::config::Config,
    runtime::{
        fail::Fail,
        memory::Segment,
        network::{
            Endpoint,
            Port,
        },
        scheduler::{
            SharedScheduler,
            TaskId,
        },
        types::NodeId,
        SharedObject,
    },
    tasking::{
        joiner::SharedGlobalTaskJoiner,
        parallel_for::{
            self,
            LoopBody,
        },
        steal_queue::SharedStealQueue,
    },
};
use ::std::{
    future::Future,
    ops::{
        Deref,
        DerefMut,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Everything one node of the cluster runs: a worker scheduler, a memory segment with its delegate server and
/// clients, a global task joiner and, with work stealing, a steal queue. Nodes only talk to each other through their
/// fabric endpoint.
pub struct Node {
    id: NodeId,
    /// Runs application tasks.
    scheduler: SharedScheduler,
    segment: Segment,
    clients: Vec<SharedDelegateClient>,
    server: SharedDelegateServer,
    joiner: SharedGlobalTaskJoiner,
    steal_queue: Option<SharedStealQueue>,
    endpoint: Endpoint,
    /// Default threshold of parallel loops.
    threshold: i64,
}

#[derive(Clone)]
pub struct SharedNode(SharedObject<Node>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl SharedNode {
    pub fn new(config: &Config, endpoint: Endpoint) -> Result<Self, Fail> {
        let id: NodeId = endpoint.get_node_id();
        let segment: Segment = Segment::new(config.segment_words()?);
        let local_region_words: usize = config.local_region_words()?;
        let (capacity, batch_size): (usize, usize) = (config.ring_capacity()?, config.ring_batch_size()?);
        let scheduler: SharedScheduler = SharedScheduler::new(&format!("worker-{}", id));

        let mut clients: Vec<SharedDelegateClient> = Vec::new();
        let mut queues: Vec<RequestConsumer> = Vec::new();
        for _ in 0..config.delegate_clients()? {
            let (producer, consumer): (RequestProducer, RequestConsumer) = RingBuffer::new(capacity, batch_size)?;
            clients.push(SharedDelegateClient::new(
                id,
                scheduler.clone(),
                segment.clone(),
                0..local_region_words,
                producer,
            ));
            queues.push(consumer);
        }

        let server: SharedDelegateServer = SharedDelegateServer::new(id, segment.clone(), endpoint.clone(), queues);
        let joiner: SharedGlobalTaskJoiner =
            SharedGlobalTaskJoiner::new(config.coordinator()?, scheduler.clone(), endpoint.clone(), segment.clone());
        let steal_queue: Option<SharedStealQueue> = if config.work_stealing()? {
            Some(SharedStealQueue::new(scheduler.clone(), joiner.clone(), endpoint.clone()))
        } else {
            None
        };

        debug!(
            "new(): node {} with {} word(s) and {} delegate client(s)",
            id,
            segment.len(),
            clients.len()
        );
        Ok(Self(SharedObject::new(Node {
            id,
            scheduler,
            segment,
            clients,
            server,
            joiner,
            steal_queue,
            endpoint,
            threshold: config.parallel_for_threshold()?,
        })))
    }

    /// Spawns an application task on this node.
    pub fn spawn<F: Future<Output = ()> + 'static>(&mut self, name: &str, future: F) -> TaskId {
        self.scheduler.spawn(name, future)
    }

    /// Delivers inbound messages, then runs one pass of the worker scheduler and one of the delegate server. An idle
    /// worker then picks up a public range, or asks a peer for one. Returns the number of tasks resumed on the worker
    /// scheduler.
    pub fn poll(&mut self) -> Result<usize, Fail> {
        while let Some(envelope) = self.endpoint.try_recv(Port::Delegate) {
            self.server.handle_message(envelope);
        }
        while let Some(envelope) = self.endpoint.try_recv(Port::Joiner) {
            self.joiner.handle_message(envelope)?;
        }
        let id: NodeId = self.id;
        while let Some(envelope) = self.endpoint.try_recv(Port::Steal) {
            match self.steal_queue.as_mut() {
                Some(steal_queue) => steal_queue.handle_message(envelope)?,
                None => panic!("poll(): {} does not steal work ({:?})", id, envelope.message),
            }
        }
        let resumed: usize = self.scheduler.run_once();
        self.server.poll();
        if let Some(steal_queue) = self.steal_queue.as_mut() {
            steal_queue.poll()?;
        }
        Ok(resumed)
    }

    /// Runs `body` over `start..start + iterations` across the cluster, with the configured threshold. Every node must
    /// run this from one of its tasks.
    pub fn global_parallel_for(
        &self,
        start: i64,
        iterations: i64,
        body: LoopBody,
    ) -> impl Future<Output = Result<(), Fail>> {
        parallel_for::global_async_parallel_for(
            self.scheduler.clone(),
            self.joiner.clone(),
            self.steal_queue.clone(),
            start,
            iterations,
            self.threshold,
            body,
        )
    }

    /// Asks the delegate server to close every request queue of this node.
    pub fn spawn_shutdown(&mut self) {
        let id: NodeId = self.id;
        for (i, client) in self.clients.clone().into_iter().enumerate() {
            let mut client: SharedDelegateClient = client;
            self.scheduler
                .spawn(&format!("shutdown-{}-{}", id, i), async move { client.quit().await });
        }
    }

    pub fn get_node_id(&self) -> NodeId {
        self.id
    }

    pub fn get_scheduler(&self) -> SharedScheduler {
        self.scheduler.clone()
    }

    pub fn get_segment(&self) -> Segment {
        self.segment.clone()
    }

    /// Returns a delegate client. Tasks are spread over clients by `index`.
    pub fn get_client(&self, index: usize) -> SharedDelegateClient {
        self.clients[index % self.clients.len()].clone()
    }

    pub fn num_clients(&self) -> usize {
        self.clients.len()
    }

    pub fn get_joiner(&self) -> SharedGlobalTaskJoiner {
        self.joiner.clone()
    }

    pub fn get_threshold(&self) -> i64 {
        self.threshold
    }

    /// Returns the steal queue of this node, if it steals work.
    pub fn get_steal_queue(&self) -> Option<SharedStealQueue> {
        self.steal_queue.clone()
    }

    /// Checks whether the delegate server still serves some request queue.
    pub fn is_serving(&self) -> bool {
        self.server.is_active()
    }

    /// Checks whether the worker scheduler has nothing left to run and no task waits for anything.
    pub fn is_quiescent(&self) -> bool {
        self.scheduler.is_idle()
            && self.scheduler.num_blocked() == 0
            && self.server.num_pending() == 0
            && !self.steal_queue.as_ref().is_some_and(|queue: &SharedStealQueue| !queue.is_empty())
    }

    /// Messages in flight over the whole fabric.
    pub fn in_flight(&self) -> usize {
        self.endpoint.in_flight()
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Deref for SharedNode {
    type Target = Node;

    fn deref(&self) -> &Self::Target {
        self.0.deref()
    }
}

impl DerefMut for SharedNode {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.deref_mut()
    }
}

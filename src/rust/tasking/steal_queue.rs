// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Public ranges of global parallel loops.
//!
//! A node pushes the ranges that its parallel loops split off on top of its steal queue, and runs them from the top
//! whenever its worker has nothing else to do. An idle node asks a peer for work instead, and the peer hands over the
//! range at the bottom of its queue, which is the oldest and largest one. A range stays registered with the joiner of
//! the node that pushed it: whoever runs it signals that node once the range and everything it spawned locally is
//! done.
//!
//! Every node runs the same sequence of global loops, so a loop is identified by its rank in that sequence and the
//! thief runs a stolen range with its own copy of the loop body.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    runtime::{
        fail::Fail,
        network::{
            Endpoint,
            Envelope,
            Message,
        },
        scheduler::SharedScheduler,
        types::NodeId,
        SharedObject,
    },
    tasking::{
        joiner::SharedGlobalTaskJoiner,
        parallel_for::{
            async_parallel_for,
            LoopBody,
            PublicSpawn,
        },
    },
};
use ::futures::future::LocalBoxFuture;
use ::std::{
    collections::VecDeque,
    ops::{
        Deref,
        DerefMut,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Range of a global loop that any node may run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublicRange {
    pub loop_id: u64,
    pub start: i64,
    pub iterations: i64,
}

/// Global loop that this node currently takes part in.
struct ActiveLoop {
    id: u64,
    body: LoopBody,
    threshold: i64,
}

pub struct StealQueue {
    node: NodeId,
    scheduler: SharedScheduler,
    joiner: SharedGlobalTaskJoiner,
    endpoint: Endpoint,
    /// Newest range at the back.
    ranges: VecDeque<PublicRange>,
    active: Option<ActiveLoop>,
    next_loop_id: u64,
    /// Next peer to ask for work.
    next_victim: usize,
    steal_in_flight: bool,
    /// Steal requests that came back empty in a row. Stealing stops once every peer turned this node down.
    failed_steals: usize,
    num_stolen: u64,
    num_given: u64,
}

#[derive(Clone)]
pub struct SharedStealQueue(SharedObject<StealQueue>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl SharedStealQueue {
    pub fn new(scheduler: SharedScheduler, joiner: SharedGlobalTaskJoiner, endpoint: Endpoint) -> Self {
        let node: NodeId = endpoint.get_node_id();
        let next_victim: usize = (usize::from(node) + 1) % endpoint.num_nodes();
        Self(SharedObject::new(StealQueue {
            node,
            scheduler,
            joiner,
            endpoint,
            ranges: VecDeque::new(),
            active: None,
            next_loop_id: 0,
            next_victim,
            steal_in_flight: false,
            failed_steals: 0,
            num_stolen: 0,
            num_given: 0,
        }))
    }

    /// Makes `body` the loop that public ranges of this node belong to. Returns the identifier of the loop.
    pub fn begin_loop(&mut self, body: LoopBody, threshold: i64) -> Result<u64, Fail> {
        if let Some(active) = self.active.as_ref() {
            let cause: String = format!("global loops cannot be nested (active={:?})", active.id);
            error!("begin_loop(): {}", cause);
            return Err(Fail::new(libc::EBUSY, &cause));
        }
        let id: u64 = self.next_loop_id;
        self.next_loop_id += 1;
        self.failed_steals = 0;
        self.active = Some(ActiveLoop { id, body, threshold });
        debug!("begin_loop(): {} runs loop {}", self.node, id);
        Ok(id)
    }

    /// Leaves the current loop. Every range pushed during the loop ran by then, since the joiner waited for them.
    pub fn end_loop(&mut self) {
        assert!(
            self.ranges.is_empty(),
            "end_loop(): {} left {} public range(s) behind",
            self.node,
            self.ranges.len()
        );
        self.active = None;
    }

    /// Makes a range of the current loop public. The caller has registered it with the joiner already.
    pub fn push(&mut self, start: i64, iterations: i64) -> Result<(), Fail> {
        let loop_id: u64 = match self.active.as_ref() {
            Some(active) => active.id,
            None => {
                let cause: String = format!("no loop is running (start={:?}, iterations={:?})", start, iterations);
                error!("push(): {}", cause);
                return Err(Fail::new(libc::EINVAL, &cause));
            },
        };
        trace!("push(): {} {}+{}", self.node, start, iterations);
        self.ranges.push_back(PublicRange {
            loop_id,
            start,
            iterations,
        });
        Ok(())
    }

    /// Runs the newest public range if the worker is idle, or else asks a peer for one.
    pub fn poll(&mut self) -> Result<(), Fail> {
        if !self.scheduler.is_idle() {
            return Ok(());
        }
        match self.ranges.pop_back() {
            Some(range) => {
                let node: NodeId = self.node;
                self.run(range, node)
            },
            None => self.try_steal(),
        }
    }

    fn try_steal(&mut self) -> Result<(), Fail> {
        let num_peers: usize = self.endpoint.num_nodes() - 1;
        if self.active.is_none() || self.steal_in_flight || num_peers == 0 || self.failed_steals >= num_peers {
            return Ok(());
        }
        if self.next_victim == usize::from(self.node) {
            self.next_victim = (self.next_victim + 1) % self.endpoint.num_nodes();
        }
        let victim: NodeId = NodeId(self.next_victim as u16);
        self.next_victim = (self.next_victim + 1) % self.endpoint.num_nodes();

        trace!("try_steal(): {} asks {}", self.node, victim);
        self.endpoint.send(victim, Message::StealRequest)?;
        self.steal_in_flight = true;
        Ok(())
    }

    /// Handles a message received on the steal port.
    pub fn handle_message(&mut self, envelope: Envelope) -> Result<(), Fail> {
        match envelope.message {
            Message::StealRequest => match self.ranges.pop_front() {
                Some(range) => {
                    debug!("handle_message(): {} gives {:?} to {}", self.node, range, envelope.source);
                    self.num_given += 1;
                    let reply: Message = Message::StealReply {
                        loop_id: range.loop_id,
                        start: range.start,
                        iterations: range.iterations,
                    };
                    self.endpoint.send(envelope.source, reply)
                },
                None => self.endpoint.send(envelope.source, Message::StealFail),
            },
            Message::StealReply {
                loop_id,
                start,
                iterations,
            } => {
                self.steal_in_flight = false;
                self.failed_steals = 0;
                self.num_stolen += 1;
                let range: PublicRange = PublicRange {
                    loop_id,
                    start,
                    iterations,
                };
                self.run(range, envelope.source)
            },
            Message::StealFail => {
                self.steal_in_flight = false;
                self.failed_steals += 1;
                Ok(())
            },
            other => panic!("handle_message(): unexpected message on steal port ({:?})", other),
        }
    }

    /// Spawns a task that runs `range` and then signals the joiner of `origin`, which registered it.
    fn run(&mut self, range: PublicRange, origin: NodeId) -> Result<(), Fail> {
        let (body, threshold): (LoopBody, i64) = match self.active.as_ref() {
            Some(active) if active.id == range.loop_id => (active.body.clone(), active.threshold),
            _ => {
                let cause: String = format!("range of a loop that is not running (range={:?})", range);
                error!("run(): {}", cause);
                return Err(Fail::new(libc::EINVAL, &cause));
            },
        };

        let nested: LocalBoxFuture<'static, Result<(), Fail>> =
            async_parallel_for(range.start, range.iterations, threshold, body, PublicSpawn::new(self.clone()));
        let mut joiner: SharedGlobalTaskJoiner = self.joiner.clone();
        let mut scheduler: SharedScheduler = self.scheduler.clone();
        scheduler.spawn(&format!("public-{}+{}", range.start, range.iterations), async move {
            if let Err(e) = nested.await {
                error!("run(): {:?}", e);
            }
            if let Err(e) = joiner.remote_signal_node(origin) {
                error!("run(): failed to signal {} ({:?})", origin, e);
            }
        });
        Ok(())
    }

    pub fn get_joiner(&self) -> SharedGlobalTaskJoiner {
        self.joiner.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Number of ranges this node took from peers, over every loop.
    pub fn num_stolen(&self) -> u64 {
        self.num_stolen
    }

    /// Number of ranges peers took from this node, over every loop.
    pub fn num_given(&self) -> u64 {
        self.num_given
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Deref for SharedStealQueue {
    type Target = StealQueue;

    fn deref(&self) -> &Self::Target {
        self.0.deref()
    }
}

impl DerefMut for SharedStealQueue {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.deref_mut()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

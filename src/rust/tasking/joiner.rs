// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Cluster-wide completion detection for dynamically spawned tasks.
//!
//! Every node counts the tasks that were registered locally and did not signal yet. A node whose count drops to zero
//! while some task waits for the join phase tells the coordinator that it went idle (`Enter`). A node that finds new
//! work after it went idle takes its vote back (`Cancel`) and waits for the coordinator to acknowledge it before
//! going on. The coordinator wakes every node once all of them are idle at the same time.
//!
//! The coordinator is a single designated node. There is no fault tolerance.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    memory::{
        GlobalAddress,
        Operation,
        Segment,
    },
    network::{
        Endpoint,
        Envelope,
        Message,
    },
    scheduler::{
        SharedScheduler,
        TaskId,
    },
    types::{
        NodeId,
        Word,
    },
    SharedObject,
};
use ::std::ops::{
    Deref,
    DerefMut,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Global task joiner of one node.
pub struct GlobalTaskJoiner {
    node: NodeId,
    coordinator: NodeId,
    scheduler: SharedScheduler,
    endpoint: Endpoint,
    /// Target of feed-forward operations.
    segment: Segment,

    /// Tasks registered on this node that did not signal yet.
    outstanding: usize,
    /// This node told the coordinator that it is idle.
    enter_called: bool,
    /// An idle notification came up while a cancel was in flight.
    enter_deferred: bool,
    cancel_in_flight: bool,
    global_done: bool,
    waiter: Option<TaskId>,
    cancel_waiter: Option<TaskId>,
    reset_waiter: Option<TaskId>,
    /// Number of completed reset barriers.
    resets_released: u64,

    /// Coordinator only: nodes that are not idle.
    nodes_outstanding: usize,
    /// Coordinator only: nodes that arrived at the current reset barrier.
    reset_arrivals: usize,

    /// Idle votes that this node took back.
    num_cancels_sent: u64,
    /// Coordinator only: idle votes taken back by any node.
    num_cancels_received: u64,
}

#[derive(Clone)]
pub struct SharedGlobalTaskJoiner(SharedObject<GlobalTaskJoiner>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl SharedGlobalTaskJoiner {
    pub fn new(coordinator: NodeId, scheduler: SharedScheduler, endpoint: Endpoint, segment: Segment) -> Self {
        Self(SharedObject::new(GlobalTaskJoiner {
            node: endpoint.get_node_id(),
            coordinator,
            scheduler,
            endpoint,
            segment,
            outstanding: 0,
            enter_called: false,
            enter_deferred: false,
            cancel_in_flight: false,
            global_done: false,
            waiter: None,
            cancel_waiter: None,
            reset_waiter: None,
            resets_released: 0,
            nodes_outstanding: 0,
            reset_arrivals: 0,
            num_cancels_sent: 0,
            num_cancels_received: 0,
        }))
    }

    fn is_coordinator(&self) -> bool {
        self.node == self.coordinator
    }

    fn current_task(&self, caller: &str) -> TaskId {
        match self.scheduler.current_task() {
            Some(task_id) => task_id,
            None => panic!("{}(): must be called from a task", caller),
        }
    }

    /// Starts a new join phase. Every node must call this, as it ends with a barrier across the cluster.
    pub async fn reset(&mut self) -> Result<(), Fail> {
        trace!("reset(): {}", self.node);
        self.outstanding = 0;
        self.enter_called = false;
        self.enter_deferred = false;
        self.cancel_in_flight = false;
        self.global_done = false;
        self.waiter = None;
        if self.is_coordinator() {
            self.nodes_outstanding = self.endpoint.num_nodes();
        }

        let target: u64 = self.resets_released + 1;
        self.endpoint.send(self.coordinator, Message::ResetArrive)?;
        self.reset_waiter = Some(self.current_task("reset"));
        let scheduler: SharedScheduler = self.scheduler.clone();
        while self.resets_released < target {
            scheduler.suspend().await;
        }
        self.reset_waiter = None;
        Ok(())
    }

    /// Accounts for one more task on this node. If this node already told the coordinator that it is idle, the
    /// calling task waits until the coordinator took that back.
    pub async fn register_task(&mut self) -> Result<(), Fail> {
        self.outstanding += 1;
        trace!("register_task(): {} outstanding={}", self.node, self.outstanding);
        if self.outstanding == 1 && self.enter_called && !self.cancel_in_flight {
            self.send_cancel().await?;
        }
        Ok(())
    }

    /// Accounts for the completion of a registered task.
    pub fn signal(&mut self) -> Result<(), Fail> {
        assert!(
            self.outstanding > 0,
            "signal(): too many calls to signal() on {} (outstanding={})",
            self.node,
            self.outstanding
        );
        self.outstanding -= 1;
        trace!("signal(): {} outstanding={}", self.node, self.outstanding);

        // The task that waits for the join phase is not counted, so it may still register work. If nobody waits yet,
        // the idle notification is left to wait().
        if self.outstanding == 0 && self.waiter.is_some() {
            self.send_enter()?;
        }
        Ok(())
    }

    /// Waits until every task registered anywhere in the cluster has signalled.
    pub async fn wait(&mut self) -> Result<(), Fail> {
        if self.global_done {
            return Ok(());
        }
        if !self.cancel_in_flight && self.outstanding == 0 && !self.enter_called {
            debug!("wait(): no local work on {}, going idle", self.node);
            self.send_enter()?;
        }

        self.waiter = Some(self.current_task("wait"));
        let scheduler: SharedScheduler = self.scheduler.clone();
        while !self.global_done {
            scheduler.suspend().await;
        }
        self.waiter = None;
        assert!(!self.cancel_in_flight, "wait(): woken with a cancel in flight");
        assert!(self.outstanding == 0, "wait(): woken with outstanding tasks");
        Ok(())
    }

    /// Signals the joiner of `node`.
    pub fn remote_signal_node(&mut self, node: NodeId) -> Result<(), Fail> {
        if node == self.node {
            self.signal()
        } else {
            trace!("remote_signal_node(): {} -> {}", self.node, node);
            self.endpoint.send(node, Message::Signal)
        }
    }

    /// Adds `delta` to the target word without waiting for it. The join phase does not complete before the update
    /// is applied.
    pub async fn ff_delegate_add(&mut self, address: GlobalAddress, delta: Word) -> Result<(), Fail> {
        self.feed_forward(Operation::FetchAdd, address, delta).await
    }

    /// Writes `value` in the target word without waiting for it. The join phase does not complete before the update
    /// is applied.
    pub async fn ff_delegate_write(&mut self, address: GlobalAddress, value: Word) -> Result<(), Fail> {
        self.feed_forward(Operation::Write, address, value).await
    }

    async fn feed_forward(&mut self, operation: Operation, address: GlobalAddress, data: Word) -> Result<(), Fail> {
        self.register_task().await?;
        if address.get_node() == self.node {
            self.segment.execute(operation, address.get_offset(), data, 0);
            self.signal()
        } else {
            let message: Message = Message::FeedForward {
                operation,
                offset: address.get_offset(),
                data,
            };
            self.endpoint.send(address.get_node(), message)
        }
    }

    /// Takes back the idle notification of this node and waits for the coordinator to acknowledge it.
    async fn send_cancel(&mut self) -> Result<(), Fail> {
        debug!("send_cancel(): {} found new work", self.node);
        self.cancel_in_flight = true;
        self.enter_called = false;
        self.num_cancels_sent += 1;
        self.endpoint.send(self.coordinator, Message::Cancel)?;

        self.cancel_waiter = Some(self.current_task("register_task"));
        let scheduler: SharedScheduler = self.scheduler.clone();
        while self.cancel_in_flight {
            scheduler.suspend().await;
        }
        self.cancel_waiter = None;
        assert!(self.outstanding > 0, "send_cancel(): cancelled without outstanding tasks");
        Ok(())
    }

    /// Tells the coordinator that this node is idle.
    fn send_enter(&mut self) -> Result<(), Fail> {
        if self.cancel_in_flight {
            self.enter_deferred = true;
            return Ok(());
        }
        trace!("send_enter(): {} is idle", self.node);
        self.enter_called = true;
        self.endpoint.send(self.coordinator, Message::Enter)
    }

    /// Handles a message received on the joiner port.
    pub fn handle_message(&mut self, envelope: Envelope) -> Result<(), Fail> {
        match envelope.message {
            Message::Enter => self.handle_enter(envelope.source),
            Message::Cancel => self.handle_cancel(envelope.source),
            Message::CancelAck => {
                self.cancel_in_flight = false;
                if let Some(task_id) = self.cancel_waiter {
                    self.scheduler.wake(task_id);
                }
                if self.enter_deferred && self.outstanding == 0 {
                    self.enter_deferred = false;
                    self.send_enter()?;
                }
                Ok(())
            },
            Message::Wake => {
                self.handle_wake();
                Ok(())
            },
            Message::Signal => self.signal(),
            Message::ResetArrive => self.handle_reset_arrive(),
            Message::ResetRelease => {
                self.resets_released += 1;
                if let Some(task_id) = self.reset_waiter {
                    self.scheduler.wake(task_id);
                }
                Ok(())
            },
            Message::FeedForward {
                operation,
                offset,
                data,
            } => {
                self.segment.execute(operation, offset, data, 0);
                self.remote_signal_node(envelope.source)
            },
            other => panic!("handle_message(): unexpected message on joiner port ({:?})", other),
        }
    }

    fn handle_enter(&mut self, source: NodeId) -> Result<(), Fail> {
        assert!(self.is_coordinator(), "handle_enter(): {} is not the coordinator", self.node);
        assert!(
            self.nodes_outstanding > 0,
            "handle_enter(): {} entered with no node outstanding",
            source
        );
        self.nodes_outstanding -= 1;
        debug!("handle_enter(): {} is idle, nodes_outstanding={}", source, self.nodes_outstanding);
        if self.nodes_outstanding == 0 {
            debug!("handle_enter(): every node is idle");
            self.endpoint.broadcast(Message::Wake)?;
        }
        Ok(())
    }

    fn handle_cancel(&mut self, source: NodeId) -> Result<(), Fail> {
        assert!(self.is_coordinator(), "handle_cancel(): {} is not the coordinator", self.node);
        self.nodes_outstanding += 1;
        self.num_cancels_received += 1;
        debug!("handle_cancel(): {} is busy again, nodes_outstanding={}", source, self.nodes_outstanding);
        self.endpoint.send(source, Message::CancelAck)
    }

    fn handle_wake(&mut self) {
        assert!(!self.global_done, "handle_wake(): {} woken twice", self.node);
        assert!(
            self.outstanding == 0,
            "handle_wake(): {} woken with outstanding tasks (outstanding={})",
            self.node,
            self.outstanding
        );
        self.enter_called = false;
        self.global_done = true;
        if let Some(task_id) = self.waiter {
            self.scheduler.wake(task_id);
        }
    }

    fn handle_reset_arrive(&mut self) -> Result<(), Fail> {
        assert!(self.is_coordinator(), "handle_reset_arrive(): {} is not the coordinator", self.node);
        self.reset_arrivals += 1;
        if self.reset_arrivals == self.endpoint.num_nodes() {
            self.reset_arrivals = 0;
            self.endpoint.broadcast(Message::ResetRelease)?;
        }
        Ok(())
    }

    pub fn get_node_id(&self) -> NodeId {
        self.node
    }

    pub fn num_nodes(&self) -> usize {
        self.endpoint.num_nodes()
    }

    pub fn num_outstanding(&self) -> usize {
        self.outstanding
    }

    /// Checks whether the current join phase completed.
    pub fn is_done(&self) -> bool {
        self.global_done
    }

    /// Coordinator only: number of nodes that are not idle.
    pub fn num_nodes_outstanding(&self) -> usize {
        self.nodes_outstanding
    }

    /// Number of times this node took back its idle vote, over every join phase.
    pub fn num_cancels_sent(&self) -> u64 {
        self.num_cancels_sent
    }

    /// Coordinator only: number of idle votes taken back, over every join phase.
    pub fn num_cancels_received(&self) -> u64 {
        self.num_cancels_received
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Deref for SharedGlobalTaskJoiner {
    type Target = GlobalTaskJoiner;

    fn deref(&self) -> &Self::Target {
        self.0.deref()
    }
}

impl DerefMut for SharedGlobalTaskJoiner {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.deref_mut()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

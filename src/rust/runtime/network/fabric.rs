// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    network::{
        Envelope,
        Message,
        Port,
        NUM_PORTS,
    },
    types::NodeId,
};
use ::crossbeam_channel::{
    Receiver,
    Sender,
    TryRecvError,
};
use ::std::sync::{
    atomic::{
        AtomicUsize,
        Ordering,
    },
    Arc,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Mailboxes of every node.
pub struct Fabric {
    endpoints: Vec<Endpoint>,
}

/// Attachment point of one node to the fabric. Clones share the same mailboxes.
#[derive(Clone)]
pub struct Endpoint {
    local: NodeId,
    /// Senders to every port of every node, indexed by node.
    peers: Arc<Vec<[Sender<Envelope>; NUM_PORTS]>>,
    inbox: [Receiver<Envelope>; NUM_PORTS],
    /// Messages sent but not yet received, over the whole fabric.
    in_flight: Arc<AtomicUsize>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Fabric {
    /// Creates a fabric connecting `num_nodes` nodes.
    pub fn new(num_nodes: usize) -> Result<Self, Fail> {
        if num_nodes == 0 || num_nodes > u16::MAX as usize {
            let cause: String = format!("invalid number of nodes (num_nodes={:?})", num_nodes);
            error!("new(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }

        let mut senders: Vec<[Sender<Envelope>; NUM_PORTS]> = Vec::with_capacity(num_nodes);
        let mut receivers: Vec<[Receiver<Envelope>; NUM_PORTS]> = Vec::with_capacity(num_nodes);
        for _ in 0..num_nodes {
            let (delegate_tx, delegate_rx): (Sender<Envelope>, Receiver<Envelope>) = crossbeam_channel::unbounded();
            let (joiner_tx, joiner_rx): (Sender<Envelope>, Receiver<Envelope>) = crossbeam_channel::unbounded();
            let (steal_tx, steal_rx): (Sender<Envelope>, Receiver<Envelope>) = crossbeam_channel::unbounded();
            senders.push([delegate_tx, joiner_tx, steal_tx]);
            receivers.push([delegate_rx, joiner_rx, steal_rx]);
        }

        let peers: Arc<Vec<[Sender<Envelope>; NUM_PORTS]>> = Arc::new(senders);
        let in_flight: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
        let endpoints: Vec<Endpoint> = receivers
            .into_iter()
            .enumerate()
            .map(|(i, inbox)| Endpoint {
                local: NodeId(i as u16),
                peers: peers.clone(),
                inbox,
                in_flight: in_flight.clone(),
            })
            .collect();

        Ok(Self { endpoints })
    }

    /// Hands out the endpoints, in node order.
    pub fn into_endpoints(self) -> Vec<Endpoint> {
        self.endpoints
    }
}

impl Endpoint {
    pub fn get_node_id(&self) -> NodeId {
        self.local
    }

    pub fn num_nodes(&self) -> usize {
        self.peers.len()
    }

    /// Sends `message` to the port of `destination` that serves it.
    pub fn send(&self, destination: NodeId, message: Message) -> Result<(), Fail> {
        let port: Port = message.get_port();
        let sender: &Sender<Envelope> = match self.peers.get(usize::from(destination)) {
            Some(ports) => &ports[port as usize],
            None => {
                let cause: String = format!("unknown destination (destination={:?})", destination);
                error!("send(): {}", cause);
                return Err(Fail::new(libc::EHOSTUNREACH, &cause));
            },
        };

        trace!("send(): {} -> {} {:?}", self.local, destination, message);
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let envelope: Envelope = Envelope {
            source: self.local,
            message,
        };
        if let Err(e) = sender.send(envelope) {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            let cause: String = format!("destination is gone (destination={:?}, message={:?})", destination, e.0);
            error!("send(): {}", cause);
            return Err(Fail::new(libc::ECONNRESET, &cause));
        }
        Ok(())
    }

    /// Sends `message` to every node, including this one.
    pub fn broadcast(&self, message: Message) -> Result<(), Fail> {
        for node in 0..self.num_nodes() {
            self.send(NodeId(node as u16), message.clone())?;
        }
        Ok(())
    }

    /// Takes the next message waiting on `port`, if any.
    pub fn try_recv(&self, port: Port) -> Option<Envelope> {
        match self.inbox[port as usize].try_recv() {
            Ok(envelope) => {
                self.in_flight.fetch_sub(1, Ordering::AcqRel);
                Some(envelope)
            },
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Number of messages sent but not yet received anywhere in the fabric.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

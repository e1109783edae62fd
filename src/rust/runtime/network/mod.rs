// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! In-process active-message transport between the nodes of a cluster.
//!
//! Messages are plain Rust values moved through channels. There is no wire format.

mod fabric;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    memory::Operation,
    types::{
        NodeId,
        Word,
    },
};

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::fabric::{
    Endpoint,
    Fabric,
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Number of ports of an endpoint.
pub const NUM_PORTS: usize = 3;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Mailbox of a node. Each port is drained by a different component.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Port {
    /// Served by the delegate server.
    Delegate = 0,
    /// Served by the global task joiner.
    Joiner = 1,
    /// Served by the steal queue.
    Steal = 2,
}

/// Active messages exchanged between nodes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// Memory operation forwarded to the owner of the target word.
    DelegateRequest {
        id: usize,
        operation: Operation,
        offset: usize,
        data: Word,
        aux: Word,
    },
    /// Result of a [Message::DelegateRequest].
    DelegateResponse { id: usize, value: Word },
    /// Sender went idle.
    Enter,
    /// Sender found new work after it went idle.
    Cancel,
    /// Coordinator counted a [Message::Cancel].
    CancelAck,
    /// All nodes are idle.
    Wake,
    /// Signals the joiner of the receiver on behalf of a task that ran elsewhere.
    Signal,
    /// Sender is done resetting its joiner.
    ResetArrive,
    /// Every node is done resetting its joiner.
    ResetRelease,
    /// Memory update whose completion is reported to the joiner of the sender.
    FeedForward {
        operation: Operation,
        offset: usize,
        data: Word,
    },
    /// Sender is idle and asks for a range of the current parallel loop.
    StealRequest,
    /// Range handed over to the thief. It stays registered with the joiner of the sender.
    StealReply { loop_id: u64, start: i64, iterations: i64 },
    /// Sender had no range to give away.
    StealFail,
}

/// A message and where it comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub source: NodeId,
    pub message: Message,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Message {
    /// Port that serves the target message.
    pub fn get_port(&self) -> Port {
        match self {
            Message::DelegateRequest { .. } | Message::DelegateResponse { .. } => Port::Delegate,
            Message::StealRequest | Message::StealReply { .. } | Message::StealFail => Port::Steal,
            _ => Port::Joiner,
        }
    }
}

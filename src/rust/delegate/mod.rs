// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Split-phase remote memory accesses.
//!
//! A task issues a memory operation through a [SharedDelegateClient], which either runs it in place (local region) or
//! pushes a descriptor in a ring buffer drained by the [SharedDelegateServer] of the node. The task then yields until
//! the descriptor is full.

mod client;
mod server;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    collections::ring::{
        Consumer,
        Producer,
    },
    runtime::memory::MemoryDescriptor,
};
use ::std::sync::Arc;

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::{
    client::{
        SharedDelegateClient,
        Ticket,
    },
    server::SharedDelegateServer,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Producer end of a request queue.
pub type RequestProducer = Producer<Arc<MemoryDescriptor>>;

/// Consumer end of a request queue.
pub type RequestConsumer = Consumer<Arc<MemoryDescriptor>>;

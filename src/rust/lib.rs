// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#![cfg_attr(feature = "strict", deny(warnings))]
#![deny(clippy::all)]

#[macro_use]
extern crate log;

#[macro_use]
extern crate cfg_if;

pub mod collections;
pub mod delegate;
pub mod node;
pub mod runtime;
pub mod tasking;

pub use self::{
    delegate::{
        SharedDelegateClient,
        SharedDelegateServer,
        Ticket,
    },
    node::{
        cluster::Cluster,
        config::Config,
        SharedNode,
    },
    runtime::{
        fail::Fail,
        memory::{
            GlobalAddress,
            Operation,
        },
        scheduler::{
            SharedScheduler,
            TaskId,
        },
        types::{
            NodeId,
            Word,
        },
    },
    tasking::{
        joiner::SharedGlobalTaskJoiner,
        parallel_for::{
            async_parallel_for,
            global_async_parallel_for,
            LoopBody,
        },
        steal_queue::SharedStealQueue,
    },
};

//======================================================================================================================
// Macros
//======================================================================================================================

/// Ensures that two expressions are equal, bailing out of the enclosing function with an [anyhow::Error] otherwise.
#[macro_export]
macro_rules! ensure_eq {
    ($left:expr, $right:expr $(,)?) => {{
        match (&$left, &$right) {
            (left_val, right_val) => {
                if !(*left_val == *right_val) {
                    ::anyhow::bail!(
                        "ensure failed: `(left == right)` left: `{:?}`, right: `{:?}`",
                        left_val,
                        right_val
                    );
                }
            },
        }
    }};
}

/// Ensures that two expressions are not equal, bailing out of the enclosing function with an [anyhow::Error]
/// otherwise.
#[macro_export]
macro_rules! ensure_neq {
    ($left:expr, $right:expr $(,)?) => {{
        match (&$left, &$right) {
            (left_val, right_val) => {
                if *left_val == *right_val {
                    ::anyhow::bail!(
                        "ensure failed: `(left != right)` left: `{:?}`, right: `{:?}`",
                        left_val,
                        right_val
                    );
                }
            },
        }
    }};
}

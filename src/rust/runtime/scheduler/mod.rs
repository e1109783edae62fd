// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod barrier;
pub mod coroutine;
mod scheduler;
mod task;
mod yielder;

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::{
    barrier::SharedBarrier,
    coroutine::{
        Coroutine,
        CoroutineContext,
        CoroutineState,
    },
    scheduler::{
        Scheduler,
        SharedScheduler,
    },
    task::{
        TaskId,
        TaskState,
    },
    yielder::{
        Suspend,
        Yield,
    },
};

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    scheduler::{
        scheduler::SharedScheduler,
        task::TaskId,
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

/// A reusable rendezvous for a fixed number of tasks of the same scheduler.
pub struct Barrier {
    scheduler: SharedScheduler,
    /// Number of tasks that must arrive before any of them leaves.
    required: usize,
    waiting: Vec<TaskId>,
    /// Number of times the barrier was released.
    generation: u64,
}

#[derive(Clone)]
pub struct SharedBarrier(SharedObject<Barrier>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl SharedBarrier {
    pub fn new(scheduler: SharedScheduler, required: usize) -> Self {
        assert!(required > 0, "new(): a barrier must require at least one task");
        Self(SharedObject::new(Barrier {
            scheduler,
            required,
            waiting: Vec::with_capacity(required),
            generation: 0,
        }))
    }

    /// Blocks the calling task until `required` tasks have arrived. The last one to arrive moves every waiting task
    /// back onto the ready queue, resets the barrier and yields.
    pub async fn block(&mut self) {
        let me: TaskId = match self.scheduler.current_task() {
            Some(me) => me,
            None => panic!("block(): must be called from a task"),
        };

        if self.waiting.len() + 1 == self.required {
            trace!("block(): releasing generation {}", self.generation);
            let waiting: Vec<TaskId> = self.waiting.drain(..).collect();
            self.generation += 1;
            let mut scheduler: SharedScheduler = self.scheduler.clone();
            for task_id in waiting {
                scheduler.wake(task_id);
            }
            scheduler.yield_now().await;
        } else {
            self.waiting.push(me);
            let generation: u64 = self.generation;
            let scheduler: SharedScheduler = self.scheduler.clone();
            while self.generation == generation {
                scheduler.suspend().await;
            }
        }
    }

    pub fn num_waiting(&self) -> usize {
        self.waiting.len()
    }

    pub fn get_generation(&self) -> u64 {
        self.generation
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Deref for SharedBarrier {
    type Target = Barrier;

    fn deref(&self) -> &Self::Target {
        self.0.deref()
    }
}

impl DerefMut for SharedBarrier {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.deref_mut()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    collections::intrusive_queue::IntrusivelyQueueable,
    runtime::{
        scheduler::coroutine::Coroutine,
        types::Word,
    },
};
use ::std::{
    cell::{
        Cell,
        RefCell,
    },
    fmt,
    ptr::NonNull,
    task::{
        Context,
        Poll,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Externally visible task identifier.
#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct TaskId(pub u64);

/// Lifecycle of a task. A task is in exactly one of these states at a time.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TaskState {
    /// Linked in the ready queue of its scheduler.
    Ready,
    /// Currently being resumed by its scheduler.
    Running,
    /// Off-queue, waiting for a wake.
    Blocked,
    /// Body returned. The exit value waits to be reclaimed.
    Exited,
}

/// A coroutine plus the bookkeeping its scheduler needs.
pub struct Task {
    id: TaskId,
    /// Taken out while the task runs, so that the body may freely re-enter the scheduler.
    coroutine: RefCell<Option<Coroutine<Word>>>,
    state: Cell<TaskState>,
    /// Wakes that have not yet been consumed by a suspension.
    permits: Cell<usize>,
    /// Stashed exit value.
    exit_value: Cell<Option<Word>>,
    /// Task waiting in a join on this one.
    join_waiter: Cell<Option<TaskId>>,
    /// Detached tasks are reclaimed by the scheduler as soon as they exit.
    detached: bool,
    /// Intrusive link for the ready queue.
    next: Cell<Option<NonNull<Task>>>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Task {
    pub fn new(id: TaskId, coroutine: Coroutine<Word>, detached: bool) -> Self {
        Self {
            id,
            coroutine: RefCell::new(Some(coroutine)),
            state: Cell::new(TaskState::Ready),
            permits: Cell::new(0),
            exit_value: Cell::new(None),
            join_waiter: Cell::new(None),
            detached,
            next: Cell::new(None),
        }
    }

    pub fn get_id(&self) -> TaskId {
        self.id
    }

    pub fn get_name(&self) -> String {
        match self.coroutine.borrow().as_ref() {
            Some(coroutine) => coroutine.get_name().to_string(),
            None => format!("task-{}", self.id.0),
        }
    }

    pub fn get_state(&self) -> TaskState {
        self.state.get()
    }

    pub fn set_state(&self, state: TaskState) {
        self.state.set(state);
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }

    /// Records one wake.
    pub fn add_permit(&self) {
        self.permits.set(self.permits.get() + 1);
    }

    /// Consumes one wake, if any is pending.
    pub fn take_permit(&self) -> bool {
        match self.permits.get() {
            0 => false,
            n => {
                self.permits.set(n - 1);
                true
            },
        }
    }

    pub fn has_permit(&self) -> bool {
        self.permits.get() > 0
    }

    pub fn set_join_waiter(&self, waiter: TaskId) {
        if let Some(other) = self.join_waiter.replace(Some(waiter)) {
            if other != waiter {
                panic!("set_join_waiter(): task {:?} is already joined by {:?}", self.id, other);
            }
        }
    }

    pub fn take_join_waiter(&self) -> Option<TaskId> {
        self.join_waiter.take()
    }

    pub fn take_exit_value(&self) -> Option<Word> {
        self.exit_value.take()
    }

    /// Resumes the underlying coroutine once. On return the task is marked exited and its exit value is stashed.
    pub fn resume(&self, context: &mut Context) -> Poll<Word> {
        let mut coroutine: Coroutine<Word> = match self.coroutine.borrow_mut().take() {
            Some(coroutine) => coroutine,
            None => panic!("resume(): task {:?} is already running or has exited", self.id),
        };

        match coroutine.resume(context) {
            Poll::Ready(value) => {
                trace!("resume(): task {:?} ({:?}) exited with {:?}", self.id, coroutine.get_name(), value);
                self.exit_value.set(Some(value));
                self.state.set(TaskState::Exited);
                Poll::Ready(value)
            },
            Poll::Pending => {
                *self.coroutine.borrow_mut() = Some(coroutine);
                Poll::Pending
            },
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl From<u64> for TaskId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<TaskId> for u64 {
    fn from(value: TaskId) -> Self {
        value.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl IntrusivelyQueueable for Task {
    fn get_queue_next(&self) -> Option<NonNull<Self>> {
        self.next.get()
    }

    fn set_queue_next(&self, element: Option<NonNull<Self>>) {
        self.next.set(element);
    }
}

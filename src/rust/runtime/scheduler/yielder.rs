// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::scheduler::scheduler::{
    Disposition,
    SharedScheduler,
};
use ::std::{
    future::Future,
    pin::Pin,
    task::{
        Context,
        Poll,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Yield is a future that lets the currently running task go to the back of the ready queue. It completes the next
/// time the task is resumed.
pub struct Yield {
    scheduler: SharedScheduler,
    already_yielded: bool,
}

/// Suspend is a future that parks the currently running task until someone wakes it. A wake that was delivered
/// before the task suspended is consumed immediately.
pub struct Suspend {
    scheduler: SharedScheduler,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Yield {
    pub fn new(scheduler: SharedScheduler) -> Self {
        Self {
            scheduler,
            already_yielded: false,
        }
    }
}

impl Suspend {
    pub fn new(scheduler: SharedScheduler) -> Self {
        Self { scheduler }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Future for Yield {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _context: &mut Context) -> Poll<()> {
        let self_: &mut Self = self.get_mut();
        if self_.already_yielded {
            return Poll::Ready(());
        }
        self_.already_yielded = true;
        self_.scheduler.request(Disposition::Yield);
        Poll::Pending
    }
}

impl Future for Suspend {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _context: &mut Context) -> Poll<()> {
        let self_: &mut Self = self.get_mut();
        if self_.scheduler.take_current_permit() {
            return Poll::Ready(());
        }
        self_.scheduler.request(Disposition::Block);
        Poll::Pending
    }
}

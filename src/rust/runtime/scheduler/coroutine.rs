// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Restartable one-shot continuations.
//!
//! A [Coroutine] owns a pinned state machine in place of a stack. Control moves between the invoker and the coroutine
//! through a single transfer cell that the coroutine shares with the [CoroutineContext] handed to its body: the
//! invoker writes a value into the cell and resumes the coroutine, which runs until it either suspends (writing a
//! value back into the cell) or returns.
//!
//! [Coroutine::invoke] is the standalone entry point for symmetric transfer of values. The scheduler does not use it:
//! it builds task coroutines with [Coroutine::from_future] and drives them through [Coroutine::resume].

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::SharedObject;
use ::futures::{
    future::LocalBoxFuture,
    task::noop_waker_ref,
    FutureExt,
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

/// Outcome of invoking a coroutine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoroutineState<V> {
    /// The coroutine suspended itself, handing this value to the invoker.
    Suspended(V),
    /// The coroutine returned this value and cannot be invoked anymore.
    Exited(V),
}

/// Transfer cell shared between a coroutine and its body.
struct Transfer<V> {
    /// Value handed from the invoker to the coroutine.
    inbound: Option<V>,
    /// Value handed from the coroutine to the invoker.
    outbound: Option<V>,
}

/// Handle given to the body of a coroutine to suspend itself.
pub struct CoroutineContext<V> {
    transfer: SharedObject<Transfer<V>>,
}

/// Trampoline that lays down the body of a coroutine on its first invocation.
type Trampoline<V> = Box<dyn FnOnce(CoroutineContext<V>, V) -> LocalBoxFuture<'static, V>>;

/// Execution stage of a coroutine.
enum Stage<V> {
    NotStarted(Trampoline<V>),
    Running(LocalBoxFuture<'static, V>),
    Exited,
}

/// A unit of execution that can be suspended and resumed by explicit transfer of control.
pub struct Coroutine<V> {
    name: String,
    stage: Stage<V>,
    transfer: SharedObject<Transfer<V>>,
}

/// Future returned by [CoroutineContext::suspend].
struct SuspendPoint<V> {
    transfer: SharedObject<Transfer<V>>,
    value: Option<V>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl<V: 'static> Coroutine<V> {
    /// Creates a coroutine in not-yet-started form. The body runs on the first [Coroutine::invoke], receiving the
    /// invoked value.
    pub fn new<F, Fut>(name: &str, body: F) -> Self
    where
        F: FnOnce(CoroutineContext<V>, V) -> Fut + 'static,
        Fut: Future<Output = V> + 'static,
    {
        let trampoline: Trampoline<V> =
            Box::new(move |context: CoroutineContext<V>, value: V| body(context, value).boxed_local());
        Self {
            name: name.to_string(),
            stage: Stage::NotStarted(trampoline),
            transfer: SharedObject::new(Transfer {
                inbound: None,
                outbound: None,
            }),
        }
    }

    /// Creates a coroutine out of a future that does not exchange values with its invoker.
    pub fn from_future<F>(name: &str, future: F) -> Self
    where
        F: Future<Output = V> + 'static,
    {
        Self {
            name: name.to_string(),
            stage: Stage::Running(future.boxed_local()),
            transfer: SharedObject::new(Transfer {
                inbound: None,
                outbound: None,
            }),
        }
    }

    /// Transfers control and `value` into the target coroutine. Returns when the coroutine either suspends or exits.
    pub fn invoke(&mut self, value: V) -> CoroutineState<V> {
        match std::mem::replace(&mut self.stage, Stage::Exited) {
            Stage::NotStarted(trampoline) => {
                let context: CoroutineContext<V> = CoroutineContext {
                    transfer: self.transfer.clone(),
                };
                self.stage = Stage::Running(trampoline(context, value));
            },
            Stage::Running(future) => {
                self.transfer.inbound = Some(value);
                self.stage = Stage::Running(future);
            },
            Stage::Exited => panic!("invoke(): coroutine {:?} has already exited", self.name),
        }

        let mut context: Context = Context::from_waker(noop_waker_ref());
        match self.resume(&mut context) {
            Poll::Ready(value) => CoroutineState::Exited(value),
            Poll::Pending => match self.transfer.outbound.take() {
                Some(value) => CoroutineState::Suspended(value),
                None => panic!(
                    "invoke(): coroutine {:?} blocked outside of a suspension point",
                    self.name
                ),
            },
        }
    }

    /// Resumes the target coroutine within an existing task context. This is how schedulers drive coroutines that
    /// were built with [Coroutine::from_future].
    pub fn resume(&mut self, context: &mut Context) -> Poll<V> {
        let poll: Poll<V> = match &mut self.stage {
            Stage::Running(future) => future.as_mut().poll(context),
            Stage::NotStarted(_) => panic!("resume(): coroutine {:?} was never invoked", self.name),
            Stage::Exited => panic!("resume(): coroutine {:?} has already exited", self.name),
        };
        if poll.is_ready() {
            trace!("resume(): coroutine {:?} exited", self.name);
            self.stage = Stage::Exited;
        }
        poll
    }

    /// Returns the name of the target coroutine.
    pub fn get_name(&self) -> &str {
        &self.name
    }

    /// Checks whether the target coroutine has returned.
    pub fn is_exited(&self) -> bool {
        matches!(self.stage, Stage::Exited)
    }
}

impl<V> CoroutineContext<V> {
    /// Suspends the calling coroutine, handing `value` to its invoker. Resolves to the value of the next invocation.
    pub async fn suspend(&mut self, value: V) -> V {
        SuspendPoint {
            transfer: self.transfer.clone(),
            value: Some(value),
        }
        .await
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl<V> Unpin for SuspendPoint<V> {}

impl<V> Future for SuspendPoint<V> {
    type Output = V;

    fn poll(self: Pin<&mut Self>, _context: &mut Context) -> Poll<V> {
        let self_: &mut Self = self.get_mut();
        if let Some(value) = self_.value.take() {
            self_.transfer.outbound = Some(value);
            return Poll::Pending;
        }
        match self_.transfer.inbound.take() {
            Some(value) => Poll::Ready(value),
            None => Poll::Pending,
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::{
        Coroutine,
        CoroutineContext,
        CoroutineState,
    };
    use ::anyhow::Result;

    /// Builds a coroutine that accumulates the values it is invoked with until it receives a negative one.
    fn accumulator() -> Coroutine<i64> {
        Coroutine::new("accumulator", |mut context: CoroutineContext<i64>, first: i64| async move {
            let mut total: i64 = first;
            loop {
                let next: i64 = context.suspend(total).await;
                if next < 0 {
                    return total;
                }
                total += next;
            }
        })
    }

    #[test]
    fn invoke_transfers_values_both_ways() -> Result<()> {
        let mut coroutine: Coroutine<i64> = accumulator();

        crate::ensure_eq!(coroutine.invoke(1), CoroutineState::Suspended(1));
        crate::ensure_eq!(coroutine.invoke(2), CoroutineState::Suspended(3));
        crate::ensure_eq!(coroutine.invoke(4), CoroutineState::Suspended(7));
        crate::ensure_eq!(coroutine.is_exited(), false);
        crate::ensure_eq!(coroutine.invoke(-1), CoroutineState::Exited(7));
        crate::ensure_eq!(coroutine.is_exited(), true);

        Ok(())
    }

    #[test]
    fn body_does_not_run_before_first_invoke() -> Result<()> {
        let started: crate::runtime::SharedObject<bool> = crate::runtime::SharedObject::new(false);
        let mut flag: crate::runtime::SharedObject<bool> = started.clone();
        let mut coroutine: Coroutine<i64> = Coroutine::new("lazy", move |_context, value: i64| async move {
            *flag = true;
            value * 2
        });

        crate::ensure_eq!(*started, false);
        crate::ensure_eq!(coroutine.invoke(21), CoroutineState::Exited(42));
        crate::ensure_eq!(*started, true);

        Ok(())
    }

    #[test]
    #[should_panic]
    fn invoke_after_exit_is_fatal() {
        let mut coroutine: Coroutine<i64> = accumulator();
        coroutine.invoke(0);
        coroutine.invoke(-1);
        coroutine.invoke(1);
    }
}

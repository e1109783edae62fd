// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Implementation of our cooperative, single-threaded task scheduler.
//!
//! Tasks sit in an intrusive FIFO ready queue and are resumed one at a time. A task gives control back to the
//! scheduler only at explicit suspension points ([SharedScheduler::yield_now], [SharedScheduler::suspend],
//! [SharedScheduler::join] or a barrier), each of which leaves a [Disposition] telling the scheduler whether the task
//! goes back to the ready queue or off-queue. Tasks are resumed with a no-op waker: a blocked task only becomes ready
//! again through [Scheduler::wake].

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    collections::intrusive_queue::IntrusiveQueue,
    runtime::{
        scheduler::{
            coroutine::Coroutine,
            task::{
                Task,
                TaskId,
                TaskState,
            },
            yielder::{
                Suspend,
                Yield,
            },
        },
        types::Word,
        SharedObject,
    },
};
use ::futures::task::noop_waker_ref;
use ::std::{
    collections::HashMap,
    future::Future,
    ops::{
        Deref,
        DerefMut,
    },
    rc::Rc,
    task::{
        Context,
        Poll,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// What the running task asked for when it returned control to the scheduler.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Disposition {
    /// Go to the back of the ready queue.
    Yield,
    /// Leave the ready queue until woken.
    Block,
}

/// Task scheduler.
pub struct Scheduler {
    name: String,
    /// All tasks that were not yet reclaimed.
    tasks: HashMap<TaskId, Rc<Task>>,
    ready: IntrusiveQueue<Task>,
    /// Task being resumed, if any. `None` means we are in the master context.
    current: Option<Rc<Task>>,
    disposition: Option<Disposition>,
    next_id: u64,
    num_blocked: usize,
}

#[derive(Clone)]
pub struct SharedScheduler(SharedObject<Scheduler>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Scheduler {
    /// Creates a task in not-yet-started form and appends it to the ready queue. The task is not run.
    fn spawn_coroutine(&mut self, coroutine: Coroutine<Word>, detached: bool) -> TaskId {
        let task_id: TaskId = TaskId(self.next_id);
        self.next_id += 1;
        trace!(
            "spawn(): scheduler={:?}, task={:?}, name={:?}",
            self.name,
            task_id,
            coroutine.get_name()
        );

        let task: Rc<Task> = Rc::new(Task::new(task_id, coroutine, detached));
        self.tasks.insert(task_id, task.clone());
        self.ready.push_back(task);
        task_id
    }

    /// Spawns a detached task. It is reclaimed as soon as its body returns.
    pub fn spawn<F: Future<Output = ()> + 'static>(&mut self, name: &str, future: F) -> TaskId {
        let coroutine: Coroutine<Word> = Coroutine::from_future(name, async move {
            future.await;
            0
        });
        self.spawn_coroutine(coroutine, true)
    }

    /// Spawns a joinable task. Its exit value is stashed until reclaimed through [SharedScheduler::join] or
    /// [Scheduler::take_exit_value].
    pub fn spawn_with_exit<F: Future<Output = Word> + 'static>(&mut self, name: &str, future: F) -> TaskId {
        let coroutine: Coroutine<Word> = Coroutine::from_future(name, future);
        self.spawn_coroutine(coroutine, false)
    }

    fn get_task(&self, task_id: TaskId) -> Rc<Task> {
        match self.tasks.get(&task_id) {
            Some(task) => task.clone(),
            None => panic!("get_task(): unknown task (scheduler={:?}, task={:?})", self.name, task_id),
        }
    }

    /// Makes a task runnable again. If the task is not blocked, the wake is remembered and consumed by its next
    /// suspension.
    pub fn wake(&mut self, task_id: TaskId) {
        let task: Rc<Task> = self.get_task(task_id);
        match task.get_state() {
            TaskState::Blocked => {
                trace!("wake(): scheduler={:?}, task={:?}", self.name, task_id);
                task.add_permit();
                task.set_state(TaskState::Ready);
                self.num_blocked -= 1;
                self.ready.push_back(task);
            },
            TaskState::Ready | TaskState::Running => task.add_permit(),
            TaskState::Exited => trace!("wake(): task {:?} has already exited", task_id),
        }
    }

    /// Reclaims an exited joinable task, returning its exit value. Returns `None` if the task has not exited yet or is
    /// unknown.
    pub fn take_exit_value(&mut self, task_id: TaskId) -> Option<Word> {
        match self.tasks.get(&task_id) {
            Some(task) if task.get_state() == TaskState::Exited => {
                let value: Option<Word> = task.take_exit_value();
                self.tasks.remove(&task_id);
                value
            },
            _ => None,
        }
    }

    /// Returns the identifier of the running task, or `None` in the master context.
    pub fn current_task(&self) -> Option<TaskId> {
        self.current.as_ref().map(|task: &Rc<Task>| task.get_id())
    }

    /// Records what the running task asked for. A yield takes precedence over a block, so that a task that both
    /// yielded and suspended in the same step is not lost.
    pub(super) fn request(&mut self, disposition: Disposition) {
        if self.current.is_none() {
            panic!("request(): {:?} outside of a task (scheduler={:?})", disposition, self.name);
        }
        self.disposition = match self.disposition {
            Some(Disposition::Yield) => Some(Disposition::Yield),
            _ => Some(disposition),
        };
    }

    /// Consumes a pending wake of the running task.
    pub(super) fn take_current_permit(&mut self) -> bool {
        match self.current.as_ref() {
            Some(task) => task.take_permit(),
            None => panic!("take_current_permit(): no running task (scheduler={:?})", self.name),
        }
    }

    fn retire(&mut self, task: Rc<Task>) {
        if let Some(waiter) = task.take_join_waiter() {
            self.wake(waiter);
        }
        if task.is_detached() {
            self.tasks.remove(&task.get_id());
        }
    }

    /// Resumes every task that is ready at entry, once. Tasks that yield during this pass run on the next one.
    /// Returns the number of resumed tasks.
    pub fn run_once(&mut self) -> usize {
        if self.current.is_some() {
            panic!("run_once(): scheduler {:?} re-entered from a task", self.name);
        }

        let mut context: Context = Context::from_waker(noop_waker_ref());
        let budget: usize = self.ready.len();
        let mut resumed: usize = 0;
        while resumed < budget {
            let task: Rc<Task> = match self.ready.pop_front() {
                Some(task) => task,
                None => break,
            };
            resumed += 1;

            task.set_state(TaskState::Running);
            self.current = Some(task.clone());
            self.disposition = None;
            let poll: Poll<Word> = task.resume(&mut context);
            self.current = None;

            match poll {
                Poll::Ready(_) => self.retire(task),
                Poll::Pending => match self.disposition.take() {
                    Some(Disposition::Block) if !task.has_permit() => {
                        trace!("run_once(): task {:?} ({:?}) blocked", task.get_id(), task.get_name());
                        task.set_state(TaskState::Blocked);
                        self.num_blocked += 1;
                    },
                    _ => {
                        task.set_state(TaskState::Ready);
                        self.ready.push_back(task);
                    },
                },
            }
        }
        resumed
    }

    /// Runs until the ready queue empties. Returns the number of tasks left blocked, which are waiting on some event
    /// that must come from outside of this scheduler.
    pub fn run_until_idle(&mut self) -> usize {
        while !self.ready.is_empty() {
            self.run_once();
        }
        self.num_blocked
    }

    /// Runs until every task has exited. Tasks left blocked with an empty ready queue mean a deadlock.
    pub fn run_all(&mut self) {
        let num_blocked: usize = self.run_until_idle();
        assert!(
            num_blocked == 0,
            "run_all(): scheduler {:?} deadlocked with {} blocked task(s)",
            self.name,
            num_blocked
        );
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }

    /// Number of tasks that were not reclaimed yet.
    pub fn num_tasks(&self) -> usize {
        self.tasks.len()
    }

    pub fn num_ready(&self) -> usize {
        self.ready.len()
    }

    pub fn num_blocked(&self) -> usize {
        self.num_blocked
    }

    pub fn is_idle(&self) -> bool {
        self.ready.is_empty()
    }
}

impl SharedScheduler {
    pub fn new(name: &str) -> Self {
        Self(SharedObject::new(Scheduler {
            name: name.to_string(),
            tasks: HashMap::default(),
            ready: IntrusiveQueue::new(),
            current: None,
            disposition: None,
            next_id: 0,
            num_blocked: 0,
        }))
    }

    /// Sends the calling task to the back of the ready queue. With no other ready task, it is resumed right away.
    pub fn yield_now(&self) -> Yield {
        Yield::new(self.clone())
    }

    /// Parks the calling task until it is woken.
    pub fn suspend(&self) -> Suspend {
        Suspend::new(self.clone())
    }

    /// Waits until a joinable task has exited, reclaims it and returns its exit value.
    pub fn join(&self, task_id: TaskId) -> impl Future<Output = Word> {
        let mut scheduler: SharedScheduler = self.clone();
        async move {
            loop {
                let task: Rc<Task> = scheduler.get_task(task_id);
                if task.is_detached() {
                    panic!("join(): task {:?} is detached", task_id);
                }
                if task.get_state() == TaskState::Exited {
                    return match scheduler.take_exit_value(task_id) {
                        Some(value) => value,
                        None => panic!("join(): task {:?} was reclaimed twice", task_id),
                    };
                }
                let waiter: TaskId = match scheduler.current_task() {
                    Some(waiter) => waiter,
                    None => panic!("join(): must be called from a task"),
                };
                task.set_join_waiter(waiter);
                drop(task);
                scheduler.suspend().await;
            }
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Deref for SharedScheduler {
    type Target = Scheduler;

    fn deref(&self) -> &Self::Target {
        self.0.deref()
    }
}

impl DerefMut for SharedScheduler {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.deref_mut()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::SharedScheduler;
    use crate::runtime::{
        scheduler::task::TaskId,
        SharedObject,
    };
    use ::anyhow::Result;

    #[test]
    fn spawn_does_not_run_task() -> Result<()> {
        let mut scheduler: SharedScheduler = SharedScheduler::new("test");
        let mut ran: SharedObject<bool> = SharedObject::new(false);
        let flag: SharedObject<bool> = ran.clone();

        scheduler.spawn("flag", async move {
            *ran = true;
        });
        crate::ensure_eq!(*flag, false);
        crate::ensure_eq!(scheduler.num_ready(), 1);

        scheduler.run_all();
        crate::ensure_eq!(*flag, true);
        crate::ensure_eq!(scheduler.num_tasks(), 0);

        Ok(())
    }

    /// Tests that a finite set of terminating tasks always drains the ready queue.
    #[test]
    fn run_all_terminates() -> Result<()> {
        let mut scheduler: SharedScheduler = SharedScheduler::new("test");
        let completed: SharedObject<usize> = SharedObject::new(0);

        for i in 0..100 {
            let s: SharedScheduler = scheduler.clone();
            let mut completed: SharedObject<usize> = completed.clone();
            scheduler.spawn(&format!("worker-{}", i), async move {
                for _ in 0..(i % 7) {
                    s.yield_now().await;
                }
                *completed += 1;
            });
        }
        scheduler.run_all();

        crate::ensure_eq!(*completed, 100);
        crate::ensure_eq!(scheduler.is_idle(), true);
        crate::ensure_eq!(scheduler.num_blocked(), 0);

        Ok(())
    }

    /// Tests that yielding tasks take turns in FIFO order.
    #[test]
    fn yield_round_robin() -> Result<()> {
        let mut scheduler: SharedScheduler = SharedScheduler::new("test");
        let trace: SharedObject<Vec<(char, usize)>> = SharedObject::new(Vec::new());

        for name in ['a', 'b'] {
            let s: SharedScheduler = scheduler.clone();
            let mut trace: SharedObject<Vec<(char, usize)>> = trace.clone();
            scheduler.spawn(&name.to_string(), async move {
                for step in 0..3 {
                    trace.push((name, step));
                    s.yield_now().await;
                }
            });
        }
        scheduler.run_all();

        crate::ensure_eq!(
            *trace,
            vec![('a', 0), ('b', 0), ('a', 1), ('b', 1), ('a', 2), ('b', 2)]
        );

        Ok(())
    }

    #[test]
    fn single_task_can_yield_to_itself() -> Result<()> {
        let mut scheduler: SharedScheduler = SharedScheduler::new("test");
        let s: SharedScheduler = scheduler.clone();
        let task_id: TaskId = scheduler.spawn_with_exit("lonely", async move {
            for _ in 0..10 {
                s.yield_now().await;
            }
            7
        });
        scheduler.run_all();
        crate::ensure_eq!(scheduler.take_exit_value(task_id), Some(7));
        crate::ensure_eq!(scheduler.take_exit_value(task_id), None);

        Ok(())
    }

    #[test]
    fn suspend_until_woken() -> Result<()> {
        let mut scheduler: SharedScheduler = SharedScheduler::new("test");
        let order: SharedObject<Vec<&'static str>> = SharedObject::new(Vec::new());

        let s: SharedScheduler = scheduler.clone();
        let mut o: SharedObject<Vec<&'static str>> = order.clone();
        let sleeper: TaskId = scheduler.spawn("sleeper", async move {
            o.push("sleep");
            s.suspend().await;
            o.push("awake");
        });

        crate::ensure_eq!(scheduler.run_until_idle(), 1);
        crate::ensure_eq!(*order, vec!["sleep"]);

        let mut s: SharedScheduler = scheduler.clone();
        let mut o: SharedObject<Vec<&'static str>> = order.clone();
        scheduler.spawn("waker", async move {
            o.push("wake");
            s.wake(sleeper);
        });
        scheduler.run_all();
        crate::ensure_eq!(*order, vec!["sleep", "wake", "awake"]);

        Ok(())
    }

    /// Tests that a wake delivered before the matching suspension is not lost.
    #[test]
    fn early_wake_is_remembered() -> Result<()> {
        let mut scheduler: SharedScheduler = SharedScheduler::new("test");
        let mut s: SharedScheduler = scheduler.clone();
        scheduler.spawn("self-waker", async move {
            let me: TaskId = match s.current_task() {
                Some(me) => me,
                None => unreachable!(),
            };
            s.wake(me);
            s.suspend().await;
        });
        scheduler.run_all();

        Ok(())
    }

    #[test]
    fn join_returns_exit_value() -> Result<()> {
        let mut scheduler: SharedScheduler = SharedScheduler::new("test");
        let s: SharedScheduler = scheduler.clone();
        let child: TaskId = scheduler.spawn_with_exit("child", async move {
            s.yield_now().await;
            s.yield_now().await;
            42
        });

        let s: SharedScheduler = scheduler.clone();
        let parent: TaskId = scheduler.spawn_with_exit("parent", async move { s.join(child).await + 1 });
        scheduler.run_all();

        crate::ensure_eq!(scheduler.take_exit_value(parent), Some(43));
        crate::ensure_eq!(scheduler.num_tasks(), 0);

        Ok(())
    }

    #[test]
    #[should_panic]
    fn run_all_detects_deadlock() {
        let mut scheduler: SharedScheduler = SharedScheduler::new("test");
        let s: SharedScheduler = scheduler.clone();
        scheduler.spawn("stuck", async move { s.suspend().await });
        scheduler.run_all();
    }

    #[test]
    #[should_panic]
    fn wake_unknown_task_is_fatal() {
        let mut scheduler: SharedScheduler = SharedScheduler::new("test");
        scheduler.wake(TaskId(1234));
    }
}

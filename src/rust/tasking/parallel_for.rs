// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    runtime::{
        fail::Fail,
        memory::block_dist,
        scheduler::SharedScheduler,
    },
    tasking::{
        joiner::SharedGlobalTaskJoiner,
        steal_queue::SharedStealQueue,
    },
};
use ::async_trait::async_trait;
use ::futures::{
    future::LocalBoxFuture,
    FutureExt,
};
use ::std::{
    ops::Range,
    rc::Rc,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Body of a parallel loop. It is handed a start index and a number of iterations.
pub type LoopBody = Rc<dyn Fn(i64, i64) -> LocalBoxFuture<'static, ()>>;

/// Spawns plain tasks on a scheduler.
#[derive(Clone)]
pub struct LocalSpawn {
    scheduler: SharedScheduler,
}

/// Spawns tasks that the global task joiner accounts for.
#[derive(Clone)]
pub struct JoinerSpawn {
    scheduler: SharedScheduler,
    joiner: SharedGlobalTaskJoiner,
}

/// Pushes ranges onto the steal queue of the node, where either the node itself or an idle peer picks them up. The
/// global task joiner of the node accounts for them until they ran.
#[derive(Clone)]
pub struct PublicSpawn {
    queue: SharedStealQueue,
    joiner: SharedGlobalTaskJoiner,
}

//======================================================================================================================
// Traits
//======================================================================================================================

/// How a parallel loop hands a range of iterations over to another task, which runs it with [async_parallel_for].
#[async_trait(?Send)]
pub trait SpawnPolicy: Clone + 'static {
    async fn spawn_range(&self, start: i64, iterations: i64, threshold: i64, body: LoopBody) -> Result<(), Fail>;
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl LocalSpawn {
    pub fn new(scheduler: SharedScheduler) -> Self {
        Self { scheduler }
    }
}

impl JoinerSpawn {
    pub fn new(scheduler: SharedScheduler, joiner: SharedGlobalTaskJoiner) -> Self {
        Self { scheduler, joiner }
    }
}

impl PublicSpawn {
    pub fn new(queue: SharedStealQueue) -> Self {
        let joiner: SharedGlobalTaskJoiner = queue.get_joiner();
        Self { queue, joiner }
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Runs `body` over `start..start + iterations`. Ranges of at most `threshold` iterations run inline. Larger ranges
/// are halved: the right half goes to a new task through `policy` and the current task carries on with the left half.
pub fn async_parallel_for<P: SpawnPolicy>(
    start: i64,
    iterations: i64,
    threshold: i64,
    body: LoopBody,
    policy: P,
) -> LocalBoxFuture<'static, Result<(), Fail>> {
    async move {
        if threshold < 1 {
            let cause: String = format!("threshold must be positive (threshold={:?})", threshold);
            error!("async_parallel_for(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }

        let (start, mut iterations): (i64, i64) = (start, iterations.max(0));
        while iterations > threshold {
            let half: i64 = iterations / 2;
            policy
                .spawn_range(start + half, iterations - half, threshold, body.clone())
                .await?;
            iterations = half;
        }

        if iterations > 0 {
            body(start, iterations).await;
        }
        Ok(())
    }
    .boxed_local()
}

/// Wraps a nested parallel loop over `start..start + iterations` into a task body.
fn range_task<P: SpawnPolicy>(
    start: i64,
    iterations: i64,
    threshold: i64,
    body: LoopBody,
    policy: P,
) -> LocalBoxFuture<'static, ()> {
    let range: LocalBoxFuture<'static, Result<(), Fail>> = async_parallel_for(start, iterations, threshold, body, policy);
    async move {
        if let Err(e) = range.await {
            error!("range_task(): {:?}", e);
        }
    }
    .boxed_local()
}

/// Runs `body` over `start..start + iterations` across the whole cluster and returns once every iteration ran. Every
/// node must call this: each one runs its block of the range, and the global task joiner waits for the tasks spawned
/// on any node. With a steal queue, split-off ranges may run on idle nodes instead of the one that split them.
pub async fn global_async_parallel_for(
    scheduler: SharedScheduler,
    mut joiner: SharedGlobalTaskJoiner,
    queue: Option<SharedStealQueue>,
    start: i64,
    iterations: i64,
    threshold: i64,
    body: LoopBody,
) -> Result<(), Fail> {
    let block: Range<i64> = block_dist(
        start,
        start + iterations,
        joiner.get_node_id().into(),
        joiner.num_nodes(),
    );
    debug!(
        "global_async_parallel_for(): {} runs {}..{}",
        joiner.get_node_id(),
        block.start,
        block.end
    );

    match queue {
        Some(mut queue) => {
            queue.begin_loop(body.clone(), threshold)?;
            let outcome: Result<(), Fail> = async {
                joiner.reset().await?;
                let policy: PublicSpawn = PublicSpawn::new(queue.clone());
                async_parallel_for(block.start, block.end - block.start, threshold, body, policy).await?;
                joiner.wait().await
            }
            .await;
            queue.end_loop();
            outcome
        },
        None => {
            joiner.reset().await?;
            let policy: JoinerSpawn = JoinerSpawn::new(scheduler, joiner.clone());
            async_parallel_for(block.start, block.end - block.start, threshold, body, policy).await?;
            joiner.wait().await
        },
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

#[async_trait(?Send)]
impl SpawnPolicy for LocalSpawn {
    async fn spawn_range(&self, start: i64, iterations: i64, threshold: i64, body: LoopBody) -> Result<(), Fail> {
        let task: LocalBoxFuture<'static, ()> = range_task(start, iterations, threshold, body, self.clone());
        let mut scheduler: SharedScheduler = self.scheduler.clone();
        scheduler.spawn(&format!("pfor-{}+{}", start, iterations), task);
        Ok(())
    }
}

/// Registers the new task before spawning it. The task signals once it is done.
#[async_trait(?Send)]
impl SpawnPolicy for JoinerSpawn {
    async fn spawn_range(&self, start: i64, iterations: i64, threshold: i64, body: LoopBody) -> Result<(), Fail> {
        let mut joiner: SharedGlobalTaskJoiner = self.joiner.clone();
        joiner.register_task().await?;

        let task: LocalBoxFuture<'static, ()> = range_task(start, iterations, threshold, body, self.clone());
        let mut scheduler: SharedScheduler = self.scheduler.clone();
        scheduler.spawn(&format!("pfor-{}+{}", start, iterations), async move {
            task.await;
            if let Err(e) = joiner.signal() {
                error!("spawn_range(): failed to signal ({:?})", e);
            }
        });
        Ok(())
    }
}

/// Registers the range before making it public. The body is looked up again by whoever runs the range.
#[async_trait(?Send)]
impl SpawnPolicy for PublicSpawn {
    async fn spawn_range(&self, start: i64, iterations: i64, _threshold: i64, _body: LoopBody) -> Result<(), Fail> {
        let mut joiner: SharedGlobalTaskJoiner = self.joiner.clone();
        joiner.register_task().await?;
        let mut queue: SharedStealQueue = self.queue.clone();
        queue.push(start, iterations)
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

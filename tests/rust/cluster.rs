// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod common;

//==============================================================================
// Imports
//==============================================================================

use ::anyhow::Result;
use ::futures::FutureExt;
use ::splitphase::{
    runtime::{
        memory::Segment,
        SharedObject,
    },
    Cluster,
    GlobalAddress,
    LoopBody,
    SharedGlobalTaskJoiner,
    SharedNode,
    SharedScheduler,
    SharedStealQueue,
};
use ::std::rc::Rc;

//==============================================================================
// Constants
//==============================================================================

const SEGMENT_WORDS: usize = 64;

//==============================================================================
// test_join_waits_for_remote_tasks()
//==============================================================================

/// Tests a join phase over two nodes: node 0 registers and signals one task on its own, node 1 registers two tasks
/// that take a while. Neither node leaves the join phase before node 1 signalled both tasks.
#[test]
fn test_join_waits_for_remote_tasks() -> Result<()> {
    let mut cluster: Cluster = common::cluster(&common::config(2, SEGMENT_WORDS, SEGMENT_WORDS, 4)?, None)?;
    let events: SharedObject<Vec<String>> = SharedObject::new(Vec::new());

    let mut node0: SharedNode = cluster.get_node(0);
    let mut joiner0: SharedGlobalTaskJoiner = node0.get_joiner();
    let mut e: SharedObject<Vec<String>> = events.clone();
    node0.spawn("driver-0", async move {
        if let Err(err) = joiner0.reset().await {
            panic!("reset failed: {:?}", err);
        }
        if let Err(err) = joiner0.register_task().await {
            panic!("register_task failed: {:?}", err);
        }
        if let Err(err) = joiner0.signal() {
            panic!("signal failed: {:?}", err);
        }
        if let Err(err) = joiner0.wait().await {
            panic!("wait failed: {:?}", err);
        }
        e.push("joined-0".to_string());
    });

    let mut node1: SharedNode = cluster.get_node(1);
    let mut scheduler1: SharedScheduler = node1.get_scheduler();
    let mut joiner1: SharedGlobalTaskJoiner = node1.get_joiner();
    let events1: SharedObject<Vec<String>> = events.clone();
    node1.spawn("driver-1", async move {
        if let Err(err) = joiner1.reset().await {
            panic!("reset failed: {:?}", err);
        }
        for i in 0..2 {
            if let Err(err) = joiner1.register_task().await {
                panic!("register_task failed: {:?}", err);
            }
            let s: SharedScheduler = scheduler1.clone();
            let mut j: SharedGlobalTaskJoiner = joiner1.clone();
            let mut e: SharedObject<Vec<String>> = events1.clone();
            scheduler1.spawn(&format!("slow-{}", i), async move {
                for _ in 0..(10 * (i + 1)) {
                    s.yield_now().await;
                }
                e.push(format!("signal-{}", i));
                if let Err(err) = j.signal() {
                    panic!("signal failed: {:?}", err);
                }
            });
        }
        if let Err(err) = joiner1.wait().await {
            panic!("wait failed: {:?}", err);
        }
        let mut e: SharedObject<Vec<String>> = events1;
        e.push("joined-1".to_string());
    });

    common::run_to_completion(&mut cluster)?;

    let events: Vec<String> = events.to_vec();
    splitphase::ensure_eq!(events.len(), 4);
    splitphase::ensure_eq!(events[0..2].to_vec(), vec!["signal-0".to_string(), "signal-1".to_string()]);
    let mut joined: Vec<String> = events[2..].to_vec();
    joined.sort();
    splitphase::ensure_eq!(joined, vec!["joined-0".to_string(), "joined-1".to_string()]);

    Ok(())
}

//==============================================================================
// test_global_parallel_for_coverage()
//==============================================================================

/// Runs a global parallel loop and checks that every iteration ran exactly once. Without work stealing, every
/// iteration runs on the node that owns it.
fn do_test_global_parallel_for_coverage(
    num_nodes: usize,
    iterations: i64,
    threshold: i64,
    seed: u64,
    work_stealing: bool,
) -> Result<()> {
    let mut cluster: Cluster = common::cluster(
        &common::config_with_stealing(num_nodes, SEGMENT_WORDS, SEGMENT_WORDS, threshold, work_stealing)?,
        Some(seed),
    )?;
    let hits: SharedObject<Vec<(usize, u16)>> = SharedObject::new(vec![(0, u16::MAX); iterations as usize]);
    let finished: SharedObject<usize> = SharedObject::new(0);

    for n in 0..num_nodes {
        let mut node: SharedNode = cluster.get_node(n);
        let id: u16 = node.get_node_id().into();
        let h: SharedObject<Vec<(usize, u16)>> = hits.clone();
        let body: LoopBody = Rc::new(move |start: i64, count: i64| {
            let mut hits: SharedObject<Vec<(usize, u16)>> = h.clone();
            async move {
                for i in start..(start + count) {
                    hits[i as usize].0 += 1;
                    hits[i as usize].1 = id;
                }
            }
            .boxed_local()
        });

        let pfor = node.global_parallel_for(0, iterations, body);
        let mut f: SharedObject<usize> = finished.clone();
        node.spawn(&format!("driver-{}", n), async move {
            if let Err(e) = pfor.await {
                panic!("global parallel for failed: {:?}", e);
            }
            *f += 1;
        });
    }
    common::run_to_completion(&mut cluster)?;

    splitphase::ensure_eq!(*finished, num_nodes);
    for (i, (count, owner)) in hits.iter().enumerate() {
        splitphase::ensure_eq!(*count, 1);
        if !work_stealing {
            let expected: u16 = GlobalAddress::block_distributed(0, i as i64, iterations, num_nodes)
                .get_node()
                .into();
            splitphase::ensure_eq!(*owner, expected);
        }
    }

    Ok(())
}

#[test]
fn test_global_parallel_for_coverage() -> Result<()> {
    for (num_nodes, iterations, threshold) in [(1, 100, 4), (2, 1, 1), (3, 0, 2), (3, 97, 1), (4, 1000, 16)] {
        do_test_global_parallel_for_coverage(num_nodes, iterations, threshold, 42, false)?;
        do_test_global_parallel_for_coverage(num_nodes, iterations, threshold, 42, true)?;
    }
    Ok(())
}

//==============================================================================
// test_feed_forward_join_phases()
//==============================================================================

/// Runs several join phases in which every task scatters feed-forward updates over all nodes, with nodes polled in a
/// random order. Whenever a node leaves a join phase, every update of that phase was applied everywhere.
fn do_test_feed_forward_join_phases(num_nodes: usize, seed: u64) -> Result<()> {
    const PHASES: usize = 3;
    const ITERATIONS: i64 = 60;
    const COUNTERS: i64 = 24;

    let mut cluster: Cluster = common::cluster(&common::config(num_nodes, SEGMENT_WORDS, SEGMENT_WORDS, 3)?, Some(seed))?;
    let segments: Vec<Segment> = cluster
        .get_nodes()
        .iter()
        .map(|node: &SharedNode| node.get_segment())
        .collect();
    let violations: SharedObject<Vec<String>> = SharedObject::new(Vec::new());

    for n in 0..num_nodes {
        let mut node: SharedNode = cluster.get_node(n);
        let joiner: SharedGlobalTaskJoiner = node.get_joiner();
        let body: LoopBody = Rc::new(move |start: i64, count: i64| {
            let mut joiner: SharedGlobalTaskJoiner = joiner.clone();
            async move {
                for i in start..(start + count) {
                    let address: GlobalAddress =
                        GlobalAddress::block_distributed(0, i % COUNTERS, COUNTERS, num_nodes);
                    if let Err(e) = joiner.ff_delegate_add(address, 1).await {
                        panic!("feed-forward failed: {:?}", e);
                    }
                }
            }
            .boxed_local()
        });

        let driver: SharedNode = node.clone();
        let segments: Vec<Segment> = segments.clone();
        let mut violations: SharedObject<Vec<String>> = violations.clone();
        node.spawn(&format!("driver-{}", n), async move {
            for phase in 1..=PHASES {
                if let Err(e) = driver.global_parallel_for(0, ITERATIONS, body.clone()).await {
                    panic!("global parallel for failed: {:?}", e);
                }
                let total: i64 = segments
                    .iter()
                    .map(|segment: &Segment| (0..segment.len()).map(|offset| segment.read(offset)).sum::<i64>())
                    .sum();
                if total != ITERATIONS * phase as i64 {
                    violations.push(format!("node {} left phase {} with total {}", n, phase, total));
                }
            }
        });
    }
    common::run_to_completion(&mut cluster)?;

    splitphase::ensure_eq!(*violations, Vec::<String>::new());
    let total: i64 = segments
        .iter()
        .map(|segment: &Segment| (0..segment.len()).map(|offset| segment.read(offset)).sum::<i64>())
        .sum();
    splitphase::ensure_eq!(total, ITERATIONS * PHASES as i64);

    Ok(())
}

#[test]
fn test_feed_forward_join_phases() -> Result<()> {
    for seed in 0..8 {
        do_test_feed_forward_join_phases(3, seed)?;
    }
    do_test_feed_forward_join_phases(1, 99)?;
    Ok(())
}

//==============================================================================
// test_stolen_ranges_cancel_idle_votes()
//==============================================================================

/// Runs a global parallel loop whose first block is much slower than the others, so that idle nodes steal ranges
/// from the first node. A thief that already voted idle takes its vote back before splitting a stolen range.
fn do_test_stolen_ranges_cancel_idle_votes(seed: u64) -> Result<(u64, u64)> {
    const NUM_NODES: usize = 3;
    const ITERATIONS: i64 = 96;
    const SLOW_ITERATIONS: i64 = 32;
    const YIELDS: usize = 16;

    let mut cluster: Cluster = common::cluster(&common::config(NUM_NODES, SEGMENT_WORDS, SEGMENT_WORDS, 2)?, Some(seed))?;
    let hits: SharedObject<Vec<(usize, u16)>> = SharedObject::new(vec![(0, u16::MAX); ITERATIONS as usize]);

    for n in 0..NUM_NODES {
        let mut node: SharedNode = cluster.get_node(n);
        let id: u16 = node.get_node_id().into();
        let scheduler: SharedScheduler = node.get_scheduler();
        let h: SharedObject<Vec<(usize, u16)>> = hits.clone();
        let body: LoopBody = Rc::new(move |start: i64, count: i64| {
            let mut hits: SharedObject<Vec<(usize, u16)>> = h.clone();
            let scheduler: SharedScheduler = scheduler.clone();
            async move {
                for i in start..(start + count) {
                    if i < SLOW_ITERATIONS {
                        for _ in 0..YIELDS {
                            scheduler.yield_now().await;
                        }
                    }
                    hits[i as usize].0 += 1;
                    hits[i as usize].1 = id;
                }
            }
            .boxed_local()
        });

        let pfor = node.global_parallel_for(0, ITERATIONS, body);
        node.spawn(&format!("driver-{}", n), async move {
            if let Err(e) = pfor.await {
                panic!("global parallel for failed: {:?}", e);
            }
        });
    }
    common::run_to_completion(&mut cluster)?;

    for (count, _) in hits.iter() {
        splitphase::ensure_eq!(*count, 1);
    }
    let num_moved: usize = hits[..SLOW_ITERATIONS as usize]
        .iter()
        .filter(|(_, owner)| *owner != 0)
        .count();
    splitphase::ensure_neq!(num_moved, 0);

    let mut num_stolen: u64 = 0;
    let mut num_given: u64 = 0;
    let mut num_cancels: u64 = 0;
    for node in cluster.get_nodes() {
        let queue: SharedStealQueue = match node.get_steal_queue() {
            Some(queue) => queue,
            None => anyhow::bail!("node {} does not steal work", node.get_node_id()),
        };
        num_stolen += queue.num_stolen();
        num_given += queue.num_given();
        num_cancels += node.get_joiner().num_cancels_sent();
    }
    splitphase::ensure_eq!(num_stolen, num_given);
    splitphase::ensure_neq!(num_stolen, 0);

    let coordinator: SharedGlobalTaskJoiner = cluster.get_node(0).get_joiner();
    splitphase::ensure_eq!(coordinator.num_cancels_received(), num_cancels);
    splitphase::ensure_eq!(coordinator.num_nodes_outstanding(), 0);

    Ok((num_stolen, num_cancels))
}

#[test]
fn test_stolen_ranges_cancel_idle_votes() -> Result<()> {
    let mut num_cancels: u64 = 0;
    for seed in 0..8 {
        let (_, cancels): (u64, u64) = do_test_stolen_ranges_cancel_idle_votes(seed)?;
        num_cancels += cancels;
    }
    splitphase::ensure_neq!(num_cancels, 0);
    Ok(())
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod common;

//==============================================================================
// Imports
//==============================================================================

use ::anyhow::Result;
use ::splitphase::{
    runtime::{
        memory::Segment,
        SharedObject,
    },
    Cluster,
    GlobalAddress,
    NodeId,
    Operation,
    SharedDelegateClient,
    SharedNode,
    Ticket,
};

//==============================================================================
// Constants
//==============================================================================

const SEGMENT_WORDS: usize = 16;

//==============================================================================
// test_remote_operations()
//==============================================================================

/// Tests every memory operation against a word owned by another node.
#[test]
fn test_remote_operations() -> Result<()> {
    let mut cluster: Cluster = common::cluster(&common::config(2, SEGMENT_WORDS, SEGMENT_WORDS, 4)?, None)?;
    let address: GlobalAddress = GlobalAddress::new(NodeId(1), 3);
    let results: SharedObject<Vec<i64>> = SharedObject::new(Vec::new());

    let mut node: SharedNode = cluster.get_node(0);
    let mut client: SharedDelegateClient = node.get_client(0);
    let mut r: SharedObject<Vec<i64>> = results.clone();
    node.spawn("remote", async move {
        client.write(address, 7).await;
        r.push(client.fetch_and_add(address, 5).await);
        r.push(client.compare_and_swap(address, 12, 1).await as i64);
        r.push(client.compare_and_swap(address, 12, 2).await as i64);
        r.push(client.read(address).await);
    });
    common::run_to_completion(&mut cluster)?;

    splitphase::ensure_eq!(*results, vec![7, 1, 0, 1]);
    splitphase::ensure_eq!(cluster.get_node(1).get_segment().read(3), 1);
    splitphase::ensure_eq!(cluster.get_node(0).get_segment().read(3), 0);

    Ok(())
}

//==============================================================================
// test_split_phase_overlap()
//==============================================================================

/// Tests that a task may issue many operations before completing any of them, past the capacity of its request queue.
#[test]
fn test_split_phase_overlap() -> Result<()> {
    const NUM_TICKETS: usize = 24;
    let mut cluster: Cluster = common::cluster(&common::config(2, SEGMENT_WORDS, SEGMENT_WORDS, 4)?, None)?;
    let remote: Segment = cluster.get_node(1).get_segment();
    for offset in 0..SEGMENT_WORDS {
        remote.write(offset, 100 + offset as i64);
    }

    let values: SharedObject<Vec<i64>> = SharedObject::new(Vec::new());
    let mut node: SharedNode = cluster.get_node(0);
    let mut client: SharedDelegateClient = node.get_client(1);
    let mut v: SharedObject<Vec<i64>> = values.clone();
    node.spawn("overlap", async move {
        let mut tickets: Vec<Ticket> = Vec::with_capacity(NUM_TICKETS);
        for i in 0..NUM_TICKETS {
            let address: GlobalAddress = GlobalAddress::new(NodeId(1), i % SEGMENT_WORDS);
            tickets.push(client.issue(Operation::Read, address, 0, 0).await);
        }
        for ticket in tickets {
            v.push(client.complete(ticket).await);
        }
    });
    common::run_to_completion(&mut cluster)?;

    let expected: Vec<i64> = (0..NUM_TICKETS).map(|i| 100 + (i % SEGMENT_WORDS) as i64).collect();
    splitphase::ensure_eq!(*values, expected);

    Ok(())
}

//==============================================================================
// test_local_region_bypasses_delegate()
//==============================================================================

/// Tests that words of the local region are accessed in place, while the rest of the local segment goes through the
/// delegate server.
#[test]
fn test_local_region_bypasses_delegate() -> Result<()> {
    let mut cluster: Cluster = common::cluster(&common::config(1, SEGMENT_WORDS, SEGMENT_WORDS / 2, 4)?, None)?;
    let outcome: SharedObject<Vec<bool>> = SharedObject::new(Vec::new());

    let mut node: SharedNode = cluster.get_node(0);
    let mut client: SharedDelegateClient = node.get_client(0);
    let mut o: SharedObject<Vec<bool>> = outcome.clone();
    node.spawn("local", async move {
        for offset in [0, SEGMENT_WORDS / 2 - 1, SEGMENT_WORDS / 2, SEGMENT_WORDS - 1] {
            let address: GlobalAddress = GlobalAddress::new(NodeId(0), offset);
            let ticket: Ticket = client.issue(Operation::FetchAdd, address, 1, 0).await;
            o.push(matches!(ticket, Ticket::Local { .. }));
            client.complete(ticket).await;
        }
    });
    common::run_to_completion(&mut cluster)?;

    splitphase::ensure_eq!(*outcome, vec![true, true, false, false]);
    let segment: Segment = cluster.get_node(0).get_segment();
    for offset in [0, SEGMENT_WORDS / 2 - 1, SEGMENT_WORDS / 2, SEGMENT_WORDS - 1] {
        splitphase::ensure_eq!(segment.read(offset), 1);
    }

    Ok(())
}

//==============================================================================
// test_concurrent_fetch_and_add()
//==============================================================================

/// Tests that concurrent fetch-and-adds from every node and client are all applied.
#[test]
fn test_concurrent_fetch_and_add() -> Result<()> {
    const NUM_NODES: usize = 3;
    const TASKS_PER_NODE: usize = 10;
    const ADDS_PER_TASK: usize = 5;
    let mut cluster: Cluster = common::cluster(&common::config(NUM_NODES, SEGMENT_WORDS, 0, 4)?, Some(11))?;

    for n in 0..NUM_NODES {
        let mut node: SharedNode = cluster.get_node(n);
        for t in 0..TASKS_PER_NODE {
            let mut client: SharedDelegateClient = node.get_client(t);
            client.register_task();
            node.spawn(&format!("adder-{}-{}", n, t), async move {
                for i in 0..ADDS_PER_TASK {
                    let target: NodeId = NodeId(((n + t + i) % NUM_NODES) as u16);
                    client.fetch_and_add(GlobalAddress::new(target, 0), 1).await;
                }
                client.unregister_task();
            });
        }
    }
    common::run_to_completion(&mut cluster)?;

    let total: i64 = cluster
        .get_nodes()
        .iter()
        .map(|node: &SharedNode| node.get_segment().read(0))
        .sum();
    splitphase::ensure_eq!(total, (NUM_NODES * TASKS_PER_NODE * ADDS_PER_TASK) as i64);

    Ok(())
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    node::{
        config::Config,
        SharedNode,
    },
    runtime::{
        fail::Fail,
        network::{
            Endpoint,
            Fabric,
        },
    },
};
use ::rand::{
    rngs::SmallRng,
    seq::SliceRandom,
    SeedableRng,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Nodes sharing one fabric, all driven from the calling thread.
pub struct Cluster {
    nodes: Vec<SharedNode>,
    /// Order in which nodes are polled.
    order: Vec<usize>,
    /// Reshuffles the polling order on every round, when set.
    rng: Option<SmallRng>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Cluster {
    pub fn new(config: &Config) -> Result<Self, Fail> {
        let fabric: Fabric = Fabric::new(config.num_nodes()?)?;
        let nodes: Vec<SharedNode> = fabric
            .into_endpoints()
            .into_iter()
            .map(|endpoint: Endpoint| SharedNode::new(config, endpoint))
            .collect::<Result<Vec<SharedNode>, Fail>>()?;
        let order: Vec<usize> = (0..nodes.len()).collect();
        info!("new(): cluster with {} node(s)", nodes.len());
        Ok(Self { nodes, order, rng: None })
    }

    /// Polls nodes in a random order drawn from `seed`, instead of round robin.
    pub fn with_shuffled_polling(mut self, seed: u64) -> Self {
        self.rng = Some(SmallRng::seed_from_u64(seed));
        self
    }

    /// Polls every node once. Returns the number of tasks resumed.
    pub fn poll(&mut self) -> Result<usize, Fail> {
        if let Some(rng) = self.rng.as_mut() {
            self.order.shuffle(rng);
        }
        let mut resumed: usize = 0;
        for &i in self.order.iter() {
            resumed += self.nodes[i].poll()?;
        }
        Ok(resumed)
    }

    /// Polls nodes until every task exited and no message is in flight.
    ///
    /// Panics if tasks are left blocked while no node has anything to run and no message is in flight, since nothing
    /// can ever wake them up.
    pub fn run(&mut self) -> Result<(), Fail> {
        loop {
            self.poll()?;
            if self.in_flight() > 0 {
                continue;
            }
            if self.nodes.iter().all(|node: &SharedNode| node.is_quiescent()) {
                return Ok(());
            }
            let stalled: bool = self
                .nodes
                .iter()
                .all(|node: &SharedNode| node.get_scheduler().is_idle());
            if stalled {
                let num_blocked: usize = self
                    .nodes
                    .iter()
                    .map(|node: &SharedNode| node.get_scheduler().num_blocked())
                    .sum();
                panic!("run(): cluster deadlocked with {} blocked task(s)", num_blocked);
            }
        }
    }

    /// Closes every request queue and waits for the delegate servers to stop.
    pub fn shutdown(&mut self) -> Result<(), Fail> {
        for node in self.nodes.iter_mut() {
            node.spawn_shutdown();
        }
        self.run()?;
        assert!(
            self.nodes.iter().all(|node: &SharedNode| !node.is_serving()),
            "shutdown(): delegate servers still running"
        );
        debug!("shutdown(): cluster stopped");
        Ok(())
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn get_node(&self, index: usize) -> SharedNode {
        self.nodes[index].clone()
    }

    pub fn get_nodes(&self) -> &[SharedNode] {
        &self.nodes
    }

    /// Messages in flight over the fabric.
    pub fn in_flight(&self) -> usize {
        self.nodes.first().map_or(0, |node: &SharedNode| node.in_flight())
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::Cluster;
    use crate::{
        node::{
            config::Config,
            SharedNode,
        },
        runtime::{
            scheduler::SharedScheduler,
            SharedObject,
        },
    };
    use ::anyhow::Result;

    fn config(num_nodes: usize) -> Result<Config> {
        let config_s: String = format!(
            "
runtime: {{ num_nodes: {}, coordinator: 0, segment_words: 32 }}
delegate: {{ clients: 2, ring_capacity: 8, ring_batch_size: 2 }}
parallel_for: {{ threshold: 4 }}
",
            num_nodes
        );
        match config_s.parse::<Config>() {
            Ok(config) => Ok(config),
            Err(e) => anyhow::bail!("{:?}", e),
        }
    }

    #[test]
    fn empty_cluster_is_quiescent() -> Result<()> {
        let mut cluster: Cluster = match Cluster::new(&config(3)?) {
            Ok(cluster) => cluster,
            Err(e) => anyhow::bail!("{:?}", e),
        };
        crate::ensure_eq!(cluster.num_nodes(), 3);
        crate::ensure_eq!(cluster.run().is_ok(), true);
        crate::ensure_eq!(cluster.shutdown().is_ok(), true);
        crate::ensure_eq!(cluster.get_nodes().iter().any(|node| node.is_serving()), false);
        Ok(())
    }

    #[test]
    fn tasks_run_on_every_node() -> Result<()> {
        let mut cluster: Cluster = match Cluster::new(&config(4)?) {
            Ok(cluster) => cluster.with_shuffled_polling(7),
            Err(e) => anyhow::bail!("{:?}", e),
        };
        let visited: SharedObject<Vec<u16>> = SharedObject::new(Vec::new());
        for i in 0..cluster.num_nodes() {
            let mut node: SharedNode = cluster.get_node(i);
            let id: u16 = node.get_node_id().into();
            let mut visited: SharedObject<Vec<u16>> = visited.clone();
            node.spawn("visit", async move { visited.push(id) });
        }
        crate::ensure_eq!(cluster.run().is_ok(), true);

        let mut visited: Vec<u16> = visited.to_vec();
        visited.sort();
        crate::ensure_eq!(visited, vec![0, 1, 2, 3]);
        Ok(())
    }

    #[test]
    #[should_panic(expected = "deadlocked")]
    fn blocked_tasks_are_a_deadlock() {
        let config: Config = match config(2) {
            Ok(config) => config,
            Err(e) => panic!("{:?}", e),
        };
        let mut cluster: Cluster = match Cluster::new(&config) {
            Ok(cluster) => cluster,
            Err(e) => panic!("{:?}", e),
        };
        let mut node: SharedNode = cluster.get_node(1);
        let scheduler: SharedScheduler = node.get_scheduler();
        node.spawn("stuck", async move { scheduler.suspend().await });
        let _ = cluster.run();
    }
}

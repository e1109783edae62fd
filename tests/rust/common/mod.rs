// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::anyhow::Result;
use ::splitphase::{
    runtime::logging,
    Cluster,
    Config,
};

//==============================================================================
// Standalone Functions
//==============================================================================

/// Builds the configuration of a test cluster whose global loops steal work.
#[allow(dead_code)]
pub fn config(num_nodes: usize, segment_words: usize, local_region_words: usize, threshold: i64) -> Result<Config> {
    config_with_stealing(num_nodes, segment_words, local_region_words, threshold, true)
}

/// Builds the configuration of a test cluster.
#[allow(dead_code)]
pub fn config_with_stealing(
    num_nodes: usize,
    segment_words: usize,
    local_region_words: usize,
    threshold: i64,
    work_stealing: bool,
) -> Result<Config> {
    let config_s: String = format!(
        "
runtime:
  num_nodes: {}
  coordinator: 0
  segment_words: {}
delegate:
  clients: 2
  ring_capacity: 8
  ring_batch_size: 2
  local_region_words: {}
parallel_for:
  threshold: {}
  work_stealing: {}
",
        num_nodes, segment_words, local_region_words, threshold, work_stealing
    );
    match config_s.parse::<Config>() {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("failed to parse configuration: {:?}", e),
    }
}

/// Builds a test cluster, polling nodes in an order drawn from `seed` if one is given.
#[allow(dead_code)]
pub fn cluster(config: &Config, seed: Option<u64>) -> Result<Cluster> {
    logging::initialize();
    let cluster: Cluster = match Cluster::new(config) {
        Ok(cluster) => cluster,
        Err(e) => anyhow::bail!("failed to create cluster: {:?}", e),
    };
    Ok(match seed {
        Some(seed) => cluster.with_shuffled_polling(seed),
        None => cluster,
    })
}

/// Runs a cluster until it is quiescent, then shuts it down.
#[allow(dead_code)]
pub fn run_to_completion(cluster: &mut Cluster) -> Result<()> {
    if let Err(e) = cluster.run() {
        anyhow::bail!("cluster failed: {:?}", e);
    }
    if let Err(e) = cluster.shutdown() {
        anyhow::bail!("failed to shut down cluster: {:?}", e);
    }
    Ok(())
}

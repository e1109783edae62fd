// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#![cfg_attr(feature = "strict", deny(warnings))]
#![deny(clippy::all)]

//==============================================================================
// Imports
//==============================================================================

use ::anyhow::{
    bail,
    Result,
};
use ::clap::{
    Arg,
    ArgMatches,
    Command,
};
use ::futures::FutureExt;
use ::splitphase::{
    runtime::logging,
    Cluster,
    Config,
    GlobalAddress,
    LoopBody,
    SharedGlobalTaskJoiner,
    SharedNode,
};
use ::std::{
    rc::Rc,
    time::{
        Duration,
        Instant,
    },
};

//==============================================================================
// Program Arguments
//==============================================================================

/// Program Arguments
#[derive(Debug)]
pub struct ProgramArguments {
    /// Number of nodes.
    nodes: usize,
    /// Number of loop iterations.
    iterations: i64,
    /// Largest range that runs without being split.
    threshold: i64,
    /// Configuration file.
    config_path: Option<String>,
}

/// Associate functions for Program Arguments
impl ProgramArguments {
    const DEFAULT_NODES: usize = 4;
    const DEFAULT_ITERATIONS: i64 = 100_000;
    const DEFAULT_THRESHOLD: i64 = 64;

    /// Parses the program arguments from the command line interface.
    pub fn new(app_name: &'static str, app_about: &'static str) -> Result<Self> {
        let matches: ArgMatches = Command::new(app_name)
            .about(app_about)
            .arg(
                Arg::new("nodes")
                    .long("nodes")
                    .value_parser(clap::value_parser!(String))
                    .required(false)
                    .value_name("NUM")
                    .help("Sets number of nodes (ignored with --config)"),
            )
            .arg(
                Arg::new("iterations")
                    .long("iterations")
                    .value_parser(clap::value_parser!(String))
                    .required(false)
                    .value_name("NUM")
                    .help("Sets number of loop iterations"),
            )
            .arg(
                Arg::new("threshold")
                    .long("threshold")
                    .value_parser(clap::value_parser!(String))
                    .required(false)
                    .value_name("NUM")
                    .help("Sets parallel loop threshold (ignored with --config)"),
            )
            .arg(
                Arg::new("config")
                    .long("config")
                    .value_parser(clap::value_parser!(String))
                    .required(false)
                    .value_name("PATH")
                    .help("Sets configuration file"),
            )
            .get_matches();

        let mut args: ProgramArguments = ProgramArguments {
            nodes: Self::DEFAULT_NODES,
            iterations: Self::DEFAULT_ITERATIONS,
            threshold: Self::DEFAULT_THRESHOLD,
            config_path: None,
        };

        if let Some(nodes) = matches.get_one::<String>("nodes") {
            args.nodes = nodes.parse()?;
            if args.nodes == 0 {
                bail!("invalid number of nodes")
            }
        }
        if let Some(iterations) = matches.get_one::<String>("iterations") {
            args.iterations = iterations.parse()?;
            if args.iterations < 0 {
                bail!("invalid number of iterations")
            }
        }
        if let Some(threshold) = matches.get_one::<String>("threshold") {
            args.threshold = threshold.parse()?;
            if args.threshold < 1 {
                bail!("invalid threshold")
            }
        }
        if let Some(config_path) = matches.get_one::<String>("config") {
            args.config_path = Some(config_path.to_string());
        }

        Ok(args)
    }

    /// Loads the configuration file, or builds one from the command line.
    fn get_config(&self) -> Result<Config> {
        let config: Result<Config, _> = match self.config_path {
            Some(ref config_path) => Config::new(config_path),
            None => format!(
                "
runtime:
  num_nodes: {}
  coordinator: 0
  segment_words: 1024
delegate:
  clients: 2
  ring_capacity: 256
  ring_batch_size: 32
parallel_for:
  threshold: {}
",
                self.nodes, self.threshold
            )
            .parse(),
        };
        match config {
            Ok(config) => Ok(config),
            Err(e) => bail!("invalid configuration: {:?}", e),
        }
    }
}

//==============================================================================
// Application
//==============================================================================

/// Number of counters that loop iterations are scattered over.
const NUM_COUNTERS: i64 = 512;

/// Spawns a driver task on every node. Each iteration adds one to a counter, which may live on any node.
fn spawn_drivers(cluster: &Cluster, iterations: i64) {
    for node in cluster.get_nodes() {
        let mut node: SharedNode = node.clone();
        let num_nodes: usize = cluster.num_nodes();
        let joiner: SharedGlobalTaskJoiner = node.get_joiner();
        let body: LoopBody = Rc::new(move |start: i64, count: i64| {
            let mut joiner: SharedGlobalTaskJoiner = joiner.clone();
            async move {
                for i in start..(start + count) {
                    let address: GlobalAddress =
                        GlobalAddress::block_distributed(0, i % NUM_COUNTERS, NUM_COUNTERS, num_nodes);
                    if let Err(e) = joiner.ff_delegate_add(address, 1).await {
                        panic!("failed to update counter: {:?}", e);
                    }
                }
            }
            .boxed_local()
        });

        let pfor = node.global_parallel_for(0, iterations, body);
        node.spawn("driver", async move {
            if let Err(e) = pfor.await {
                panic!("parallel loop failed: {:?}", e);
            }
        });
    }
}

fn main() -> Result<()> {
    logging::initialize();
    let args: ProgramArguments = ProgramArguments::new(
        "cluster-pfor",
        "Runs a parallel loop over an in-process cluster and counts its iterations.",
    )?;

    let config: Config = args.get_config()?;
    let mut cluster: Cluster = match Cluster::new(&config) {
        Ok(cluster) => cluster,
        Err(e) => bail!("failed to create cluster: {:?}", e),
    };

    let words: usize = (NUM_COUNTERS as usize).div_ceil(cluster.num_nodes());
    match config.segment_words() {
        Ok(segment_words) if segment_words >= words => (),
        Ok(segment_words) => bail!("segments are too small (segment_words={}, needed={})", segment_words, words),
        Err(e) => bail!("invalid configuration: {:?}", e),
    }

    let start: Instant = Instant::now();
    spawn_drivers(&cluster, args.iterations);
    if let Err(e) = cluster.run() {
        bail!("cluster failed: {:?}", e);
    }
    let elapsed: Duration = start.elapsed();

    let mut total: i64 = 0;
    for node in cluster.get_nodes() {
        let count: i64 = (0..words).map(|offset| node.get_segment().read(offset)).sum();
        let stolen: u64 = node.get_steal_queue().map_or(0, |queue| queue.num_stolen());
        println!("node {}: {} iteration(s), {} range(s) stolen", node.get_node_id(), count, stolen);
        total += count;
    }
    println!(
        "{} iteration(s) over {} node(s) in {:?} ({:.2} Mops)",
        total,
        cluster.num_nodes(),
        elapsed,
        total as f64 / elapsed.as_secs_f64().max(f64::EPSILON) / 1e6
    );

    if let Err(e) = cluster.shutdown() {
        bail!("failed to shut down cluster: {:?}", e);
    }
    if total != args.iterations {
        bail!("lost iterations (expected={}, counted={})", args.iterations, total);
    }
    Ok(())
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    types::NodeId,
};
use ::std::{
    fs::File,
    io::Read,
    ops::Index,
    str::FromStr,
};
use ::yaml_rust::{
    Yaml,
    YamlLoader,
};

//======================================================================================================================
// Constants
//======================================================================================================================

// Options that shape the whole cluster.
mod runtime_config {
    pub const SECTION_NAME: &str = "runtime";
    pub const NUM_NODES: &str = "num_nodes";
    // Node that runs the termination detection of the global task joiner.
    pub const COORDINATOR: &str = "coordinator";
    // Number of words in the memory segment of each node.
    pub const SEGMENT_WORDS: &str = "segment_words";
}

// Delegate options. These apply to every node.
mod delegate_config {
    pub const SECTION_NAME: &str = "delegate";
    // Number of delegate clients (and request queues) per node.
    pub const CLIENTS: &str = "clients";
    pub const RING_CAPACITY: &str = "ring_capacity";
    pub const RING_BATCH_SIZE: &str = "ring_batch_size";
    // Number of leading words of the local segment that clients access in place.
    pub const LOCAL_REGION_WORDS: &str = "local_region_words";
}

mod parallel_for_config {
    pub const SECTION_NAME: &str = "parallel_for";
    pub const THRESHOLD: &str = "threshold";
    // Whether idle nodes take ranges of global loops from busy ones.
    pub const WORK_STEALING: &str = "work_stealing";
}

/// Configuration used by [Config::default].
const DEFAULT_CONFIG: &str = "
runtime:
  num_nodes: 1
  coordinator: 0
  segment_words: 4096
delegate:
  clients: 1
  ring_capacity: 256
  ring_batch_size: 64
  local_region_words: 4096
parallel_for:
  threshold: 16
  work_stealing: true
";

//======================================================================================================================
// Structures
//======================================================================================================================

/// Runtime configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Yaml);

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl Config {
    /// Reads a configuration file into a [Config] object.
    pub fn new(config_path: &str) -> Result<Self, Fail> {
        let mut config_s: String = String::new();
        let mut file: File = match File::open(config_path) {
            Ok(file) => file,
            Err(e) => {
                let cause: String = format!("failed to open {} ({:?})", config_path, e);
                error!("new(): {}", cause);
                return Err(Fail::new(libc::ENOENT, &cause));
            },
        };
        if let Err(e) = file.read_to_string(&mut config_s) {
            let cause: String = format!("failed to read {} ({:?})", config_path, e);
            error!("new(): {}", cause);
            return Err(Fail::new(libc::EIO, &cause));
        }
        config_s.parse()
    }

    fn get_runtime_config(&self) -> Result<&Yaml, Fail> {
        Self::get_subsection(&self.0, runtime_config::SECTION_NAME)
    }

    fn get_delegate_config(&self) -> Result<&Yaml, Fail> {
        Self::get_subsection(&self.0, delegate_config::SECTION_NAME)
    }

    fn get_parallel_for_config(&self) -> Result<&Yaml, Fail> {
        Self::get_subsection(&self.0, parallel_for_config::SECTION_NAME)
    }

    pub fn num_nodes(&self) -> Result<usize, Fail> {
        let num_nodes: usize = if let Some(value) = Self::get_typed_env_option(runtime_config::NUM_NODES)? {
            value
        } else {
            Self::get_int_option(self.get_runtime_config()?, runtime_config::NUM_NODES)?
        };

        if num_nodes == 0 || num_nodes > u16::MAX as usize {
            let cause: String = format!("invalid number of nodes (num_nodes={:?})", num_nodes);
            error!("num_nodes(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        Ok(num_nodes)
    }

    /// Reads the coordinator of the global task joiner, which must be one of the configured nodes.
    pub fn coordinator(&self) -> Result<NodeId, Fail> {
        let coordinator: u16 = if let Some(value) = Self::get_typed_env_option(runtime_config::COORDINATOR)? {
            value
        } else {
            Self::get_int_option(self.get_runtime_config()?, runtime_config::COORDINATOR)?
        };

        if coordinator as usize >= self.num_nodes()? {
            let cause: String = format!("coordinator is not a node (coordinator={:?})", coordinator);
            error!("coordinator(): {}", cause);
            return Err(Fail::new(libc::ERANGE, &cause));
        }
        Ok(NodeId(coordinator))
    }

    pub fn segment_words(&self) -> Result<usize, Fail> {
        if let Some(value) = Self::get_typed_env_option(runtime_config::SEGMENT_WORDS)? {
            Ok(value)
        } else {
            Self::get_int_option(self.get_runtime_config()?, runtime_config::SEGMENT_WORDS)
        }
    }

    pub fn delegate_clients(&self) -> Result<usize, Fail> {
        let clients: usize = if let Some(value) = Self::get_typed_env_option(delegate_config::CLIENTS)? {
            value
        } else {
            Self::get_int_option(self.get_delegate_config()?, delegate_config::CLIENTS)?
        };

        if clients == 0 {
            let cause: String = "at least one delegate client is required".to_string();
            error!("delegate_clients(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        Ok(clients)
    }

    /// Capacity of each request queue. Validated when the queue is created.
    pub fn ring_capacity(&self) -> Result<usize, Fail> {
        if let Some(value) = Self::get_typed_env_option(delegate_config::RING_CAPACITY)? {
            Ok(value)
        } else {
            Self::get_int_option(self.get_delegate_config()?, delegate_config::RING_CAPACITY)
        }
    }

    pub fn ring_batch_size(&self) -> Result<usize, Fail> {
        if let Some(value) = Self::get_typed_env_option(delegate_config::RING_BATCH_SIZE)? {
            Ok(value)
        } else {
            Self::get_int_option(self.get_delegate_config()?, delegate_config::RING_BATCH_SIZE)
        }
    }

    /// Reads the size of the local region, which cannot exceed the segment. Defaults to the whole segment.
    pub fn local_region_words(&self) -> Result<usize, Fail> {
        let segment_words: usize = self.segment_words()?;
        let words: usize = if let Some(value) = Self::get_typed_env_option(delegate_config::LOCAL_REGION_WORDS)? {
            value
        } else {
            match self.get_delegate_config()?.index(delegate_config::LOCAL_REGION_WORDS) {
                Yaml::BadValue => segment_words,
                _ => Self::get_int_option(self.get_delegate_config()?, delegate_config::LOCAL_REGION_WORDS)?,
            }
        };

        if words > segment_words {
            let cause: String = format!(
                "local region exceeds the segment (local_region_words={:?}, segment_words={:?})",
                words, segment_words
            );
            error!("local_region_words(): {}", cause);
            return Err(Fail::new(libc::ERANGE, &cause));
        }
        Ok(words)
    }

    /// Reads the largest range that a parallel loop runs without splitting it.
    pub fn parallel_for_threshold(&self) -> Result<i64, Fail> {
        let threshold: i64 = if let Some(value) = Self::get_typed_env_option(parallel_for_config::THRESHOLD)? {
            value
        } else {
            Self::get_int_option(self.get_parallel_for_config()?, parallel_for_config::THRESHOLD)?
        };

        if threshold < 1 {
            let cause: String = format!("threshold must be positive (threshold={:?})", threshold);
            error!("parallel_for_threshold(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        Ok(threshold)
    }

    /// Reads whether global loops steal work. Defaults to true.
    pub fn work_stealing(&self) -> Result<bool, Fail> {
        if let Some(value) = Self::get_typed_env_option(parallel_for_config::WORK_STEALING)? {
            return Ok(value);
        }
        let section: &Yaml = self.get_parallel_for_config()?;
        match section.index(parallel_for_config::WORK_STEALING) {
            Yaml::BadValue => Ok(true),
            value => match value.as_bool() {
                Some(value) => Ok(value),
                None => {
                    let cause: String =
                        format!("parameter {} has unexpected type", parallel_for_config::WORK_STEALING);
                    error!("work_stealing(): {}", cause);
                    Err(Fail::new(libc::EINVAL, &cause))
                },
            },
        }
    }

    /// Index `yaml` to find the value at `index`, validating that it is a section.
    fn get_subsection<'a>(yaml: &'a Yaml, index: &str) -> Result<&'a Yaml, Fail> {
        let section: &'a Yaml = Self::get_option(yaml, index)?;
        match section {
            Yaml::Hash(_) => Ok(section),
            _ => {
                let message: String = format!("parameter \"{}\" has unexpected type", index);
                Err(Fail::new(libc::EINVAL, message.as_str()))
            },
        }
    }

    /// Index `yaml` to find the value at `index`, validating that the index exists.
    fn get_option<'a>(yaml: &'a Yaml, index: &str) -> Result<&'a Yaml, Fail> {
        match yaml.index(index) {
            Yaml::BadValue => {
                let message: String = format!("missing configuration option \"{}\"", index);
                Err(Fail::new(libc::EINVAL, message.as_str()))
            },
            value => Ok(value),
        }
    }

    /// Get value where the environment value overrides the config file if it exists.
    fn get_typed_env_option<T: FromStr>(index: &str) -> Result<Option<T>, Fail> {
        if let Ok(var) = ::std::env::var(index.to_uppercase()) {
            if let Ok(value) = var.as_str().parse() {
                return Ok(Some(value));
            } else {
                let message: String = format!("parameter {} has unexpected type", index);
                return Err(Fail::new(libc::EINVAL, message.as_str()));
            }
        }
        Ok(None)
    }

    /// Reads an integer option, verifying that the destination type may hold it.
    fn get_int_option<T: TryFrom<i64>>(yaml: &Yaml, index: &str) -> Result<T, Fail> {
        let val: i64 = match Self::get_option(yaml, index)?.as_i64() {
            Some(val) => val,
            None => {
                let message: String = format!("parameter {} has unexpected type", index);
                return Err(Fail::new(libc::EINVAL, message.as_str()));
            },
        };
        match T::try_from(val) {
            Ok(val) => Ok(val),
            _ => {
                let message: String = format!("parameter \"{}\" is out of range", index);
                Err(Fail::new(libc::ERANGE, message.as_str()))
            },
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

/// Parses a configuration document.
impl FromStr for Config {
    type Err = Fail;

    fn from_str(config_s: &str) -> Result<Self, Self::Err> {
        let config: Vec<Yaml> = match YamlLoader::load_from_str(config_s) {
            Ok(config) => config,
            Err(e) => {
                let cause: String = format!("malformed configuration ({:?})", e);
                error!("from_str(): {}", cause);
                return Err(Fail::new(libc::EINVAL, &cause));
            },
        };
        match &config[..] {
            [config_obj] => Ok(Self(config_obj.clone())),
            _ => Err(Fail::new(libc::EINVAL, "wrong number of config objects")),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        match DEFAULT_CONFIG.parse() {
            Ok(config) => config,
            Err(e) => panic!("default(): built-in configuration is malformed ({:?})", e),
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::Config;
    use crate::runtime::types::NodeId;
    use ::anyhow::Result;

    fn parse(config_s: &str) -> Result<Config> {
        match config_s.parse::<Config>() {
            Ok(config) => Ok(config),
            Err(e) => anyhow::bail!("{:?}", e),
        }
    }

    #[test]
    fn default_is_a_single_node() -> Result<()> {
        let config: Config = Config::default();
        crate::ensure_eq!(config.num_nodes().ok(), Some(1));
        crate::ensure_eq!(config.coordinator().ok(), Some(NodeId(0)));
        crate::ensure_eq!(config.local_region_words().ok(), config.segment_words().ok());
        crate::ensure_eq!(config.parallel_for_threshold().ok(), Some(16));
        crate::ensure_eq!(config.work_stealing().ok(), Some(true));
        Ok(())
    }

    #[test]
    fn local_region_defaults_to_segment() -> Result<()> {
        let config: Config = parse(
            "
runtime: { num_nodes: 2, coordinator: 1, segment_words: 128 }
delegate: { clients: 2, ring_capacity: 16, ring_batch_size: 4 }
parallel_for: { threshold: 8 }
",
        )?;
        crate::ensure_eq!(config.local_region_words().ok(), Some(128));
        crate::ensure_eq!(config.delegate_clients().ok(), Some(2));
        crate::ensure_eq!(config.coordinator().ok(), Some(NodeId(1)));
        crate::ensure_eq!(config.work_stealing().ok(), Some(true));
        Ok(())
    }

    #[test]
    fn invalid_options_are_rejected() -> Result<()> {
        let config: Config = parse(
            "
runtime: { num_nodes: 2, coordinator: 2, segment_words: 64 }
delegate: { clients: 0, ring_capacity: 16, ring_batch_size: 4, local_region_words: 65 }
parallel_for: { threshold: 0, work_stealing: 3 }
",
        )?;
        crate::ensure_eq!(config.coordinator().map_err(|e| e.errno), Err(libc::ERANGE));
        crate::ensure_eq!(config.delegate_clients().map_err(|e| e.errno), Err(libc::EINVAL));
        crate::ensure_eq!(config.local_region_words().map_err(|e| e.errno), Err(libc::ERANGE));
        crate::ensure_eq!(config.parallel_for_threshold().map_err(|e| e.errno), Err(libc::EINVAL));
        crate::ensure_eq!(config.work_stealing().map_err(|e| e.errno), Err(libc::EINVAL));
        Ok(())
    }

    #[test]
    fn missing_section_is_reported() -> Result<()> {
        let config: Config = parse("runtime: { num_nodes: 1 }")?;
        crate::ensure_eq!(config.delegate_clients().map_err(|e| e.errno), Err(libc::EINVAL));
        crate::ensure_eq!(config.segment_words().map_err(|e| e.errno), Err(libc::EINVAL));
        Ok(())
    }

    #[test]
    fn malformed_document_is_rejected() -> Result<()> {
        crate::ensure_eq!("runtime: [".parse::<Config>().is_err(), true);
        crate::ensure_eq!(Config::new("/nonexistent/config.yaml").map_err(|e| e.errno).err(), Some(libc::ENOENT));
        Ok(())
    }
}

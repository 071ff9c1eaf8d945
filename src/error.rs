//! Build-time failures for the stage graph and its substrate.
//!
//! Anything in here is fatal before the executor starts: the rig never runs a
//! partially wired graph. Runtime faults (panicking callbacks) are not errors,
//! they are caught per callback and counted in the executor report.

use std::{path::PathBuf, time::Duration};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("channel '{0}' already exists")]
    DuplicateChannel(String),

    #[error("stage '{0}' is declared more than once")]
    DuplicateStage(String),

    #[error("stage name must not be empty")]
    EmptyStageName,

    #[error("stage '{stage}': timer period must be non-zero (got {period:?})")]
    InvalidPeriod { stage: String, period: Duration },

    #[error("stage '{stage}': missing '{binding}' channel binding")]
    MissingBinding { stage: String, binding: &'static str },

    #[error("stage '{stage}': {kind} stages take no '{binding}' binding")]
    UnsupportedBinding {
        stage: String,
        kind: &'static str,
        binding: &'static str,
    },

    #[error("stage '{stage}' subscribes to '{channel}' but no stage publishes on it")]
    DanglingSubscription { stage: String, channel: String },

    #[error("stage '{0}' already has a timer")]
    DuplicateTimer(String),

    #[error("node id {0} was not issued by this executor")]
    UnknownNode(usize),

    #[error("worker pool needs at least one thread")]
    NoWorkers,

    #[error("invalid latency model: {0}")]
    InvalidLatency(String),

    #[error("failed to read config {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open output {path}: {source}")]
    OutputIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("failed to spawn thread '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, GraphError>;

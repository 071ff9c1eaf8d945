//! # latency_rig
//!
//! Latency benchmark workload: a small graph of stages exchanging time-stamped
//! messages over named channels, with injected log-normal processing delays.
//!
//! - `substrate`: channels, publishers, timers and the multi-threaded executor.
//! - `stages`: sensor, relays (filter / timer / message-driven), sink, mailbox, latency model.
//! - `graph`: declarative topology (`GraphConfig`, TOML) and its assembly.
//! - `utils`: per-stage metrics, event trace, CSV summary export.

pub mod error;
pub mod graph;
pub mod stages;
pub mod substrate;
pub mod utils;

pub use error::{GraphError, Result};
pub use graph::{Graph, GraphConfig, GraphReport, RunningGraph};

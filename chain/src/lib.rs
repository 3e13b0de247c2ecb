//! Chain library crate.
//!
//! This crate provides the building blocks of the poll-voting
//! proof-of-work blockchain:
//!
//! - strongly-typed domain types (`types`),
//! - the chain with its admission and fork rules (`blockchain`),
//! - framed socket I/O and the wire protocol (`net`),
//! - the tracker client (`tracker`),
//! - the peer node with its cooperating tasks (`node`),
//! - Prometheus-based metrics (`metrics`),
//! - poll queries and the scenario runner (`app`),
//! - and the top-level node configuration (`config`).
//!
//! The `peer` binary composes these pieces; the `tracker` workspace
//! member reuses `net` for its side of the protocol.

pub mod app;
pub mod blockchain;
pub mod config;
pub mod metrics;
pub mod net;
pub mod node;
pub mod tracker;
pub mod types;

// Re-export top-level configuration types.
pub use config::{ConfigError, DEFAULT_DIFFICULTY, FaultConfig, MetricsConfig, NodeConfig, TamperType};

// Re-export the chain and the node surface.
pub use blockchain::Blockchain;
pub use node::{NodeError, Peer, PeerState};

// Re-export the wire-protocol surface used by the tracker binary.
pub use net::framed::FrameReader;
pub use net::wire::{FrameTag, PeerAddr, PeerRequest, WireError};

// Re-export the tracker client.
pub use tracker::TrackerClient;

// Re-export metrics registry and node metrics.
pub use metrics::{MetricsRegistry, NodeMetrics, run_prometheus_http_server};

// Re-export domain types at the crate root for convenience.
pub use types::*;

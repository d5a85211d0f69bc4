//! Cluster node discovery
//!
//! Periodically asks the cluster for its members and republishes their
//! HTTP addresses as the client's server list.

pub mod address;
pub mod node_checker;
pub mod nodes_info;

pub use address::parse_node_address;
pub use node_checker::{CheckerState, CycleOutcome, NodeChecker};
pub use nodes_info::{NodeEntry, NodesInfo};

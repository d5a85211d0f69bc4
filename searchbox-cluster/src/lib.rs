pub mod action;
pub mod client;
pub mod discovery;
pub mod error;
pub mod server_set;

pub use action::{Action, ActionResult, NodesInfoAction};
pub use client::{ClusterClient, HttpClient};
pub use discovery::{
    parse_node_address, CheckerState, CycleOutcome, NodeChecker, NodeEntry, NodesInfo,
};
pub use error::{Error, Result};
pub use server_set::ServerSet;

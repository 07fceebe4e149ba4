//! Module containing all error types

use thiserror::Error;

use crate::algorithms::NodeId;

/// Main error type
#[derive(Debug, Error)]
pub enum Error {
    /// The target cannot be reached from the source, given the current topology and the set of
    /// excluded nodes.
    #[error("No path found from {from:?} to {to:?}")]
    NoPathFound {
        /// Where the computation started
        from: NodeId,
        /// Where the computation should have ended
        to: NodeId,
    },
    /// The energy margin of a switch was queried before the switch registered its first sample.
    #[error("Switch {0:#x} has no energy sample")]
    NotInitialized(u64),
    /// A header field required to build the flow key is missing.
    #[error("Malformed flow key: missing field {0}")]
    MalformedFlowKey(&'static str),
    /// The flow table and the per-node flow index disagree.
    #[error("Flow table invariant violated: {0}")]
    InvariantViolation(String),
    /// Combining two weights overflowed the numeric range of the weight.
    #[error("Weight overflow while combining path weights")]
    WeightOverflow,
    /// The node does not exist in the topology.
    #[error("Unknown node {0:?}")]
    UnknownNode(NodeId),
    /// No switch with that datapath id exists in the topology.
    #[error("Unknown switch with datapath id {0:#x}")]
    UnknownSwitch(u64),
    /// The host-layer address is not attached to any node.
    #[error("Address {0} is not attached to the topology")]
    UnresolvedAddress(String),
    /// The forecast table has no entry for the device at that bucket.
    #[error("No forecast for device {device} at bucket {bucket}")]
    MissingForecast {
        /// Device name
        device: String,
        /// Time-of-day bucket
        bucket: usize,
    },
    /// Configuration or input data could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),
    /// IO Error
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON parsing error
    #[error("JSON Error: {0}")]
    Json(#[from] serde_json::Error),
    /// TOML parsing error
    #[error("TOML Error: {0}")]
    Toml(#[from] toml::de::Error),
}

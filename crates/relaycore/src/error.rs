use crate::NodeId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors fatal to an entire run
///
/// Pre-run validation failures (`CyclicGraph`, `UnknownNode`,
/// `UnregisteredNodeType`) are returned before any node executes. The
/// remaining variants are invariant violations detected mid-run; the
/// executor surfaces them as an aborted run status so committed node
/// results are still reported.
#[derive(Error, Debug, Clone)]
pub enum RunError {
    #[error("Cyclic dependency detected")]
    CyclicGraph,

    #[error("Graph references unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("Graph not found: {0}")]
    GraphNotFound(crate::GraphId),

    #[error("Unregistered node type: {0}")]
    UnregisteredNodeType(String),

    #[error("Failed to create handler for '{node_type}': {message}")]
    HandlerInit { node_type: String, message: String },

    #[error("Node {node} references unresolved output '{key}'")]
    UnresolvedReference { node: NodeId, key: String },

    #[error("Task join error: {0}")]
    Join(String),
}

/// Node-local failures, captured inside a `NodeResult`
///
/// These never unwind past the executor: the run continues on branches
/// that do not depend on the failed node.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail")]
pub enum NodeFailure {
    #[error("Sandbox unreachable: {0}")]
    SandboxUnreachable(String),

    #[error("Sandbox returned HTTP {status}")]
    SandboxHttp { status: u16 },

    #[error("Sandbox execution failed: {0}")]
    SandboxExecution(String),

    #[error("Upstream node {upstream} failed")]
    DependencyFailed { upstream: NodeId },

    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input '{field}': expected {expected}")]
    InvalidInput { field: String, expected: String },

    #[error("Timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Cancelled")]
    Cancelled,
}

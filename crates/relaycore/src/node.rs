use crate::{events::EventEmitter, GraphId, NodeFailure, NodeId, RunId, Value};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Core trait implemented by every executable node handler
///
/// A handler is a pure function of its resolved inputs and the read-only
/// run context. It must never signal failure by returning `Err` or by
/// panicking: failures are carried inside the returned `NodeResult` so the
/// executor can keep independent branches running.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// Unique type identifier (e.g. "code.run", "logic.condition")
    fn node_type(&self) -> &str;

    /// Execute the node with resolved inputs
    async fn run(&self, ctx: NodeContext) -> NodeResult;
}

/// Execution context passed to each handler
///
/// Handlers see a read-only snapshot: their own resolved inputs plus the
/// run's global variables. All mutation of run state goes through the
/// executor's commit point.
#[derive(Clone)]
pub struct NodeContext {
    pub node_id: NodeId,

    /// Inputs after binding resolution (static / global / upstream ref)
    pub inputs: HashMap<String, Value>,

    /// Immutable workflow-global variables
    pub globals: Arc<HashMap<String, Value>>,

    /// Emitter for real-time node events
    pub events: EventEmitter,

    /// Cancelled when the run is cancelled; long calls should observe it
    pub cancellation: tokio_util::sync::CancellationToken,
}

impl NodeContext {
    /// Get required input, or a failure suitable for a `NodeResult`
    pub fn require_input(&self, name: &str) -> Result<&Value, NodeFailure> {
        self.inputs
            .get(name)
            .ok_or_else(|| NodeFailure::MissingInput(name.to_string()))
    }

    /// Get required string input
    pub fn require_str(&self, name: &str) -> Result<&str, NodeFailure> {
        self.require_input(name)?
            .as_str()
            .ok_or_else(|| NodeFailure::InvalidInput {
                field: name.to_string(),
                expected: "string".to_string(),
            })
    }
}

/// Outcome of one node execution: success payload XOR failure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome")]
pub enum NodeOutcome {
    Success {
        /// Output key -> value, visible to downstream nodes
        outputs: HashMap<String, Value>,
        /// Selected control successor, set only by branching handlers
        branch: Option<String>,
    },
    Failure(NodeFailure),
}

/// A node's result: outcome plus the observability envelope
///
/// Immutable once produced. The trace is never used for data flow but is
/// always preserved in the run report for debugging and billing surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResult {
    pub outcome: NodeOutcome,
    pub trace: NodeTrace,
}

impl NodeResult {
    pub fn success(outputs: HashMap<String, Value>) -> Self {
        Self {
            outcome: NodeOutcome::Success {
                outputs,
                branch: None,
            },
            trace: NodeTrace::default(),
        }
    }

    pub fn branch(outputs: HashMap<String, Value>, branch: impl Into<String>) -> Self {
        Self {
            outcome: NodeOutcome::Success {
                outputs,
                branch: Some(branch.into()),
            },
            trace: NodeTrace::default(),
        }
    }

    pub fn failure(failure: NodeFailure) -> Self {
        Self {
            outcome: NodeOutcome::Failure(failure),
            trace: NodeTrace::default(),
        }
    }

    pub fn with_trace(mut self, trace: NodeTrace) -> Self {
        self.trace = trace;
        self
    }

    pub fn outputs(&self) -> Option<&HashMap<String, Value>> {
        match &self.outcome {
            NodeOutcome::Success { outputs, .. } => Some(outputs),
            NodeOutcome::Failure(_) => None,
        }
    }

    pub fn selected_branch(&self) -> Option<&str> {
        match &self.outcome {
            NodeOutcome::Success { branch, .. } => branch.as_deref(),
            NodeOutcome::Failure(_) => None,
        }
    }

    pub fn failure_ref(&self) -> Option<&NodeFailure> {
        match &self.outcome {
            NodeOutcome::Failure(f) => Some(f),
            NodeOutcome::Success { .. } => None,
        }
    }
}

/// Observability envelope attached to every node result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeTrace {
    /// Resolved inputs the handler actually received
    pub inputs: HashMap<String, Value>,
    /// Raw outputs produced (empty on failure)
    pub outputs: HashMap<String, Value>,
    /// Execution log text, e.g. sandbox console output
    pub log: Option<String>,
    pub elapsed_ms: u64,
}

/// Runtime-assigned status of a node within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Success,
    Failed,
    /// An ancestor failed; handler was never invoked
    DependencyFailed,
    /// On a non-selected branch; distinct from success and failure
    Skipped,
}

/// One node's entry in the final run report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeReport {
    pub node_id: NodeId,
    pub node_type: String,
    pub status: NodeStatus,
    /// Absent for skipped nodes, which never produce a result
    pub result: Option<NodeResult>,
}

/// Terminal status of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum RunStatus {
    /// Every non-skipped node succeeded
    Completed,
    /// At least one node failed but unaffected branches completed
    PartiallyFailed,
    /// Invariant violation or cancellation; committed results preserved
    Aborted { reason: String },
}

/// Terminal aggregation of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub graph_id: GraphId,
    pub status: RunStatus,
    /// One entry per node that reached a decision, in commit order
    pub nodes: Vec<NodeReport>,
    /// Declared run outputs that were producible
    pub outputs: HashMap<String, Value>,
    pub elapsed_ms: u64,
}

impl RunReport {
    pub fn node(&self, id: NodeId) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.node_id == id)
    }
}

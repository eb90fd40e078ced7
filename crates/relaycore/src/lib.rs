//! Core abstractions for the relay graph runtime
//!
//! This crate provides the fundamental types and traits that all other
//! components depend on: the dynamic value type, the graph definition,
//! the node handler contract, the error taxonomy, and execution events.

mod error;
mod events;
mod graph;
mod node;
mod value;

pub use error::{NodeFailure, RunError};
pub use events::{EventBus, EventEmitter, NodeEvent, RunEvent};
pub use graph::{
    BranchEdge, Graph, GraphId, GraphSettings, InputBinding, NodeId, NodeSpec, OutputBinding,
    Position, RunId,
};
pub use node::{
    NodeContext, NodeHandler, NodeOutcome, NodeReport, NodeResult, NodeStatus, NodeTrace,
    RunReport, RunStatus,
};
pub use value::Value;

/// Result type for runtime operations that can abort a run
pub type Result<T> = std::result::Result<T, RunError>;

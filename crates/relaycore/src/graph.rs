use crate::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub type GraphId = Uuid;
pub type NodeId = Uuid;
pub type RunId = Uuid;

/// Complete workflow graph definition
///
/// Data edges are implicit: every `InputBinding::Ref` creates one. Branch
/// edges are explicit control edges emitted by branching nodes. The union
/// of both must be acyclic; the executor rejects cycles before running
/// anything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Graph {
    pub id: GraphId,
    pub name: String,
    pub description: Option<String>,
    /// Declaration order is the stable tie-break for scheduling
    pub nodes: Vec<NodeSpec>,
    pub branches: Vec<BranchEdge>,
    /// Run-level outputs materialized from node outputs at the end of a run
    pub outputs: Vec<OutputBinding>,
    pub settings: GraphSettings,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            nodes: Vec::new(),
            branches: Vec::new(),
            outputs: Vec::new(),
            settings: GraphSettings::default(),
        }
    }

    pub fn add_node(&mut self, node: NodeSpec) -> NodeId {
        let id = node.id;
        self.nodes.push(node);
        id
    }

    /// Add a control edge taken when `from` selects branch `branch`
    pub fn branch(&mut self, from: NodeId, branch: impl Into<String>, to: NodeId) {
        self.branches.push(BranchEdge {
            from,
            branch: branch.into(),
            to,
        });
    }

    /// Declare a run-level output sourced from a node's output key
    pub fn expose_output(&mut self, name: impl Into<String>, node: NodeId, key: impl Into<String>) {
        self.outputs.push(OutputBinding {
            name: name.into(),
            node,
            key: key.into(),
        });
    }

    pub fn find_node(&self, id: NodeId) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// One configured operation in the graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: NodeId,
    pub node_type: String,
    pub name: Option<String>,
    /// Declared input keys and where each value comes from
    pub inputs: HashMap<String, InputBinding>,
    /// Editor metadata, carried through but unused by the runtime
    pub position: Option<Position>,
}

impl NodeSpec {
    pub fn new(node_type: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            node_type: node_type.into(),
            name: None,
            inputs: HashMap::new(),
            position: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Bind an input to a static value
    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inputs
            .insert(key.into(), InputBinding::Static(value.into()));
        self
    }

    /// Bind an input to another node's output key
    pub fn with_ref(mut self, key: impl Into<String>, node: NodeId, output: impl Into<String>) -> Self {
        self.inputs.insert(
            key.into(),
            InputBinding::Ref {
                node,
                key: output.into(),
            },
        );
        self
    }

    /// Bind an input to a workflow-global variable
    pub fn with_global(mut self, key: impl Into<String>, variable: impl Into<String>) -> Self {
        self.inputs
            .insert(key.into(), InputBinding::Global(variable.into()));
        self
    }

    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.position = Some(Position { x, y });
        self
    }

    /// Ids of nodes this spec reads outputs from
    pub fn referenced_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.inputs.values().filter_map(|binding| match binding {
            InputBinding::Ref { node, .. } => Some(*node),
            _ => None,
        })
    }
}

/// Source of one declared node input
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "source", content = "binding")]
pub enum InputBinding {
    /// Literal value taken verbatim
    Static(Value),
    /// Output `key` of an ancestor node
    Ref { node: NodeId, key: String },
    /// Workflow-global variable by name
    Global(String),
}

/// Explicit control edge from a branching node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchEdge {
    pub from: NodeId,
    pub branch: String,
    pub to: NodeId,
}

/// Run-level declared output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputBinding {
    pub name: String,
    pub node: NodeId,
    pub key: String,
}

/// Node position in the visual editor
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

/// Per-graph execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSettings {
    /// Upper bound on concurrently running nodes
    pub max_parallel: usize,
    /// Per-node wall clock limit; `None` falls back to the runtime default
    pub node_timeout_ms: Option<u64>,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            max_parallel: 10,
            node_timeout_ms: None,
        }
    }
}

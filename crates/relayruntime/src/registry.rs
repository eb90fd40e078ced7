use relaycore::{Graph, NodeFailure, NodeHandler, RunError};
use std::collections::HashMap;
use std::sync::Arc;

/// Factory trait for creating handler instances
pub trait HandlerFactory: Send + Sync {
    /// Create a new handler instance
    fn create(&self) -> Result<Box<dyn NodeHandler>, NodeFailure>;

    /// Node type identifier this factory serves
    fn node_type(&self) -> &str;

    /// Optional: description and port schema for tooling
    fn metadata(&self) -> HandlerMetadata {
        HandlerMetadata::default()
    }
}

/// Metadata about a node type
#[derive(Debug, Clone)]
pub struct HandlerMetadata {
    pub description: String,
    pub category: String,
    pub inputs: Vec<PortDefinition>,
    pub outputs: Vec<PortDefinition>,
}

impl Default for HandlerMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PortDefinition {
    pub name: String,
    pub description: String,
    pub required: bool,
}

/// Registry of available node types
///
/// Pure lookup, no per-run state. Lookup failure is a load-time validation
/// error: the executor calls `validate_graph` before any node runs, so an
/// unknown type never surfaces mid-run.
pub struct HandlerRegistry {
    factories: HashMap<String, Arc<dyn HandlerFactory>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register(&mut self, factory: Arc<dyn HandlerFactory>) {
        let node_type = factory.node_type().to_string();
        tracing::info!("Registering node type: {}", node_type);
        self.factories.insert(node_type, factory);
    }

    /// Instantiate a handler for a node type
    pub fn instantiate(&self, node_type: &str) -> Result<Box<dyn NodeHandler>, RunError> {
        let factory = self
            .factories
            .get(node_type)
            .ok_or_else(|| RunError::UnregisteredNodeType(node_type.to_string()))?;

        factory.create().map_err(|e| RunError::HandlerInit {
            node_type: node_type.to_string(),
            message: e.to_string(),
        })
    }

    /// Check that every node's declared type has a registered factory
    pub fn validate_graph(&self, graph: &Graph) -> Result<(), RunError> {
        for node in &graph.nodes {
            if !self.factories.contains_key(&node.node_type) {
                return Err(RunError::UnregisteredNodeType(node.node_type.clone()));
            }
        }
        Ok(())
    }

    pub fn list_node_types(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn metadata(&self, node_type: &str) -> Option<HandlerMetadata> {
        self.factories.get(node_type).map(|f| f.metadata())
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

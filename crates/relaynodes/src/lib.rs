//! Built-in node handlers
//!
//! The sandbox code-execution node and the conditional branch node.

mod condition;
mod sandbox;

pub use condition::{ConditionNode, ConditionNodeFactory};
pub use sandbox::{CodeRunNode, CodeRunNodeFactory, SandboxConfig};

use relayruntime::HandlerRegistry;
use std::sync::Arc;

/// Register all built-in nodes with a registry
pub fn register_all(registry: &mut HandlerRegistry) {
    registry.register(Arc::new(sandbox::CodeRunNodeFactory::from_env()));
    registry.register(Arc::new(condition::ConditionNodeFactory));
}

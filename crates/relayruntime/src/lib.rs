//! Graph execution runtime
//!
//! Drives a validated workflow graph in dependency order: resolves each
//! node's inputs, dispatches to the registered handler, commits results,
//! and aggregates per-node telemetry into one run report.

mod executor;
mod registry;
mod resolver;
mod runtime;

pub use executor::GraphExecutor;
pub use registry::{HandlerFactory, HandlerMetadata, HandlerRegistry, PortDefinition};
pub use resolver::{resolve_inputs, Gate};
pub use runtime::{GraphRuntime, RuntimeConfig};

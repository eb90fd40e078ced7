use crate::{registry::HandlerRegistry, GraphExecutor};
use relaycore::{EventBus, Graph, GraphId, RunError, RunReport, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Main runtime facade for executing workflow graphs
pub struct GraphRuntime {
    registry: Arc<HandlerRegistry>,
    executor: Arc<GraphExecutor>,
    event_bus: Arc<EventBus>,
    graphs: Arc<RwLock<HashMap<GraphId, Graph>>>,
}

impl GraphRuntime {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::with_registry(Arc::new(HandlerRegistry::new()), config)
    }

    pub fn with_registry(registry: Arc<HandlerRegistry>, config: RuntimeConfig) -> Self {
        let executor = Arc::new(GraphExecutor::new(
            config.max_parallel_nodes,
            config.default_node_timeout_ms,
        ));
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));

        Self {
            registry,
            executor,
            event_bus,
            graphs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Register a graph for execution by id
    pub async fn register_graph(&self, graph: Graph) {
        let mut graphs = self.graphs.write().await;
        graphs.insert(graph.id, graph);
    }

    /// Execute a registered graph by id
    pub async fn run_graph(
        &self,
        graph_id: GraphId,
        globals: HashMap<String, Value>,
    ) -> Result<RunReport, RunError> {
        let graphs = self.graphs.read().await;
        let graph = graphs
            .get(&graph_id)
            .ok_or(RunError::GraphNotFound(graph_id))?;
        self.run(graph, globals).await
    }

    /// Execute a graph directly, without registration
    pub async fn run(
        &self,
        graph: &Graph,
        globals: HashMap<String, Value>,
    ) -> Result<RunReport, RunError> {
        self.run_cancellable(graph, globals, CancellationToken::new())
            .await
    }

    /// Execute with an external cancellation token (e.g. client disconnect).
    /// On cancel the run stops scheduling, best-effort cancels in-flight
    /// handlers, and reports `Aborted` with committed results preserved.
    pub async fn run_cancellable(
        &self,
        graph: &Graph,
        globals: HashMap<String, Value>,
        cancellation: CancellationToken,
    ) -> Result<RunReport, RunError> {
        self.executor
            .execute(graph, &self.registry, &self.event_bus, globals, cancellation)
            .await
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<relaycore::RunEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}

impl Default for GraphRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Process-wide ceiling on concurrently running nodes per run
    pub max_parallel_nodes: usize,
    pub event_buffer_size: usize,
    /// Applied when a graph does not set its own node timeout
    pub default_node_timeout_ms: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_parallel_nodes: 10,
            event_buffer_size: 1000,
            default_node_timeout_ms: Some(60_000),
        }
    }
}

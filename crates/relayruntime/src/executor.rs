use crate::registry::HandlerRegistry;
use crate::resolver::{resolve_inputs, Gate};
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use relaycore::{
    EventBus, Graph, NodeContext, NodeFailure, NodeHandler, NodeId, NodeOutcome, NodeReport,
    NodeResult, NodeStatus, RunError, RunEvent, RunId, RunReport, RunStatus, Value,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;

/// Executes workflow graphs as DAGs with bounded parallelism
///
/// One call to [`GraphExecutor::execute`] owns all run state for the
/// lifetime of that run. Handlers see read-only snapshots; outputs become
/// visible to dependents only when the executor commits the node's result.
pub struct GraphExecutor {
    max_parallel: usize,
    default_node_timeout_ms: Option<u64>,
}

/// Accumulated state of one run, owned by the executor loop
struct RunContext {
    statuses: HashMap<NodeId, NodeStatus>,
    outputs: HashMap<NodeId, HashMap<String, Value>>,
    branches: HashMap<NodeId, Option<String>>,
    reports: Vec<NodeReport>,
}

impl RunContext {
    fn new() -> Self {
        Self {
            statuses: HashMap::new(),
            outputs: HashMap::new(),
            branches: HashMap::new(),
            reports: Vec::new(),
        }
    }

    fn decided(&self, node: &NodeId) -> bool {
        self.statuses.contains_key(node)
    }

    fn commit(
        &mut self,
        node_id: NodeId,
        node_type: &str,
        status: NodeStatus,
        result: Option<NodeResult>,
    ) {
        if let Some(result) = &result {
            if let NodeOutcome::Success { outputs, branch } = &result.outcome {
                self.outputs.insert(node_id, outputs.clone());
                self.branches.insert(node_id, branch.clone());
            }
        }
        self.statuses.insert(node_id, status);
        self.reports.push(NodeReport {
            node_id,
            node_type: node_type.to_string(),
            status,
            result,
        });
    }
}

impl GraphExecutor {
    pub fn new(max_parallel: usize, default_node_timeout_ms: Option<u64>) -> Self {
        Self {
            max_parallel,
            default_node_timeout_ms,
        }
    }

    /// Execute a graph and aggregate every node's outcome into a report.
    ///
    /// Returns `Err` only for pre-run validation failures, before any node
    /// has executed. Mid-run invariant violations and cancellation surface
    /// as `RunStatus::Aborted` with all committed results preserved.
    pub async fn execute(
        &self,
        graph: &Graph,
        registry: &HandlerRegistry,
        event_bus: &EventBus,
        globals: HashMap<String, Value>,
        cancellation: CancellationToken,
    ) -> Result<RunReport, RunError> {
        let run_id = RunId::new_v4();
        let start_time = Instant::now();

        // Everything that can be rejected is rejected here, with zero
        // side effects: unknown types, dangling references, cycles.
        registry.validate_graph(graph)?;
        let (dag, node_to_index) = build_dag(graph)?;
        if toposort(&dag, None).is_err() {
            return Err(RunError::CyclicGraph);
        }

        let mut handlers: HashMap<NodeId, Box<dyn NodeHandler>> = HashMap::new();
        for spec in &graph.nodes {
            handlers.insert(spec.id, registry.instantiate(&spec.node_type)?);
        }

        event_bus.emit(RunEvent::RunStarted {
            run_id,
            graph_id: graph.id,
            timestamp: Utc::now(),
        });
        tracing::info!(%run_id, graph = %graph.name, "starting run");

        let globals = Arc::new(globals);
        let mut ctx = RunContext::new();
        let mut running = FuturesUnordered::new();
        let mut in_flight: HashSet<NodeId> = HashSet::new();
        let node_timeout = graph
            .settings
            .node_timeout_ms
            .or(self.default_node_timeout_ms);
        let max_parallel = graph.settings.max_parallel.min(self.max_parallel).max(1);
        let mut abort_reason: Option<String> = None;

        loop {
            if abort_reason.is_none() && cancellation.is_cancelled() {
                abort_reason = Some("run cancelled".to_string());
            }
            if abort_reason.is_none() {
                // Scheduling pass: commit gated nodes synthetically and
                // spawn handlers for runnable ones. Committing inside the
                // pass can make more nodes ready, so repeat until quiet.
                loop {
                    let ready = self.find_ready(graph, &dag, &node_to_index, &ctx, &in_flight);
                    if ready.is_empty() {
                        break;
                    }
                    let mut progressed = false;

                    for node_id in ready {
                        if running.len() >= max_parallel {
                            break;
                        }
                        let spec = graph
                            .find_node(node_id)
                            .ok_or(RunError::UnknownNode(node_id))?;

                        // Control gating first: a node behind a branch edge
                        // runs only if some selected edge points at it.
                        match branch_gate(graph, node_id, &ctx) {
                            BranchGate::Blocked => {
                                self.commit_skipped(&mut ctx, event_bus, run_id, spec);
                                progressed = true;
                                continue;
                            }
                            BranchGate::UpstreamFailed(upstream) => {
                                self.commit_dependency_failed(
                                    &mut ctx, event_bus, run_id, spec, upstream,
                                );
                                progressed = true;
                                continue;
                            }
                            BranchGate::Open => {}
                        }

                        // Data gating: cascade failures and skips without
                        // ever invoking the handler.
                        let inputs = match resolve_inputs(
                            spec,
                            &ctx.statuses,
                            &ctx.outputs,
                            &globals,
                        ) {
                            Ok(Gate::Run(inputs)) => inputs,
                            Ok(Gate::DependencyFailed { upstream }) => {
                                self.commit_dependency_failed(
                                    &mut ctx, event_bus, run_id, spec, upstream,
                                );
                                progressed = true;
                                continue;
                            }
                            Ok(Gate::Skipped) => {
                                self.commit_skipped(&mut ctx, event_bus, run_id, spec);
                                progressed = true;
                                continue;
                            }
                            Err(e) => {
                                abort_reason = Some(e.to_string());
                                break;
                            }
                        };

                        let handler = handlers
                            .remove(&node_id)
                            .ok_or(RunError::UnknownNode(node_id))?;

                        event_bus.emit(RunEvent::NodeStarted {
                            run_id,
                            node_id,
                            node_type: spec.node_type.clone(),
                            timestamp: Utc::now(),
                        });

                        let node_ctx = NodeContext {
                            node_id,
                            inputs: inputs.clone(),
                            globals: Arc::clone(&globals),
                            events: event_bus.create_emitter(run_id, node_id),
                            cancellation: cancellation.child_token(),
                        };

                        in_flight.insert(node_id);
                        running.push(tokio::spawn(run_handler(
                            handler,
                            node_ctx,
                            inputs,
                            node_timeout,
                        )));
                        progressed = true;
                    }

                    if !progressed || abort_reason.is_some() {
                        break;
                    }
                }
            }

            if running.is_empty() {
                break;
            }

            // The loop never blocks on one node's I/O: it parks here until
            // any in-flight handler commits, or the run is cancelled.
            let joined = tokio::select! {
                joined = running.next() => joined,
                _ = cancellation.cancelled(), if abort_reason.is_none() => {
                    // Stop scheduling; in-flight handlers observe their
                    // child token and wind down, and we drain them so
                    // their results still land in the partial report.
                    abort_reason = Some("run cancelled".to_string());
                    continue;
                }
            };

            let Some(joined) = joined else { break };
            let (node_id, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    abort_reason = Some(RunError::Join(e.to_string()).to_string());
                    continue;
                }
            };
            in_flight.remove(&node_id);

            let spec = graph
                .find_node(node_id)
                .ok_or(RunError::UnknownNode(node_id))?;
            let status = match &result.outcome {
                NodeOutcome::Success { outputs, .. } => {
                    tracing::info!(%node_id, elapsed_ms = result.trace.elapsed_ms, "node completed");
                    event_bus.emit(RunEvent::NodeCompleted {
                        run_id,
                        node_id,
                        outputs: outputs.clone(),
                        duration_ms: result.trace.elapsed_ms,
                        timestamp: Utc::now(),
                    });
                    NodeStatus::Success
                }
                NodeOutcome::Failure(failure) => {
                    tracing::warn!(%node_id, error = %failure, "node failed");
                    event_bus.emit(RunEvent::NodeFailed {
                        run_id,
                        node_id,
                        error: failure.to_string(),
                        timestamp: Utc::now(),
                    });
                    NodeStatus::Failed
                }
            };
            ctx.commit(node_id, &spec.node_type, status, Some(result));
        }

        let status = match abort_reason {
            Some(reason) => RunStatus::Aborted { reason },
            None => {
                let any_failed = ctx.statuses.values().any(|s| {
                    matches!(s, NodeStatus::Failed | NodeStatus::DependencyFailed)
                });
                if any_failed {
                    RunStatus::PartiallyFailed
                } else {
                    RunStatus::Completed
                }
            }
        };

        // Materialize declared run outputs from whatever branches produced
        // them; bindings into failed or skipped branches are simply absent.
        let mut run_outputs = HashMap::new();
        for binding in &graph.outputs {
            if let Some(value) = ctx
                .outputs
                .get(&binding.node)
                .and_then(|map| map.get(&binding.key))
            {
                run_outputs.insert(binding.name.clone(), value.clone());
            }
        }

        let elapsed_ms = start_time.elapsed().as_millis() as u64;
        event_bus.emit(RunEvent::RunCompleted {
            run_id,
            success: status == RunStatus::Completed,
            duration_ms: elapsed_ms,
            timestamp: Utc::now(),
        });
        tracing::info!(%run_id, ?status, elapsed_ms, "run finished");

        Ok(RunReport {
            run_id,
            graph_id: graph.id,
            status,
            nodes: ctx.reports,
            outputs: run_outputs,
            elapsed_ms,
        })
    }

    /// Nodes whose every predecessor has a committed result, in
    /// declaration order (the stable tie-break)
    fn find_ready(
        &self,
        graph: &Graph,
        dag: &DiGraph<NodeId, ()>,
        node_to_index: &HashMap<NodeId, NodeIndex>,
        ctx: &RunContext,
        in_flight: &HashSet<NodeId>,
    ) -> Vec<NodeId> {
        let mut ready = Vec::new();
        for spec in &graph.nodes {
            if ctx.decided(&spec.id) || in_flight.contains(&spec.id) {
                continue;
            }
            let idx = node_to_index[&spec.id];
            let deps_met = dag
                .neighbors_directed(idx, petgraph::Direction::Incoming)
                .all(|dep_idx| ctx.decided(dag.node_weight(dep_idx).expect("dag node")));
            if deps_met {
                ready.push(spec.id);
            }
        }
        ready
    }

    fn commit_skipped(
        &self,
        ctx: &mut RunContext,
        event_bus: &EventBus,
        run_id: RunId,
        spec: &relaycore::NodeSpec,
    ) {
        tracing::debug!(node_id = %spec.id, "node skipped");
        event_bus.emit(RunEvent::NodeSkipped {
            run_id,
            node_id: spec.id,
            status: NodeStatus::Skipped,
            timestamp: Utc::now(),
        });
        ctx.commit(spec.id, &spec.node_type, NodeStatus::Skipped, None);
    }

    fn commit_dependency_failed(
        &self,
        ctx: &mut RunContext,
        event_bus: &EventBus,
        run_id: RunId,
        spec: &relaycore::NodeSpec,
        upstream: NodeId,
    ) {
        let failure = NodeFailure::DependencyFailed { upstream };
        tracing::debug!(node_id = %spec.id, %upstream, "dependency failed, cascading");
        event_bus.emit(RunEvent::NodeFailed {
            run_id,
            node_id: spec.id,
            error: failure.to_string(),
            timestamp: Utc::now(),
        });
        ctx.commit(
            spec.id,
            &spec.node_type,
            NodeStatus::DependencyFailed,
            Some(NodeResult::failure(failure)),
        );
    }
}

/// Drive one handler with timing and an optional wall clock bound.
///
/// The executor owns the trace timing fields; handlers fill in log text
/// and their own view of inputs/outputs, and the resolved inputs are
/// backfilled so even a sparse handler result carries them.
async fn run_handler(
    handler: Box<dyn NodeHandler>,
    ctx: NodeContext,
    resolved_inputs: HashMap<String, Value>,
    node_timeout_ms: Option<u64>,
) -> (NodeId, NodeResult) {
    let node_id = ctx.node_id;
    let start = Instant::now();

    let mut result = match node_timeout_ms {
        Some(ms) => match timeout(Duration::from_millis(ms), handler.run(ctx)).await {
            Ok(result) => result,
            Err(_) => NodeResult::failure(NodeFailure::Timeout { ms }),
        },
        None => handler.run(ctx).await,
    };

    result.trace.elapsed_ms = start.elapsed().as_millis() as u64;
    if result.trace.inputs.is_empty() {
        result.trace.inputs = resolved_inputs;
    }
    if result.trace.outputs.is_empty() {
        if let Some(outputs) = result.outputs() {
            result.trace.outputs = outputs.clone();
        }
    }
    (node_id, result)
}

/// Decision from explicit control edges pointing at a node
enum BranchGate {
    /// No inbound branch edges, or at least one selected edge
    Open,
    /// All inbound branch edges unselected
    Blocked,
    /// No selected edge and some source node failed
    UpstreamFailed(NodeId),
}

fn branch_gate(graph: &Graph, node_id: NodeId, ctx: &RunContext) -> BranchGate {
    let inbound: Vec<_> = graph.branches.iter().filter(|e| e.to == node_id).collect();
    if inbound.is_empty() {
        return BranchGate::Open;
    }

    let mut failed_upstream = None;
    for edge in &inbound {
        match ctx.statuses.get(&edge.from) {
            Some(NodeStatus::Success) => {
                let selected = ctx
                    .branches
                    .get(&edge.from)
                    .and_then(|b| b.as_deref());
                if selected == Some(edge.branch.as_str()) {
                    return BranchGate::Open;
                }
            }
            Some(NodeStatus::Failed) | Some(NodeStatus::DependencyFailed) => {
                failed_upstream = Some(edge.from);
            }
            _ => {}
        }
    }

    match failed_upstream {
        Some(upstream) => BranchGate::UpstreamFailed(upstream),
        None => BranchGate::Blocked,
    }
}

/// Build the combined data + control DAG, validating node references
fn build_dag(graph: &Graph) -> Result<(DiGraph<NodeId, ()>, HashMap<NodeId, NodeIndex>), RunError> {
    let mut dag = DiGraph::new();
    let mut node_to_index = HashMap::new();

    for spec in &graph.nodes {
        let idx = dag.add_node(spec.id);
        node_to_index.insert(spec.id, idx);
    }

    // Implicit data edges from input references
    for spec in &graph.nodes {
        let to_idx = node_to_index[&spec.id];
        for upstream in spec.referenced_nodes() {
            if upstream == spec.id {
                return Err(RunError::CyclicGraph);
            }
            let from_idx = *node_to_index
                .get(&upstream)
                .ok_or(RunError::UnknownNode(upstream))?;
            dag.add_edge(from_idx, to_idx, ());
        }
    }

    // Explicit control edges from branching nodes
    for edge in &graph.branches {
        let from_idx = *node_to_index
            .get(&edge.from)
            .ok_or(RunError::UnknownNode(edge.from))?;
        let to_idx = *node_to_index
            .get(&edge.to)
            .ok_or(RunError::UnknownNode(edge.to))?;
        dag.add_edge(from_idx, to_idx, ());
    }

    Ok((dag, node_to_index))
}

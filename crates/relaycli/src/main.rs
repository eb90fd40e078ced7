use anyhow::Result;
use clap::{Parser, Subcommand};
use relaycore::{Graph, NodeSpec, NodeStatus, RunEvent, RunStatus, Value};
use relayruntime::{GraphRuntime, HandlerRegistry, RuntimeConfig};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "Relay graph runtime CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a graph file
    Run {
        /// Path to graph JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Global variables as a JSON object
        #[arg(short, long)]
        globals: Option<String>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a graph file without executing it
    Validate {
        /// Path to graph JSON file
        file: PathBuf,
    },

    /// List available node types
    Nodes,

    /// Create a new example graph
    Init {
        /// Output file path
        #[arg(short, long, default_value = "graph.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            globals,
            verbose,
        } => {
            // RUST_LOG wins over the verbosity flag when set
            let default_directive = if verbose { "debug" } else { "info" };
            let filter = tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
            tracing_subscriber::fmt().with_env_filter(filter).init();

            run_graph(file, globals).await?;
        }

        Commands::Validate { file } => {
            validate_graph(file)?;
        }

        Commands::Nodes => {
            list_nodes();
        }

        Commands::Init { output } => {
            create_example_graph(output)?;
        }
    }

    Ok(())
}

fn parse_globals(input: Option<String>) -> Result<HashMap<String, Value>> {
    let Some(input) = input else {
        return Ok(HashMap::new());
    };
    let json: serde_json::Value = serde_json::from_str(&input)?;
    let serde_json::Value::Object(map) = json else {
        return Err(anyhow::anyhow!("Globals must be a JSON object"));
    };
    Ok(map
        .into_iter()
        .map(|(k, v)| (k, Value::from_json(v)))
        .collect())
}

fn build_runtime() -> GraphRuntime {
    let mut registry = HandlerRegistry::new();
    relaynodes::register_all(&mut registry);
    GraphRuntime::with_registry(Arc::new(registry), RuntimeConfig::default())
}

async fn run_graph(file: PathBuf, globals: Option<String>) -> Result<()> {
    println!("Loading graph from: {}", file.display());

    let graph_json = std::fs::read_to_string(&file)?;
    let graph: Graph = serde_json::from_str(&graph_json)?;

    println!("Graph: {} ({} nodes)", graph.name, graph.nodes.len());
    println!();

    let globals = parse_globals(globals)?;
    let runtime = build_runtime();

    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                RunEvent::RunStarted { .. } => println!("Run started"),
                RunEvent::NodeStarted {
                    node_id, node_type, ..
                } => {
                    println!("  -> {} ({})", node_id, node_type);
                }
                RunEvent::NodeCompleted {
                    node_id,
                    duration_ms,
                    ..
                } => {
                    println!("  ok {} in {}ms", node_id, duration_ms);
                }
                RunEvent::NodeFailed { node_id, error, .. } => {
                    println!("  !! {} failed: {}", node_id, error);
                }
                RunEvent::NodeSkipped { node_id, .. } => {
                    println!("  -- {} skipped", node_id);
                }
                RunEvent::NodeEvent { node_id, event, .. } => match event {
                    relaycore::NodeEvent::Info { message } => {
                        println!("     [{}] {}", node_id, message);
                    }
                    relaycore::NodeEvent::Warning { message } => {
                        println!("     [{}] warning: {}", node_id, message);
                    }
                },
                RunEvent::RunCompleted {
                    success,
                    duration_ms,
                    ..
                } => {
                    if success {
                        println!("Run completed in {}ms", duration_ms);
                    } else {
                        println!("Run did not complete cleanly ({}ms)", duration_ms);
                    }
                }
            }
        }
    });

    // Ctrl-C cancels the run and still prints the partial report
    let cancellation = CancellationToken::new();
    let cancel_guard = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_guard.cancel();
        }
    });

    let report = runtime.run_cancellable(&graph, globals, cancellation).await?;

    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    event_task.abort();

    println!();
    println!("Run {} [{}]", report.run_id, status_label(&report.status));
    for node in &report.nodes {
        let label = match node.status {
            NodeStatus::Success => "ok",
            NodeStatus::Failed => "failed",
            NodeStatus::DependencyFailed => "dependency-failed",
            NodeStatus::Skipped => "skipped",
        };
        println!("  {} {} ({})", label, node.node_id, node.node_type);
        if let Some(result) = &node.result {
            if let Some(failure) = result.failure_ref() {
                println!("     error: {}", failure);
            }
            if let Some(log) = &result.trace.log {
                if !log.is_empty() {
                    println!("     log: {}", log);
                }
            }
        }
    }

    if !report.outputs.is_empty() {
        println!();
        println!("Outputs:");
        for (name, value) in &report.outputs {
            println!("  {}: {}", name, value.to_json());
        }
    }

    Ok(())
}

fn status_label(status: &RunStatus) -> String {
    match status {
        RunStatus::Completed => "completed".to_string(),
        RunStatus::PartiallyFailed => "partially-failed".to_string(),
        RunStatus::Aborted { reason } => format!("aborted: {}", reason),
    }
}

fn validate_graph(file: PathBuf) -> Result<()> {
    println!("Validating graph: {}", file.display());

    let graph_json = std::fs::read_to_string(&file)?;
    let graph: Graph = serde_json::from_str(&graph_json)?;

    let mut registry = HandlerRegistry::new();
    relaynodes::register_all(&mut registry);
    registry.validate_graph(&graph)?;

    println!("Graph is valid:");
    println!("  Name: {}", graph.name);
    println!("  Nodes: {}", graph.nodes.len());
    println!("  Branch edges: {}", graph.branches.len());
    println!("  Declared outputs: {}", graph.outputs.len());

    Ok(())
}

fn list_nodes() {
    println!("Available node types:");
    println!();

    let mut registry = HandlerRegistry::new();
    relaynodes::register_all(&mut registry);

    for node_type in registry.list_node_types() {
        if let Some(metadata) = registry.metadata(&node_type) {
            println!("  {} ({})", node_type, metadata.category);
            if !metadata.description.is_empty() {
                println!("    {}", metadata.description);
            }
        } else {
            println!("  {}", node_type);
        }
    }
}

fn create_example_graph(output: PathBuf) -> Result<()> {
    let mut graph = Graph::new("Example code graph");
    graph.description = Some("Runs code in the sandbox and branches on the result".to_string());

    let code_node = NodeSpec::new("code.run")
        .with_name("Add one")
        .with_input("code", "return {x: variables.a + 1}")
        .with_global("a", "a")
        .with_position(100.0, 100.0);

    let check_node = NodeSpec::new("logic.condition")
        .with_name("Check result")
        .with_input("op", "gt")
        .with_input("right", 1i64)
        .with_position(300.0, 100.0);

    let code_id = graph.add_node(code_node);
    let check_node = check_node.with_ref("left", code_id, "x");
    let check_id = graph.add_node(check_node);

    graph.expose_output("x", code_id, "x");
    graph.expose_output("big_enough", check_id, "result");

    let json = serde_json::to_string_pretty(&graph)?;
    std::fs::write(&output, json)?;

    println!("Created example graph: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  relay run --file {} --globals '{{\"a\": 1}}'",
        output.display()
    );

    Ok(())
}

use relaycore::{EventBus, NodeContext, NodeFailure, NodeHandler, NodeOutcome, RunId, Value};
use relaynodes::{CodeRunNode, SandboxConfig};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

fn create_test_context(inputs: HashMap<String, Value>) -> NodeContext {
    let event_bus = Arc::new(EventBus::new(100));
    let run_id = RunId::new_v4();
    let node_id = uuid::Uuid::new_v4();

    NodeContext {
        node_id,
        inputs,
        globals: Arc::new(HashMap::new()),
        events: event_bus.create_emitter(run_id, node_id),
        cancellation: tokio_util::sync::CancellationToken::new(),
    }
}

fn code_inputs(code: &str, variables: &[(&str, Value)]) -> HashMap<String, Value> {
    let mut inputs = HashMap::new();
    inputs.insert("code".to_string(), Value::from(code));
    for (key, value) in variables {
        inputs.insert(key.to_string(), value.clone());
    }
    inputs
}

/// One-shot HTTP stub: accepts a single request, reads it fully, and
/// answers with the given status line and body.
async fn spawn_sandbox(status_line: &'static str, body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        // Read headers, then the declared body length
        let body_start = loop {
            let n = socket.read(&mut buf).await.unwrap_or(0);
            if n == 0 {
                return;
            }
            request.extend_from_slice(&buf[..n]);
            if let Some(pos) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };
        let headers = String::from_utf8_lossy(&request[..body_start]).to_lowercase();
        let content_length: usize = headers
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0);
        while request.len() < body_start + content_length {
            let n = socket.read(&mut buf).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }

        let response = format!(
            "{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status_line,
            body.len(),
            body
        );
        let _ = socket.write_all(response.as_bytes()).await;
    });

    format!("http://{}", addr)
}

fn node_for(base_url: String) -> CodeRunNode {
    CodeRunNode::new(SandboxConfig {
        base_url,
        timeout: Duration::from_millis(500),
    })
}

#[tokio::test]
async fn successful_run_spreads_code_return_into_outputs() {
    let base_url = spawn_sandbox(
        "HTTP/1.1 200 OK",
        r#"{"success": true, "data": {"codeReturn": {"x": 2}, "log": ""}}"#,
    )
    .await;
    let node = node_for(base_url);

    let ctx = create_test_context(code_inputs(
        "return {x: variables.a + 1}",
        &[("a", Value::from(1i64))],
    ));
    let result = node.run(ctx).await;

    let outputs = result.outputs().expect("should succeed");
    assert_eq!(outputs.get("x"), Some(&Value::from(2i64)));

    // Observability envelope is attached regardless of data flow
    assert_eq!(result.trace.outputs.get("x"), Some(&Value::from(2i64)));
    assert_eq!(result.trace.inputs.get("a"), Some(&Value::from(1i64)));
    assert!(
        !result.trace.inputs.contains_key("code"),
        "code is not a sandbox variable"
    );
    assert_eq!(result.trace.log.as_deref(), Some(""));
}

#[tokio::test]
async fn sandbox_reported_failure_is_not_a_transport_error() {
    let base_url = spawn_sandbox("HTTP/1.1 200 OK", r#"{"success": false}"#).await;
    let node = node_for(base_url);

    let ctx = create_test_context(code_inputs(
        "throw new Error()",
        &[("a", Value::from(1i64))],
    ));
    let result = node.run(ctx).await;

    assert!(matches!(
        result.failure_ref(),
        Some(NodeFailure::SandboxExecution(_))
    ));
    // Inputs are preserved for diagnostics even on failure
    assert_eq!(result.trace.inputs.get("a"), Some(&Value::from(1i64)));
    assert!(!result.trace.inputs.contains_key("code"));
}

#[tokio::test]
async fn non_2xx_maps_to_http_error() {
    let base_url = spawn_sandbox("HTTP/1.1 500 Internal Server Error", "oops").await;
    let node = node_for(base_url);

    let ctx = create_test_context(code_inputs("return {}", &[]));
    let result = node.run(ctx).await;

    assert!(matches!(
        result.failure_ref(),
        Some(NodeFailure::SandboxHttp { status: 500 })
    ));
}

#[tokio::test]
async fn malformed_body_is_a_transport_failure() {
    let base_url = spawn_sandbox("HTTP/1.1 200 OK", "not json at all").await;
    let node = node_for(base_url);

    let ctx = create_test_context(code_inputs("return {}", &[]));
    let result = node.run(ctx).await;

    assert!(matches!(
        result.failure_ref(),
        Some(NodeFailure::SandboxUnreachable(_))
    ));
}

#[tokio::test]
async fn connection_refused_maps_to_unreachable() {
    // Bind then drop to get a port nothing listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let node = node_for(format!("http://{}", addr));
    let ctx = create_test_context(code_inputs(
        "return {}",
        &[("payload", Value::from("untouched"))],
    ));
    let result = node.run(ctx).await;

    let failure = result.failure_ref().expect("should fail");
    assert!(matches!(failure, NodeFailure::SandboxUnreachable(_)));
    assert!(result.outputs().is_none());
    // Failure results still carry the variables that were sent
    assert_eq!(
        result.trace.inputs.get("payload"),
        Some(&Value::from("untouched"))
    );
}

#[tokio::test]
async fn unresponsive_sandbox_times_out_within_bound() {
    // Listener accepts but never answers
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let Ok((socket, _)) = listener.accept().await else {
            return;
        };
        tokio::time::sleep(Duration::from_secs(60)).await;
        drop(socket);
    });

    let node = node_for(format!("http://{}", addr));
    let ctx = create_test_context(code_inputs("return {}", &[]));

    let started = std::time::Instant::now();
    let result = node.run(ctx).await;

    assert!(
        started.elapsed() < Duration::from_secs(10),
        "call must respect the configured timeout"
    );
    assert!(matches!(
        result.failure_ref(),
        Some(NodeFailure::SandboxUnreachable(_))
    ));
}

#[tokio::test]
async fn missing_code_input_fails_locally() {
    let node = node_for("http://127.0.0.1:1".to_string());
    let ctx = create_test_context(HashMap::new());
    let result = node.run(ctx).await;

    assert!(matches!(
        result.failure_ref(),
        Some(NodeFailure::MissingInput(name)) if name == "code"
    ));
    assert!(matches!(result.outcome, NodeOutcome::Failure(_)));
}

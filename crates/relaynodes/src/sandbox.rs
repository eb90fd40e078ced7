use async_trait::async_trait;
use relaycore::{NodeContext, NodeFailure, NodeHandler, NodeResult, NodeTrace, Value};
use relayruntime::{HandlerFactory, HandlerMetadata, PortDefinition};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Configuration for the external code sandbox
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Base URL of the sandbox service, e.g. "http://localhost:3000"
    pub base_url: String,
    /// Upper bound on one sandbox call; exceeding it is a transport
    /// failure, never a silent hang
    pub timeout: Duration,
}

impl SandboxConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("SANDBOX_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Wire format of a sandbox response
#[derive(Debug, Deserialize)]
struct SandboxResponse {
    success: bool,
    #[serde(default)]
    data: Option<SandboxData>,
}

#[derive(Debug, Deserialize)]
struct SandboxData {
    #[serde(rename = "codeReturn", default)]
    code_return: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    log: String,
}

/// Executes user-supplied code in the external sandbox process
///
/// Sends `{code, variables}` to `{base_url}/sandbox/js` and spreads the
/// returned `codeReturn` object into this node's outputs, so the output
/// shape is whatever the executed code returned. Every failure mode is
/// captured in the returned result; this node never aborts the run.
pub struct CodeRunNode {
    client: reqwest::Client,
    config: SandboxConfig,
}

impl CodeRunNode {
    pub fn new(config: SandboxConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self { client, config }
    }

    async fn call_sandbox(
        &self,
        code: &str,
        variables: &HashMap<String, Value>,
        cancellation: &tokio_util::sync::CancellationToken,
    ) -> Result<SandboxData, NodeFailure> {
        let url = format!("{}/sandbox/js", self.config.base_url.trim_end_matches('/'));
        let variables_json: serde_json::Map<String, serde_json::Value> = variables
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        let body = serde_json::json!({
            "code": code,
            "variables": variables_json,
        });

        let request = self.client.post(&url).json(&body).send();
        let response = tokio::select! {
            response = request => response,
            _ = cancellation.cancelled() => return Err(NodeFailure::Cancelled),
        }
        .map_err(|e| NodeFailure::SandboxUnreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NodeFailure::SandboxHttp {
                status: status.as_u16(),
            });
        }

        // A 2xx with an undecodable body is still a transport failure:
        // the sandbox never reported a verdict on the code.
        let parsed: SandboxResponse = response
            .json()
            .await
            .map_err(|e| NodeFailure::SandboxUnreachable(format!("malformed body: {}", e)))?;

        if !parsed.success {
            return Err(NodeFailure::SandboxExecution("run code failed".to_string()));
        }

        Ok(parsed.data.unwrap_or(SandboxData {
            code_return: serde_json::Map::new(),
            log: String::new(),
        }))
    }
}

#[async_trait]
impl NodeHandler for CodeRunNode {
    fn node_type(&self) -> &str {
        "code.run"
    }

    async fn run(&self, ctx: NodeContext) -> NodeResult {
        // Every input other than the code itself becomes a sandbox variable
        let mut variables = ctx.inputs.clone();
        variables.remove("code");

        let trace = NodeTrace {
            inputs: variables.clone(),
            ..NodeTrace::default()
        };

        let code = match ctx.require_str("code") {
            Ok(code) => code,
            Err(failure) => return NodeResult::failure(failure).with_trace(trace),
        };

        ctx.events.info(format!(
            "running {} bytes of code in sandbox",
            code.len()
        ));

        match self.call_sandbox(code, &variables, &ctx.cancellation).await {
            Ok(data) => {
                let outputs: HashMap<String, Value> = data
                    .code_return
                    .into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect();
                NodeResult::success(outputs.clone()).with_trace(NodeTrace {
                    inputs: variables,
                    outputs,
                    log: Some(data.log),
                    ..NodeTrace::default()
                })
            }
            Err(failure) => {
                tracing::warn!(node_id = %ctx.node_id, error = %failure, "sandbox call failed");
                NodeResult::failure(failure).with_trace(trace)
            }
        }
    }
}

pub struct CodeRunNodeFactory {
    config: SandboxConfig,
}

impl CodeRunNodeFactory {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn from_env() -> Self {
        Self::new(SandboxConfig::from_env())
    }
}

impl HandlerFactory for CodeRunNodeFactory {
    fn create(&self) -> Result<Box<dyn NodeHandler>, NodeFailure> {
        Ok(Box::new(CodeRunNode::new(self.config.clone())))
    }

    fn node_type(&self) -> &str {
        "code.run"
    }

    fn metadata(&self) -> HandlerMetadata {
        HandlerMetadata {
            description: "Run user code in the external sandbox".to_string(),
            category: "code".to_string(),
            inputs: vec![PortDefinition {
                name: "code".to_string(),
                description: "Source code to execute; other inputs become variables".to_string(),
                required: true,
            }],
            outputs: Vec::new(),
        }
    }
}

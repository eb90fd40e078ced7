use async_trait::async_trait;
use relaycore::{NodeContext, NodeFailure, NodeHandler, NodeResult, Value};
use relayruntime::{HandlerFactory, HandlerMetadata, PortDefinition};
use std::collections::HashMap;

/// Branching node: compares `left` against `right` and selects the
/// "true" or "false" control successor
///
/// Exactly one branch is selected per run; nodes reachable only through
/// the other branch are skipped by the executor.
pub struct ConditionNode;

fn compare(op: &str, left: &Value, right: Option<&Value>) -> Result<bool, NodeFailure> {
    let result = match op {
        "is_empty" => !left.is_truthy(),
        "not_empty" => left.is_truthy(),
        "eq" => Some(left) == right,
        "ne" => Some(left) != right,
        "contains" => match (left, right) {
            (Value::String(s), Some(Value::String(needle))) => s.contains(needle),
            (Value::Array(items), Some(needle)) => items.contains(needle),
            _ => false,
        },
        "gt" | "lt" | "gte" | "lte" => {
            let (a, b) = match (left.as_f64(), right.and_then(Value::as_f64)) {
                (Some(a), Some(b)) => (a, b),
                _ => {
                    return Err(NodeFailure::InvalidInput {
                        field: "left".to_string(),
                        expected: "number".to_string(),
                    })
                }
            };
            match op {
                "gt" => a > b,
                "lt" => a < b,
                "gte" => a >= b,
                _ => a <= b,
            }
        }
        other => {
            return Err(NodeFailure::InvalidInput {
                field: "op".to_string(),
                expected: format!("known operator, got '{}'", other),
            })
        }
    };
    Ok(result)
}

#[async_trait]
impl NodeHandler for ConditionNode {
    fn node_type(&self) -> &str {
        "logic.condition"
    }

    async fn run(&self, ctx: NodeContext) -> NodeResult {
        let left = match ctx.require_input("left") {
            Ok(value) => value,
            Err(failure) => return NodeResult::failure(failure),
        };
        // Default operator is plain truthiness of `left`
        let op = ctx
            .inputs
            .get("op")
            .and_then(Value::as_str)
            .unwrap_or("not_empty");
        let right = ctx.inputs.get("right");

        let matched = match compare(op, left, right) {
            Ok(matched) => matched,
            Err(failure) => return NodeResult::failure(failure),
        };

        let branch = if matched { "true" } else { "false" };
        ctx.events.info(format!("condition selected branch '{}'", branch));

        let outputs = HashMap::from([("result".to_string(), Value::Bool(matched))]);
        NodeResult::branch(outputs, branch)
    }
}

pub struct ConditionNodeFactory;

impl HandlerFactory for ConditionNodeFactory {
    fn create(&self) -> Result<Box<dyn NodeHandler>, NodeFailure> {
        Ok(Box::new(ConditionNode))
    }

    fn node_type(&self) -> &str {
        "logic.condition"
    }

    fn metadata(&self) -> HandlerMetadata {
        HandlerMetadata {
            description: "Select the true/false control successor".to_string(),
            category: "logic".to_string(),
            inputs: vec![
                PortDefinition {
                    name: "left".to_string(),
                    description: "Value under test".to_string(),
                    required: true,
                },
                PortDefinition {
                    name: "op".to_string(),
                    description: "eq, ne, gt, lt, gte, lte, contains, is_empty, not_empty"
                        .to_string(),
                    required: false,
                },
                PortDefinition {
                    name: "right".to_string(),
                    description: "Comparison operand".to_string(),
                    required: false,
                },
            ],
            outputs: vec![PortDefinition {
                name: "result".to_string(),
                description: "The evaluated condition".to_string(),
                required: false,
            }],
        }
    }
}

use relaycore::{InputBinding, NodeId, NodeSpec, NodeStatus, RunError, Value};
use std::collections::HashMap;

/// Decision made before a node's handler is invoked
#[derive(Debug)]
pub enum Gate {
    /// All inputs resolved; the handler may run with these
    Run(HashMap<String, Value>),
    /// A referenced upstream node failed; cascade without invoking
    DependencyFailed { upstream: NodeId },
    /// A referenced upstream node was skipped; skip this node too
    Skipped,
}

/// Build a node's input set from its declared bindings.
///
/// Resolution per binding: `Static` values are taken verbatim, `Global`
/// reads the run's immutable variable map (missing names resolve to null),
/// `Ref` reads the committed output of the upstream node. Each input key
/// carries exactly one binding; when a caller layers sources onto the same
/// key the fixed precedence is static > global > upstream reference, never
/// varying per node type.
///
/// A `Ref` to a node with no committed result is a scheduling invariant
/// violation and aborts the run, as does a `Ref` to an output key a
/// succeeded upstream never produced (reachable because output shapes are
/// dynamic).
pub fn resolve_inputs(
    spec: &NodeSpec,
    statuses: &HashMap<NodeId, NodeStatus>,
    outputs: &HashMap<NodeId, HashMap<String, Value>>,
    globals: &HashMap<String, Value>,
) -> Result<Gate, RunError> {
    // Gate on upstream outcomes before touching any value: a failed
    // dependency wins over a skipped one.
    for upstream in spec.referenced_nodes() {
        match statuses.get(&upstream) {
            Some(NodeStatus::Failed) | Some(NodeStatus::DependencyFailed) => {
                return Ok(Gate::DependencyFailed { upstream });
            }
            _ => {}
        }
    }
    for upstream in spec.referenced_nodes() {
        if statuses.get(&upstream) == Some(&NodeStatus::Skipped) {
            return Ok(Gate::Skipped);
        }
    }

    let mut resolved = HashMap::with_capacity(spec.inputs.len());
    for (key, binding) in &spec.inputs {
        let value = match binding {
            InputBinding::Static(value) => value.clone(),
            InputBinding::Global(name) => globals.get(name).cloned().unwrap_or(Value::Null),
            InputBinding::Ref { node, key: out_key } => {
                if statuses.get(node) != Some(&NodeStatus::Success) {
                    // The executor only schedules a node once every
                    // predecessor has a committed result.
                    return Err(RunError::UnresolvedReference {
                        node: spec.id,
                        key: out_key.clone(),
                    });
                }
                outputs
                    .get(node)
                    .and_then(|map| map.get(out_key))
                    .cloned()
                    .ok_or_else(|| RunError::UnresolvedReference {
                        node: *node,
                        key: out_key.clone(),
                    })?
            }
        };
        resolved.insert(key.clone(), value);
    }

    Ok(Gate::Run(resolved))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn static_and_global_resolution() {
        let spec = NodeSpec::new("code.run")
            .with_input("code", "return {}")
            .with_global("mode", "mode")
            .with_global("absent", "nope");

        let globals = HashMap::from([("mode".to_string(), Value::from("fast"))]);
        let gate = resolve_inputs(&spec, &HashMap::new(), &HashMap::new(), &globals).unwrap();

        let Gate::Run(inputs) = gate else {
            panic!("expected Run gate");
        };
        assert_eq!(inputs["code"].as_str(), Some("return {}"));
        assert_eq!(inputs["mode"].as_str(), Some("fast"));
        assert!(inputs["absent"].is_null());
    }

    #[test]
    fn failed_upstream_cascades() {
        let upstream = Uuid::new_v4();
        let spec = NodeSpec::new("code.run").with_ref("data", upstream, "x");
        let statuses = HashMap::from([(upstream, NodeStatus::Failed)]);

        match resolve_inputs(&spec, &statuses, &HashMap::new(), &HashMap::new()).unwrap() {
            Gate::DependencyFailed { upstream: got } => assert_eq!(got, upstream),
            other => panic!("expected DependencyFailed, got {:?}", other),
        }
    }

    #[test]
    fn missing_dynamic_key_is_fatal() {
        let upstream = Uuid::new_v4();
        let spec = NodeSpec::new("code.run").with_ref("data", upstream, "missing");
        let statuses = HashMap::from([(upstream, NodeStatus::Success)]);
        let outputs = HashMap::from([(upstream, HashMap::new())]);

        let err = resolve_inputs(&spec, &statuses, &outputs, &HashMap::new()).unwrap_err();
        assert!(matches!(err, RunError::UnresolvedReference { .. }));
    }
}

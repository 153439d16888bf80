//! Resource command handlers (assign/release resources, add/remove receptors)

use cspsim_shared::{CompletionPolicy, DeviceCommand};
use serde_json::Value;
use tracing::info;

use super::run_observation;
use crate::command::CommandResponse;
use crate::device::DeviceContext;

/// Handle AssignResources, AddReceptors, ReleaseAllResources and
/// RemoveAllReceptors
pub fn handle_resources(
    ctx: &DeviceContext,
    command: DeviceCommand,
    policy: CompletionPolicy,
    payload: Option<&Value>,
) -> CommandResponse {
    if let Some(resources) = payload {
        info!(
            "[{}] {} with {} resource entries",
            ctx.name,
            command,
            resource_count(resources)
        );
    }
    run_observation(ctx, command, policy)
}

/// Number of entries in the payload's resource lists
fn resource_count(payload: &Value) -> usize {
    match payload {
        Value::Object(map) => map
            .values()
            .map(|v| v.as_array().map_or(0, Vec::len))
            .sum(),
        Value::Array(items) => items.len(),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resource_count() {
        assert_eq!(resource_count(&json!({"dish": ["SKA001", "SKA002"], "pst": [1]})), 3);
        assert_eq!(resource_count(&json!(["SKA001"])), 1);
        assert_eq!(resource_count(&json!({"subarray_id": 1})), 0);
    }
}

//! Payload shapes of the graph-run event stream.

mod events;
mod messages;

pub use events::{
    ActionRequest, InterruptMessage, StreamEventKind, ToolEvent, ToolStatus, UpdateMode,
    INTERRUPT_KEY,
};
pub use messages::{
    decode_message, decode_messages, encode_message, error_message, tool_calls_of,
    update_messages,
};

use serde_json::Value;

/// The `__interrupt__` value of a payload, at the top level or one level down.
/// For an array payload such as a `[namespace, dataMap]` tuple, each object
/// element is searched the same way.
pub fn interrupt_marker(payload: &Value) -> Option<&Value> {
    match payload {
        Value::Array(items) => items.iter().find_map(object_marker),
        _ => object_marker(payload),
    }
}

fn object_marker(payload: &Value) -> Option<&Value> {
    let object = payload.as_object()?;
    if let Some(marker) = object.get(INTERRUPT_KEY) {
        return Some(marker);
    }
    object
        .values()
        .find_map(|value| value.as_object().and_then(|inner| inner.get(INTERRUPT_KEY)))
}

/// Tool events of a `[namespace, dataMap]` partial. `None` when the payload is
/// not that shape.
pub fn partial_tool_events(payload: &Value) -> Option<Vec<ToolEvent>> {
    let tuple = payload.as_array()?;
    let (namespace, data) = match tuple.as_slice() {
        [namespace @ Value::Array(items), Value::Object(data), ..] if !items.is_empty() => {
            (events::string_list(namespace), data)
        }
        _ => return None,
    };
    let (node, value) = data.iter().next()?;
    if value.is_null() {
        return None;
    }
    Some(vec![ToolEvent::from_node(namespace, node, value)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_interrupt_marker_depth() {
        let top = json!({"__interrupt__": [{"value": {}}]});
        let nested = json!({"agent": {"__interrupt__": [{"value": {}}]}});
        let deep = json!({"agent": {"inner": {"__interrupt__": []}}});

        assert!(interrupt_marker(&top).is_some());
        assert!(interrupt_marker(&nested).is_some());
        assert!(interrupt_marker(&deep).is_none());
        assert!(interrupt_marker(&json!([1, 2])).is_none());
    }

    #[test]
    fn test_interrupt_marker_in_subgraph_tuple() {
        let tuple = json!([["agent:1"], {"__interrupt__": [{"value": {}}]}]);
        let nested = json!([["agent:1"], {"tools": {"__interrupt__": []}}]);

        assert!(interrupt_marker(&tuple).is_some());
        assert!(interrupt_marker(&nested).is_some());
        assert!(interrupt_marker(&json!([["agent:1"], {"tools": {}}])).is_none());
    }

    #[test]
    fn test_partial_tool_events_shape() {
        let tuple = json!([["agent:abc"], {"toolNode": {"tool_name": "search", "status": "success"}}]);
        let events = partial_tool_events(&tuple).unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].namespace, vec!["agent:abc".to_string()]);
        assert_eq!(events[0].status, ToolStatus::Success);

        assert!(partial_tool_events(&json!([[], {"toolNode": {}}])).is_none());
        assert!(partial_tool_events(&json!([["ns"], {"toolNode": null}])).is_none());
        assert!(partial_tool_events(&json!([{"id": "m1", "content": "hi"}])).is_none());
    }
}

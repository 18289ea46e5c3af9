//! Final parameter construction for a tool call.
//!
//! Precedence, lowest to highest: unified context, values extracted from
//! the data context, tool metadata, AI-supplied arguments. Handler tools
//! additionally receive the engine parameters, which nothing overrides.

use serde_json::{Map, Value};

use crate::context::InvocationContext;
use crate::tools::ToolDefinition;

/// Parameter names auto-filled from the latest data packet.
const CONTENT_PARAMETER: &str = "content";
const TITLE_PARAMETER: &str = "title";

pub fn build_parameters(
    ai_params: &Map<String, Value>,
    context: &InvocationContext,
    tool: &ToolDefinition,
) -> Map<String, Value> {
    let mut params = context.unified.clone();

    let latest = context.latest_packet();
    if tool.declares(CONTENT_PARAMETER) {
        let body = latest.and_then(|p| p.body.clone());
        params.insert(CONTENT_PARAMETER.into(), option_to_value(body));
    }
    if tool.declares(TITLE_PARAMETER) {
        let title = latest.and_then(|p| p.title.clone());
        params.insert(TITLE_PARAMETER.into(), option_to_value(title));
    }

    params.insert(
        "tool_definition".into(),
        serde_json::to_value(tool).unwrap_or_default(),
    );
    params.insert("tool_name".into(), Value::String(tool.name.clone()));
    params.insert(
        "handler_config".into(),
        Value::Object(tool.handler_config.clone()),
    );

    for (key, value) in ai_params {
        params.insert(key.clone(), value.clone());
    }

    params
}

pub fn build_for_handler_tool(
    ai_params: &Map<String, Value>,
    context: &InvocationContext,
    tool: &ToolDefinition,
) -> Map<String, Value> {
    let mut params = build_parameters(ai_params, context, tool);
    params.extend(context.engine.to_map());
    params
}

fn option_to_value(value: Option<String>) -> Value {
    value.map(Value::String).unwrap_or(Value::Null)
}

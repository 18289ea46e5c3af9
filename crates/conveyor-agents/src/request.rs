use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::context::InvocationContext;
use crate::directives::{DirectiveContext, DirectiveRegistry};
use crate::providers::{AiRequest, AiResponse, ChatMessage, ProviderGateway, ToolCall, ToolSchema};
use crate::tools::ToolDefinition;

/// The single path from the engine to a provider.
///
/// Normalizes tool definitions, runs the directive chain, dispatches through
/// the gateway and maps whatever JSON comes back into an [`AiResponse`].
#[derive(Clone)]
pub struct RequestBuilder {
    gateway: Arc<dyn ProviderGateway>,
    directives: Arc<DirectiveRegistry>,
}

impl RequestBuilder {
    pub fn new(gateway: Arc<dyn ProviderGateway>, directives: Arc<DirectiveRegistry>) -> Self {
        Self {
            gateway,
            directives,
        }
    }

    pub fn directives(&self) -> &DirectiveRegistry {
        &self.directives
    }

    pub fn normalize_tools(tools: &[ToolDefinition]) -> Vec<ToolSchema> {
        tools
            .iter()
            .map(|tool| ToolSchema {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.input_schema(),
                handler: tool.handler.clone(),
                handler_config: tool.handler_config.clone(),
            })
            .collect()
    }

    /// The request exactly as it will be handed to the gateway.
    pub fn prepare(
        &self,
        messages: &[ChatMessage],
        provider: &str,
        model: &str,
        tools: &[ToolDefinition],
        agent_type: &str,
        context: &InvocationContext,
    ) -> AiRequest {
        let schemas = Self::normalize_tools(tools);
        let directive_context = DirectiveContext {
            provider,
            tools: &schemas,
            agent_type,
            invocation: context,
        };
        let request = AiRequest::new(model, messages.to_vec());
        let mut request = self.directives.apply(request, &directive_context);
        request.tools = schemas;
        request
    }

    pub async fn build(
        &self,
        messages: &[ChatMessage],
        provider: &str,
        model: &str,
        tools: &[ToolDefinition],
        agent_type: &str,
        context: &InvocationContext,
    ) -> AiResponse {
        let request = self.prepare(messages, provider, model, tools, agent_type, context);
        debug!(
            provider,
            model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "dispatching request"
        );

        match self.gateway.send(&request, provider).await {
            Ok(raw) => normalize_reply(&raw, provider, model),
            Err(e) => {
                warn!(provider, model, error = %e, "provider request failed");
                AiResponse::failure(provider, model, e.to_string())
            }
        }
    }
}

/// Map a raw gateway reply into an [`AiResponse`], whatever field names the
/// provider used.
pub fn normalize_reply(raw: &Value, provider: &str, model: &str) -> AiResponse {
    let error = raw.get("error").and_then(error_text);
    let success = raw.get("success").and_then(Value::as_bool).unwrap_or(true) && error.is_none();

    let content = ["/content", "/text", "/message/content", "/choices/0/message/content"]
        .iter()
        .find_map(|pointer| raw.pointer(pointer).and_then(content_text))
        .unwrap_or_default();

    let tool_calls = [
        "/tool_calls",
        "/toolCalls",
        "/message/tool_calls",
        "/choices/0/message/tool_calls",
    ]
    .iter()
    .find_map(|pointer| raw.pointer(pointer).and_then(Value::as_array))
    .map(|calls| calls.iter().filter_map(parse_tool_call).collect())
    .unwrap_or_else(|| tool_use_blocks(raw));

    AiResponse {
        success,
        content,
        tool_calls,
        provider: string_at(raw, "provider").unwrap_or(provider).to_string(),
        model: string_at(raw, "model").unwrap_or(model).to_string(),
        error: match (success, error) {
            (_, Some(error)) => Some(error),
            (false, None) => Some("provider reported failure".to_string()),
            (true, None) => None,
        },
    }
}

fn string_at<'a>(raw: &'a Value, key: &str) -> Option<&'a str> {
    raw.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn error_text(error: &Value) -> Option<String> {
    match error {
        Value::Null | Value::Bool(false) => None,
        Value::Object(obj) if obj.is_empty() => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => obj
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| Some(error.to_string())),
        other => Some(other.to_string()),
    }
}

/// Plain string content, or the text blocks of a content array.
fn content_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(blocks) => {
            let text: Vec<&str> = blocks
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect();
            Some(text.join("\n"))
        }
        _ => None,
    }
}

fn tool_use_blocks(raw: &Value) -> Vec<ToolCall> {
    raw.get("content")
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str) == Some("tool_use"))
                .filter_map(parse_tool_call)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_tool_call(call: &Value) -> Option<ToolCall> {
    let name = call
        .get("name")
        .or_else(|| call.pointer("/function/name"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())?;

    let parameters = ["/parameters", "/arguments", "/input", "/function/arguments"]
        .iter()
        .find_map(|pointer| call.pointer(pointer))
        .map(parameter_map)
        .unwrap_or_default();

    Some(ToolCall::new(name, parameters))
}

fn parameter_map(value: &Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map.clone(),
        Value::String(encoded) => match serde_json::from_str::<Value>(encoded) {
            Ok(Value::Object(map)) => map,
            _ => {
                warn!("discarding tool call arguments that are not a JSON object");
                Map::new()
            }
        },
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directives::{ALL_AGENT_TYPES, FnDirective, PIPELINE_AGENT};
    use crate::providers::ChatRole;
    use crate::tools::ParameterSpec;
    use async_trait::async_trait;
    use conveyor_common::{Error, Result};
    use serde_json::json;
    use std::sync::Mutex;

    struct RecordingGateway {
        reply: Result<Value>,
        seen: Mutex<Vec<(AiRequest, String)>>,
    }

    impl RecordingGateway {
        fn new(reply: Result<Value>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ProviderGateway for RecordingGateway {
        async fn send(&self, request: &AiRequest, provider: &str) -> Result<Value> {
            self.seen
                .lock()
                .unwrap()
                .push((request.clone(), provider.to_string()));
            match &self.reply {
                Ok(v) => Ok(v.clone()),
                Err(e) => Err(Error::Provider(e.to_string())),
            }
        }
    }

    fn search_tool() -> ToolDefinition {
        ToolDefinition::query("google_search", "Search the web")
            .with_parameter(ParameterSpec::string("query", "Search terms").required())
    }

    #[tokio::test]
    async fn build_runs_directives_and_sends_normalized_tools() {
        let gateway = RecordingGateway::new(Ok(json!({ "content": "Done.", "tool_calls": [] })));
        let directives = DirectiveRegistry::builder()
            .add_directive(
                10,
                [ALL_AGENT_TYPES],
                FnDirective::new("identity", |mut r: AiRequest, _: &DirectiveContext<'_>| {
                    r.push_system("You are a test agent.");
                    r
                }),
            )
            .build();
        let builder = RequestBuilder::new(gateway.clone(), Arc::new(directives));

        let response = builder
            .build(
                &[ChatMessage::user("Summarize X")],
                "openai",
                "gpt-test",
                &[search_tool()],
                PIPELINE_AGENT,
                &InvocationContext::new(),
            )
            .await;

        assert!(response.success);
        assert_eq!(response.content, "Done.");
        assert_eq!(response.provider, "openai");

        let seen = gateway.seen.lock().unwrap();
        let (request, provider) = &seen[0];
        assert_eq!(provider, "openai");
        assert_eq!(request.model, "gpt-test");
        assert_eq!(request.messages[0].role, ChatRole::System);
        assert_eq!(request.messages[1].content, "Summarize X");
        assert_eq!(request.tools[0].name, "google_search");
        assert_eq!(request.tools[0].parameters["required"], json!(["query"]));
    }

    #[tokio::test]
    async fn gateway_error_becomes_failed_response() {
        let gateway = RecordingGateway::new(Err(Error::Provider("rate_limited".into())));
        let builder = RequestBuilder::new(gateway, Arc::new(DirectiveRegistry::default()));
        let response = builder
            .build(&[], "openai", "gpt-test", &[], PIPELINE_AGENT, &InvocationContext::new())
            .await;
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("rate_limited"));
        assert!(response.tool_calls.is_empty());
    }

    #[test]
    fn normalizes_flat_reply() {
        let raw = json!({
            "success": true,
            "content": "Searching.",
            "toolCalls": [{ "name": "google_search", "parameters": { "query": "rust" } }],
            "model": "gpt-4o-mini"
        });
        let response = normalize_reply(&raw, "openai", "requested-model");
        assert!(response.success);
        assert_eq!(response.content, "Searching.");
        assert_eq!(response.tool_calls[0].name, "google_search");
        assert_eq!(response.tool_calls[0].parameters["query"], "rust");
        assert_eq!(response.model, "gpt-4o-mini");
        assert_eq!(response.provider, "openai");
    }

    #[test]
    fn normalizes_openai_style_choices() {
        let raw = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {
                            "name": "wordpress_publish",
                            "arguments": "{\"title\":\"Hello\"}"
                        }
                    }]
                }
            }]
        });
        let response = normalize_reply(&raw, "openai", "gpt-test");
        assert!(response.success);
        assert_eq!(response.content, "");
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].name, "wordpress_publish");
        assert_eq!(response.tool_calls[0].parameters["title"], "Hello");
    }

    #[test]
    fn normalizes_anthropic_style_content_blocks() {
        let raw = json!({
            "content": [
                { "type": "text", "text": "Let me look that up." },
                { "type": "tool_use", "id": "tu_1", "name": "google_search", "input": { "query": "tokio" } }
            ]
        });
        let response = normalize_reply(&raw, "anthropic", "claude-test");
        assert_eq!(response.content, "Let me look that up.");
        assert_eq!(response.tool_calls[0].name, "google_search");
        assert_eq!(response.tool_calls[0].parameters["query"], "tokio");
    }

    #[test]
    fn explicit_failure_and_error_fields() {
        let response = normalize_reply(
            &json!({ "success": false, "error": "rate_limited" }),
            "openai",
            "gpt-test",
        );
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("rate_limited"));

        let response = normalize_reply(
            &json!({ "error": { "message": "invalid api key", "type": "auth" } }),
            "openai",
            "gpt-test",
        );
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("invalid api key"));

        let response = normalize_reply(&json!({ "success": false }), "openai", "gpt-test");
        assert_eq!(response.error.as_deref(), Some("provider reported failure"));
    }

    #[test]
    fn falsy_error_fields_do_not_fail_the_reply() {
        for error in [json!(false), json!({}), Value::Null, json!("")] {
            let raw = json!({ "content": "Done.", "error": error.clone() });
            let response = normalize_reply(&raw, "openai", "gpt-test");
            assert!(response.success, "error field {error} failed the reply");
            assert!(response.error.is_none());
        }

        let response = normalize_reply(&json!({ "error": true }), "openai", "gpt-test");
        assert!(!response.success);
    }

    #[test]
    fn bad_argument_strings_become_empty_parameters() {
        let raw = json!({ "tool_calls": [{ "function": { "name": "google_search", "arguments": "not json" } }] });
        let response = normalize_reply(&raw, "openai", "gpt-test");
        assert_eq!(response.tool_calls[0].name, "google_search");
        assert!(response.tool_calls[0].parameters.is_empty());
    }
}

mod catalog;
mod executor;

pub use catalog::{ToolCatalog, ToolSettings};
pub use executor::ToolExecutor;

use async_trait::async_trait;
use conveyor_common::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::directives::ALL_AGENT_TYPES;

/// The capability behind a tool: publish a post, run a search, ...
///
/// Handlers are opaque to the engine. Returning `Err` (or panicking) is
/// converted into a failed [`ToolResult`] by the [`ToolExecutor`].
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn execute(&self, parameters: &Map<String, Value>) -> Result<ToolResult>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParameterKind {
    fn json_type(self) -> &'static str {
        match self {
            ParameterKind::String => "string",
            ParameterKind::Integer => "integer",
            ParameterKind::Number => "number",
            ParameterKind::Boolean => "boolean",
            ParameterKind::Array => "array",
            ParameterKind::Object => "object",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub kind: ParameterKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, kind: ParameterKind, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            description: description.into(),
        }
    }

    pub fn string(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, ParameterKind::String, description)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    /// Slug of the destination handler; present only for handler tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
    #[serde(default)]
    pub handler_config: Map<String, Value>,
    #[serde(default)]
    pub requires_config: bool,
    /// Opt-out tools count as configured even without settings.
    #[serde(default)]
    pub is_opt_out: bool,
    #[serde(default = "default_agent_types")]
    pub agent_types: Vec<String>,
}

fn default_agent_types() -> Vec<String> {
    vec![ALL_AGENT_TYPES.to_string()]
}

impl ToolDefinition {
    /// A read-only tool whose result data is shown to the model.
    pub fn query(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            handler: None,
            handler_config: Map::new(),
            requires_config: false,
            is_opt_out: false,
            agent_types: default_agent_types(),
        }
    }

    /// A side-effecting tool backed by a destination handler.
    pub fn handler(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: impl Into<String>,
    ) -> Self {
        Self {
            handler: Some(handler.into()),
            ..Self::query(name, description)
        }
    }

    pub fn with_parameter(mut self, spec: ParameterSpec) -> Self {
        self.parameters.push(spec);
        self
    }

    pub fn with_handler_config(mut self, config: Map<String, Value>) -> Self {
        self.handler_config = config;
        self
    }

    pub fn requiring_config(mut self) -> Self {
        self.requires_config = true;
        self
    }

    pub fn opt_out(mut self) -> Self {
        self.is_opt_out = true;
        self
    }

    pub fn for_agent_types<I, S>(mut self, agent_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.agent_types = agent_types.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_handler_tool(&self) -> bool {
        self.handler.is_some()
    }

    pub fn declares(&self, parameter: &str) -> bool {
        self.parameters.iter().any(|p| p.name == parameter)
    }

    pub fn applies_to(&self, agent_type: &str) -> bool {
        self.agent_types
            .iter()
            .any(|t| t == ALL_AGENT_TYPES || t == agent_type)
    }

    /// JSON Schema for the provider-facing tool description.
    pub fn input_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .parameters
            .iter()
            .map(|p| {
                (
                    p.name.clone(),
                    json!({ "type": p.kind.json_type(), "description": p.description }),
                )
            })
            .collect();
        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Required parameters that are absent or `null` in `params`.
    pub fn missing_required(&self, params: &Map<String, Value>) -> Vec<String> {
        self.parameters
            .iter()
            .filter(|p| p.required)
            .filter(|p| params.get(&p.name).is_none_or(Value::is_null))
            .map(|p| p.name.clone())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn ok_empty() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Why a tool call could not produce a result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolFailure {
    #[error("tool '{0}' is not available for this invocation")]
    NotFound(String),
    #[error("tool '{0}' is disabled")]
    Disabled(String),
    #[error("tool '{0}' is not configured")]
    NotConfigured(String),
    #[error("tool '{tool}' is missing required parameters: {}", missing.join(", "))]
    MissingParameters { tool: String, missing: Vec<String> },
    #[error("tool '{tool}' failed: {message}")]
    Handler { tool: String, message: String },
    #[error("tool '{tool}' panicked: {message}")]
    Panicked { tool: String, message: String },
}

impl From<ToolFailure> for ToolResult {
    fn from(failure: ToolFailure) -> Self {
        ToolResult::failure(failure.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publish_tool() -> ToolDefinition {
        ToolDefinition::handler("wordpress_publish", "Publish a post", "wordpress")
            .with_parameter(ParameterSpec::string("title", "Post title").required())
            .with_parameter(ParameterSpec::string("content", "Post body").required())
            .with_parameter(ParameterSpec::new(
                "tags",
                ParameterKind::Array,
                "Tag names",
            ))
    }

    #[test]
    fn input_schema_lists_properties_and_required() {
        let schema = publish_tool().input_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["title"]["type"], "string");
        assert_eq!(schema["properties"]["tags"]["type"], "array");
        assert_eq!(schema["required"], json!(["title", "content"]));
    }

    #[test]
    fn missing_required_treats_null_as_missing() {
        let tool = publish_tool();
        let mut params = Map::new();
        params.insert("title".into(), json!("Hello"));
        params.insert("content".into(), Value::Null);
        assert_eq!(tool.missing_required(&params), vec!["content".to_string()]);
    }

    #[test]
    fn agent_type_scoping() {
        let everywhere = ToolDefinition::query("google_search", "Search the web");
        assert!(everywhere.applies_to("chat"));
        assert!(everywhere.applies_to("pipeline"));

        let chat_only = everywhere.clone().for_agent_types(["chat"]);
        assert!(chat_only.applies_to("chat"));
        assert!(!chat_only.applies_to("pipeline"));
    }

    #[test]
    fn failures_render_into_failed_results() {
        let result: ToolResult = ToolFailure::MissingParameters {
            tool: "wordpress_publish".into(),
            missing: vec!["title".into(), "content".into()],
        }
        .into();
        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("tool 'wordpress_publish' is missing required parameters: title, content")
        );
    }
}

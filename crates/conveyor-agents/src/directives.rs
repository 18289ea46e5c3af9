//! Request directives: ordered steps that add context to an outgoing request
//! before it reaches the provider gateway.
//!
//! Directives are assembled once with [`DirectiveRegistry::builder`] and the
//! registry is shared read-only between conversation runs. Lower priorities
//! run first. Conventional bands:
//!
//! | band  | purpose                |
//! |-------|------------------------|
//! | 10-19 | agent identity         |
//! | 20-29 | global behavior        |
//! | 30-39 | scenario instructions  |
//! | 40-49 | reference material     |
//! | 50+   | environment metadata   |

use std::collections::BTreeMap;
use std::sync::Arc;

use conveyor_config::{PromptsConfig, ReferenceDocument};
use tracing::debug;

use crate::context::InvocationContext;
use crate::providers::{AiRequest, ToolSchema};

pub const ALL_AGENT_TYPES: &str = "all";
pub const PIPELINE_AGENT: &str = "pipeline";
pub const CHAT_AGENT: &str = "chat";

pub const IDENTITY_PRIORITY: u32 = 10;
pub const GLOBAL_PRIORITY: u32 = 20;
pub const SCENARIO_PRIORITY: u32 = 30;
pub const REFERENCE_PRIORITY: u32 = 40;
pub const ENVIRONMENT_PRIORITY: u32 = 50;

const DEFAULT_IDENTITY: &str = "You are an AI agent inside a content pipeline. \
You read content produced by earlier steps and use the tools you are given to act on it.";

const DEFAULT_CHAT_INSTRUCTIONS: &str = "You are talking with a site administrator. \
Answer their questions directly. Use tools only when the request needs live data or an action, \
and explain what you did in plain language.";

/// What a directive may look at besides the request itself.
#[derive(Debug, Clone, Copy)]
pub struct DirectiveContext<'a> {
    pub provider: &'a str,
    pub tools: &'a [ToolSchema],
    pub agent_type: &'a str,
    pub invocation: &'a InvocationContext,
}

/// One request-mutating step. Implementations must be pure: the same request
/// and context always produce the same output.
pub trait Directive: Send + Sync {
    fn name(&self) -> &str;

    fn inject(&self, request: AiRequest, context: &DirectiveContext<'_>) -> AiRequest;
}

/// Adapts a closure into a [`Directive`].
pub struct FnDirective<F> {
    name: String,
    inject: F,
}

impl<F> FnDirective<F>
where
    F: Fn(AiRequest, &DirectiveContext<'_>) -> AiRequest + Send + Sync,
{
    pub fn new(name: impl Into<String>, inject: F) -> Self {
        Self {
            name: name.into(),
            inject,
        }
    }
}

impl<F> Directive for FnDirective<F>
where
    F: Fn(AiRequest, &DirectiveContext<'_>) -> AiRequest + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn inject(&self, request: AiRequest, context: &DirectiveContext<'_>) -> AiRequest {
        (self.inject)(request, context)
    }
}

struct RegisteredDirective {
    priority: u32,
    agent_types: Vec<String>,
    directive: Arc<dyn Directive>,
}

impl RegisteredDirective {
    fn applies_to(&self, agent_type: &str) -> bool {
        self.agent_types
            .iter()
            .any(|t| t == ALL_AGENT_TYPES || t == agent_type)
    }
}

#[derive(Default)]
pub struct DirectiveRegistryBuilder {
    directives: Vec<RegisteredDirective>,
}

impl DirectiveRegistryBuilder {
    pub fn add_directive<I, S>(
        mut self,
        priority: u32,
        agent_types: I,
        directive: impl Directive + 'static,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.directives.push(RegisteredDirective {
            priority,
            agent_types: agent_types.into_iter().map(Into::into).collect(),
            directive: Arc::new(directive),
        });
        self
    }

    /// Register the built-in directives configured by `prompts`.
    pub fn with_defaults(self, prompts: &PromptsConfig) -> Self {
        let identity = prompts
            .identity
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_IDENTITY.to_string());

        let mut builder = self
            .add_directive(
                IDENTITY_PRIORITY,
                [ALL_AGENT_TYPES],
                IdentityDirective::new(identity),
            )
            .add_directive(
                SCENARIO_PRIORITY,
                [PIPELINE_AGENT],
                PipelineInstructionsDirective::new(prompts.pipeline_instructions.clone()),
            )
            .add_directive(
                SCENARIO_PRIORITY,
                [CHAT_AGENT],
                ChatInstructionsDirective::new(prompts.chat_instructions.clone()),
            )
            .add_directive(
                ENVIRONMENT_PRIORITY,
                [ALL_AGENT_TYPES],
                EnvironmentDirective::new(prompts.environment.clone()),
            );

        if let Some(global) = prompts.global.as_ref().filter(|s| !s.trim().is_empty()) {
            builder = builder.add_directive(
                GLOBAL_PRIORITY,
                [ALL_AGENT_TYPES],
                GlobalPromptDirective::new(global.clone()),
            );
        }
        if !prompts.reference_material.is_empty() {
            builder = builder.add_directive(
                REFERENCE_PRIORITY,
                [ALL_AGENT_TYPES],
                ReferenceMaterialDirective::new(prompts.reference_material.clone()),
            );
        }
        builder
    }

    pub fn build(mut self) -> DirectiveRegistry {
        // Stable: equal priorities keep registration order.
        self.directives.sort_by_key(|d| d.priority);
        DirectiveRegistry {
            directives: self.directives,
        }
    }
}

/// Ordered, read-only set of directives.
#[derive(Default)]
pub struct DirectiveRegistry {
    directives: Vec<RegisteredDirective>,
}

impl DirectiveRegistry {
    pub fn builder() -> DirectiveRegistryBuilder {
        DirectiveRegistryBuilder::default()
    }

    pub fn from_config(prompts: &PromptsConfig) -> Self {
        Self::builder().with_defaults(prompts).build()
    }

    pub fn len(&self) -> usize {
        self.directives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }

    /// Names of the directives that run for `agent_type`, in application order.
    pub fn names_for(&self, agent_type: &str) -> Vec<&str> {
        self.directives
            .iter()
            .filter(|d| d.applies_to(agent_type))
            .map(|d| d.directive.name())
            .collect()
    }

    pub fn apply(&self, request: AiRequest, context: &DirectiveContext<'_>) -> AiRequest {
        self.directives
            .iter()
            .filter(|d| d.applies_to(context.agent_type))
            .fold(request, |request, d| {
                debug!(
                    directive = d.directive.name(),
                    priority = d.priority,
                    "applying directive"
                );
                d.directive.inject(request, context)
            })
    }
}

pub struct IdentityDirective {
    identity: String,
}

impl IdentityDirective {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
        }
    }
}

impl Directive for IdentityDirective {
    fn name(&self) -> &str {
        "identity"
    }

    fn inject(&self, mut request: AiRequest, _context: &DirectiveContext<'_>) -> AiRequest {
        request.push_system(self.identity.clone());
        request
    }
}

pub struct GlobalPromptDirective {
    prompt: String,
}

impl GlobalPromptDirective {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
        }
    }
}

impl Directive for GlobalPromptDirective {
    fn name(&self) -> &str {
        "global_prompt"
    }

    fn inject(&self, mut request: AiRequest, _context: &DirectiveContext<'_>) -> AiRequest {
        request.push_system(self.prompt.clone());
        request
    }
}

/// Tells a pipeline agent which handler tools complete its step.
pub struct PipelineInstructionsDirective {
    extra: Option<String>,
}

impl PipelineInstructionsDirective {
    pub fn new(extra: Option<String>) -> Self {
        Self { extra }
    }
}

impl Directive for PipelineInstructionsDirective {
    fn name(&self) -> &str {
        "pipeline_instructions"
    }

    fn inject(&self, mut request: AiRequest, context: &DirectiveContext<'_>) -> AiRequest {
        let handlers: Vec<String> = context
            .tools
            .iter()
            .filter(|t| t.handler.is_some())
            .map(|t| format!("`{}`", t.name))
            .collect();

        let mut text = String::from("You are running as one step of an automated pipeline.");
        if handlers.is_empty() {
            text.push_str(" No handler tools are available, so reply with the processed content.");
        } else {
            text.push_str(&format!(
                " Deliver your result with one of these handler tools: {}. \
                 Once a handler tool reports success, stop calling tools and reply with a short summary.",
                handlers.join(", ")
            ));
        }
        if let Some(extra) = self.extra.as_ref().filter(|s| !s.trim().is_empty()) {
            text.push_str("\n\n");
            text.push_str(extra);
        }

        request.push_system(text);
        request
    }
}

pub struct ChatInstructionsDirective {
    instructions: String,
}

impl ChatInstructionsDirective {
    pub fn new(instructions: Option<String>) -> Self {
        Self {
            instructions: instructions
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CHAT_INSTRUCTIONS.to_string()),
        }
    }
}

impl Directive for ChatInstructionsDirective {
    fn name(&self) -> &str {
        "chat_instructions"
    }

    fn inject(&self, mut request: AiRequest, _context: &DirectiveContext<'_>) -> AiRequest {
        request.push_system(self.instructions.clone());
        request
    }
}

/// Context documents loaded at startup.
pub struct ReferenceMaterialDirective {
    documents: Vec<ReferenceDocument>,
}

impl ReferenceMaterialDirective {
    pub fn new(documents: Vec<ReferenceDocument>) -> Self {
        Self { documents }
    }
}

impl Directive for ReferenceMaterialDirective {
    fn name(&self) -> &str {
        "reference_material"
    }

    fn inject(&self, mut request: AiRequest, _context: &DirectiveContext<'_>) -> AiRequest {
        let mut text = String::from("Reference material:");
        for doc in &self.documents {
            text.push_str(&format!("\n\n## {}\n{}", doc.name, doc.content.trim_end()));
        }
        request.push_system(text);
        request
    }
}

pub struct EnvironmentDirective {
    metadata: BTreeMap<String, String>,
}

impl EnvironmentDirective {
    pub fn new(metadata: BTreeMap<String, String>) -> Self {
        Self { metadata }
    }
}

impl Directive for EnvironmentDirective {
    fn name(&self) -> &str {
        "environment"
    }

    fn inject(&self, mut request: AiRequest, context: &DirectiveContext<'_>) -> AiRequest {
        let invocation = context.invocation;
        let mut lines = vec![
            "Environment:".to_string(),
            format!(
                "- current time: {}",
                invocation.requested_at.format("%Y-%m-%d %H:%M UTC")
            ),
            format!("- provider: {}", context.provider),
            format!("- agent type: {}", context.agent_type),
        ];
        if let Some(job_id) = &invocation.engine.job_id {
            lines.push(format!("- job: {job_id}"));
        }
        if let Some(step) = &invocation.engine.flow_step_id {
            lines.push(format!("- flow step: {step}"));
        }
        for (key, value) in &self.metadata {
            lines.push(format!("- {key}: {value}"));
        }

        request.push_system(lines.join("\n"));
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EngineParameters;
    use crate::providers::ChatMessage;
    use chrono::TimeZone;
    use serde_json::{Map, json};

    fn tag(label: &'static str) -> impl Directive {
        FnDirective::new(label, move |mut request: AiRequest, _: &DirectiveContext<'_>| {
            request.push_system(label);
            request
        })
    }

    fn run(registry: &DirectiveRegistry, agent_type: &str, tools: &[ToolSchema]) -> AiRequest {
        let invocation = InvocationContext::new();
        let context = DirectiveContext {
            provider: "openai",
            tools,
            agent_type,
            invocation: &invocation,
        };
        registry.apply(
            AiRequest::new("gpt-test", vec![ChatMessage::user("Summarize X")]),
            &context,
        )
    }

    #[test]
    fn applies_in_priority_order_with_stable_ties() {
        let registry = DirectiveRegistry::builder()
            .add_directive(50, [ALL_AGENT_TYPES], tag("env"))
            .add_directive(10, [ALL_AGENT_TYPES], tag("identity"))
            .add_directive(30, [ALL_AGENT_TYPES], tag("scenario-a"))
            .add_directive(30, [ALL_AGENT_TYPES], tag("scenario-b"))
            .build();

        let request = run(&registry, PIPELINE_AGENT, &[]);
        assert_eq!(
            request.system_messages().collect::<Vec<_>>(),
            vec!["identity", "scenario-a", "scenario-b", "env"]
        );
        assert_eq!(request.messages.last().map(|m| m.content.as_str()), Some("Summarize X"));
    }

    #[test]
    fn filters_by_agent_type() {
        let registry = DirectiveRegistry::builder()
            .add_directive(30, [PIPELINE_AGENT], tag("pipeline-only"))
            .add_directive(30, [CHAT_AGENT], tag("chat-only"))
            .add_directive(10, [ALL_AGENT_TYPES], tag("everyone"))
            .build();

        assert_eq!(registry.names_for(CHAT_AGENT), vec!["everyone", "chat-only"]);
        let request = run(&registry, PIPELINE_AGENT, &[]);
        assert_eq!(
            request.system_messages().collect::<Vec<_>>(),
            vec!["everyone", "pipeline-only"]
        );
    }

    #[test]
    fn empty_registry_leaves_request_untouched() {
        let registry = DirectiveRegistry::default();
        let request = run(&registry, CHAT_AGENT, &[]);
        assert_eq!(request.messages, vec![ChatMessage::user("Summarize X")]);
    }

    #[test]
    fn defaults_follow_configuration() {
        let prompts = PromptsConfig {
            identity: Some("You are Conveyor.".into()),
            global: Some("Write in British English.".into()),
            reference_material: vec![ReferenceDocument {
                name: "style.md".into(),
                content: "Short paragraphs.\n".into(),
            }],
            ..PromptsConfig::default()
        };
        let registry = DirectiveRegistry::from_config(&prompts);
        assert_eq!(
            registry.names_for(PIPELINE_AGENT),
            vec![
                "identity",
                "global_prompt",
                "pipeline_instructions",
                "reference_material",
                "environment"
            ]
        );

        let request = run(&registry, PIPELINE_AGENT, &[]);
        let system: Vec<&str> = request.system_messages().collect();
        assert_eq!(system[0], "You are Conveyor.");
        assert_eq!(system[1], "Write in British English.");
        assert!(system[3].contains("## style.md\nShort paragraphs."));
    }

    #[test]
    fn unset_optional_prompts_are_not_registered() {
        let registry = DirectiveRegistry::from_config(&PromptsConfig::default());
        assert_eq!(
            registry.names_for(CHAT_AGENT),
            vec!["identity", "chat_instructions", "environment"]
        );
    }

    #[test]
    fn pipeline_instructions_list_handler_tools() {
        let tools = vec![
            ToolSchema {
                name: "wordpress_publish".into(),
                description: "Publish a post".into(),
                parameters: json!({ "type": "object" }),
                handler: Some("wordpress".into()),
                handler_config: Map::new(),
            },
            ToolSchema {
                name: "google_search".into(),
                description: "Search".into(),
                parameters: json!({ "type": "object" }),
                handler: None,
                handler_config: Map::new(),
            },
        ];
        let registry = DirectiveRegistry::builder()
            .add_directive(30, [PIPELINE_AGENT], PipelineInstructionsDirective::new(None))
            .build();
        let request = run(&registry, PIPELINE_AGENT, &tools);
        let text = request.system_messages().next().unwrap();
        assert!(text.contains("`wordpress_publish`"));
        assert!(!text.contains("google_search"));
    }

    #[test]
    fn environment_includes_time_and_identifiers() {
        let mut invocation = InvocationContext::new().with_engine(EngineParameters {
            job_id: Some("job-42".into()),
            flow_step_id: Some("step-7".into()),
            ..Default::default()
        });
        invocation.requested_at = chrono::Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap();

        let mut metadata = BTreeMap::new();
        metadata.insert("site".to_string(), "blog.example".to_string());
        let directive = EnvironmentDirective::new(metadata);

        let context = DirectiveContext {
            provider: "anthropic",
            tools: &[],
            agent_type: PIPELINE_AGENT,
            invocation: &invocation,
        };
        let request = directive.inject(AiRequest::new("m", Vec::new()), &context);
        let text = &request.messages[0].content;
        assert!(text.contains("- current time: 2026-03-01 09:30 UTC"));
        assert!(text.contains("- provider: anthropic"));
        assert!(text.contains("- job: job-42"));
        assert!(text.contains("- flow step: step-7"));
        assert!(text.contains("- site: blog.example"));
    }
}

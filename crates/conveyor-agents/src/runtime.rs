use std::sync::Arc;

use conveyor_config::EngineConfig;
use conveyor_config::model::DEFAULT_MAX_TURNS;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::context::InvocationContext;
use crate::directives::{DirectiveRegistry, PIPELINE_AGENT};
use crate::messages::{
    MessageFormatter, build_message, generate_duplicate_correction_message, validate_tool_call,
};
use crate::providers::{ChatMessage, ChatRole, ProviderGateway, ToolCall};
use crate::request::RequestBuilder;
use crate::tools::{ToolCatalog, ToolDefinition, ToolExecutor};

/// Per-run settings for [`ConversationLoop::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationOptions {
    pub provider: String,
    pub model: String,
    pub agent_type: String,
    /// Upper bound on AI round-trips. Zero ends the run before any request.
    pub max_turns: usize,
}

impl Default for ConversationOptions {
    fn default() -> Self {
        Self {
            provider: String::new(),
            model: String::new(),
            agent_type: PIPELINE_AGENT.to_string(),
            max_turns: DEFAULT_MAX_TURNS,
        }
    }
}

impl ConversationOptions {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn from_config(
        config: &EngineConfig,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self::new(provider, model).with_max_turns(config.max_turns)
    }

    pub fn with_agent_type(mut self, agent_type: impl Into<String>) -> Self {
        self.agent_type = agent_type.into();
        self
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }
}

/// How a run ended, folded from `(completed, error)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum ConversationOutcome {
    Completed,
    MaxTurnsReached,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolExecutionRecord {
    pub turn: usize,
    pub tool: String,
    pub parameters: Map<String, Value>,
    pub success: bool,
    /// Intercepted as a repeat of the previous call; the handler did not run.
    pub duplicate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConversationState {
    pub messages: Vec<ChatMessage>,
    /// Completed AI round-trips, successful or not.
    pub turn_count: usize,
    /// True iff the most recent AI response asked for no tools.
    pub completed: bool,
    pub last_tool_calls: Vec<ToolCall>,
    pub final_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub tool_executions: Vec<ToolExecutionRecord>,
}

impl ConversationState {
    fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn outcome(&self) -> ConversationOutcome {
        match (&self.error, self.completed) {
            (Some(error), _) => ConversationOutcome::Failed(error.clone()),
            (None, true) => ConversationOutcome::Completed,
            (None, false) => ConversationOutcome::MaxTurnsReached,
        }
    }

    /// Number of calls that actually reached a handler or failed trying.
    pub fn executed_tool_count(&self) -> usize {
        self.tool_executions.iter().filter(|r| !r.duplicate).count()
    }
}

/// Drives an AI model through request, response and tool execution until it
/// stops asking for tools or the turn budget runs out.
///
/// One loop value can serve any number of concurrent runs; all per-run state
/// lives in the returned [`ConversationState`].
#[derive(Clone)]
pub struct ConversationLoop {
    requests: RequestBuilder,
    executor: ToolExecutor,
    formatter: MessageFormatter,
}

impl ConversationLoop {
    pub fn new(requests: RequestBuilder, executor: ToolExecutor, formatter: MessageFormatter) -> Self {
        Self {
            requests,
            executor,
            formatter,
        }
    }

    pub fn from_config(
        config: &EngineConfig,
        gateway: Arc<dyn ProviderGateway>,
        catalog: Arc<ToolCatalog>,
    ) -> Self {
        let directives = Arc::new(DirectiveRegistry::from_config(&config.prompts));
        Self::new(
            RequestBuilder::new(gateway, directives),
            ToolExecutor::new(catalog),
            MessageFormatter::new(config.parameter_preview_chars),
        )
    }

    pub fn available_tools(&self, agent_type: &str, enabled_ids: &[String]) -> Vec<ToolDefinition> {
        self.executor
            .catalog()
            .get_available_tools(agent_type, enabled_ids)
    }

    #[instrument(
        skip_all,
        fields(
            provider = %options.provider,
            model = %options.model,
            agent_type = %options.agent_type,
            run_id = tracing::field::Empty
        )
    )]
    pub async fn execute(
        &self,
        initial_messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
        options: &ConversationOptions,
        context: &InvocationContext,
    ) -> ConversationState {
        let run_id = Uuid::new_v4();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));
        info!(
            max_turns = options.max_turns,
            tools = tools.len(),
            "conversation started"
        );

        let mut state = ConversationState::new(initial_messages);

        while !state.completed && state.turn_count < options.max_turns {
            let response = self
                .requests
                .build(
                    &state.messages,
                    &options.provider,
                    &options.model,
                    tools,
                    &options.agent_type,
                    context,
                )
                .await;
            state.turn_count += 1;
            let turn = state.turn_count;
            debug!(
                turn,
                success = response.success,
                tool_calls = response.tool_calls.len(),
                "received AI response"
            );

            if !response.success {
                let error = response
                    .error
                    .unwrap_or_else(|| "provider request failed".to_string());
                warn!(turn, error = %error, "AI request failed, ending conversation");
                state.error = Some(error);
                state.completed = false;
                break;
            }

            if !response.content.trim().is_empty() {
                state
                    .messages
                    .push(build_message(ChatRole::Assistant, response.content.clone()));
                state.final_content = Some(response.content);
            }

            state.last_tool_calls = response.tool_calls;
            if state.last_tool_calls.is_empty() {
                state.completed = true;
                break;
            }

            // Calls run one at a time; each sees the messages the previous one appended.
            let calls = state.last_tool_calls.clone();
            for call in &calls {
                self.run_tool_call(&mut state, call, tools, context, turn)
                    .await;
            }
        }

        match state.outcome() {
            ConversationOutcome::Completed => {
                info!(turns = state.turn_count, "conversation completed")
            }
            ConversationOutcome::MaxTurnsReached => warn!(
                turns = state.turn_count,
                max_turns = options.max_turns,
                "conversation stopped at turn limit"
            ),
            ConversationOutcome::Failed(error) => {
                warn!(turns = state.turn_count, error = %error, "conversation failed")
            }
        }

        state
    }

    async fn run_tool_call(
        &self,
        state: &mut ConversationState,
        call: &ToolCall,
        tools: &[ToolDefinition],
        context: &InvocationContext,
        turn: usize,
    ) {
        let validation = validate_tool_call(&call.name, &call.parameters, &state.messages);
        if validation.is_duplicate {
            let correction = validation
                .correction
                .unwrap_or_else(|| generate_duplicate_correction_message(&call.name));
            warn!(turn, tool = %call.name, "duplicate tool call intercepted");
            state.messages.push(build_message(ChatRole::User, correction));
            state.tool_executions.push(ToolExecutionRecord {
                turn,
                tool: call.name.clone(),
                parameters: call.parameters.clone(),
                success: false,
                duplicate: true,
                error: None,
            });
            return;
        }

        let result = self.executor.execute_tool(call, tools, context).await;
        let is_handler_tool = tools
            .iter()
            .find(|t| t.name == call.name)
            .is_some_and(ToolDefinition::is_handler_tool);
        debug!(turn, tool = %call.name, success = result.success, "tool call finished");

        state.messages.push(
            self.formatter
                .format_tool_call_message(&call.name, &call.parameters, turn),
        );
        state.messages.push(self.formatter.format_tool_result_message(
            &call.name,
            &result,
            &call.parameters,
            is_handler_tool,
            turn,
        ));
        state.tool_executions.push(ToolExecutionRecord {
            turn,
            tool: call.name.clone(),
            parameters: call.parameters.clone(),
            success: result.success,
            duplicate: false,
            error: result.error,
        });
    }
}
